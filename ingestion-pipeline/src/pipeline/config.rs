use std::time::Duration;

use common::utils::config::AppConfig;

use super::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub retry: RetryPolicy,
    pub max_failing_retries: u32,
    pub processing_timeout: Duration,
    pub raw_page_size: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_failing_retries: 10,
            processing_timeout: Duration::from_secs(300),
            raw_page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
}

impl IngestionConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: IngestionTuning {
                retry: RetryPolicy::new(
                    Duration::from_secs(config.retry_base_delay_secs),
                    Duration::from_secs(config.retry_max_delay_secs),
                    config.retry_jitter_ratio,
                ),
                max_failing_retries: config.max_failing_retries,
                processing_timeout: Duration::from_secs(
                    u64::try_from(config.work_item_processing_timeout_secs).unwrap_or(0),
                ),
                raw_page_size: config.raw_page_size.max(1),
            },
        }
    }
}
