use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_worker_idle_backoff_ms")]
    pub worker_idle_backoff_ms: u64,
    #[serde(default = "default_processing_timeout_secs")]
    pub work_item_processing_timeout_secs: i64,
    #[serde(default = "default_retry_base_delay_secs")]
    pub retry_base_delay_secs: u64,
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,
    #[serde(default = "default_retry_jitter_ratio")]
    pub retry_jitter_ratio: f64,
    #[serde(default = "default_max_failing_retries")]
    pub max_failing_retries: u32,
    #[serde(default = "default_raw_page_size")]
    pub raw_page_size: usize,
    #[serde(default = "default_identity_hash_separator")]
    pub identity_hash_separator: String,
    #[serde(default = "default_time_cutoff_manufacturers")]
    pub time_cutoff_manufacturers: Vec<String>,
    #[serde(default = "default_hash_archive_manufacturers")]
    pub hash_archive_manufacturers: Vec<String>,
    #[serde(default = "default_hash_drop_manufacturers")]
    pub hash_drop_manufacturers: Vec<String>,
    #[serde(default = "default_truncate_manufacturers")]
    pub truncate_manufacturers: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: "platform".to_string(),
            surrealdb_database: "data".to_string(),
            data_dir: default_data_dir(),
            storage: default_storage_kind(),
            worker_concurrency: default_worker_concurrency(),
            worker_idle_backoff_ms: default_worker_idle_backoff_ms(),
            work_item_processing_timeout_secs: default_processing_timeout_secs(),
            retry_base_delay_secs: default_retry_base_delay_secs(),
            retry_max_delay_secs: default_retry_max_delay_secs(),
            retry_jitter_ratio: default_retry_jitter_ratio(),
            max_failing_retries: default_max_failing_retries(),
            raw_page_size: default_raw_page_size(),
            identity_hash_separator: default_identity_hash_separator(),
            time_cutoff_manufacturers: default_time_cutoff_manufacturers(),
            hash_archive_manufacturers: default_hash_archive_manufacturers(),
            hash_drop_manufacturers: default_hash_drop_manufacturers(),
            truncate_manufacturers: default_truncate_manufacturers(),
        }
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_worker_idle_backoff_ms() -> u64 {
    500
}

fn default_processing_timeout_secs() -> i64 {
    300
}

fn default_retry_base_delay_secs() -> u64 {
    30
}

fn default_retry_max_delay_secs() -> u64 {
    15 * 60
}

fn default_retry_jitter_ratio() -> f64 {
    0.1
}

fn default_max_failing_retries() -> u32 {
    10
}

fn default_raw_page_size() -> usize {
    100
}

fn default_identity_hash_separator() -> String {
    "|".to_string()
}

fn default_time_cutoff_manufacturers() -> Vec<String> {
    vec!["Arkray".to_string(), "Bayer".to_string()]
}

fn default_hash_archive_manufacturers() -> Vec<String> {
    vec![
        "Abbott".to_string(),
        "Ascensia".to_string(),
        "LifeScan".to_string(),
        "Roche".to_string(),
        "Trividia Health".to_string(),
    ]
}

fn default_hash_drop_manufacturers() -> Vec<String> {
    vec!["Dexcom".to_string()]
}

fn default_truncate_manufacturers() -> Vec<String> {
    vec![
        "Animas".to_string(),
        "Insulet".to_string(),
        "Medtronic".to_string(),
        "Tandem".to_string(),
    ]
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::default()
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("time_cutoff_manufacturers")
                .with_list_parse_key("hash_archive_manufacturers")
                .with_list_parse_key("hash_drop_manufacturers")
                .with_list_parse_key("truncate_manufacturers"),
        )
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_optional_keys_fall_back_to_defaults() {
        let config = Config::builder()
            .set_override("surrealdb_address", "mem://")
            .and_then(|b| b.set_override("surrealdb_username", "root"))
            .and_then(|b| b.set_override("surrealdb_password", "root"))
            .and_then(|b| b.set_override("surrealdb_namespace", "ns"))
            .and_then(|b| b.set_override("surrealdb_database", "db"))
            .expect("overrides")
            .build()
            .expect("build config");

        let parsed: AppConfig = config.try_deserialize().expect("deserialize");
        assert_eq!(parsed.storage, StorageKind::Local);
        assert_eq!(parsed.raw_page_size, 100);
        assert_eq!(parsed.identity_hash_separator, "|");
        assert!(parsed
            .truncate_manufacturers
            .contains(&"Medtronic".to_string()));
    }
}
