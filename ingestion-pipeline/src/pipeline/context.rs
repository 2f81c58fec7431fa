use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        raw_data::RawDataClient,
        repository::DataRepository,
        types::{dataset::Dataset, raw_record::RawRecord, work_item::WorkItem},
    },
};
use deduplicator::{Deduplicator, DeduplicatorFactory};
use tracing::error;

use super::{config::IngestionConfig, error::ProcessingError, services::PipelineServices};

/// Counters reported when a run finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingStats {
    pub records_collected: usize,
    pub records_processed: usize,
    pub records_skipped: usize,
    pub data_written: usize,
    pub readings_rejected: usize,
}

pub struct PipelineContext<'a> {
    pub item: &'a WorkItem,
    pub item_id: String,
    pub attempt: u32,
    pub repository: &'a dyn DataRepository,
    pub raw_data: &'a dyn RawDataClient,
    pub factory: &'a dyn DeduplicatorFactory,
    pub services: &'a Arc<dyn PipelineServices>,
    pub pipeline_config: &'a IngestionConfig,
    pub dataset: Option<Dataset>,
    pub deduplicator: Option<Arc<dyn Deduplicator>>,
    pub records: Vec<RawRecord>,
    pub stats: ProcessingStats,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        item: &'a WorkItem,
        repository: &'a dyn DataRepository,
        raw_data: &'a dyn RawDataClient,
        factory: &'a dyn DeduplicatorFactory,
        services: &'a Arc<dyn PipelineServices>,
        pipeline_config: &'a IngestionConfig,
    ) -> Self {
        Self {
            item,
            item_id: item.id.clone(),
            attempt: item.failing_retry_count.saturating_add(1),
            repository,
            raw_data,
            factory,
            services,
            pipeline_config,
            dataset: None,
            deduplicator: None,
            records: Vec::new(),
            stats: ProcessingStats::default(),
        }
    }

    pub fn dataset(&self) -> Result<&Dataset, ProcessingError> {
        self.dataset.as_ref().ok_or_else(|| {
            AppError::InternalError("dataset expected to be resolved".into()).into()
        })
    }

    pub fn dataset_mut(&mut self) -> Result<&mut Dataset, ProcessingError> {
        self.dataset.as_mut().ok_or_else(|| {
            AppError::InternalError("dataset expected to be resolved".into()).into()
        })
    }

    pub fn deduplicator(&self) -> Result<Arc<dyn Deduplicator>, ProcessingError> {
        self.deduplicator.as_ref().map(Arc::clone).ok_or_else(|| {
            AppError::InternalError("deduplicator expected to be resolved".into()).into()
        })
    }

    pub fn abort(&mut self, err: ProcessingError) -> ProcessingError {
        error!(
            work_item_id = %self.item_id,
            attempt = self.attempt,
            dataset_id = self.dataset.as_ref().map_or("", |dataset| dataset.id.as_str()),
            error = %err,
            retryable = err.is_retryable(),
            "ingestion pipeline aborted"
        );
        err
    }
}
