mod config;
mod context;
mod error;
mod retry;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
pub use context::ProcessingStats;
pub use error::ProcessingError;
pub use retry::RetryPolicy;
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        raw_data::RawDataClient,
        repository::DataRepository,
        types::{
            dataset::SequenceOperation,
            work_item::{WorkErrorInfo, WorkItem},
        },
    },
    utils::config::AppConfig,
};
use deduplicator::DeduplicatorFactory;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::{
    context::PipelineContext,
    stages::{collect_records, finalize, process_records, resolve_dataset, resolve_strategy, skip},
    state::ready,
};

/// What happened to a work item after one processing attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkOutcome {
    /// Processed and removed from the queue.
    Completed(ProcessingStats),
    /// Failed transiently; scheduled again.
    Requeued {
        retry_at: DateTime<Utc>,
        failing_retry_count: u32,
    },
    /// Moved to the dead-letter state.
    Failed { code: String, reason: String },
    /// Handed back to the queue untouched after cancellation.
    Released,
}

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    repository: Arc<dyn DataRepository>,
    raw_data: Arc<dyn RawDataClient>,
    factory: Arc<dyn DeduplicatorFactory>,
    services: Arc<dyn PipelineServices>,
    pipeline_config: IngestionConfig,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        raw_data: Arc<dyn RawDataClient>,
        factory: Arc<dyn DeduplicatorFactory>,
        config: &AppConfig,
    ) -> Self {
        let services = Arc::new(DefaultPipelineServices::new(Arc::clone(&db)));
        let repository: Arc<dyn DataRepository> = Arc::<SurrealDbClient>::clone(&db);
        Self::with_services(
            db,
            repository,
            raw_data,
            factory,
            services,
            IngestionConfig::from_app_config(config),
        )
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        repository: Arc<dyn DataRepository>,
        raw_data: Arc<dyn RawDataClient>,
        factory: Arc<dyn DeduplicatorFactory>,
        services: Arc<dyn PipelineServices>,
        pipeline_config: IngestionConfig,
    ) -> Self {
        Self {
            db,
            repository,
            raw_data,
            factory,
            services,
            pipeline_config,
        }
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.pipeline_config
    }

    /// Runs one reserved work item to an outcome and records it on the queue.
    ///
    /// Errors returned here are queue bookkeeping failures only; processing
    /// failures are reported through `WorkOutcome`.
    #[tracing::instrument(
        skip_all,
        fields(
            work_item_id = %item.id,
            attempt = item.failing_retry_count.saturating_add(1),
            worker_id = item.worker_id.as_deref().unwrap_or("unknown-worker"),
            dataset_id = item.metadata.data_set_id.as_deref().unwrap_or("")
        )
    )]
    pub async fn process_item(
        &self,
        item: WorkItem,
        cancel: &CancellationToken,
    ) -> Result<WorkOutcome, AppError> {
        let item = item.mark_processing(&self.db).await?;

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ProcessingError::Cancelled),
            result = self.drive_pipeline(&item) => result,
        };

        match result {
            Ok(stats) => {
                item.complete(&self.db).await?;
                info!(
                    work_item_id = %item.id,
                    records = stats.records_processed,
                    data_written = stats.data_written,
                    "work item completed"
                );
                Ok(WorkOutcome::Completed(stats))
            }
            Err(ProcessingError::Cancelled) => {
                item.release(&self.db).await?;
                info!(work_item_id = %item.id, "work item released after cancellation");
                Ok(WorkOutcome::Released)
            }
            Err(err) => self.record_failure(&item, &err).await,
        }
    }

    async fn record_failure(
        &self,
        item: &WorkItem,
        err: &ProcessingError,
    ) -> Result<WorkOutcome, AppError> {
        let reason = err.to_string();
        let error_info = WorkErrorInfo {
            code: Some(err.code().to_string()),
            message: reason.clone(),
        };

        if err.is_retryable() && item.can_retry() {
            let retry_at = self
                .pipeline_config
                .tuning
                .retry
                .next_retry_at(Utc::now(), item.failing_retry_count);
            let failed = item.mark_failed(error_info, retry_at, &self.db).await?;
            warn!(
                work_item_id = %failed.id,
                failing_retry_count = failed.failing_retry_count,
                retry_at = %retry_at,
                error = %reason,
                "work item failed; scheduled retry"
            );
            Ok(WorkOutcome::Requeued {
                retry_at,
                failing_retry_count: failed.failing_retry_count,
            })
        } else {
            let failed = item.fail_permanently(error_info, &self.db).await?;
            warn!(
                work_item_id = %failed.id,
                failing_retry_count = failed.failing_retry_count,
                error = %reason,
                "work item failed permanently; moved to dead letter"
            );
            Ok(WorkOutcome::Failed {
                code: err.code().to_string(),
                reason,
            })
        }
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    async fn drive_pipeline(&self, item: &WorkItem) -> Result<ProcessingStats, ProcessingError> {
        let mut ctx = PipelineContext::new(
            item,
            self.repository.as_ref(),
            self.raw_data.as_ref(),
            self.factory.as_ref(),
            &self.services,
            &self.pipeline_config,
        );

        let machine = ready();
        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let machine = resolve_dataset(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = resolve_strategy(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let resolve_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = collect_records(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let collect_duration = stage_start.elapsed();

        // An interrupted close still has to finish even when every record
        // was already processed by the failed attempt.
        let close_pending = ctx
            .dataset()?
            .progress_for(SequenceOperation::Close)
            .is_some();
        if ctx.records.is_empty() && !close_pending {
            let _machine = skip(machine).map_err(|err| ctx.abort(err))?;
            debug!(
                work_item_id = %ctx.item_id,
                "no unprocessed raw records; nothing to do"
            );
            return Ok(ctx.stats);
        }

        let stage_start = Instant::now();
        let machine = process_records(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let process_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let _machine = finalize(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let finalize_duration = stage_start.elapsed();

        info!(
            work_item_id = %ctx.item_id,
            attempt = ctx.attempt,
            total_ms = Self::duration_millis(pipeline_started.elapsed()),
            resolve_ms = Self::duration_millis(resolve_duration),
            collect_ms = Self::duration_millis(collect_duration),
            process_ms = Self::duration_millis(process_duration),
            finalize_ms = Self::duration_millis(finalize_duration),
            records = ctx.stats.records_processed,
            skipped_records = ctx.stats.records_skipped,
            rejected_readings = ctx.stats.readings_rejected,
            data_written = ctx.stats.data_written,
            "ingestion pipeline finished"
        );

        Ok(ctx.stats)
    }
}
