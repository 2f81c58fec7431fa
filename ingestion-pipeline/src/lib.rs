#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod datasets;
pub mod parser;
pub mod pipeline;

use chrono::Utc;
use common::{error::AppError, storage::db::SurrealDbClient, storage::types::work_item::WorkItem};
pub use pipeline::{IngestionConfig, IngestionPipeline, IngestionTuning, WorkOutcome};
use std::sync::Arc;
use tokio::{
    task::JoinSet,
    time::{sleep, Duration},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const CLAIM_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Claims and processes work items until `cancel` fires.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    ingestion_pipeline: Arc<IngestionPipeline>,
    idle_backoff: Duration,
    cancel: CancellationToken,
) -> Result<(), AppError> {
    let worker_id = format!("ingestion-worker-{}", Uuid::new_v4());
    info!(%worker_id, "ingestion worker started");

    while !cancel.is_cancelled() {
        let backoff = match WorkItem::claim_next_ready(&db, &worker_id, Utc::now()).await {
            Ok(Some(item)) => {
                let item_id = item.id.clone();
                debug!(
                    %worker_id,
                    work_item_id = %item_id,
                    failing_retry_count = item.failing_retry_count,
                    "claimed work item"
                );
                match ingestion_pipeline.process_item(item, &cancel).await {
                    Ok(outcome) => {
                        debug!(%worker_id, work_item_id = %item_id, ?outcome, "work item handled");
                    }
                    Err(err) => {
                        error!(%worker_id, work_item_id = %item_id, error = %err, "work item bookkeeping failed");
                    }
                }
                continue;
            }
            Ok(None) => idle_backoff,
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim work item");
                warn!("Backing off for 1s after claim error");
                CLAIM_ERROR_BACKOFF
            }
        };

        tokio::select! {
            () = cancel.cancelled() => break,
            () = sleep(backoff) => {}
        }
    }

    info!(%worker_id, "ingestion worker stopped");
    Ok(())
}

/// Runs `concurrency` worker loops sharing one pipeline.
pub async fn run_worker_pool(
    db: Arc<SurrealDbClient>,
    ingestion_pipeline: Arc<IngestionPipeline>,
    concurrency: usize,
    idle_backoff: Duration,
    cancel: CancellationToken,
) -> Result<(), AppError> {
    let mut workers = JoinSet::new();
    for _ in 0..concurrency.max(1) {
        workers.spawn(run_worker_loop(
            Arc::clone(&db),
            Arc::clone(&ingestion_pipeline),
            idle_backoff,
            cancel.clone(),
        ));
    }

    while let Some(joined) = workers.join_next().await {
        joined??;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{IngestionConfig, PipelineServices};
    use common::storage::{
        raw_data::StoredRawDataClient, repository::DataRepository, store::PayloadStore,
    };
    use deduplicator::{DeduplicatorConfig, DelegateFactory};

    #[tokio::test]
    async fn worker_pool_stops_on_cancellation() {
        let db = Arc::new(
            SurrealDbClient::memory("worker_test", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to create in-memory SurrealDB"),
        );
        let raw_data = Arc::new(StoredRawDataClient::new(
            Arc::clone(&db),
            PayloadStore::in_memory(),
        ));
        let repository: Arc<dyn DataRepository> = Arc::<SurrealDbClient>::clone(&db);
        let services: Arc<dyn PipelineServices> =
            Arc::new(pipeline::DefaultPipelineServices::new(Arc::clone(&db)));
        let pipeline = Arc::new(IngestionPipeline::with_services(
            Arc::clone(&db),
            repository,
            raw_data,
            Arc::new(DelegateFactory::with_default_strategies(
                DeduplicatorConfig::default(),
            )),
            services,
            IngestionConfig::default(),
        ));

        let cancel = CancellationToken::new();
        let pool = tokio::spawn(run_worker_pool(
            db,
            pipeline,
            2,
            Duration::from_millis(10),
            cancel.clone(),
        ));
        sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), pool)
            .await
            .expect("pool stopped")
            .expect("pool task joined");
        assert!(result.is_ok());
    }
}
