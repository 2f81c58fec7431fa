use std::collections::BTreeSet;

use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        raw_data::RawDataClient,
        repository::DataRepository,
        types::{
            dataset::{Dataset, DatasetKind},
            deduplicator_descriptor::DeduplicatorDescriptor,
            raw_record::RawRecord,
            summary_request::SummaryReason,
            work_item::WorkItem,
        },
    },
};
use deduplicator::{resolve_and_register, DeduplicatorFactory, StrategyKind};
use tracing::{info, warn};

use crate::pipeline::{IngestionConfig, PipelineServices, ProcessingError};

/// An upload session request.
#[derive(Debug, Clone)]
pub struct DatasetUpload {
    pub user_id: String,
    pub device_id: Option<String>,
    pub device_manufacturers: Vec<String>,
    pub kind: DatasetKind,
    /// Name of a strategy to bind instead of selecting one by manufacturer.
    pub requested_strategy: Option<String>,
}

/// Creates the dataset and binds it to its deduplication strategy.
pub async fn open_dataset(
    repository: &dyn DataRepository,
    factory: &dyn DeduplicatorFactory,
    upload: DatasetUpload,
) -> Result<Dataset, ProcessingError> {
    if let Some(requested) = upload.requested_strategy.as_deref() {
        if StrategyKind::from_name(requested).is_none() {
            return Err(AppError::Validation(format!("unknown strategy {requested}")).into());
        }
    }

    let mut dataset = Dataset::new(
        upload.user_id,
        upload.device_id,
        upload.device_manufacturers,
        upload.kind,
    );
    if let Some(requested) = upload.requested_strategy.as_deref() {
        dataset.deduplicator = Some(DeduplicatorDescriptor::requesting(requested));
    }

    let deduplicator = resolve_and_register(factory, repository, &mut dataset).await?;
    info!(
        dataset_id = %dataset.id,
        user_id = %dataset.user_id,
        strategy = deduplicator.name(),
        "dataset opened"
    );
    Ok(dataset)
}

/// Removes a dataset with its data and raw uploads.
///
/// The strategy's delete sequence runs first and is resumable, so a failed
/// call can be repeated.
pub async fn delete_dataset(
    repository: &dyn DataRepository,
    raw_data: &dyn RawDataClient,
    factory: &dyn DeduplicatorFactory,
    services: &dyn PipelineServices,
    dataset_id: &str,
) -> Result<(), ProcessingError> {
    let mut dataset = repository
        .get_dataset(dataset_id)
        .await?
        .ok_or_else(|| ProcessingError::DatasetNotFound(dataset_id.to_string()))?;

    let deduplicator = factory.resolve_registered(&dataset)?;
    deduplicator.delete(repository, &mut dataset).await?;
    raw_data
        .delete_for_dataset(&dataset.user_id, &dataset.id)
        .await?;
    repository.delete_dataset(&dataset).await?;

    info!(
        dataset_id = %dataset.id,
        strategy = deduplicator.name(),
        "dataset deleted"
    );

    let reasons = BTreeSet::from([SummaryReason::DatasetDeleted]);
    if let Err(err) = services
        .maybe_update_summary(&dataset.user_id, reasons)
        .await
    {
        warn!(user_id = %dataset.user_id, error = %err, "summary update failed");
    }
    Ok(())
}

/// Queues processing for the dataset; duplicate pending requests collapse
/// into the existing item.
pub async fn enqueue_processing(
    db: &SurrealDbClient,
    dataset: &Dataset,
    raw_id: Option<&str>,
    config: &IngestionConfig,
) -> Result<WorkItem, AppError> {
    WorkItem::for_dataset(&dataset.id, raw_id)
        .with_processing_timeout(config.tuning.processing_timeout)
        .with_max_failing_retries(config.tuning.max_failing_retries)
        .enqueue(db)
        .await
}

/// Stores an uploaded payload and queues it.
///
/// Continuous datasets process each upload on its own; normal datasets pick
/// up every pending upload in one run.
pub async fn submit_raw_content(
    db: &SurrealDbClient,
    raw_data: &dyn RawDataClient,
    dataset: &Dataset,
    content: Bytes,
    config: &IngestionConfig,
) -> Result<(RawRecord, WorkItem), AppError> {
    let record = raw_data
        .create(&dataset.user_id, &dataset.id, content)
        .await?;
    let raw_id = dataset.is_continuous().then_some(record.id.as_str());
    let item = enqueue_processing(db, dataset, raw_id, config).await?;
    Ok((record, item))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::{
        raw_data::StoredRawDataClient, store::PayloadStore, types::dataset::DatasetState,
    };
    use deduplicator::{DeduplicatorConfig, DelegateFactory};
    use std::sync::Arc;
    use uuid::Uuid;

    use crate::pipeline::DefaultPipelineServices;

    async fn setup_db() -> Arc<SurrealDbClient> {
        let db = SurrealDbClient::memory("datasets_test", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to create in-memory SurrealDB");
        Arc::new(db)
    }

    fn factory() -> DelegateFactory {
        DelegateFactory::with_default_strategies(DeduplicatorConfig::default())
    }

    fn upload(manufacturer: &str, kind: DatasetKind) -> DatasetUpload {
        DatasetUpload {
            user_id: "user-1".to_string(),
            device_id: Some("device-1".to_string()),
            device_manufacturers: vec![manufacturer.to_string()],
            kind,
            requested_strategy: None,
        }
    }

    #[tokio::test]
    async fn open_dataset_binds_strategy_by_manufacturer() {
        let db = setup_db().await;

        let dataset = open_dataset(db.as_ref(), &factory(), upload("Dexcom", DatasetKind::Normal))
            .await
            .expect("open");

        assert_eq!(dataset.bound_strategy(), Some("hash-drop"));
        assert_eq!(dataset.state, DatasetState::Open);
        let stored = db
            .get_dataset(&dataset.id)
            .await
            .expect("get")
            .expect("persisted");
        assert_eq!(stored.bound_strategy(), Some("hash-drop"));
    }

    #[tokio::test]
    async fn open_dataset_honours_requested_strategy() {
        let db = setup_db().await;
        let mut request = upload("Acme", DatasetKind::Continuous);
        request.requested_strategy = Some("continuous-origin".to_string());

        let dataset = open_dataset(db.as_ref(), &factory(), request)
            .await
            .expect("open");
        assert_eq!(dataset.bound_strategy(), Some("continuous-origin"));
    }

    #[tokio::test]
    async fn open_dataset_rejects_unknown_requested_strategy() {
        let db = setup_db().await;
        let mut request = upload("Dexcom", DatasetKind::Normal);
        request.requested_strategy = Some("newest-wins".to_string());

        let result = open_dataset(db.as_ref(), &factory(), request).await;
        assert!(matches!(
            result,
            Err(ProcessingError::Store(AppError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn open_dataset_without_matching_strategy_fails() {
        let db = setup_db().await;

        let result = open_dataset(db.as_ref(), &factory(), upload("Acme", DatasetKind::Normal)).await;
        assert!(matches!(result, Err(ProcessingError::Deduplicator(_))));
    }

    #[tokio::test]
    async fn enqueue_collapses_duplicate_requests() {
        let db = setup_db().await;
        let dataset = open_dataset(db.as_ref(), &factory(), upload("Dexcom", DatasetKind::Normal))
            .await
            .expect("open");
        let config = IngestionConfig::default();

        let first = enqueue_processing(&db, &dataset, None, &config)
            .await
            .expect("enqueue");
        let second = enqueue_processing(&db, &dataset, None, &config)
            .await
            .expect("enqueue");

        assert_eq!(first.id, second.id);
        assert_eq!(first.serial_key.as_deref(), Some(dataset.id.as_str()));
        assert_eq!(first.group_key.as_deref(), Some(dataset.id.as_str()));
        assert_eq!(
            first.metadata.data_set_id.as_deref(),
            Some(dataset.id.as_str())
        );
    }

    #[tokio::test]
    async fn submit_to_continuous_dataset_names_the_raw_record() {
        let db = setup_db().await;
        let raw_data = StoredRawDataClient::new(Arc::clone(&db), PayloadStore::in_memory());
        let dataset = open_dataset(
            db.as_ref(),
            &factory(),
            upload("Dexcom", DatasetKind::Continuous),
        )
        .await
        .expect("open");

        let (record, item) = submit_raw_content(
            &db,
            &raw_data,
            &dataset,
            Bytes::from_static(b"[]"),
            &IngestionConfig::default(),
        )
        .await
        .expect("submit");

        assert_eq!(item.metadata.raw_id.as_deref(), Some(record.id.as_str()));
    }

    #[tokio::test]
    async fn delete_dataset_removes_data_raw_records_and_dataset() {
        let db = setup_db().await;
        let raw_data = StoredRawDataClient::new(Arc::clone(&db), PayloadStore::in_memory());
        let services = DefaultPipelineServices::new(Arc::clone(&db));
        let dataset = open_dataset(db.as_ref(), &factory(), upload("Dexcom", DatasetKind::Normal))
            .await
            .expect("open");
        let (record, _) = submit_raw_content(
            &db,
            &raw_data,
            &dataset,
            Bytes::from_static(b"[]"),
            &IngestionConfig::default(),
        )
        .await
        .expect("submit");

        delete_dataset(db.as_ref(), &raw_data, &factory(), &services, &dataset.id)
            .await
            .expect("delete");

        assert!(db.get_dataset(&dataset.id).await.expect("get").is_none());
        assert!(raw_data.get(&record.id, None).await.expect("get").is_none());
        let summary: Option<common::storage::types::summary_request::SummaryRequest> =
            db.get_item("user-1").await.expect("summary");
        assert!(summary
            .expect("summary requested")
            .reasons
            .contains(&SummaryReason::DatasetDeleted));
    }

    #[tokio::test]
    async fn delete_missing_dataset_is_not_found() {
        let db = setup_db().await;
        let raw_data = StoredRawDataClient::new(Arc::clone(&db), PayloadStore::in_memory());
        let services = DefaultPipelineServices::new(Arc::clone(&db));

        let result = delete_dataset(db.as_ref(), &raw_data, &factory(), &services, "missing").await;
        assert!(matches!(result, Err(ProcessingError::DatasetNotFound(_))));
    }
}
