use async_trait::async_trait;
use common::storage::{
    repository::DataRepository,
    types::{dataset::Dataset, datum::Datum},
};
use tracing::debug;

use super::{base::BaseDeduplicator, sequence::Step, Deduplicator, StrategyKind};
use crate::{error::DeduplicatorError, hasher::IdentityHasher};

const CLOSE_STEPS: &[Step] = &[Step::ArchiveDeviceDataUsingHashes, Step::ActivateData];
const DELETE_STEPS: &[Step] = &[Step::UnarchiveDeviceDataUsingHashes, Step::DeleteData];

/// Archives older copies of identical readings on the same device.
#[derive(Debug, Clone)]
pub struct HashArchiveDeduplicator {
    base: BaseDeduplicator,
    hasher: IdentityHasher,
}

impl HashArchiveDeduplicator {
    pub fn new(hasher: IdentityHasher) -> Self {
        Self {
            base: BaseDeduplicator::new(StrategyKind::HashArchive),
            hasher,
        }
    }
}

#[async_trait]
impl Deduplicator for HashArchiveDeduplicator {
    fn kind(&self) -> StrategyKind {
        self.base.kind()
    }

    async fn register(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
    ) -> Result<(), DeduplicatorError> {
        self.base.register(repo, dataset).await
    }

    async fn add_data(
        &self,
        repo: &dyn DataRepository,
        dataset: &Dataset,
        mut data: Vec<Datum>,
    ) -> Result<usize, DeduplicatorError> {
        if data.is_empty() {
            return Ok(0);
        }

        let hashes = self.hasher.assign_identity_hashes(&mut data)?;
        debug!(
            dataset_id = %dataset.id,
            hashed = hashes.len(),
            "assigned identity hashes"
        );
        self.base.add_data(repo, dataset, data).await
    }

    async fn close(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
    ) -> Result<(), DeduplicatorError> {
        self.base.close(repo, dataset, CLOSE_STEPS).await
    }

    /// Restores what this dataset archived before removing its own data.
    async fn delete(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
    ) -> Result<(), DeduplicatorError> {
        self.base.delete(repo, dataset, DELETE_STEPS).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::{active_count, dataset, memory_db, reading};
    use common::storage::types::dataset::DatasetKind;

    #[tokio::test]
    async fn test_close_archives_duplicates_and_delete_restores_them() {
        let db = memory_db().await;
        let strategy = HashArchiveDeduplicator::new(IdentityHasher::default());

        let mut older = dataset("Abbott", DatasetKind::Normal);
        strategy.register(&db, &mut older).await.expect("register");
        strategy
            .add_data(
                &db,
                &older,
                vec![reading(&older, 0, 100.0), reading(&older, 5, 105.0)],
            )
            .await
            .expect("add older");
        strategy.close(&db, &mut older).await.expect("close older");

        let mut newer = dataset("Abbott", DatasetKind::Normal);
        strategy.register(&db, &mut newer).await.expect("register");
        strategy
            .add_data(
                &db,
                &newer,
                vec![reading(&newer, 5, 105.0), reading(&newer, 10, 110.0)],
            )
            .await
            .expect("add newer");
        strategy.close(&db, &mut newer).await.expect("close newer");

        let older_data = db.list_dataset_data(&older.id).await.expect("list");
        assert_eq!(active_count(&older_data), 1);
        let archived = older_data
            .iter()
            .find(|datum| !datum.active)
            .expect("duplicate archived");
        assert_eq!(archived.archived_dataset_id.as_deref(), Some(newer.id.as_str()));

        let newer_data = db.list_dataset_data(&newer.id).await.expect("list");
        assert_eq!(active_count(&newer_data), 2);
        assert!(newer_data.iter().all(|datum| datum.identity_hash().is_some()));

        strategy.delete(&db, &mut newer).await.expect("delete newer");

        assert!(db.list_dataset_data(&newer.id).await.expect("list").is_empty());
        let older_data = db.list_dataset_data(&older.id).await.expect("list");
        assert_eq!(active_count(&older_data), 2);
    }

    #[tokio::test]
    async fn test_add_rejects_data_without_identity() {
        let db = memory_db().await;
        let strategy = HashArchiveDeduplicator::new(IdentityHasher::default());
        let ds = dataset("Roche", DatasetKind::Normal);
        let mut datum = reading(&ds, 0, 100.0);
        datum.device_id = None;

        let result = strategy.add_data(&db, &ds, vec![datum]).await;
        assert!(matches!(result, Err(DeduplicatorError::InvalidDatum(_))));
        assert!(db.list_dataset_data(&ds.id).await.expect("list").is_empty());
    }
}
