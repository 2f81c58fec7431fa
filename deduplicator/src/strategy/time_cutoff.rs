use async_trait::async_trait;
use common::storage::{
    repository::DataRepository,
    types::{dataset::Dataset, datum::Datum},
};

use super::{
    base::{BaseDeduplicator, DEFAULT_DELETE_STEPS},
    sequence::Step,
    Deduplicator, StrategyKind,
};
use crate::error::DeduplicatorError;

const CLOSE_STEPS: &[Step] = &[Step::ActivateData, Step::ArchiveDeviceDataFromEarliestTime];

/// Newest upload wins from its earliest reading onward.
///
/// For devices that re-send their whole memory, everything another dataset
/// holds for the same device at or after the new dataset's first reading is
/// archived once the new dataset closes.
#[derive(Debug, Clone)]
pub struct TimeCutoffDeduplicator {
    base: BaseDeduplicator,
}

impl TimeCutoffDeduplicator {
    pub fn new() -> Self {
        Self {
            base: BaseDeduplicator::new(StrategyKind::TimeCutoff),
        }
    }
}

impl Default for TimeCutoffDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Deduplicator for TimeCutoffDeduplicator {
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
        data: Vec<Datum>,
    ) -> Result<usize, DeduplicatorError> {
        self.base.add_data(repo, dataset, data).await
    }

    async fn close(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
    ) -> Result<(), DeduplicatorError> {
        self.base.close(repo, dataset, CLOSE_STEPS).await
    }

    async fn delete(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
    ) -> Result<(), DeduplicatorError> {
        self.base.delete(repo, dataset, DEFAULT_DELETE_STEPS).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::{active_count, at_minute, dataset, memory_db, reading};
    use common::storage::types::dataset::DatasetKind;

    #[tokio::test]
    async fn test_close_archives_other_data_from_earliest_time() {
        let db = memory_db().await;
        let strategy = TimeCutoffDeduplicator::new();

        let mut older = dataset("Bayer", DatasetKind::Normal);
        strategy.register(&db, &mut older).await.expect("register");
        strategy
            .add_data(
                &db,
                &older,
                vec![
                    reading(&older, 0, 100.0),
                    reading(&older, 10, 110.0),
                    reading(&older, 20, 120.0),
                ],
            )
            .await
            .expect("add older");
        strategy.close(&db, &mut older).await.expect("close older");

        let mut newer = dataset("Bayer", DatasetKind::Normal);
        strategy.register(&db, &mut newer).await.expect("register");
        strategy
            .add_data(
                &db,
                &newer,
                vec![reading(&newer, 10, 110.0), reading(&newer, 30, 130.0)],
            )
            .await
            .expect("add newer");
        strategy.close(&db, &mut newer).await.expect("close newer");

        let older_data = db.list_dataset_data(&older.id).await.expect("list");
        let cutoff = at_minute(10);
        assert!(older_data
            .iter()
            .filter(|datum| datum.device_time >= cutoff)
            .all(|datum| !datum.active));
        assert_eq!(active_count(&older_data), 1);

        let newer_data = db.list_dataset_data(&newer.id).await.expect("list");
        assert_eq!(active_count(&newer_data), 2);
    }

    #[tokio::test]
    async fn test_close_without_data_only_closes() {
        let db = memory_db().await;
        let strategy = TimeCutoffDeduplicator::new();
        let mut ds = dataset("Arkray", DatasetKind::Normal);
        strategy.register(&db, &mut ds).await.expect("register");

        strategy.close(&db, &mut ds).await.expect("close");
        assert!(db.list_dataset_data(&ds.id).await.expect("list").is_empty());
    }
}
