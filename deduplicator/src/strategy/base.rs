use chrono::Utc;
use common::storage::{
    repository::DataRepository,
    types::{
        dataset::{Dataset, DatasetState, SequenceOperation},
        datum::Datum,
        deduplicator_descriptor::DeduplicatorDescriptor,
    },
};
use tracing::{debug, info};

use super::{sequence::Step, StrategyKind, STRATEGY_VERSION};
use crate::error::DeduplicatorError;

pub const DEFAULT_CLOSE_STEPS: &[Step] = &[Step::ActivateData];
pub const DEFAULT_DELETE_STEPS: &[Step] = &[Step::DeleteData];

/// Shared lifecycle every concrete strategy composes.
#[derive(Debug, Clone)]
pub struct BaseDeduplicator {
    kind: StrategyKind,
}

impl BaseDeduplicator {
    pub fn new(kind: StrategyKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub async fn register(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
    ) -> Result<(), DeduplicatorError> {
        validate_identifiers(dataset)?;

        if let Some(bound) = dataset.bound_strategy() {
            if bound != self.kind.name() {
                return Err(DeduplicatorError::AlreadyRegistered {
                    dataset_id: dataset.id.clone(),
                    strategy: bound.to_string(),
                });
            }
        }

        dataset.deduplicator = Some(DeduplicatorDescriptor::for_strategy(
            self.kind.name(),
            STRATEGY_VERSION,
        ));
        *dataset = repo.update_dataset(dataset).await?;

        info!(
            dataset_id = %dataset.id,
            strategy = self.kind.name(),
            "dataset registered with deduplicator"
        );
        Ok(())
    }

    pub async fn add_data(
        &self,
        repo: &dyn DataRepository,
        dataset: &Dataset,
        data: Vec<Datum>,
    ) -> Result<usize, DeduplicatorError> {
        if data.is_empty() {
            return Ok(0);
        }

        let written = repo.create_dataset_data(&data).await?;
        debug!(
            dataset_id = %dataset.id,
            strategy = self.kind.name(),
            written,
            "persisted dataset data"
        );
        Ok(written)
    }

    /// Runs the close steps, then marks the dataset closed.
    pub async fn close(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
        steps: &[Step],
    ) -> Result<(), DeduplicatorError> {
        self.run_sequence(repo, dataset, SequenceOperation::Close, steps)
            .await?;

        dataset.state = DatasetState::Closed;
        *dataset = repo.update_dataset(dataset).await?;
        Ok(())
    }

    pub async fn delete(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
        steps: &[Step],
    ) -> Result<(), DeduplicatorError> {
        self.run_sequence(repo, dataset, SequenceOperation::Delete, steps)
            .await?;

        *dataset = repo.update_dataset(dataset).await?;
        Ok(())
    }

    /// Executes `steps` in order, persisting the cursor after each one.
    ///
    /// Progress left by an interrupted run of the same operation and strategy
    /// is resumed, keeping its original start time. On success the cursor is
    /// cleared in memory; callers persist the final dataset.
    async fn run_sequence(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
        operation: SequenceOperation,
        steps: &[Step],
    ) -> Result<(), DeduplicatorError> {
        let resumed = dataset
            .progress_for(operation)
            .filter(|progress| progress.strategy == self.kind.name())
            .map(|progress| (progress.completed_steps, progress.started_at));

        let (first_step, started_at) = if let Some((completed, started_at)) = resumed {
            info!(
                dataset_id = %dataset.id,
                strategy = self.kind.name(),
                ?operation,
                completed_steps = completed,
                "resuming interrupted deduplicator sequence"
            );
            (completed.min(steps.len()), started_at)
        } else {
            let started_at = Utc::now();
            dataset.start_progress(operation, self.kind.name(), started_at);
            *dataset = repo.update_dataset(dataset).await?;
            (0, started_at)
        };

        for (index, step) in steps.iter().enumerate().skip(first_step) {
            let affected = step.run(repo, dataset, started_at).await?;
            debug!(
                dataset_id = %dataset.id,
                strategy = self.kind.name(),
                step = step.as_str(),
                affected,
                "deduplicator step completed"
            );

            if let Some(progress) = dataset.progress.as_mut() {
                progress.completed_steps = index.saturating_add(1);
            }
            *dataset = repo.update_dataset(dataset).await?;
        }

        dataset.progress = None;
        Ok(())
    }
}

fn validate_identifiers(dataset: &Dataset) -> Result<(), DeduplicatorError> {
    if dataset.id.is_empty() {
        return Err(DeduplicatorError::InvalidDataset(
            "dataset id is missing".to_string(),
        ));
    }
    if dataset.user_id.is_empty() {
        return Err(DeduplicatorError::InvalidDataset(format!(
            "dataset {} has no user id",
            dataset.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::{active_count, dataset, memory_db, reading};
    use common::storage::types::dataset::{DatasetKind, SequenceProgress};

    #[tokio::test]
    async fn test_register_stamps_and_persists_descriptor() {
        let db = memory_db().await;
        let base = BaseDeduplicator::new(StrategyKind::Truncate);
        let mut ds = dataset("Medtronic", DatasetKind::Normal);

        base.register(&db, &mut ds).await.expect("register");

        let stored = db
            .get_dataset(&ds.id)
            .await
            .expect("get")
            .expect("persisted");
        let descriptor = stored.deduplicator.expect("descriptor");
        assert_eq!(descriptor.name.as_deref(), Some("truncate"));
        assert_eq!(descriptor.version.as_deref(), Some(STRATEGY_VERSION));
    }

    #[tokio::test]
    async fn test_register_refuses_a_different_binding() {
        let db = memory_db().await;
        let mut ds = dataset("Medtronic", DatasetKind::Normal);
        ds.deduplicator = Some(DeduplicatorDescriptor::for_strategy(
            "hash-drop",
            STRATEGY_VERSION,
        ));

        let result = BaseDeduplicator::new(StrategyKind::Truncate)
            .register(&db, &mut ds)
            .await;
        assert!(matches!(
            result,
            Err(DeduplicatorError::AlreadyRegistered { ref strategy, .. }) if strategy == "hash-drop"
        ));
    }

    #[tokio::test]
    async fn test_register_requires_user() {
        let db = memory_db().await;
        let mut ds = dataset("Medtronic", DatasetKind::Normal);
        ds.user_id = String::new();

        let result = BaseDeduplicator::new(StrategyKind::Truncate)
            .register(&db, &mut ds)
            .await;
        assert!(matches!(result, Err(DeduplicatorError::InvalidDataset(_))));
    }

    #[tokio::test]
    async fn test_add_empty_batch_leaves_store_untouched() {
        let db = memory_db().await;
        let ds = dataset("Medtronic", DatasetKind::Normal);

        let written = BaseDeduplicator::new(StrategyKind::Truncate)
            .add_data(&db, &ds, Vec::new())
            .await
            .expect("add");
        assert_eq!(written, 0);
        assert!(db.list_dataset_data(&ds.id).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_close_activates_and_closes() {
        let db = memory_db().await;
        let base = BaseDeduplicator::new(StrategyKind::Truncate);
        let mut ds = dataset("Medtronic", DatasetKind::Normal);
        base.register(&db, &mut ds).await.expect("register");
        base.add_data(&db, &ds, vec![reading(&ds, 0, 100.0), reading(&ds, 5, 110.0)])
            .await
            .expect("add");

        base.close(&db, &mut ds, DEFAULT_CLOSE_STEPS)
            .await
            .expect("close");

        assert_eq!(ds.state, DatasetState::Closed);
        assert!(ds.progress.is_none());
        let stored = db
            .get_dataset(&ds.id)
            .await
            .expect("get")
            .expect("persisted");
        assert_eq!(stored.state, DatasetState::Closed);
        assert!(stored.progress.is_none());
        let data = db.list_dataset_data(&ds.id).await.expect("list");
        assert_eq!(active_count(&data), 2);
    }

    #[tokio::test]
    async fn test_interrupted_sequence_resumes_after_completed_steps() {
        let db = memory_db().await;
        let base = BaseDeduplicator::new(StrategyKind::Truncate);
        let mut ds = dataset("Medtronic", DatasetKind::Normal);
        base.register(&db, &mut ds).await.expect("register");
        base.add_data(&db, &ds, vec![reading(&ds, 0, 100.0)])
            .await
            .expect("add");

        let started_at = Utc::now();
        ds.progress = Some(SequenceProgress {
            operation: SequenceOperation::Close,
            strategy: "truncate".to_string(),
            completed_steps: 1,
            started_at,
        });

        // The first step would wipe the data if it ran again.
        base.close(&db, &mut ds, &[Step::DeleteData, Step::ActivateData])
            .await
            .expect("close");

        let data = db.list_dataset_data(&ds.id).await.expect("list");
        assert_eq!(data.len(), 1);
        assert_eq!(active_count(&data), 1);
    }

    #[tokio::test]
    async fn test_progress_of_another_strategy_is_not_resumed() {
        let db = memory_db().await;
        let base = BaseDeduplicator::new(StrategyKind::Truncate);
        let mut ds = dataset("Medtronic", DatasetKind::Normal);
        base.register(&db, &mut ds).await.expect("register");
        base.add_data(&db, &ds, vec![reading(&ds, 0, 100.0)])
            .await
            .expect("add");
        ds.progress = Some(SequenceProgress {
            operation: SequenceOperation::Close,
            strategy: "hash-archive".to_string(),
            completed_steps: 1,
            started_at: Utc::now(),
        });

        base.close(&db, &mut ds, &[Step::ActivateData])
            .await
            .expect("close");

        let data = db.list_dataset_data(&ds.id).await.expect("list");
        assert_eq!(active_count(&data), 1);
    }
}
