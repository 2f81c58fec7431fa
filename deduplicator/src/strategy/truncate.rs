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

const CLOSE_STEPS: &[Step] = &[Step::ActivateData, Step::DeleteOtherData];

/// Single writer per dataset: closing keeps only what the latest sequence activated.
///
/// Scoped strictly to the dataset id, never the device.
#[derive(Debug, Clone)]
pub struct TruncateDeduplicator {
    base: BaseDeduplicator,
}

impl TruncateDeduplicator {
    pub fn new() -> Self {
        Self {
            base: BaseDeduplicator::new(StrategyKind::Truncate),
        }
    }
}

impl Default for TruncateDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Deduplicator for TruncateDeduplicator {
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
