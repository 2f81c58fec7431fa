use std::collections::HashSet;

use async_trait::async_trait;
use common::storage::{
    repository::DataRepository,
    types::{dataset::Dataset, datum::Datum},
};
use tracing::debug;

use super::{
    base::{BaseDeduplicator, DEFAULT_CLOSE_STEPS, DEFAULT_DELETE_STEPS},
    Deduplicator, StrategyKind,
};
use crate::{error::DeduplicatorError, hasher::IdentityHasher};

/// Drops incoming readings whose hash the device already has.
#[derive(Debug, Clone)]
pub struct HashDropDeduplicator {
    base: BaseDeduplicator,
    hasher: IdentityHasher,
}

impl HashDropDeduplicator {
    pub fn new(hasher: IdentityHasher) -> Self {
        Self {
            base: BaseDeduplicator::new(StrategyKind::HashDrop),
            hasher,
        }
    }
}

#[async_trait]
impl Deduplicator for HashDropDeduplicator {
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

        let received = data.len();
        let hashes = self.hasher.assign_identity_hashes(&mut data)?;
        let existing = repo.find_device_data_hashes(dataset, &hashes).await?;

        // Repeats inside the batch count as duplicates too.
        let mut seen = HashSet::with_capacity(received);
        let unique: Vec<Datum> = data
            .into_iter()
            .zip(hashes)
            .filter_map(|(datum, hash)| {
                (!existing.contains(&hash) && seen.insert(hash)).then_some(datum)
            })
            .collect();

        debug!(
            dataset_id = %dataset.id,
            received,
            dropped = received.saturating_sub(unique.len()),
            "dropped duplicate device data"
        );
        self.base.add_data(repo, dataset, unique).await
    }

    async fn close(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
    ) -> Result<(), DeduplicatorError> {
        self.base.close(repo, dataset, DEFAULT_CLOSE_STEPS).await
    }

    async fn delete(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
    ) -> Result<(), DeduplicatorError> {
        self.base.delete(repo, dataset, DEFAULT_DELETE_STEPS).await
    }
}
