use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use common::storage::{
    repository::DataRepository,
    types::{dataset::Dataset, datum::Datum},
};
use tracing::debug;

use super::{base::BaseDeduplicator, Deduplicator, StrategyKind};
use crate::error::DeduplicatorError;

/// Streams data straight to visible; nothing is deferred to close.
#[derive(Debug, Clone)]
pub struct ContinuousDeduplicator {
    base: BaseDeduplicator,
}

impl ContinuousDeduplicator {
    pub fn new() -> Self {
        Self::with_kind(StrategyKind::Continuous)
    }

    fn with_kind(kind: StrategyKind) -> Self {
        Self {
            base: BaseDeduplicator::new(kind),
        }
    }
}

impl Default for ContinuousDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Deduplicator for ContinuousDeduplicator {
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
        let now = Utc::now();
        for datum in &mut data {
            datum.active = true;
            datum.modified_time = Some(now);
        }
        self.base.add_data(repo, dataset, data).await
    }

    async fn close(
        &self,
        _repo: &dyn DataRepository,
        dataset: &mut Dataset,
    ) -> Result<(), DeduplicatorError> {
        debug!(dataset_id = %dataset.id, "continuous dataset needs no close");
        Ok(())
    }

    async fn delete(
        &self,
        _repo: &dyn DataRepository,
        _dataset: &mut Dataset,
    ) -> Result<(), DeduplicatorError> {
        Err(DeduplicatorError::Unsupported {
            strategy: self.name(),
            operation: "delete",
        })
    }
}

/// Continuous ingestion where a reading's origin id identifies it across uploads.
///
/// A newer reading with a known origin id replaces the older one outright.
#[derive(Debug, Clone)]
pub struct ContinuousOriginDeduplicator {
    continuous: ContinuousDeduplicator,
}

impl ContinuousOriginDeduplicator {
    pub fn new() -> Self {
        Self {
            continuous: ContinuousDeduplicator::with_kind(StrategyKind::ContinuousOrigin),
        }
    }
}

impl Default for ContinuousOriginDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Deduplicator for ContinuousOriginDeduplicator {
    fn kind(&self) -> StrategyKind {
        self.continuous.kind()
    }

    async fn register(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
    ) -> Result<(), DeduplicatorError> {
        self.continuous.register(repo, dataset).await
    }

    async fn add_data(
        &self,
        repo: &dyn DataRepository,
        dataset: &Dataset,
        data: Vec<Datum>,
    ) -> Result<usize, DeduplicatorError> {
        if data.is_empty() {
            return Ok(0);
        }

        let received = data.len();
        let data = latest_per_origin(data);

        let origin_ids: Vec<String> = data
            .iter()
            .filter_map(Datum::origin_id)
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let archived = repo
            .archive_dataset_data_using_origin_ids(dataset, &origin_ids, Utc::now())
            .await?;
        let written = self.continuous.add_data(repo, dataset, data).await?;
        let purged = repo.delete_archived_dataset_data(dataset).await?;

        debug!(
            dataset_id = %dataset.id,
            origin_ids = origin_ids.len(),
            superseded_in_batch = received.saturating_sub(written),
            archived,
            written,
            purged,
            "replaced data by origin id"
        );
        Ok(written)
    }

    async fn close(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
    ) -> Result<(), DeduplicatorError> {
        self.continuous.close(repo, dataset).await
    }

    async fn delete(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
    ) -> Result<(), DeduplicatorError> {
        self.continuous.delete(repo, dataset).await
    }
}

/// Keeps only the last datum for each origin id, in batch order.
/// Data without an origin id are all kept.
fn latest_per_origin(data: Vec<Datum>) -> Vec<Datum> {
    let mut seen = HashSet::new();
    let mut kept: Vec<Datum> = data
        .into_iter()
        .rev()
        .filter(|datum| {
            datum
                .origin_id()
                .map_or(true, |origin_id| seen.insert(origin_id.to_string()))
        })
        .collect();
    kept.reverse();
    kept
}
