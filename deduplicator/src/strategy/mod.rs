mod base;
mod continuous;
mod hash_archive;
mod hash_drop;
mod sequence;
mod time_cutoff;
mod truncate;

pub use base::{BaseDeduplicator, DEFAULT_CLOSE_STEPS, DEFAULT_DELETE_STEPS};
pub use continuous::{ContinuousDeduplicator, ContinuousOriginDeduplicator};
pub use hash_archive::HashArchiveDeduplicator;
pub use hash_drop::HashDropDeduplicator;
pub use sequence::Step;
pub use time_cutoff::TimeCutoffDeduplicator;
pub use truncate::TruncateDeduplicator;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use common::storage::{
    repository::DataRepository,
    types::{dataset::Dataset, datum::Datum},
};

use crate::{config::DeduplicatorConfig, error::DeduplicatorError, hasher::IdentityHasher};

pub const STRATEGY_VERSION: &str = "1.0.0";

/// The closed set of deduplication strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    TimeCutoff,
    HashArchive,
    HashDrop,
    Truncate,
    Continuous,
    ContinuousOrigin,
}

impl StrategyKind {
    /// Selection order used by the default delegate factory.
    pub const PRIORITY: [StrategyKind; 6] = [
        StrategyKind::ContinuousOrigin,
        StrategyKind::Continuous,
        StrategyKind::Truncate,
        StrategyKind::HashArchive,
        StrategyKind::HashDrop,
        StrategyKind::TimeCutoff,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::TimeCutoff => "time-cutoff",
            StrategyKind::HashArchive => "hash-archive",
            StrategyKind::HashDrop => "hash-drop",
            StrategyKind::Truncate => "truncate",
            StrategyKind::Continuous => "continuous",
            StrategyKind::ContinuousOrigin => "continuous-origin",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::PRIORITY.into_iter().find(|kind| kind.name() == name)
    }

    pub fn build(self, config: &DeduplicatorConfig) -> Arc<dyn Deduplicator> {
        let hasher = || IdentityHasher::new(config.hash_separator.clone());
        match self {
            StrategyKind::TimeCutoff => Arc::new(TimeCutoffDeduplicator::new()),
            StrategyKind::HashArchive => Arc::new(HashArchiveDeduplicator::new(hasher())),
            StrategyKind::HashDrop => Arc::new(HashDropDeduplicator::new(hasher())),
            StrategyKind::Truncate => Arc::new(TruncateDeduplicator::new()),
            StrategyKind::Continuous => Arc::new(ContinuousDeduplicator::new()),
            StrategyKind::ContinuousOrigin => Arc::new(ContinuousOriginDeduplicator::new()),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle a dataset strategy implements.
///
/// `close` and `delete` run as resumable step sequences: an interrupted run
/// leaves its progress on the dataset and the next call continues from the
/// first incomplete step.
#[async_trait]
pub trait Deduplicator: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn version(&self) -> &'static str {
        STRATEGY_VERSION
    }

    fn is_registered_with(&self, dataset: &Dataset) -> bool {
        dataset.bound_strategy() == Some(self.name())
    }

    /// Binds the dataset to this strategy and persists it.
    async fn register(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
    ) -> Result<(), DeduplicatorError>;

    /// Persists a parsed batch; returns how many data were written.
    async fn add_data(
        &self,
        repo: &dyn DataRepository,
        dataset: &Dataset,
        data: Vec<Datum>,
    ) -> Result<usize, DeduplicatorError>;

    /// Finalizes the dataset, making its data visible.
    async fn close(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
    ) -> Result<(), DeduplicatorError>;

    async fn delete(
        &self,
        repo: &dyn DataRepository,
        dataset: &mut Dataset,
    ) -> Result<(), DeduplicatorError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_the_closed_set() {
        for kind in StrategyKind::PRIORITY {
            assert_eq!(StrategyKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(StrategyKind::from_name("unknown"), None);
    }

    #[test]
    fn built_strategies_report_their_kind() {
        let config = DeduplicatorConfig::default();
        for kind in StrategyKind::PRIORITY {
            let deduplicator = kind.build(&config);
            assert_eq!(deduplicator.kind(), kind);
            assert_eq!(deduplicator.version(), STRATEGY_VERSION);
        }
    }
}
