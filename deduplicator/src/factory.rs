use std::sync::Arc;

use common::storage::{repository::DataRepository, types::dataset::Dataset};
use tracing::debug;

use crate::{
    config::DeduplicatorConfig,
    error::DeduplicatorError,
    strategy::{Deduplicator, StrategyKind},
};

/// Selects the strategy that governs a dataset.
///
/// The `*_registered` pair answers from the dataset's bound descriptor only,
/// so a resumed dataset always gets back the strategy it started with.
pub trait DeduplicatorFactory: Send + Sync {
    fn can_handle(&self, dataset: &Dataset) -> Result<bool, DeduplicatorError>;

    fn resolve(&self, dataset: &Dataset) -> Result<Arc<dyn Deduplicator>, DeduplicatorError>;

    fn is_registered_with(&self, dataset: &Dataset) -> Result<bool, DeduplicatorError>;

    fn resolve_registered(
        &self,
        dataset: &Dataset,
    ) -> Result<Arc<dyn Deduplicator>, DeduplicatorError>;
}

/// Factory for one strategy kind.
#[derive(Debug, Clone)]
pub struct StrategyFactory {
    kind: StrategyKind,
    config: Arc<DeduplicatorConfig>,
}

impl StrategyFactory {
    pub fn new(kind: StrategyKind, config: Arc<DeduplicatorConfig>) -> Self {
        Self { kind, config }
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn matches_predicates(&self, dataset: &Dataset) -> bool {
        match self.kind {
            StrategyKind::Continuous => dataset.is_continuous(),
            // Only reachable through an explicit binding.
            StrategyKind::ContinuousOrigin => false,
            kind => {
                !dataset.is_continuous()
                    && self
                        .config
                        .manufacturers_for(kind)
                        .is_some_and(|allowed| dataset.has_manufacturer_in(allowed))
            }
        }
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

impl DeduplicatorFactory for StrategyFactory {
    fn can_handle(&self, dataset: &Dataset) -> Result<bool, DeduplicatorError> {
        validate_identifiers(dataset)?;

        if let Some(bound) = dataset.bound_strategy() {
            let matches = bound == self.kind.name();
            return Ok(match self.kind {
                StrategyKind::ContinuousOrigin => matches && dataset.is_continuous(),
                _ => matches,
            });
        }

        if dataset.device_id().is_none() {
            return Ok(false);
        }

        Ok(self.matches_predicates(dataset))
    }

    fn resolve(&self, dataset: &Dataset) -> Result<Arc<dyn Deduplicator>, DeduplicatorError> {
        if self.can_handle(dataset)? {
            Ok(self.kind.build(&self.config))
        } else {
            Err(DeduplicatorError::NotHandled {
                strategy: self.kind.name(),
                dataset_id: dataset.id.clone(),
            })
        }
    }

    fn is_registered_with(&self, dataset: &Dataset) -> Result<bool, DeduplicatorError> {
        validate_identifiers(dataset)?;
        Ok(dataset.bound_strategy() == Some(self.kind.name()))
    }

    fn resolve_registered(
        &self,
        dataset: &Dataset,
    ) -> Result<Arc<dyn Deduplicator>, DeduplicatorError> {
        if self.is_registered_with(dataset)? {
            Ok(self.kind.build(&self.config))
        } else {
            Err(DeduplicatorError::NotRegistered(dataset.id.clone()))
        }
    }
}

/// Ordered chain of factories; the first that answers yes wins.
///
/// An error from any factory stops the walk rather than falling through.
#[derive(Clone)]
pub struct DelegateFactory {
    factories: Vec<Arc<dyn DeduplicatorFactory>>,
}

impl DelegateFactory {
    pub fn new(factories: Vec<Arc<dyn DeduplicatorFactory>>) -> Self {
        Self { factories }
    }

    /// Every strategy kind, in `StrategyKind::PRIORITY` order.
    pub fn with_default_strategies(config: DeduplicatorConfig) -> Self {
        let config = Arc::new(config);
        let factories = StrategyKind::PRIORITY
            .into_iter()
            .map(|kind| {
                Arc::new(StrategyFactory::new(kind, Arc::clone(&config)))
                    as Arc<dyn DeduplicatorFactory>
            })
            .collect();
        Self::new(factories)
    }
}

impl DeduplicatorFactory for DelegateFactory {
    fn can_handle(&self, dataset: &Dataset) -> Result<bool, DeduplicatorError> {
        for factory in &self.factories {
            if factory.can_handle(dataset)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn resolve(&self, dataset: &Dataset) -> Result<Arc<dyn Deduplicator>, DeduplicatorError> {
        for factory in &self.factories {
            if factory.can_handle(dataset)? {
                return factory.resolve(dataset);
            }
        }
        Err(DeduplicatorError::NoMatchingStrategy(dataset.id.clone()))
    }

    fn is_registered_with(&self, dataset: &Dataset) -> Result<bool, DeduplicatorError> {
        for factory in &self.factories {
            if factory.is_registered_with(dataset)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn resolve_registered(
        &self,
        dataset: &Dataset,
    ) -> Result<Arc<dyn Deduplicator>, DeduplicatorError> {
        for factory in &self.factories {
            if factory.is_registered_with(dataset)? {
                return factory.resolve_registered(dataset);
            }
        }
        Err(DeduplicatorError::NotRegistered(dataset.id.clone()))
    }
}

/// Picks a strategy for a new dataset and binds it.
pub async fn resolve_and_register(
    factory: &dyn DeduplicatorFactory,
    repo: &dyn DataRepository,
    dataset: &mut Dataset,
) -> Result<Arc<dyn Deduplicator>, DeduplicatorError> {
    let deduplicator = factory.resolve(dataset)?;
    deduplicator.register(repo, dataset).await?;
    debug!(
        dataset_id = %dataset.id,
        strategy = deduplicator.name(),
        "resolved deduplicator for dataset"
    );
    Ok(deduplicator)
}
