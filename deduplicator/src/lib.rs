#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod config;
pub mod error;
pub mod factory;
pub mod hasher;
pub mod strategy;

pub use config::DeduplicatorConfig;
pub use error::DeduplicatorError;
pub use factory::{resolve_and_register, DeduplicatorFactory, DelegateFactory, StrategyFactory};
pub use hasher::IdentityHasher;
pub use strategy::{Deduplicator, StrategyKind, STRATEGY_VERSION};
