use common::utils::config::AppConfig;

use crate::strategy::StrategyKind;

/// Settings handed to every strategy at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeduplicatorConfig {
    pub hash_separator: String,
    pub time_cutoff_manufacturers: Vec<String>,
    pub hash_archive_manufacturers: Vec<String>,
    pub hash_drop_manufacturers: Vec<String>,
    pub truncate_manufacturers: Vec<String>,
}

impl DeduplicatorConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            hash_separator: config.identity_hash_separator.clone(),
            time_cutoff_manufacturers: config.time_cutoff_manufacturers.clone(),
            hash_archive_manufacturers: config.hash_archive_manufacturers.clone(),
            hash_drop_manufacturers: config.hash_drop_manufacturers.clone(),
            truncate_manufacturers: config.truncate_manufacturers.clone(),
        }
    }

    /// The manufacturer allow-list for strategies selected by manufacturer.
    pub fn manufacturers_for(&self, kind: StrategyKind) -> Option<&[String]> {
        match kind {
            StrategyKind::TimeCutoff => Some(&self.time_cutoff_manufacturers),
            StrategyKind::HashArchive => Some(&self.hash_archive_manufacturers),
            StrategyKind::HashDrop => Some(&self.hash_drop_manufacturers),
            StrategyKind::Truncate => Some(&self.truncate_manufacturers),
            StrategyKind::Continuous | StrategyKind::ContinuousOrigin => None,
        }
    }
}

impl Default for DeduplicatorConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuous_strategies_have_no_allow_list() {
        let config = DeduplicatorConfig::default();
        assert!(config.manufacturers_for(StrategyKind::Continuous).is_none());
        assert!(config
            .manufacturers_for(StrategyKind::HashDrop)
            .is_some_and(|list| list.iter().any(|m| m == "Dexcom")));
    }
}
