use serde::{Deserialize, Serialize};

/// Binds a dataset to the strategy that governs it, or a datum to the
/// content hash it was deduplicated with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeduplicatorDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
}

impl DeduplicatorDescriptor {
    pub fn for_strategy(name: &str, version: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            version: Some(version.to_string()),
            hash: None,
        }
    }

    /// A descriptor that only requests a strategy by name; registration fills in the version.
    pub fn requesting(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            version: None,
            hash: None,
        }
    }

    pub fn with_hash(hash: String) -> Self {
        Self {
            name: None,
            version: None,
            hash: Some(hash),
        }
    }

    pub fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|name| !name.is_empty())
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }
}
