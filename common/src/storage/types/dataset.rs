use uuid::Uuid;

use crate::stored_object;

use super::deduplicator_descriptor::DeduplicatorDescriptor;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    #[default]
    Normal,
    Continuous,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatasetState {
    #[default]
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SequenceOperation {
    Close,
    Delete,
}

/// Cursor over a strategy's close or delete steps, persisted after every step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SequenceProgress {
    pub operation: SequenceOperation,
    pub strategy: String,
    pub completed_steps: usize,
    #[serde(
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime"
    )]
    pub started_at: DateTime<Utc>,
}

stored_object!(Dataset, "dataset", {
    user_id: String,
    device_id: Option<String>,
    #[serde(default)]
    device_manufacturers: Vec<String>,
    #[serde(default)]
    kind: DatasetKind,
    #[serde(default)]
    state: DatasetState,
    deduplicator: Option<DeduplicatorDescriptor>,
    progress: Option<SequenceProgress>
});

impl Dataset {
    pub fn new(
        user_id: String,
        device_id: Option<String>,
        device_manufacturers: Vec<String>,
        kind: DatasetKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            device_id,
            device_manufacturers,
            kind,
            state: DatasetState::Open,
            deduplicator: None,
            progress: None,
        }
    }

    pub fn is_continuous(&self) -> bool {
        self.kind == DatasetKind::Continuous
    }

    /// The device id, if present and non-empty.
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Name of the strategy this dataset is bound to or requested.
    pub fn bound_strategy(&self) -> Option<&str> {
        self.deduplicator
            .as_ref()
            .filter(|descriptor| descriptor.has_name())
            .and_then(|descriptor| descriptor.name.as_deref())
    }

    pub fn has_manufacturer_in(&self, allowed: &[String]) -> bool {
        self.device_manufacturers
            .iter()
            .any(|manufacturer| allowed.iter().any(|candidate| candidate == manufacturer))
    }

    /// Progress of an in-flight sequence for `operation`, if one was interrupted.
    pub fn progress_for(&self, operation: SequenceOperation) -> Option<&SequenceProgress> {
        self.progress
            .as_ref()
            .filter(|progress| progress.operation == operation)
    }

    /// Starts progress for `operation` under `strategy` at step zero.
    ///
    /// Returns false, leaving the dataset untouched, when that strategy
    /// already has progress saved for the operation.
    pub fn start_progress(
        &mut self,
        operation: SequenceOperation,
        strategy: &str,
        started_at: DateTime<Utc>,
    ) -> bool {
        if self
            .progress_for(operation)
            .is_some_and(|progress| progress.strategy == strategy)
        {
            return false;
        }
        self.progress = Some(SequenceProgress {
            operation,
            strategy: strategy.to_string(),
            completed_steps: 0,
            started_at,
        });
        true
    }
}
