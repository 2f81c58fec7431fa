use uuid::Uuid;

use crate::stored_object;

stored_object!(RawRecord, "raw_record", {
    user_id: String,
    dataset_id: String,
    revision: i64,
    #[serde(default)]
    processed: bool,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    processed_time: Option<DateTime<Utc>>,
    content_location: String,
    content_length: u64
});

impl RawRecord {
    pub fn new(user_id: String, dataset_id: String, content_length: u64) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let content_location = format!("raw/{user_id}/{dataset_id}/{id}");
        Self {
            id,
            created_at: now,
            updated_at: now,
            user_id,
            dataset_id,
            revision: 1,
            processed: false,
            processed_time: None,
            content_location,
            content_length,
        }
    }

    pub fn matches_revision(&self, condition: Option<&RevisionCondition>) -> bool {
        condition.map_or(true, |condition| condition.revision == self.revision)
    }
}

/// Optimistic-concurrency guard: the operation only applies at this revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionCondition {
    pub revision: i64,
}

impl From<&RawRecord> for RevisionCondition {
    fn from(record: &RawRecord) -> Self {
        Self {
            revision: record.revision,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFilter {
    pub dataset_id: Option<String>,
    pub processed: Option<bool>,
}

impl RawFilter {
    pub fn unprocessed_for(dataset_id: &str) -> Self {
        Self {
            dataset_id: Some(dataset_id.to_string()),
            processed: Some(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: usize,
    pub size: usize,
}

impl Pagination {
    pub fn first(size: usize) -> Self {
        Self {
            page: 0,
            size: size.max(1),
        }
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            size: self.size,
        }
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_unprocessed_at_first_revision() {
        let record = RawRecord::new("user-1".into(), "dataset-1".into(), 42);
        assert_eq!(record.revision, 1);
        assert!(!record.processed);
        assert!(record
            .content_location
            .starts_with("raw/user-1/dataset-1/"));
    }

    #[test]
    fn revision_condition_guards_mismatch() {
        let record = RawRecord::new("user-1".into(), "dataset-1".into(), 0);
        assert!(record.matches_revision(None));
        assert!(record.matches_revision(Some(&RevisionCondition { revision: 1 })));
        assert!(!record.matches_revision(Some(&RevisionCondition { revision: 2 })));
    }

    #[test]
    fn pagination_advances_by_page_size() {
        let page = Pagination::first(0);
        assert_eq!(page.size, 1);
        let page = Pagination::first(25).next().next();
        assert_eq!(page.offset(), 50);
    }
}
