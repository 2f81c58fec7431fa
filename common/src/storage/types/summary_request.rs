use std::collections::BTreeSet;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Why a user's summaries need recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryReason {
    DatasetFinalized,
    DatasetDeleted,
}

impl SummaryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryReason::DatasetFinalized => "dataset_finalized",
            SummaryReason::DatasetDeleted => "dataset_deleted",
        }
    }
}

stored_object!(SummaryRequest, "summary_request", {
    user_id: String,
    reasons: BTreeSet<SummaryReason>,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    outdated_since: DateTime<Utc>,
    request_count: u64
});

impl SummaryRequest {
    /// Marks the user's summaries outdated, keeping the earliest outdated time.
    pub async fn mark_outdated(
        db: &SurrealDbClient,
        user_id: &str,
        reasons: BTreeSet<SummaryReason>,
    ) -> Result<SummaryRequest, AppError> {
        let now = Utc::now();
        let request = match db.get_item::<SummaryRequest>(user_id).await? {
            Some(mut existing) => {
                existing.reasons.extend(reasons);
                existing.request_count = existing.request_count.saturating_add(1);
                existing.updated_at = now;
                existing
            }
            None => SummaryRequest {
                id: user_id.to_string(),
                created_at: now,
                updated_at: now,
                user_id: user_id.to_string(),
                reasons,
                outdated_since: now,
                request_count: 1,
            },
        };

        db.upsert_item(request.clone()).await?;
        Ok(request)
    }
}
