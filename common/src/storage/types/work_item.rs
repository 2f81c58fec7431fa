use std::time::Duration;

use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const DATA_INGEST_WORK_TYPE: &str = "data.ingest";
pub const DEFAULT_PROCESSING_TIMEOUT_SECS: i64 = 300;
pub const DEFAULT_MAX_FAILING_RETRIES: u32 = 10;

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum WorkState {
    #[serde(rename = "Pending")]
    #[default]
    Pending,
    #[serde(rename = "Reserved")]
    Reserved,
    #[serde(rename = "Processing")]
    Processing,
    #[serde(rename = "Failed")]
    Failed,
    #[serde(rename = "DeadLetter")]
    DeadLetter,
}

impl WorkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkState::Pending => "Pending",
            WorkState::Reserved => "Reserved",
            WorkState::Processing => "Processing",
            WorkState::Failed => "Failed",
            WorkState::DeadLetter => "DeadLetter",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkState::DeadLetter)
    }
}

/// Metadata keys consumed by the ingestion processor.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct WorkMetadata {
    #[serde(rename = "dataSetId", default)]
    pub data_set_id: Option<String>,
    #[serde(rename = "rawId", default)]
    pub raw_id: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct WorkErrorInfo {
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
enum WorkTransition {
    Reserve,
    StartProcessing,
    Complete,
    Fail,
    FailPermanently,
    Release,
}

impl WorkTransition {
    fn as_str(&self) -> &'static str {
        match self {
            WorkTransition::Reserve => "reserve",
            WorkTransition::StartProcessing => "start_processing",
            WorkTransition::Complete => "complete",
            WorkTransition::Fail => "fail",
            WorkTransition::FailPermanently => "fail_permanently",
            WorkTransition::Release => "release",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: WorkItemLifecycle,
        initial: Pending,
        states: [Pending, Reserved, Processing, Completed, Failed, DeadLetter],
        events {
            reserve {
                transition: { from: Pending, to: Reserved }
                transition: { from: Failed, to: Reserved }
            }
            start_processing {
                transition: { from: Reserved, to: Processing }
            }
            complete {
                transition: { from: Processing, to: Completed }
            }
            fail {
                transition: { from: Processing, to: Failed }
            }
            fail_permanently {
                transition: { from: Processing, to: DeadLetter }
            }
            release {
                transition: { from: Reserved, to: Pending }
                transition: { from: Processing, to: Pending }
            }
        }
    }

    pub(super) fn pending() -> WorkItemLifecycle<(), Pending> {
        WorkItemLifecycle::new(())
    }

    pub(super) fn reserved() -> WorkItemLifecycle<(), Reserved> {
        pending()
            .reserve()
            .expect("reserve transition from Pending should exist")
    }

    pub(super) fn processing() -> WorkItemLifecycle<(), Processing> {
        reserved()
            .start_processing()
            .expect("start_processing transition from Reserved should exist")
    }

    pub(super) fn failed() -> WorkItemLifecycle<(), Failed> {
        processing()
            .fail()
            .expect("fail transition from Processing should exist")
    }
}

fn invalid_transition(state: &WorkState, event: WorkTransition) -> AppError {
    AppError::Conflict(format!(
        "Invalid work item transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

/// `None` means the item leaves the queue.
fn compute_next_state(
    state: &WorkState,
    event: WorkTransition,
) -> Result<Option<WorkState>, AppError> {
    use lifecycle::*;
    match (state, event) {
        (WorkState::Pending, WorkTransition::Reserve) => pending()
            .reserve()
            .map(|_| Some(WorkState::Reserved))
            .map_err(|_| invalid_transition(state, event)),
        (WorkState::Failed, WorkTransition::Reserve) => failed()
            .reserve()
            .map(|_| Some(WorkState::Reserved))
            .map_err(|_| invalid_transition(state, event)),
        (WorkState::Reserved, WorkTransition::StartProcessing) => reserved()
            .start_processing()
            .map(|_| Some(WorkState::Processing))
            .map_err(|_| invalid_transition(state, event)),
        (WorkState::Processing, WorkTransition::Complete) => processing()
            .complete()
            .map(|_| None)
            .map_err(|_| invalid_transition(state, event)),
        (WorkState::Processing, WorkTransition::Fail) => processing()
            .fail()
            .map(|_| Some(WorkState::Failed))
            .map_err(|_| invalid_transition(state, event)),
        (WorkState::Processing, WorkTransition::FailPermanently) => processing()
            .fail_permanently()
            .map(|_| Some(WorkState::DeadLetter))
            .map_err(|_| invalid_transition(state, event)),
        (WorkState::Reserved, WorkTransition::Release) => reserved()
            .release()
            .map(|_| Some(WorkState::Pending))
            .map_err(|_| invalid_transition(state, event)),
        (WorkState::Processing, WorkTransition::Release) => processing()
            .release()
            .map(|_| Some(WorkState::Pending))
            .map_err(|_| invalid_transition(state, event)),
        _ => Err(invalid_transition(state, event)),
    }
}

stored_object!(WorkItem, "work_item", {
    work_type: String,
    group_key: Option<String>,
    dedup_key: Option<String>,
    serial_key: Option<String>,
    processing_timeout_secs: i64,
    metadata: WorkMetadata,
    state: WorkState,
    failing_retry_count: u32,
    max_failing_retries: u32,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    scheduled_at: chrono::DateTime<chrono::Utc>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    locked_at: Option<chrono::DateTime<chrono::Utc>>,
    worker_id: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    last_error_at: Option<chrono::DateTime<chrono::Utc>>
});

impl WorkItem {
    pub fn new(work_type: &str, metadata: WorkMetadata) -> Self {
        let now = chrono::Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            work_type: work_type.to_string(),
            group_key: None,
            dedup_key: None,
            serial_key: None,
            processing_timeout_secs: DEFAULT_PROCESSING_TIMEOUT_SECS,
            metadata,
            state: WorkState::Pending,
            failing_retry_count: 0,
            max_failing_retries: DEFAULT_MAX_FAILING_RETRIES,
            scheduled_at: now,
            locked_at: None,
            worker_id: None,
            error_code: None,
            error_message: None,
            last_error_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Ingestion work for a dataset, serialized per dataset id.
    pub fn for_dataset(dataset_id: &str, raw_id: Option<&str>) -> Self {
        let metadata = WorkMetadata {
            data_set_id: Some(dataset_id.to_string()),
            raw_id: raw_id.map(str::to_string),
        };
        let mut item = Self::new(DATA_INGEST_WORK_TYPE, metadata);
        item.group_key = Some(dataset_id.to_string());
        item.serial_key = Some(dataset_id.to_string());
        item.dedup_key = Some(format!(
            "{DATA_INGEST_WORK_TYPE}:{dataset_id}:{}",
            raw_id.unwrap_or("*")
        ));
        item
    }

    #[must_use]
    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout_secs = i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX);
        self
    }

    #[must_use]
    pub fn with_max_failing_retries(mut self, max_failing_retries: u32) -> Self {
        self.max_failing_retries = max_failing_retries;
        self
    }

    pub fn can_retry(&self) -> bool {
        self.failing_retry_count < self.max_failing_retries
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.processing_timeout_secs.max(0)).unwrap_or(0))
    }

    /// Stores the item unless a not-yet-started item with the same dedup key exists.
    pub async fn enqueue(self, db: &SurrealDbClient) -> Result<WorkItem, AppError> {
        if let Some(dedup_key) = self.dedup_key.clone() {
            let mut response = db
                .client
                .query(
                    "SELECT * FROM type::table($table)
                     WHERE dedup_key = $dedup_key AND state INSIDE $waiting_states
                     LIMIT 1",
                )
                .bind(("table", Self::table_name()))
                .bind(("dedup_key", dedup_key))
                .bind((
                    "waiting_states",
                    vec![WorkState::Pending.as_str(), WorkState::Failed.as_str()],
                ))
                .await?;

            let existing: Option<WorkItem> = response.take(0)?;
            if let Some(existing) = existing {
                return Ok(existing);
            }
        }

        db.store_item(self.clone()).await?;
        Ok(self)
    }

    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<WorkItem>, AppError> {
        debug_assert!(compute_next_state(&WorkState::Pending, WorkTransition::Reserve).is_ok());
        debug_assert!(compute_next_state(&WorkState::Failed, WorkTransition::Reserve).is_ok());

        // Selection, the busy serial-key check and the lease are one statement,
        // so they run in a single transaction.
        const CLAIM_QUERY: &str = r#"
            UPDATE (
                SELECT * FROM type::table($table)
                WHERE (
                        (state INSIDE $ready_states AND scheduled_at <= $now)
                        OR (
                            state INSIDE $sticky_states
                            AND (
                                locked_at = NONE
                                OR time::unix($now) - time::unix(locked_at) >= processing_timeout_secs
                            )
                        )
                    )
                  AND (
                        serial_key = NONE
                        OR serial_key NOTINSIDE (
                            SELECT VALUE serial_key FROM type::table($table)
                            WHERE state INSIDE $sticky_states
                              AND serial_key != NONE
                              AND locked_at != NONE
                              AND time::unix($now) - time::unix(locked_at) < processing_timeout_secs
                        )
                    )
                ORDER BY scheduled_at ASC, created_at ASC
                LIMIT 1
            )
            SET state = $reserved_state,
                locked_at = $now,
                worker_id = $worker_id,
                updated_at = $now
            RETURN AFTER;
        "#;

        let mut result = db
            .client
            .query(CLAIM_QUERY)
            .bind(("table", Self::table_name()))
            .bind((
                "ready_states",
                vec![WorkState::Pending.as_str(), WorkState::Failed.as_str()],
            ))
            .bind((
                "sticky_states",
                vec![WorkState::Reserved.as_str(), WorkState::Processing.as_str()],
            ))
            .bind(("reserved_state", WorkState::Reserved.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", worker_id.to_string()))
            .await?;

        let item: Option<WorkItem> = result.take(0)?;
        Ok(item)
    }

    pub async fn mark_processing(&self, db: &SurrealDbClient) -> Result<WorkItem, AppError> {
        compute_next_state(&self.state, WorkTransition::StartProcessing)?;

        const START_PROCESSING_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $processing,
                updated_at = $now,
                locked_at = $now
            WHERE state = $reserved AND worker_id = $worker_id
            RETURN AFTER;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(START_PROCESSING_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("processing", WorkState::Processing.as_str()))
            .bind(("reserved", WorkState::Reserved.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<WorkItem> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, WorkTransition::StartProcessing))
    }

    /// Terminal success: the item is removed from the queue.
    pub async fn complete(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        let next = compute_next_state(&self.state, WorkTransition::Complete)?;
        debug_assert!(next.is_none());

        const COMPLETE_QUERY: &str = r#"
            DELETE type::thing($table, $id)
            WHERE state = $processing AND worker_id = $worker_id
            RETURN BEFORE;
        "#;

        let mut result = db
            .client
            .query(COMPLETE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("processing", WorkState::Processing.as_str()))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let deleted: Option<WorkItem> = result.take(0)?;
        deleted
            .map(|_| ())
            .ok_or_else(|| invalid_transition(&self.state, WorkTransition::Complete))
    }

    /// Requeues the item at `retry_at` and counts the failure.
    pub async fn mark_failed(
        &self,
        error: WorkErrorInfo,
        retry_at: chrono::DateTime<chrono::Utc>,
        db: &SurrealDbClient,
    ) -> Result<WorkItem, AppError> {
        let next = compute_next_state(&self.state, WorkTransition::Fail)?;
        debug_assert_eq!(next, Some(WorkState::Failed));

        const FAIL_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $failed,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                scheduled_at = $retry_at,
                failing_retry_count = failing_retry_count + 1,
                error_code = $error_code,
                error_message = $error_message,
                last_error_at = $now
            WHERE state = $processing AND worker_id = $worker_id
            RETURN AFTER;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(FAIL_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("failed", WorkState::Failed.as_str()))
            .bind(("processing", WorkState::Processing.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("retry_at", SurrealDatetime::from(retry_at)))
            .bind(("error_code", error.code.clone()))
            .bind(("error_message", error.message.clone()))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<WorkItem> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, WorkTransition::Fail))
    }

    /// Terminal failure: the item stays in the dead-letter state with its error recorded.
    pub async fn fail_permanently(
        &self,
        error: WorkErrorInfo,
        db: &SurrealDbClient,
    ) -> Result<WorkItem, AppError> {
        let next = compute_next_state(&self.state, WorkTransition::FailPermanently)?;
        debug_assert_eq!(next, Some(WorkState::DeadLetter));

        const DEAD_LETTER_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $dead,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                error_code = $error_code,
                error_message = $error_message,
                last_error_at = $now
            WHERE state = $processing AND worker_id = $worker_id
            RETURN AFTER;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(DEAD_LETTER_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("dead", WorkState::DeadLetter.as_str()))
            .bind(("processing", WorkState::Processing.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("error_code", error.code.clone()))
            .bind(("error_message", error.message.clone()))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<WorkItem> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, WorkTransition::FailPermanently))
    }

    /// Hands the item back to the queue without counting a failure.
    pub async fn release(&self, db: &SurrealDbClient) -> Result<WorkItem, AppError> {
        compute_next_state(&self.state, WorkTransition::Release)?;

        const RELEASE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $pending,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE
            WHERE state INSIDE $allow_states AND worker_id = $worker_id
            RETURN AFTER;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(RELEASE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("pending", WorkState::Pending.as_str()))
            .bind((
                "allow_states",
                vec![WorkState::Reserved.as_str(), WorkState::Processing.as_str()],
            ))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<WorkItem> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, WorkTransition::Release))
    }

    pub async fn get_unfinished(db: &SurrealDbClient) -> Result<Vec<WorkItem>, AppError> {
        let items: Vec<WorkItem> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE state INSIDE $active_states
                 ORDER BY scheduled_at ASC, created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind((
                "active_states",
                vec![
                    WorkState::Pending.as_str(),
                    WorkState::Reserved.as_str(),
                    WorkState::Processing.as_str(),
                    WorkState::Failed.as_str(),
                ],
            ))
            .await?
            .take(0)?;

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, &database)
            .await
            .expect("in-memory surrealdb")
    }

    async fn claim(db: &SurrealDbClient, worker_id: &str) -> Option<WorkItem> {
        WorkItem::claim_next_ready(db, worker_id, chrono::Utc::now())
            .await
            .expect("claim")
    }

    #[tokio::test]
    async fn test_new_item_defaults() {
        let item = WorkItem::for_dataset("dataset-1", None);

        assert_eq!(item.work_type, DATA_INGEST_WORK_TYPE);
        assert_eq!(item.state, WorkState::Pending);
        assert_eq!(item.failing_retry_count, 0);
        assert_eq!(item.metadata.data_set_id.as_deref(), Some("dataset-1"));
        assert_eq!(item.serial_key.as_deref(), Some("dataset-1"));
        assert_eq!(item.group_key.as_deref(), Some("dataset-1"));
        assert!(item.locked_at.is_none());
    }

    #[test]
    fn metadata_uses_camel_case_keys() {
        let metadata = WorkMetadata {
            data_set_id: Some("d".into()),
            raw_id: Some("r".into()),
        };
        let value = serde_json::to_value(&metadata).expect("serialize");
        assert_eq!(value["dataSetId"], "d");
        assert_eq!(value["rawId"], "r");
    }

    #[tokio::test]
    async fn test_enqueue_suppresses_duplicate_waiting_items() {
        let db = memory_db().await;

        let first = WorkItem::for_dataset("dataset-1", None)
            .enqueue(&db)
            .await
            .expect("enqueue");
        let second = WorkItem::for_dataset("dataset-1", None)
            .enqueue(&db)
            .await
            .expect("enqueue again");

        assert_eq!(first.id, second.id);
        let all = db
            .get_all_stored_items::<WorkItem>()
            .await
            .expect("list");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_claim_process_and_complete_removes_item() {
        let db = memory_db().await;
        let item = WorkItem::for_dataset("dataset-1", None)
            .enqueue(&db)
            .await
            .expect("enqueue");

        let claimed = claim(&db, "worker-1").await.expect("item claimed");
        assert_eq!(claimed.id, item.id);
        assert_eq!(claimed.state, WorkState::Reserved);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));

        let processing = claimed.mark_processing(&db).await.expect("processing");
        assert_eq!(processing.state, WorkState::Processing);

        processing.complete(&db).await.expect("complete");

        let stored = db.get_item::<WorkItem>(&item.id).await.expect("fetch");
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn test_serial_key_excludes_concurrent_claims() {
        let db = memory_db().await;
        WorkItem::for_dataset("dataset-1", Some("raw-1"))
            .enqueue(&db)
            .await
            .expect("enqueue");
        WorkItem::for_dataset("dataset-1", Some("raw-2"))
            .enqueue(&db)
            .await
            .expect("enqueue");
        let other = WorkItem::for_dataset("dataset-2", None)
            .enqueue(&db)
            .await
            .expect("enqueue");

        let first = claim(&db, "worker-1").await.expect("first claim");
        assert_eq!(first.serial_key.as_deref(), Some("dataset-1"));

        let second = claim(&db, "worker-2").await.expect("second claim");
        assert_eq!(second.id, other.id, "same serial key must wait");

        assert!(claim(&db, "worker-3").await.is_none());

        let processing = first.mark_processing(&db).await.expect("processing");
        processing.complete(&db).await.expect("complete");

        let third = claim(&db, "worker-3").await.expect("serial key freed");
        assert_eq!(third.metadata.raw_id.as_deref(), Some("raw-2"));
    }

    #[tokio::test]
    async fn test_second_worker_gets_nothing_while_serial_key_is_leased() {
        let db = memory_db().await;
        WorkItem::for_dataset("dataset-1", Some("raw-1"))
            .enqueue(&db)
            .await
            .expect("enqueue");
        WorkItem::for_dataset("dataset-1", Some("raw-2"))
            .enqueue(&db)
            .await
            .expect("enqueue");

        let first = claim(&db, "worker-a").await.expect("first claim");
        assert_eq!(first.worker_id.as_deref(), Some("worker-a"));
        assert!(claim(&db, "worker-b").await.is_none());

        let processing = first.mark_processing(&db).await.expect("processing");
        assert!(claim(&db, "worker-b").await.is_none());

        processing.release(&db).await.expect("release");
        let next = claim(&db, "worker-b").await.expect("lease released");
        assert_eq!(next.serial_key.as_deref(), Some("dataset-1"));
    }

    #[tokio::test]
    async fn test_fail_counts_retry_and_dead_letter_records_error() {
        let db = memory_db().await;
        WorkItem::for_dataset("dataset-1", None)
            .enqueue(&db)
            .await
            .expect("enqueue");

        let now = chrono::Utc::now();
        let processing = claim(&db, "worker-1")
            .await
            .expect("claimed")
            .mark_processing(&db)
            .await
            .expect("processing");

        let error_info = WorkErrorInfo {
            code: Some("store".into()),
            message: "connection reset".into(),
        };
        let retry_at = now + chrono::Duration::seconds(30);
        let failed = processing
            .mark_failed(error_info.clone(), retry_at, &db)
            .await
            .expect("failed update");
        assert_eq!(failed.state, WorkState::Failed);
        assert_eq!(failed.failing_retry_count, 1);
        assert_eq!(failed.error_message.as_deref(), Some("connection reset"));
        assert!(failed.worker_id.is_none());
        assert!(failed.scheduled_at > now);

        assert!(
            claim(&db, "worker-1").await.is_none(),
            "retry is not due yet"
        );

        let later = retry_at + chrono::Duration::seconds(1);
        let reclaimed = WorkItem::claim_next_ready(&db, "worker-2", later)
            .await
            .expect("claim")
            .expect("due item claimed");
        let processing = reclaimed.mark_processing(&db).await.expect("processing");
        let dead = processing
            .fail_permanently(
                WorkErrorInfo {
                    code: Some("validation".into()),
                    message: "dataset not found".into(),
                },
                &db,
            )
            .await
            .expect("dead letter");
        assert_eq!(dead.state, WorkState::DeadLetter);
        assert!(dead.state.is_terminal());
        assert_eq!(dead.failing_retry_count, 1);
        assert_eq!(dead.error_message.as_deref(), Some("dataset not found"));
    }

    #[tokio::test]
    async fn test_release_returns_item_without_counting_failure() {
        let db = memory_db().await;
        WorkItem::for_dataset("dataset-1", None)
            .enqueue(&db)
            .await
            .expect("enqueue");

        let processing = claim(&db, "worker-1")
            .await
            .expect("claimed")
            .mark_processing(&db)
            .await
            .expect("processing");
        let released = processing.release(&db).await.expect("release");

        assert_eq!(released.state, WorkState::Pending);
        assert_eq!(released.failing_retry_count, 0);
        assert!(claim(&db, "worker-2").await.is_some());
    }

    #[test]
    fn completed_items_cannot_be_failed() {
        assert!(compute_next_state(&WorkState::Pending, WorkTransition::Fail).is_err());
        assert!(compute_next_state(&WorkState::DeadLetter, WorkTransition::Reserve).is_err());
        assert_eq!(
            compute_next_state(&WorkState::Processing, WorkTransition::Complete)
                .expect("valid transition"),
            None
        );
    }
}
