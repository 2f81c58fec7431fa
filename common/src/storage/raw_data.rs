use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use surrealdb::sql::Datetime as SurrealDatetime;
use tracing::debug;

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::PayloadStore,
        types::{
            raw_record::{Pagination, RawFilter, RawRecord, RevisionCondition},
            StoredObject,
        },
    },
};

/// Access to uploaded raw payloads.
///
/// Every revision-conditioned call treats a revision mismatch as absence
/// rather than an error.
#[async_trait]
pub trait RawDataClient: Send + Sync {
    async fn create(
        &self,
        user_id: &str,
        dataset_id: &str,
        content: Bytes,
    ) -> Result<RawRecord, AppError>;

    async fn list(
        &self,
        user_id: &str,
        filter: &RawFilter,
        pagination: Pagination,
    ) -> Result<Vec<RawRecord>, AppError>;

    async fn get(
        &self,
        id: &str,
        condition: Option<RevisionCondition>,
    ) -> Result<Option<RawRecord>, AppError>;

    async fn get_content(
        &self,
        id: &str,
        condition: Option<RevisionCondition>,
    ) -> Result<Option<Bytes>, AppError>;

    /// Marks the record processed, bumping its revision.
    async fn update(
        &self,
        id: &str,
        condition: Option<RevisionCondition>,
        processed_time: DateTime<Utc>,
    ) -> Result<Option<RawRecord>, AppError>;

    /// Removes every raw record of the dataset along with its content.
    async fn delete_for_dataset(&self, user_id: &str, dataset_id: &str) -> Result<(), AppError>;
}

/// Metadata rows in SurrealDB, content in the payload store.
#[derive(Clone)]
pub struct StoredRawDataClient {
    db: Arc<SurrealDbClient>,
    store: PayloadStore,
}

impl StoredRawDataClient {
    pub fn new(db: Arc<SurrealDbClient>, store: PayloadStore) -> Self {
        Self { db, store }
    }
}

#[async_trait]
impl RawDataClient for StoredRawDataClient {
    async fn create(
        &self,
        user_id: &str,
        dataset_id: &str,
        content: Bytes,
    ) -> Result<RawRecord, AppError> {
        let record = RawRecord::new(
            user_id.to_string(),
            dataset_id.to_string(),
            content.len() as u64,
        );
        self.store.put(&record.content_location, content).await?;
        self.db.store_item(record.clone()).await?;
        debug!(raw_id = %record.id, dataset_id = %dataset_id, "Stored raw record");
        Ok(record)
    }

    async fn list(
        &self,
        user_id: &str,
        filter: &RawFilter,
        pagination: Pagination,
    ) -> Result<Vec<RawRecord>, AppError> {
        let records: Vec<RawRecord> = self
            .db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE user_id = $user_id
                   AND ($dataset_id = NONE OR dataset_id = $dataset_id)
                   AND ($processed = NONE OR processed = $processed)
                 ORDER BY created_at ASC, id ASC
                 LIMIT $limit START $start",
            )
            .bind(("table", RawRecord::table_name()))
            .bind(("user_id", user_id.to_string()))
            .bind(("dataset_id", filter.dataset_id.clone()))
            .bind(("processed", filter.processed))
            .bind(("limit", pagination.size as i64))
            .bind(("start", pagination.offset() as i64))
            .await?
            .take(0)?;
        Ok(records)
    }

    async fn get(
        &self,
        id: &str,
        condition: Option<RevisionCondition>,
    ) -> Result<Option<RawRecord>, AppError> {
        let record = self.db.get_item::<RawRecord>(id).await?;
        Ok(record.filter(|record| record.matches_revision(condition.as_ref())))
    }

    async fn get_content(
        &self,
        id: &str,
        condition: Option<RevisionCondition>,
    ) -> Result<Option<Bytes>, AppError> {
        let Some(record) = self.get(id, condition).await? else {
            return Ok(None);
        };

        match self.store.get(&record.content_location).await {
            Ok(content) => Ok(Some(content)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn update(
        &self,
        id: &str,
        condition: Option<RevisionCondition>,
        processed_time: DateTime<Utc>,
    ) -> Result<Option<RawRecord>, AppError> {
        let updated: Option<RawRecord> = self
            .db
            .query(
                "UPDATE type::thing($table, $id)
                 SET processed = true,
                     processed_time = $processed_time,
                     revision = revision + 1,
                     updated_at = $processed_time
                 WHERE $revision = NONE OR revision = $revision
                 RETURN AFTER",
            )
            .bind(("table", RawRecord::table_name()))
            .bind(("id", id.to_string()))
            .bind(("processed_time", SurrealDatetime::from(processed_time)))
            .bind(("revision", condition.map(|condition| condition.revision)))
            .await?
            .take(0)?;
        Ok(updated)
    }

    async fn delete_for_dataset(&self, user_id: &str, dataset_id: &str) -> Result<(), AppError> {
        self.db
            .query("DELETE type::table($table) WHERE dataset_id = $dataset_id")
            .bind(("table", RawRecord::table_name()))
            .bind(("dataset_id", dataset_id.to_string()))
            .await?
            .check()?;
        self.store
            .delete_prefix(&format!("raw/{user_id}/{dataset_id}"))
            .await?;
        Ok(())
    }
}
