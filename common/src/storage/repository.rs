use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use surrealdb::sql::Datetime as SurrealDatetime;

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{dataset::Dataset, datum::Datum, StoredObject},
    },
};

/// Document-store operations the deduplication strategies and the pipeline rely on.
///
/// Every call is atomic on its own; sequences of calls are not.
#[async_trait]
pub trait DataRepository: Send + Sync {
    async fn get_dataset(&self, id: &str) -> Result<Option<Dataset>, AppError>;

    async fn update_dataset(&self, dataset: &Dataset) -> Result<Dataset, AppError>;

    async fn delete_dataset(&self, dataset: &Dataset) -> Result<(), AppError>;

    /// Upserts each datum by id; returns how many were written.
    async fn create_dataset_data(&self, data: &[Datum]) -> Result<usize, AppError>;

    async fn list_dataset_data(&self, dataset_id: &str) -> Result<Vec<Datum>, AppError>;

    /// Makes the dataset's inactive, non-archived data visible.
    async fn activate_dataset_data(
        &self,
        dataset: &Dataset,
        at: DateTime<Utc>,
    ) -> Result<usize, AppError>;

    /// Archives active data of other datasets on the same device whose hash
    /// also appears in this dataset.
    async fn archive_device_data_using_hashes_from_dataset(
        &self,
        dataset: &Dataset,
        at: DateTime<Utc>,
    ) -> Result<usize, AppError>;

    /// Reverses `archive_device_data_using_hashes_from_dataset` for this dataset.
    async fn unarchive_device_data_using_hashes_from_dataset(
        &self,
        dataset: &Dataset,
        at: DateTime<Utc>,
    ) -> Result<usize, AppError>;

    async fn archive_dataset_data_using_origin_ids(
        &self,
        dataset: &Dataset,
        origin_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<usize, AppError>;

    /// Permanently removes data this dataset archived within itself.
    async fn delete_archived_dataset_data(&self, dataset: &Dataset) -> Result<usize, AppError>;

    /// Deletes the dataset's data last modified strictly before `before`.
    async fn delete_other_dataset_data(
        &self,
        dataset: &Dataset,
        before: DateTime<Utc>,
    ) -> Result<usize, AppError>;

    async fn delete_dataset_data(&self, dataset: &Dataset) -> Result<usize, AppError>;

    async fn find_earliest_dataset_data_time(
        &self,
        dataset: &Dataset,
    ) -> Result<Option<DateTime<Utc>>, AppError>;

    /// Archives active data of other datasets on the same device at or after `from`.
    async fn archive_device_data_from_time(
        &self,
        dataset: &Dataset,
        from: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<usize, AppError>;

    /// Which of `hashes` already exist for the dataset's user and device.
    async fn find_device_data_hashes(
        &self,
        dataset: &Dataset,
        hashes: &[String],
    ) -> Result<HashSet<String>, AppError>;
}

fn device_scope(dataset: &Dataset) -> Result<(String, String), AppError> {
    let device_id = dataset.device_id().ok_or_else(|| {
        AppError::Validation(format!("dataset {} has no device id", dataset.id))
    })?;
    Ok((dataset.user_id.clone(), device_id.to_string()))
}

#[derive(Debug, Deserialize)]
struct DeviceTimeRow {
    device_time: SurrealDatetime,
}

#[async_trait]
impl DataRepository for SurrealDbClient {
    async fn get_dataset(&self, id: &str) -> Result<Option<Dataset>, AppError> {
        Ok(self.get_item::<Dataset>(id).await?)
    }

    async fn update_dataset(&self, dataset: &Dataset) -> Result<Dataset, AppError> {
        let mut updated = dataset.clone();
        updated.updated_at = Utc::now();
        self.upsert_item(updated.clone()).await?;
        Ok(updated)
    }

    async fn delete_dataset(&self, dataset: &Dataset) -> Result<(), AppError> {
        self.delete_item::<Dataset>(&dataset.id).await?;
        Ok(())
    }

    async fn create_dataset_data(&self, data: &[Datum]) -> Result<usize, AppError> {
        for datum in data {
            self.upsert_item(datum.clone()).await?;
        }
        Ok(data.len())
    }

    async fn list_dataset_data(&self, dataset_id: &str) -> Result<Vec<Datum>, AppError> {
        let data: Vec<Datum> = self
            .query(
                "SELECT * FROM type::table($table)
                 WHERE dataset_id = $dataset_id
                 ORDER BY device_time ASC",
            )
            .bind(("table", Datum::table_name()))
            .bind(("dataset_id", dataset_id.to_string()))
            .await?
            .take(0)?;
        Ok(data)
    }

    async fn activate_dataset_data(
        &self,
        dataset: &Dataset,
        at: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        let updated: Vec<Datum> = self
            .query(
                "UPDATE type::table($table)
                 SET active = true, modified_time = $now
                 WHERE dataset_id = $dataset_id AND active = false AND archived_time = NONE
                 RETURN AFTER",
            )
            .bind(("table", Datum::table_name()))
            .bind(("dataset_id", dataset.id.clone()))
            .bind(("now", SurrealDatetime::from(at)))
            .await?
            .take(0)?;
        Ok(updated.len())
    }

    async fn archive_device_data_using_hashes_from_dataset(
        &self,
        dataset: &Dataset,
        at: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        let (user_id, device_id) = device_scope(dataset)?;

        const ARCHIVE_BY_HASH_QUERY: &str = r#"
            LET $hashes = (
                SELECT VALUE deduplicator.hash FROM type::table($table)
                WHERE dataset_id = $dataset_id AND deduplicator.hash != NONE
            );
            UPDATE type::table($table)
            SET active = false,
                archived_time = $now,
                archived_dataset_id = $dataset_id,
                modified_time = $now
            WHERE user_id = $user_id
              AND device_id = $device_id
              AND dataset_id != $dataset_id
              AND active = true
              AND deduplicator.hash INSIDE $hashes
            RETURN AFTER;
        "#;

        let mut response = self
            .query(ARCHIVE_BY_HASH_QUERY)
            .bind(("table", Datum::table_name()))
            .bind(("dataset_id", dataset.id.clone()))
            .bind(("user_id", user_id))
            .bind(("device_id", device_id))
            .bind(("now", SurrealDatetime::from(at)))
            .await?;
        let archived: Vec<Datum> = response.take(1)?;
        Ok(archived.len())
    }

    async fn unarchive_device_data_using_hashes_from_dataset(
        &self,
        dataset: &Dataset,
        at: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        let restored: Vec<Datum> = self
            .query(
                "UPDATE type::table($table)
                 SET active = true,
                     archived_time = NONE,
                     archived_dataset_id = NONE,
                     modified_time = $now
                 WHERE archived_dataset_id = $dataset_id
                   AND dataset_id != $dataset_id
                   AND active = false
                 RETURN AFTER",
            )
            .bind(("table", Datum::table_name()))
            .bind(("dataset_id", dataset.id.clone()))
            .bind(("now", SurrealDatetime::from(at)))
            .await?
            .take(0)?;
        Ok(restored.len())
    }

    async fn archive_dataset_data_using_origin_ids(
        &self,
        dataset: &Dataset,
        origin_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        if origin_ids.is_empty() {
            return Ok(0);
        }

        let archived: Vec<Datum> = self
            .query(
                "UPDATE type::table($table)
                 SET active = false,
                     archived_time = $now,
                     archived_dataset_id = $dataset_id,
                     modified_time = $now
                 WHERE dataset_id = $dataset_id
                   AND archived_time = NONE
                   AND origin.id INSIDE $origin_ids
                 RETURN AFTER",
            )
            .bind(("table", Datum::table_name()))
            .bind(("dataset_id", dataset.id.clone()))
            .bind(("origin_ids", origin_ids.to_vec()))
            .bind(("now", SurrealDatetime::from(at)))
            .await?
            .take(0)?;
        Ok(archived.len())
    }

    async fn delete_archived_dataset_data(&self, dataset: &Dataset) -> Result<usize, AppError> {
        let deleted: Vec<Datum> = self
            .query(
                "DELETE type::table($table)
                 WHERE dataset_id = $dataset_id
                   AND archived_dataset_id = $dataset_id
                   AND active = false
                 RETURN BEFORE",
            )
            .bind(("table", Datum::table_name()))
            .bind(("dataset_id", dataset.id.clone()))
            .await?
            .take(0)?;
        Ok(deleted.len())
    }

    async fn delete_other_dataset_data(
        &self,
        dataset: &Dataset,
        before: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        let deleted: Vec<Datum> = self
            .query(
                "DELETE type::table($table)
                 WHERE dataset_id = $dataset_id
                   AND modified_time != NONE
                   AND modified_time < $before
                 RETURN BEFORE",
            )
            .bind(("table", Datum::table_name()))
            .bind(("dataset_id", dataset.id.clone()))
            .bind(("before", SurrealDatetime::from(before)))
            .await?
            .take(0)?;
        Ok(deleted.len())
    }

    async fn delete_dataset_data(&self, dataset: &Dataset) -> Result<usize, AppError> {
        let deleted: Vec<Datum> = self
            .query("DELETE type::table($table) WHERE dataset_id = $dataset_id RETURN BEFORE")
            .bind(("table", Datum::table_name()))
            .bind(("dataset_id", dataset.id.clone()))
            .await?
            .take(0)?;
        Ok(deleted.len())
    }

    async fn find_earliest_dataset_data_time(
        &self,
        dataset: &Dataset,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let row: Option<DeviceTimeRow> = self
            .query(
                "SELECT device_time FROM type::table($table)
                 WHERE dataset_id = $dataset_id
                 ORDER BY device_time ASC
                 LIMIT 1",
            )
            .bind(("table", Datum::table_name()))
            .bind(("dataset_id", dataset.id.clone()))
            .await?
            .take(0)?;
        Ok(row.map(|row| DateTime::<Utc>::from(row.device_time)))
    }

    async fn archive_device_data_from_time(
        &self,
        dataset: &Dataset,
        from: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        let (user_id, device_id) = device_scope(dataset)?;

        let archived: Vec<Datum> = self
            .query(
                "UPDATE type::table($table)
                 SET active = false,
                     archived_time = $now,
                     archived_dataset_id = $dataset_id,
                     modified_time = $now
                 WHERE user_id = $user_id
                   AND device_id = $device_id
                   AND dataset_id != $dataset_id
                   AND active = true
                   AND device_time >= $from
                 RETURN AFTER",
            )
            .bind(("table", Datum::table_name()))
            .bind(("dataset_id", dataset.id.clone()))
            .bind(("user_id", user_id))
            .bind(("device_id", device_id))
            .bind(("from", SurrealDatetime::from(from)))
            .bind(("now", SurrealDatetime::from(at)))
            .await?
            .take(0)?;
        Ok(archived.len())
    }

    async fn find_device_data_hashes(
        &self,
        dataset: &Dataset,
        hashes: &[String],
    ) -> Result<HashSet<String>, AppError> {
        if hashes.is_empty() {
            return Ok(HashSet::new());
        }
        let (user_id, device_id) = device_scope(dataset)?;

        let found: Vec<String> = self
            .query(
                "SELECT VALUE deduplicator.hash FROM type::table($table)
                 WHERE user_id = $user_id
                   AND device_id = $device_id
                   AND deduplicator.hash INSIDE $hashes",
            )
            .bind(("table", Datum::table_name()))
            .bind(("user_id", user_id))
            .bind(("device_id", device_id))
            .bind(("hashes", hashes.to_vec()))
            .await?
            .take(0)?;
        Ok(found.into_iter().collect())
    }
}
