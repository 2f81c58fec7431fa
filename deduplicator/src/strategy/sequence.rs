use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{repository::DataRepository, types::dataset::Dataset},
};

/// One idempotent store operation of a close or delete sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ArchiveDeviceDataUsingHashes,
    ActivateData,
    DeleteOtherData,
    ArchiveDeviceDataFromEarliestTime,
    UnarchiveDeviceDataUsingHashes,
    DeleteData,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::ArchiveDeviceDataUsingHashes => "archive_device_data_using_hashes",
            Step::ActivateData => "activate_data",
            Step::DeleteOtherData => "delete_other_data",
            Step::ArchiveDeviceDataFromEarliestTime => "archive_device_data_from_earliest_time",
            Step::UnarchiveDeviceDataUsingHashes => "unarchive_device_data_using_hashes",
            Step::DeleteData => "delete_data",
        }
    }

    /// Returns the number of data touched.
    ///
    /// `started_at` is the start of the whole sequence, stable across resumes.
    pub(crate) async fn run(
        self,
        repo: &dyn DataRepository,
        dataset: &Dataset,
        started_at: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        let now = Utc::now();
        match self {
            Step::ArchiveDeviceDataUsingHashes => {
                repo.archive_device_data_using_hashes_from_dataset(dataset, now)
                    .await
            }
            Step::ActivateData => repo.activate_dataset_data(dataset, now).await,
            Step::DeleteOtherData => repo.delete_other_dataset_data(dataset, started_at).await,
            Step::ArchiveDeviceDataFromEarliestTime => {
                match repo.find_earliest_dataset_data_time(dataset).await? {
                    Some(earliest) => {
                        repo.archive_device_data_from_time(dataset, earliest, now)
                            .await
                    }
                    None => Ok(0),
                }
            }
            Step::UnarchiveDeviceDataUsingHashes => {
                repo.unarchive_device_data_using_hashes_from_dataset(dataset, now)
                    .await
            }
            Step::DeleteData => repo.delete_dataset_data(dataset).await,
        }
    }
}
