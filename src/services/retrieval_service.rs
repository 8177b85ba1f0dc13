use crate::error::SyncResult;
use crate::models::TimeRange;
use crate::services::archive_store::ArchiveStore;
use crate::services::stream_cipher::StreamTransform;
use std::io::Read;

/// Reads archived days back from storage
#[derive(Clone)]
pub struct RetrievalEngine {
    store: ArchiveStore,
    transform: StreamTransform,
}

impl RetrievalEngine {
    pub fn new(store: ArchiveStore, transform: StreamTransform) -> Self {
        Self { store, transform }
    }

    /// Unwrapped content of every archived day in `range`, oldest first
    ///
    /// Days without an archive are left out. Archives that fail to decrypt
    /// are reported as [`crate::error::SyncError::CorruptArchive`].
    pub async fn fetch(
        &self,
        controller_id: &str,
        sensor_id: &str,
        range: &TimeRange,
    ) -> SyncResult<Vec<Vec<u8>>> {
        let archives = self.store.day_files(controller_id, sensor_id).await?;

        let mut days = Vec::new();
        for day in range.days() {
            let Some(file_name) = archives.get(&day) else {
                log::debug!("Sensor {}: no archive for {}", sensor_id, day);
                continue;
            };

            let stream = self
                .store
                .open_archive(controller_id, sensor_id, file_name)
                .await?;
            let mut content = Vec::new();
            // Decryption failures surface as InvalidData, i.e. CorruptArchive
            self.transform.reader(stream).read_to_end(&mut content)?;
            days.push(content);
        }

        log::info!(
            "Read {} archives of sensor {} for {}",
            days.len(),
            sensor_id,
            range
        );
        Ok(days)
    }
}
