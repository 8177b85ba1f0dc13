use crate::error::{SyncError, SyncResult};
use crate::models::remote_file::contains_name;
use crate::models::sensor::UNNAMED_SENSOR;
use crate::models::{RemoteFile, RemoteSensor, Sensor};
use crate::services::storage::{DownloadStream, StorageBackend};
use crate::services::sync_paths::{self, ROOT};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Archive layout on top of any [`StorageBackend`]
///
/// Cloning is cheap, clones share the backend.
#[derive(Clone)]
pub struct ArchiveStore {
    backend: Arc<dyn StorageBackend>,
}

impl ArchiveStore {
    /// Wraps `backend`, creating the root folder if it is missing
    ///
    /// The check and the creation are two requests; a concurrent writer
    /// creating the root in between makes the second one fail. Acceptable
    /// for a single batch writer per storage.
    pub async fn open(backend: Arc<dyn StorageBackend>) -> SyncResult<Self> {
        let top = backend.list("/").await?;
        if !contains_name(&top, ROOT) {
            log::info!("Creating {} on {}", ROOT, backend.describe());
            backend.create_folder(ROOT).await?;
        }
        Ok(Self { backend })
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Controller ids present on the storage
    pub async fn controllers(&self) -> SyncResult<Vec<String>> {
        Ok(self
            .backend
            .list(ROOT)
            .await?
            .into_iter()
            .filter(|entry| entry.is_dir)
            .map(|entry| entry.name)
            .collect())
    }

    /// Sensors present below a controller, named after their marker file
    pub async fn sensors(&self, controller_id: &str) -> SyncResult<Vec<RemoteSensor>> {
        let mut sensors = Vec::new();
        for entry in self.backend.list(&sync_paths::controller_path(controller_id)).await? {
            if !entry.is_dir {
                continue;
            }
            // Older archives used "{id}.{name}" sensor directories
            if let Some(mut legacy) = RemoteSensor::from_name(&entry.name) {
                legacy.controller_id = Some(controller_id.to_string());
                sensors.push(legacy);
                continue;
            }

            let files = self
                .backend
                .list(&sync_paths::sensor_path(controller_id, &entry.name))
                .await?;
            let name = files
                .iter()
                .filter(|file| is_marker_file(file))
                .find_map(|file| sync_paths::sensor_name_from_marker(&file.name))
                .unwrap_or(UNNAMED_SENSOR);
            sensors.push(RemoteSensor {
                id: entry.name.clone(),
                name: name.to_string(),
                controller_id: Some(controller_id.to_string()),
            });
        }
        Ok(sensors)
    }

    /// Creates the controller directory if absent
    pub async fn prepare_controller(&self, controller_id: &str) -> SyncResult<()> {
        let controllers = self.backend.list(ROOT).await?;
        if !contains_name(&controllers, controller_id) {
            log::debug!("Creating controller directory {}", controller_id);
            self.backend
                .create_folder(&sync_paths::controller_path(controller_id))
                .await?;
        }
        Ok(())
    }

    /// Creates the sensor directory and its name marker, returns its content
    ///
    /// The controller directory must already exist.
    pub async fn prepare_sensor(&self, sensor: &Sensor) -> SyncResult<Vec<RemoteFile>> {
        let siblings = self
            .backend
            .list(&sync_paths::controller_path(&sensor.controller_id))
            .await?;
        let dir = sync_paths::sensor_path(&sensor.controller_id, &sensor.id);

        let files = if contains_name(&siblings, &sensor.id) {
            self.backend.list(&dir).await?
        } else {
            log::debug!("Creating sensor directory {}", dir);
            self.backend.create_folder(&dir).await?;
            Vec::new()
        };

        self.ensure_name_marker(sensor, &files).await?;
        self.backend.list(&dir).await
    }

    /// Leaves exactly one marker, `.{sensor.name}`, in the sensor directory
    ///
    /// Only zero-byte dotfiles count as markers; anything else starting with
    /// a dot is left untouched.
    pub async fn ensure_name_marker(&self, sensor: &Sensor, files: &[RemoteFile]) -> SyncResult<()> {
        let wanted = sync_paths::name_marker_file_name(&sensor.name);
        let dir = sync_paths::sensor_path(&sensor.controller_id, &sensor.id);

        let mut present = false;
        for file in files.iter().filter(|f| !f.is_dir && sync_paths::is_name_marker(&f.name)) {
            if file.name == wanted {
                present = true;
            } else if is_marker_file(file) {
                log::info!("Replacing stale name marker {}/{}", dir, file.name);
                self.backend.remove(&format!("{}/{}", dir, file.name)).await?;
            } else {
                log::debug!("Keeping {}/{}, not an empty marker", dir, file.name);
            }
        }

        if !present {
            self.backend
                .upload(Vec::new(), &format!("{}/{}", dir, wanted))
                .await?;
        }
        Ok(())
    }

    /// Archives of a sensor keyed by day, empty if the sensor is unknown
    pub async fn day_files(
        &self,
        controller_id: &str,
        sensor_id: &str,
    ) -> SyncResult<BTreeMap<NaiveDate, String>> {
        if !contains_name(&self.backend.list(ROOT).await?, controller_id) {
            return Ok(BTreeMap::new());
        }
        let sensors = self
            .backend
            .list(&sync_paths::controller_path(controller_id))
            .await?;
        if !contains_name(&sensors, sensor_id) {
            return Ok(BTreeMap::new());
        }

        let files = self
            .backend
            .list(&sync_paths::sensor_path(controller_id, sensor_id))
            .await?;
        Ok(archive_days(&files))
    }

    pub async fn upload_archive(
        &self,
        controller_id: &str,
        sensor_id: &str,
        day: NaiveDate,
        bytes: Vec<u8>,
    ) -> SyncResult<()> {
        let path = sync_paths::archive_path(controller_id, sensor_id, day);
        log::info!("Saving {} ({} bytes)", path, bytes.len());
        self.backend.upload(bytes, &path).await
    }

    /// Opens an archive by the file name found in [`ArchiveStore::day_files`]
    pub async fn open_archive(
        &self,
        controller_id: &str,
        sensor_id: &str,
        file_name: &str,
    ) -> SyncResult<DownloadStream> {
        let path = sync_paths::join(&[controller_id, sensor_id, file_name]);
        self.backend
            .open_download_stream(&path)
            .await
            .map_err(|e| match e {
                SyncError::NotFound(_) => SyncError::NotFound(path),
                other => other,
            })
    }
}

fn is_marker_file(file: &RemoteFile) -> bool {
    file.is_empty_file() && sync_paths::is_name_marker(&file.name)
}

/// Maps each archive in a listing to its day; markers and strays are ignored
pub fn archive_days(files: &[RemoteFile]) -> BTreeMap<NaiveDate, String> {
    files
        .iter()
        .filter(|file| !file.is_dir)
        .filter_map(|file| {
            sync_paths::day_from_archive_name(&file.name).map(|day| (day, file.name.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::LocalBackend;
    use std::io::Read;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> ArchiveStore {
        ArchiveStore::open(Arc::new(LocalBackend::new(dir.path())))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_root_once() {
        let dir = TempDir::new().unwrap();
        store(&dir).await;
        assert!(dir.path().join("M4M").is_dir());
        // Second open finds the root and leaves it alone
        store(&dir).await;
        assert!(dir.path().join("M4M").is_dir());
    }

    #[tokio::test]
    async fn test_prepare_sensor_creates_directory_and_marker() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let sensor = Sensor::new("42", "Kitchen", "c1");

        store.prepare_controller("c1").await.unwrap();
        let files = store.prepare_sensor(&sensor).await.unwrap();
        assert_eq!(files, vec![RemoteFile::file(".Kitchen")]);

        // Idempotent
        let files = store.prepare_sensor(&sensor).await.unwrap();
        assert_eq!(files, vec![RemoteFile::file(".Kitchen")]);
    }

    #[tokio::test]
    async fn test_stale_marker_is_replaced() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        std::fs::create_dir_all(dir.path().join("M4M/c1/42")).unwrap();
        std::fs::write(dir.path().join("M4M/c1/42/.Old name"), b"").unwrap();

        let files = store
            .prepare_sensor(&Sensor::new("42", "Kitchen", "c1"))
            .await
            .unwrap();
        assert_eq!(files, vec![RemoteFile::file(".Kitchen")]);
    }

    #[tokio::test]
    async fn test_foreign_dotfiles_survive() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let sensor_dir = dir.path().join("M4M/c1/42");
        std::fs::create_dir_all(&sensor_dir).unwrap();
        std::fs::write(sensor_dir.join(".DS_Store"), b"\0\0\0\x01Bud1").unwrap();
        std::fs::write(sensor_dir.join(".Old name"), b"").unwrap();

        let files = store
            .prepare_sensor(&Sensor::new("42", "Kitchen", "c1"))
            .await
            .unwrap();
        assert_eq!(
            files,
            vec![RemoteFile::file(".DS_Store"), RemoteFile::file(".Kitchen")]
        );
        assert!(sensor_dir.join(".DS_Store").is_file());
        assert!(!sensor_dir.join(".Old name").exists());

        // The non-empty dotfile is not mistaken for the display name
        let sensors = store.sensors("c1").await.unwrap();
        assert_eq!(sensors[0].name, "Kitchen");
    }

    #[tokio::test]
    async fn test_awkward_sensor_names_get_a_marker() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        store.prepare_controller("c1").await.unwrap();

        let files = store
            .prepare_sensor(&Sensor::new("42", "Temp/Humidity", "c1"))
            .await
            .unwrap();
        assert_eq!(files, vec![RemoteFile::file(".Temp_Humidity")]);

        let files = store
            .prepare_sensor(&Sensor::new("43", "", "c1"))
            .await
            .unwrap();
        assert_eq!(files, vec![RemoteFile::file(".No Name")]);
    }

    #[tokio::test]
    async fn test_inventory() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        store.prepare_controller("c1").await.unwrap();
        store
            .prepare_sensor(&Sensor::new("42", "Kitchen", "c1"))
            .await
            .unwrap();
        std::fs::create_dir_all(dir.path().join("M4M/c1/43")).unwrap();
        std::fs::create_dir_all(dir.path().join("M4M/c1/7.Cellar")).unwrap();

        assert_eq!(store.controllers().await.unwrap(), vec!["c1".to_string()]);
        let sensors = store.sensors("c1").await.unwrap();
        let summary: Vec<(&str, &str)> = sensors
            .iter()
            .map(|s| (s.id.as_str(), s.name.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![("42", "Kitchen"), ("43", UNNAMED_SENSOR), ("7", "Cellar")]
        );
        assert!(sensors.iter().all(|s| s.controller_id.as_deref() == Some("c1")));
    }

    #[tokio::test]
    async fn test_day_files_and_open_archive() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let day = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();

        assert!(store.day_files("c1", "42").await.unwrap().is_empty());

        store.prepare_controller("c1").await.unwrap();
        store
            .prepare_sensor(&Sensor::new("42", "Kitchen", "c1"))
            .await
            .unwrap();
        store
            .upload_archive("c1", "42", day, b"rows".to_vec())
            .await
            .unwrap();
        // Legacy unpadded name is recognised as well
        std::fs::write(dir.path().join("M4M/c1/42/2024.1.1.m4m"), b"old").unwrap();

        let days = store.day_files("c1", "42").await.unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[&day], "2024.01.03.m4m");

        let mut content = Vec::new();
        store
            .open_archive("c1", "42", &days[&day])
            .await
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content, b"rows");

        let missing = store.open_archive("c1", "42", "2030.01.01.m4m").await;
        assert!(matches!(missing, Err(SyncError::NotFound(_))));
    }
}
