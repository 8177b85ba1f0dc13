use super::{normalize_path, sort_entries, DownloadStream, StorageBackend};
use crate::error::SyncResult;
use crate::models::RemoteFile;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Archives in a directory of the local filesystem
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let relative = normalize_path(path);
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn list(&self, path: &str) -> SyncResult<Vec<RemoteFile>> {
        let mut dir = tokio::fs::read_dir(self.resolve(path)).await?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = entry.metadata().await?;
            entries.push(if metadata.is_dir() {
                RemoteFile::dir(name)
            } else {
                RemoteFile::file(name).with_size(metadata.len())
            });
        }
        Ok(sort_entries(entries))
    }

    async fn create_folder(&self, path: &str) -> SyncResult<()> {
        tokio::fs::create_dir_all(self.resolve(path)).await?;
        Ok(())
    }

    async fn upload(&self, bytes: Vec<u8>, path: &str) -> SyncResult<()> {
        tokio::fs::write(self.resolve(path), bytes).await?;
        Ok(())
    }

    async fn open_download_stream(&self, path: &str) -> SyncResult<DownloadStream> {
        let file = tokio::fs::File::open(self.resolve(path)).await?;
        Ok(Box::new(file.into_std().await))
    }

    async fn remove(&self, path: &str) -> SyncResult<()> {
        tokio::fs::remove_file(self.resolve(path)).await?;
        Ok(())
    }
}
