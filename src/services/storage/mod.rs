//! Storage backends holding the archives
//!
//! Every backend offers the same small capability set and returns
//! listings as [`RemoteFile`] entries sorted by name, so the layout logic in
//! [`crate::services::archive_store`] never sees backend specifics.

pub mod local;
pub mod webdav;

use crate::error::SyncResult;
use crate::models::RemoteFile;
use async_trait::async_trait;
use std::io::Read;

pub use local::LocalBackend;
pub use webdav::{WebDavBackend, CLOUD_WEBDAV_ENDPOINT};

/// Readable archive content; dropping it releases the underlying handle
pub type DownloadStream = Box<dyn Read + Send>;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short human readable location for logs
    fn describe(&self) -> String;

    /// Entries directly below `path`, never including `path` itself
    async fn list(&self, path: &str) -> SyncResult<Vec<RemoteFile>>;

    async fn create_folder(&self, path: &str) -> SyncResult<()>;

    /// Creates or replaces the file at `path`
    async fn upload(&self, bytes: Vec<u8>, path: &str) -> SyncResult<()>;

    async fn open_download_stream(&self, path: &str) -> SyncResult<DownloadStream>;

    async fn remove(&self, path: &str) -> SyncResult<()>;
}

/// Strips leading slashes so paths join the same way on every backend
pub fn normalize_path(path: &str) -> &str {
    path.trim_start_matches('/')
}

pub(crate) fn sort_entries(mut entries: Vec<RemoteFile>) -> Vec<RemoteFile> {
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/M4M/c1"), "M4M/c1");
        assert_eq!(normalize_path("M4M"), "M4M");
        assert_eq!(normalize_path("/"), "");
    }
}
