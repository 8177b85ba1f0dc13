use crate::error::{SyncError, SyncResult};
use crate::services::serializers::SerializerFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Run configuration, loadable from a TOML file
///
/// Every field has a default so that a partial file (or none at all) is
/// valid; command line flags are applied on top.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    pub format: SerializerFormat,
    /// Sensors synced concurrently within one controller
    pub workers: usize,
    pub encrypt: bool,
    pub webdav: Option<WebDavSettings>,
    pub cloud: Option<CloudSettings>,
}

/// Connection data for a generic WebDAV server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebDavSettings {
    pub uri: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Cloud drive access; the token falls back to the one stored in the database
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CloudSettings {
    pub token: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            format: SerializerFormat::Raw,
            workers: 1,
            encrypt: true,
            webdav: None,
            cloud: None,
        }
    }
}

impl SyncSettings {
    /// Reads settings from a TOML file
    pub fn load(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> SyncResult<Self> {
        let settings: SyncSettings = toml::from_str(content)
            .map_err(|e| SyncError::Configuration(format!("invalid settings file: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.workers == 0 {
            return Err(SyncError::Configuration(
                "workers must be at least 1".to_string(),
            ));
        }
        if let Some(webdav) = &self.webdav {
            if webdav.uri.trim().is_empty() {
                return Err(SyncError::Configuration("webdav.uri is empty".to_string()));
            }
        }
        Ok(())
    }
}
