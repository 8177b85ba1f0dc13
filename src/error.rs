use std::fmt;

/// Central error type for the archive sync
#[derive(Debug)]
pub enum SyncError {
    /// Storage backend unreachable or a request against it failed
    Connection(String),
    /// Archive bytes could not be decrypted (short stream, bad padding)
    CorruptArchive(String),
    /// Missing key, token or credentials; aborts the run before any sensor
    Configuration(String),
    /// Path does not exist on the backend
    NotFound(String),
    /// Database error (rusqlite)
    Database(rusqlite::Error),
    /// Filesystem error
    Filesystem(std::io::Error),
    /// JSON encoding/decoding error
    Serialization(serde_json::Error),
    /// General error
    Other(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyncError::Connection(msg) => write!(f, "Connection error: {}", msg),
            SyncError::CorruptArchive(msg) => write!(f, "Corrupt archive: {}", msg),
            SyncError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            SyncError::NotFound(msg) => write!(f, "Not found: {}", msg),
            SyncError::Database(e) => write!(f, "Database error: {}", e),
            SyncError::Filesystem(e) => write!(f, "Filesystem error: {}", e),
            SyncError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SyncError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Database(e) => Some(e),
            SyncError::Filesystem(e) => Some(e),
            SyncError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

// Conversions from other error types
impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::Database(e)
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => SyncError::NotFound(e.to_string()),
            // Raised by the decrypting reader on malformed ciphertext
            std::io::ErrorKind::InvalidData => SyncError::CorruptArchive(e.to_string()),
            _ => SyncError::Filesystem(e),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e)
    }
}

impl From<reqwest_dav::Error> for SyncError {
    fn from(e: reqwest_dav::Error) -> Self {
        use reqwest_dav::{DecodeError, ServerError, StatusMismatchedError};

        match e {
            // GET, PUT, DELETE and MKCOL report the status as a server error,
            // PROPFIND as a mismatch against 207
            reqwest_dav::Error::Decode(DecodeError::Server(ServerError {
                response_code: 404,
                message,
                ..
            })) => SyncError::NotFound(message),
            reqwest_dav::Error::Decode(DecodeError::StatusMismatched(
                StatusMismatchedError {
                    response_code: 404,
                    ..
                },
            )) => SyncError::NotFound("PROPFIND returned 404".to_string()),
            reqwest_dav::Error::Reqwest(e) => SyncError::from(e),
            e => SyncError::Connection(format!("WebDAV error: {:?}", e)),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.status() == Some(reqwest::StatusCode::NOT_FOUND) {
            SyncError::NotFound(e.to_string())
        } else {
            SyncError::Connection(e.to_string())
        }
    }
}

impl SyncError {
    /// Whether this error must stop the whole run instead of a single sensor
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, SyncError::Configuration(_))
    }
}
