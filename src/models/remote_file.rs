use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Directory listing entry, identical across storage backends
///
/// Equality and hashing only look at the name and the kind, `size` is
/// informational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    pub is_dir: bool,
    /// Byte length for files when the backend reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl RemoteFile {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size: None,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn is_empty_file(&self) -> bool {
        !self.is_dir && self.size == Some(0)
    }
}

impl PartialEq for RemoteFile {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.is_dir == other.is_dir
    }
}

impl Eq for RemoteFile {}

impl Hash for RemoteFile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.is_dir.hash(state);
    }
}

// Against a bare name only the name is compared
impl PartialEq<str> for RemoteFile {
    fn eq(&self, other: &str) -> bool {
        self.name == other
    }
}

impl PartialEq<&str> for RemoteFile {
    fn eq(&self, other: &&str) -> bool {
        self.name == *other
    }
}

impl PartialEq<String> for RemoteFile {
    fn eq(&self, other: &String) -> bool {
        &self.name == other
    }
}

impl fmt::Display for RemoteFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Whether `files` has an entry called `name`, file or directory
pub fn contains_name(files: &[RemoteFile], name: &str) -> bool {
    files.iter().any(|file| file == name)
}
