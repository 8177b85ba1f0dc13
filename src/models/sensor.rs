use serde::{Deserialize, Serialize};
use std::fmt;

/// Collection hub that owns a set of sensors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controller {
    pub id: String,
    pub name: String,
    pub mac: String,
}

/// A sensor as known to the data source
///
/// Identity is the id alone: two sensors with the same id but different
/// display names are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sensor {
    pub id: String,
    pub name: String,
    pub controller_id: String,
}

impl Sensor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, controller_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            controller_id: controller_id.into(),
        }
    }
}

impl PartialEq for Sensor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Sensor {}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Display name used when a sensor directory has no name marker
pub const UNNAMED_SENSOR: &str = "No Name";

/// Lightweight sensor view reconstructed from storage listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSensor {
    pub id: String,
    pub name: String,
    pub controller_id: Option<String>,
}

impl RemoteSensor {
    /// Parses a `"{id}.{name}"` directory name
    ///
    /// Returns `None` unless the name holds exactly one separator.
    pub fn from_name(name: &str) -> Option<Self> {
        let mut parts = name.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(sensor_name), None) => Some(Self {
                id: id.to_string(),
                name: sensor_name.to_string(),
                controller_id: None,
            }),
            _ => None,
        }
    }
}

impl PartialEq for RemoteSensor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl PartialEq<Sensor> for RemoteSensor {
    fn eq(&self, other: &Sensor) -> bool {
        self.id == other.id
    }
}
