//! Read side of the sensor database
//!
//! The sync engine only talks to the [`DataSource`] trait. The SQLite
//! implementation owns one connection opened at startup and passed around
//! by reference; nothing is opened lazily behind the caller's back.

pub mod schema;
pub mod sqlite;

use crate::error::SyncResult;
use crate::models::{Controller, Sensor, SensorDataRecord, TimeRange};
use chrono::NaiveDateTime;

pub use sqlite::SqliteDataSource;

/// Source of controllers, sensors and readings
pub trait DataSource: Send + Sync {
    fn list_controllers(&self) -> SyncResult<Vec<Controller>>;

    fn list_sensors(&self, controller: &Controller) -> SyncResult<Vec<Sensor>>;

    /// Timestamp of the sensor's earliest reading, `None` if it has none
    fn first_record_timestamp(&self, sensor_id: &str) -> SyncResult<Option<NaiveDateTime>>;

    /// Readings with `range.start <= timestamp <= range.end`, chronological
    fn records_in_range(
        &self,
        sensor_id: &str,
        range: &TimeRange,
    ) -> SyncResult<Vec<SensorDataRecord>>;

    /// Process-wide archive passphrase, fetched once per run
    fn encryption_key(&self) -> SyncResult<Option<Vec<u8>>>;

    /// OAuth token for the cloud drive preset
    fn cloud_token(&self) -> SyncResult<Option<String>> {
        Ok(None)
    }
}
