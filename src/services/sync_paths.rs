//! Archive layout on every storage backend
//!
//! Directory structure:
//! ```text
//! M4M/
//! └── <controller-id>/
//!     └── <sensor-id>/
//!         ├── .<sensor name>        # zero-byte name marker
//!         ├── 2024.01.01.m4m        # one archive per day with data
//!         └── 2024.01.03.m4m
//! ```

use crate::models::sensor::UNNAMED_SENSOR;
use chrono::{Datelike, NaiveDate};

/// Top-level folder, created on first use
pub const ROOT: &str = "M4M";

/// Archive file extension
pub const ARCHIVE_EXTENSION: &str = "m4m";

/// Prefix of the zero-byte file carrying the sensor's display name
pub const NAME_MARKER_PREFIX: &str = ".";

/// Joins path segments below the root folder
pub fn join(parts: &[&str]) -> String {
    let mut path = String::from(ROOT);
    for part in parts {
        let part = part.trim_matches('/');
        if !part.is_empty() {
            path.push('/');
            path.push_str(part);
        }
    }
    path
}

/// Build controller directory path
pub fn controller_path(controller_id: &str) -> String {
    join(&[controller_id])
}

/// Build sensor directory path
pub fn sensor_path(controller_id: &str, sensor_id: &str) -> String {
    join(&[controller_id, sensor_id])
}

/// Archive file name for a day, zero-padded: `YYYY.MM.DD.m4m`
pub fn archive_file_name(day: NaiveDate) -> String {
    format!(
        "{:04}.{:02}.{:02}.{}",
        day.year(),
        day.month(),
        day.day(),
        ARCHIVE_EXTENSION
    )
}

/// Full archive path for a sensor and day
pub fn archive_path(controller_id: &str, sensor_id: &str, day: NaiveDate) -> String {
    join(&[controller_id, sensor_id, &archive_file_name(day)])
}

/// Name marker file for a sensor display name
pub fn name_marker_file_name(sensor_name: &str) -> String {
    format!("{}{}", NAME_MARKER_PREFIX, marker_safe_name(sensor_name))
}

/// Display name usable as a single path segment
///
/// Separators and control characters become `_`. Blank names and names made
/// of dots only fall back to [`UNNAMED_SENSOR`].
pub fn marker_safe_name(sensor_name: &str) -> String {
    let cleaned: String = sensor_name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        UNNAMED_SENSOR.to_string()
    } else {
        cleaned
    }
}

pub fn is_name_marker(file_name: &str) -> bool {
    file_name.starts_with(NAME_MARKER_PREFIX)
}

/// Display name encoded in a marker file name
pub fn sensor_name_from_marker(file_name: &str) -> Option<&str> {
    file_name.strip_prefix(NAME_MARKER_PREFIX)
}

/// Day encoded in an archive file name; accepts the legacy unpadded form
pub fn day_from_archive_name(file_name: &str) -> Option<NaiveDate> {
    let stem = file_name.strip_suffix(ARCHIVE_EXTENSION)?.strip_suffix('.')?;
    let mut parts = stem.split('.');
    let year = parts.next()?.parse().ok()?;
    let month = parts.next()?.parse().ok()?;
    let day = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}
