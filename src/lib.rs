//! Incremental archiving of sensor readings
//!
//! Readings are pulled from a [`database::DataSource`], rendered one
//! calendar day at a time by a [`services::RecordSerializer`], optionally
//! encrypted by a [`services::StreamTransform`] and stored as
//! `M4M/{controller}/{sensor}/{YYYY}.{MM}.{DD}.m4m` on a
//! [`services::StorageBackend`] (local directory, WebDAV or the cloud drive
//! preset). [`services::SyncEngine`] fills in missing days,
//! [`services::RetrievalEngine`] reads them back.

pub mod database;
pub mod error;
pub mod models;
pub mod services;

pub use error::{SyncError, SyncResult};
