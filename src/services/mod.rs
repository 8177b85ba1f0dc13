pub mod archive_store;
pub mod retrieval_service;
pub mod serializers;
pub mod storage;
pub mod stream_cipher;
pub mod sync_paths;
pub mod sync_service;

pub use archive_store::ArchiveStore;
pub use retrieval_service::RetrievalEngine;
pub use serializers::{RecordSerializer, SerializerFormat};
pub use storage::{LocalBackend, StorageBackend, WebDavBackend};
pub use stream_cipher::StreamTransform;
pub use sync_service::{SensorOutcome, SensorReport, SyncEngine, SyncReport};
