pub mod record;
pub mod remote_file;
pub mod sensor;
pub mod sync_settings;
pub mod time_range;

pub use record::SensorDataRecord;
pub use remote_file::RemoteFile;
pub use sensor::{Controller, RemoteSensor, Sensor};
pub use sync_settings::{CloudSettings, SyncSettings, WebDavSettings};
pub use time_range::{parse_timestamp, TimePoint, TimeRange};
