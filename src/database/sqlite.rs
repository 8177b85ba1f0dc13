use super::{schema, DataSource};
use crate::error::{SyncError, SyncResult};
use crate::models::{parse_timestamp, Controller, Sensor, SensorDataRecord, TimeRange};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SQL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

// Timestamps are compared on their first 19 characters, the wall clock time
// without fraction or offset, matching `parse_timestamp`. The full string
// breaks ties within a second.

/// [`DataSource`] backed by a SQLite database
pub struct SqliteDataSource {
    conn: Mutex<Connection>,
}

impl SqliteDataSource {
    /// Opens an existing database file read-only, its schema is left as is
    pub fn open(path: &Path) -> SyncResult<Self> {
        if !path.exists() {
            return Err(SyncError::Configuration(format!(
                "database {} does not exist",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> SyncResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wraps `conn`, creating any missing tables
    pub fn from_connection(conn: Connection) -> SyncResult<Self> {
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> SyncResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Other("database connection lock poisoned".to_string()))
    }

    pub fn insert_controller(&self, controller: &Controller) -> SyncResult<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO controllers (id, name, mac) VALUES (?1, ?2, ?3)",
            params![controller.id, controller.name, controller.mac],
        )?;
        Ok(())
    }

    pub fn insert_sensor(&self, sensor: &Sensor) -> SyncResult<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO sensors (id, name, controller_id) VALUES (?1, ?2, ?3)",
            params![sensor.id, sensor.name, sensor.controller_id],
        )?;
        Ok(())
    }

    pub fn insert_record(&self, record: &SensorDataRecord) -> SyncResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sensor_data (sensor_id, data, sign, signer) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.sensor_id,
                serde_json::to_string(&record.payload)?,
                record.signature,
                record.signer_identity,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn set_encryption_key(&self, key: &str) -> SyncResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM users_info", [])?;
        conn.execute("INSERT INTO users_info (encrypt_key) VALUES (?1)", [key])?;
        Ok(())
    }

    pub fn set_cloud_token(&self, token: &str) -> SyncResult<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO users_social_tokens (user_id, yandex_disk) VALUES (1, ?1)",
            [token],
        )?;
        Ok(())
    }
}

impl DataSource for SqliteDataSource {
    fn list_controllers(&self) -> SyncResult<Vec<Controller>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, mac FROM controllers ORDER BY id")?;
        let controllers = stmt
            .query_map([], |row| {
                Ok(Controller {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    mac: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(controllers)
    }

    fn list_sensors(&self, controller: &Controller) -> SyncResult<Vec<Sensor>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, controller_id FROM sensors WHERE controller_id = ?1 ORDER BY id",
        )?;
        let sensors = stmt
            .query_map([&controller.id], |row| {
                Ok(Sensor {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    controller_id: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sensors)
    }

    fn first_record_timestamp(&self, sensor_id: &str) -> SyncResult<Option<NaiveDateTime>> {
        let raw: Option<String> = self
            .conn()?
            .query_row(
                "SELECT ts FROM (
                     SELECT id, json_extract(data, '$.timestamp') AS ts
                     FROM sensor_data WHERE sensor_id = ?1
                 )
                 WHERE julianday(substr(ts, 1, 19)) IS NOT NULL
                 ORDER BY julianday(substr(ts, 1, 19)) ASC, ts ASC, id ASC
                 LIMIT 1",
                [sensor_id],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            None => Ok(None),
            Some(raw) => parse_timestamp(&raw).map(Some).ok_or_else(|| {
                SyncError::Other(format!(
                    "sensor {}: unparsable timestamp '{}'",
                    sensor_id, raw
                ))
            }),
        }
    }

    fn records_in_range(
        &self,
        sensor_id: &str,
        range: &TimeRange,
    ) -> SyncResult<Vec<SensorDataRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT sensor_id, data, sign, signer FROM (
                 SELECT id, sensor_id, data, sign, signer,
                        json_extract(data, '$.timestamp') AS ts
                 FROM sensor_data WHERE sensor_id = ?1
             )
             WHERE julianday(substr(ts, 1, 19)) >= julianday(?2)
               AND julianday(substr(ts, 1, 19)) <= julianday(?3)
             ORDER BY julianday(substr(ts, 1, 19)) ASC, ts ASC, id ASC",
        )?;

        let rows = stmt
            .query_map(
                params![
                    sensor_id,
                    range.start().format(SQL_TIMESTAMP_FORMAT).to_string(),
                    range.end().format(SQL_TIMESTAMP_FORMAT).to_string(),
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<Vec<u8>>>(2)?,
                        row.get::<_, Option<Vec<u8>>>(3)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (sensor_id, data, signature, signer_identity) in rows {
            records.push(SensorDataRecord {
                sensor_id,
                payload: serde_json::from_str(&data)?,
                signature,
                signer_identity,
            });
        }
        Ok(records)
    }

    fn encryption_key(&self) -> SyncResult<Option<Vec<u8>>> {
        let key: Option<Option<String>> = self
            .conn()?
            .query_row(
                "SELECT encrypt_key FROM users_info ORDER BY id LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(key.flatten().filter(|k| !k.is_empty()).map(String::into_bytes))
    }

    fn cloud_token(&self) -> SyncResult<Option<String>> {
        let token: Option<Option<String>> = self
            .conn()?
            .query_row(
                "SELECT yandex_disk FROM users_social_tokens ORDER BY user_id LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token.flatten().filter(|t| !t.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn fixture() -> SqliteDataSource {
        let db = SqliteDataSource::open_in_memory().unwrap();
        db.insert_controller(&Controller {
            id: "c1".into(),
            name: "Barn".into(),
            mac: "00:11:22:33:44:55".into(),
        })
        .unwrap();
        db.insert_sensor(&Sensor::new("s1", "Kitchen", "c1")).unwrap();
        db.insert_sensor(&Sensor::new("s2", "Cellar", "c1")).unwrap();
        db.insert_sensor(&Sensor::new("s9", "Elsewhere", "c2")).unwrap();
        for ts in ["2024-01-03T10:00:00", "2024-01-01T23:59:59.5", "2024-01-03T00:00:00"] {
            db.insert_record(&SensorDataRecord::new(
                "s1",
                json!({"timestamp": ts, "value": 1}),
            ))
            .unwrap();
        }
        db
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_list_controllers_and_sensors() {
        let db = fixture();
        let controllers = db.list_controllers().unwrap();
        assert_eq!(controllers.len(), 1);
        let sensors = db.list_sensors(&controllers[0]).unwrap();
        let ids: Vec<&str> = sensors.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
    }

    #[test]
    fn test_first_record_timestamp_is_earliest() {
        let db = fixture();
        let first = db.first_record_timestamp("s1").unwrap().unwrap();
        assert_eq!(first.date(), day(2024, 1, 1));
        assert_eq!(db.first_record_timestamp("s2").unwrap(), None);
    }

    #[test]
    fn test_records_in_range_inclusive_and_ordered() {
        let db = fixture();
        let records = db
            .records_in_range("s1", &TimeRange::day(day(2024, 1, 3)))
            .unwrap();
        let stamps: Vec<&str> = records
            .iter()
            .map(|r| r.timestamp_field().and_then(|v| v.as_str()).unwrap())
            .collect();
        assert_eq!(stamps, vec!["2024-01-03T00:00:00", "2024-01-03T10:00:00"]);

        let late = db
            .records_in_range("s1", &TimeRange::day(day(2024, 1, 1)))
            .unwrap();
        assert_eq!(late.len(), 1);
        assert!(db
            .records_in_range("s1", &TimeRange::day(day(2024, 1, 2)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_signature_round_trips() {
        let db = fixture();
        db.insert_record(
            &SensorDataRecord::new("s2", json!({"timestamp": "2024-02-01T08:00:00", "value": 2}))
                .with_signature(vec![9, 9], vec![1, 2, 3]),
        )
        .unwrap();
        let records = db
            .records_in_range("s2", &TimeRange::day(day(2024, 2, 1)))
            .unwrap();
        assert_eq!(records[0].signature, Some(vec![1, 2, 3]));
        assert_eq!(records[0].signer_identity, Some(vec![9, 9]));
    }

    #[test]
    fn test_encryption_key_and_token() {
        let db = fixture();
        assert_eq!(db.encryption_key().unwrap(), None);
        assert_eq!(db.cloud_token().unwrap(), None);
        db.set_encryption_key("passphrase").unwrap();
        db.set_cloud_token("tok").unwrap();
        assert_eq!(db.encryption_key().unwrap(), Some(b"passphrase".to_vec()));
        assert_eq!(db.cloud_token().unwrap().as_deref(), Some("tok"));
    }

    #[test]
    fn test_open_missing_file_is_configuration_error() {
        let err = SqliteDataSource::open(Path::new("/definitely/not/here.db"))
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn test_open_is_read_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("m4m.db");
        {
            let db = SqliteDataSource::from_connection(Connection::open(&path).unwrap()).unwrap();
            db.insert_controller(&Controller {
                id: "c1".into(),
                name: "Barn".into(),
                mac: "00:11:22:33:44:55".into(),
            })
            .unwrap();
        }

        let db = SqliteDataSource::open(&path).unwrap();
        assert_eq!(db.list_controllers().unwrap().len(), 1);
        let err = db.insert_sensor(&Sensor::new("s1", "Kitchen", "c1")).unwrap_err();
        assert!(matches!(err, SyncError::Database(_)));
    }

    #[test]
    fn test_open_leaves_schema_untouched() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("m4m.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE controllers (id TEXT PRIMARY KEY, name TEXT, mac TEXT);
                 INSERT INTO controllers VALUES ('c1', 'Barn', '00:11');",
            )
            .unwrap();
        }

        let db = SqliteDataSource::open(&path).unwrap();
        assert_eq!(db.list_controllers().unwrap()[0].id, "c1");
        drop(db);

        let conn = Connection::open(&path).unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(tables, vec!["controllers".to_string()]);
    }
}
