use rusqlite::{Connection, Result};

/// Initialize the sensor database schema
///
/// The sync only reads these tables; creating them lets a fresh database
/// (or a test fixture) be used as a data source.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Schema version table for future migrations
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        create_schema(conn)?;
        conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
    }

    Ok(())
}

/// Create the complete schema (version 1)
fn create_schema(conn: &Connection) -> Result<()> {
    // Table: controllers (collection hubs)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS controllers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            mac TEXT NOT NULL
        )",
        [],
    )?;

    // Table: sensors
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sensors (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            controller_id TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sensors_controller ON sensors(controller_id)",
        [],
    )?;

    // Table: sensor_data (JSON payload with a timestamp field, optional signature)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sensor_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sensor_id TEXT NOT NULL,
            data TEXT NOT NULL,
            sign BLOB,
            signer BLOB,
            FOREIGN KEY (sensor_id) REFERENCES sensors(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sensor_data_sensor ON sensor_data(sensor_id)",
        [],
    )?;

    // Table: users_info (holds the archive encryption passphrase)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users_info (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            encrypt_key TEXT
        )",
        [],
    )?;

    // Table: users_social_tokens (cloud drive OAuth token)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users_social_tokens (
            user_id INTEGER PRIMARY KEY,
            yandex_disk TEXT
        )",
        [],
    )?;

    Ok(())
}
