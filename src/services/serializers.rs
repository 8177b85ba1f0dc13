//! Rendering of a day's readings into archive bytes
//!
//! - `raw`: TSV with the full JSON payload plus base64 signer and signature,
//!   preserving everything needed to verify provenance later.
//! - `verbose`: CSV for humans, one column per value channel.
//!
//! Both write nothing at all for an empty input and never reorder records.

use crate::error::{SyncError, SyncResult};
use crate::models::SensorDataRecord;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io::Write;
use std::str::FromStr;

const RAW_DELIMITER: char = '\t';
const CSV_LINE_END: &str = "\r\n";

/// Archive row format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerFormat {
    #[default]
    Raw,
    Verbose,
}

impl SerializerFormat {
    pub fn serializer(&self) -> Box<dyn RecordSerializer> {
        match self {
            SerializerFormat::Raw => Box::new(RawSerializer),
            SerializerFormat::Verbose => Box::new(VerboseSerializer),
        }
    }
}

impl FromStr for SerializerFormat {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            // Legacy class names are still accepted
            "raw" | "csvrawserializer" => Ok(SerializerFormat::Raw),
            "verbose" | "csvverboseserializer" => Ok(SerializerFormat::Verbose),
            other => Err(SyncError::Configuration(format!(
                "unknown serializer '{}', expected raw or verbose",
                other
            ))),
        }
    }
}

impl fmt::Display for SerializerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializerFormat::Raw => f.write_str("raw"),
            SerializerFormat::Verbose => f.write_str("verbose"),
        }
    }
}

/// Turns an ordered run of records into bytes on `out`
pub trait RecordSerializer: Send + Sync {
    fn serialize(&self, out: &mut dyn Write, records: &[SensorDataRecord]) -> SyncResult<()>;
}

/// `value<TAB>signer<TAB>sign` rows, JSON payload and base64 provenance
pub struct RawSerializer;

impl RecordSerializer for RawSerializer {
    fn serialize(&self, out: &mut dyn Write, records: &[SensorDataRecord]) -> SyncResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let d = RAW_DELIMITER;
        write!(out, "value{d}signer{d}sign\n")?;

        for record in records {
            // serde_json never emits raw tabs or newlines in compact form
            let value = serde_json::to_string(&record.payload)?;
            write!(
                out,
                "{}{d}{}{d}{}\n",
                value,
                encode_optional(record.signer_identity.as_deref()),
                encode_optional(record.signature.as_deref()),
            )?;
        }
        Ok(())
    }
}

fn encode_optional(bytes: Option<&[u8]>) -> String {
    match bytes {
        Some(bytes) if !bytes.is_empty() => base64::engine::general_purpose::STANDARD.encode(bytes),
        _ => String::new(),
    }
}

/// Human readable CSV; multi-channel values are pivoted into columns
pub struct VerboseSerializer;

impl RecordSerializer for VerboseSerializer {
    fn serialize(&self, out: &mut dyn Write, records: &[SensorDataRecord]) -> SyncResult<()> {
        let Some(first) = records.first() else {
            return Ok(());
        };

        match first.value_field() {
            Some(Value::Object(channels)) => {
                let columns: Vec<String> = channels.keys().cloned().collect();

                let mut header = vec!["timestamp".to_string()];
                header.extend(columns.iter().cloned());
                write_csv_row(out, &header)?;

                for record in records {
                    let mut row = vec![render_cell(record.timestamp_field())];
                    match record.value_field() {
                        Some(Value::Object(values)) => {
                            if values.keys().any(|key| !channels.contains_key(key)) {
                                log::debug!(
                                    "Sensor {}: dropping channels not present in first record",
                                    record.sensor_id
                                );
                            }
                            row.extend(columns.iter().map(|column| render_cell(values.get(column))));
                        }
                        _ => row.extend(columns.iter().map(|_| String::new())),
                    }
                    write_csv_row(out, &row)?;
                }
            }
            _ => {
                write_csv_row(out, &["timestamp".to_string(), "value".to_string()])?;
                for record in records {
                    write_csv_row(
                        out,
                        &[
                            render_cell(record.timestamp_field()),
                            render_cell(record.value_field()),
                        ],
                    )?;
                }
            }
        }
        Ok(())
    }
}

fn render_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn write_csv_row(out: &mut dyn Write, fields: &[String]) -> SyncResult<()> {
    let line = fields
        .iter()
        .map(|field| escape_csv(field))
        .collect::<Vec<_>>()
        .join(",");
    out.write_all(line.as_bytes())?;
    out.write_all(CSV_LINE_END.as_bytes())?;
    Ok(())
}

fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
