use crate::models::time_range::parse_timestamp;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One reading as stored by the data source
///
/// `payload` carries at least a `timestamp` field and usually a `value`
/// that is either a scalar or a map of channel name to scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDataRecord {
    pub sensor_id: String,
    pub payload: Value,
    pub signature: Option<Vec<u8>>,
    pub signer_identity: Option<Vec<u8>>,
}

impl SensorDataRecord {
    pub fn new(sensor_id: impl Into<String>, payload: Value) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            payload,
            signature: None,
            signer_identity: None,
        }
    }

    pub fn with_signature(mut self, signer: Vec<u8>, signature: Vec<u8>) -> Self {
        self.signer_identity = Some(signer);
        self.signature = Some(signature);
        self
    }

    pub fn timestamp_field(&self) -> Option<&Value> {
        self.payload.get("timestamp")
    }

    pub fn value_field(&self) -> Option<&Value> {
        self.payload.get("value")
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamp_field()
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
    }
}
