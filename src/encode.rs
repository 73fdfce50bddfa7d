use crate::error::EncodeError;
use crate::record::FieldValue;
use chrono::SecondsFormat;
use serde_json::{Map, Value};

/// Converts field values that have no direct JSON form.
///
/// `FieldValue::Json` values never reach the encoder; every other variant
/// does. Return an error to abort formatting of the whole record.
pub trait ValueEncoder: Send + Sync {
    fn encode(&self, value: &FieldValue) -> Result<Value, EncodeError>;
}

impl<F> ValueEncoder for F
where
    F: Fn(&FieldValue) -> Result<Value, EncodeError> + Send + Sync,
{
    fn encode(&self, value: &FieldValue) -> Result<Value, EncodeError> {
        self(value)
    }
}

/// Encoder used when no custom one is configured.
///
/// - dates and times become ISO-8601 strings;
/// - tracebacks become their stack text;
/// - exceptions become `"Exception: <message>"`;
/// - anything else becomes its string form.
#[derive(Clone, Copy, Debug, Default)]
pub struct FallbackEncoder;

impl ValueEncoder for FallbackEncoder {
    fn encode(&self, value: &FieldValue) -> Result<Value, EncodeError> {
        let text = match value {
            FieldValue::Json(v) => return Ok(v.clone()),
            FieldValue::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, false),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
            FieldValue::Traceback(tb) => tb.render(),
            FieldValue::Exception(exc) => format!("Exception: {}", exc.message),
            FieldValue::Other(s) => s.clone(),
        };
        Ok(Value::String(text))
    }
}

/// Run `encoder` on anything that is not already JSON.
pub fn encode_value(encoder: &dyn ValueEncoder, value: &FieldValue) -> Result<Value, EncodeError> {
    match value {
        FieldValue::Json(v) => Ok(v.clone()),
        other => encoder.encode(other),
    }
}

/// Turns the assembled output object into the final JSON text.
pub trait JsonSerializer: Send + Sync {
    fn serialize(&self, record: &Map<String, Value>) -> Result<String, serde_json::Error>;
}

impl<F> JsonSerializer for F
where
    F: Fn(&Map<String, Value>) -> Result<String, serde_json::Error> + Send + Sync,
{
    fn serialize(&self, record: &Map<String, Value>) -> Result<String, serde_json::Error> {
        self(record)
    }
}

/// Compact single-line output via `serde_json::to_string`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompactSerializer;

impl JsonSerializer for CompactSerializer {
    fn serialize(&self, record: &Map<String, Value>) -> Result<String, serde_json::Error> {
        serde_json::to_string(record)
    }
}

/// Last chance to rewrite the output object before it is serialized.
pub trait RecordProcessor: Send + Sync {
    fn process(&self, record: Map<String, Value>) -> Map<String, Value>;
}

impl<F> RecordProcessor for F
where
    F: Fn(Map<String, Value>) -> Map<String, Value> + Send + Sync,
{
    fn process(&self, record: Map<String, Value>) -> Map<String, Value> {
        self(record)
    }
}

/// Leaves the record untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl RecordProcessor for Identity {
    fn process(&self, record: Map<String, Value>) -> Map<String, Value> {
        record
    }
}
