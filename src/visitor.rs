use crate::record::{ExceptionInfo, FieldValue, Message, Traceback};
use serde_json::{Map, Value};
use std::error::Error;
use tracing::field::{Field, Visit};

/// Field carrying the event's formatted message.
pub const MESSAGE_FIELD: &str = "message";

/// Field carrying a structured payload, e.g. `payload = %json!({..})`.
pub const PAYLOAD_FIELD: &str = "payload";

/// Error-valued field rendered as the event's exception.
pub const EXC_INFO_FIELD: &str = "exc_info";

/// String field holding exception text rendered elsewhere. A string
/// `exc_info` field is treated the same way.
pub const EXC_TEXT_FIELD: &str = "exc_text";

/// Collects the fields of a `tracing` event into log record parts.
#[derive(Debug, Default)]
pub struct FieldVisitor {
    pub message: Option<String>,
    pub payload: Option<Map<String, Value>>,
    pub exc_info: Option<ExceptionInfo>,
    pub exc_text: Option<String>,
    pub extra: Vec<(String, FieldValue)>,
}

impl FieldVisitor {
    /// The event message: the payload if one was attached, else the text.
    pub fn take_message(&mut self) -> Message {
        match self.payload.take() {
            Some(payload) => Message::Structured(payload),
            None => Message::plain(self.message.take().unwrap_or_default()),
        }
    }

    fn push(&mut self, field: &Field, value: FieldValue) {
        self.extra.push((field.name().to_string(), value));
    }

    fn record_text(&mut self, field: &Field, text: String) {
        match field.name() {
            MESSAGE_FIELD => self.message = Some(text),
            EXC_TEXT_FIELD | EXC_INFO_FIELD => self.exc_text = Some(text),
            PAYLOAD_FIELD => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(payload)) => self.payload = Some(payload),
                _ => self.push(field, FieldValue::Json(Value::String(text))),
            },
            _ => self.push(field, FieldValue::Json(Value::String(text))),
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_text(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, value.into());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        let exc = ExceptionInfo::from_dyn(value);
        if field.name() == EXC_INFO_FIELD {
            // Captured here, on the thread that emitted the event.
            self.exc_info = Some(exc.with_traceback(Traceback::capture()));
        } else {
            self.push(field, FieldValue::Exception(exc));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_text(field, format!("{:?}", value));
    }
}

