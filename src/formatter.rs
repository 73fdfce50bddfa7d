use crate::encode::{
    encode_value, CompactSerializer, FallbackEncoder, Identity, JsonSerializer, RecordProcessor,
    ValueEncoder,
};
use crate::error::FormatError;
use crate::record::{merge_record_extra, FieldValue, LogRecord, Message, RESERVED_ATTRS};
use crate::visitor::FieldVisitor;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt::{self, Write as _};
use std::path::Path;
use std::sync::LazyLock;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// `asctime` layout when no date format is configured.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

static FIELD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((.+?)\)").expect("valid field pattern"));

/// Field names referenced as `(name)` in a format pattern, in order.
///
/// Text outside the parentheses is ignored. A pattern with no
/// placeholders yields an empty list.
pub fn parse(pattern: &str) -> Vec<String> {
    FIELD_PATTERN
        .captures_iter(pattern)
        .map(|c| c[1].to_string())
        .collect()
}

/// Renders log records as single-line JSON objects.
///
/// The output object starts with the fields named in the format pattern,
/// in pattern order, followed by the message payload and any extra
/// attributes attached to the event. It is meant to be shared: all
/// configuration is fixed at construction.
///
/// ```ignore
/// let formatter = JsonRecordFormatter::new("(asctime) (levelname) (message)");
/// tracing_subscriber::fmt().event_format(formatter).init();
/// ```
pub struct JsonRecordFormatter {
    required_fields: Vec<String>,
    skip_fields: HashSet<String>,
    prefix: String,
    date_format: Option<String>,
    encoder: Box<dyn ValueEncoder>,
    serializer: Box<dyn JsonSerializer>,
    processor: Box<dyn RecordProcessor>,
    started: DateTime<Local>,
    process_name: Option<String>,
}

impl JsonRecordFormatter {
    /// Formatter with default encoding, serialization and no prefix.
    pub fn new(pattern: &str) -> Self {
        Self::from_parts(
            pattern,
            String::new(),
            None,
            Box::new(FallbackEncoder),
            Box::new(CompactSerializer),
            Box::new(Identity),
        )
    }

    pub fn builder(pattern: impl Into<String>) -> JsonRecordFormatterBuilder {
        JsonRecordFormatterBuilder::new(pattern)
    }

    fn from_parts(
        pattern: &str,
        prefix: String,
        date_format: Option<String>,
        encoder: Box<dyn ValueEncoder>,
        serializer: Box<dyn JsonSerializer>,
        processor: Box<dyn RecordProcessor>,
    ) -> Self {
        let required_fields = parse(pattern);
        let skip_fields = required_fields
            .iter()
            .cloned()
            .chain(RESERVED_ATTRS.iter().map(|s| s.to_string()))
            .collect();

        JsonRecordFormatter {
            required_fields,
            skip_fields,
            prefix,
            date_format,
            encoder,
            serializer,
            processor,
            started: Local::now(),
            process_name: current_process_name(),
        }
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Render one record as `prefix + json`, without a trailing newline.
    pub fn format(&self, record: &LogRecord) -> Result<String, FormatError> {
        let (mut payload, message) = match &record.msg {
            Message::Structured(payload) => (payload.clone(), None),
            plain => (Map::new(), plain.render()),
        };

        let asctime = if self.requires("asctime") {
            Some(self.format_time(&record.created)?)
        } else {
            None
        };

        // A caller-supplied `exc_info` in the payload wins over the record's.
        if is_falsy(payload.get("exc_info")) {
            if let Some(exc) = &record.exc_info {
                payload.insert("exc_info".to_string(), Value::String(exc.format()));
            } else if let Some(text) = &record.exc_text {
                payload.insert("exc_info".to_string(), Value::String(text.clone()));
            }
        }

        let mut log_record = Map::new();
        for field in &self.required_fields {
            let value = match field.as_str() {
                "message" => message.clone().map(Value::String).unwrap_or(Value::Null),
                "asctime" => asctime.clone().map(Value::String).unwrap_or(Value::Null),
                name => match record.attribute(name) {
                    Some(value) => self.encode(name, &value)?,
                    None => Value::Null,
                },
            };
            log_record.insert(field.clone(), value);
        }
        for (key, value) in payload {
            log_record.insert(key, value);
        }
        merge_record_extra(
            record,
            &mut log_record,
            |key| self.skip_fields.contains(key),
            |key, value| self.encode(key, value),
        )?;

        let log_record = self.processor.process(log_record);
        let json = self.serializer.serialize(&log_record)?;
        Ok(format!("{}{}", self.prefix, json))
    }

    /// Build a [`LogRecord`] from a `tracing` event.
    ///
    /// Thread and process details are taken from the calling thread, which
    /// for the `fmt` layer is the thread that emitted the event.
    pub fn record_from_event(&self, event: &Event<'_>) -> LogRecord {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let meta = event.metadata();
        let created = Local::now();
        let thread = std::thread::current();
        let relative_created = (created - self.started)
            .num_microseconds()
            .map(|us| us as f64 / 1000.0)
            .unwrap_or(0.0);

        LogRecord {
            created,
            level: *meta.level(),
            name: meta.target().to_string(),
            pathname: meta.file().map(str::to_string),
            filename: meta.file().and_then(|f| {
                Path::new(f)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            }),
            module: meta.module_path().map(str::to_string),
            lineno: meta.line(),
            func_name: None,
            thread: Some(format!("{:?}", thread.id())),
            thread_name: thread.name().map(str::to_string),
            process: std::process::id(),
            process_name: self.process_name.clone(),
            relative_created,
            msg: visitor.take_message(),
            exc_info: visitor.exc_info.take(),
            exc_text: visitor.exc_text.take(),
            stack_info: None,
            extra: std::mem::take(&mut visitor.extra),
        }
    }

    fn requires(&self, field: &str) -> bool {
        self.required_fields.iter().any(|f| f == field)
    }

    fn encode(&self, field: &str, value: &FieldValue) -> Result<Value, FormatError> {
        encode_value(&*self.encoder, value).map_err(|source| FormatError::Encode {
            field: field.to_string(),
            source,
        })
    }

    fn format_time(&self, created: &DateTime<Local>) -> Result<String, FormatError> {
        let format = self.date_format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT);
        let mut out = String::new();
        write!(out, "{}", created.format(format)).map_err(|_| FormatError::DateFormat {
            format: format.to_string(),
        })?;
        Ok(out)
    }
}

impl<S, N> FormatEvent<S, N> for JsonRecordFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'w> FormatFields<'w> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let record = self.record_from_event(event);
        let line = self.format(&record).map_err(|_| fmt::Error)?;
        writer.write_str(&line)?;
        writer.write_char('\n')
    }
}

/// Optional settings for [`JsonRecordFormatter`].
pub struct JsonRecordFormatterBuilder {
    pattern: String,
    prefix: String,
    date_format: Option<String>,
    encoder: Option<Box<dyn ValueEncoder>>,
    serializer: Option<Box<dyn JsonSerializer>>,
    processor: Option<Box<dyn RecordProcessor>>,
}

impl JsonRecordFormatterBuilder {
    pub fn new(pattern: impl Into<String>) -> Self {
        JsonRecordFormatterBuilder {
            pattern: pattern.into(),
            prefix: String::new(),
            date_format: None,
            encoder: None,
            serializer: None,
            processor: None,
        }
    }

    /// Text written before every JSON object.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// `strftime` format for `asctime`.
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = Some(format.into());
        self
    }

    /// Replace the fallback encoder for non-JSON values.
    pub fn encoder(mut self, encoder: impl ValueEncoder + 'static) -> Self {
        self.encoder = Some(Box::new(encoder));
        self
    }

    pub fn serializer(mut self, serializer: impl JsonSerializer + 'static) -> Self {
        self.serializer = Some(Box::new(serializer));
        self
    }

    /// Hook run on the assembled object before serialization.
    pub fn processor(mut self, processor: impl RecordProcessor + 'static) -> Self {
        self.processor = Some(Box::new(processor));
        self
    }

    /// **Returns**
    /// - `Err(FormatError::DateFormat)` if the date format has an invalid
    ///   specifier.
    pub fn build(self) -> Result<JsonRecordFormatter, FormatError> {
        if let Some(format) = &self.date_format {
            if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                return Err(FormatError::DateFormat {
                    format: format.clone(),
                });
            }
        }

        Ok(JsonRecordFormatter::from_parts(
            &self.pattern,
            self.prefix,
            self.date_format,
            self.encoder.unwrap_or_else(|| Box::new(FallbackEncoder)),
            self.serializer.unwrap_or_else(|| Box::new(CompactSerializer)),
            self.processor.unwrap_or_else(|| Box::new(Identity)),
        ))
    }
}

/// Missing, null, `false`, zero and empty values do not count as set.
fn is_falsy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => !b,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
    }
}

fn current_process_name() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    exe.file_stem().map(|s| s.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EncodeError;
    use crate::record::{ExceptionInfo, Traceback};
    use chrono::TimeZone;
    use serde_json::json;
    use tracing::Level;

    const PATTERN: &str = "(asctime) (levelname) (message)";

    fn parse_line(line: &str) -> Map<String, Value> {
        match serde_json::from_str(line).unwrap() {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn keys(map: &Map<String, Value>) -> Vec<&str> {
        map.keys().map(String::as_str).collect()
    }

    #[test]
    fn parse_extracts_parenthesized_names_in_order() {
        assert_eq!(parse(PATTERN), vec!["asctime", "levelname", "message"]);
        assert_eq!(
            parse("%(name)s [%(levelname)-8s] %(message)s"),
            vec!["name", "levelname", "message"]
        );
        assert_eq!(parse("(message) (message)"), vec!["message", "message"]);
        assert!(parse("no placeholders here").is_empty());
        assert!(parse("empty () parens").is_empty());
    }

    #[test]
    fn plain_message_emits_exactly_required_fields() {
        let formatter = JsonRecordFormatter::new(PATTERN);
        let record = LogRecord::new(Level::INFO, "app", "hello");

        let out = parse_line(&formatter.format(&record).unwrap());
        assert_eq!(keys(&out), vec!["asctime", "levelname", "message"]);
        assert_eq!(out["levelname"], json!("INFO"));
        assert_eq!(out["message"], json!("hello"));
        assert!(out["asctime"].is_string());
    }

    #[test]
    fn structured_message_is_merged_and_suppresses_text() {
        let formatter = JsonRecordFormatter::new(PATTERN);
        let Value::Object(payload) = json!({"user": "alice", "action": "login"}) else {
            unreachable!()
        };
        let record = LogRecord::new(Level::INFO, "app", payload);

        let out = parse_line(&formatter.format(&record).unwrap());
        assert_eq!(keys(&out), vec!["asctime", "levelname", "message", "user", "action"]);
        assert_eq!(out["message"], Value::Null);
        assert_eq!(out["user"], json!("alice"));
        assert_eq!(out["action"], json!("login"));
        assert_eq!(out["levelname"], json!("INFO"));
    }

    #[test]
    fn payload_wins_over_required_fields_and_extras() {
        let formatter = JsonRecordFormatter::new("(levelname) (name)");
        let Value::Object(payload) = json!({"name": "from-payload", "user": "payload-user"}) else {
            unreachable!()
        };
        let record = LogRecord::new(Level::WARN, "app", payload).with_extra("user", "extra-user");

        let out = parse_line(&formatter.format(&record).unwrap());
        assert_eq!(out["name"], json!("from-payload"));
        assert_eq!(out["user"], json!("payload-user"));
        assert_eq!(keys(&out), vec!["levelname", "name", "user"]);
    }

    #[test]
    fn reserved_and_private_extras_are_not_emitted() {
        let formatter = JsonRecordFormatter::new("(message) (levelname)");
        let record = LogRecord::new(Level::ERROR, "app", "boom")
            .with_extra("levelname", "spoofed")
            .with_extra("process", 1)
            .with_extra("_internal", true)
            .with_extra("request_id", "r-1");

        let out = parse_line(&formatter.format(&record).unwrap());
        assert_eq!(keys(&out), vec!["message", "levelname", "request_id"]);
        assert_eq!(out["levelname"], json!("ERROR"));
    }

    #[test]
    fn native_fields_round_trip() {
        let formatter = JsonRecordFormatter::new("");
        let expected = json!({
            "count": 3,
            "ratio": 0.25,
            "ok": true,
            "tags": ["a", "b"],
            "nested": {"k": null},
            "who": "bob",
        });
        let Value::Object(fields) = expected.clone() else {
            unreachable!()
        };
        let mut record = LogRecord::new(Level::DEBUG, "app", "ignored");
        for (key, value) in fields {
            record = record.with_extra(key, value);
        }

        let out = parse_line(&formatter.format(&record).unwrap());
        assert_eq!(Value::Object(out), expected);
    }

    #[test]
    fn exception_is_rendered_as_text() {
        let formatter = JsonRecordFormatter::new("(message)");
        let exc = ExceptionInfo::new("division by zero")
            .with_kind("ArithmeticError")
            .with_traceback(Traceback::new(vec!["  0: compute".into(), "  1: main".into()]));
        let record = LogRecord::new(Level::ERROR, "app", "failed").with_exception(exc);

        let out = parse_line(&formatter.format(&record).unwrap());
        let text = out["exc_info"].as_str().unwrap();
        assert!(text.starts_with("ArithmeticError: division by zero"));
        assert!(text.contains("1: main"));
    }

    #[test]
    fn payload_exc_info_overrides_record_exception() {
        let formatter = JsonRecordFormatter::new("(message)");
        let Value::Object(payload) = json!({"exc_info": "custom"}) else {
            unreachable!()
        };
        let record = LogRecord::new(Level::ERROR, "app", payload).with_exception(ExceptionInfo::new("real"));

        let out = parse_line(&formatter.format(&record).unwrap());
        assert_eq!(out["exc_info"], json!("custom"));
    }

    #[test]
    fn payload_exc_info_counts_only_when_truthy() {
        let formatter = JsonRecordFormatter::new("(message)");
        let with_payload = |payload: Value| {
            let Value::Object(payload) = payload else {
                unreachable!()
            };
            let record = LogRecord::new(Level::ERROR, "app", payload)
                .with_exception(ExceptionInfo::new("real").with_kind("IoError"));
            parse_line(&formatter.format(&record).unwrap())
        };

        assert_eq!(with_payload(json!({"exc_info": true}))["exc_info"], json!(true));
        assert_eq!(
            with_payload(json!({"exc_info": false}))["exc_info"],
            json!("IoError: real")
        );
        assert_eq!(with_payload(json!({"exc_info": ""}))["exc_info"], json!("IoError: real"));
    }

    #[test]
    fn repeated_field_in_pattern_is_emitted_once() {
        let formatter = JsonRecordFormatter::new("(message) (levelname) (message)");
        let record = LogRecord::new(Level::INFO, "app", "hello");

        let line = formatter.format(&record).unwrap();
        assert_eq!(line.matches("\"message\"").count(), 1);
        let out = parse_line(&line);
        assert_eq!(keys(&out), vec!["message", "levelname"]);
        assert_eq!(out["message"], json!("hello"));
    }

    #[test]
    fn cached_exception_text_is_used_without_exception() {
        let formatter = JsonRecordFormatter::new("(message)");
        let mut record = LogRecord::new(Level::ERROR, "app", "failed");
        record.exc_text = Some("Traceback text".into());

        let out = parse_line(&formatter.format(&record).unwrap());
        assert_eq!(out["exc_info"], json!("Traceback text"));
    }

    #[test]
    fn non_native_extras_use_fallback_encoder() {
        let formatter = JsonRecordFormatter::new("");
        let when = Local.with_ymd_and_hms(2024, 3, 14, 8, 0, 0).unwrap();
        let record = LogRecord::new(Level::INFO, "app", "x")
            .with_extra("when", when)
            .with_extra("cause", ExceptionInfo::new("timeout"))
            .with_extra("point", FieldValue::Other("Point(1, 2)".into()));

        let out = parse_line(&formatter.format(&record).unwrap());
        assert_eq!(out["when"], json!(when.fixed_offset().to_rfc3339()));
        assert_eq!(out["cause"], json!("Exception: timeout"));
        assert_eq!(out["point"], json!("Point(1, 2)"));
    }

    #[test]
    fn custom_encoder_failure_propagates() {
        let formatter = JsonRecordFormatter::builder("")
            .encoder(|v: &FieldValue| -> Result<Value, EncodeError> {
                Err(EncodeError::Unsupported { kind: v.kind() })
            })
            .build()
            .unwrap();
        let record = LogRecord::new(Level::INFO, "app", "x")
            .with_extra("fine", 1)
            .with_extra("bad", FieldValue::Other("?".into()));

        let err = formatter.format(&record).unwrap_err();
        assert!(matches!(err, FormatError::Encode { ref field, .. } if field == "bad"));
    }

    #[test]
    fn prefix_processor_and_serializer_are_applied() {
        let formatter = JsonRecordFormatter::builder("(levelname)")
            .prefix("@cee: ")
            .processor(|mut record: Map<String, Value>| {
                record.insert("service".into(), json!("billing"));
                record
            })
            .serializer(|record: &Map<String, Value>| serde_json::to_string_pretty(record))
            .build()
            .unwrap();
        let record = LogRecord::new(Level::INFO, "app", "x");

        let line = formatter.format(&record).unwrap();
        let json = line.strip_prefix("@cee: ").unwrap();
        assert!(json.contains('\n'));
        assert_eq!(
            Value::Object(parse_line(json)),
            json!({"levelname": "INFO", "service": "billing"})
        );
    }

    #[test]
    fn asctime_uses_millisecond_default_and_custom_format() {
        let created = Local.with_ymd_and_hms(2024, 3, 14, 15, 9, 26).unwrap()
            + chrono::Duration::milliseconds(53);
        let mut record = LogRecord::new(Level::INFO, "app", "x");
        record.created = created;

        let out = parse_line(&JsonRecordFormatter::new("(asctime)").format(&record).unwrap());
        assert_eq!(out["asctime"], json!("2024-03-14 15:09:26,053"));

        let formatter = JsonRecordFormatter::builder("(asctime)")
            .date_format("%d/%m/%Y")
            .build()
            .unwrap();
        let out = parse_line(&formatter.format(&record).unwrap());
        assert_eq!(out["asctime"], json!("14/03/2024"));
    }

    #[test]
    fn invalid_date_format_is_rejected() {
        let result = JsonRecordFormatter::builder("(asctime)").date_format("%Q").build();
        assert!(matches!(result, Err(FormatError::DateFormat { .. })));
    }

    #[test]
    fn missing_attributes_are_null() {
        let formatter = JsonRecordFormatter::new("(lineno) (funcName) (color)");
        let record = LogRecord::new(Level::INFO, "app", "x");

        let out = parse_line(&formatter.format(&record).unwrap());
        assert_eq!(
            Value::Object(out),
            json!({"lineno": null, "funcName": null, "color": null})
        );
    }

    #[test]
    fn plain_message_args_are_substituted() {
        let formatter = JsonRecordFormatter::new("(message) (msg)");
        let record = LogRecord::new(
            Level::INFO,
            "app",
            Message::with_args("{} logged in", vec![json!("alice")]),
        );

        let out = parse_line(&formatter.format(&record).unwrap());
        assert_eq!(out["message"], json!("alice logged in"));
        assert_eq!(out["msg"], json!("{} logged in"));
    }
}
