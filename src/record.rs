use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveTime};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt;
use tracing::Level;

/// Attribute names every [`LogRecord`] provides on its own.
///
/// These are never copied into the output as extra fields, even when a
/// caller attaches an extra attribute with the same name.
pub const RESERVED_ATTRS: &[&str] = &[
    "args",
    "asctime",
    "created",
    "exc_info",
    "exc_text",
    "filename",
    "funcName",
    "levelname",
    "levelno",
    "lineno",
    "module",
    "msecs",
    "message",
    "msg",
    "name",
    "pathname",
    "process",
    "processName",
    "relativeCreated",
    "stack_info",
    "thread",
    "threadName",
];

/// The message of a log event.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Text with `{}` placeholders filled from `args` in order.
    Plain { template: String, args: Vec<Value> },
    /// A mapping merged field by field into the output object.
    Structured(Map<String, Value>),
}

impl Message {
    pub fn plain(text: impl Into<String>) -> Self {
        Message::Plain {
            template: text.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(template: impl Into<String>, args: Vec<Value>) -> Self {
        Message::Plain {
            template: template.into(),
            args,
        }
    }

    /// Render a plain message; `None` for structured ones.
    ///
    /// Surplus placeholders are left as-is, surplus arguments are ignored.
    pub fn render(&self) -> Option<String> {
        let Message::Plain { template, args } = self else {
            return None;
        };
        if args.is_empty() {
            return Some(template.clone());
        }

        let mut out = String::with_capacity(template.len());
        let mut args = args.iter();
        let mut rest = template.as_str();
        while let Some(pos) = rest.find("{}") {
            out.push_str(&rest[..pos]);
            match args.next() {
                Some(Value::String(s)) => out.push_str(s),
                Some(other) => out.push_str(&other.to_string()),
                None => out.push_str("{}"),
            }
            rest = &rest[pos + 2..];
        }
        out.push_str(rest);
        Some(out)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::plain(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::plain(text)
    }
}

impl From<Map<String, Value>> for Message {
    fn from(payload: Map<String, Value>) -> Self {
        Message::Structured(payload)
    }
}

/// Formatted stack text captured alongside an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Traceback {
    frames: Vec<String>,
}

impl Traceback {
    pub fn new(frames: Vec<String>) -> Self {
        Traceback { frames }
    }

    /// Capture the calling thread's backtrace.
    ///
    /// Empty unless backtraces are enabled (`RUST_BACKTRACE` /
    /// `RUST_LIB_BACKTRACE`).
    pub fn capture() -> Self {
        let bt = std::backtrace::Backtrace::capture();
        match bt.status() {
            std::backtrace::BacktraceStatus::Captured => Traceback::from_text(&bt.to_string()),
            _ => Traceback::default(),
        }
    }

    pub fn from_text(text: &str) -> Self {
        Traceback {
            frames: text.lines().map(str::to_string).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames joined into one block, without surrounding whitespace.
    pub fn render(&self) -> String {
        self.frames.join("\n").trim().to_string()
    }
}

/// An error attached to a log event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    /// Error type name, when known.
    pub kind: Option<String>,
    pub message: String,
    /// Messages of the `source()` chain, outermost first.
    pub causes: Vec<String>,
    pub traceback: Traceback,
}

impl ExceptionInfo {
    pub fn new(message: impl Into<String>) -> Self {
        ExceptionInfo {
            kind: None,
            message: message.into(),
            causes: Vec::new(),
            traceback: Traceback::default(),
        }
    }

    /// Build from a concrete error type, recording its type name.
    pub fn from_error<E: Error>(err: &E) -> Self {
        let mut info = ExceptionInfo::from_dyn(err);
        info.kind = Some(std::any::type_name::<E>().to_string());
        info
    }

    /// Build from a type-erased error; only the messages are available.
    pub fn from_dyn(err: &dyn Error) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        ExceptionInfo {
            kind: None,
            message: err.to_string(),
            causes,
            traceback: Traceback::default(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_traceback(mut self, traceback: Traceback) -> Self {
        self.traceback = traceback;
        self
    }

    /// Render as one block of text: headline, causes, then the stack.
    pub fn format(&self) -> String {
        let mut out = match &self.kind {
            Some(kind) => format!("{}: {}", kind, self.message),
            None => self.message.clone(),
        };
        if !self.causes.is_empty() {
            out.push_str("\n\nCaused by:");
            for cause in &self.causes {
                out.push_str("\n    ");
                out.push_str(cause);
            }
        }
        if !self.traceback.is_empty() {
            out.push_str("\n\n");
            out.push_str(&self.traceback.render());
        }
        out
    }
}

impl fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A value attached to a log event.
///
/// `Json` values are emitted as-is; every other variant goes through a
/// [`ValueEncoder`](crate::encode::ValueEncoder) first.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Json(Value),
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
    Traceback(Traceback),
    Exception(ExceptionInfo),
    /// Anything else, kept as its display form.
    Other(String),
}

impl FieldValue {
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Json(_) => "json",
            FieldValue::DateTime(_) => "datetime",
            FieldValue::Date(_) => "date",
            FieldValue::Time(_) => "time",
            FieldValue::Traceback(_) => "traceback",
            FieldValue::Exception(_) => "exception",
            FieldValue::Other(_) => "other",
        }
    }
}

macro_rules! json_field_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    FieldValue::Json(Value::from(value))
                }
            }
        )*
    };
}

json_field_value!(&str, String, bool, u8, u32, u64, i32, i64, f64, Map<String, Value>);

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Json(value)
    }
}

impl From<DateTime<Local>> for FieldValue {
    fn from(value: DateTime<Local>) -> Self {
        FieldValue::DateTime(value.fixed_offset())
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

impl From<ExceptionInfo> for FieldValue {
    fn from(value: ExceptionInfo) -> Self {
        FieldValue::Exception(value)
    }
}

/// Level number on the conventional 10-step scale.
pub fn level_number(level: &Level) -> u8 {
    match *level {
        Level::ERROR => 40,
        Level::WARN => 30,
        Level::INFO => 20,
        Level::DEBUG => 10,
        _ => 5,
    }
}

/// Level name as emitted under `levelname`.
pub fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        _ => "TRACE",
    }
}

/// One log event, as handed to the formatter.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub created: DateTime<Local>,
    pub level: Level,
    /// Logger name; the `tracing` target.
    pub name: String,
    pub pathname: Option<String>,
    pub filename: Option<String>,
    pub module: Option<String>,
    pub lineno: Option<u32>,
    pub func_name: Option<String>,
    pub thread: Option<String>,
    pub thread_name: Option<String>,
    pub process: u32,
    pub process_name: Option<String>,
    /// Milliseconds between logger setup and this event.
    pub relative_created: f64,
    pub msg: Message,
    pub exc_info: Option<ExceptionInfo>,
    /// Exception text rendered earlier, used when `exc_info` is absent.
    pub exc_text: Option<String>,
    pub stack_info: Option<String>,
    /// Caller-attached attributes in attachment order.
    pub extra: Vec<(String, FieldValue)>,
}

impl LogRecord {
    pub fn new(level: Level, name: impl Into<String>, msg: impl Into<Message>) -> Self {
        LogRecord {
            created: Local::now(),
            level,
            name: name.into(),
            pathname: None,
            filename: None,
            module: None,
            lineno: None,
            func_name: None,
            thread: None,
            thread_name: None,
            process: std::process::id(),
            process_name: None,
            relative_created: 0.0,
            msg: msg.into(),
            exc_info: None,
            exc_text: None,
            stack_info: None,
            extra: Vec::new(),
        }
    }

    /// Attach an extra attribute.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    pub fn with_exception(mut self, exc: ExceptionInfo) -> Self {
        self.exc_info = Some(exc);
        self
    }

    /// Message text as the framework would render it.
    pub fn message(&self) -> Option<String> {
        self.msg.render()
    }

    /// Look up an attribute by its framework name.
    ///
    /// `asctime` and `message` depend on the formatter and are resolved
    /// there; everything else comes from the record or its extras.
    pub fn attribute(&self, name: &str) -> Option<FieldValue> {
        let opt_str = |v: &Option<String>| v.clone().map(FieldValue::from);
        match name {
            "name" => Some(self.name.clone().into()),
            "levelname" => Some(level_name(&self.level).into()),
            "levelno" => Some(level_number(&self.level).into()),
            "pathname" => opt_str(&self.pathname),
            "filename" => opt_str(&self.filename),
            "module" => opt_str(&self.module),
            "lineno" => self.lineno.map(FieldValue::from),
            "funcName" => opt_str(&self.func_name),
            "thread" => opt_str(&self.thread),
            "threadName" => opt_str(&self.thread_name),
            "process" => Some(self.process.into()),
            "processName" => opt_str(&self.process_name),
            "created" => Some(created_seconds(&self.created).into()),
            "msecs" => Some(f64::from(self.created.timestamp_subsec_millis()).into()),
            "relativeCreated" => Some(self.relative_created.into()),
            "msg" => match &self.msg {
                Message::Plain { template, .. } => Some(template.clone().into()),
                Message::Structured(map) => Some(Value::Object(map.clone()).into()),
            },
            "args" => match &self.msg {
                Message::Plain { args, .. } => Some(Value::Array(args.clone()).into()),
                Message::Structured(_) => None,
            },
            "exc_info" => self.exc_info.clone().map(FieldValue::Exception),
            "exc_text" => opt_str(&self.exc_text),
            "stack_info" => opt_str(&self.stack_info),
            _ => self
                .extra
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone()),
        }
    }
}

fn created_seconds(created: &DateTime<Local>) -> f64 {
    created.timestamp() as f64 + f64::from(created.timestamp_subsec_micros()) / 1_000_000.0
}

/// Append `record`'s extra attributes to `target`.
///
/// Keys for which `is_skipped` holds, keys starting with `_`, and keys
/// already present in `target` are left alone. Values are converted with
/// `encode`.
pub fn merge_record_extra<S, F, E>(
    record: &LogRecord,
    target: &mut Map<String, Value>,
    is_skipped: S,
    mut encode: F,
) -> Result<(), E>
where
    S: Fn(&str) -> bool,
    F: FnMut(&str, &FieldValue) -> Result<Value, E>,
{
    for (key, value) in &record.extra {
        if key.starts_with('_') || is_skipped(key) || target.contains_key(key) {
            continue;
        }
        let encoded = encode(key, value)?;
        target.insert(key.clone(), encoded);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_message_without_args_is_verbatim() {
        let msg = Message::plain("100% {} done");
        assert_eq!(msg.render().as_deref(), Some("100% {} done"));
    }

    #[test]
    fn plain_message_substitutes_args_in_order() {
        let msg = Message::with_args("user {} did {} ({})", vec![json!("alice"), json!("login")]);
        assert_eq!(msg.render().as_deref(), Some("user alice did login ({})"));

        let msg = Message::with_args("{} + {}", vec![json!(1), json!(2.5), json!(true)]);
        assert_eq!(msg.render().as_deref(), Some("1 + 2.5"));
    }

    #[test]
    fn structured_message_has_no_text() {
        let mut payload = Map::new();
        payload.insert("user".into(), json!("alice"));
        assert_eq!(Message::Structured(payload).render(), None);
    }

    #[test]
    fn exception_format_includes_kind_causes_and_stack() {
        let mut exc = ExceptionInfo::new("boom")
            .with_kind("ParseError")
            .with_traceback(Traceback::new(vec!["  at a".into(), "  at b".into()]));
        exc.causes.push("bad digit".into());

        assert_eq!(
            exc.format(),
            "ParseError: boom\n\nCaused by:\n    bad digit\n\nat a\n  at b"
        );
    }

    #[test]
    fn exception_from_error_walks_source_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let outer = std::io::Error::new(std::io::ErrorKind::Other, inner);

        let exc = ExceptionInfo::from_error(&outer);
        assert_eq!(exc.kind.as_deref(), Some("std::io::error::Error"));
        assert_eq!(exc.message, "disk on fire");
        assert!(exc.format().starts_with("std::io::error::Error: disk on fire"));
    }

    #[test]
    fn attribute_lookup_covers_reserved_names() {
        let record = LogRecord::new(Level::WARN, "app", "hello").with_extra("user", "bob");

        assert!(record.attribute("created").is_some());
        assert!(record.attribute("process").is_some());
        assert_eq!(record.attribute("levelname"), Some(FieldValue::from("WARNING")));
        assert_eq!(record.attribute("levelno"), Some(FieldValue::from(30u8)));
        assert_eq!(record.attribute("name"), Some(FieldValue::from("app")));
        assert_eq!(record.attribute("user"), Some(FieldValue::from("bob")));
        assert_eq!(record.attribute("lineno"), None);
    }

    #[test]
    fn merge_skips_reserved_private_and_existing_keys() {
        let record = LogRecord::new(Level::INFO, "app", "hi")
            .with_extra("levelname", "spoofed")
            .with_extra("_secret", "hidden")
            .with_extra("action", "extra-action")
            .with_extra("request_id", 7);

        let mut target = Map::new();
        target.insert("action".into(), json!("payload-action"));

        merge_record_extra(&record, &mut target, |k| RESERVED_ATTRS.contains(&k), |_, v| match v {
            FieldValue::Json(v) => Ok::<_, ()>(v.clone()),
            _ => Err(()),
        })
        .unwrap();

        assert_eq!(Value::Object(target), json!({"action": "payload-action", "request_id": 7}));
    }
}
