/// Error returned when a field value cannot be turned into JSON.
#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("value of kind `{kind}` is not JSON serializable")]
    Unsupported { kind: &'static str },

    #[error("custom encoder failed: {0}")]
    Custom(String),
}

/// Error returned by [`JsonRecordFormatter::format`].
///
/// [`JsonRecordFormatter::format`]: crate::formatter::JsonRecordFormatter::format
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("failed to encode field `{field}`: {source}")]
    Encode {
        field: String,
        #[source]
        source: EncodeError,
    },

    #[error("failed to serialize log record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid date format `{format}`")]
    DateFormat { format: String },
}

/// Error returned when installing the global subscriber.
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log destination: {0}")]
    Destination(#[from] std::io::Error),

    #[error("invalid formatter settings: {0}")]
    Format(#[from] FormatError),

    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("a global subscriber is already installed: {0}")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError),
}
