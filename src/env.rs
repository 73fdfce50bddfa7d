//! Environment variable names read by [`LoggingConfig::from_env`].
//!
//! These are purely helpers; the destination and formatter never read the
//! environment themselves.
//!
//! [`LoggingConfig::from_env`]: crate::init::LoggingConfig::from_env

/// Base log path; day files are written next to it as `<path>.<YYYY-MM-DD>`.
pub const DAILY_JSON_LOG_FILE_ENV: &str = "DAILY_JSON_LOG_FILE";

/// Format pattern naming the fields to emit, e.g. `(asctime) (levelname) (message)`.
pub const DAILY_JSON_LOG_FORMAT_ENV: &str = "DAILY_JSON_LOG_FORMAT";

/// Optional text written before every JSON object.
pub const DAILY_JSON_LOG_PREFIX_ENV: &str = "DAILY_JSON_LOG_PREFIX";

/// Optional `strftime` format for `asctime`.
pub const DAILY_JSON_LOG_DATE_FORMAT_ENV: &str = "DAILY_JSON_LOG_DATE_FORMAT";

/// Filter directives used when `RUST_LOG` is not set, e.g. `info,hyper=warn`.
pub const DAILY_JSON_LOG_FILTER_ENV: &str = "DAILY_JSON_LOG_FILTER";

/// `true`/`1` to also print events to stdout.
pub const DAILY_JSON_LOG_STDOUT_ENV: &str = "DAILY_JSON_LOG_STDOUT";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read an optional, non-empty environment variable.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Interpret `1`, `true`, `yes` and `on` (any case) as `true`.
pub fn env_flag(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}
