use crate::destination::RotatingDestination;
use crate::env::{
    env_flag, env_opt, env_or, DAILY_JSON_LOG_DATE_FORMAT_ENV, DAILY_JSON_LOG_FILE_ENV,
    DAILY_JSON_LOG_FILTER_ENV, DAILY_JSON_LOG_FORMAT_ENV, DAILY_JSON_LOG_PREFIX_ENV,
    DAILY_JSON_LOG_STDOUT_ENV,
};
use crate::error::InitError;
use crate::formatter::JsonRecordFormatter;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::format::DefaultFields;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

/// `fmt` layer writing JSON lines into daily files.
pub type JsonFileLayer<S> =
    tracing_subscriber::fmt::Layer<S, DefaultFields, JsonRecordFormatter, Mutex<RotatingDestination>>;

/// Конфигурация файлового JSON‑логирования.
///
/// Задаёт базовое имя файла (к нему дописывается суффикс с датой),
/// шаблон с набором полей, необязательный префикс строки, формат
/// `asctime`, директивы фильтра уровней и то, нужно ли дополнительно
/// печатать события в консоль.
///
/// **Поля**
/// - `base_name`: базовый путь, файлы дня — `<base_name>.<YYYY-MM-DD>`.
/// - `format`: шаблон вида `(asctime) (levelname) (message)`.
/// - `prefix`: текст перед каждым JSON‑объектом.
/// - `date_format`: `strftime`‑формат для `asctime`; по умолчанию с
///   миллисекундами.
/// - `filter`: директивы `EnvFilter`, если не задан `RUST_LOG`.
/// - `enable_stdout`: если `true`, добавляется обычный `fmt`‑слой.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub base_name: PathBuf,
    pub format: String,
    pub prefix: String,
    pub date_format: Option<String>,
    pub filter: String,
    pub enable_stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            base_name: PathBuf::from("app.log"),
            format: "(asctime) (levelname) (name) (message)".to_string(),
            prefix: String::new(),
            date_format: None,
            filter: "info".to_string(),
            enable_stdout: false,
        }
    }
}

impl LoggingConfig {
    /// Build a config from `DAILY_JSON_LOG_*` variables, using defaults for
    /// anything unset.
    pub fn from_env() -> Self {
        let defaults = LoggingConfig::default();
        Self {
            base_name: env_opt(DAILY_JSON_LOG_FILE_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.base_name),
            format: env_or(DAILY_JSON_LOG_FORMAT_ENV, &defaults.format),
            prefix: env_or(DAILY_JSON_LOG_PREFIX_ENV, &defaults.prefix),
            date_format: env_opt(DAILY_JSON_LOG_DATE_FORMAT_ENV).or(defaults.date_format),
            filter: env_or(DAILY_JSON_LOG_FILTER_ENV, &defaults.filter),
            enable_stdout: env_flag(DAILY_JSON_LOG_STDOUT_ENV, defaults.enable_stdout),
        }
    }

    /// Formatter described by this config.
    pub fn formatter(&self) -> Result<JsonRecordFormatter, InitError> {
        let mut builder = JsonRecordFormatter::builder(self.format.as_str()).prefix(self.prefix.as_str());
        if let Some(date_format) = &self.date_format {
            builder = builder.date_format(date_format.as_str());
        }
        Ok(builder.build()?)
    }
}

/// Build the JSON file layer for `config` without installing anything.
///
/// **Returns**
/// - `Ok(layer)` with today's file already created or joined.
/// - `Err(..)` if the day file cannot be opened or the date format is
///   invalid.
///
/// Useful when the application assembles its own subscriber.
pub fn json_file_layer<S>(config: &LoggingConfig) -> Result<JsonFileLayer<S>, InitError>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let formatter = config.formatter()?;
    let destination = RotatingDestination::open(&config.base_name)?;

    Ok(tracing_subscriber::fmt::layer()
        .event_format(formatter)
        .with_writer(Mutex::new(destination)))
}

/// Initialize the global `tracing` subscriber from a [`LoggingConfig`].
///
/// **Effects**
///
/// Installs a [`Registry`] with an [`EnvFilter`] (`RUST_LOG` first, then
/// `config.filter`) and the JSON file layer, plus a plain `fmt` layer on
/// stdout when `enable_stdout` is set.
///
/// **Returns**
/// - `Err(InitError::SetGlobalDefault)` if a global subscriber is already
///   installed.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<(), InitError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)?,
    };
    let file_layer = json_file_layer(config)?;

    // Подключаем stdout‑слой только по флагу; типы subscriber'а различаются,
    // поэтому собираем его в двух вариантах.
    if config.enable_stdout {
        let subscriber = Registry::default()
            .with(filter)
            .with(file_layer)
            .with(tracing_subscriber::fmt::layer());
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(filter).with(file_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

/// Initialize logging from `DAILY_JSON_LOG_*` environment variables.
///
/// Equivalent to [`init_logging_with_config`] with
/// [`LoggingConfig::from_env`].
pub fn init_logging() -> Result<(), InitError> {
    init_logging_with_config(&LoggingConfig::from_env())
}
