use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_daily_json::init::{init_logging_with_config, LoggingConfig};

#[derive(Debug)]
struct Timeout;

impl std::fmt::Display for Timeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("upstream timed out after 30s")
    }
}

impl std::error::Error for Timeout {}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::env::temp_dir().join("daily_json_demo");
    std::fs::create_dir_all(&dir)?;

    let config = LoggingConfig {
        base_name: PathBuf::from(&dir).join("demo.log"),
        format: "(asctime) (levelname) (name) (message)".to_string(),
        enable_stdout: true,
        ..Default::default()
    };
    init_logging_with_config(&config)?;

    info!("starting service");
    warn!(user_id = 42, reason = "invalid password", "authentication failed");
    info!(payload = %serde_json::json!({"user": "alice", "action": "login"}));

    let err = Timeout;
    error!(exc_info = &err as &(dyn std::error::Error + 'static), "request failed");

    println!("log lines written under {}", dir.display());
    Ok(())
}
