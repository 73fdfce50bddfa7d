//! Several processes appending to the same daily file.
//!
//! Run without arguments to spawn the workers; each worker re-runs this
//! binary with `worker <id>`.

use std::io::Write;
use std::process::Command;
use tracing_daily_json::{JsonRecordFormatter, LogRecord, RotatingDestination};

const WORKERS: usize = 4;
const LINES_PER_WORKER: usize = 1000;

fn worker(id: usize, base: &str) -> Result<(), Box<dyn std::error::Error>> {
    let formatter = JsonRecordFormatter::new("(asctime) (process) (message)");
    let mut destination = RotatingDestination::open(base)?;

    for n in 0..LINES_PER_WORKER {
        let record = LogRecord::new(tracing::Level::INFO, "demo", format!("worker {id} line {n}"))
            .with_extra("worker", id as u64);
        let mut line = formatter.format(&record)?;
        line.push('\n');
        destination.write_all(line.as_bytes())?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let base = std::env::temp_dir().join("daily_json_multi.log");
    let base = base.to_string_lossy().into_owned();

    if args.get(1).map(String::as_str) == Some("worker") {
        let id = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(0);
        return worker(id, &base);
    }

    let exe = std::env::current_exe()?;
    let children: Vec<_> = (0..WORKERS)
        .map(|id| Command::new(&exe).arg("worker").arg(id.to_string()).spawn())
        .collect::<Result<_, _>>()?;
    for mut child in children {
        child.wait()?;
    }

    let probe = RotatingDestination::open(&base)?;
    let content = std::fs::read_to_string(probe.current_path())?;
    println!(
        "{} has {} lines (expected at least {})",
        probe.current_path().display(),
        content.lines().count(),
        WORKERS * LINES_PER_WORKER
    );
    Ok(())
}
