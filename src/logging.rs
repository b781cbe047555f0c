use crate::config::CliArgs;
use std::fs::OpenOptions;
use std::sync::{Mutex, OnceLock};
use tracing::Level;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub fn parse_level(raw: &str) -> Level {
    match raw.trim().to_ascii_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Installs the global subscriber once. Logs go to `--log-file` when given
/// (falling back to stderr if it cannot be opened).
pub fn init_tracing(args: &CliArgs) {
    let _ = TRACING_INIT.get_or_init(|| {
        let level = parse_level(&args.log_level);
        let builder = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false);

        if let Some(path) = &args.log_file {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    let subscriber = builder.with_ansi(false).with_writer(Mutex::new(file)).finish();
                    let _ = tracing::subscriber::set_global_default(subscriber);
                    return;
                }
                Err(e) => {
                    eprintln!("Failed to open log file {}: {}. Logging to stderr.", path.display(), e);
                }
            }
        }
        let subscriber = builder.with_writer(std::io::stderr).finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
