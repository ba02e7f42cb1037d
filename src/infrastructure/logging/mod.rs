//! Logging with optional rolling file output.

use crate::infrastructure::config::paths;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE: &str = "autoapply.log";

/// `RUST_LOG` wins over the built-in level
fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize logging with console and optional file output.
///
/// In production, logs are also written daily to:
/// - macOS: ~/Library/Application Support/autoapply/logs/
/// - Windows: %APPDATA%\autoapply\logs\
/// - Linux: ~/.config/autoapply/logs/
pub fn setup(is_production: bool) {
    let level = if is_production { "info" } else { "debug" };

    let console_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(filter(level));

    let file_layer = if is_production {
        let log_dir = paths::log_dir();

        if let Err(e) = std::fs::create_dir_all(&log_dir) {
            eprintln!(
                "Warning: Failed to create log directory {:?}: {}",
                log_dir, e
            );
            None
        } else {
            let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE);

            Some(
                fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(file_appender)
                    .with_filter(filter("info")),
            )
        }
    } else {
        None
    };

    match file_layer {
        Some(file_layer) => {
            tracing_subscriber::registry()
                .with(console_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry().with(console_layer).init();
        }
    }

    if is_production {
        tracing::info!("File logging enabled: {:?}", paths::log_dir());
    }
    tracing::info!("Logging initialized (production={})", is_production);
}
