//! Logging utilities for schema_compare
//!
//! This module provides logging setup and configuration.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize logging based on configuration
///
/// Without a `[logging]` table events at `info` and above go to stdout as
/// text. `RUST_LOG` directives are honoured on top of the configured level.
pub fn init_logging(config: &Option<LoggingConfig>) -> Result<()> {
    let default = LoggingConfig {
        level: "info".to_string(),
        file: None,
        format: "text".to_string(),
        stdout: true,
    };
    let config = config.as_ref().unwrap_or(&default);

    let level = parse_level(&config.level);
    let directive = format!("schema_compare={}", level)
        .parse()
        .map_err(|e| Error::ConfigError(format!("Invalid log level '{}': {}", config.level, e)))?;
    let env_filter = EnvFilter::from_default_env().add_directive(directive);

    let writer = match &config.file {
        Some(file_path) => {
            if let Some(parent) = Path::new(file_path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            BoxMakeWriter::new(Arc::new(File::create(file_path)?))
        }
        None if config.stdout => BoxMakeWriter::new(std::io::stdout),
        // Nothing to write to
        None => return Ok(()),
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(writer);

    let installed = if config.format.eq_ignore_ascii_case("json") {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.map_err(|e| Error::ConfigError(format!("Logging already initialised: {}", e)))
}

/// Parse a level name, falling back to `info`
fn parse_level(level: &str) -> Level {
    level.trim().parse().unwrap_or(Level::INFO)
}
