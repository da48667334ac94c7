//! Configuration handling for schema_compare
//!
//! A project file names the two databases to compare, the scripting options
//! and, optionally, logging and output settings:
//!
//! ```toml
//! [source]
//! dialect = "postgresql"
//! hostname = "localhost"
//! database = "app"
//! username = "postgres"
//! password = "secret"
//!
//! [target]
//! dialect = "postgresql"
//! hostname = "staging"
//! database = "app"
//! username = "postgres"
//! password = "secret"
//!
//! [options]
//! ignore_collate = true
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::schema::diff::ScriptDirection;
use crate::schema::types::{Dialect, ScriptingOptions};

/// Load configuration from a TOML file
pub fn load_from_file(path: &str) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .map_err(|e| Error::ConfigError(format!("Failed to read config file: {}", e)))?;

    load_from_str(&config_str)
}

/// Parse a configuration, apply default ports and validate it
pub fn load_from_str(config_str: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(config_str)
        .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?;

    config.source.apply_defaults();
    config.target.apply_defaults();
    config.validate()?;

    Ok(config)
}

/// Represents the complete schema_compare configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub source: ConnectionOptions,
    pub target: ConnectionOptions,
    #[serde(default)]
    pub options: ScriptingOptions,
    pub logging: Option<LoggingConfig>,
    pub output: Option<OutputConfig>,
}

impl Config {
    /// Both sides must use the same engine
    pub fn validate(&self) -> Result<()> {
        if self.source.dialect != self.target.dialect {
            return Err(Error::UnsupportedDialect(format!(
                "source is {} but target is {}; cross-dialect comparison is not supported",
                self.source.dialect, self.target.dialect
            )));
        }

        for (side, options) in [("source", &self.source), ("target", &self.target)] {
            if options.hostname.is_empty() {
                return Err(Error::ConfigError(format!("{} hostname is empty", side)));
            }
            if options.database.is_empty() {
                return Err(Error::ConfigError(format!("{} database is empty", side)));
            }
            if options.use_integrated_authentication && options.dialect != Dialect::MicrosoftSql {
                return Err(Error::ConfigError(format!(
                    "{} uses integrated authentication, which only Microsoft SQL Server supports",
                    side
                )));
            }
        }

        Ok(())
    }
}

/// Database connection options for one side of the comparison
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionOptions {
    pub dialect: Dialect,
    pub hostname: String,
    pub port: Option<u16>,
    pub database: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub use_encryption: bool,
    /// Microsoft SQL Server only
    #[serde(default)]
    pub use_integrated_authentication: bool,
}

impl ConnectionOptions {
    pub fn new(dialect: Dialect, hostname: &str, database: &str) -> Self {
        Self {
            dialect,
            hostname: hostname.to_string(),
            port: None,
            database: database.to_string(),
            username: String::new(),
            password: String::new(),
            use_encryption: false,
            use_integrated_authentication: false,
        }
    }

    /// Fill in the standard port of the dialect when none was given
    pub fn apply_defaults(&mut self) {
        if self.port.is_none() {
            self.port = Some(self.dialect.default_port());
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.dialect.default_port())
    }
}

// Passwords stay out of logs
impl std::fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("dialect", &self.dialect)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("use_encryption", &self.use_encryption)
            .field("use_integrated_authentication", &self.use_integrated_authentication)
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub format: String,
    pub stdout: bool,
}

/// Where and how the command line front end writes its results
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputConfig {
    pub directory: PathBuf,
    #[serde(default = "default_direction")]
    pub direction: ScriptDirection,
    /// Also write a JSON summary of the compare result
    #[serde(default)]
    pub summary_json: bool,
}

fn default_direction() -> ScriptDirection {
    ScriptDirection::SourceToTarget
}
