//! Error types for schema_compare

use thiserror::Error;

/// Result type for schema_compare operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for schema_compare
#[derive(Error, Debug)]
pub enum Error {
    /// Network or authentication failure; aborts the whole compare
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Malformed or unsupported metadata; aborts the crawl of one side
    #[error("Crawl error: {0}")]
    CrawlError(String),

    /// One object could not be rendered; recorded on its compare item
    #[error("Scripting error: {0}")]
    ScriptingError(String),

    /// The operation stopped because cancellation was requested
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Illegal transition or update on a task node
    #[error("Task error: {0}")]
    TaskError(String),

    #[error("Unsupported dialect: {0}")]
    UnsupportedDialect(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Whether the error is a cooperative stop rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

// Driver errors have no single meaning here: the same `sqlx::Error` is a
// connection failure during connect and a crawl failure afterwards, so the
// call sites map them explicitly instead of relying on `From`.

/// Convert Serde JSON errors to schema_compare errors
impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::SerializationError(error.to_string())
    }
}

/// Convert TOML deserialization errors to schema_compare errors
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}
