//! Database connection handling
//!
//! This module establishes the connection a crawler reads metadata through.

use std::sync::Arc;
use std::time::Duration;

use sqlx::{
    mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode},
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    MySql, Pool, Postgres,
};
use tiberius::{AuthMethod, Client, EncryptionLevel};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::config::ConnectionOptions;
use crate::error::{Error, Result};
use crate::schema::types::Dialect;

const CONNECT_TIMEOUT_SECONDS: u64 = 30;

// Crawls issue one query at a time
const POOL_SIZE: u32 = 2;

/// Tiberius client shared by the queries of one crawl
pub type MsSqlClient = Arc<Mutex<Client<Compat<TcpStream>>>>;

/// Live connection to one of the supported engines
#[derive(Clone)]
pub enum DatabaseConnection {
    MicrosoftSql { client: MsSqlClient, database: String },
    MySql { pool: Pool<MySql>, database: String },
    Postgres { pool: Pool<Postgres>, database: String },
}

impl std::fmt::Debug for DatabaseConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DatabaseConnection({} {})", self.dialect(), self.database())
    }
}

impl DatabaseConnection {
    /// Connect with the given options
    ///
    /// Any network or authentication failure becomes
    /// [`Error::ConnectionError`] carrying the driver's message.
    pub async fn connect(options: &ConnectionOptions) -> Result<Self> {
        tracing::info!(
            dialect = %options.dialect,
            host = %options.hostname,
            port = options.port(),
            database = %options.database,
            "Connecting"
        );

        match options.dialect {
            Dialect::MySql => {
                let ssl_mode = if options.use_encryption {
                    MySqlSslMode::Required
                } else {
                    MySqlSslMode::Preferred
                };
                let connect_options = MySqlConnectOptions::new()
                    .host(&options.hostname)
                    .port(options.port())
                    .database(&options.database)
                    .username(&options.username)
                    .password(&options.password)
                    .ssl_mode(ssl_mode);

                let pool = MySqlPoolOptions::new()
                    .max_connections(POOL_SIZE)
                    .acquire_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECONDS))
                    .connect_with(connect_options)
                    .await
                    .map_err(|e| Error::ConnectionError(e.to_string()))?;

                Ok(DatabaseConnection::MySql {
                    pool,
                    database: options.database.clone(),
                })
            }
            Dialect::PostgreSql => {
                let ssl_mode = if options.use_encryption {
                    PgSslMode::Require
                } else {
                    PgSslMode::Prefer
                };
                let connect_options = PgConnectOptions::new()
                    .host(&options.hostname)
                    .port(options.port())
                    .database(&options.database)
                    .username(&options.username)
                    .password(&options.password)
                    .ssl_mode(ssl_mode);

                let pool = PgPoolOptions::new()
                    .max_connections(POOL_SIZE)
                    .acquire_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECONDS))
                    .connect_with(connect_options)
                    .await
                    .map_err(|e| Error::ConnectionError(e.to_string()))?;

                Ok(DatabaseConnection::Postgres {
                    pool,
                    database: options.database.clone(),
                })
            }
            Dialect::MicrosoftSql => {
                let client = connect_mssql(options).await?;
                Ok(DatabaseConnection::MicrosoftSql {
                    client: Arc::new(Mutex::new(client)),
                    database: options.database.clone(),
                })
            }
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            DatabaseConnection::MicrosoftSql { .. } => Dialect::MicrosoftSql,
            DatabaseConnection::MySql { .. } => Dialect::MySql,
            DatabaseConnection::Postgres { .. } => Dialect::PostgreSql,
        }
    }

    /// Name of the database the connection is bound to
    pub fn database(&self) -> &str {
        match self {
            DatabaseConnection::MicrosoftSql { database, .. }
            | DatabaseConnection::MySql { database, .. }
            | DatabaseConnection::Postgres { database, .. } => database,
        }
    }

    /// Release the connection
    pub async fn close(self) {
        match self {
            DatabaseConnection::MySql { pool, .. } => pool.close().await,
            DatabaseConnection::Postgres { pool, .. } => pool.close().await,
            DatabaseConnection::MicrosoftSql { client, .. } => {
                if let Ok(client) = Arc::try_unwrap(client) {
                    if let Err(e) = client.into_inner().close().await {
                        tracing::debug!(error = %e, "Closing SQL Server connection failed");
                    }
                }
            }
        }
    }
}

/// TCP + TDS handshake
async fn connect_mssql(options: &ConnectionOptions) -> Result<Client<Compat<TcpStream>>> {
    let mut config = tiberius::Config::new();
    config.host(&options.hostname);
    config.port(options.port());
    config.database(&options.database);

    if options.use_integrated_authentication {
        config.authentication(integrated_auth()?);
    } else {
        config.authentication(AuthMethod::sql_server(&options.username, &options.password));
    }

    if options.use_encryption {
        config.encryption(EncryptionLevel::Required);
    } else {
        config.encryption(EncryptionLevel::NotSupported);
    }
    config.trust_cert();

    let tcp = tokio::time::timeout(
        Duration::from_secs(CONNECT_TIMEOUT_SECONDS),
        TcpStream::connect(config.get_addr()),
    )
    .await
    .map_err(|_| Error::ConnectionError(format!("Timed out connecting to {}", options.hostname)))?
    .map_err(|e| Error::ConnectionError(format!("Failed to connect to SQL Server: {}", e)))?;
    tcp.set_nodelay(true)?;

    Client::connect(config, tcp.compat_write())
        .await
        .map_err(|e| {
            Error::ConnectionError(format!("Failed to authenticate with SQL Server: {}", e))
        })
}

#[cfg(windows)]
fn integrated_auth() -> Result<AuthMethod> {
    Ok(AuthMethod::Integrated)
}

#[cfg(not(windows))]
fn integrated_auth() -> Result<AuthMethod> {
    Err(Error::ConnectionError(
        "Integrated authentication is only available on Windows".to_string(),
    ))
}
