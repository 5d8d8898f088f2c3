//! Per-dialect DDL for `tx_log` and its provisioning.

use std::fmt;
use std::str::FromStr;

use sea_orm::{ConnectionTrait, DbBackend, DbErr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unsupported SQL dialect {0:?}")]
    UnsupportedDialect(String),
    #[error("schema provisioning failed: {0}")]
    Database(#[from] DbErr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

const MYSQL: &[&str] = &["CREATE TABLE IF NOT EXISTS tx_log (
    id BINARY(16) NOT NULL PRIMARY KEY,
    req_hash CHAR(16) NOT NULL,
    headers TEXT NOT NULL,
    body LONGBLOB NULL,
    created_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
    INDEX ix_tx_log_hash (req_hash)
)"];

const SQLITE: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tx_log (
    id BLOB NOT NULL PRIMARY KEY,
    req_hash CHAR(16) NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NULL,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
)",
    "CREATE INDEX IF NOT EXISTS ix_tx_log_hash ON tx_log (req_hash)",
];

impl Dialect {
    /// A non-blank `explicit` name wins over the connection's backend.
    pub fn resolve(explicit: Option<&str>, backend: DbBackend) -> Result<Self, SchemaError> {
        match explicit.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => name.parse(),
            None => match backend {
                DbBackend::MySql => Ok(Dialect::MySql),
                DbBackend::Sqlite => Ok(Dialect::Sqlite),
                other => Err(SchemaError::UnsupportedDialect(format!("{other:?}").to_lowercase())),
            },
        }
    }

    pub fn statements(self) -> &'static [&'static str] {
        match self {
            Dialect::MySql => MYSQL,
            Dialect::Sqlite => SQLITE,
        }
    }
}

impl FromStr for Dialect {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mysql" => Ok(Dialect::MySql),
            "sqlite3" => Ok(Dialect::Sqlite),
            other => Err(SchemaError::UnsupportedDialect(other.to_string())),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite3",
        })
    }
}

/// Create `tx_log` and its hash index if they are missing.
pub async fn provision<C: ConnectionTrait>(conn: &C, dialect: Dialect) -> Result<(), SchemaError> {
    for stmt in dialect.statements() {
        conn.execute_unprepared(stmt).await?;
    }
    log::info!("schema ready ({})", dialect);
    Ok(())
}
