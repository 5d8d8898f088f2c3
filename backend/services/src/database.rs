use sea_orm::{Database, DatabaseConnection, DbErr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid DB driver")]
    InvalidDriver,
    #[error("invalid DSN")]
    InvalidDsn,
    #[error("unknown DB driver {0:?}")]
    UnknownDriver(String),
    #[error("failed to connect to database: {0}")]
    Connect(#[from] DbErr),
}

/// Driver name (`mysql` or `sqlite3`) plus a sqlx connection URL.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    pub driver: String,
    pub dsn: String,
}

impl ConnConfig {
    pub fn new(driver: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            dsn: dsn.into(),
        }
    }
}

pub async fn create_connection(config: &ConnConfig) -> Result<DatabaseConnection, ConnectError> {
    if config.driver.is_empty() {
        return Err(ConnectError::InvalidDriver);
    }
    if config.dsn.is_empty() {
        return Err(ConnectError::InvalidDsn);
    }
    match config.driver.as_str() {
        "mysql" | "sqlite3" => {}
        other => return Err(ConnectError::UnknownDriver(other.to_string())),
    }

    let db = Database::connect(config.dsn.as_str()).await?;
    log::info!("connected to {} database", config.driver);
    Ok(db)
}

// The table itself is created at startup by `schema::provision`, or out of
// band with the migration CLI: cd migrations && cargo run -- up

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_missing_settings() {
        let err = create_connection(&ConnConfig::new("", "sqlite::memory:")).await.unwrap_err();
        assert!(matches!(err, ConnectError::InvalidDriver));
        assert_eq!(err.to_string(), "invalid DB driver");

        let err = create_connection(&ConnConfig::new("mysql", "")).await.unwrap_err();
        assert!(matches!(err, ConnectError::InvalidDsn));

        let err = create_connection(&ConnConfig::new("postgres", "postgres://x")).await.unwrap_err();
        assert!(matches!(err, ConnectError::UnknownDriver(d) if d == "postgres"));
    }

    #[tokio::test]
    async fn opens_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let dsn = format!("sqlite://{}?mode=rwc", dir.path().join("c.db").display());
        let db = create_connection(&ConnConfig::new("sqlite3", dsn)).await.unwrap();
        db.ping().await.unwrap();
    }
}
