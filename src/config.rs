//! Application configuration.
//!
//! Loaded once by the process entry point and handed to components
//! explicitly; nothing here is global state.

use std::env;
use std::path::PathBuf;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    /// Where raw interpreter replies are written when parsing fails.
    /// `None` disables the debug artifact.
    pub debug_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// sqlite connection URL, e.g. `sqlite://data/app.db?mode=rwc`.
    pub url: String,
    pub max_connections: u32,
}

/// Loads `.env` for local development if present. Safe to call more than
/// once.
pub fn init_dotenv() {
    let _ = dotenvy::dotenv();
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(5);
        let debug_dir = env::var("INTERPRETER_DEBUG_DIR").ok().map(PathBuf::from);

        Ok(Self {
            database: DatabaseConfig {
                url,
                max_connections,
            },
            debug_dir,
        })
    }
}

#[cfg(feature = "sqlx")]
pub async fn create_pool(
    config: &DatabaseConfig,
) -> std::result::Result<sqlx::SqlitePool, sqlx::Error> {
    sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}
