//! SQLite connection pools for the workflow store.
//!
//! The store splits its traffic: a single writer connection serializes
//! every workflow/step/sleep mutation (SQLite permits one writer at a
//! time), while a bounded reader pool serves concurrent state queries.
//! WAL journal mode keeps readers from blocking the writer. Tuning comes
//! from [`EngineConfig`] via [`PoolSettings`].

use std::str::FromStr;
use std::time::Duration;

use duraflow_types::config::EngineConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Tuning knobs for the SQLite pools.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// How long a connection waits on a locked database before erroring.
    pub busy_timeout: Duration,
    /// Upper bound on concurrent reader connections.
    pub max_readers: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            max_readers: 8,
        }
    }
}

impl From<&EngineConfig> for PoolSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            busy_timeout: Duration::from_secs(config.sqlite_busy_timeout_secs),
            max_readers: config.sqlite_max_readers,
        }
    }
}

/// Split read/write pool over one SQLite database file.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open a pool with [`PoolSettings::default`].
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        Self::with_settings(database_url, PoolSettings::default()).await
    }

    /// Open the writer, apply pending migrations, then open the readers.
    ///
    /// The reader pool is read-only and is not opened until the schema is
    /// current, so every connection handed out already sees the migrated
    /// workflow tables.
    pub async fn with_settings(
        database_url: &str,
        settings: PoolSettings,
    ) -> Result<Self, sqlx::Error> {
        let options = connect_options(database_url, &settings)?;

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;

        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(settings.max_readers)
            .connect_with(options.read_only(true))
            .await?;

        Ok(Self { reader, writer })
    }
}

/// WAL journal mode, enforced foreign keys, and the configured busy
/// timeout. Cascade deletes on steps and sleeps depend on the foreign-key
/// pragma being on for every connection.
fn connect_options(
    database_url: &str,
    settings: &PoolSettings,
) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(settings.busy_timeout)
        .create_if_missing(true))
}

/// Returns the default database URL based on `DURAFLOW_DATA_DIR` env var,
/// falling back to `~/.duraflow/duraflow.db`.
pub fn default_database_url() -> String {
    let data_dir = std::env::var("DURAFLOW_DATA_DIR").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/.duraflow")
    });
    format!("sqlite://{data_dir}/duraflow.db")
}
