/// Database layer for Modguard
///
/// Owns the SQLite pool, runs embedded migrations and hands out write
/// transactions serialized through a process-wide gate.
use crate::error::{ModError, ModResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
        }
    }
}

/// Shared handle to the moderation database
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
}

/// A write transaction holding the write gate until commit or drop.
///
/// Dropping without `commit` rolls back.
pub struct WriteTxn {
    tx: Transaction<'static, Sqlite>,
    _gate: OwnedMutexGuard<()>,
}

impl WriteTxn {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> ModResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

impl Database {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Open (creating if missing) a file-backed database and migrate it
    pub async fn open(path: &Path, options: DatabaseOptions) -> ModResult<Self> {
        let pool = create_pool(path, options).await?;
        run_migrations(&pool).await?;
        test_connection(&pool).await?;
        Ok(Self::from_pool(pool))
    }

    /// Single-connection in-memory database, migrated
    pub async fn in_memory() -> ModResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // One connection that never expires, otherwise the database vanishes
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;
        Ok(Self::from_pool(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a write transaction after acquiring the write gate
    pub async fn begin_write(&self) -> ModResult<WriteTxn> {
        let gate = Arc::clone(&self.write_gate).lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(WriteTxn { tx, _gate: gate })
    }
}

/// Create a SQLite connection pool
pub async fn create_pool(path: &Path, options: DatabaseOptions) -> ModResult<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(if options.enable_wal {
                    sqlx::sqlite::SqliteJournalMode::Wal
                } else {
                    sqlx::sqlite::SqliteJournalMode::Delete
                })
                .foreign_keys(true)
                .busy_timeout(std::time::Duration::from_secs(5)),
        )
        .await?;

    Ok(pool)
}

/// Run migrations for a database
/// Migrations are embedded at compile time from ./migrations directory
pub async fn run_migrations(pool: &SqlitePool) -> ModResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| ModError::Internal(format!("Migration failed: {}", e)))?;

    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> ModResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
