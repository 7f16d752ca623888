//! SQLite-backed persistent store.
//!
//! Split into focused submodules:
//! - `accounts` — WhatsApp account rows and their session status
//! - `contacts` — contact list CRUD and search
//! - `templates` — message template CRUD
//! - `messages` — outgoing message log

mod accounts;
mod contacts;
mod messages;
mod templates;

pub use contacts::ContactFields;
pub use messages::MessageCounts;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;
use wagate_core::{config::StoreConfig, error::WagateError, shellexpand};

/// Default page size for list queries.
pub const DEFAULT_LIMIT: i64 = 50;
/// Hard cap on page size for list queries.
pub const MAX_LIMIT: i64 = 500;

/// Persistent store backed by SQLite.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new store, running migrations on first use.
    pub async fn new(config: &StoreConfig) -> Result<Self, WagateError> {
        let db_path = shellexpand(&config.db_path);

        // Ensure parent directory exists.
        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| WagateError::Store(format!("failed to create data dir: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| WagateError::Store(format!("invalid db path: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| WagateError::Store(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;

        info!("Store initialized at {db_path}");

        Ok(Self { pool })
    }

    /// Open a private in-memory store (tests and dry runs).
    pub async fn in_memory() -> Result<Self, WagateError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| WagateError::Store(format!("invalid db path: {e}")))?
            .foreign_keys(true);
        // A single connection: every new in-memory connection is a fresh database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| WagateError::Store(format!("failed to open in-memory sqlite: {e}")))?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run SQL migrations, tracking which have already been applied.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), WagateError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| WagateError::Store(format!("failed to create migrations table: {e}")))?;

        let migrations: &[(&str, &str)] = &[
            ("001_init", include_str!("../../migrations/001_init.sql")),
            (
                "002_message_log",
                include_str!("../../migrations/002_message_log.sql"),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<(String,)> =
                sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                    .bind(name)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        WagateError::Store(format!("failed to check migration {name}: {e}"))
                    })?;

            if applied.is_some() {
                continue;
            }

            sqlx::raw_sql(sql)
                .execute(pool)
                .await
                .map_err(|e| WagateError::Store(format!("migration {name} failed: {e}")))?;

            sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await
                .map_err(|e| {
                    WagateError::Store(format!("failed to record migration {name}: {e}"))
                })?;

            info!("applied migration {name}");
        }
        Ok(())
    }
}

/// Current time as stored in TEXT columns (fixed width, so it sorts as text).
pub(crate) fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored RFC 3339 timestamp.
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, WagateError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| WagateError::Store(format!("bad timestamp '{raw}': {e}")))
}

/// Clamp user-supplied paging to sane values.
pub(crate) fn page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

/// Map a sqlx error, turning unique-constraint violations into `Conflict`.
pub(crate) fn write_err(what: &str, e: sqlx::Error) -> WagateError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            WagateError::Conflict(format!("{what} already exists"))
        }
        _ => WagateError::Store(format!("{what} write failed: {e}")),
    }
}
