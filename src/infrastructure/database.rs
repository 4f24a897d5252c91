//! Database handle: a thin typed facade over a `sqlx` SQLite pool.
//!
//! The schema itself lives in [`MIGRATIONS`]; this module is the small
//! amount of glue the daemon owns: a pool, a lexical-order migration
//! apply step, and a connection constructor used by the index and
//! event-queue layers.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::FsalResult;

/// One embedded migration, applied in ascending `name` order.
struct Migration {
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_create_fsentries",
        sql: "CREATE TABLE IF NOT EXISTS fsentries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            parent_id INTEGER NOT NULL DEFAULT 0,
            type INTEGER NOT NULL,
            name TEXT NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            create_time REAL NOT NULL,
            modify_time REAL NOT NULL,
            path TEXT NOT NULL UNIQUE,
            base_path TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS fsentries_parent_id ON fsentries(parent_id);",
    },
    Migration {
        name: "0002_create_events",
        sql: "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type TEXT NOT NULL,
            src TEXT NOT NULL,
            is_dir INTEGER NOT NULL
        );",
    },
    Migration {
        name: "0003_create_stats",
        sql: "CREATE TABLE IF NOT EXISTS dbmgr_stats (op_time REAL NOT NULL DEFAULT 0);
        INSERT INTO dbmgr_stats (op_time)
            SELECT 0 WHERE NOT EXISTS (SELECT 1 FROM dbmgr_stats);",
    },
];

/// Owns the connection pool and exposes migration + basic query helpers.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(path: &Path) -> FsalResult<Self> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let db = Database { pool };
        db.migrate().await?;
        Ok(db)
    }

    #[cfg(test)]
    pub async fn connect_memory() -> FsalResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Database { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> FsalResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _migrations (name TEXT PRIMARY KEY, applied_at REAL)",
        )
        .execute(&self.pool)
        .await?;

        let mut names: Vec<&str> = MIGRATIONS.iter().map(|m| m.name).collect();
        names.sort_unstable();

        for name in names {
            let migration = MIGRATIONS.iter().find(|m| m.name == name).unwrap();
            let already: Option<(String,)> =
                sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                    .bind(migration.name)
                    .fetch_optional(&self.pool)
                    .await?;
            if already.is_some() {
                continue;
            }
            debug!(migration = migration.name, "applying migration");
            let mut tx = self.pool.begin().await?;
            for statement in migration.sql.split(';') {
                let statement = statement.trim();
                if statement.is_empty() {
                    continue;
                }
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO _migrations (name, applied_at) VALUES (?, 0)")
                .bind(migration.name)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }
        info!(count = MIGRATIONS.len(), "database migrations up to date");
        Ok(())
    }
}
