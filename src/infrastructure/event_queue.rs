//! Persistent, ordered, drain-on-ack change-event queue.
//!
//! Backed by the `events` table. Events are never merged, deduplicated or
//! compacted: `add`/`add_many` simply append. `peek` is non-destructive;
//! `drain` is the client's acknowledgement and is the only way rows leave
//! the table.

use crate::domain::event::{ChangeEvent, EventKind, QueuedEvent};
use crate::error::FsalResult;
use crate::infrastructure::database::Database;

#[derive(Clone)]
pub struct EventQueue {
    db: Database,
}

impl EventQueue {
    pub fn new(db: Database) -> Self {
        EventQueue { db }
    }

    pub async fn add(&self, event: &ChangeEvent) -> FsalResult<()> {
        sqlx::query("INSERT INTO events (type, src, is_dir) VALUES (?, ?, ?)")
            .bind(event.kind.as_str())
            .bind(&event.src)
            .bind(event.is_dir)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Batched insert in one transaction. Order of `events` is preserved
    /// in the assigned auto-increment ids.
    pub async fn add_many(&self, events: &[ChangeEvent]) -> FsalResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut tx = self.db.pool().begin().await?;
        for event in events {
            sqlx::query("INSERT INTO events (type, src, is_dir) VALUES (?, ?, ?)")
                .bind(event.kind.as_str())
                .bind(&event.src)
                .bind(event.is_dir)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Return up to `limit` oldest rows in ascending id order. Does not
    /// remove them.
    pub async fn peek(&self, limit: i64) -> FsalResult<Vec<QueuedEvent>> {
        let rows: Vec<(i64, String, String, bool)> = sqlx::query_as(
            "SELECT id, type, src, is_dir FROM events ORDER BY id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(row_to_event).collect())
    }

    /// Select the oldest `limit` ids and delete them, inside one
    /// transaction. Returns what was drained.
    pub async fn drain(&self, limit: i64) -> FsalResult<Vec<QueuedEvent>> {
        let mut tx = self.db.pool().begin().await?;
        let rows: Vec<(i64, String, String, bool)> = sqlx::query_as(
            "SELECT id, type, src, is_dir FROM events ORDER BY id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;
        for (id, _, _, _) in &rows {
            sqlx::query("DELETE FROM events WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(rows.into_iter().map(row_to_event).collect())
    }
}

fn row_to_event((id, kind, src, is_dir): (i64, String, String, bool)) -> QueuedEvent {
    let kind = EventKind::parse(&kind).unwrap_or(EventKind::Modified);
    QueuedEvent { id, event: ChangeEvent { kind, src, is_dir } }
}
