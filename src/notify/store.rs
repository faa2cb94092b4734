//! Notification persistence using SQLite.
//!
//! Append-only bookkeeping of user-facing notifications. The only update
//! ever applied to a row is flipping its `read` flag.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// One delivered notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub title: String,
    pub message: String,
    /// Free-form type tag (e.g. "request_status")
    pub type_tag: String,
    pub read: bool,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Persists notification records in SQLite.
pub struct NotificationStore {
    conn: Mutex<Connection>,
}

impl NotificationStore {
    /// Opens (or creates) the SQLite database and ensures the table exists.
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open notification DB at {}", db_path))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_table()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Notification store lock poisoned"))
    }

    fn create_table(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS notifications (
                id           TEXT PRIMARY KEY,
                recipient_id TEXT NOT NULL,
                title        TEXT NOT NULL,
                message      TEXT NOT NULL,
                type_tag     TEXT NOT NULL,
                read         INTEGER NOT NULL DEFAULT 0,
                payload      TEXT NOT NULL,
                created_at   TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_recipient
                ON notifications (recipient_id, created_at);",
        )
        .context("Failed to create notifications table")?;
        Ok(())
    }

    /// Appends a new unread notification for `recipient_id`.
    pub fn append(
        &self,
        recipient_id: &str,
        title: &str,
        message: &str,
        type_tag: &str,
        payload: Value,
    ) -> Result<Notification> {
        let notification = Notification {
            id: Uuid::now_v7().to_string(),
            recipient_id: recipient_id.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            type_tag: type_tag.to_string(),
            read: false,
            payload,
            created_at: Utc::now(),
        };

        let payload_json = serde_json::to_string(&notification.payload)
            .context("Failed to serialize notification payload")?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notifications (id, recipient_id, title, message, type_tag, read, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
            params![
                notification.id,
                notification.recipient_id,
                notification.title,
                notification.message,
                notification.type_tag,
                payload_json,
                notification.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )
        .context("Failed to insert notification")?;

        Ok(notification)
    }

    /// Returns a recipient's notifications, newest first.
    pub fn list_for_recipient(
        &self,
        recipient_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, recipient_id, title, message, type_tag, read, payload, created_at
                 FROM notifications
                 WHERE recipient_id = ?1 AND (?2 = 0 OR read = 0)
                 ORDER BY created_at DESC, id DESC",
            )
            .context("Failed to prepare notification query")?;

        let rows = stmt
            .query_map(params![recipient_id, unread_only as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .context("Failed to query notifications")?;

        let mut notifications = Vec::new();
        for row in rows {
            let (id, recipient_id, title, message, type_tag, read, payload, created_at) =
                row.context("Failed to read notification row")?;
            let payload = serde_json::from_str(&payload)
                .with_context(|| format!("Failed to parse payload for notification {}", id))?;
            let created_at = created_at
                .parse()
                .with_context(|| format!("Failed to parse created_at for notification {}", id))?;
            notifications.push(Notification {
                id,
                recipient_id,
                title,
                message,
                type_tag,
                read: read != 0,
                payload,
                created_at,
            });
        }
        Ok(notifications)
    }

    /// Marks a notification read. Returns false when the id does not exist.
    pub fn mark_read(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute("UPDATE notifications SET read = 1 WHERE id = ?1", params![id])
            .context("Failed to mark notification read")?;
        Ok(changed > 0)
    }
}
