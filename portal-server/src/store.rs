//! SQLite-backed message store.
//!
//! Messages are partitioned by order and totally ordered by
//! `(created_at, id)`. The only mutable column is `read_at`, which moves from
//! NULL to a timestamp once and never back.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::ChatError;
use crate::models::{Message, MessageId, OrderId, UserId};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        order_id INTEGER NOT NULL,
        sender_id INTEGER NOT NULL,
        receiver_id INTEGER NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        read_at INTEGER,
        CHECK (sender_id != receiver_id)
    );

    CREATE INDEX IF NOT EXISTS idx_messages_order_created ON messages(order_id, created_at, id);
    CREATE INDEX IF NOT EXISTS idx_messages_unread ON messages(order_id, receiver_id, read_at);
";

const MESSAGE_COLUMNS: &str =
    "id, order_id, sender_id, receiver_id, content, created_at, read_at";

/// Messages flipped to read by a single bulk update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkedRead {
    pub message_ids: Vec<MessageId>,
    pub read_at: i64,
}

impl MarkedRead {
    pub fn count(&self) -> usize {
        self.message_ids.len()
    }
}

/// Latest message and unread count for one order from one viewer's side.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrderActivity {
    pub last_message: Option<Message>,
    pub unread_count: u64,
}

pub struct MessageStore(Mutex<Connection>);

impl MessageStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, ChatError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, ChatError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self(Mutex::new(conn)))
    }

    /// Run store calls on the blocking pool, off the async workers.
    pub async fn blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&MessageStore) -> Result<T, ChatError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| ChatError::Storage(format!("store task failed: {}", e)))?
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ChatError> {
        self.0
            .lock()
            .map_err(|e| ChatError::Storage(format!("Lock poisoned: {}", e)))
    }

    /// Store a new unread message stamped with the server clock.
    pub fn append(
        &self,
        order_id: OrderId,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> Result<Message, ChatError> {
        let now = chrono::Utc::now().timestamp_millis();
        self.insert(order_id, sender_id, receiver_id, content, now)
    }

    fn insert(
        &self,
        order_id: OrderId,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
        created_at: i64,
    ) -> Result<Message, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::validation("Message cannot be empty"));
        }
        if sender_id == receiver_id {
            return Err(ChatError::validation("Cannot send a message to yourself"));
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (order_id, sender_id, receiver_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![order_id, sender_id, receiver_id, content, created_at],
        )?;

        Ok(Message {
            id: conn.last_insert_rowid(),
            order_id,
            sender_id,
            receiver_id,
            content: content.to_string(),
            created_at,
            read_at: None,
        })
    }

    pub fn get(&self, message_id: MessageId) -> Result<Option<Message>, ChatError> {
        let conn = self.conn()?;
        let message = conn
            .query_row(
                &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                [message_id],
                message_from_row,
            )
            .optional()?;
        Ok(message)
    }

    /// Full current state of one order's conversation, oldest first.
    pub fn list_by_order(&self, order_id: OrderId) -> Result<Vec<Message>, ChatError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE order_id = ?1 ORDER BY created_at ASC, id ASC",
            MESSAGE_COLUMNS
        ))?;
        let messages = stmt
            .query_map([order_id], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Mark one message read. Re-marking returns the existing state untouched.
    pub fn mark_read(&self, message_id: MessageId) -> Result<Message, ChatError> {
        let now = chrono::Utc::now().timestamp_millis();
        let conn = self.conn()?;
        conn.execute(
            "UPDATE messages SET read_at = ?1 WHERE id = ?2 AND read_at IS NULL",
            params![now, message_id],
        )?;
        conn.query_row(
            &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
            [message_id],
            message_from_row,
        )
        .optional()?
        .ok_or_else(|| ChatError::validation(format!("message {} not found", message_id)))
    }

    /// Mark every unread message addressed to `receiver_id` in the order.
    ///
    /// Runs in a single transaction, so concurrent readers see each message
    /// either before or after the update, never half-written.
    pub fn mark_all_read_for_receiver_in_order(
        &self,
        order_id: OrderId,
        receiver_id: UserId,
    ) -> Result<MarkedRead, ChatError> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut stmt = tx.prepare(
            "SELECT id FROM messages
             WHERE order_id = ?1 AND receiver_id = ?2 AND read_at IS NULL
             ORDER BY id",
        )?;
        let message_ids = stmt
            .query_map([order_id, receiver_id], |row| row.get(0))?
            .collect::<Result<Vec<MessageId>, _>>()?;
        drop(stmt);

        if !message_ids.is_empty() {
            tx.execute(
                "UPDATE messages SET read_at = ?1
                 WHERE order_id = ?2 AND receiver_id = ?3 AND read_at IS NULL",
                params![now, order_id, receiver_id],
            )?;
        }
        tx.commit()?;

        debug!(
            order_id,
            receiver_id,
            marked = message_ids.len(),
            "Marked messages read"
        );

        Ok(MarkedRead {
            message_ids,
            read_at: now,
        })
    }

    /// Latest message and unread count for `viewer_id` in one order.
    pub fn activity(
        &self,
        order_id: OrderId,
        viewer_id: UserId,
    ) -> Result<OrderActivity, ChatError> {
        let conn = self.conn()?;

        let last_message = conn
            .query_row(
                &format!(
                    "SELECT {} FROM messages WHERE order_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    MESSAGE_COLUMNS
                ),
                [order_id],
                message_from_row,
            )
            .optional()?;

        let unread_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages
             WHERE order_id = ?1 AND receiver_id = ?2 AND read_at IS NULL",
            [order_id, viewer_id],
            |row| row.get(0),
        )?;

        Ok(OrderActivity {
            last_message,
            unread_count: unread_count.max(0) as u64,
        })
    }

    #[cfg(test)]
    pub(crate) fn break_for_tests(&self) {
        if let Ok(conn) = self.0.lock() {
            let _ = conn.execute_batch("DROP TABLE messages");
        }
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        order_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
        read_at: row.get(6)?,
    })
}
