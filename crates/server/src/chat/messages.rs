//! Direct message storage
//!
//! The store owns the canonical message rows. The relay only calls
//! `create`; history, read receipts and soft deletes are driven by the
//! REST handlers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::core::db::{now_timestamp, parse_timestamp};

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),
    #[error("User not found: {0}")]
    UnknownUser(String),
    #[error("Message not found: {0}")]
    UnknownMessage(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Message store unavailable: {0}")]
    Unavailable(String),
}

/// Display fields of one side of a conversation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub username: String,
    pub avatar: String,
}

/// A persisted direct message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub sender: Participant,
    pub recipient: Participant,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    /// Set once every party has hidden the message
    pub is_deleted: bool,
    /// Users who have hidden this message from their own history
    pub deleted_by: Vec<String>,
    pub reply_to: Option<String>,
}

/// Outcome of hiding a message for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SoftDelete {
    Hidden { fully_deleted: bool },
    NotFound,
    Forbidden,
}

#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Persist a new message from `sender_id` to `recipient_id`
    async fn create(
        &self,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<Message, StoreError>;

    /// The newest `limit` messages between two users that `viewer_id` has
    /// not hidden, oldest first
    async fn conversation(
        &self,
        viewer_id: &str,
        peer_id: &str,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError>;

    /// Mark everything `sender_id` sent to `recipient_id` as read
    async fn mark_read(&self, sender_id: &str, recipient_id: &str) -> Result<u64, StoreError>;

    /// Hide a message from `user_id`'s history
    async fn soft_delete(&self, message_id: &str, user_id: &str) -> Result<SoftDelete, StoreError>;
}

/// Trim and bound message content
pub fn normalize_content(raw: &str, max_len: usize) -> Result<String, StoreError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(StoreError::Validation(
            "Message content is required".to_string(),
        ));
    }
    if content.chars().count() > max_len {
        return Err(StoreError::Validation(format!(
            "Message must be less than {} characters",
            max_len
        )));
    }
    Ok(content.to_string())
}

const MESSAGE_SELECT: &str = r#"
    SELECT m.id, m.sender_id, m.recipient_id, m.content, m.created_at,
           m.is_read, m.read_at, m.is_deleted, m.reply_to,
           s.username AS sender_username, s.avatar AS sender_avatar,
           r.username AS recipient_username, r.avatar AS recipient_avatar,
           (SELECT GROUP_CONCAT(d.user_id) FROM message_deletions d WHERE d.message_id = m.id) AS deleted_by
    FROM messages m
    JOIN users s ON s.id = m.sender_id
    JOIN users r ON r.id = m.recipient_id
"#;

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    sender_id: String,
    recipient_id: String,
    content: String,
    created_at: String,
    is_read: bool,
    read_at: Option<String>,
    is_deleted: bool,
    reply_to: Option<String>,
    sender_username: String,
    sender_avatar: String,
    recipient_username: String,
    recipient_avatar: String,
    deleted_by: Option<String>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            sender: Participant {
                username: row.sender_username,
                avatar: row.sender_avatar,
            },
            recipient: Participant {
                username: row.recipient_username,
                avatar: row.recipient_avatar,
            },
            content: row.content,
            created_at: parse_timestamp(&row.created_at),
            is_read: row.is_read,
            read_at: row.read_at.as_deref().map(parse_timestamp),
            is_deleted: row.is_deleted,
            deleted_by: row
                .deleted_by
                .map(|ids| ids.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
            reply_to: row.reply_to,
        }
    }
}

/// SQLite-backed message store
pub struct SqliteMessageStore {
    pool: SqlitePool,
    max_len: usize,
}

impl SqliteMessageStore {
    pub fn new(pool: SqlitePool, max_len: usize) -> Self {
        Self { pool, max_len }
    }

    async fn participant(&self, user_id: &str) -> Result<Participant, StoreError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT username, avatar FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        let (username, avatar) = row.ok_or_else(|| StoreError::UnknownUser(user_id.to_string()))?;
        Ok(Participant { username, avatar })
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn create(
        &self,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<Message, StoreError> {
        let content = normalize_content(content, self.max_len)?;

        let sender = self.participant(sender_id).await?;
        let recipient = self.participant(recipient_id).await?;

        if let Some(reply_id) = reply_to {
            let row: Option<(String,)> = sqlx::query_as("SELECT id FROM messages WHERE id = ?")
                .bind(reply_id)
                .fetch_optional(&self.pool)
                .await?;
            if row.is_none() {
                return Err(StoreError::UnknownMessage(reply_id.to_string()));
            }
        }

        let created_at = now_timestamp();
        let message = Message {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            sender,
            recipient,
            content,
            created_at: parse_timestamp(&created_at),
            is_read: false,
            read_at: None,
            is_deleted: false,
            deleted_by: Vec::new(),
            reply_to: reply_to.map(str::to_string),
        };

        sqlx::query(
            "INSERT INTO messages (id, sender_id, recipient_id, content, created_at, reply_to) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.sender_id)
        .bind(&message.recipient_id)
        .bind(&message.content)
        .bind(&created_at)
        .bind(&message.reply_to)
        .execute(&self.pool)
        .await?;

        Ok(message)
    }

    async fn conversation(
        &self,
        viewer_id: &str,
        peer_id: &str,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let query = format!(
            r#"{}
            WHERE ((m.sender_id = ? AND m.recipient_id = ?) OR (m.sender_id = ? AND m.recipient_id = ?))
              AND NOT EXISTS (
                  SELECT 1 FROM message_deletions d WHERE d.message_id = m.id AND d.user_id = ?
              )
            ORDER BY m.seq DESC
            LIMIT ?"#,
            MESSAGE_SELECT
        );

        let rows: Vec<MessageRow> = sqlx::query_as(&query)
            .bind(viewer_id)
            .bind(peer_id)
            .bind(peer_id)
            .bind(viewer_id)
            .bind(viewer_id)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;

        // Newest first from the query; callers want chronological order
        let mut messages: Vec<Message> = rows.into_iter().map(Message::from).collect();
        messages.reverse();
        Ok(messages)
    }

    async fn mark_read(&self, sender_id: &str, recipient_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = 1, read_at = ? WHERE sender_id = ? AND recipient_id = ? AND is_read = 0",
        )
        .bind(now_timestamp())
        .bind(sender_id)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn soft_delete(&self, message_id: &str, user_id: &str) -> Result<SoftDelete, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, String)> =
            sqlx::query_as("SELECT sender_id, recipient_id FROM messages WHERE id = ?")
                .bind(message_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((sender_id, recipient_id)) = row else {
            return Ok(SoftDelete::NotFound);
        };

        if user_id != sender_id && user_id != recipient_id {
            return Ok(SoftDelete::Forbidden);
        }

        sqlx::query(
            "INSERT OR IGNORE INTO message_deletions (message_id, user_id, deleted_at) VALUES (?, ?, ?)",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(now_timestamp())
        .execute(&mut *tx)
        .await?;

        let (hidden_by,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM message_deletions WHERE message_id = ?")
                .bind(message_id)
                .fetch_one(&mut *tx)
                .await?;

        let parties = if sender_id == recipient_id { 1 } else { 2 };
        let fully_deleted = hidden_by >= parties;

        if fully_deleted {
            sqlx::query("UPDATE messages SET is_deleted = 1 WHERE id = ?")
                .bind(message_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        info!(message_id = %message_id, user_id = %user_id, fully_deleted, "[Messages] Message hidden");

        Ok(SoftDelete::Hidden { fully_deleted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::{insert_test_user, test_pool};
    use tempfile::TempDir;

    async fn setup(dir: &TempDir) -> (SqliteMessageStore, String, String) {
        let pool = test_pool(dir).await;
        let alice = insert_test_user(&pool, "alice").await;
        let bob = insert_test_user(&pool, "bob").await;
        (SqliteMessageStore::new(pool, 1000), alice, bob)
    }

    #[tokio::test]
    async fn test_create_validates_content() {
        let dir = TempDir::new().unwrap();
        let (store, alice, bob) = setup(&dir).await;

        let msg = store.create(&alice, &bob, "  hello  ", None).await.unwrap();
        assert_eq!(msg.content, "hello");
        assert!(!msg.is_read);
        assert_eq!(msg.sender.username, "alice");
        assert_eq!(msg.recipient.username, "bob");

        assert!(matches!(
            store.create(&alice, &bob, "   ", None).await,
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.create(&alice, &bob, &"x".repeat(1001), None).await,
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.create(&alice, "nobody", "hi", None).await,
            Err(StoreError::UnknownUser(_))
        ));
        assert!(matches!(
            store.create(&alice, &bob, "hi", Some("missing")).await,
            Err(StoreError::UnknownMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_conversation_order_and_limit() {
        let dir = TempDir::new().unwrap();
        let (store, alice, bob) = setup(&dir).await;

        for i in 0..5 {
            let (from, to) = if i % 2 == 0 { (&alice, &bob) } else { (&bob, &alice) };
            store.create(from, to, &format!("msg {}", i), None).await.unwrap();
        }

        let all = store.conversation(&alice, &bob, DEFAULT_HISTORY_LIMIT).await.unwrap();
        let contents: Vec<&str> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);
        assert_eq!(all[1].sender.username, "bob");
        assert_eq!(all[1].recipient.username, "alice");

        let latest = store.conversation(&bob, &alice, 2).await.unwrap();
        let contents: Vec<&str> = latest.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 3", "msg 4"]);
    }

    #[tokio::test]
    async fn test_mark_read_counts_only_unread_from_sender() {
        let dir = TempDir::new().unwrap();
        let (store, alice, bob) = setup(&dir).await;

        store.create(&alice, &bob, "one", None).await.unwrap();
        store.create(&alice, &bob, "two", None).await.unwrap();
        store.create(&bob, &alice, "reply", None).await.unwrap();

        assert_eq!(store.mark_read(&alice, &bob).await.unwrap(), 2);
        assert_eq!(store.mark_read(&alice, &bob).await.unwrap(), 0);

        let history = store.conversation(&bob, &alice, 10).await.unwrap();
        assert!(history.iter().filter(|m| m.sender_id == alice).all(|m| m.is_read && m.read_at.is_some()));
        assert!(history.iter().filter(|m| m.sender_id == bob).all(|m| !m.is_read));
    }

    #[tokio::test]
    async fn test_soft_delete_hides_per_user() {
        let dir = TempDir::new().unwrap();
        let (store, alice, bob) = setup(&dir).await;
        let pool = store.pool.clone();
        let mallory = insert_test_user(&pool, "mallory").await;

        let msg = store.create(&alice, &bob, "secret", None).await.unwrap();

        assert_eq!(store.soft_delete("missing", &alice).await.unwrap(), SoftDelete::NotFound);
        assert_eq!(store.soft_delete(&msg.id, &mallory).await.unwrap(), SoftDelete::Forbidden);

        assert_eq!(
            store.soft_delete(&msg.id, &alice).await.unwrap(),
            SoftDelete::Hidden { fully_deleted: false }
        );
        // Hiding twice is a no-op
        assert_eq!(
            store.soft_delete(&msg.id, &alice).await.unwrap(),
            SoftDelete::Hidden { fully_deleted: false }
        );

        assert!(store.conversation(&alice, &bob, 10).await.unwrap().is_empty());
        let bob_view = store.conversation(&bob, &alice, 10).await.unwrap();
        assert_eq!(bob_view.len(), 1);
        assert_eq!(bob_view[0].deleted_by, vec![alice.clone()]);

        assert_eq!(
            store.soft_delete(&msg.id, &bob).await.unwrap(),
            SoftDelete::Hidden { fully_deleted: true }
        );
        assert!(store.conversation(&bob, &alice, 10).await.unwrap().is_empty());
    }
}
