//! Friend Request & Contacts Module
//!
//! A friendship is a `friend_requests` row in the `accepted` state; there
//! is no separate contacts table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::core::auth::{UserInfo, UserRow, USER_COLUMNS};
use crate::core::db::{now_timestamp, parse_timestamp};

const SEARCH_LIMIT: i64 = 20;

#[derive(Debug, thiserror::Error)]
pub enum FriendError {
    #[error("User not found")]
    UserNotFound,
    #[error("Friend request not found")]
    RequestNotFound,
    #[error("Friendship not found")]
    FriendshipNotFound,
    #[error("Not authorized to {0} this request")]
    NotRecipient(&'static str),
    #[error("Cannot send friend request to yourself")]
    SelfRequest,
    #[error("Already friends")]
    AlreadyFriends,
    #[error("Friend request already sent")]
    AlreadyPending,
    #[error("Friend request is no longer pending")]
    NotPending,
    #[error("Search query is required")]
    EmptyQuery,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Friend request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Friend request record, with both parties' display fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FriendRequest {
    pub id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub sender_avatar: String,
    pub recipient_id: String,
    pub recipient_username: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    Friends,
    Pending,
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSearchResult {
    #[serde(flatten)]
    pub user: UserInfo,
    pub friendship_status: FriendshipStatus,
}

const REQUEST_SELECT: &str = r#"
    SELECT fr.id, fr.sender_id, s.username AS sender_username, s.avatar AS sender_avatar,
           fr.recipient_id, r.username AS recipient_username,
           fr.status, fr.created_at, fr.updated_at
    FROM friend_requests fr
    JOIN users s ON s.id = fr.sender_id
    JOIN users r ON r.id = fr.recipient_id
"#;

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: String,
    sender_id: String,
    sender_username: String,
    sender_avatar: String,
    recipient_id: String,
    recipient_username: String,
    status: RequestStatus,
    created_at: String,
    updated_at: String,
}

impl From<RequestRow> for FriendRequest {
    fn from(row: RequestRow) -> Self {
        Self {
            id: row.id,
            sender_id: row.sender_id,
            sender_username: row.sender_username,
            sender_avatar: row.sender_avatar,
            recipient_id: row.recipient_id,
            recipient_username: row.recipient_username,
            status: row.status,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        }
    }
}

/// Friend manager handles all friend-related operations
pub struct FriendManager {
    pool: SqlitePool,
}

impl FriendManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get_request(&self, request_id: &str) -> Result<Option<FriendRequest>, FriendError> {
        let row: Option<RequestRow> =
            sqlx::query_as(&format!("{} WHERE fr.id = ?", REQUEST_SELECT))
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(FriendRequest::from))
    }

    /// Send a friend request
    pub async fn send_request(
        &self,
        sender_id: &str,
        recipient_id: &str,
    ) -> Result<FriendRequest, FriendError> {
        if sender_id == recipient_id {
            return Err(FriendError::SelfRequest);
        }

        let recipient: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
            .bind(recipient_id)
            .fetch_optional(&self.pool)
            .await?;
        if recipient.is_none() {
            return Err(FriendError::UserNotFound);
        }

        // Either direction counts
        let existing: Vec<(RequestStatus,)> = sqlx::query_as(
            "SELECT status FROM friend_requests
             WHERE (sender_id = ? AND recipient_id = ?) OR (sender_id = ? AND recipient_id = ?)",
        )
        .bind(sender_id)
        .bind(recipient_id)
        .bind(recipient_id)
        .bind(sender_id)
        .fetch_all(&self.pool)
        .await?;

        if existing.iter().any(|(s,)| *s == RequestStatus::Accepted) {
            return Err(FriendError::AlreadyFriends);
        }
        if existing.iter().any(|(s,)| *s == RequestStatus::Pending) {
            return Err(FriendError::AlreadyPending);
        }

        let mut tx = self.pool.begin().await?;

        // Rejected rows make way for a fresh request
        sqlx::query(
            "DELETE FROM friend_requests
             WHERE status = 'rejected'
               AND ((sender_id = ? AND recipient_id = ?) OR (sender_id = ? AND recipient_id = ?))",
        )
        .bind(sender_id)
        .bind(recipient_id)
        .bind(recipient_id)
        .bind(sender_id)
        .execute(&mut *tx)
        .await?;

        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO friend_requests (id, sender_id, recipient_id, status, created_at, updated_at)
             VALUES (?, ?, ?, 'pending', ?, ?)",
        )
        .bind(&id)
        .bind(sender_id)
        .bind(recipient_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!("[Friends] Request {} sent from {} to {}", id, sender_id, recipient_id);

        self.get_request(&id)
            .await?
            .ok_or(FriendError::RequestNotFound)
    }

    pub async fn accept(&self, request_id: &str, user_id: &str) -> Result<FriendRequest, FriendError> {
        self.respond(request_id, user_id, RequestStatus::Accepted, "accept")
            .await
    }

    pub async fn reject(&self, request_id: &str, user_id: &str) -> Result<FriendRequest, FriendError> {
        self.respond(request_id, user_id, RequestStatus::Rejected, "reject")
            .await
    }

    async fn respond(
        &self,
        request_id: &str,
        user_id: &str,
        status: RequestStatus,
        action: &'static str,
    ) -> Result<FriendRequest, FriendError> {
        let request = self
            .get_request(request_id)
            .await?
            .ok_or(FriendError::RequestNotFound)?;

        if request.recipient_id != user_id {
            return Err(FriendError::NotRecipient(action));
        }
        if request.status != RequestStatus::Pending {
            return Err(FriendError::NotPending);
        }

        // Only a still-pending row may change; a racing response loses here
        let updated = sqlx::query(
            "UPDATE friend_requests SET status = ?, updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(status)
        .bind(now_timestamp())
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(FriendError::NotPending);
        }

        info!("[Friends] Request {} {}ed by {}", request_id, action, user_id);

        self.get_request(request_id)
            .await?
            .ok_or(FriendError::RequestNotFound)
    }

    /// Users on the other side of every accepted request
    pub async fn friends(&self, user_id: &str) -> Result<Vec<UserInfo>, FriendError> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            r#"SELECT {} FROM users u
               JOIN friend_requests fr
                 ON (fr.sender_id = ? AND fr.recipient_id = u.id)
                 OR (fr.recipient_id = ? AND fr.sender_id = u.id)
               WHERE fr.status = 'accepted'
               ORDER BY u.username"#,
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UserInfo::from).collect())
    }

    /// Pending requests received by `user_id`, newest first
    pub async fn pending(&self, user_id: &str) -> Result<Vec<FriendRequest>, FriendError> {
        let rows: Vec<RequestRow> = sqlx::query_as(&format!(
            "{} WHERE fr.recipient_id = ? AND fr.status = 'pending' ORDER BY fr.created_at DESC",
            REQUEST_SELECT
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FriendRequest::from).collect())
    }

    /// Case-insensitive search on username or email
    pub async fn search(&self, user_id: &str, query: &str) -> Result<Vec<UserSearchResult>, FriendError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(FriendError::EmptyQuery);
        }
        let pattern = format!("%{}%", escape_like(&query.to_lowercase()));

        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            r#"SELECT {} FROM users u
               WHERE u.id != ?
                 AND (LOWER(u.username) LIKE ? ESCAPE '\' OR LOWER(u.email) LIKE ? ESCAPE '\')
               ORDER BY u.username
               LIMIT ?"#,
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(&pattern)
        .bind(&pattern)
        .bind(SEARCH_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let relations: Vec<(String, String, RequestStatus)> = sqlx::query_as(
            "SELECT sender_id, recipient_id, status FROM friend_requests WHERE sender_id = ? OR recipient_id = ?",
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut statuses: HashMap<String, FriendshipStatus> = HashMap::new();
        for (sender, recipient, status) in relations {
            let other = if sender == user_id { recipient } else { sender };
            let status = match status {
                RequestStatus::Accepted => FriendshipStatus::Friends,
                RequestStatus::Pending => FriendshipStatus::Pending,
                RequestStatus::Rejected => continue,
            };
            statuses
                .entry(other)
                .and_modify(|s| {
                    if status == FriendshipStatus::Friends {
                        *s = status;
                    }
                })
                .or_insert(status);
        }

        Ok(rows
            .into_iter()
            .map(UserInfo::from)
            .map(|user| {
                let friendship_status = statuses
                    .get(&user.id)
                    .copied()
                    .unwrap_or(FriendshipStatus::None);
                UserSearchResult {
                    user,
                    friendship_status,
                }
            })
            .collect())
    }

    /// Remove an accepted friendship in either direction
    pub async fn remove(&self, user_id: &str, friend_id: &str) -> Result<(), FriendError> {
        let result = sqlx::query(
            "DELETE FROM friend_requests
             WHERE status = 'accepted'
               AND ((sender_id = ? AND recipient_id = ?) OR (sender_id = ? AND recipient_id = ?))",
        )
        .bind(user_id)
        .bind(friend_id)
        .bind(friend_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FriendError::FriendshipNotFound);
        }

        info!("[Friends] {} removed {}", user_id, friend_id);
        Ok(())
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
