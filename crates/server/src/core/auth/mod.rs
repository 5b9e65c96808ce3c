//! Authentication Module
//!
//! Handles account registration, login, and session management.
//! Sessions are opaque tokens persisted in SQLite with an expiry; the same
//! manager resolves socket credentials for the relay.

pub mod handlers;
pub mod middleware;

use async_trait::async_trait;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::db::{format_timestamp, now_timestamp, parse_timestamp};
use crate::relay::{AuthRejection, Identity, IdentityVerifier, ProfileStore};

pub(crate) const USER_COLUMNS: &str = "u.id, u.username, u.email, u.avatar, u.created_at, u.last_seen";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("Email already registered")]
    EmailTaken,
    #[error("Username already taken")]
    UsernameTaken,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid or expired token")]
    InvalidSession,
    #[error("User not found")]
    UserNotFound,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Password hashing failed: {0}")]
    Hash(String),
}

/// Public user info (no sensitive data)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub email: String,
    pub avatar: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Filled in from the relay registry when served over REST
    #[serde(default)]
    pub is_online: bool,
}

#[derive(sqlx::FromRow)]
pub(crate) struct UserRow {
    id: String,
    username: String,
    email: String,
    avatar: String,
    created_at: String,
    last_seen: Option<String>,
}

impl From<UserRow> for UserInfo {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            avatar: row.avatar,
            created_at: parse_timestamp(&row.created_at),
            last_seen: row.last_seen.as_deref().map(parse_timestamp),
            is_online: false,
        }
    }
}

/// Session token for authenticated requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Auth manager handles all authentication
pub struct AuthManager {
    pool: SqlitePool,
    session_ttl: chrono::Duration,
    hash_cost: u32,
    /// In-memory session cache
    sessions: RwLock<HashMap<String, Session>>,
}

impl AuthManager {
    pub fn new(pool: SqlitePool, session_ttl: chrono::Duration) -> Self {
        Self {
            pool,
            session_ttl,
            hash_cost: DEFAULT_COST,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Override the bcrypt cost (tests use the minimum)
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    /// Register a new user and open a session for them
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<(UserInfo, Session), AuthError> {
        let username = validate_username(username)?;
        let email = validate_email(email)?;
        validate_password(password)?;

        let existing: Option<(String, String)> =
            sqlx::query_as("SELECT email, username FROM users WHERE email = ? OR username = ?")
                .bind(&email)
                .bind(&username)
                .fetch_optional(&self.pool)
                .await?;

        if let Some((existing_email, _)) = existing {
            return Err(if existing_email == email {
                AuthError::EmailTaken
            } else {
                AuthError::UsernameTaken
            });
        }

        let password_hash = self.hash_password(password.to_string()).await?;
        let id = Uuid::new_v4().to_string();
        let avatar = format!(
            "https://ui-avatars.com/api/?name={}&background=random",
            urlencoding::encode(&username)
        );
        let now = now_timestamp();

        let inserted = sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, avatar, created_at, last_seen) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&username)
        .bind(&email)
        .bind(&password_hash)
        .bind(&avatar)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        // Lost a race with a concurrent registration
        if let Err(sqlx::Error::Database(db_err)) = &inserted {
            if db_err.is_unique_violation() {
                return Err(if db_err.message().contains("users.email") {
                    AuthError::EmailTaken
                } else {
                    AuthError::UsernameTaken
                });
            }
        }
        inserted?;

        info!("[Auth] User registered: {} ({})", username, email);

        let session = self.create_session(&id).await?;
        let user = self.get_user(&id).await?;
        Ok((user, session))
    }

    /// Login user and create session
    pub async fn login(&self, email: &str, password: &str) -> Result<(UserInfo, Session), AuthError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::Validation(
                "Please provide email and password".to_string(),
            ));
        }

        let row: Option<(String, String)> =
            sqlx::query_as("SELECT id, password_hash FROM users WHERE email = ?")
                .bind(&email)
                .fetch_optional(&self.pool)
                .await?;

        let (user_id, password_hash) = row.ok_or(AuthError::InvalidCredentials)?;

        if !self.verify_password(password.to_string(), password_hash).await? {
            warn!("[Auth] Failed login attempt for {}", email);
            return Err(AuthError::InvalidCredentials);
        }

        let session = self.create_session(&user_id).await?;
        let user = self.get_user(&user_id).await?;

        info!("[Auth] User logged in: {}", user.username);

        Ok((user, session))
    }

    /// Create new session
    async fn create_session(&self, user_id: &str) -> Result<Session, AuthError> {
        let created_at = Utc::now();
        let session = Session {
            token: Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
            created_at,
            expires_at: created_at + self.session_ttl,
        };

        sqlx::query(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.token)
        .bind(&session.user_id)
        .bind(format_timestamp(session.created_at))
        .bind(format_timestamp(session.expires_at))
        .execute(&self.pool)
        .await?;

        // Cache session
        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session.clone());

        Ok(session)
    }

    /// Resolve a token to the user id it was issued for
    pub async fn session_user_id(&self, token: &str) -> Result<String, AuthError> {
        // Check cache first
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(token) {
                if session.expires_at > Utc::now() {
                    return Ok(session.user_id.clone());
                }
            }
        }

        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT user_id, created_at, expires_at FROM sessions WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        let (user_id, created_at, expires_at) = row.ok_or(AuthError::InvalidSession)?;
        let expires_at = parse_timestamp(&expires_at);

        if expires_at <= Utc::now() {
            self.sessions.write().await.remove(token);
            return Err(AuthError::InvalidSession);
        }

        self.sessions.write().await.insert(
            token.to_string(),
            Session {
                token: token.to_string(),
                user_id: user_id.clone(),
                created_at: parse_timestamp(&created_at),
                expires_at,
            },
        );

        Ok(user_id)
    }

    /// Validate session token
    pub async fn validate_session(&self, token: &str) -> Result<UserInfo, AuthError> {
        let user_id = self.session_user_id(token).await?;
        self.get_user(&user_id).await
    }

    /// Logout user (invalidate session)
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.sessions.write().await.remove(token);

        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        info!("[Auth] Session invalidated");

        Ok(())
    }

    /// Get user by ID
    pub async fn get_user(&self, user_id: &str) -> Result<UserInfo, AuthError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users u WHERE u.id = ?", USER_COLUMNS))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(UserInfo::from).ok_or(AuthError::UserNotFound)
    }

    /// List every user except the caller
    pub async fn list_users_except(&self, user_id: &str) -> Result<Vec<UserInfo>, AuthError> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users u WHERE u.id != ? ORDER BY u.username",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UserInfo::from).collect())
    }

    /// Stamp the user's last-seen time
    pub async fn touch_last_seen(&self, user_id: &str) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET last_seen = ? WHERE id = ?")
            .bind(now_timestamp())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn hash_password(&self, password: String) -> Result<String, AuthError> {
        let cost = self.hash_cost;
        tokio::task::spawn_blocking(move || hash(password, cost))
            .await
            .map_err(|e| AuthError::Hash(e.to_string()))?
            .map_err(|e| AuthError::Hash(e.to_string()))
    }

    async fn verify_password(&self, password: String, password_hash: String) -> Result<bool, AuthError> {
        tokio::task::spawn_blocking(move || verify(password, &password_hash))
            .await
            .map_err(|e| AuthError::Hash(e.to_string()))?
            .map_err(|e| AuthError::Hash(e.to_string()))
    }
}

#[async_trait]
impl IdentityVerifier for AuthManager {
    async fn verify(&self, credential: &str) -> Result<String, AuthRejection> {
        match self.session_user_id(credential).await {
            Ok(user_id) => Ok(user_id),
            Err(AuthError::InvalidSession) => Err(AuthRejection::InvalidCredential),
            Err(e) => {
                warn!(error = %e, "[Auth] Credential lookup failed");
                Err(AuthRejection::Internal)
            }
        }
    }
}

#[async_trait]
impl ProfileStore for AuthManager {
    async fn profile(&self, user_id: &str) -> Result<Option<Identity>, AuthRejection> {
        match self.get_user(user_id).await {
            Ok(user) => Ok(Some(Identity {
                id: user.id,
                username: user.username,
            })),
            Err(AuthError::UserNotFound) => Ok(None),
            Err(e) => {
                warn!(error = %e, "[Auth] Profile lookup failed");
                Err(AuthRejection::Internal)
            }
        }
    }

    async fn mark_last_seen(&self, user_id: &str) {
        if let Err(e) = self.touch_last_seen(user_id).await {
            warn!(user_id = %user_id, error = %e, "[Auth] Failed to update last_seen");
        }
    }
}

fn validate_username(raw: &str) -> Result<String, AuthError> {
    let username = raw.trim();
    let len = username.chars().count();
    if len < 3 {
        return Err(AuthError::Validation(
            "Username must be at least 3 characters".to_string(),
        ));
    }
    if len > 20 {
        return Err(AuthError::Validation(
            "Username must be less than 20 characters".to_string(),
        ));
    }
    Ok(username.to_string())
}

fn validate_email(raw: &str) -> Result<String, AuthError> {
    let email = raw.trim().to_lowercase();
    let invalid = || AuthError::Validation("Please provide a valid email".to_string());

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (host, tld) = domain.rsplit_once('.').ok_or_else(invalid)?;
    if host.is_empty() || host.starts_with('.') || !(2..=3).contains(&tld.len()) {
        return Err(invalid());
    }
    if !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(invalid());
    }
    Ok(email)
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < 6 {
        return Err(AuthError::Validation(
            "Password must be at least 6 characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_manager(pool: SqlitePool) -> AuthManager {
    AuthManager::new(pool, chrono::Duration::days(7))
        .with_hash_cost(crate::core::config::MIN_HASH_COST)
}
