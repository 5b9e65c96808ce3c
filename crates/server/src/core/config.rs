//! Server configuration and shared application state

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::chat::friends::FriendManager;
use crate::chat::messages::{MessageStore, SqliteMessageStore};
use crate::core::auth::AuthManager;
use crate::core::db;
use crate::relay::{ConnectionRegistry, OriginPolicy, RelayEngine};

const DEFAULT_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://127.0.0.1:5173",
    "http://localhost:3000",
    "https://link2up.vercel.app",
];

/// Lowest work factor bcrypt accepts
pub const MIN_HASH_COST: u32 = 4;
/// Highest work factor bcrypt accepts
pub const MAX_HASH_COST: u32 = 31;

/// Configuration for the LinkUp server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to
    pub bind_addr: IpAddr,
    /// HTTP port
    pub port: u16,
    /// Directory holding the SQLite database
    pub data_dir: PathBuf,
    /// Lifetime of a login session
    pub session_ttl: chrono::Duration,
    /// Browser origins allowed verbatim
    pub allowed_origins: Vec<String>,
    /// Any origin ending with this suffix is allowed too
    pub allowed_origin_suffix: Option<String>,
    /// Window in which a socket must authenticate
    pub handshake_timeout: Duration,
    /// Interval between server pings on an idle socket
    pub ping_interval: Duration,
    /// Max message length in characters
    pub max_message_len: usize,
    /// bcrypt work factor for new password hashes
    pub hash_cost: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 5000,
            data_dir: PathBuf::from("linkup_data"),
            session_ttl: chrono::Duration::days(7),
            allowed_origins: DEFAULT_ORIGINS.iter().map(|s| s.to_string()).collect(),
            allowed_origin_suffix: Some(".vercel.app".to_string()),
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            max_message_len: 1000,
            hash_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl ServerConfig {
    /// Build config from environment variables, falling back to defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let allowed_origins = match std::env::var("ALLOWED_ORIGINS") {
            Ok(list) => list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => defaults.allowed_origins,
        };

        let allowed_origin_suffix = match std::env::var("ALLOWED_ORIGIN_SUFFIX") {
            Ok(s) if s.trim().is_empty() => None,
            Ok(s) => Some(s.trim().to_string()),
            Err(_) => defaults.allowed_origin_suffix,
        };

        Ok(Self {
            bind_addr: env_or("BIND_ADDR", defaults.bind_addr)?,
            port: env_or("PORT", defaults.port)?,
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            session_ttl: chrono::Duration::days(env_or("SESSION_TTL_DAYS", 7i64)?),
            allowed_origins,
            allowed_origin_suffix,
            handshake_timeout: Duration::from_secs(env_or("HANDSHAKE_TIMEOUT_SECS", 10u64)?),
            ping_interval: Duration::from_secs(env_or("PING_INTERVAL_SECS", 30u64)?),
            max_message_len: env_or("MAX_MESSAGE_LEN", defaults.max_message_len)?,
            hash_cost: hash_cost_from(env_or("BCRYPT_COST", defaults.hash_cost)?)?,
        })
    }

    /// Create config with custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("linkup.sqlite")
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn origin_policy(&self) -> OriginPolicy {
        OriginPolicy::new(
            self.allowed_origins.iter().cloned(),
            self.allowed_origin_suffix.clone(),
        )
    }

    /// Ensure all directories exist
    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .with_context(|| format!("Failed to create data dir {:?}", self.data_dir))?;
        Ok(())
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", key, raw, e)),
        Err(_) => Ok(default),
    }
}

fn hash_cost_from(cost: u32) -> anyhow::Result<u32> {
    if !(MIN_HASH_COST..=MAX_HASH_COST).contains(&cost) {
        anyhow::bail!(
            "BCRYPT_COST must be between {} and {}, got {}",
            MIN_HASH_COST,
            MAX_HASH_COST,
            cost
        );
    }
    Ok(cost)
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub auth: Arc<AuthManager>,
    pub friends: Arc<FriendManager>,
    pub messages: Arc<dyn MessageStore>,
    pub relay: Arc<RelayEngine>,
}

impl AppState {
    /// Open the database and wire every manager onto one pool
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        config.ensure_dirs().await?;

        let pool = db::connect(&config.db_path()).await?;
        db::init_schema(&pool).await?;

        let auth = Arc::new(
            AuthManager::new(pool.clone(), config.session_ttl).with_hash_cost(config.hash_cost),
        );
        let friends = Arc::new(FriendManager::new(pool.clone()));
        let messages: Arc<dyn MessageStore> =
            Arc::new(SqliteMessageStore::new(pool, config.max_message_len));

        let relay = Arc::new(RelayEngine::new(
            Arc::new(ConnectionRegistry::new()),
            auth.clone(),
            auth.clone(),
            messages.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            auth,
            friends,
            messages,
            relay,
        })
    }
}
