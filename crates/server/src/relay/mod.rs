//! Presence & Message Relay
//!
//! Real-time layer over WebSockets. Each authenticated socket holds one
//! entry in the [`ConnectionRegistry`]; the [`RelayEngine`] interprets
//! inbound events, relays them to the recipient's current connection and
//! keeps every client's view of the online set up to date.
//!
//! Identity verification and message persistence are consumed through the
//! [`IdentityVerifier`], [`ProfileStore`] and
//! [`MessageStore`](crate::chat::messages::MessageStore) traits.

pub mod engine;
pub mod origin;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod ws;

use async_trait::async_trait;
use serde::Serialize;

pub use engine::{ConnectionContext, Delivery, RelayEngine};
pub use origin::OriginPolicy;
pub use protocol::{parse_client_frame, ClientEvent, ServerEvent};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, Outbound};

/// Close code sent when the handshake is rejected
pub const CLOSE_AUTH_FAILED: u16 = 4001;
/// Close code sent to a connection superseded by a newer one
pub const CLOSE_SESSION_REPLACED: u16 = 4000;

/// An authenticated user as seen by the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: String,
    pub username: String,
}

/// Why a connection attempt was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthRejection {
    #[error("no credential provided")]
    MissingCredential,
    #[error("invalid or expired credential")]
    InvalidCredential,
    #[error("identity not found")]
    UnknownIdentity,
    #[error("authentication timed out")]
    Timeout,
    #[error("authentication failed")]
    Internal,
}

/// Resolves an opaque credential to a user id
#[async_trait]
pub trait IdentityVerifier: Send + Sync + 'static {
    async fn verify(&self, credential: &str) -> Result<String, AuthRejection>;
}

/// Profile lookups the relay needs around a connection's lifetime
#[async_trait]
pub trait ProfileStore: Send + Sync + 'static {
    async fn profile(&self, user_id: &str) -> Result<Option<Identity>, AuthRejection>;

    /// Best-effort; failures are logged by the implementation
    async fn mark_last_seen(&self, user_id: &str);
}
