//! Relay engine
//!
//! Owns the connection lifecycle: authenticate, attach (register and
//! broadcast), handle events, detach (guarded deregister and broadcast).
//! Transport specifics live in [`super::ws`]; everything here works on
//! [`ConnectionHandle`]s so it can be driven directly from tests.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::presence::broadcast_online_users;
use super::protocol::{ClientEvent, ServerEvent};
use super::registry::{ConnectionHandle, ConnectionRegistry};
use super::{AuthRejection, Identity, IdentityVerifier, ProfileStore, CLOSE_SESSION_REPLACED};
use crate::chat::messages::{MessageStore, StoreError};

const SEND_FAILED: &str = "Failed to send message";

/// Outcome of forwarding one event to a recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    RecipientOffline,
    WriteFailed,
}

/// Per-connection state handed to every event handler
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub identity: Identity,
    pub handle: ConnectionHandle,
}

pub struct RelayEngine {
    registry: Arc<ConnectionRegistry>,
    verifier: Arc<dyn IdentityVerifier>,
    profiles: Arc<dyn ProfileStore>,
    store: Arc<dyn MessageStore>,
}

impl RelayEngine {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        verifier: Arc<dyn IdentityVerifier>,
        profiles: Arc<dyn ProfileStore>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            registry,
            verifier,
            profiles,
            store,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Resolve a handshake credential to an identity. Never touches the
    /// registry.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, AuthRejection> {
        let credential = credential
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(AuthRejection::MissingCredential)?;

        let user_id = self.verifier.verify(credential).await?;

        self.profiles
            .profile(&user_id)
            .await?
            .ok_or(AuthRejection::UnknownIdentity)
    }

    /// Register an authenticated connection and announce it
    pub async fn attach(&self, identity: Identity, handle: ConnectionHandle) -> ConnectionContext {
        if let Some(superseded) = self.registry.register(&identity.id, handle.clone()) {
            info!(
                user_id = %identity.id,
                old = %superseded.id(),
                new = %handle.id(),
                "[Relay] Session replaced"
            );
            superseded.close(CLOSE_SESSION_REPLACED, "session replaced");
        }

        broadcast_online_users(&self.registry);
        self.profiles.mark_last_seen(&identity.id).await;

        info!(user_id = %identity.id, connection = %handle.id(), "[Relay] User connected");
        ConnectionContext { identity, handle }
    }

    /// Tear down a connection. Returns false when a newer session already
    /// owns the registry entry.
    pub async fn detach(&self, ctx: &ConnectionContext) -> bool {
        let removed = self
            .registry
            .deregister(&ctx.identity.id, ctx.handle.id());

        if removed {
            broadcast_online_users(&self.registry);
            self.profiles.mark_last_seen(&ctx.identity.id).await;
            info!(user_id = %ctx.identity.id, connection = %ctx.handle.id(), "[Relay] User disconnected");
        } else {
            debug!(
                user_id = %ctx.identity.id,
                connection = %ctx.handle.id(),
                "[Relay] Stale disconnect ignored"
            );
        }
        removed
    }

    pub async fn handle_event(&self, ctx: &ConnectionContext, event: ClientEvent) {
        match event {
            ClientEvent::SendMessage {
                recipient_id,
                content,
                reply_to,
            } => {
                self.send_message(ctx, &recipient_id, &content, reply_to.as_deref())
                    .await;
            }
            ClientEvent::Typing { recipient_id } => {
                let event = ServerEvent::UserTyping {
                    user_id: ctx.identity.id.clone(),
                    username: ctx.identity.username.clone(),
                };
                self.deliver(&recipient_id, event);
            }
            ClientEvent::StopTyping { recipient_id } => {
                let event = ServerEvent::UserStopTyping {
                    user_id: ctx.identity.id.clone(),
                };
                self.deliver(&recipient_id, event);
            }
            ClientEvent::Authenticate { .. } => {
                debug!(user_id = %ctx.identity.id, "[Relay] Ignoring authenticate on live connection");
            }
        }
    }

    /// Persist, relay to the recipient if online, then acknowledge the
    /// sender.
    pub async fn send_message(
        &self,
        ctx: &ConnectionContext,
        recipient_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Option<Delivery> {
        let message = match self
            .store
            .create(&ctx.identity.id, recipient_id, content, reply_to)
            .await
        {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    sender = %ctx.identity.id,
                    recipient = %recipient_id,
                    error = %e,
                    "[Relay] Message not stored"
                );
                let message = match e {
                    StoreError::Validation(reason) => reason,
                    _ => SEND_FAILED.to_string(),
                };
                ctx.handle.send(ServerEvent::MessageError { message });
                return None;
            }
        };

        let delivery = self.deliver(recipient_id, ServerEvent::ReceiveMessage(message.clone()));
        debug!(
            message_id = %message.id,
            recipient = %recipient_id,
            ?delivery,
            "[Relay] Message relayed"
        );

        ctx.handle.send(ServerEvent::MessageSent(message));
        Some(delivery)
    }

    /// Best-effort push to whichever connection currently holds `user_id`
    pub fn deliver(&self, user_id: &str, event: ServerEvent) -> Delivery {
        let Some(handle) = self.registry.lookup(user_id) else {
            return Delivery::RecipientOffline;
        };

        if handle.send(event) {
            Delivery::Delivered
        } else {
            debug!(user_id = %user_id, connection = %handle.id(), "[Relay] Write to closed connection");
            Delivery::WriteFailed
        }
    }
}
