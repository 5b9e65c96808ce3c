//! Presence broadcasting
//!
//! Every registry mutation is followed by a full `online-users` push to
//! every registered connection. Clients replace their view wholesale.

use tracing::debug;

use super::protocol::ServerEvent;
use super::registry::ConnectionRegistry;

/// Push the current online set to everyone. Returns how many connections
/// accepted the frame.
pub fn broadcast_online_users(registry: &ConnectionRegistry) -> usize {
    let (online, delivered) =
        registry.fan_out(|ids| ServerEvent::OnlineUsers(ids.iter().cloned().collect()));

    debug!(online, delivered, "[Presence] Broadcast online users");
    delivered
}
