//! Connection registry
//!
//! Maps each online user to exactly one live connection. Registration is
//! last-writer-wins; removal is guarded by connection id so a late
//! disconnect can never evict a newer session.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::protocol::ServerEvent;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of one socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Work item for a connection's writer task
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ServerEvent),
    Close { code: u16, reason: String },
}

/// Sending half of a connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::next(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event. Returns false once the writer has gone away.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(Outbound::Event(event)).is_ok()
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.tx
            .send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `user_id`.
    ///
    /// Returns the superseded handle when a different connection was
    /// registered before.
    pub fn register(&self, user_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let new_id = handle.id;
        let previous = self.entries.write().insert(user_id.to_string(), handle);
        previous.filter(|old| old.id != new_id)
    }

    /// Remove the entry only if it still belongs to `connection`
    pub fn deregister(&self, user_id: &str, connection: ConnectionId) -> bool {
        let mut entries = self.entries.write();
        match entries.get(user_id) {
            Some(current) if current.id == connection => {
                entries.remove(user_id);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.entries.read().get(user_id).cloned()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.entries.read().contains_key(user_id)
    }

    /// Point-in-time copy of the online set
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Build one event from the online set and queue it on every handle
    /// without releasing the read lock. A mutation cannot land between the
    /// snapshot and the last enqueue. Returns `(connections, delivered)`.
    pub fn fan_out(
        &self,
        build: impl FnOnce(&BTreeSet<String>) -> ServerEvent,
    ) -> (usize, usize) {
        let entries = self.entries.read();
        let online: BTreeSet<String> = entries.keys().cloned().collect();
        let event = build(&online);
        let delivered = entries
            .values()
            .filter(|handle| handle.send(event.clone()))
            .count();
        (entries.len(), delivered)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_replaces_and_reports_superseded() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx1) = ConnectionHandle::new();
        let (c2, _rx2) = ConnectionHandle::new();

        assert!(registry.register("u", c1.clone()).is_none());
        let superseded = registry.register("u", c2.clone()).unwrap();
        assert_eq!(superseded.id(), c1.id());

        // Re-registering the same connection supersedes nothing
        assert!(registry.register("u", c2.clone()).is_none());
        assert_eq!(registry.lookup("u").unwrap().id(), c2.id());
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_stale_deregister_keeps_newer_session() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx1) = ConnectionHandle::new();
        let (c2, _rx2) = ConnectionHandle::new();

        registry.register("u", c1.clone());
        registry.register("u", c2.clone());

        assert!(!registry.deregister("u", c1.id()));
        assert_eq!(registry.lookup("u").unwrap().id(), c2.id());
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx1) = ConnectionHandle::new();
        registry.register("u", c1.clone());

        assert!(registry.deregister("u", c1.id()));
        assert!(!registry.deregister("u", c1.id()));
        assert!(registry.lookup("u").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_sorted_copy() {
        let registry = ConnectionRegistry::new();
        for user in ["carol", "alice", "bob"] {
            let (handle, _rx) = ConnectionHandle::new();
            registry.register(user, handle);
        }
        let snapshot = registry.snapshot();
        registry.deregister("alice", ConnectionId::next());

        let ids: Vec<&str> = snapshot.iter().map(String::as_str).collect();
        assert_eq!(ids, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_concurrent_register_deregister_settles() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut threads = Vec::new();

        for t in 0..8 {
            let registry = registry.clone();
            threads.push(std::thread::spawn(move || {
                let user = format!("user-{}", t);
                for round in 0..200 {
                    let (handle, _rx) = ConnectionHandle::new();
                    let id = handle.id();
                    registry.register(&user, handle);
                    // Even threads end registered, odd threads end removed
                    if round < 199 || t % 2 == 1 {
                        registry.deregister(&user, id);
                    }
                }
            }));
        }

        for thread in threads {
            thread.join().unwrap();
        }

        let expected: BTreeSet<String> = (0..8)
            .filter(|t| t % 2 == 0)
            .map(|t| format!("user-{}", t))
            .collect();
        assert_eq!(registry.snapshot(), expected);
    }

    #[test]
    fn test_stale_deregister_races_new_register() {
        for _ in 0..200 {
            let registry = Arc::new(ConnectionRegistry::new());
            let (c1, _rx1) = ConnectionHandle::new();
            let (c2, _rx2) = ConnectionHandle::new();
            let (c1_id, c2_id) = (c1.id(), c2.id());
            registry.register("u", c1);

            let barrier = Arc::new(std::sync::Barrier::new(2));
            let closing = {
                let (registry, barrier) = (registry.clone(), barrier.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.deregister("u", c1_id);
                })
            };
            let opening = {
                let (registry, barrier) = (registry.clone(), barrier.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.register("u", c2);
                })
            };
            closing.join().unwrap();
            opening.join().unwrap();

            // Whichever ran first, the newer connection stays
            assert_eq!(registry.lookup("u").unwrap().id(), c2_id);
        }
    }

    #[test]
    fn test_fan_out_skips_closed_handles() {
        let registry = ConnectionRegistry::new();
        let (alice, mut alice_rx) = ConnectionHandle::new();
        let (bob, bob_rx) = ConnectionHandle::new();
        registry.register("alice", alice);
        registry.register("bob", bob);
        drop(bob_rx);

        let (connections, delivered) =
            registry.fan_out(|online| ServerEvent::OnlineUsers(online.iter().cloned().collect()));
        assert_eq!((connections, delivered), (2, 1));
        assert!(matches!(
            alice_rx.try_recv().unwrap(),
            Outbound::Event(ServerEvent::OnlineUsers(ids)) if ids.len() == 2
        ));
    }

    #[test]
    fn test_send_fails_after_receiver_dropped() {
        let (handle, rx) = ConnectionHandle::new();
        assert!(handle.send(ServerEvent::OnlineUsers(vec![])));
        drop(rx);
        assert!(handle.is_closed());
        assert!(!handle.send(ServerEvent::OnlineUsers(vec![])));
    }
}
