use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::debug;

use crate::workflows::booking::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(pub u64);

/// Message pushed to a connected peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerMessage {
    pub event: String,
    pub payload: serde_json::Value,
}

type Peers = HashMap<UserId, HashMap<ConnectionId, mpsc::UnboundedSender<PeerMessage>>>;

enum Change {
    Add(UserId, ConnectionId, mpsc::UnboundedSender<PeerMessage>),
    Remove(UserId, ConnectionId),
}

/// Process-wide registry of connected peers, keyed by user.
///
/// All mutation goes through [`PeerRegistry::apply`]; connections register on
/// [`PeerRegistry::connect`] and unregister when their handle is dropped.
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<Peers>,
    next_id: AtomicU64,
}

impl PeerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect(self: &Arc<Self>, user: UserId) -> PeerConnection {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.apply(Change::Add(user.clone(), id, sender));
        debug!(user_id = %user, connection = id.0, "peer connected");
        PeerConnection {
            id,
            user,
            receiver,
            registry: self.clone(),
        }
    }

    pub fn disconnect(&self, user: &UserId, id: ConnectionId) {
        self.apply(Change::Remove(user.clone(), id));
        debug!(user_id = %user, connection = id.0, "peer disconnected");
    }

    /// Returns how many live connections received the message.
    pub fn send_to_user(&self, user: &UserId, message: PeerMessage) -> usize {
        let guard = match self.peers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(user).map_or(0, |connections| {
            connections
                .values()
                .filter(|sender| sender.send(message.clone()).is_ok())
                .count()
        })
    }

    pub fn is_connected(&self, user: &UserId) -> bool {
        self.connection_count(user) > 0
    }

    pub fn connection_count(&self, user: &UserId) -> usize {
        let guard = match self.peers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(user).map_or(0, HashMap::len)
    }

    fn apply(&self, change: Change) {
        let mut guard = match self.peers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match change {
            Change::Add(user, id, sender) => {
                guard.entry(user).or_default().insert(id, sender);
            }
            Change::Remove(user, id) => {
                if let Some(connections) = guard.get_mut(&user) {
                    connections.remove(&id);
                    if connections.is_empty() {
                        guard.remove(&user);
                    }
                }
            }
        }
    }
}

/// Live subscription for one peer; unregisters itself on drop.
pub struct PeerConnection {
    id: ConnectionId,
    user: UserId,
    receiver: mpsc::UnboundedReceiver<PeerMessage>,
    registry: Arc<PeerRegistry>,
}

impl PeerConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<PeerMessage> {
        self.receiver.recv().await
    }
}

impl Stream for PeerConnection {
    type Item = PeerMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.registry.disconnect(&self.user, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(event: &str) -> PeerMessage {
        PeerMessage {
            event: event.to_string(),
            payload: json!({}),
        }
    }

    #[tokio::test]
    async fn delivers_to_every_connection_of_a_user() {
        let registry = PeerRegistry::new();
        let user = UserId("guest-1".to_string());
        let mut first = registry.connect(user.clone());
        let mut second = registry.connect(user.clone());
        assert_ne!(first.id(), second.id());

        assert_eq!(registry.send_to_user(&user, message("ping")), 2);
        assert_eq!(first.recv().await.expect("first receives").event, "ping");
        assert_eq!(second.recv().await.expect("second receives").event, "ping");
    }

    #[test]
    fn dropping_a_connection_unregisters_it() {
        let registry = PeerRegistry::new();
        let user = UserId("guest-2".to_string());
        let connection = registry.connect(user.clone());
        assert!(registry.is_connected(&user));

        let other = registry.connect(user.clone());
        registry.disconnect(&user, other.id());
        assert_eq!(registry.connection_count(&user), 1);

        drop(connection);
        assert!(!registry.is_connected(&user));
        assert_eq!(registry.send_to_user(&user, message("ping")), 0);
    }

    #[test]
    fn other_users_are_not_reached() {
        let registry = PeerRegistry::new();
        let _connection = registry.connect(UserId("guest-3".to_string()));
        assert_eq!(
            registry.send_to_user(&UserId("guest-4".to_string()), message("ping")),
            0
        );
    }
}
