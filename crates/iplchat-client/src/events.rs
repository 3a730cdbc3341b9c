//! A typed event interface any front-end can subscribe to, replacing the
//! original program's deep coupling to a desktop form toolkit:
//! `on_message`, `on_peer_joined`, `on_connection_state`.
//!
//! Grounded on the reference stack's `broadcast`-channel fan-out
//! (`nexus_sdk::gateway::GatewayClient::subscribe`), split into one typed
//! channel per event kind instead of one channel of a tagged union, since
//! the three event kinds have unrelated payloads and distinct subscriber
//! sets (a UI's message view has no use for connection-state churn).

use iplchat_common::crypto::SymmetricKey;
use iplchat_common::protocol::Message;
use tokio::sync::broadcast;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

/// A decrypted, signature-verified (by the caller) incoming message.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub envelope: Message,
}

/// A completed peer key exchange: `peer_uuid`'s symmetric key `K_AB` is
/// ready and has already been decrypted under our own keypair.
#[derive(Debug, Clone)]
pub struct PeerJoinedEvent {
    pub peer_uuid: Uuid,
    pub symmetric_key: SymmetricKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// The client's event fan-out. One `EventBus` is shared between the
/// connection, the notification listener, and every subscribing front-end.
pub struct EventBus {
    messages: broadcast::Sender<MessageEvent>,
    peer_joined: broadcast::Sender<PeerJoinedEvent>,
    connection_state: broadcast::Sender<ConnectionState>,
}

impl EventBus {
    pub fn new() -> Self {
        let (messages, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (peer_joined, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (connection_state, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            messages,
            peer_joined,
            connection_state,
        }
    }

    pub fn on_message(&self) -> broadcast::Receiver<MessageEvent> {
        self.messages.subscribe()
    }

    pub fn on_peer_joined(&self) -> broadcast::Receiver<PeerJoinedEvent> {
        self.peer_joined.subscribe()
    }

    pub fn on_connection_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.connection_state.subscribe()
    }

    pub(crate) fn emit_message(&self, event: MessageEvent) {
        let _ = self.messages.send(event);
    }

    pub(crate) fn emit_peer_joined(&self, event: PeerJoinedEvent) {
        let _ = self.peer_joined.send(event);
    }

    pub(crate) fn emit_connection_state(&self, state: ConnectionState) {
        let _ = self.connection_state.send(state);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
