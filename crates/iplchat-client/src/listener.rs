//! The per-client notification listener (C8): a TCP
//! endpoint the broker's pusher (`iplchat_broker::push`) connects to,
//! writes one packet to, and disconnects — no acknowledgement expected.
//!
//! Grounded on the reference stack's background-task-per-connection
//! pattern (`nexus_sdk::gateway::run_once`'s spawned receive loop), here
//! one short-lived task per pushed packet rather than one long-lived
//! socket, since the broker opens a fresh connection per push.

use crate::events::{EventBus, MessageEvent, PeerJoinedEvent};
use iplchat_common::crypto::{AsymmetricKeyPair, SymmetricKey};
use iplchat_common::protocol::{read_packet, Message, Packet, PacketType};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Bind a notification listener and spawn its accept loop. Returns the
/// bound port (to hand to [`crate::connection::Connection::register_notification_port`])
/// and a handle to the background task.
pub async fn spawn(
    bind_addr: &str,
    keypair: Arc<AsymmetricKeyPair>,
    events: Arc<EventBus>,
) -> std::io::Result<(u16, JoinHandle<()>)> {
    let listener = TcpListener::bind(bind_addr).await?;
    let port = listener.local_addr()?.port();

    let handle = tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "notification listener accept failed");
                    continue;
                }
            };
            let keypair = Arc::clone(&keypair);
            let events = Arc::clone(&events);
            tokio::spawn(async move {
                match read_packet(&mut socket).await {
                    Ok(packet) => handle_push(packet, &keypair, &events),
                    Err(e) => tracing::warn!(error = %e, "failed to read pushed packet"),
                }
            });
        }
    });

    Ok((port, handle))
}

fn handle_push(packet: Packet, keypair: &AsymmetricKeyPair, events: &EventBus) {
    match packet.kind {
        PacketType::HandshakeNotification => handle_handshake_notification(&packet.payload, keypair, events),
        PacketType::MessageNotification => match Message::decode(&packet.payload) {
            Ok(envelope) => events.emit_message(MessageEvent { envelope }),
            Err(e) => tracing::warn!(error = %e, "malformed message notification"),
        },
        other => tracing::warn!(?other, "unexpected pushed packet type"),
    }
}

/// `u32 ulen ‖ u32 klen ‖ peer_uuid ‖ AsymEnc_our_pub(K_AB)`, the same
/// layout as the `CLIENT_TO_CLIENT_HANDSHAKE2` payload but with the
/// initiator's uuid substituted in by the broker.
fn handle_handshake_notification(payload: &[u8], keypair: &AsymmetricKeyPair, events: &EventBus) {
    if payload.len() < 8 {
        tracing::warn!("truncated handshake notification");
        return;
    }
    let ulen = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let klen = u32::from_le_bytes(payload[4..8].try_into().unwrap()) as usize;
    let rest = &payload[8..];
    if rest.len() < ulen + klen {
        tracing::warn!("truncated handshake notification body");
        return;
    }
    let Ok(peer_uuid) = Uuid::from_slice(&rest[..ulen]) else {
        tracing::warn!("malformed peer uuid in handshake notification");
        return;
    };
    let sealed = &rest[ulen..ulen + klen];

    match keypair.decrypt(sealed) {
        Ok(raw) => match <[u8; 32]>::try_from(raw.as_slice()) {
            Ok(bytes) => events.emit_peer_joined(PeerJoinedEvent {
                peer_uuid,
                symmetric_key: SymmetricKey::from_bytes(bytes),
            }),
            Err(_) => tracing::warn!("decrypted peer key has the wrong length"),
        },
        Err(e) => tracing::warn!(error = %e, "failed to decrypt pushed peer key"),
    }
}
