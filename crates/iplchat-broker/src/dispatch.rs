//! Per-connection packet dispatch (C7).
//!
//! One task per connection. Packets are read off the socket
//! one at a time, checked against the precondition table, and answered
//! synchronously; any outbound push to a different connection goes through
//! [`crate::push`] and never blocks this task on the recipient's socket.

use crate::push;
use crate::BrokerState;
use iplchat_common::crypto::{self, AsymmetricPublicKey, SymmetricKey};
use iplchat_common::error::{BrokerError, BrokerResult};
use iplchat_common::models::message::MessageKind;
use iplchat_common::models::session::{Session, StreamId};
use iplchat_common::protocol::{
    decode_credentials, decode_list, encode_credentials, encode_list, read_packet, write_packet,
    ListEntry, Message, MessageEnvelopeKind, Packet, PacketType,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpStream;
use uuid::Uuid;

/// Drive one accepted connection until the peer disconnects. Registers and
/// always deregisters the session on disconnect.
pub async fn handle_connection(state: Arc<BrokerState>, mut socket: TcpStream, stream_id: StreamId) {
    let peer_ip = match socket.peer_addr() {
        Ok(addr) => addr.ip(),
        Err(e) => {
            tracing::warn!(error = %e, "could not read peer address, dropping connection");
            return;
        }
    };

    loop {
        let packet = match read_packet(&mut socket).await {
            Ok(p) => p,
            Err(iplchat_common::protocol::ProtocolError::Io(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                tracing::warn!(%stream_id, error = %e, "connection read failed");
                break;
            }
        };

        let kind = packet.kind;
        match process_packet(&state, stream_id, peer_ip, packet).await {
            Ok(responses) => {
                for response in responses {
                    if let Err(e) = write_packet(&mut socket, &response).await {
                        tracing::warn!(%stream_id, error = %e, "connection write failed");
                        break;
                    }
                }
            }
            Err(err) => {
                if let Some(error_packet) = paired_error_packet(kind, &err) {
                    tracing::warn!(%stream_id, ?kind, error = %err, "request failed, answering with error packet");
                    if write_packet(&mut socket, &error_packet).await.is_err() {
                        break;
                    }
                } else {
                    tracing::warn!(%stream_id, ?kind, error = %err, "request failed, dropping (no paired error type)");
                }
            }
        }
    }

    if let Some(session) = state.sessions.remove(stream_id).await {
        if let Some(uuid) = session.user_uuid {
            if let Err(e) = state.engine.deauthenticate(uuid).await {
                tracing::warn!(%stream_id, error = %e, "failed to deauthenticate on disconnect");
            }
        }
    }
}

/// The wire error packet paired with `kind`, if any. Packets
/// with no pairing (`NotificationPort`, `ChannelFetchRequest`,
/// `UserSearchRequest`, `UsernameRequest`, `ClientToClientHandshake`,
/// `ClientToClientHandshake2`, `MessageSyncRequest`, `HandshakeRequest`)
/// are logged and dropped instead.
fn paired_error_packet(kind: PacketType, _err: &BrokerError) -> Option<Packet> {
    match kind {
        PacketType::LoginRequest => Some(Packet::new(PacketType::LoginError, Vec::new())),
        PacketType::RegisterRequest => Some(Packet::new(PacketType::RegisterError, Vec::new())),
        PacketType::JoinChannelRequest => Some(Packet::new(PacketType::JoinChannelError, Vec::new())),
        PacketType::MessageRequest => Some(Packet::new(PacketType::MessageError, Vec::new())),
        _ => None,
    }
}

async fn process_packet(
    state: &Arc<BrokerState>,
    stream_id: StreamId,
    peer_ip: IpAddr,
    packet: Packet,
) -> BrokerResult<Vec<Packet>> {
    match packet.kind {
        PacketType::HandshakeRequest => handle_handshake(state, stream_id, &packet.payload).await,
        PacketType::LoginRequest => handle_login(state, stream_id, &packet.payload).await,
        PacketType::RegisterRequest => handle_register(state, stream_id, &packet.payload).await,
        PacketType::LogoutRequest => handle_logout(state, stream_id).await,
        PacketType::NotificationPort => {
            handle_notification_port(state, stream_id, peer_ip, &packet.payload).await
        }
        PacketType::ChannelFetchRequest => handle_channel_fetch(state, stream_id).await,
        PacketType::JoinChannelRequest => handle_join_channel(state, stream_id, &packet.payload).await,
        PacketType::UserSearchRequest => handle_user_search(state, stream_id, &packet.payload).await,
        PacketType::UsernameRequest => handle_username(state, stream_id, &packet.payload).await,
        PacketType::ClientToClientHandshake => {
            handle_c2c_handshake(state, stream_id, &packet.payload).await
        }
        PacketType::ClientToClientHandshake2 => {
            handle_c2c_handshake2(state, stream_id, &packet.payload).await
        }
        PacketType::MessageRequest => handle_message(state, stream_id, &packet.payload).await,
        PacketType::MessageSyncRequest => handle_message_sync(state, stream_id, &packet.payload).await,
        other => Err(BrokerError::UnexpectedPacket(other as u32)),
    }
}

async fn require_session(state: &BrokerState, stream_id: StreamId) -> BrokerResult<Session> {
    state
        .sessions
        .snapshot(stream_id)
        .await
        .ok_or(BrokerError::UnexpectedPacket(PacketType::HandshakeRequest as u32))
}

fn require_session_key(session: &Session) -> BrokerResult<SymmetricKey> {
    session.session_key.clone().ok_or(BrokerError::Unauthenticated)
}

fn require_authenticated(session: &Session) -> BrokerResult<Uuid> {
    session.user_uuid.ok_or(BrokerError::Unauthenticated)
}

// ============================================================
// HANDSHAKE_REQUEST / HANDSHAKE_RESPONSE
// ============================================================

async fn handle_handshake(
    state: &Arc<BrokerState>,
    stream_id: StreamId,
    payload: &[u8],
) -> BrokerResult<Vec<Packet>> {
    if state.sessions.contains(stream_id).await {
        return Err(BrokerError::SessionAlreadyEstablished);
    }
    let client_public_key = AsymmetricPublicKey::from_bytes(payload)
        .map_err(|_| BrokerError::Protocol("malformed handshake public key".into()))?;
    let session_key = SymmetricKey::generate();
    let blob = crypto::asym_encrypt(&client_public_key, session_key.as_bytes())
        .map_err(|_| BrokerError::DecryptFailed)?;

    let mut session = Session::new(stream_id);
    session.peer_public_key = Some(client_public_key);
    session.session_key = Some(session_key);
    state.sessions.insert(session).await;

    Ok(vec![Packet::new(PacketType::HandshakeResponse, blob)])
}

// ============================================================
// LOGIN_REQUEST / REGISTER_REQUEST
// ============================================================

async fn handle_login(
    state: &Arc<BrokerState>,
    stream_id: StreamId,
    payload: &[u8],
) -> BrokerResult<Vec<Packet>> {
    let session = require_session(state, stream_id).await?;
    let key = require_session_key(&session)?;
    if session.user_uuid.is_some() {
        return Err(BrokerError::AlreadyAuthenticated);
    }
    let plaintext = crypto::aead_decrypt(&key, payload).map_err(|_| BrokerError::DecryptFailed)?;
    let (username, password) =
        decode_credentials(&plaintext).map_err(|e| BrokerError::Protocol(e.to_string()))?;

    let (outcome, user) = state.engine.login(&username, &password).await.map_err(BrokerError::engine)?;
    match outcome {
        iplchat_common::models::user::LoginOutcome::Ok => {
            let user = user.expect("Ok outcome always carries the user row");
            state
                .sessions
                .mutate(stream_id, |s| {
                    s.user_uuid = Some(user.uuid);
                    s.username = Some(user.username.clone());
                })
                .await;
            let response = crypto::aead_encrypt(&key, user.uuid.as_bytes())
                .map_err(|_| BrokerError::DecryptFailed)?;
            Ok(vec![Packet::new(PacketType::LoginResponse, response)])
        }
        _ => Err(BrokerError::InvalidCredentials),
    }
}

async fn handle_register(
    state: &Arc<BrokerState>,
    stream_id: StreamId,
    payload: &[u8],
) -> BrokerResult<Vec<Packet>> {
    let session = require_session(state, stream_id).await?;
    let key = require_session_key(&session)?;
    if session.user_uuid.is_some() {
        return Err(BrokerError::AlreadyAuthenticated);
    }
    let plaintext = crypto::aead_decrypt(&key, payload).map_err(|_| BrokerError::DecryptFailed)?;
    let (username, password) =
        decode_credentials(&plaintext).map_err(|e| BrokerError::Protocol(e.to_string()))?;

    let new_uuid = Uuid::new_v4();
    match state
        .engine
        .register_client(new_uuid, &username, &password)
        .await
        .map_err(BrokerError::engine)?
    {
        iplchat_common::models::user::RegisterOutcome::Ok => {
            // Direct-message convention: a self-named channel addresses this user.
            state
                .engine
                .create_channel_if_absent(&username, new_uuid)
                .await
                .map_err(BrokerError::engine)?;
            state
                .engine
                .join_channel(new_uuid, new_uuid)
                .await
                .map_err(BrokerError::engine)?;
            let response = crypto::aead_encrypt(&key, new_uuid.as_bytes())
                .map_err(|_| BrokerError::DecryptFailed)?;
            Ok(vec![Packet::new(PacketType::RegisterResponse, response)])
        }
        iplchat_common::models::user::RegisterOutcome::AlreadyExists => {
            Err(BrokerError::AlreadyExists)
        }
    }
}

async fn handle_logout(state: &Arc<BrokerState>, stream_id: StreamId) -> BrokerResult<Vec<Packet>> {
    let session = require_session(state, stream_id).await?;
    let uuid = require_authenticated(&session)?;
    state.engine.deauthenticate(uuid).await.map_err(BrokerError::engine)?;
    state.sessions.remove(stream_id).await;
    Ok(vec![Packet::new(PacketType::LogoutResponse, Vec::new())])
}

// ============================================================
// NOTIFICATION_PORT
// ============================================================

async fn handle_notification_port(
    state: &Arc<BrokerState>,
    stream_id: StreamId,
    peer_ip: IpAddr,
    payload: &[u8],
) -> BrokerResult<Vec<Packet>> {
    let session = require_session(state, stream_id).await?;
    require_authenticated(&session)?;
    if payload.len() != 4 {
        return Err(BrokerError::Protocol("notification port must be 4 bytes".into()));
    }
    let port = i32::from_le_bytes(payload.try_into().unwrap());
    if !(0..=u16::MAX as i32).contains(&port) {
        return Err(BrokerError::Protocol("notification port out of range".into()));
    }
    let endpoint = SocketAddr::new(peer_ip, port as u16);
    state
        .sessions
        .mutate(stream_id, |s| s.notification_endpoint = Some(endpoint))
        .await;
    Ok(vec![Packet::new(PacketType::NotificationPortResponse, Vec::new())])
}

// ============================================================
// CHANNEL_FETCH_REQUEST
// ============================================================

async fn handle_channel_fetch(
    state: &Arc<BrokerState>,
    stream_id: StreamId,
) -> BrokerResult<Vec<Packet>> {
    let session = require_session(state, stream_id).await?;
    let key = require_session_key(&session)?;
    let uuid = require_authenticated(&session)?;

    let channels = state.engine.subscribed_channels(uuid).await.map_err(BrokerError::engine)?;
    let entries: Vec<ListEntry> = channels
        .into_iter()
        .map(|c| ListEntry { name: c.name, uuid: c.uuid })
        .collect();
    let encoded = encode_list(&entries);
    let response = crypto::aead_encrypt(&key, &encoded).map_err(|_| BrokerError::DecryptFailed)?;
    Ok(vec![Packet::new(PacketType::ChannelFetchResponse, response)])
}

// ============================================================
// JOIN_CHANNEL_REQUEST
// ============================================================

async fn handle_join_channel(
    state: &Arc<BrokerState>,
    stream_id: StreamId,
    payload: &[u8],
) -> BrokerResult<Vec<Packet>> {
    let session = require_session(state, stream_id).await?;
    let key = require_session_key(&session)?;
    let uuid = require_authenticated(&session)?;

    let plaintext = crypto::aead_decrypt(&key, payload).map_err(|_| BrokerError::DecryptFailed)?;
    let channel_uuid =
        Uuid::from_slice(&plaintext).map_err(|_| BrokerError::Protocol("malformed channel uuid".into()))?;

    if state
        .engine
        .get_channel(channel_uuid)
        .await
        .map_err(BrokerError::engine)?
        .is_none()
    {
        return Err(BrokerError::ChannelNotFound);
    }
    state
        .engine
        .join_channel(uuid, channel_uuid)
        .await
        .map_err(BrokerError::engine)?;
    Ok(vec![Packet::new(PacketType::JoinChannelSuccess, Vec::new())])
}

// ============================================================
// USER_SEARCH_REQUEST
// ============================================================

const SEARCH_DEPTH: i64 = 3;

async fn handle_user_search(
    state: &Arc<BrokerState>,
    stream_id: StreamId,
    payload: &[u8],
) -> BrokerResult<Vec<Packet>> {
    let session = require_session(state, stream_id).await?;
    let key = require_session_key(&session)?;
    let uuid = require_authenticated(&session)?;

    let plaintext = crypto::aead_decrypt(&key, payload).map_err(|_| BrokerError::DecryptFailed)?;
    let pattern = String::from_utf8(plaintext)
        .map_err(|_| BrokerError::Protocol("search pattern not utf8".into()))?;

    let users = state
        .engine
        .search_users(uuid, &pattern, SEARCH_DEPTH)
        .await
        .map_err(BrokerError::engine)?;
    let entries: Vec<ListEntry> = users
        .into_iter()
        .map(|u| ListEntry { name: u.username, uuid: u.uuid })
        .collect();
    let encoded = encode_list(&entries);
    let response = crypto::aead_encrypt(&key, &encoded).map_err(|_| BrokerError::DecryptFailed)?;
    Ok(vec![Packet::new(PacketType::UserSearchResponse, response)])
}

// ============================================================
// USERNAME_REQUEST
// ============================================================

async fn handle_username(
    state: &Arc<BrokerState>,
    stream_id: StreamId,
    payload: &[u8],
) -> BrokerResult<Vec<Packet>> {
    let session = require_session(state, stream_id).await?;
    let key = require_session_key(&session)?;
    require_authenticated(&session)?;

    let plaintext = crypto::aead_decrypt(&key, payload).map_err(|_| BrokerError::DecryptFailed)?;
    let target_uuid =
        Uuid::from_slice(&plaintext).map_err(|_| BrokerError::Protocol("malformed user uuid".into()))?;

    let Some(username) = state.engine.get_username(target_uuid).await.map_err(BrokerError::engine)? else {
        return Err(BrokerError::UserNotFound);
    };
    let response =
        crypto::aead_encrypt(&key, username.as_bytes()).map_err(|_| BrokerError::DecryptFailed)?;
    Ok(vec![Packet::new(PacketType::UsernameResponse, response)])
}

// ============================================================
// Two-phase peer key exchange
// ============================================================

async fn handle_c2c_handshake(
    state: &Arc<BrokerState>,
    stream_id: StreamId,
    payload: &[u8],
) -> BrokerResult<Vec<Packet>> {
    let session = require_session(state, stream_id).await?;
    require_authenticated(&session)?;

    let target_uuid =
        Uuid::from_slice(payload).map_err(|_| BrokerError::Protocol("malformed target uuid".into()))?;
    let Some(target_stream) = state.sessions.find_by_uuid(target_uuid).await else {
        return Err(BrokerError::UserNotFound);
    };
    let Some(target_session) = state.sessions.snapshot(target_stream).await else {
        return Err(BrokerError::UserNotFound);
    };
    let Some(target_public_key) = target_session.peer_public_key else {
        return Err(BrokerError::UserNotFound);
    };
    Ok(vec![Packet::new(
        PacketType::ClientPublicKey,
        target_public_key.to_bytes().to_vec(),
    )])
}

async fn handle_c2c_handshake2(
    state: &Arc<BrokerState>,
    stream_id: StreamId,
    payload: &[u8],
) -> BrokerResult<Vec<Packet>> {
    let session = require_session(state, stream_id).await?;
    let sender_uuid = require_authenticated(&session)?;

    if payload.len() < 8 {
        return Err(BrokerError::Protocol("truncated handshake2 payload".into()));
    }
    let ulen = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let klen = u32::from_le_bytes(payload[4..8].try_into().unwrap()) as usize;
    let rest = &payload[8..];
    if rest.len() < ulen + klen {
        return Err(BrokerError::Protocol("truncated handshake2 payload".into()));
    }
    let target_uuid = Uuid::from_slice(&rest[..ulen])
        .map_err(|_| BrokerError::Protocol("malformed target uuid".into()))?;
    let sealed_key = &rest[ulen..ulen + klen];

    let Some(target_stream) = state.sessions.find_by_uuid(target_uuid).await else {
        return Err(BrokerError::UserNotFound);
    };
    let Some(target_session) = state.sessions.snapshot(target_stream).await else {
        return Err(BrokerError::UserNotFound);
    };
    let Some(endpoint) = target_session.notification_endpoint else {
        return Err(BrokerError::TargetOffline);
    };

    // Substitute the leading uuid with the sender's.
    let sender_bytes = sender_uuid.as_bytes();
    let mut substituted = Vec::with_capacity(8 + sender_bytes.len() + sealed_key.len());
    substituted.extend_from_slice(&(sender_bytes.len() as u32).to_le_bytes());
    substituted.extend_from_slice(&(klen as u32).to_le_bytes());
    substituted.extend_from_slice(sender_bytes);
    substituted.extend_from_slice(sealed_key);

    push::push(
        endpoint,
        Packet::new(PacketType::HandshakeNotification, substituted.clone()),
    )
    .await;

    // Echoed back to the initiator over the main stream.
    Ok(vec![Packet::new(PacketType::HandshakeNotification, substituted)])
}

// ============================================================
// MESSAGE_REQUEST
// ============================================================

async fn handle_message(
    state: &Arc<BrokerState>,
    stream_id: StreamId,
    payload: &[u8],
) -> BrokerResult<Vec<Packet>> {
    let session = require_session(state, stream_id).await?;
    let uuid = require_authenticated(&session)?;
    let peer_public_key = session
        .peer_public_key
        .ok_or(BrokerError::Unauthenticated)?;

    let msg = Message::decode(payload).map_err(|e| BrokerError::Protocol(e.to_string()))?;
    if msg.sender_uuid != uuid {
        return Err(BrokerError::VerifyFailed);
    }
    let Some(channel) = state.engine.get_channel(msg.channel_uuid).await.map_err(BrokerError::engine)? else {
        return Err(BrokerError::ChannelNotFound);
    };
    if !channel.subscribers.contains(&uuid) {
        return Err(BrokerError::NotSubscribed);
    }
    msg.verify(&peer_public_key).map_err(|_| BrokerError::VerifyFailed)?;

    // Direct-message convention: the recipient's session has
    // user_uuid == msg.channel_uuid.
    let target_stream = state.sessions.find_by_uuid(msg.channel_uuid).await;
    let target_endpoint = match target_stream {
        Some(ts) => state
            .sessions
            .snapshot(ts)
            .await
            .and_then(|s| s.notification_endpoint),
        None => None,
    };
    let Some(endpoint) = target_endpoint else {
        return Err(BrokerError::TargetOffline);
    };

    push::push(endpoint, Packet::new(PacketType::MessageNotification, msg.encode())).await;

    let message_kind = match msg.kind {
        MessageEnvelopeKind::Text => MessageKind::Text,
        MessageEnvelopeKind::File => MessageKind::File,
    };
    state
        .engine
        .enqueue_message(message_kind, msg.sender_uuid, msg.channel_uuid, msg.ciphertext.clone(), None);

    Ok(vec![Packet::new(PacketType::MessageSuccess, Vec::new())])
}

// ============================================================
// MESSAGE_SYNC_REQUEST
// ============================================================

async fn handle_message_sync(
    state: &Arc<BrokerState>,
    stream_id: StreamId,
    payload: &[u8],
) -> BrokerResult<Vec<Packet>> {
    let session = require_session(state, stream_id).await?;
    let key = require_session_key(&session)?;
    let uuid = require_authenticated(&session)?;

    let plaintext = crypto::aead_decrypt(&key, payload).map_err(|_| BrokerError::DecryptFailed)?;
    if plaintext.len() != 8 {
        return Err(BrokerError::Protocol("malformed sync since_id".into()));
    }
    let since_id = i64::from_le_bytes(plaintext.try_into().unwrap());

    let channels = state.engine.subscribed_channels(uuid).await.map_err(BrokerError::engine)?;
    let mut last_id = since_id;
    let mut out = Vec::new();
    for channel in channels {
        let stored = state
            .engine
            .messages_since(channel.uuid, since_id)
            .await
            .map_err(BrokerError::engine)?;
        for msg in stored {
            last_id = last_id.max(msg.id);
            let kind = match msg.kind {
                MessageKind::Text => MessageEnvelopeKind::Text,
                MessageKind::File => MessageEnvelopeKind::File,
            };
            // Historical replay carries no signature; clients must skip
            // verification for MESSAGE_SYNC envelopes.
            let envelope = Message {
                sender_uuid: msg.sender,
                channel_uuid: msg.channel,
                ciphertext: msg.content,
                signature: Vec::new(),
                kind,
            };
            out.push(Packet::new(PacketType::MessageSync, envelope.encode()));
        }
    }
    let response = crypto::aead_encrypt(&key, &last_id.to_le_bytes())
        .map_err(|_| BrokerError::DecryptFailed)?;
    out.push(Packet::new(PacketType::MessageSyncResponse, response));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRegistry;
    use iplchat_db::engine::Engine;

    async fn test_state() -> Arc<BrokerState> {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::connect(
            dir.path().join("test.db"),
            dir.path().join("snapshots"),
            10,
            true,
        )
        .await
        .unwrap();
        Arc::new(BrokerState {
            sessions: SessionRegistry::new(),
            engine: Arc::new(engine),
        })
    }

    #[tokio::test]
    async fn handshake_establishes_session_key() {
        let state = test_state().await;
        let client_keys = crypto::AsymmetricKeyPair::generate();
        let responses = handle_handshake(&state, 1, &client_keys.public_key().to_bytes())
            .await
            .unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].kind, PacketType::HandshakeResponse);

        let session = state.sessions.snapshot(1).await.unwrap();
        let session_key_bytes = client_keys.decrypt(&responses[0].payload).unwrap();
        assert_eq!(session_key_bytes, session.session_key.unwrap().as_bytes().to_vec());
    }

    #[tokio::test]
    async fn double_handshake_on_same_stream_fails() {
        let state = test_state().await;
        let client_keys = crypto::AsymmetricKeyPair::generate();
        handle_handshake(&state, 1, &client_keys.public_key().to_bytes()).await.unwrap();
        let second = handle_handshake(&state, 1, &client_keys.public_key().to_bytes()).await;
        assert!(matches!(second, Err(BrokerError::SessionAlreadyEstablished)));
    }

    async fn handshake_and_register(
        state: &Arc<BrokerState>,
        stream_id: StreamId,
        username: &str,
        password: &str,
    ) -> (crypto::AsymmetricKeyPair, SymmetricKey, Uuid) {
        let client_keys = crypto::AsymmetricKeyPair::generate();
        let hs = handle_handshake(state, stream_id, &client_keys.public_key().to_bytes())
            .await
            .unwrap();
        let session_key_bytes = client_keys.decrypt(&hs[0].payload).unwrap();
        let mut key_arr = [0u8; 32];
        key_arr.copy_from_slice(&session_key_bytes);
        let session_key = SymmetricKey::from_bytes(key_arr);

        let creds = encode_credentials(username, password).unwrap();
        let encrypted = crypto::aead_encrypt(&session_key, &creds).unwrap();
        let reg = handle_register(state, stream_id, &encrypted).await.unwrap();
        let decrypted = crypto::aead_decrypt(&session_key, &reg[0].payload).unwrap();
        let uuid = Uuid::from_slice(&decrypted).unwrap();
        (client_keys, session_key, uuid)
    }

    #[tokio::test]
    async fn register_then_login_round_trip() {
        let state = test_state().await;
        let (_keys, session_key, uuid) =
            handshake_and_register(&state, 1, "alice", "hunter2").await;

        let creds = encode_credentials("alice", "hunter2").unwrap();
        let encrypted = crypto::aead_encrypt(&session_key, &creds).unwrap();
        let login = handle_login(&state, 1, &encrypted).await.unwrap();
        let decrypted = crypto::aead_decrypt(&session_key, &login[0].payload).unwrap();
        assert_eq!(Uuid::from_slice(&decrypted).unwrap(), uuid);
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_generic_invalid_credentials() {
        let state = test_state().await;
        let (_keys, session_key, _uuid) =
            handshake_and_register(&state, 1, "alice", "hunter2").await;

        let creds = encode_credentials("alice", "wrong").unwrap();
        let encrypted = crypto::aead_encrypt(&session_key, &creds).unwrap();
        let err = handle_login(&state, 1, &encrypted).await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidCredentials));
    }

    #[tokio::test]
    async fn channel_fetch_lists_self_channel_after_register_and_login() {
        let state = test_state().await;
        let (_keys, session_key, uuid) =
            handshake_and_register(&state, 1, "alice", "hunter2").await;
        let creds = encode_credentials("alice", "hunter2").unwrap();
        let encrypted = crypto::aead_encrypt(&session_key, &creds).unwrap();
        handle_login(&state, 1, &encrypted).await.unwrap();

        let fetch = handle_channel_fetch(&state, 1).await.unwrap();
        let decrypted = crypto::aead_decrypt(&session_key, &fetch[0].payload).unwrap();
        let entries = decode_list(&decrypted).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "alice");
        assert_eq!(entries[0].uuid, uuid);
    }

    #[tokio::test]
    async fn message_to_offline_target_yields_target_offline() {
        let state = test_state().await;
        let (_alice_keys, _alice_key, alice_uuid) =
            handshake_and_register(&state, 1, "alice", "hunter2").await;
        let creds = encode_credentials("alice", "hunter2").unwrap();
        let encrypted = crypto::aead_encrypt(&_alice_key, &creds).unwrap();
        handle_login(&state, 1, &encrypted).await.unwrap();

        let bob_channel = Uuid::new_v4();
        state.engine.create_channel_if_absent("bob", bob_channel).await.unwrap();
        state.engine.join_channel(alice_uuid, bob_channel).await.unwrap();

        let signer = crypto::AsymmetricKeyPair::generate();
        state
            .sessions
            .mutate(1, |s| s.peer_public_key = Some(signer.public_key()))
            .await;
        let msg =
            Message::new_signed(alice_uuid, bob_channel, b"hi".to_vec(), MessageEnvelopeKind::Text, &signer)
                .unwrap();
        let err = handle_message(&state, 1, &msg.encode()).await.unwrap_err();
        assert!(matches!(err, BrokerError::TargetOffline));
    }
}
