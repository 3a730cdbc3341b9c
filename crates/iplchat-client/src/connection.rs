//! The client's half of the framed connection to the broker, grounded
//! on the reference stack's `GatewayClient`
//! connect/request idiom (`nexus_sdk::gateway`) but adapted to raw framed
//! TCP via `iplchat_common::protocol` instead of a JSON-over-WebSocket
//! opcode dispatch — there is no gateway READY/RESUME handshake to
//! replicate, just the protocol's own HANDSHAKE_REQUEST.
//!
//! One `Connection` owns exactly one TCP stream and is not `Clone`; callers
//! that need concurrent access (e.g. a request in flight while a push
//! arrives on the notification listener) run the listener on its own
//! socket — the two are independent connections by design.

use crate::error::{ClientError, ClientResult};
use crate::events::{ConnectionState, EventBus};
use iplchat_common::crypto::{self, AsymmetricKeyPair, AsymmetricPublicKey, SymmetricKey};
use iplchat_common::protocol::{
    decode_list, encode_credentials, read_packet, write_packet, ListEntry, Message,
    MessageEnvelopeKind, Packet, PacketType, ProtocolError,
};
use std::sync::Arc;
use tokio::net::{TcpStream, ToSocketAddrs};
use uuid::Uuid;

/// `true` if `err` reflects the underlying socket breaking rather than a
/// protocol-level rejection (malformed packet, bad ciphertext, etc.) — the
/// distinction that decides whether `on_connection_state` fires.
fn is_socket_broken(err: &ClientError) -> bool {
    matches!(
        err,
        ClientError::Io(_) | ClientError::Protocol(ProtocolError::Io(_))
    )
}

/// An open, handshaken connection to the broker.
///
/// Takes its keypair as an `Arc` rather than owning it outright: the same
/// identity is also needed by [`crate::listener`] to open sealed peer-key
/// boxes pushed to the notification endpoint, and `AsymmetricKeyPair` holds
/// secret key material that is not `Clone`.
pub struct Connection {
    stream: TcpStream,
    keypair: Arc<AsymmetricKeyPair>,
    events: Arc<EventBus>,
    session_key: Option<SymmetricKey>,
    user_uuid: Option<Uuid>,
}

impl Connection {
    /// Open the TCP stream. The connection is not usable for authenticated
    /// requests until [`Connection::handshake`] has run. `events` is the
    /// same bus the notification listener emits on, so a front-end sees
    /// `on_connection_state` transitions from both halves of the client.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        keypair: Arc<AsymmetricKeyPair>,
        events: Arc<EventBus>,
    ) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            keypair,
            events,
            session_key: None,
            user_uuid: None,
        })
    }

    pub fn public_key(&self) -> AsymmetricPublicKey {
        self.keypair.public_key()
    }

    pub fn user_uuid(&self) -> Option<Uuid> {
        self.user_uuid
    }

    fn session_key(&self) -> ClientResult<&SymmetricKey> {
        self.session_key.as_ref().ok_or(ClientError::NoSession)
    }

    /// Funnel a raw protocol-layer result through `on_connection_state`:
    /// a socket-level failure fires `Disconnected` before the error
    /// reaches the caller.
    fn note_if_broken<T>(&self, result: Result<T, ProtocolError>) -> ClientResult<T> {
        result.map_err(|e| {
            let e = ClientError::from(e);
            if is_socket_broken(&e) {
                self.events.emit_connection_state(ConnectionState::Disconnected);
            }
            e
        })
    }

    async fn roundtrip(&mut self, request: Packet) -> ClientResult<Packet> {
        self.note_if_broken(write_packet(&mut self.stream, &request).await)?;
        self.note_if_broken(read_packet(&mut self.stream).await)
    }

    /// Send a request and expect either `expect_ok` or (if given)
    /// `expect_err` back. Other request types have no paired error packet
    /// on failure and the server simply does not reply; callers
    /// of those requests will block on the read until the server does
    /// answer something, matching the reference server's own lack of
    /// request-level timeouts.
    async fn request(
        &mut self,
        request: Packet,
        expect_ok: PacketType,
        expect_err: Option<PacketType>,
    ) -> ClientResult<Packet> {
        let response = self.roundtrip(request).await?;
        if response.kind == expect_ok {
            Ok(response)
        } else if expect_err == Some(response.kind) {
            Err(ClientError::Rejected)
        } else {
            Err(ClientError::UnexpectedReply(response.kind))
        }
    }

    /// C1+C7 handshake: send our public key, decrypt the returned session
    /// key under our own keypair.
    pub async fn handshake(&mut self) -> ClientResult<()> {
        let payload = self.public_key().to_bytes().to_vec();
        let request = Packet::new(PacketType::HandshakeRequest, payload);
        let response = self.request(request, PacketType::HandshakeResponse, None).await?;
        let raw = self.keypair.decrypt(&response.payload)?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| ClientError::Crypto(crypto::CryptoError::Malformed("session key wrong length")))?;
        self.session_key = Some(SymmetricKey::from_bytes(bytes));
        self.events.emit_connection_state(ConnectionState::Connected);
        Ok(())
    }

    pub async fn login(&mut self, username: &str, password: &str) -> ClientResult<Uuid> {
        let key = self.session_key()?.clone();
        let plaintext = encode_credentials(username, password)?;
        let ciphertext = crypto::aead_encrypt(&key, &plaintext)?;
        let request = Packet::new(PacketType::LoginRequest, ciphertext);
        let response = self.request(request, PacketType::LoginResponse, Some(PacketType::LoginError)).await?;
        let raw = crypto::aead_decrypt(&key, &response.payload)?;
        let uuid = Uuid::from_slice(&raw).map_err(|_| ClientError::UnexpectedReply(PacketType::LoginResponse))?;
        self.user_uuid = Some(uuid);
        Ok(uuid)
    }

    pub async fn register(&mut self, username: &str, password: &str) -> ClientResult<Uuid> {
        let key = self.session_key()?.clone();
        let plaintext = encode_credentials(username, password)?;
        let ciphertext = crypto::aead_encrypt(&key, &plaintext)?;
        let request = Packet::new(PacketType::RegisterRequest, ciphertext);
        let response = self
            .request(request, PacketType::RegisterResponse, Some(PacketType::RegisterError))
            .await?;
        let raw = crypto::aead_decrypt(&key, &response.payload)?;
        Uuid::from_slice(&raw).map_err(|_| ClientError::UnexpectedReply(PacketType::RegisterResponse))
    }

    pub async fn logout(&mut self) -> ClientResult<()> {
        let request = Packet::new(PacketType::LogoutRequest, Vec::new());
        self.request(request, PacketType::LogoutResponse, None).await?;
        self.user_uuid = None;
        self.session_key = None;
        Ok(())
    }

    /// Register the port the notification listener is bound to.
    pub async fn register_notification_port(&mut self, port: u16) -> ClientResult<()> {
        let request = Packet::new(PacketType::NotificationPort, (port as i32).to_le_bytes().to_vec());
        self.request(request, PacketType::NotificationPortResponse, None).await?;
        Ok(())
    }

    pub async fn fetch_channels(&mut self) -> ClientResult<Vec<ListEntry>> {
        let key = self.session_key()?.clone();
        let request = Packet::new(PacketType::ChannelFetchRequest, Vec::new());
        let response = self.request(request, PacketType::ChannelFetchResponse, None).await?;
        let plaintext = crypto::aead_decrypt(&key, &response.payload)?;
        Ok(decode_list(&plaintext)?)
    }

    pub async fn join_channel(&mut self, channel_uuid: Uuid) -> ClientResult<()> {
        let key = self.session_key()?.clone();
        let ciphertext = crypto::aead_encrypt(&key, channel_uuid.as_bytes())?;
        let request = Packet::new(PacketType::JoinChannelRequest, ciphertext);
        self.request(request, PacketType::JoinChannelSuccess, Some(PacketType::JoinChannelError))
            .await?;
        Ok(())
    }

    pub async fn search_users(&mut self, pattern: &str) -> ClientResult<Vec<ListEntry>> {
        let key = self.session_key()?.clone();
        let ciphertext = crypto::aead_encrypt(&key, pattern.as_bytes())?;
        let request = Packet::new(PacketType::UserSearchRequest, ciphertext);
        let response = self.request(request, PacketType::UserSearchResponse, None).await?;
        let plaintext = crypto::aead_decrypt(&key, &response.payload)?;
        Ok(decode_list(&plaintext)?)
    }

    pub async fn username_of(&mut self, target_uuid: Uuid) -> ClientResult<String> {
        let key = self.session_key()?.clone();
        let ciphertext = crypto::aead_encrypt(&key, target_uuid.as_bytes())?;
        let request = Packet::new(PacketType::UsernameRequest, ciphertext);
        let response = self.request(request, PacketType::UsernameResponse, None).await?;
        let plaintext = crypto::aead_decrypt(&key, &response.payload)?;
        String::from_utf8(plaintext).map_err(|_| ClientError::UnexpectedReply(PacketType::UsernameResponse))
    }

    /// Phase 1 of the peer key exchange: ask the broker for `target_uuid`'s
    /// public key.
    pub async fn c2c_handshake(&mut self, target_uuid: Uuid) -> ClientResult<AsymmetricPublicKey> {
        let request = Packet::new(PacketType::ClientToClientHandshake, target_uuid.as_bytes().to_vec());
        let response = self.request(request, PacketType::ClientPublicKey, None).await?;
        Ok(AsymmetricPublicKey::from_bytes(&response.payload)?)
    }

    /// Phase 2: seal a freshly generated peer key under `target_public_key`
    /// and hand it to the broker for delivery. The broker echoes the same
    /// (uuid-substituted) notification back over this stream; we discard it
    /// here since the caller already has `peer_key` in hand.
    pub async fn c2c_handshake2(
        &mut self,
        target_uuid: Uuid,
        target_public_key: &AsymmetricPublicKey,
        peer_key: &SymmetricKey,
    ) -> ClientResult<()> {
        let sealed = crypto::asym_encrypt(target_public_key, peer_key.as_bytes())?;
        let target_bytes = target_uuid.as_bytes();
        let mut payload = Vec::with_capacity(8 + target_bytes.len() + sealed.len());
        payload.extend_from_slice(&(target_bytes.len() as u32).to_le_bytes());
        payload.extend_from_slice(&(sealed.len() as u32).to_le_bytes());
        payload.extend_from_slice(target_bytes);
        payload.extend_from_slice(&sealed);

        let request = Packet::new(PacketType::ClientToClientHandshake2, payload);
        self.request(request, PacketType::HandshakeNotification, None).await?;
        Ok(())
    }

    /// Sign and send a message envelope to `channel_uuid`.
    /// `channel_uuid` equal to a peer's own uuid addresses that peer
    /// directly, per the direct-message channel convention.
    pub async fn send_message(
        &mut self,
        channel_uuid: Uuid,
        ciphertext: Vec<u8>,
        kind: MessageEnvelopeKind,
    ) -> ClientResult<()> {
        let sender_uuid = self.user_uuid.ok_or(ClientError::NoSession)?;
        let envelope = Message::new_signed(sender_uuid, channel_uuid, ciphertext, kind, &self.keypair)?;
        let request = Packet::new(PacketType::MessageRequest, envelope.encode());
        self.request(request, PacketType::MessageSuccess, Some(PacketType::MessageError))
            .await?;
        Ok(())
    }

    /// Replay every stored message across all subscribed channels since
    /// `since_id`, returning them alongside the new high-water mark.
    /// Envelopes carry no
    /// signature on replay; callers must not call `Message::verify` on them.
    pub async fn message_sync(&mut self, since_id: i64) -> ClientResult<(Vec<Message>, i64)> {
        let key = self.session_key()?.clone();
        let ciphertext = crypto::aead_encrypt(&key, &since_id.to_le_bytes())?;
        let request = Packet::new(PacketType::MessageSyncRequest, ciphertext);
        self.note_if_broken(write_packet(&mut self.stream, &request).await)?;

        let mut messages = Vec::new();
        loop {
            let packet = self.note_if_broken(read_packet(&mut self.stream).await)?;
            match packet.kind {
                PacketType::MessageSync => {
                    messages.push(Message::decode(&packet.payload)?);
                }
                PacketType::MessageSyncResponse => {
                    let raw = crypto::aead_decrypt(&key, &packet.payload)?;
                    let bytes: [u8; 8] = raw
                        .try_into()
                        .map_err(|_| ClientError::UnexpectedReply(PacketType::MessageSyncResponse))?;
                    return Ok((messages, i64::from_le_bytes(bytes)));
                }
                other => return Err(ClientError::UnexpectedReply(other)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::listener;
    use iplchat_broker::{dispatch, BrokerState};
    use iplchat_db::engine::Engine;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::net::TcpListener;

    async fn spawn_broker() -> std::net::SocketAddr {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::connect(dir.path().join("test.db"), dir.path().join("snapshots"), 10, true)
            .await
            .unwrap();
        let state = BrokerState::new(engine);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let next_id = AtomicU64::new(1);
            loop {
                let Ok((socket, _)) = listener.accept().await else { break };
                let state = state.clone();
                let stream_id = next_id.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(dispatch::handle_connection(state, socket, stream_id));
            }
        });
        // Leak the tempdir for the lifetime of the test process; dropping
        // it would delete the database file out from under the server task.
        std::mem::forget(dir);
        addr
    }

    #[tokio::test]
    async fn handshake_register_login_round_trip() {
        let addr = spawn_broker().await;
        let keys = Arc::new(AsymmetricKeyPair::generate());
        let events = Arc::new(EventBus::new());
        let mut conn_states = events.on_connection_state();
        let mut conn = Connection::connect(addr, keys, Arc::clone(&events)).await.unwrap();
        conn.handshake().await.unwrap();
        assert_eq!(conn_states.recv().await.unwrap(), ConnectionState::Connected);
        let registered_uuid = conn.register("alice", "hunter2").await.unwrap();

        let keys2 = Arc::new(AsymmetricKeyPair::generate());
        let mut conn2 = Connection::connect(addr, keys2, Arc::new(EventBus::new())).await.unwrap();
        conn2.handshake().await.unwrap();
        let logged_in_uuid = conn2.login("alice", "hunter2").await.unwrap();
        assert_eq!(registered_uuid, logged_in_uuid);
    }

    #[tokio::test]
    async fn peer_key_exchange_and_message_relay() {
        let addr = spawn_broker().await;

        let alice_keys = Arc::new(AsymmetricKeyPair::generate());
        let alice_events = Arc::new(EventBus::new());
        let mut alice = Connection::connect(addr, Arc::clone(&alice_keys), Arc::clone(&alice_events))
            .await
            .unwrap();
        alice.handshake().await.unwrap();
        let alice_uuid = alice.register("alice", "pw").await.unwrap();
        alice.login("alice", "pw").await.unwrap();

        let bob_keys = Arc::new(AsymmetricKeyPair::generate());
        let bob_events = Arc::new(EventBus::new());
        let mut bob = Connection::connect(addr, Arc::clone(&bob_keys), Arc::clone(&bob_events))
            .await
            .unwrap();
        bob.handshake().await.unwrap();
        let bob_uuid = bob.register("bob", "pw").await.unwrap();
        bob.login("bob", "pw").await.unwrap();

        let (bob_port, _listener_handle) =
            listener::spawn("127.0.0.1:0", Arc::clone(&bob_keys), Arc::clone(&bob_events))
                .await
                .unwrap();
        bob.register_notification_port(bob_port).await.unwrap();

        let mut peer_joined = bob_events.on_peer_joined();
        let mut messages = bob_events.on_message();

        let keychain_dir = tempfile::tempdir().unwrap();
        let mut keychain =
            iplchat_keychain::Keychain::load(keychain_dir.path(), alice_uuid, "keychain-pw")
                .await
                .unwrap()
                .unwrap();
        crate::keyexchange::initiate(&mut alice, &mut keychain, bob_uuid).await.unwrap();

        let joined = peer_joined.recv().await.unwrap();
        assert_eq!(joined.peer_uuid, alice_uuid);
        assert_eq!(
            keychain.get(bob_uuid).unwrap().as_bytes(),
            joined.symmetric_key.as_bytes()
        );

        // Sending into bob's direct-message channel requires alice to be a
        // subscriber of it.
        alice.join_channel(bob_uuid).await.unwrap();

        let ciphertext = crypto::aead_encrypt(&joined.symmetric_key, b"hello bob").unwrap();
        alice
            .send_message(bob_uuid, ciphertext.clone(), MessageEnvelopeKind::Text)
            .await
            .unwrap();

        let received = messages.recv().await.unwrap();
        assert_eq!(received.envelope.sender_uuid, alice_uuid);
        assert_eq!(received.envelope.ciphertext, ciphertext);
        let plaintext = crypto::aead_decrypt(&joined.symmetric_key, &received.envelope.ciphertext).unwrap();
        assert_eq!(plaintext, b"hello bob");
    }
}
