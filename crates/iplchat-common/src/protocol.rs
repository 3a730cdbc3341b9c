//! Wire protocol — packet framing and the typed packet enumeration.
//!
//! Every wire unit is a length-prefixed `Packet { type: u32, payload: Vec<u8> }`.
//! `Message` is the one structured payload with its own nested length-prefixed
//! layout: `sender ‖ channel ‖ ciphertext ‖ signature ‖ kind`,
//! each of the first four fields preceded by a four-byte little-endian length.

use crate::crypto::{self, AsymmetricPublicKey, CryptoError};
use uuid::Uuid;

/// Ciphertext bodies longer than this are rejected at envelope construction.
pub const MAX_CIPHERTEXT_LEN: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("truncated packet: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("ciphertext too long: {0} bytes (max {MAX_CIPHERTEXT_LEN})")]
    CiphertextTooLong(usize),

    #[error("malformed field: {0}")]
    Malformed(&'static str),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sanity ceiling on a single frame's declared payload length — guards the
/// reader against allocating an attacker-controlled amount of memory before
/// any other validation runs. Deliberately looser than the worst case for a
/// `MESSAGE_REQUEST` (enforced by `Message::decode`'s own 500-byte ciphertext
/// check); list responses (`CHANNEL_FETCH_RESPONSE`, `USER_SEARCH_RESPONSE`)
/// legitimately exceed that.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// The closed packet type enumeration. Ordinals are the wire
/// representation; reordering variants is a wire-breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketType {
    HandshakeRequest = 0,
    HandshakeResponse = 1,
    LoginRequest = 2,
    LoginResponse = 3,
    LoginError = 4,
    RegisterRequest = 5,
    RegisterResponse = 6,
    RegisterError = 7,
    LogoutRequest = 8,
    LogoutResponse = 9,
    NotificationPort = 10,
    NotificationPortResponse = 11,
    ChannelFetchRequest = 12,
    ChannelFetchResponse = 13,
    JoinChannelRequest = 14,
    JoinChannelSuccess = 15,
    JoinChannelError = 16,
    UserSearchRequest = 17,
    UserSearchResponse = 18,
    UsernameRequest = 19,
    UsernameResponse = 20,
    ClientToClientHandshake = 21,
    ClientPublicKey = 22,
    ClientToClientHandshake2 = 23,
    HandshakeNotification = 24,
    MessageRequest = 25,
    MessageNotification = 26,
    MessageSuccess = 27,
    MessageError = 28,
    /// Replay stored messages since a high-water mark, for a client catching
    /// up after being offline; backed by the persistence layer.
    MessageSyncRequest = 29,
    MessageSyncResponse = 30,
    MessageSync = 31,
}

impl PacketType {
    pub fn from_u32(v: u32) -> Option<Self> {
        use PacketType::*;
        Some(match v {
            0 => HandshakeRequest,
            1 => HandshakeResponse,
            2 => LoginRequest,
            3 => LoginResponse,
            4 => LoginError,
            5 => RegisterRequest,
            6 => RegisterResponse,
            7 => RegisterError,
            8 => LogoutRequest,
            9 => LogoutResponse,
            10 => NotificationPort,
            11 => NotificationPortResponse,
            12 => ChannelFetchRequest,
            13 => ChannelFetchResponse,
            14 => JoinChannelRequest,
            15 => JoinChannelSuccess,
            16 => JoinChannelError,
            17 => UserSearchRequest,
            18 => UserSearchResponse,
            19 => UsernameRequest,
            20 => UsernameResponse,
            21 => ClientToClientHandshake,
            22 => ClientPublicKey,
            23 => ClientToClientHandshake2,
            24 => HandshakeNotification,
            25 => MessageRequest,
            26 => MessageNotification,
            27 => MessageSuccess,
            28 => MessageError,
            29 => MessageSyncRequest,
            30 => MessageSyncResponse,
            31 => MessageSync,
            _ => return None,
        })
    }
}

/// One `(type, payload)` unit as it travels on the wire, length-prefixed by
/// the caller's framed reader/writer (see `iplchat-broker::dispatch` and
/// `iplchat-client::connection`).
#[derive(Debug, Clone)]
pub struct Packet {
    pub kind: PacketType,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(kind: PacketType, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// Encode as `u32 type ‖ u32 len ‖ payload`, the framing the connection
    /// layer reads/writes length-prefixed over the stream.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.payload.len());
        out.extend_from_slice(&(self.kind as u32).to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), ProtocolError> {
        if buf.len() < 8 {
            return Err(ProtocolError::Truncated { need: 8, have: buf.len() });
        }
        let type_val = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let len = u32::from_le_bytes(buf[4..8].try_into().unwrap()) as usize;
        if buf.len() < 8 + len {
            return Err(ProtocolError::Truncated { need: 8 + len, have: buf.len() });
        }
        let kind = PacketType::from_u32(type_val)
            .ok_or(ProtocolError::Malformed("unknown packet type"))?;
        let payload = buf[8..8 + len].to_vec();
        Ok((Packet { kind, payload }, &buf[8 + len..]))
    }
}

/// Write one length-prefixed packet to an async sink (the connection
/// layer's framing primitive — used by both the broker's per-connection
/// handler and the client's connection/listener tasks).
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), ProtocolError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;
    writer.write_all(&packet.encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed packet from an async source, blocking until a
/// full frame has arrived. Returns `Err(Io(UnexpectedEof))` (surfaced via
/// `read_exact`) when the peer closes mid-frame or at a frame boundary —
/// callers treat that as an ordinary disconnect.
pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, ProtocolError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;
    let mut header = [0u8; 8];
    reader.read_exact(&mut header).await?;
    let type_val = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let len = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::Malformed("frame exceeds sanity ceiling"));
    }
    let kind = PacketType::from_u32(type_val)
        .ok_or(ProtocolError::Malformed("unknown packet type"))?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Packet { kind, payload })
}

// ============================================================
// Length-prefixed field helpers
// ============================================================

fn put_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u32).to_le_bytes());
    out.extend_from_slice(field);
}

fn take_field<'a>(buf: &'a [u8]) -> Result<(&'a [u8], &'a [u8]), ProtocolError> {
    if buf.len() < 4 {
        return Err(ProtocolError::Truncated { need: 4, have: buf.len() });
    }
    let len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    if buf.len() < 4 + len {
        return Err(ProtocolError::Truncated { need: 4 + len, have: buf.len() });
    }
    Ok((&buf[4..4 + len], &buf[4 + len..]))
}

// ============================================================
// Message envelope
// ============================================================

/// `kind` discriminant for a `Message` envelope. File transfer is out of
/// scope: `File` is accepted on the wire but the broker never persists the
/// referenced blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageEnvelopeKind {
    Text = 0,
    File = 1,
}

impl MessageEnvelopeKind {
    fn from_u32(v: u32) -> Result<Self, ProtocolError> {
        match v {
            0 => Ok(Self::Text),
            1 => Ok(Self::File),
            _ => Err(ProtocolError::Malformed("unknown message kind")),
        }
    }
}

/// A `Message` envelope: `{ sender_uuid, channel_uuid, ciphertext (≤500
/// bytes), signature, kind }`. The signature is over `H(ciphertext)` under
/// the sender's asymmetric key pair.
#[derive(Debug, Clone)]
pub struct Message {
    pub sender_uuid: Uuid,
    pub channel_uuid: Uuid,
    pub ciphertext: Vec<u8>,
    pub signature: Vec<u8>,
    pub kind: MessageEnvelopeKind,
}

impl Message {
    /// Construct a new envelope, signing `ciphertext` with `signer`.
    /// Rejects ciphertexts over 500 bytes.
    pub fn new_signed(
        sender_uuid: Uuid,
        channel_uuid: Uuid,
        ciphertext: Vec<u8>,
        kind: MessageEnvelopeKind,
        signer: &crypto::AsymmetricKeyPair,
    ) -> Result<Self, ProtocolError> {
        if ciphertext.len() > MAX_CIPHERTEXT_LEN {
            return Err(ProtocolError::CiphertextTooLong(ciphertext.len()));
        }
        let signature = signer.sign(&ciphertext).to_vec();
        Ok(Self {
            sender_uuid,
            channel_uuid,
            ciphertext,
            signature,
            kind,
        })
    }

    /// Verify the envelope's signature under `signer_public_key`. The
    /// signature covers `H(ciphertext)` — [`crypto::sign`] and
    /// [`crypto::verify_signature`] hash internally, so callers just pass
    /// the raw ciphertext.
    pub fn verify(&self, signer_public_key: &AsymmetricPublicKey) -> Result<(), CryptoError> {
        crypto::verify_signature(signer_public_key, &self.ciphertext, &self.signature)
    }

    /// Serialize as four length-prefixed fields (sender, channel,
    /// ciphertext, signature) followed by a plain four-byte kind tag.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_field(&mut out, self.sender_uuid.as_bytes());
        put_field(&mut out, self.channel_uuid.as_bytes());
        put_field(&mut out, &self.ciphertext);
        put_field(&mut out, &self.signature);
        out.extend_from_slice(&(self.kind as u32).to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let (sender_bytes, rest) = take_field(buf)?;
        let (channel_bytes, rest) = take_field(rest)?;
        let (ciphertext, rest) = take_field(rest)?;
        let (signature, rest) = take_field(rest)?;
        if ciphertext.len() > MAX_CIPHERTEXT_LEN {
            return Err(ProtocolError::CiphertextTooLong(ciphertext.len()));
        }
        if rest.len() < 4 {
            return Err(ProtocolError::Truncated { need: 4, have: rest.len() });
        }
        let kind = MessageEnvelopeKind::from_u32(u32::from_le_bytes(
            rest[0..4].try_into().unwrap(),
        ))?;
        let sender_uuid =
            Uuid::from_slice(sender_bytes).map_err(|_| ProtocolError::Malformed("sender uuid"))?;
        let channel_uuid = Uuid::from_slice(channel_bytes)
            .map_err(|_| ProtocolError::Malformed("channel uuid"))?;
        Ok(Self {
            sender_uuid,
            channel_uuid,
            ciphertext: ciphertext.to_vec(),
            signature: signature.to_vec(),
            kind,
        })
    }
}

// ============================================================
// Encoded user/channel list
// ============================================================

/// One entry of an encoded user/channel list: `(name, uuid)`.
pub struct ListEntry {
    pub name: String,
    pub uuid: Uuid,
}

/// `i32 count ‖ [i32 name_len ‖ i32 uuid_len ‖ name ‖ uuid] * count`.
pub fn encode_list(entries: &[ListEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as i32).to_le_bytes());
    for e in entries {
        let uuid_str = e.uuid.to_string();
        out.extend_from_slice(&(e.name.len() as i32).to_le_bytes());
        out.extend_from_slice(&(uuid_str.len() as i32).to_le_bytes());
        out.extend_from_slice(e.name.as_bytes());
        out.extend_from_slice(uuid_str.as_bytes());
    }
    out
}

pub fn decode_list(buf: &[u8]) -> Result<Vec<ListEntry>, ProtocolError> {
    if buf.len() < 4 {
        return Err(ProtocolError::Truncated { need: 4, have: buf.len() });
    }
    let count = i32::from_le_bytes(buf[0..4].try_into().unwrap()).max(0) as usize;
    let mut cursor = &buf[4..];
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        if cursor.len() < 8 {
            return Err(ProtocolError::Truncated { need: 8, have: cursor.len() });
        }
        let name_len = i32::from_le_bytes(cursor[0..4].try_into().unwrap()) as usize;
        let uuid_len = i32::from_le_bytes(cursor[4..8].try_into().unwrap()) as usize;
        cursor = &cursor[8..];
        if cursor.len() < name_len + uuid_len {
            return Err(ProtocolError::Truncated {
                need: name_len + uuid_len,
                have: cursor.len(),
            });
        }
        let name = String::from_utf8(cursor[..name_len].to_vec())
            .map_err(|_| ProtocolError::Malformed("list entry name not utf8"))?;
        let uuid_str = std::str::from_utf8(&cursor[name_len..name_len + uuid_len])
            .map_err(|_| ProtocolError::Malformed("list entry uuid not utf8"))?;
        let uuid = Uuid::parse_str(uuid_str).map_err(|_| ProtocolError::Malformed("list entry uuid"))?;
        cursor = &cursor[name_len + uuid_len..];
        out.push(ListEntry { name, uuid });
    }
    Ok(out)
}

// ============================================================
// Credential payload: LOGIN_REQUEST / REGISTER_REQUEST
// ============================================================

/// `u8 ulen ‖ u8 plen ‖ username ‖ password`, the plaintext carried inside
/// `AEAD(session, ...)` for LOGIN_REQUEST / REGISTER_REQUEST.
pub fn encode_credentials(username: &str, password: &str) -> Result<Vec<u8>, ProtocolError> {
    if username.len() > u8::MAX as usize || password.len() > u8::MAX as usize {
        return Err(ProtocolError::Malformed("username or password too long"));
    }
    let mut out = Vec::with_capacity(2 + username.len() + password.len());
    out.push(username.len() as u8);
    out.push(password.len() as u8);
    out.extend_from_slice(username.as_bytes());
    out.extend_from_slice(password.as_bytes());
    Ok(out)
}

pub fn decode_credentials(buf: &[u8]) -> Result<(String, String), ProtocolError> {
    if buf.len() < 2 {
        return Err(ProtocolError::Truncated { need: 2, have: buf.len() });
    }
    let ulen = buf[0] as usize;
    let plen = buf[1] as usize;
    if buf.len() < 2 + ulen + plen {
        return Err(ProtocolError::Truncated {
            need: 2 + ulen + plen,
            have: buf.len(),
        });
    }
    let username = String::from_utf8(buf[2..2 + ulen].to_vec())
        .map_err(|_| ProtocolError::Malformed("username not utf8"))?;
    let password = String::from_utf8(buf[2 + ulen..2 + ulen + plen].to_vec())
        .map_err(|_| ProtocolError::Malformed("password not utf8"))?;
    Ok((username, password))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AsymmetricKeyPair;

    #[test]
    fn packet_round_trip() {
        let p = Packet::new(PacketType::LoginRequest, vec![1, 2, 3]);
        let encoded = p.encode();
        let (decoded, rest) = Packet::decode(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded.kind, PacketType::LoginRequest);
        assert_eq!(decoded.payload, vec![1, 2, 3]);
    }

    #[test]
    fn message_round_trip() {
        let signer = AsymmetricKeyPair::generate();
        let msg = Message::new_signed(
            Uuid::new_v4(),
            Uuid::new_v4(),
            b"hello".to_vec(),
            MessageEnvelopeKind::Text,
            &signer,
        )
        .unwrap();
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.sender_uuid, msg.sender_uuid);
        assert_eq!(decoded.channel_uuid, msg.channel_uuid);
        assert_eq!(decoded.ciphertext, msg.ciphertext);
        assert_eq!(decoded.signature, msg.signature);
        decoded.verify(&signer.public_key()).unwrap();
    }

    #[test]
    fn ciphertext_exactly_500_accepted() {
        let signer = AsymmetricKeyPair::generate();
        let ct = vec![0u8; 500];
        assert!(Message::new_signed(
            Uuid::new_v4(),
            Uuid::new_v4(),
            ct,
            MessageEnvelopeKind::Text,
            &signer
        )
        .is_ok());
    }

    #[test]
    fn ciphertext_501_rejected() {
        let signer = AsymmetricKeyPair::generate();
        let ct = vec![0u8; 501];
        assert!(Message::new_signed(
            Uuid::new_v4(),
            Uuid::new_v4(),
            ct,
            MessageEnvelopeKind::Text,
            &signer
        )
        .is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_verification() {
        let signer = AsymmetricKeyPair::generate();
        let mut msg = Message::new_signed(
            Uuid::new_v4(),
            Uuid::new_v4(),
            b"hi".to_vec(),
            MessageEnvelopeKind::Text,
            &signer,
        )
        .unwrap();
        msg.ciphertext = b"hx".to_vec();
        assert!(msg.verify(&signer.public_key()).is_err());
    }

    #[test]
    fn credentials_round_trip() {
        let encoded = encode_credentials("alice", "hunter2").unwrap();
        let (u, p) = decode_credentials(&encoded).unwrap();
        assert_eq!(u, "alice");
        assert_eq!(p, "hunter2");
    }

    #[tokio::test]
    async fn framed_read_write_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let p = Packet::new(PacketType::MessageSuccess, vec![9, 9, 9]);
        write_packet(&mut a, &p).await.unwrap();
        let received = read_packet(&mut b).await.unwrap();
        assert_eq!(received.kind, PacketType::MessageSuccess);
        assert_eq!(received.payload, vec![9, 9, 9]);
    }

    #[test]
    fn list_round_trip() {
        let entries = vec![
            ListEntry { name: "alice".into(), uuid: Uuid::new_v4() },
            ListEntry { name: "bob".into(), uuid: Uuid::new_v4() },
        ];
        let encoded = encode_list(&entries);
        let decoded = decode_list(&encoded).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].name, "alice");
        assert_eq!(decoded[1].name, "bob");
    }
}
