//! Client-side error type, mirroring `iplchat_common::error::BrokerError`'s
//! shape but from the caller's side of the wire: a paired error packet
//! (e.g. `LOGIN_ERROR`) carries no detail, so it surfaces here as a plain
//! variant rather than something `decode_credentials`-style can unpack.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("protocol error: {0}")]
    Protocol(#[from] iplchat_common::protocol::ProtocolError),

    #[error("crypto error: {0}")]
    Crypto(#[from] iplchat_common::crypto::CryptoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("keychain error: {0}")]
    Keychain(#[from] iplchat_keychain::KeychainError),

    #[error("unexpected packet type in reply: {0:?}")]
    UnexpectedReply(iplchat_common::protocol::PacketType),

    #[error("server rejected the request")]
    Rejected,

    #[error("no session established yet (handshake required first)")]
    NoSession,

    #[error("peer has no known public key; run the key exchange first")]
    NoPeerKey(uuid::Uuid),

    #[error("peer is offline or has no notification endpoint registered")]
    PeerOffline,
}

pub type ClientResult<T> = Result<T, ClientError>;
