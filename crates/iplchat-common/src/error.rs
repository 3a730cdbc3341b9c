//! Centralized error types for the broker and client.
//!
//! One kind taxonomy covers protocol, crypto, auth, state (precondition
//! failures), persistence, and config errors. Each variant
//! either maps to a paired wire error packet or is logged and the offending
//! packet dropped — callers decide which, since only the dispatcher knows
//! whether a pairing exists for the packet type in question.

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    // === Protocol errors ===
    #[error("malformed packet: {0}")]
    Protocol(String),

    #[error("unexpected packet type {0} for current session state")]
    UnexpectedPacket(u32),

    // === Crypto errors ===
    #[error("decryption failed")]
    DecryptFailed,

    #[error("signature verification failed")]
    VerifyFailed,

    // === Auth errors ===
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("username already exists")]
    AlreadyExists,

    // === State / precondition errors ===
    #[error("session already has a key established")]
    SessionAlreadyEstablished,

    #[error("session not authenticated")]
    Unauthenticated,

    #[error("already authenticated")]
    AlreadyAuthenticated,

    #[error("channel not found")]
    ChannelNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("not a member of channel")]
    NotSubscribed,

    #[error("target is not currently connected")]
    TargetOffline,

    // === Persistence errors ===
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// The persistence engine (`iplchat-db`) isn't a dependency of this
    /// crate — it depends on us — so its error type can't carry a `#[from]`
    /// here without a cyclic dependency. Call sites convert with
    /// `.map_err(BrokerError::engine)`.
    #[error("engine error: {0}")]
    Engine(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // === Config errors ===
    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    /// Converts any displayable engine error (`iplchat_db::EngineError`,
    /// without naming that crate here) into `BrokerError::Engine`. Intended
    /// for `.map_err(BrokerError::engine)` at persistence call sites.
    pub fn engine(e: impl std::fmt::Display) -> Self {
        Self::Engine(e.to_string())
    }

    /// The wire error category paired with this error, if any.
    ///
    /// Not every error kind has a paired response packet type (e.g. a
    /// malformed packet on an unauthenticated stream is simply logged and
    /// dropped).
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Protocol(_) | Self::UnexpectedPacket(_) => ErrorKind::Protocol,
            Self::DecryptFailed | Self::VerifyFailed => ErrorKind::Crypto,
            Self::InvalidCredentials | Self::AlreadyExists => ErrorKind::Auth,
            Self::SessionAlreadyEstablished
            | Self::Unauthenticated
            | Self::AlreadyAuthenticated
            | Self::ChannelNotFound
            | Self::UserNotFound
            | Self::NotSubscribed
            | Self::TargetOffline => ErrorKind::State,
            Self::Persistence(_) | Self::Engine(_) | Self::Io(_) | Self::Internal(_) => {
                ErrorKind::Persistence
            }
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol,
    Crypto,
    Auth,
    State,
    Persistence,
    Config,
}
