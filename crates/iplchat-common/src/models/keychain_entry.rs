//! Keychain entry — client-side, persistent, encrypted at rest.

use crate::crypto::SymmetricKey;
use uuid::Uuid;

/// One entry in a client's local keychain: the symmetric key `K_AB`
/// negotiated with `peer_uuid` during a two-phase key exchange.
pub struct KeychainEntry {
    pub peer_uuid: Uuid,
    pub symmetric_key: SymmetricKey,
}

impl KeychainEntry {
    pub fn new(peer_uuid: Uuid, symmetric_key: SymmetricKey) -> Self {
        Self {
            peer_uuid,
            symmetric_key,
        }
    }
}
