//! Drives the two-phase client-to-client key exchange and
//! composes its result with the persistent keychain (C3), so a successful
//! exchange survives a restart without the broker ever learning `K_AB`.

use crate::connection::Connection;
use crate::error::ClientResult;
use crate::events::PeerJoinedEvent;
use iplchat_keychain::Keychain;
use uuid::Uuid;

/// Initiate an exchange with `target_uuid`: fetch its public key (phase 1),
/// generate a fresh peer key, seal it for delivery (phase 2), then record
/// it in `keychain` and persist immediately.
///
/// This is the initiating ("alice") side of the exchange.
pub async fn initiate(
    conn: &mut Connection,
    keychain: &mut Keychain,
    target_uuid: Uuid,
) -> ClientResult<()> {
    let target_public_key = conn.c2c_handshake(target_uuid).await?;
    let peer_key = iplchat_common::crypto::SymmetricKey::generate();
    conn.c2c_handshake2(target_uuid, &target_public_key, &peer_key).await?;
    keychain.add(target_uuid, peer_key);
    keychain.save().await?;
    Ok(())
}

/// Absorb a [`PeerJoinedEvent`] delivered by the notification listener:
/// the responding ("bob") side of the exchange, where the peer key arrives
/// already decrypted via our own keypair and just needs recording.
pub async fn absorb(keychain: &mut Keychain, event: PeerJoinedEvent) -> ClientResult<()> {
    keychain.add(event.peer_uuid, event.symmetric_key);
    keychain.save().await?;
    Ok(())
}
