//! # iplchat-keychain
//!
//! Client-side, password-protected, persistent store of per-peer symmetric
//! keys (C3), so negotiated peer keys survive restarts without the broker
//! ever seeing peer key material.
//!
//! On-disk layout: `salt(32) ‖ AEAD_{KDF(password, salt)}(entries)`, where
//! `entries` is a four-byte count followed by concatenated
//! `(len32 ‖ peer_uuid ‖ len32 ‖ key_bytes)` records. Grounded on
//! `iplchat_common::crypto`'s Argon2id KDF + ChaCha20Poly1305 AEAD; no
//! crate in the reference stack has an analogous encrypted local store.

use iplchat_common::crypto::{self, SymmetricKey, SYMMETRIC_KEY_LEN};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const SALT_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum KeychainError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed keychain file")]
    Malformed,
}

/// One owner's keychain, loaded into memory after a successful
/// password-gated [`Keychain::load`].
pub struct Keychain {
    owner_uuid: Uuid,
    path: PathBuf,
    salt: [u8; SALT_LEN],
    /// Derived once at load time and held for subsequent `save` calls —
    /// re-deriving on every save would mean re-prompting for the password,
    /// which the `load`/`add`/`get`/`save` API shape doesn't do.
    derived_key: SymmetricKey,
    entries: HashMap<Uuid, SymmetricKey>,
}

impl Keychain {
    fn file_path(dir: &Path, owner_uuid: Uuid) -> PathBuf {
        dir.join(format!("{owner_uuid}.keychain"))
    }

    /// `load(owner_uuid, password)`. If the file is absent,
    /// a fresh salt is generated and an empty store is initialized. If
    /// present, the first 32 bytes are the salt, `K = KDF(password, salt)`,
    /// and the remainder is decrypted with AEAD under `K`. A decryption
    /// failure — wrong password, or corrupted file — is reported as
    /// `Ok(None)`, never as an error: callers see a boolean outcome, not
    /// corrupted state.
    pub async fn load(
        dir: &Path,
        owner_uuid: Uuid,
        password: &str,
    ) -> Result<Option<Self>, KeychainError> {
        let path = Self::file_path(dir, owner_uuid);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                if bytes.len() < SALT_LEN {
                    return Ok(None);
                }
                let mut salt = [0u8; SALT_LEN];
                salt.copy_from_slice(&bytes[..SALT_LEN]);
                let derived = derive(password, &salt);
                let Ok(plaintext) = crypto::aead_decrypt(&derived, &bytes[SALT_LEN..]) else {
                    return Ok(None);
                };
                let Ok(entries) = decode_entries(&plaintext) else {
                    return Ok(None);
                };
                Ok(Some(Self {
                    owner_uuid,
                    path,
                    salt,
                    derived_key: derived,
                    entries,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut salt = [0u8; SALT_LEN];
                salt.copy_from_slice(&crypto::random_bytes(SALT_LEN));
                let derived = derive(password, &salt);
                Ok(Some(Self {
                    owner_uuid,
                    path,
                    salt,
                    derived_key: derived,
                    entries: HashMap::new(),
                }))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `add(peer_uuid, key)`. Overwrites any existing entry for the same
    /// peer (a fresh key exchange supersedes the old one).
    pub fn add(&mut self, peer_uuid: Uuid, key: SymmetricKey) {
        self.entries.insert(peer_uuid, key);
    }

    /// `get(peer_uuid) -> key?`
    pub fn get(&self, peer_uuid: Uuid) -> Option<&SymmetricKey> {
        self.entries.get(&peer_uuid)
    }

    pub fn peers(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.entries.keys().copied()
    }

    /// `save(owner_uuid)` — re-encrypts and overwrites the
    /// on-disk file under the same salt/derived key established at load.
    pub async fn save(&self) -> Result<(), KeychainError> {
        let plaintext = encode_entries(&self.entries);
        let ciphertext = crypto::aead_encrypt(&self.derived_key, &plaintext)
            .map_err(|_| KeychainError::Malformed)?;
        let mut out = Vec::with_capacity(SALT_LEN + ciphertext.len());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&ciphertext);
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, out).await?;
        Ok(())
    }

    pub fn owner_uuid(&self) -> Uuid {
        self.owner_uuid
    }
}

fn derive(password: &str, salt: &[u8]) -> SymmetricKey {
    // Argon2id is deliberately expensive; a wrong password still produces
    // *a* key, just not the one that decrypts the file — failure surfaces
    // via AEAD tag mismatch in `load`, never via a separate code path.
    let bytes = crypto::derive_key_from_password(password, salt)
        .expect("argon2 kdf with fixed 32-byte output does not fail for valid salts");
    SymmetricKey::from_bytes(bytes)
}

fn encode_entries(entries: &HashMap<Uuid, SymmetricKey>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (peer_uuid, key) in entries {
        out.extend_from_slice(&(16u32).to_le_bytes());
        out.extend_from_slice(peer_uuid.as_bytes());
        out.extend_from_slice(&(SYMMETRIC_KEY_LEN as u32).to_le_bytes());
        out.extend_from_slice(key.as_bytes());
    }
    out
}

fn decode_entries(buf: &[u8]) -> Result<HashMap<Uuid, SymmetricKey>, KeychainError> {
    if buf.len() < 4 {
        return Err(KeychainError::Malformed);
    }
    let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let mut cursor = &buf[4..];
    let mut out = HashMap::with_capacity(count);
    for _ in 0..count {
        if cursor.len() < 4 {
            return Err(KeychainError::Malformed);
        }
        let ulen = u32::from_le_bytes(cursor[0..4].try_into().unwrap()) as usize;
        cursor = &cursor[4..];
        if cursor.len() < ulen + 4 {
            return Err(KeychainError::Malformed);
        }
        let peer_uuid = Uuid::from_slice(&cursor[..ulen]).map_err(|_| KeychainError::Malformed)?;
        cursor = &cursor[ulen..];
        let klen = u32::from_le_bytes(cursor[0..4].try_into().unwrap()) as usize;
        cursor = &cursor[4..];
        if cursor.len() < klen || klen != SYMMETRIC_KEY_LEN {
            return Err(KeychainError::Malformed);
        }
        let mut key_bytes = [0u8; SYMMETRIC_KEY_LEN];
        key_bytes.copy_from_slice(&cursor[..klen]);
        cursor = &cursor[klen..];
        out.insert(peer_uuid, SymmetricKey::from_bytes(key_bytes));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let owner = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let key = SymmetricKey::generate();

        {
            let mut kc = Keychain::load(dir.path(), owner, "hunter2").await.unwrap().unwrap();
            kc.add(peer, key.clone());
            kc.save().await.unwrap();
        }

        let kc = Keychain::load(dir.path(), owner, "hunter2").await.unwrap().unwrap();
        assert_eq!(kc.get(peer).unwrap().as_bytes(), key.as_bytes());
    }

    #[tokio::test]
    async fn wrong_password_fails_and_yields_no_store() {
        let dir = tempfile::tempdir().unwrap();
        let owner = Uuid::new_v4();
        {
            let mut kc = Keychain::load(dir.path(), owner, "correct-horse").await.unwrap().unwrap();
            kc.add(Uuid::new_v4(), SymmetricKey::generate());
            kc.save().await.unwrap();
        }
        let wrong = Keychain::load(dir.path(), owner, "wrong-password").await.unwrap();
        assert!(wrong.is_none());
    }

    #[tokio::test]
    async fn absent_file_initializes_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let kc = Keychain::load(dir.path(), Uuid::new_v4(), "pw").await.unwrap().unwrap();
        assert_eq!(kc.peers().count(), 0);
    }
}
