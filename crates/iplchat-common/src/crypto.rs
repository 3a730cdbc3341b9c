//! Cryptographic primitives (C1).
//!
//! The wire protocol and broker only ever touch these abstractly-named
//! operations: symmetric AEAD, asymmetric encrypt/decrypt/sign/verify,
//! a password KDF, a hash, and fresh random bytes. This module commits to
//! concrete primitives for each:
//!
//! - Symmetric AEAD: `ChaCha20Poly1305`, 256-bit key, 96-bit random nonce
//!   prepended to the ciphertext on the wire.
//! - Asymmetric: a bundled [`AsymmetricKeyPair`] — `X25519` for
//!   encrypt/decrypt (an ECDH + HKDF-SHA256 sealed box, libsodium-style) and
//!   `Ed25519` for sign/verify. Both halves travel together as one 64-byte
//!   public key on the wire (32 bytes X25519 || 32 bytes Ed25519).
//! - Password KDF: Argon2id, expanded to exactly 32 bytes.
//! - Hash: SHA-256.
//! - Random bytes: `OsRng`.

use argon2::Argon2;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key as AeadKey, Nonce as AeadNonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

/// Byte length of a symmetric session/peer key.
pub const SYMMETRIC_KEY_LEN: usize = 32;
/// Byte length of one half (X25519 or Ed25519) of a public key.
pub const HALF_PUBLIC_KEY_LEN: usize = 32;
/// Byte length of the bundled public key exchanged on the wire.
pub const PUBLIC_KEY_LEN: usize = HALF_PUBLIC_KEY_LEN * 2;
/// Byte length of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

const AEAD_NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("decryption failed")]
    DecryptFailed,
    #[error("signature verification failed")]
    VerifyFailed,
    #[error("malformed key or ciphertext: {0}")]
    Malformed(&'static str),
}

// ============================================================
// Random bytes
// ============================================================

/// Fresh random bytes of the requested length.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    buf
}

// ============================================================
// Hash
// ============================================================

/// SHA-256 digest of `data`.
pub fn hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

// ============================================================
// Password KDF
// ============================================================

/// Derive a 256-bit key from `(password, salt)` using Argon2id.
pub fn derive_key_from_password(password: &str, salt: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut out = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut out)
        .map_err(|_| CryptoError::Malformed("argon2 kdf failed"))?;
    Ok(out)
}

// ============================================================
// Symmetric AEAD
// ============================================================

/// A 256-bit symmetric key (session key or peer key K_AB).
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SymmetricKey(pub [u8; SYMMETRIC_KEY_LEN]);

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SYMMETRIC_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_LEN] {
        &self.0
    }
}

/// Encrypt `plaintext` under `key`. Returns `nonce || ciphertext`.
pub fn aead_encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(AeadKey::from_slice(&key.0));
    let mut nonce_bytes = [0u8; AEAD_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = AeadNonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Malformed("aead encrypt failed"))?;
    let mut out = Vec::with_capacity(AEAD_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a `nonce || ciphertext` blob produced by [`aead_encrypt`].
pub fn aead_decrypt(key: &SymmetricKey, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < AEAD_NONCE_LEN {
        return Err(CryptoError::Malformed("ciphertext shorter than nonce"));
    }
    let (nonce_bytes, ciphertext) = blob.split_at(AEAD_NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(AeadKey::from_slice(&key.0));
    let nonce = AeadNonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}

// ============================================================
// Asymmetric key pair (X25519 encrypt/decrypt + Ed25519 sign/verify)
// ============================================================

/// The public half of an [`AsymmetricKeyPair`]: 32 bytes X25519 || 32 bytes
/// Ed25519, as exchanged on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AsymmetricPublicKey {
    pub x25519: [u8; HALF_PUBLIC_KEY_LEN],
    pub ed25519: [u8; HALF_PUBLIC_KEY_LEN],
}

impl AsymmetricPublicKey {
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        let mut out = [0u8; PUBLIC_KEY_LEN];
        out[..HALF_PUBLIC_KEY_LEN].copy_from_slice(&self.x25519);
        out[HALF_PUBLIC_KEY_LEN..].copy_from_slice(&self.ed25519);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(CryptoError::Malformed("public key wrong length"));
        }
        let mut x25519 = [0u8; HALF_PUBLIC_KEY_LEN];
        let mut ed25519 = [0u8; HALF_PUBLIC_KEY_LEN];
        x25519.copy_from_slice(&bytes[..HALF_PUBLIC_KEY_LEN]);
        ed25519.copy_from_slice(&bytes[HALF_PUBLIC_KEY_LEN..]);
        Ok(Self { x25519, ed25519 })
    }
}

/// A full asymmetric identity: an X25519 keypair for encrypt/decrypt and an
/// Ed25519 keypair for sign/verify. Generated once per client and held for
/// the lifetime of the process (or persisted by the out-of-scope client
/// front-end); the broker only ever sees the public half.
pub struct AsymmetricKeyPair {
    x25519_secret: StaticSecret,
    ed25519_signing: SigningKey,
}

impl AsymmetricKeyPair {
    pub fn generate() -> Self {
        Self {
            x25519_secret: StaticSecret::random_from_rng(OsRng),
            ed25519_signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn public_key(&self) -> AsymmetricPublicKey {
        AsymmetricPublicKey {
            x25519: X25519Public::from(&self.x25519_secret).to_bytes(),
            ed25519: self.ed25519_signing.verifying_key().to_bytes(),
        }
    }

    /// Decrypt a sealed box produced by [`asym_encrypt`] for this keypair's
    /// public key.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < HALF_PUBLIC_KEY_LEN {
            return Err(CryptoError::Malformed("sealed box shorter than ephemeral key"));
        }
        let (eph_pub_bytes, rest) = sealed.split_at(HALF_PUBLIC_KEY_LEN);
        let mut eph_pub_arr = [0u8; HALF_PUBLIC_KEY_LEN];
        eph_pub_arr.copy_from_slice(eph_pub_bytes);
        let eph_pub = X25519Public::from(eph_pub_arr);
        let shared = self.x25519_secret.diffie_hellman(&eph_pub);
        let own_pub = X25519Public::from(&self.x25519_secret).to_bytes();
        let key = derive_seal_key(shared.as_bytes(), &eph_pub_arr, &own_pub);
        aead_decrypt(&key, rest)
    }

    /// Sign the SHA-256 digest of `data`.
    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_LEN] {
        let digest = hash(data);
        self.ed25519_signing.sign(&digest).to_bytes()
    }
}

/// Encrypt `plaintext` to `recipient`'s public key (ephemeral X25519 + HKDF
/// + ChaCha20-Poly1305 sealed box). Returns `ephemeral_pub || nonce || ciphertext`.
pub fn asym_encrypt(
    recipient: &AsymmetricPublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let eph_secret = EphemeralSecret::random_from_rng(OsRng);
    let eph_public = X25519Public::from(&eph_secret);
    let recipient_pub = X25519Public::from(recipient.x25519);
    let shared = eph_secret.diffie_hellman(&recipient_pub);
    let key = derive_seal_key(shared.as_bytes(), eph_public.as_bytes(), &recipient.x25519);

    let mut out = Vec::with_capacity(HALF_PUBLIC_KEY_LEN + AEAD_NONCE_LEN + plaintext.len() + 16);
    out.extend_from_slice(eph_public.as_bytes());
    out.extend_from_slice(&aead_encrypt(&key, plaintext)?);
    Ok(out)
}

/// Verify an Ed25519 signature over the SHA-256 digest of `data`.
pub fn verify_signature(
    signer: &AsymmetricPublicKey,
    data: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(CryptoError::Malformed("signature wrong length"));
    }
    let verifying_key = VerifyingKey::from_bytes(&signer.ed25519)
        .map_err(|_| CryptoError::Malformed("bad ed25519 public key"))?;
    let mut sig_bytes = [0u8; SIGNATURE_LEN];
    sig_bytes.copy_from_slice(signature);
    let sig = Signature::from_bytes(&sig_bytes);
    let digest = hash(data);
    verifying_key
        .verify(&digest, &sig)
        .map_err(|_| CryptoError::VerifyFailed)
}

/// HKDF-SHA256 the ECDH shared secret, binding in both public keys so the
/// derived key is unique to this (ephemeral, recipient) pair.
fn derive_seal_key(shared_secret: &[u8], eph_pub: &[u8], recipient_pub: &[u8]) -> SymmetricKey {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut info = Vec::with_capacity(eph_pub.len() + recipient_pub.len());
    info.extend_from_slice(eph_pub);
    info.extend_from_slice(recipient_pub);
    let mut out = [0u8; SYMMETRIC_KEY_LEN];
    hk.expand(&info, &mut out)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    SymmetricKey(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aead_round_trip() {
        let key = SymmetricKey::generate();
        let blob = aead_encrypt(&key, b"ping").unwrap();
        assert_eq!(aead_decrypt(&key, &blob).unwrap(), b"ping");
    }

    #[test]
    fn aead_decrypt_fails_with_wrong_key() {
        let key = SymmetricKey::generate();
        let other = SymmetricKey::generate();
        let blob = aead_encrypt(&key, b"ping").unwrap();
        assert!(aead_decrypt(&other, &blob).is_err());
    }

    #[test]
    fn asym_round_trip() {
        let recipient = AsymmetricKeyPair::generate();
        let sealed = asym_encrypt(&recipient.public_key(), b"peer-key-bytes").unwrap();
        let opened = recipient.decrypt(&sealed).unwrap();
        assert_eq!(opened, b"peer-key-bytes");
    }

    #[test]
    fn sign_verify_round_trip() {
        let signer = AsymmetricKeyPair::generate();
        let msg = b"ciphertext bytes";
        let sig = signer.sign(msg);
        verify_signature(&signer.public_key(), msg, &sig).unwrap();
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let signer = AsymmetricKeyPair::generate();
        let sig = signer.sign(b"original");
        assert!(verify_signature(&signer.public_key(), b"tampered", &sig).is_err());
    }

    #[test]
    fn password_kdf_is_deterministic_for_same_salt() {
        let salt = random_bytes(16);
        let k1 = derive_key_from_password("hunter2", &salt).unwrap();
        let k2 = derive_key_from_password("hunter2", &salt).unwrap();
        assert_eq!(k1, k2);
    }
}
