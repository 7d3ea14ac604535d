//! Curve25519 key pairs and prekeys.

use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto::xed25519;

/// DJB key type marker prefixed to public keys on the wire.
pub const KEY_TYPE_DJB: u8 = 0x05;

/// An X25519 key pair.
#[derive(Clone)]
pub struct KeyPair {
    pub public: [u8; 32],
    pub private: [u8; 32],
}

impl KeyPair {
    /// Generates a fresh random key pair.
    pub fn generate() -> Self {
        let mut private = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut private);
        private[0] &= 248;
        private[31] &= 127;
        private[31] |= 64;
        Self::from_private(private)
    }

    /// Rebuilds the pair from a stored private key.
    pub fn from_private(private: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private);
        let public = PublicKey::from(&secret);
        Self {
            public: *public.as_bytes(),
            private,
        }
    }

    /// X25519 shared secret with a remote public key.
    pub fn dh(&self, their_public: &[u8; 32]) -> [u8; 32] {
        let secret = StaticSecret::from(self.private);
        let shared = secret.diffie_hellman(&PublicKey::from(*their_public));
        *shared.as_bytes()
    }

    /// Public key with the DJB type byte prepended, as carried in
    /// protobuf fields.
    pub fn public_with_prefix(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        out[0] = KEY_TYPE_DJB;
        out[1..].copy_from_slice(&self.public);
        out
    }

    /// Signs a message with this key using the Curve25519 point signature
    /// scheme.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let mut random = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut random);
        xed25519::sign(&self.private, message, &random)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public))
            .field("private", &"[redacted]")
            .finish()
    }
}

/// Strips the DJB type byte from a 33-byte wire key.
pub fn strip_key_prefix(key: &[u8]) -> Option<[u8; 32]> {
    match key.len() {
        33 if key[0] == KEY_TYPE_DJB => key[1..].try_into().ok(),
        32 => key.try_into().ok(),
        _ => None,
    }
}

/// A one-time prekey.
#[derive(Debug, Clone)]
pub struct PreKey {
    pub id: u32,
    pub key_pair: KeyPair,
}

impl PreKey {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            key_pair: KeyPair::generate(),
        }
    }
}

/// A signed prekey: key pair plus the identity signature over its
/// prefixed public key.
#[derive(Debug, Clone)]
pub struct SignedPreKey {
    pub id: u32,
    pub key_pair: KeyPair,
    pub signature: [u8; 64],
}

impl SignedPreKey {
    /// Generates and signs a prekey under the given identity key.
    pub fn generate(id: u32, identity: &KeyPair) -> Self {
        let key_pair = KeyPair::generate();
        let signature = identity.sign(&key_pair.public_with_prefix());
        Self {
            id,
            key_pair,
            signature,
        }
    }

    /// Verifies a remote signed prekey against the remote identity key.
    pub fn verify(
        identity_public: &[u8; 32],
        prekey_public: &[u8; 32],
        signature: &[u8; 64],
    ) -> bool {
        let mut prefixed = [0u8; 33];
        prefixed[0] = KEY_TYPE_DJB;
        prefixed[1..].copy_from_slice(prekey_public);
        xed25519::verify(identity_public, &prefixed, signature)
    }
}
