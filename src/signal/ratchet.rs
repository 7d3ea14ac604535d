//! Double-ratchet key schedule.
//!
//! Root keys step on each DH ratchet, chain keys step per message, and
//! message keys expand into the cipher/MAC/IV triple that protects one
//! message.

use crate::crypto::{hmac_sha256, Hkdf, KeyPair};
use crate::error::{Error, Result};

const KDF_ROOT_INFO: &[u8] = b"WhisperRatchet";
const KDF_TEXT_INFO: &[u8] = b"WhisperText";
const KDF_MESSAGE_INFO: &[u8] = b"WhisperMessageKeys";

const CHAIN_KEY_MESSAGE_SEED: [u8; 1] = [0x01];
const CHAIN_KEY_NEXT_SEED: [u8; 1] = [0x02];

/// Discontinuity prefix mixed ahead of the X3DH shared secrets.
const DISCONTINUITY: [u8; 32] = [0xFF; 32];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootKey(pub [u8; 32]);

impl RootKey {
    /// One DH ratchet step: returns the next root key and the chain
    /// seeded by `DH(our_ratchet, their_ratchet)`.
    pub fn create_chain(&self, their_ratchet: &[u8; 32], our_ratchet: &KeyPair) -> (RootKey, ChainKey) {
        let shared = our_ratchet.dh(their_ratchet);
        let out = Hkdf::derive(Some(&self.0), &shared, KDF_ROOT_INFO, 64);
        let mut root = [0u8; 32];
        let mut chain = [0u8; 32];
        root.copy_from_slice(&out[..32]);
        chain.copy_from_slice(&out[32..]);
        (RootKey(root), ChainKey::new(0, chain))
    }
}

/// Per-direction symmetric chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainKey {
    index: u32,
    key: [u8; 32],
}

impl ChainKey {
    pub fn new(index: u32, key: [u8; 32]) -> Self {
        Self { index, key }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn next(&self) -> ChainKey {
        ChainKey::new(self.index + 1, hmac_sha256(&self.key, &CHAIN_KEY_NEXT_SEED))
    }

    /// Message keys for the current index.
    pub fn message_keys(&self) -> MessageKeys {
        let input = hmac_sha256(&self.key, &CHAIN_KEY_MESSAGE_SEED);
        let okm = Hkdf::derive(None, &input, KDF_MESSAGE_INFO, 80);
        let mut cipher_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        let mut iv = [0u8; 16];
        cipher_key.copy_from_slice(&okm[..32]);
        mac_key.copy_from_slice(&okm[32..64]);
        iv.copy_from_slice(&okm[64..]);
        MessageKeys {
            cipher_key,
            mac_key,
            iv,
            counter: self.index,
        }
    }
}

/// Everything needed to seal or open one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageKeys {
    pub cipher_key: [u8; 32],
    pub mac_key: [u8; 32],
    pub iv: [u8; 16],
    pub counter: u32,
}

/// Initial root/chain pair from concatenated X3DH DH outputs.
pub fn derive_initial_keys(dh_outputs: &[&[u8; 32]]) -> Result<(RootKey, ChainKey)> {
    if dh_outputs.len() < 3 {
        return Err(Error::Protocol("x3dh needs at least three dh outputs".into()));
    }
    let mut secrets = Vec::with_capacity(32 * (1 + dh_outputs.len()));
    secrets.extend_from_slice(&DISCONTINUITY);
    for dh in dh_outputs {
        secrets.extend_from_slice(*dh);
    }
    let okm = Hkdf::derive(None, &secrets, KDF_TEXT_INFO, 64);
    let mut root = [0u8; 32];
    let mut chain = [0u8; 32];
    root.copy_from_slice(&okm[..32]);
    chain.copy_from_slice(&okm[32..]);
    Ok((RootKey(root), ChainKey::new(0, chain)))
}
