//! Sender-key groups.
//!
//! Each `(group, sender device)` pair owns a symmetric chain plus a
//! signing key. The chain ratchets by `HMAC(seed, 0x02)`; a message key is
//! `HMAC(seed, 0x01)` with the IV drawn from the first half of the next
//! seed. Distribution messages install the remote record; group payloads
//! are signed with the record's Curve25519 signing key.

use std::collections::VecDeque;
use std::fmt;

use prost::Message as _;
use rand::RngCore;

use crate::crypto::{aescbc, hmac_sha256, strip_key_prefix, xed25519, KeyPair};
use crate::error::{Error, Result};
use crate::proto::signal::{
    split_versioned, SenderKeyDistributionMessage, SenderKeyMessage, SIGNATURE_LENGTH,
    VERSION_BYTE,
};
use crate::signal::address::SignalAddress;

/// Skipped sender-key message keys retained per record.
pub const MAX_SKIPPED_SENDER_KEYS: usize = 2000;

const MESSAGE_KEY_SEED: [u8; 1] = [0x01];
const CHAIN_KEY_SEED: [u8; 1] = [0x02];

/// Store key for a sender-key record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderKeyName {
    pub group_id: String,
    pub sender: SignalAddress,
}

impl SenderKeyName {
    pub fn new(group_id: impl Into<String>, sender: SignalAddress) -> Self {
        Self {
            group_id: group_id.into(),
            sender,
        }
    }
}

impl fmt::Display for SenderKeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.group_id, self.sender)
    }
}

/// Symmetric sender chain position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderChainKey {
    pub iteration: u32,
    pub seed: [u8; 32],
}

impl SenderChainKey {
    pub fn next(&self) -> SenderChainKey {
        SenderChainKey {
            iteration: self.iteration + 1,
            seed: hmac_sha256(&self.seed, &CHAIN_KEY_SEED),
        }
    }

    /// Cipher key and IV for the current iteration.
    pub fn message_key(&self) -> SenderMessageKey {
        let cipher_key = hmac_sha256(&self.seed, &MESSAGE_KEY_SEED);
        let next = hmac_sha256(&self.seed, &CHAIN_KEY_SEED);
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&next[..16]);
        SenderMessageKey {
            iteration: self.iteration,
            cipher_key,
            iv,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderMessageKey {
    pub iteration: u32,
    pub cipher_key: [u8; 32],
    pub iv: [u8; 16],
}

/// Per-(group, sender) record.
#[derive(Debug, Clone)]
pub struct SenderKeyRecord {
    pub id: u32,
    pub chain: SenderChainKey,
    pub signing_public: [u8; 32],
    /// Present only for our own outbound record.
    pub signing_private: Option<[u8; 32]>,
    skipped: VecDeque<SenderMessageKey>,
}

impl SenderKeyRecord {
    /// Fresh outbound record with random id, seed and signing key.
    pub fn new_outbound() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let signing = KeyPair::generate();
        Self {
            id: rand::thread_rng().next_u32(),
            chain: SenderChainKey { iteration: 0, seed },
            signing_public: signing.public,
            signing_private: Some(signing.private),
            skipped: VecDeque::new(),
        }
    }

    /// Serializes the distribution message advertising this record at its
    /// current iteration.
    pub fn distribution_message(&self) -> Vec<u8> {
        let proto = SenderKeyDistributionMessage {
            id: Some(self.id),
            iteration: Some(self.chain.iteration),
            chain_key: Some(self.chain.seed.to_vec()),
            signing_key: Some({
                let mut prefixed = vec![crate::crypto::KEY_TYPE_DJB];
                prefixed.extend_from_slice(&self.signing_public);
                prefixed
            }),
        };
        let mut out = vec![VERSION_BYTE];
        out.extend_from_slice(&proto.encode_to_vec());
        out
    }

    /// Installs an inbound record from a serialized distribution message.
    pub fn from_distribution(serialized: &[u8]) -> Result<Self> {
        let (&first, rest) = serialized
            .split_first()
            .ok_or_else(|| Error::Decryption("empty sender key distribution".into()))?;
        if first >> 4 != 3 {
            return Err(Error::Decryption(format!(
                "unsupported distribution version {}",
                first >> 4
            )));
        }
        let proto = SenderKeyDistributionMessage::decode(rest)
            .map_err(|e| Error::Decryption(format!("bad distribution message: {e}")))?;
        let seed: [u8; 32] = proto
            .chain_key
            .as_deref()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::Decryption("distribution missing chain key".into()))?;
        let signing_public = proto
            .signing_key
            .as_deref()
            .and_then(strip_key_prefix)
            .ok_or_else(|| Error::Decryption("distribution missing signing key".into()))?;
        Ok(Self {
            id: proto
                .id
                .ok_or_else(|| Error::Decryption("distribution missing id".into()))?,
            chain: SenderChainKey {
                iteration: proto.iteration.unwrap_or(0),
                seed,
            },
            signing_public,
            signing_private: None,
            skipped: VecDeque::new(),
        })
    }

    /// Encrypts a group payload, advancing the chain.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let private = self
            .signing_private
            .ok_or_else(|| Error::Decryption("sender key record is receive-only".into()))?;
        let key = self.chain.message_key();
        let ciphertext = aescbc::encrypt_with_iv(&key.cipher_key, &key.iv, plaintext);

        let proto = SenderKeyMessage {
            id: Some(self.id),
            iteration: Some(key.iteration),
            ciphertext: Some(ciphertext),
        };
        let mut out = vec![VERSION_BYTE];
        out.extend_from_slice(&proto.encode_to_vec());
        let mut random = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut random);
        let signature = xed25519::sign(&private, &out, &random);
        out.extend_from_slice(&signature);

        self.chain = self.chain.next();
        Ok(out)
    }

    /// Decrypts an `skmsg` payload, fast-forwarding the chain as needed
    /// and consulting the bounded skipped-key store for old iterations.
    pub fn decrypt(&mut self, serialized: &[u8]) -> Result<Vec<u8>> {
        let (body, signature) = split_versioned(serialized, SIGNATURE_LENGTH)
            .ok_or_else(|| Error::Decryption("truncated sender key message".into()))?;
        let signed_part = &serialized[..serialized.len() - SIGNATURE_LENGTH];
        let signature: &[u8; 64] = signature.try_into().expect("split length");
        if !xed25519::verify(&self.signing_public, signed_part, signature) {
            return Err(Error::Decryption("sender key signature invalid".into()));
        }

        let proto = SenderKeyMessage::decode(body)
            .map_err(|e| Error::Decryption(format!("bad sender key message: {e}")))?;
        if proto.id != Some(self.id) {
            return Err(Error::Decryption("sender key id mismatch".into()));
        }
        let iteration = proto
            .iteration
            .ok_or_else(|| Error::Decryption("missing iteration".into()))?;
        let ciphertext = proto
            .ciphertext
            .as_deref()
            .ok_or_else(|| Error::Decryption("missing ciphertext".into()))?;

        let key = self.message_key_for(iteration)?;
        aescbc::decrypt_with_iv(&key.cipher_key, &key.iv, ciphertext)
    }

    fn message_key_for(&mut self, iteration: u32) -> Result<SenderMessageKey> {
        if iteration < self.chain.iteration {
            let pos = self.skipped.iter().position(|k| k.iteration == iteration);
            return match pos {
                Some(pos) => Ok(self.skipped.remove(pos).expect("position valid")),
                None => Err(Error::Decryption(format!(
                    "duplicate sender key iteration {iteration}"
                ))),
            };
        }
        while self.chain.iteration < iteration {
            if self.skipped.len() >= MAX_SKIPPED_SENDER_KEYS {
                self.skipped.pop_front();
            }
            self.skipped.push_back(self.chain.message_key());
            self.chain = self.chain.next();
        }
        let key = self.chain.message_key();
        self.chain = self.chain.next();
        Ok(key)
    }

    pub fn skipped_len(&self) -> usize {
        self.skipped.len()
    }
}
