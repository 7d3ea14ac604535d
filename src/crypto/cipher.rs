//! AES-256-GCM with counter nonces.
//!
//! Each direction of a Noise session owns one cipher; the 64-bit counter
//! fills the low eight bytes of the 96-bit nonce and must never repeat.
//! Counter exhaustion terminates the session.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::error::{Error, Result};

pub struct GcmCipher {
    cipher: Aes256Gcm,
    counter: u64,
}

impl GcmCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new_from_slice(key).expect("32-byte key"),
            counter: 0,
        }
    }

    /// Encrypts under the next counter nonce.
    pub fn encrypt_next(&mut self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = self.take_nonce()?;
        self.cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
            .map_err(|_| Error::Decryption("aes-gcm encrypt failed".into()))
    }

    /// Decrypts under the next counter nonce.
    pub fn decrypt_next(&mut self, aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce = self.take_nonce()?;
        self.cipher
            .decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| Error::Decryption("aes-gcm decrypt failed".into()))
    }

    /// One-shot encrypt with an explicit counter, without touching state.
    pub fn encrypt_at(&self, counter: u64, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = nonce_for(counter);
        self.cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
            .map_err(|_| Error::Decryption("aes-gcm encrypt failed".into()))
    }

    /// One-shot decrypt with an explicit counter, without touching state.
    pub fn decrypt_at(&self, counter: u64, aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce = nonce_for(counter);
        self.cipher
            .decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| Error::Decryption("aes-gcm decrypt failed".into()))
    }

    fn take_nonce(&mut self) -> Result<[u8; 12]> {
        if self.counter == u64::MAX {
            return Err(Error::Transport("gcm nonce counter exhausted".into()));
        }
        let nonce = nonce_for(self.counter);
        self.counter += 1;
        Ok(nonce)
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }
}

fn nonce_for(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}
