//! Noise XX handshake state.
//!
//! The protocol name, DH function, hash and AEAD are fixed by the service;
//! the primitives here are symmetric so both roles (and the mock server in
//! tests) drive the same state machine.

use sha2::{Digest, Sha256};

use crate::crypto::{derive_key_pair, GcmCipher};
use crate::error::{Error, Result};

/// Fixed protocol name, padded to exactly 32 bytes.
pub const PROTOCOL_NAME: &[u8; 32] = b"Noise_XX_25519_AESGCM_SHA256\x00\x00\x00\x00";

/// Connection prologue: magic, dialect version, dictionary version.
pub const WA_MAGIC: [u8; 4] = [b'W', b'A', 6, 3];

/// Progress of a handshake-owning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Uninit,
    AwaitServerHello,
    AwaitFinishAck,
    Transport,
    Closed,
}

/// Symmetric handshake state: running hash, chaining salt, current cipher
/// key and the per-key message counter.
pub struct HandshakeState {
    hash: [u8; 32],
    salt: [u8; 32],
    key: [u8; 32],
    counter: u64,
}

impl HandshakeState {
    /// Initializes from the protocol name and mixes in the prologue.
    pub fn new(prologue: &[u8]) -> Self {
        let hash: [u8; 32] = *PROTOCOL_NAME;
        let mut state = Self {
            hash,
            salt: hash,
            key: hash,
            counter: 0,
        };
        state.authenticate(prologue);
        state
    }

    /// Mixes public data into the running hash.
    pub fn authenticate(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.hash);
        hasher.update(data);
        self.hash = hasher.finalize().into();
    }

    /// Mixes a DH output into the chaining key, rotating the cipher key
    /// and resetting its counter.
    pub fn mix_key(&mut self, dh_output: &[u8; 32]) {
        let (salt, key) = derive_key_pair(&self.salt, dh_output, b"");
        self.salt = salt;
        self.key = key;
        self.counter = 0;
    }

    /// Encrypts with the running hash as associated data, then mixes the
    /// ciphertext into the hash.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = GcmCipher::new(&self.key);
        let ciphertext = cipher
            .encrypt_at(self.counter, &self.hash, plaintext)
            .map_err(|e| Error::Handshake(e.to_string()))?;
        self.counter += 1;
        self.authenticate(&ciphertext);
        Ok(ciphertext)
    }

    /// Inverse of [`HandshakeState::encrypt`].
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let cipher = GcmCipher::new(&self.key);
        let plaintext = cipher
            .decrypt_at(self.counter, &self.hash, ciphertext)
            .map_err(|e| Error::Handshake(e.to_string()))?;
        self.counter += 1;
        self.authenticate(ciphertext);
        Ok(plaintext)
    }

    /// Splits into `(write, read)` transport keys for the initiator.
    pub fn finish_initiator(self) -> ([u8; 32], [u8; 32]) {
        derive_key_pair(&self.salt, &[], b"")
    }

    /// Splits into `(write, read)` transport keys for the responder.
    pub fn finish_responder(self) -> ([u8; 32], [u8; 32]) {
        let (initiator_write, initiator_read) = derive_key_pair(&self.salt, &[], b"");
        (initiator_read, initiator_write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    /// Drives both roles through e/ee/s/es/s/se and checks the split keys
    /// line up.
    #[test]
    fn full_exchange_converges() {
        let client_static = KeyPair::generate();
        let client_eph = KeyPair::generate();
        let server_static = KeyPair::generate();
        let server_eph = KeyPair::generate();

        let mut client = HandshakeState::new(&WA_MAGIC);
        let mut server = HandshakeState::new(&WA_MAGIC);

        // -> e
        client.authenticate(&client_eph.public);
        server.authenticate(&client_eph.public);

        // <- e, ee, s, es
        server.authenticate(&server_eph.public);
        client.authenticate(&server_eph.public);
        server.mix_key(&server_eph.dh(&client_eph.public));
        client.mix_key(&client_eph.dh(&server_eph.public));
        let static_ct = server.encrypt(&server_static.public).unwrap();
        let server_static_pub: [u8; 32] = client
            .decrypt(&static_ct)
            .unwrap()
            .try_into()
            .unwrap();
        assert_eq!(server_static_pub, server_static.public);
        server.mix_key(&server_static.dh(&client_eph.public));
        client.mix_key(&client_eph.dh(&server_static_pub));
        let payload_ct = server.encrypt(b"certificate").unwrap();
        assert_eq!(client.decrypt(&payload_ct).unwrap(), b"certificate");

        // -> s, se
        let client_static_ct = client.encrypt(&client_static.public).unwrap();
        let client_static_pub: [u8; 32] = server
            .decrypt(&client_static_ct)
            .unwrap()
            .try_into()
            .unwrap();
        client.mix_key(&client_static.dh(&server_eph.public));
        server.mix_key(&server_eph.dh(&client_static_pub));
        let user_ct = client.encrypt(b"registration bundle").unwrap();
        assert_eq!(server.decrypt(&user_ct).unwrap(), b"registration bundle");

        let (c_write, c_read) = client.finish_initiator();
        let (s_write, s_read) = server.finish_responder();
        assert_eq!(c_write, s_read);
        assert_eq!(c_read, s_write);
        assert_ne!(c_write, c_read);
    }

    /// With fixed key material the whole transcript is reproducible
    /// byte for byte, which is what golden-vector tests rely on.
    #[test]
    fn transcript_is_deterministic_for_fixed_keys() {
        fn run() -> (Vec<u8>, Vec<u8>, [u8; 32], [u8; 32]) {
            let client_static = KeyPair::from_private([0x11; 32]);
            let client_eph = KeyPair::from_private([0x22; 32]);
            let server_static = KeyPair::from_private([0x33; 32]);
            let server_eph = KeyPair::from_private([0x44; 32]);

            let mut client = HandshakeState::new(&WA_MAGIC);
            client.authenticate(&client_eph.public);
            client.authenticate(&server_eph.public);
            client.mix_key(&client_eph.dh(&server_eph.public));

            let mut server = HandshakeState::new(&WA_MAGIC);
            server.authenticate(&client_eph.public);
            server.authenticate(&server_eph.public);
            server.mix_key(&server_eph.dh(&client_eph.public));
            let static_ct = server.encrypt(&server_static.public).unwrap();
            client.decrypt(&static_ct).unwrap();
            server.mix_key(&server_static.dh(&client_eph.public));
            client.mix_key(&client_eph.dh(&server_static.public));
            let payload_ct = server.encrypt(b"cert").unwrap();
            client.decrypt(&payload_ct).unwrap();

            let own_static_ct = client.encrypt(&client_static.public).unwrap();
            client.mix_key(&client_static.dh(&server_eph.public));
            let user_ct = client.encrypt(b"identity payload").unwrap();
            let (write, read) = client.finish_initiator();
            (own_static_ct, user_ct, write, read)
        }

        assert_eq!(run(), run());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let eph_a = KeyPair::generate();
        let eph_b = KeyPair::generate();
        let mut a = HandshakeState::new(&WA_MAGIC);
        let mut b = HandshakeState::new(&WA_MAGIC);
        a.mix_key(&eph_a.dh(&eph_b.public));
        b.mix_key(&eph_b.dh(&eph_a.public));
        let mut ct = a.encrypt(b"data").unwrap();
        ct[0] ^= 1;
        assert!(b.decrypt(&ct).is_err());
    }
}
