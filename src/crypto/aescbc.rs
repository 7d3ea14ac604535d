//! AES-256-CBC with PKCS#7 padding.
//!
//! Used for app-state mutation values (IV prefixed to the ciphertext) and
//! for Signal message bodies (explicit IV from the message keys).

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

use crate::error::{Error, Result};

type Encryptor = cbc::Encryptor<aes::Aes256>;
type Decryptor = cbc::Decryptor<aes::Aes256>;

/// Encrypts with an explicit IV; returns just the ciphertext.
pub fn encrypt_with_iv(key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    Encryptor::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Encrypts under a random IV and prepends it to the ciphertext.
pub fn encrypt_and_prefix(key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);
    let mut out = iv.to_vec();
    out.extend_from_slice(&encrypt_with_iv(key, &iv, plaintext));
    out
}

/// Decrypts with an explicit IV.
pub fn decrypt_with_iv(key: &[u8; 32], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>> {
    Decryptor::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::Decryption("aes-cbc unpad failed".into()))
}

/// Decrypts a blob produced by [`encrypt_and_prefix`].
pub fn decrypt_prefixed(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < 16 || (blob.len() - 16) % 16 != 0 {
        return Err(Error::Decryption("aes-cbc blob too short".into()));
    }
    let iv: [u8; 16] = blob[..16].try_into().expect("slice length");
    decrypt_with_iv(key, &iv, &blob[16..])
}
