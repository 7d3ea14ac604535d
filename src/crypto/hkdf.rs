//! HKDF-SHA256 and the HMAC helpers used across the protocol.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// HMAC-SHA256 over `data` with `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// HMAC-SHA256 over several concatenated parts.
pub fn hmac_sha256_parts(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// HMAC-SHA512 over several concatenated parts.
pub fn hmac_sha512_parts(key: &[u8], parts: &[&[u8]]) -> [u8; 64] {
    let mut mac = HmacSha512::new_from_slice(key).expect("hmac accepts any key length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// HKDF-SHA256.
pub struct Hkdf {
    prk: [u8; 32],
}

impl Hkdf {
    /// HKDF-Extract. A missing salt means 32 zero bytes.
    pub fn extract(salt: Option<&[u8]>, ikm: &[u8]) -> Self {
        let zeros = [0u8; 32];
        let prk = hmac_sha256(salt.unwrap_or(&zeros), ikm);
        Self { prk }
    }

    /// HKDF-Expand to `length` bytes.
    pub fn expand(&self, info: &[u8], length: usize) -> Vec<u8> {
        let mut output = Vec::with_capacity(length);
        let mut block: Vec<u8> = Vec::new();
        let mut counter = 1u8;
        while output.len() < length {
            let mut mac =
                HmacSha256::new_from_slice(&self.prk).expect("hmac accepts any key length");
            mac.update(&block);
            mac.update(info);
            mac.update(&[counter]);
            block = mac.finalize().into_bytes().to_vec();
            let take = block.len().min(length - output.len());
            output.extend_from_slice(&block[..take]);
            counter += 1;
        }
        output
    }

    /// Extract-then-expand in one call.
    pub fn derive(salt: Option<&[u8]>, ikm: &[u8], info: &[u8], length: usize) -> Vec<u8> {
        Self::extract(salt, ikm).expand(info, length)
    }
}

/// Splits a 64-byte HKDF output into two 32-byte keys.
pub fn derive_key_pair(salt: &[u8], ikm: &[u8], info: &[u8]) -> ([u8; 32], [u8; 32]) {
    let out = Hkdf::derive(Some(salt), ikm, info, 64);
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&out[..32]);
    second.copy_from_slice(&out[32..]);
    (first, second)
}
