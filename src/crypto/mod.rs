//! Cryptographic primitives: X25519 key pairs, Curve25519 signatures,
//! HKDF, AES-GCM counter ciphers and AES-CBC.

pub mod aescbc;
mod cipher;
mod hkdf;
mod keypair;
pub mod xed25519;

pub use cipher::GcmCipher;
pub use hkdf::{derive_key_pair, hmac_sha256, hmac_sha256_parts, hmac_sha512_parts, Hkdf};
pub use keypair::{strip_key_prefix, KeyPair, PreKey, SignedPreKey, KEY_TYPE_DJB};
