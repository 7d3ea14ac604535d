//! Curve25519 point signatures.
//!
//! Signs with an X25519 private key and verifies against the Montgomery
//! public key, converting to Edwards form with the sign bit carried in the
//! top bit of the final signature byte. Compatible with the scheme
//! libsignal uses for signed prekeys and sender keys.

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::{clamp_integer, Scalar};
use sha2::{Digest, Sha512};

const HASH_PREFIX: [u8; 32] = [
    0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF,
];

/// Signs `message` with an X25519 private key. `random` is mixed into the
/// nonce; fixing it makes the signature deterministic.
pub fn sign(private: &[u8; 32], message: &[u8], random: &[u8; 64]) -> [u8; 64] {
    let a = Scalar::from_bytes_mod_order(clamp_integer(*private));
    let ed_public = EdwardsPoint::mul_base(&a).compress();
    let sign_bit = ed_public.as_bytes()[31] & 0x80;

    let r = Scalar::from_hash(
        Sha512::new()
            .chain_update(HASH_PREFIX)
            .chain_update(a.as_bytes())
            .chain_update(message)
            .chain_update(random),
    );
    let big_r = EdwardsPoint::mul_base(&r).compress();

    let h = Scalar::from_hash(
        Sha512::new()
            .chain_update(big_r.as_bytes())
            .chain_update(ed_public.as_bytes())
            .chain_update(message),
    );
    let s = r + h * a;

    let mut signature = [0u8; 64];
    signature[..32].copy_from_slice(big_r.as_bytes());
    signature[32..].copy_from_slice(s.as_bytes());
    signature[63] |= sign_bit;
    signature
}

/// Verifies a signature against a Montgomery-form public key.
pub fn verify(public: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let sign_bit = (signature[63] & 0x80) >> 7;
    let Some(ed_public) = MontgomeryPoint(*public).to_edwards(sign_bit) else {
        return false;
    };

    let mut s_bytes: [u8; 32] = signature[32..].try_into().expect("slice length");
    s_bytes[31] &= 0x7F;
    let s: Option<Scalar> = Scalar::from_canonical_bytes(s_bytes).into();
    let Some(s) = s else {
        return false;
    };

    let r_bytes: [u8; 32] = signature[..32].try_into().expect("slice length");
    let h = Scalar::from_hash(
        Sha512::new()
            .chain_update(r_bytes)
            .chain_update(ed_public.compress().as_bytes())
            .chain_update(message),
    );

    let recomputed = EdwardsPoint::vartime_double_scalar_mul_basepoint(&-h, &ed_public, &s);
    recomputed.compress().as_bytes() == &r_bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn sign_verify_round_trip() {
        let kp = KeyPair::generate();
        let sig = sign(&kp.private, b"attack at dawn", &[7u8; 64]);
        assert!(verify(&kp.public, b"attack at dawn", &sig));
    }

    #[test]
    fn rejects_modified_message() {
        let kp = KeyPair::generate();
        let sig = sign(&kp.private, b"attack at dawn", &[7u8; 64]);
        assert!(!verify(&kp.public, b"attack at dusk", &sig));
    }

    #[test]
    fn rejects_wrong_key() {
        let kp = KeyPair::generate();
        let other = KeyPair::generate();
        let sig = sign(&kp.private, b"message", &[7u8; 64]);
        assert!(!verify(&other.public, b"message", &sig));
    }

    #[test]
    fn rejects_bitflip() {
        let kp = KeyPair::generate();
        let mut sig = sign(&kp.private, b"message", &[7u8; 64]);
        sig[10] ^= 0x01;
        assert!(!verify(&kp.public, b"message", &sig));
    }

    #[test]
    fn deterministic_under_fixed_nonce() {
        let kp = KeyPair::from_private([0x42; 32]);
        let a = sign(&kp.private, b"msg", &[1u8; 64]);
        let b = sign(&kp.private, b"msg", &[1u8; 64]);
        assert_eq!(a, b);
    }
}
