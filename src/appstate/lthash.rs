//! LTHash: a 128-byte associative, invertible hash.
//!
//! State is 64 little-endian u16 lanes. Each mutation input is first
//! HKDF-expanded to 128 bytes and then added or subtracted lane-wise with
//! wrapping arithmetic, so mutation order never affects the digest and
//! `add(sub(h, m), m) == h`.

use crate::crypto::Hkdf;

pub const HASH_LEN: usize = 128;

const EXPAND_INFO: &[u8] = b"WhatsApp Patch Integrity";

/// Expands a mutation input (`index_mac ‖ value_mac`) to the lane width.
pub fn expand(input: &[u8]) -> [u8; HASH_LEN] {
    let okm = Hkdf::derive(None, input, EXPAND_INFO, HASH_LEN);
    okm.try_into().expect("hkdf output length")
}

/// Adds an expanded mutation into the state.
pub fn add(hash: &mut [u8; HASH_LEN], input: &[u8]) {
    combine(hash, &expand(input), u16::wrapping_add);
}

/// Subtracts an expanded mutation out of the state.
pub fn sub(hash: &mut [u8; HASH_LEN], input: &[u8]) {
    combine(hash, &expand(input), u16::wrapping_sub);
}

fn combine(hash: &mut [u8; HASH_LEN], expanded: &[u8; HASH_LEN], op: fn(u16, u16) -> u16) {
    for i in (0..HASH_LEN).step_by(2) {
        let lane = u16::from_le_bytes([hash[i], hash[i + 1]]);
        let delta = u16::from_le_bytes([expanded[i], expanded[i + 1]]);
        let out = op(lane, delta);
        let bytes = out.to_le_bytes();
        hash[i] = bytes[0];
        hash[i + 1] = bytes[1];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_input(seed: u8) -> Vec<u8> {
        (0..64u8).map(|i| i.wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn add_then_sub_is_identity() {
        let mut hash = [0u8; HASH_LEN];
        let m = random_input(1);
        add(&mut hash, &m);
        sub(&mut hash, &m);
        assert_eq!(hash, [0u8; HASH_LEN]);
    }

    #[test]
    fn sub_then_add_restores() {
        let mut hash = [7u8; HASH_LEN];
        let before = hash;
        let m = random_input(2);
        sub(&mut hash, &m);
        add(&mut hash, &m);
        assert_eq!(hash, before);
    }

    #[test]
    fn addition_commutes() {
        let a = random_input(3);
        let b = random_input(4);

        let mut first = [0u8; HASH_LEN];
        add(&mut first, &a);
        add(&mut first, &b);

        let mut second = [0u8; HASH_LEN];
        add(&mut second, &b);
        add(&mut second, &a);

        assert_eq!(first, second);
    }

    #[test]
    fn distinct_inputs_distinct_digests() {
        let mut a = [0u8; HASH_LEN];
        let mut b = [0u8; HASH_LEN];
        add(&mut a, &random_input(5));
        add(&mut b, &random_input(6));
        assert_ne!(a, b);
    }

    #[test]
    fn odd_length_inputs_expand() {
        // Expansion normalizes every input to 128 bytes, so odd-length
        // mutation values are well defined.
        let mut hash = [0u8; HASH_LEN];
        let m = vec![0xAB; 33];
        add(&mut hash, &m);
        sub(&mut hash, &m);
        assert_eq!(hash, [0u8; HASH_LEN]);
    }
}
