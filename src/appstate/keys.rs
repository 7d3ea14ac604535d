//! Key material for app-state mutations.
//!
//! Each `AppStateSyncKey` (distributed by the primary device as a peer
//! message) expands into five derived keys.

use crate::crypto::Hkdf;

const EXPAND_INFO: &[u8] = b"WhatsApp Mutation Keys";
const EXPANDED_LEN: usize = 160;

/// The five derived keys for one sync key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationKeys {
    pub index_key: [u8; 32],
    pub value_encryption_key: [u8; 32],
    pub value_mac_key: [u8; 32],
    pub snapshot_mac_key: [u8; 32],
    pub patch_mac_key: [u8; 32],
}

impl MutationKeys {
    pub fn from_key_data(key_data: &[u8]) -> Self {
        let okm = Hkdf::derive(None, key_data, EXPAND_INFO, EXPANDED_LEN);
        let part = |i: usize| -> [u8; 32] {
            okm[i * 32..(i + 1) * 32].try_into().expect("slice length")
        };
        Self {
            index_key: part(0),
            value_encryption_key: part(1),
            value_mac_key: part(2),
            snapshot_mac_key: part(3),
            patch_mac_key: part(4),
        }
    }
}

/// A sync key as held in the store: 6-byte id plus 32 bytes of material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStateKey {
    pub key_id: Vec<u8>,
    pub key_data: [u8; 32],
    pub timestamp: i64,
}

impl AppStateKey {
    pub fn mutation_keys(&self) -> MutationKeys {
        MutationKeys::from_key_data(&self.key_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_keys_are_distinct() {
        let keys = MutationKeys::from_key_data(&[0x55; 32]);
        let all = [
            keys.index_key,
            keys.value_encryption_key,
            keys.value_mac_key,
            keys.snapshot_mac_key,
            keys.patch_mac_key,
        ];
        for i in 0..all.len() {
            for j in (i + 1)..all.len() {
                assert_ne!(all[i], all[j]);
            }
        }
    }

    #[test]
    fn derivation_is_stable() {
        assert_eq!(
            MutationKeys::from_key_data(&[1; 32]),
            MutationKeys::from_key_data(&[1; 32])
        );
        assert_ne!(
            MutationKeys::from_key_data(&[1; 32]),
            MutationKeys::from_key_data(&[2; 32])
        );
    }
}
