//! Mutation sealing and the MAC chain over patches and snapshots.

use prost::Message as _;

use crate::appstate::hash_state::Collection;
use crate::appstate::keys::MutationKeys;
use crate::crypto::{aescbc, hmac_sha256_parts, hmac_sha512_parts};
use crate::error::{Error, Result};
use crate::proto::sync::{
    KeyId, SyncActionData, SyncdIndex, SyncdMutation, SyncdOperation, SyncdRecord, SyncdValue,
};

/// Trailing MAC length inside a value blob.
pub const VALUE_MAC_LEN: usize = 32;

/// `HMAC-SHA512(value_mac_key, op ‖ key_id ‖ blob ‖ u64be(len(op‖key_id)))`
/// truncated to 32 bytes.
pub fn value_mac(
    op: SyncdOperation,
    key_id: &[u8],
    encrypted: &[u8],
    key: &[u8; 32],
) -> [u8; 32] {
    let mut key_data = vec![op.content_byte()];
    key_data.extend_from_slice(key_id);
    let length = (key_data.len() as u64).to_be_bytes();
    let full = hmac_sha512_parts(key, &[&key_data, encrypted, &length]);
    full[..VALUE_MAC_LEN].try_into().expect("slice length")
}

/// `HMAC-SHA256(snapshot_mac_key, hash ‖ u64be(version) ‖ name)`.
pub fn snapshot_mac(
    hash: &[u8; 128],
    version: u64,
    collection: Collection,
    key: &[u8; 32],
) -> [u8; 32] {
    hmac_sha256_parts(
        key,
        &[
            hash,
            &version.to_be_bytes(),
            collection.wire_name().as_bytes(),
        ],
    )
}

/// `HMAC-SHA256(patch_mac_key, snapshot_mac ‖ value_macs… ‖ u64be(version) ‖ name)`.
pub fn patch_mac(
    snapshot_mac: &[u8],
    value_macs: &[Vec<u8>],
    version: u64,
    collection: Collection,
    key: &[u8; 32],
) -> [u8; 32] {
    let mut parts: Vec<&[u8]> = Vec::with_capacity(value_macs.len() + 3);
    parts.push(snapshot_mac);
    for mac in value_macs {
        parts.push(mac);
    }
    let version_be = version.to_be_bytes();
    parts.push(&version_be);
    parts.push(collection.wire_name().as_bytes());
    hmac_sha256_parts(key, &parts)
}

/// A sealed mutation plus the MACs the LTHash needs.
pub struct SealedMutation {
    pub mutation: SyncdMutation,
    pub index_mac: [u8; 32],
    pub value_mac: [u8; 32],
}

/// Encrypts and MACs one action for upload.
pub fn seal_mutation(
    keys: &MutationKeys,
    key_id: &[u8],
    op: SyncdOperation,
    action: &SyncActionData,
) -> SealedMutation {
    let index_bytes = action.index.as_deref().unwrap_or_default();
    let index_mac = crate::crypto::hmac_sha256(&keys.index_key, index_bytes);

    let plaintext = action.encode_to_vec();
    let encrypted = aescbc::encrypt_and_prefix(&keys.value_encryption_key, &plaintext);
    let value_mac = value_mac(op, key_id, &encrypted, &keys.value_mac_key);

    let mut blob = encrypted;
    blob.extend_from_slice(&value_mac);

    SealedMutation {
        mutation: SyncdMutation {
            operation: Some(op as i32),
            record: Some(SyncdRecord {
                index: Some(SyncdIndex {
                    blob: Some(index_mac.to_vec()),
                }),
                value: Some(SyncdValue { blob: Some(blob) }),
                key_id: Some(KeyId {
                    id: Some(key_id.to_vec()),
                }),
            }),
        },
        index_mac,
        value_mac,
    }
}

/// A verified, decrypted mutation.
#[derive(Debug)]
pub struct OpenedMutation {
    pub op: SyncdOperation,
    pub index_mac: Vec<u8>,
    pub value_mac: Vec<u8>,
    pub action: SyncActionData,
}

/// Verifies the MAC chain of one record and decrypts its action data.
pub fn open_mutation(
    keys: &MutationKeys,
    op: SyncdOperation,
    record: &SyncdRecord,
    collection: Collection,
) -> Result<OpenedMutation> {
    let mac_error = || Error::MacMismatch {
        collection: collection.wire_name().to_string(),
    };

    let key_id = record
        .key_id
        .as_ref()
        .and_then(|k| k.id.as_deref())
        .ok_or_else(|| Error::Protocol("record missing key id".into()))?;
    let blob = record
        .value
        .as_ref()
        .and_then(|v| v.blob.as_deref())
        .ok_or_else(|| Error::Protocol("record missing value blob".into()))?;
    if blob.len() < VALUE_MAC_LEN + 16 {
        return Err(Error::Protocol("record value blob too short".into()));
    }
    let (encrypted, their_value_mac) = blob.split_at(blob.len() - VALUE_MAC_LEN);

    let expected = value_mac(op, key_id, encrypted, &keys.value_mac_key);
    if their_value_mac != expected {
        return Err(mac_error());
    }

    let plaintext = aescbc::decrypt_prefixed(&keys.value_encryption_key, encrypted)
        .map_err(|_| mac_error())?;
    let action = SyncActionData::decode(plaintext.as_slice())
        .map_err(|e| Error::Protocol(format!("bad action data: {e}")))?;

    let index_mac = record
        .index
        .as_ref()
        .and_then(|i| i.blob.clone())
        .ok_or_else(|| Error::Protocol("record missing index".into()))?;
    let index_bytes = action.index.as_deref().unwrap_or_default();
    if crate::crypto::hmac_sha256(&keys.index_key, index_bytes) != index_mac.as_slice() {
        return Err(mac_error());
    }

    Ok(OpenedMutation {
        op,
        index_mac,
        value_mac: their_value_mac.to_vec(),
        action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::sync::{MuteAction, SyncActionValue};

    fn sample_action() -> SyncActionData {
        SyncActionData {
            index: Some(br#"["mute","15551234567@s.whatsapp.net"]"#.to_vec()),
            value: Some(SyncActionValue {
                timestamp: Some(1_700_000_000),
                mute_action: Some(MuteAction {
                    muted: Some(true),
                    mute_end_timestamp: Some(0),
                }),
                ..Default::default()
            }),
            padding: Some(vec![]),
            version: Some(1),
        }
    }

    #[test]
    fn seal_open_round_trip() {
        let keys = MutationKeys::from_key_data(&[9; 32]);
        let key_id = [0, 0, 0, 0, 0, 1];
        let sealed = seal_mutation(&keys, &key_id, SyncdOperation::Set, &sample_action());
        let opened = open_mutation(
            &keys,
            SyncdOperation::Set,
            sealed.mutation.record.as_ref().unwrap(),
            Collection::RegularHigh,
        )
        .unwrap();
        assert_eq!(opened.action, sample_action());
        assert_eq!(opened.index_mac, sealed.index_mac.to_vec());
        assert_eq!(opened.value_mac, sealed.value_mac.to_vec());
    }

    #[test]
    fn wrong_operation_fails_value_mac() {
        let keys = MutationKeys::from_key_data(&[9; 32]);
        let sealed = seal_mutation(&keys, &[0; 6], SyncdOperation::Set, &sample_action());
        let err = open_mutation(
            &keys,
            SyncdOperation::Remove,
            sealed.mutation.record.as_ref().unwrap(),
            Collection::Regular,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MacMismatch { .. }));
    }

    #[test]
    fn wrong_keys_fail() {
        let keys = MutationKeys::from_key_data(&[9; 32]);
        let other = MutationKeys::from_key_data(&[10; 32]);
        let sealed = seal_mutation(&keys, &[0; 6], SyncdOperation::Set, &sample_action());
        assert!(open_mutation(
            &other,
            SyncdOperation::Set,
            sealed.mutation.record.as_ref().unwrap(),
            Collection::Regular,
        )
        .is_err());
    }

    #[test]
    fn snapshot_mac_depends_on_every_input() {
        let key = [3u8; 32];
        let base = snapshot_mac(&[0; 128], 4, Collection::Regular, &key);
        assert_ne!(base, snapshot_mac(&[1; 128], 4, Collection::Regular, &key));
        assert_ne!(base, snapshot_mac(&[0; 128], 5, Collection::Regular, &key));
        assert_ne!(base, snapshot_mac(&[0; 128], 4, Collection::RegularLow, &key));
    }

    #[test]
    fn patch_mac_covers_value_macs() {
        let key = [4u8; 32];
        let snap = [5u8; 32];
        let macs = vec![vec![1u8; 32], vec![2u8; 32]];
        let a = patch_mac(&snap, &macs, 1, Collection::Regular, &key);
        let reversed = vec![vec![2u8; 32], vec![1u8; 32]];
        let b = patch_mac(&snap, &reversed, 1, Collection::Regular, &key);
        assert_ne!(a, b);
    }
}
