//! App-state sync protobufs: patches, mutations, snapshots, action data.

use prost::Message;

#[derive(Clone, Copy, PartialEq, Eq, Debug, prost::Enumeration)]
#[repr(i32)]
pub enum SyncdOperation {
    Set = 0,
    Remove = 1,
}

impl SyncdOperation {
    /// Content byte mixed into value MACs and the LTHash input.
    pub fn content_byte(&self) -> u8 {
        match self {
            SyncdOperation::Set => 0x01,
            SyncdOperation::Remove => 0x02,
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncdVersion {
    #[prost(uint64, optional, tag = "1")]
    pub version: Option<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct KeyId {
    #[prost(bytes, optional, tag = "1")]
    pub id: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncdIndex {
    #[prost(bytes, optional, tag = "1")]
    pub blob: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncdValue {
    /// `ciphertext ‖ value_mac[32]`.
    #[prost(bytes, optional, tag = "1")]
    pub blob: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncdRecord {
    #[prost(message, optional, tag = "1")]
    pub index: Option<SyncdIndex>,
    #[prost(message, optional, tag = "2")]
    pub value: Option<SyncdValue>,
    #[prost(message, optional, tag = "3")]
    pub key_id: Option<KeyId>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncdMutation {
    #[prost(enumeration = "SyncdOperation", optional, tag = "1")]
    pub operation: Option<i32>,
    #[prost(message, optional, tag = "2")]
    pub record: Option<SyncdRecord>,
}

impl SyncdMutation {
    pub fn op(&self) -> SyncdOperation {
        SyncdOperation::try_from(self.operation.unwrap_or(0)).unwrap_or(SyncdOperation::Set)
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncdPatch {
    #[prost(message, optional, tag = "1")]
    pub version: Option<SyncdVersion>,
    #[prost(message, repeated, tag = "2")]
    pub mutations: Vec<SyncdMutation>,
    #[prost(message, optional, tag = "3")]
    pub external_mutations: Option<ExternalBlobReference>,
    #[prost(bytes, optional, tag = "4")]
    pub snapshot_mac: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "5")]
    pub patch_mac: Option<Vec<u8>>,
    #[prost(message, optional, tag = "6")]
    pub key_id: Option<KeyId>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncdSnapshot {
    #[prost(message, optional, tag = "1")]
    pub version: Option<SyncdVersion>,
    #[prost(message, repeated, tag = "2")]
    pub records: Vec<SyncdRecord>,
    #[prost(bytes, optional, tag = "3")]
    pub mac: Option<Vec<u8>>,
    #[prost(message, optional, tag = "4")]
    pub key_id: Option<KeyId>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncdMutations {
    #[prost(message, repeated, tag = "1")]
    pub mutations: Vec<SyncdMutation>,
}

/// Reference to a blob stored outside the frame stream, fetched through
/// the `BlobStore` collaborator.
#[derive(Clone, PartialEq, Message)]
pub struct ExternalBlobReference {
    #[prost(bytes, optional, tag = "1")]
    pub media_key: Option<Vec<u8>>,
    #[prost(string, optional, tag = "2")]
    pub direct_path: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub handle: Option<String>,
    #[prost(int64, optional, tag = "4")]
    pub file_size_bytes: Option<i64>,
    #[prost(bytes, optional, tag = "5")]
    pub file_sha256: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "6")]
    pub file_enc_sha256: Option<Vec<u8>>,
}

/// Decrypted mutation payload: the index strings plus the action value.
#[derive(Clone, PartialEq, Message)]
pub struct SyncActionData {
    /// JSON array of index strings, e.g. `["mute","<jid>"]`.
    #[prost(bytes, optional, tag = "1")]
    pub index: Option<Vec<u8>>,
    #[prost(message, optional, tag = "2")]
    pub value: Option<SyncActionValue>,
    #[prost(bytes, optional, tag = "3")]
    pub padding: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "4")]
    pub version: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncActionValue {
    #[prost(int64, optional, tag = "1")]
    pub timestamp: Option<i64>,
    #[prost(message, optional, tag = "2")]
    pub star_action: Option<StarAction>,
    #[prost(message, optional, tag = "3")]
    pub contact_action: Option<ContactAction>,
    #[prost(message, optional, tag = "4")]
    pub mute_action: Option<MuteAction>,
    #[prost(message, optional, tag = "5")]
    pub pin_action: Option<PinAction>,
    #[prost(message, optional, tag = "7")]
    pub push_name_setting: Option<PushNameSetting>,
    #[prost(message, optional, tag = "17")]
    pub archive_chat_action: Option<ArchiveChatAction>,
    #[prost(message, optional, tag = "18")]
    pub delete_message_for_me_action: Option<DeleteMessageForMeAction>,
    #[prost(message, optional, tag = "20")]
    pub mark_chat_as_read_action: Option<MarkChatAsReadAction>,
    #[prost(message, optional, tag = "21")]
    pub clear_chat_action: Option<ClearChatAction>,
    #[prost(message, optional, tag = "22")]
    pub delete_chat_action: Option<DeleteChatAction>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StarAction {
    #[prost(bool, optional, tag = "1")]
    pub starred: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ContactAction {
    #[prost(string, optional, tag = "1")]
    pub full_name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub first_name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MuteAction {
    #[prost(bool, optional, tag = "1")]
    pub muted: Option<bool>,
    #[prost(int64, optional, tag = "2")]
    pub mute_end_timestamp: Option<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PinAction {
    #[prost(bool, optional, tag = "1")]
    pub pinned: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PushNameSetting {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ArchiveChatAction {
    #[prost(bool, optional, tag = "2")]
    pub archived: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DeleteMessageForMeAction {
    #[prost(bool, optional, tag = "1")]
    pub delete_media: Option<bool>,
    #[prost(int64, optional, tag = "2")]
    pub message_timestamp: Option<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MarkChatAsReadAction {
    #[prost(bool, optional, tag = "1")]
    pub read: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClearChatAction {
    #[prost(message, optional, tag = "1")]
    pub message_range: Option<SyncActionMessageRange>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DeleteChatAction {
    #[prost(message, optional, tag = "1")]
    pub message_range: Option<SyncActionMessageRange>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyncActionMessageRange {
    #[prost(int64, optional, tag = "1")]
    pub last_message_timestamp: Option<i64>,
    #[prost(int64, optional, tag = "2")]
    pub last_system_message_timestamp: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_round_trip() {
        let patch = SyncdPatch {
            version: Some(SyncdVersion { version: Some(9) }),
            mutations: vec![SyncdMutation {
                operation: Some(SyncdOperation::Set as i32),
                record: Some(SyncdRecord {
                    index: Some(SyncdIndex { blob: Some(vec![1; 32]) }),
                    value: Some(SyncdValue { blob: Some(vec![2; 48]) }),
                    key_id: Some(KeyId { id: Some(vec![0, 0, 0, 0, 0, 1]) }),
                }),
            }],
            external_mutations: None,
            snapshot_mac: Some(vec![3; 32]),
            patch_mac: Some(vec![4; 32]),
            key_id: Some(KeyId { id: Some(vec![0, 0, 0, 0, 0, 1]) }),
        };
        let back = SyncdPatch::decode(patch.encode_to_vec().as_slice()).unwrap();
        assert_eq!(back, patch);
        assert_eq!(back.mutations[0].op(), SyncdOperation::Set);
    }

    #[test]
    fn operation_content_bytes() {
        assert_eq!(SyncdOperation::Set.content_byte(), 1);
        assert_eq!(SyncdOperation::Remove.content_byte(), 2);
    }

    #[test]
    fn action_data_round_trip() {
        let data = SyncActionData {
            index: Some(br#"["mute","123@s.whatsapp.net"]"#.to_vec()),
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
        };
        let back = SyncActionData::decode(data.encode_to_vec().as_slice()).unwrap();
        assert_eq!(back, data);
    }
}
