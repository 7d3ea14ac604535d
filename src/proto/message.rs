//! The message container and the server-message subset the core handles.

use prost::Message as ProstMessage;

use super::sync::ExternalBlobReference;

/// Decoded content of an `<enc>` payload after unpadding.
#[derive(Clone, PartialEq, ProstMessage)]
pub struct Message {
    #[prost(string, optional, tag = "1")]
    pub conversation: Option<String>,
    #[prost(message, optional, tag = "2")]
    pub sender_key_distribution_message: Option<SenderKeyDistributionHolder>,
    #[prost(message, optional, boxed, tag = "12")]
    pub protocol_message: Option<Box<ProtocolMessage>>,
    #[prost(message, optional, boxed, tag = "31")]
    pub device_sent_message: Option<Box<DeviceSentMessage>>,
}

impl Message {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            conversation: Some(body.into()),
            ..Default::default()
        }
    }

    /// Unwraps `DeviceSentMessage` indirection if present.
    pub fn unbox(self) -> Message {
        match self.device_sent_message {
            Some(dsm) => dsm.message.map(|m| *m).unwrap_or_default(),
            None => self,
        }
    }
}

/// Wrapper carrying a serialized Signal `SenderKeyDistributionMessage`
/// inside the container.
#[derive(Clone, PartialEq, ProstMessage)]
pub struct SenderKeyDistributionHolder {
    #[prost(string, optional, tag = "1")]
    pub group_id: Option<String>,
    #[prost(bytes, optional, tag = "2")]
    pub axolotl_sender_key_distribution_message: Option<Vec<u8>>,
}

/// Copy of a message sent from one of our own devices.
#[derive(Clone, PartialEq, ProstMessage)]
pub struct DeviceSentMessage {
    #[prost(string, optional, tag = "1")]
    pub destination_jid: Option<String>,
    #[prost(message, optional, boxed, tag = "2")]
    pub message: Option<Box<Message>>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, prost::Enumeration)]
#[repr(i32)]
pub enum ProtocolMessageType {
    Revoke = 0,
    EphemeralSetting = 3,
    HistorySyncNotification = 5,
    AppStateSyncKeyShare = 6,
    AppStateSyncKeyRequest = 7,
}

#[derive(Clone, PartialEq, ProstMessage)]
pub struct ProtocolMessage {
    #[prost(message, optional, tag = "1")]
    pub key: Option<MessageKey>,
    #[prost(enumeration = "ProtocolMessageType", optional, tag = "2")]
    pub r#type: Option<i32>,
    #[prost(int64, optional, tag = "4")]
    pub ephemeral_expiration: Option<i64>,
    #[prost(message, optional, tag = "6")]
    pub history_sync_notification: Option<HistorySyncNotification>,
    #[prost(message, optional, tag = "10")]
    pub app_state_sync_key_share: Option<AppStateSyncKeyShare>,
}

impl ProtocolMessage {
    pub fn kind(&self) -> Option<ProtocolMessageType> {
        ProtocolMessageType::try_from(self.r#type?).ok()
    }
}

#[derive(Clone, PartialEq, ProstMessage)]
pub struct MessageKey {
    #[prost(string, optional, tag = "1")]
    pub remote_jid: Option<String>,
    #[prost(bool, optional, tag = "2")]
    pub from_me: Option<bool>,
    #[prost(string, optional, tag = "3")]
    pub id: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub participant: Option<String>,
}

#[derive(Clone, PartialEq, ProstMessage)]
pub struct AppStateSyncKeyShare {
    #[prost(message, repeated, tag = "1")]
    pub keys: Vec<AppStateSyncKey>,
}

#[derive(Clone, PartialEq, ProstMessage)]
pub struct AppStateSyncKey {
    #[prost(message, optional, tag = "1")]
    pub key_id: Option<AppStateSyncKeyId>,
    #[prost(message, optional, tag = "2")]
    pub key_data: Option<AppStateSyncKeyData>,
}

#[derive(Clone, PartialEq, ProstMessage)]
pub struct AppStateSyncKeyId {
    /// 6-byte key id issued by the primary device.
    #[prost(bytes, optional, tag = "1")]
    pub key_id: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ProstMessage)]
pub struct AppStateSyncKeyData {
    #[prost(bytes, optional, tag = "1")]
    pub key_data: Option<Vec<u8>>,
    #[prost(message, optional, tag = "2")]
    pub fingerprint: Option<AppStateSyncKeyFingerprint>,
    #[prost(int64, optional, tag = "3")]
    pub timestamp: Option<i64>,
}

#[derive(Clone, PartialEq, ProstMessage)]
pub struct AppStateSyncKeyFingerprint {
    #[prost(uint32, optional, tag = "1")]
    pub raw_id: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub current_index: Option<u32>,
    #[prost(uint32, repeated, tag = "3")]
    pub device_indexes: Vec<u32>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, prost::Enumeration)]
#[repr(i32)]
pub enum HistorySyncType {
    InitialBootstrap = 0,
    InitialStatusV3 = 1,
    Full = 2,
    Recent = 3,
    PushName = 4,
    NonBlockingData = 5,
}

#[derive(Clone, PartialEq, ProstMessage)]
pub struct HistorySyncNotification {
    #[prost(bytes, optional, tag = "1")]
    pub file_sha256: Option<Vec<u8>>,
    #[prost(uint64, optional, tag = "2")]
    pub file_length: Option<u64>,
    #[prost(bytes, optional, tag = "3")]
    pub media_key: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "4")]
    pub file_enc_sha256: Option<Vec<u8>>,
    #[prost(string, optional, tag = "5")]
    pub direct_path: Option<String>,
    #[prost(enumeration = "HistorySyncType", optional, tag = "6")]
    pub sync_type: Option<i32>,
    #[prost(uint32, optional, tag = "7")]
    pub chunk_order: Option<u32>,
}

impl HistorySyncNotification {
    /// The blob reference handed to the `BlobStore` for download.
    pub fn blob_ref(&self) -> ExternalBlobReference {
        ExternalBlobReference {
            media_key: self.media_key.clone(),
            direct_path: self.direct_path.clone(),
            handle: None,
            file_size_bytes: self.file_length.map(|n| n as i64),
            file_sha256: self.file_sha256.clone(),
            file_enc_sha256: self.file_enc_sha256.clone(),
        }
    }
}

/// Decompressed history sync payload.
#[derive(Clone, PartialEq, ProstMessage)]
pub struct HistorySync {
    #[prost(enumeration = "HistorySyncType", tag = "1")]
    pub sync_type: i32,
    #[prost(message, repeated, tag = "2")]
    pub conversations: Vec<Conversation>,
    #[prost(uint32, optional, tag = "5")]
    pub chunk_order: Option<u32>,
    #[prost(uint32, optional, tag = "6")]
    pub progress: Option<u32>,
    #[prost(message, repeated, tag = "7")]
    pub pushnames: Vec<Pushname>,
}

impl HistorySync {
    pub fn kind(&self) -> HistorySyncType {
        HistorySyncType::try_from(self.sync_type).unwrap_or(HistorySyncType::InitialBootstrap)
    }
}

#[derive(Clone, PartialEq, ProstMessage)]
pub struct Conversation {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(uint32, optional, tag = "6")]
    pub unread_count: Option<u32>,
    #[prost(string, optional, tag = "10")]
    pub display_name: Option<String>,
}

#[derive(Clone, PartialEq, ProstMessage)]
pub struct Pushname {
    #[prost(string, optional, tag = "1")]
    pub id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub pushname: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_round_trip() {
        let msg = Message::text("hello");
        let back = Message::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(back.conversation.as_deref(), Some("hello"));
    }

    #[test]
    fn device_sent_unbox() {
        let inner = Message::text("from my other device");
        let outer = Message {
            device_sent_message: Some(Box::new(DeviceSentMessage {
                destination_jid: Some("123@s.whatsapp.net".into()),
                message: Some(Box::new(inner.clone())),
            })),
            ..Default::default()
        };
        assert_eq!(outer.unbox(), inner);
    }

    #[test]
    fn protocol_message_kind() {
        let pm = ProtocolMessage {
            r#type: Some(ProtocolMessageType::AppStateSyncKeyShare as i32),
            ..Default::default()
        };
        assert_eq!(pm.kind(), Some(ProtocolMessageType::AppStateSyncKeyShare));
    }

    #[test]
    fn history_sync_round_trip() {
        let sync = HistorySync {
            sync_type: HistorySyncType::InitialBootstrap as i32,
            conversations: vec![Conversation {
                id: "123@s.whatsapp.net".into(),
                unread_count: Some(2),
                display_name: Some("Alice".into()),
            }],
            chunk_order: Some(1),
            progress: Some(50),
            pushnames: vec![],
        };
        let back = HistorySync::decode(sync.encode_to_vec().as_slice()).unwrap();
        assert_eq!(back, sync);
        assert_eq!(back.kind(), HistorySyncType::InitialBootstrap);
    }
}
