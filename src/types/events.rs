//! Events delivered to the embedding application.

use std::sync::Arc;

use crate::error::ErrorKind;
use crate::types::Jid;

/// A decrypted inbound message, ready for the application.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub info: MessageInfo,
    pub text: Option<String>,
}

/// Envelope metadata of a message.
#[derive(Debug, Clone)]
pub struct MessageInfo {
    pub id: String,
    /// Chat the message belongs to (sender for 1:1, group JID for groups).
    pub chat: Jid,
    /// Concrete sending device.
    pub sender: Jid,
    pub from_me: bool,
    pub timestamp: u64,
    pub push_name: Option<String>,
}

/// Delivery/read receipt observed on the wire.
#[derive(Debug, Clone)]
pub struct ReceiptEvent {
    pub message_ids: Vec<String>,
    pub chat: Jid,
    pub sender: Jid,
    pub receipt_type: ReceiptType,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptType {
    Delivered,
    Read,
    ReadSelf,
    Played,
    Sender,
    Inactive,
    PeerMessage,
    HistorySync,
    Retry,
}

impl ReceiptType {
    /// Wire value of the `type` attribute; `Delivered` is attribute-less.
    pub fn as_attr(&self) -> Option<&'static str> {
        match self {
            ReceiptType::Delivered => None,
            ReceiptType::Read => Some("read"),
            ReceiptType::ReadSelf => Some("read-self"),
            ReceiptType::Played => Some("played"),
            ReceiptType::Sender => Some("sender"),
            ReceiptType::Inactive => Some("inactive"),
            ReceiptType::PeerMessage => Some("peer_msg"),
            ReceiptType::HistorySync => Some("hist_sync"),
            ReceiptType::Retry => Some("retry"),
        }
    }

    pub fn from_attr(attr: Option<&str>) -> Self {
        match attr {
            None => ReceiptType::Delivered,
            Some("read") => ReceiptType::Read,
            Some("read-self") => ReceiptType::ReadSelf,
            Some("played") => ReceiptType::Played,
            Some("sender") => ReceiptType::Sender,
            Some("inactive") => ReceiptType::Inactive,
            Some("peer_msg") => ReceiptType::PeerMessage,
            Some("hist_sync") => ReceiptType::HistorySync,
            Some("retry") => ReceiptType::Retry,
            Some(_) => ReceiptType::Delivered,
        }
    }
}

/// Chat discovered through history sync.
#[derive(Debug, Clone)]
pub struct NewChatEvent {
    pub jid: Jid,
    pub name: Option<String>,
    pub message_count: usize,
}

/// Push name learned from history sync or a notification.
#[derive(Debug, Clone)]
pub struct PushNameEvent {
    pub jid: Jid,
    pub name: String,
}

/// An app-state action applied locally after a pull or push loopback.
#[derive(Debug, Clone)]
pub struct AppStateActionEvent {
    pub collection: String,
    pub index: Vec<String>,
    pub action: crate::appstate::AppStateAction,
}

/// Reason the connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    Closed,
    LoggedOut,
    Replaced,
    StreamError(String),
    Io(String),
}

/// Everything the core reports upward.
#[derive(Debug, Clone)]
pub enum Event {
    Connected { resumed: bool },
    Disconnected(DisconnectReason),
    Message(MessageEvent),
    Receipt(ReceiptEvent),
    Notification { kind: String },
    Call { from: Jid, id: String },
    NewChat(NewChatEvent),
    PushName(PushNameEvent),
    HistorySyncComplete,
    AppStateAction(AppStateActionEvent),
}

/// Listener surface. Implementations must not block: callbacks are invoked
/// from the dedicated message/app-state queues, never from the reader.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: Event);

    /// One call per surfaced error, tagged with its classifying kind.
    fn on_error(&self, kind: ErrorKind, cause: String) {
        let _ = (kind, cause);
    }

    fn on_close(&self) {}
}

/// Sink that drops everything; default when the embedder registers none.
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&self, _event: Event) {}
}

pub type SharedSink = Arc<dyn EventSink>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_attr_round_trip() {
        for rt in [
            ReceiptType::Delivered,
            ReceiptType::Read,
            ReceiptType::Played,
            ReceiptType::Sender,
            ReceiptType::Inactive,
            ReceiptType::PeerMessage,
            ReceiptType::HistorySync,
        ] {
            assert_eq!(ReceiptType::from_attr(rt.as_attr()), rt);
        }
    }
}
