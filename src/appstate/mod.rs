//! App-state synchronization: the LTHash CRDT, mutation crypto and the
//! pull/push engine.

mod engine;
mod hash_state;
mod keys;
pub mod lthash;
pub mod patch;

pub use engine::{encode_index, parse_index, AppStateEngine, PatchEntry};
pub use hash_state::{Collection, HashState};
pub use keys::{AppStateKey, MutationKeys};

use crate::proto::sync::SyncActionValue;

/// Decoded app-state action, delivered to the event sink after a pull or
/// push loopback.
#[derive(Debug, Clone, PartialEq)]
pub enum AppStateAction {
    Mute { muted: bool, end_timestamp: i64 },
    Pin(bool),
    Star(bool),
    Archive(bool),
    MarkRead(bool),
    Contact {
        full_name: Option<String>,
        first_name: Option<String>,
    },
    PushName(String),
    ClearChat,
    DeleteChat,
    DeleteMessage,
    Unknown,
}

impl From<&SyncActionValue> for AppStateAction {
    fn from(value: &SyncActionValue) -> Self {
        if let Some(mute) = &value.mute_action {
            AppStateAction::Mute {
                muted: mute.muted.unwrap_or(false),
                end_timestamp: mute.mute_end_timestamp.unwrap_or(0),
            }
        } else if let Some(pin) = &value.pin_action {
            AppStateAction::Pin(pin.pinned.unwrap_or(false))
        } else if let Some(star) = &value.star_action {
            AppStateAction::Star(star.starred.unwrap_or(false))
        } else if let Some(archive) = &value.archive_chat_action {
            AppStateAction::Archive(archive.archived.unwrap_or(false))
        } else if let Some(read) = &value.mark_chat_as_read_action {
            AppStateAction::MarkRead(read.read.unwrap_or(false))
        } else if let Some(contact) = &value.contact_action {
            AppStateAction::Contact {
                full_name: contact.full_name.clone(),
                first_name: contact.first_name.clone(),
            }
        } else if let Some(name) = &value.push_name_setting {
            AppStateAction::PushName(name.name.clone().unwrap_or_default())
        } else if value.clear_chat_action.is_some() {
            AppStateAction::ClearChat
        } else if value.delete_chat_action.is_some() {
            AppStateAction::DeleteChat
        } else if value.delete_message_for_me_action.is_some() {
            AppStateAction::DeleteMessage
        } else {
            AppStateAction::Unknown
        }
    }
}
