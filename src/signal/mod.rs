//! Signal protocol subset: X3DH key agreement, the double ratchet for
//! 1:1 sessions and sender keys for groups.

mod address;
mod builder;
pub mod cipher;
mod group;
pub mod ratchet;
mod state;

pub use address::SignalAddress;
pub use builder::{init_inbound, init_outbound, PreKeyBundle};
pub use cipher::{InboundPreKeys, MessageKind, SealedMessage};
pub use group::{SenderKeyName, SenderKeyRecord, MAX_SKIPPED_SENDER_KEYS};
pub use state::{
    PendingPreKey, ReceiverChain, SenderChain, SessionRecord, SessionState,
    MAX_SKIPPED_MESSAGE_KEYS,
};
