//! Core protocol types: JIDs and the event surface.

mod events;
mod jid;

pub use events::*;
pub use jid::{server, Jid, JidParseError};

/// Internal message id, 16 uppercase hex chars on the wire.
pub type MessageId = String;
