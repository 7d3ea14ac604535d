//! Node routing: request correlation, the inbound dispatcher and the
//! message pipelines.

mod dispatcher;
mod message;
mod router;
mod usync;

pub use dispatcher::{build_receipt, Dispatcher};
pub use message::{pad_message, unpad_message, MessageCipher};
pub use router::{RequestRouter, DEFAULT_IQ_TIMEOUT};
pub use usync::{build_device_query, build_session_query, parse_device_list, parse_prekey_bundles};

use crate::binary::Node;
use crate::error::Result;
use crate::store::BoxFuture;

/// Minimal capability handed downward to components that need to talk to
/// the server, instead of a reference back to the whole session.
pub trait Context: Send + Sync {
    /// Sends an `<iq>` and resolves with the matching reply. The
    /// implementation assigns the request id.
    fn send_iq(&self, node: Node) -> BoxFuture<'_, Result<Node>>;

    /// Fire-and-forget node send.
    fn send_node(&self, node: Node) -> Result<()>;
}
