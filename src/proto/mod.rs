//! Hand-written protobuf schemas for the wire formats the core speaks.

pub mod handshake;
pub mod message;
pub mod signal;
pub mod sync;

pub use handshake::{ClientFinish, ClientHello, ClientPayload, HandshakeMessage, ServerHello};
pub use message::Message;
