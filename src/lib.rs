//! waproto: the core of an unofficial WhatsApp multi-device client.
//!
//! The crate implements the four subsystems a session is built from:
//!
//! - `transport` - length-prefixed frames over WebSocket or raw TCP
//! - `noise` / `socket` - the XX handshake and the encrypted frame stream
//! - `signal` - X3DH, the double ratchet and sender keys
//! - `appstate` - LTHash-based app-state synchronization
//!
//! plus the plumbing that ties them together: the binary node codec, the
//! request router, the dispatcher and the [`Client`] session orchestrator.
//! Persistence, media transfer and the high-level messaging API stay
//! behind the trait seams in [`store`].

pub mod appstate;
pub mod binary;
pub mod client;
pub mod config;
pub mod crypto;
pub mod dispatch;
mod error;
pub mod noise;
pub mod proto;
pub mod signal;
pub mod socket;
pub mod store;
pub mod transport;
pub mod types;

pub use client::Client;
pub use config::{ClientProfile, Config};
pub use error::{Error, ErrorKind, Result};
pub use types::{Event, EventSink, Jid};
