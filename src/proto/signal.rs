//! Signal protocol wire messages.
//!
//! Every serialized form carries a leading version byte (major/minor
//! nibbles, currently 3/3); `SignalMessage` appends an 8-byte truncated
//! HMAC and `SenderKeyMessage` a 64-byte Curve25519 signature.

use prost::Message;

/// Version byte for current-version messages: high nibble = message
/// version, low nibble = minimum supported version.
pub const VERSION_BYTE: u8 = 0x33;

/// Length of the truncated MAC trailing a `SignalMessage`.
pub const MAC_LENGTH: usize = 8;

/// Length of the signature trailing a `SenderKeyMessage`.
pub const SIGNATURE_LENGTH: usize = 64;

#[derive(Clone, PartialEq, Message)]
pub struct SignalMessage {
    /// Sender ratchet public key, DJB-prefixed (33 bytes).
    #[prost(bytes, optional, tag = "1")]
    pub ratchet_key: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "2")]
    pub counter: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub previous_counter: Option<u32>,
    #[prost(bytes, optional, tag = "4")]
    pub ciphertext: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PreKeySignalMessage {
    #[prost(uint32, optional, tag = "5")]
    pub registration_id: Option<u32>,
    #[prost(uint32, optional, tag = "1")]
    pub pre_key_id: Option<u32>,
    #[prost(uint32, optional, tag = "6")]
    pub signed_pre_key_id: Option<u32>,
    /// Alice's base key, DJB-prefixed.
    #[prost(bytes, optional, tag = "2")]
    pub base_key: Option<Vec<u8>>,
    /// Alice's identity key, DJB-prefixed.
    #[prost(bytes, optional, tag = "3")]
    pub identity_key: Option<Vec<u8>>,
    /// Serialized inner [`SignalMessage`] (version byte + proto + mac).
    #[prost(bytes, optional, tag = "4")]
    pub message: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SenderKeyMessage {
    #[prost(uint32, optional, tag = "1")]
    pub id: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub iteration: Option<u32>,
    #[prost(bytes, optional, tag = "3")]
    pub ciphertext: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SenderKeyDistributionMessage {
    #[prost(uint32, optional, tag = "1")]
    pub id: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub iteration: Option<u32>,
    #[prost(bytes, optional, tag = "3")]
    pub chain_key: Option<Vec<u8>>,
    /// Signing public key, DJB-prefixed.
    #[prost(bytes, optional, tag = "4")]
    pub signing_key: Option<Vec<u8>>,
}

/// Splits `version byte ‖ body ‖ trailer` where the trailer has the given
/// length. Returns `(body, trailer)`.
pub fn split_versioned(serialized: &[u8], trailer_len: usize) -> Option<(&[u8], &[u8])> {
    if serialized.len() < 1 + trailer_len {
        return None;
    }
    let version = serialized[0] >> 4;
    if version != 3 {
        return None;
    }
    let body_end = serialized.len() - trailer_len;
    Some((&serialized[1..body_end], &serialized[body_end..]))
}
