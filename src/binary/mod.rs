//! Binary node codec.
//!
//! Frames carry a one-byte flag ahead of the node bytes; when
//! [`tags::FLAG_COMPRESSED`] is set the remainder is zlib-deflated.

mod decoder;
mod encoder;
mod node;
pub mod tags;
pub mod token;

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use node::{AttrValue, Attrs, Node, NodeContent};

use crate::error::{Error, Result};

/// Encodes a node into a frame payload (flag byte + node bytes).
pub fn marshal(node: &Node) -> Vec<u8> {
    let mut out = vec![0u8];
    out.extend_from_slice(&Encoder::encode(node));
    out
}

/// Encodes a node with the payload deflated.
pub fn marshal_compressed(node: &Node) -> Result<Vec<u8>> {
    let raw = Encoder::encode(node);
    let mut enc = ZlibEncoder::new(vec![tags::FLAG_COMPRESSED], Compression::default());
    enc.write_all(&raw)
        .and_then(|_| enc.finish())
        .map_err(|e| Error::Protocol(format!("deflate failed: {e}")))
}

/// Decodes a frame payload, inflating it when the flag byte says so.
pub fn unmarshal(payload: &[u8]) -> Result<Node> {
    let (&flag, rest) = payload
        .split_first()
        .ok_or_else(|| Error::Protocol("empty frame payload".into()))?;
    if flag & tags::FLAG_COMPRESSED != 0 {
        let mut raw = Vec::new();
        ZlibDecoder::new(rest)
            .read_to_end(&mut raw)
            .map_err(|e| Error::Protocol(format!("inflate failed: {e}")))?;
        Decoder::decode(&raw)
    } else {
        Decoder::decode(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Node {
        Node::new("iq")
            .attr("id", "3EB0F6A7C2D1E4B5")
            .attr("type", "result")
            .child(Node::new("list").child(Node::new("item").attr("index", "0")))
    }

    #[test]
    fn marshal_round_trip() {
        let node = sample();
        assert_eq!(unmarshal(&marshal(&node)).unwrap(), node);
    }

    #[test]
    fn compressed_round_trip() {
        let node = sample();
        let payload = marshal_compressed(&node).unwrap();
        assert_eq!(payload[0] & tags::FLAG_COMPRESSED, tags::FLAG_COMPRESSED);
        assert_eq!(unmarshal(&payload).unwrap(), node);
    }

    #[test]
    fn empty_payload_is_protocol_error() {
        assert!(unmarshal(&[]).is_err());
    }
}
