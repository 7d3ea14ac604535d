//! Length-prefixed frame codec.
//!
//! Frames are `[3-byte big-endian length][payload]`. The decoder consumes
//! arbitrary chunks and yields exactly one payload per complete frame,
//! waiting on partial input; an impossible length claim kills the
//! transport.

use crate::error::{Error, Result};

/// Hard cap implied by the 3-byte length header.
pub const MAX_FRAME_LEN: usize = (1 << 24) - 1;

/// Prepends the length header, producing the single buffer handed to the
/// socket so concurrent senders cannot interleave mid-frame.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(Error::Transport(format!(
            "frame of {} bytes exceeds the 3-byte length header",
            payload.len()
        )));
    }
    let mut out = Vec::with_capacity(3 + payload.len());
    out.push((payload.len() >> 16) as u8);
    out.push((payload.len() >> 8) as u8);
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Incremental decoder over a growable buffer.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and drains every frame that became complete.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        loop {
            if self.buf.len() < 3 {
                break;
            }
            let len = ((self.buf[0] as usize) << 16)
                | ((self.buf[1] as usize) << 8)
                | self.buf[2] as usize;
            if len > MAX_FRAME_LEN {
                return Err(Error::Transport(format!("corrupt frame length {len}")));
            }
            if self.buf.len() < 3 + len {
                break;
            }
            frames.push(self.buf[3..3 + len].to_vec());
            self.buf.drain(..3 + len);
        }
        Ok(frames)
    }

    /// Bytes buffered but not yet forming a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
