//! Socket transports and the frame codec.
//!
//! Both profiles satisfy one contract: connect, send a frame as a single
//! write, receive raw chunks, close. Transports are single-use; reconnect
//! means a new instance.

mod frame;
mod tcp;
mod websocket;

pub use frame::{encode_frame, FrameDecoder, MAX_FRAME_LEN};
pub use tcp::TcpTransport;
pub use websocket::WebSocketTransport;

use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// A connected transport carrying opaque byte chunks.
pub enum Transport {
    WebSocket(WebSocketTransport),
    Tcp(TcpTransport),
    /// In-process loopback used by tests and simulations.
    Memory(MemoryTransport),
}

impl Transport {
    /// Sends one already-framed buffer.
    pub async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        match self {
            Transport::WebSocket(ws) => ws.send(frame).await,
            Transport::Tcp(tcp) => tcp.send(frame).await,
            Transport::Memory(mem) => mem.send(frame).await,
        }
    }

    /// Receives the next raw chunk. Chunk boundaries carry no meaning;
    /// the [`FrameDecoder`] reassembles frames.
    pub async fn recv(&mut self) -> Result<Vec<u8>> {
        match self {
            Transport::WebSocket(ws) => ws.recv().await,
            Transport::Tcp(tcp) => tcp.recv().await,
            Transport::Memory(mem) => mem.recv().await,
        }
    }

    pub async fn close(&mut self) {
        match self {
            Transport::WebSocket(ws) => ws.close().await,
            Transport::Tcp(tcp) => tcp.close().await,
            Transport::Memory(mem) => mem.close(),
        }
    }
}

/// Channel-backed transport; [`MemoryTransport::pair`] returns the two
/// connected ends.
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryTransport {
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self { tx: a_tx, rx: b_rx },
            Self { tx: b_tx, rx: a_rx },
        )
    }

    async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| Error::Transport("memory transport closed".into()))
    }

    async fn recv(&mut self) -> Result<Vec<u8>> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| Error::Transport("memory transport closed".into()))
    }

    fn close(&mut self) {
        self.rx.close();
    }
}
