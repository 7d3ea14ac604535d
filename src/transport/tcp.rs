//! Raw TCP transport (mobile client profile).

use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

const READ_CHUNK: usize = 8192;

pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Transport(format!("tcp connect: {e}")))?;
        SockRef::from(&stream)
            .set_keepalive(true)
            .map_err(|e| Error::Transport(format!("tcp keepalive: {e}")))?;
        Ok(Self { stream })
    }

    /// Writes the complete frame buffer in one call.
    pub async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        self.stream
            .write_all(&frame)
            .await
            .map_err(|e| Error::Transport(format!("tcp send: {e}")))?;
        self.stream
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("tcp flush: {e}")))
    }

    /// Next chunk off the socket; framing happens downstream.
    pub async fn recv(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; READ_CHUNK];
        let n = self
            .stream
            .read(&mut buf)
            .await
            .map_err(|e| Error::Transport(format!("tcp recv: {e}")))?;
        if n == 0 {
            return Err(Error::Transport("tcp connection closed".into()));
        }
        buf.truncate(n);
        Ok(buf)
    }

    pub async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
