//! WebSocket transport (web client profile).
//!
//! Binary RFC-6455 frames against the fixed chat endpoint, with the
//! `Origin` and `Host` headers the server requires. Keepalive is handled
//! in-protocol, so no WS-level idle timeout is applied.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{client_async_tls, connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};

pub struct WebSocketTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketTransport {
    /// Connects directly to `url`, injecting the fixed headers.
    pub async fn connect(url: &str, origin: &str, host: &str) -> Result<Self> {
        let request = build_request(url, origin, host)?;
        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| Error::Transport(format!("websocket connect: {e}")))?;
        Ok(Self { ws })
    }

    /// Connects through an HTTP proxy with a CONNECT tunnel first.
    pub async fn connect_via_proxy(
        url: &str,
        origin: &str,
        host: &str,
        proxy_addr: &str,
    ) -> Result<Self> {
        let stream = TcpStream::connect(proxy_addr)
            .await
            .map_err(|e| Error::Transport(format!("proxy connect: {e}")))?;
        let stream = tunnel_through(stream, host).await?;
        let request = build_request(url, origin, host)?;
        let (ws, _response) = client_async_tls(request, stream)
            .await
            .map_err(|e| Error::Transport(format!("websocket connect: {e}")))?;
        Ok(Self { ws })
    }

    /// Sends one frame buffer as a single binary message.
    pub async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        self.ws
            .send(Message::Binary(frame.into()))
            .await
            .map_err(|e| Error::Transport(format!("websocket send: {e}")))
    }

    /// Next binary chunk; control frames are answered in place.
    pub async fn recv(&mut self) -> Result<Vec<u8>> {
        loop {
            let msg = self
                .ws
                .next()
                .await
                .ok_or_else(|| Error::Transport("websocket stream ended".into()))?
                .map_err(|e| Error::Transport(format!("websocket recv: {e}")))?;
            match msg {
                Message::Binary(data) => return Ok(data.to_vec()),
                Message::Ping(data) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                }
                Message::Close(frame) => {
                    let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    return Err(Error::Transport(format!("websocket closed: {reason}")));
                }
                Message::Pong(_) | Message::Text(_) | Message::Frame(_) => continue,
            }
        }
    }

    pub async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

fn build_request(
    url: &str,
    origin: &str,
    host: &str,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| Error::Transport(format!("bad endpoint url: {e}")))?;
    let headers = request.headers_mut();
    headers.insert(
        "Origin",
        HeaderValue::from_str(origin).map_err(|e| Error::Transport(e.to_string()))?,
    );
    headers.insert(
        "Host",
        HeaderValue::from_str(host).map_err(|e| Error::Transport(e.to_string()))?,
    );
    Ok(request)
}

/// Issues `CONNECT host:443` and waits for the 200 before handing the
/// stream to the TLS/WS handshake.
async fn tunnel_through(mut stream: TcpStream, host: &str) -> Result<TcpStream> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let connect = format!("CONNECT {host}:443 HTTP/1.1\r\nHost: {host}:443\r\n\r\n");
    stream
        .write_all(connect.as_bytes())
        .await
        .map_err(|e| Error::Transport(format!("proxy write: {e}")))?;

    let mut response = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        if response.len() > 4096 {
            return Err(Error::Transport("proxy response too long".into()));
        }
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| Error::Transport(format!("proxy read: {e}")))?;
        if n == 0 {
            return Err(Error::Transport("proxy closed during CONNECT".into()));
        }
        response.push(byte[0]);
    }
    let status_line = String::from_utf8_lossy(&response);
    if !status_line.starts_with("HTTP/1.1 200") && !status_line.starts_with("HTTP/1.0 200") {
        return Err(Error::Transport(format!(
            "proxy refused CONNECT: {}",
            status_line.lines().next().unwrap_or_default()
        )));
    }
    Ok(stream)
}
