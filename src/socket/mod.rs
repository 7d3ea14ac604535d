//! The Noise socket: handshake driver plus the encrypted frame worker.
//!
//! `connect` runs the XX handshake over a freshly connected transport and
//! spawns a worker task that owns the transport and both direction
//! ciphers. Outbound frames are encrypted and written serially in arrival
//! order, which keeps counter increment and socket write atomic; inbound
//! chunks are reassembled, decrypted and handed to the dispatcher.

use prost::Message as _;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::crypto::{GcmCipher, KeyPair};
use crate::error::{Error, Result};
use crate::noise::{HandshakeState, WA_MAGIC};
use crate::proto::{ClientPayload, HandshakeMessage};
use crate::transport::{encode_frame, FrameDecoder, Transport};

/// Decrypted traffic and lifecycle notifications from the worker.
#[derive(Debug)]
pub enum SocketEvent {
    /// One decrypted frame payload (flag byte + node bytes).
    Frame(Vec<u8>),
    /// The session ended; carries the fatal error if there was one.
    Closed(Option<Error>),
}

enum Outbound {
    Frame(Vec<u8>),
    Close,
}

/// Cheap cloneable handle for sending frames into the worker.
#[derive(Clone)]
pub struct SocketHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SocketHandle {
    /// Queues a plaintext payload for encryption and transmission.
    pub fn send_payload(&self, payload: Vec<u8>) -> Result<()> {
        self.tx
            .send(Outbound::Frame(payload))
            .map_err(|_| Error::SessionClosed)
    }

    /// Requests an orderly shutdown of the worker.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// Runs the handshake and starts the frame worker.
///
/// Returns the send handle, the inbound event stream and the decrypted
/// server handshake payload (discarded for session setup, kept for
/// diagnostics).
pub async fn connect(
    mut transport: Transport,
    static_key: &KeyPair,
    ephemeral: KeyPair,
    payload: &ClientPayload,
    handshake_timeout: Duration,
) -> Result<(SocketHandle, mpsc::UnboundedReceiver<SocketEvent>, Vec<u8>)> {
    let (write_key, read_key, server_payload) = timeout(
        handshake_timeout,
        handshake(&mut transport, static_key, ephemeral, payload),
    )
    .await
    .map_err(|_| Error::Handshake("handshake timed out".into()))??;

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_worker(
        transport,
        GcmCipher::new(&write_key),
        GcmCipher::new(&read_key),
        out_rx,
        event_tx,
    ));

    Ok((SocketHandle { tx: out_tx }, event_rx, server_payload))
}

async fn handshake(
    transport: &mut Transport,
    static_key: &KeyPair,
    ephemeral: KeyPair,
    payload: &ClientPayload,
) -> Result<([u8; 32], [u8; 32], Vec<u8>)> {
    let mut state = HandshakeState::new(&WA_MAGIC);

    // -> e, with the magic prologue on the first frame only
    state.authenticate(&ephemeral.public);
    let hello = HandshakeMessage::hello(ephemeral.public).encode_to_vec();
    let mut first_frame = WA_MAGIC.to_vec();
    first_frame.extend(encode_frame(&hello)?);
    transport.send(first_frame).await?;

    // <- e, ee, s, es
    let mut decoder = FrameDecoder::new();
    let server_frame = recv_one_frame(transport, &mut decoder).await?;
    let message = HandshakeMessage::decode(server_frame.as_slice())
        .map_err(|e| Error::Handshake(format!("bad server hello: {e}")))?;
    let server_hello = message
        .server_hello
        .ok_or_else(|| Error::Handshake("missing server_hello".into()))?;
    let server_ephemeral: [u8; 32] = server_hello
        .ephemeral
        .as_deref()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::Handshake("bad server ephemeral".into()))?;
    let static_ciphertext = server_hello
        .r#static
        .ok_or_else(|| Error::Handshake("missing server static".into()))?;
    let payload_ciphertext = server_hello
        .payload
        .ok_or_else(|| Error::Handshake("missing server payload".into()))?;

    state.authenticate(&server_ephemeral);
    state.mix_key(&ephemeral.dh(&server_ephemeral));
    let server_static: [u8; 32] = state
        .decrypt(&static_ciphertext)?
        .try_into()
        .map_err(|_| Error::Handshake("bad server static length".into()))?;
    state.mix_key(&ephemeral.dh(&server_static));
    let server_payload = state.decrypt(&payload_ciphertext)?;
    debug!(len = server_payload.len(), "decrypted server certificate payload");

    // -> s, se, user payload
    let static_out = state.encrypt(&static_key.public)?;
    state.mix_key(&static_key.dh(&server_ephemeral));
    let payload_out = state.encrypt(&payload.encode_to_vec())?;
    let finish = HandshakeMessage::finish(static_out, payload_out).encode_to_vec();
    transport.send(encode_frame(&finish)?).await?;

    let (write_key, read_key) = state.finish_initiator();
    Ok((write_key, read_key, server_payload))
}

async fn recv_one_frame(transport: &mut Transport, decoder: &mut FrameDecoder) -> Result<Vec<u8>> {
    loop {
        let chunk = transport.recv().await?;
        let mut frames = decoder.feed(&chunk)?;
        if !frames.is_empty() {
            if frames.len() > 1 {
                warn!("discarding {} unexpected handshake frames", frames.len() - 1);
            }
            return Ok(frames.remove(0));
        }
    }
}

async fn run_worker(
    mut transport: Transport,
    mut write: GcmCipher,
    mut read: GcmCipher,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    event_tx: mpsc::UnboundedSender<SocketEvent>,
) {
    let mut decoder = FrameDecoder::new();
    let close_error = 'session: loop {
        tokio::select! {
            outbound = out_rx.recv() => match outbound {
                Some(Outbound::Frame(payload)) => {
                    let frame = match write
                        .encrypt_next(&[], &payload)
                        .and_then(|ct| encode_frame(&ct))
                    {
                        Ok(frame) => frame,
                        Err(e) => break 'session Some(e),
                    };
                    if let Err(e) = transport.send(frame).await {
                        break 'session Some(e);
                    }
                }
                Some(Outbound::Close) | None => break 'session None,
            },
            chunk = transport.recv() => {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => break 'session Some(e),
                };
                let frames = match decoder.feed(&chunk) {
                    Ok(frames) => frames,
                    Err(e) => break 'session Some(e),
                };
                for frame in frames {
                    match read.decrypt_next(&[], &frame) {
                        Ok(plaintext) => {
                            if event_tx.send(SocketEvent::Frame(plaintext)).is_err() {
                                break 'session None;
                            }
                        }
                        // A transport-phase decrypt failure means the
                        // counters desynchronized; unrecoverable.
                        Err(_) => break 'session Some(Error::Transport(
                            "inbound frame failed to decrypt".into(),
                        )),
                    }
                }
            }
        }
    };

    transport.close().await;
    let _ = event_tx.send(SocketEvent::Closed(close_error));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    /// Minimal responder used to exercise the client handshake.
    async fn mock_server(mut transport: Transport, server_static: KeyPair) -> (Vec<u8>, Transport, [u8; 32], [u8; 32]) {
        let server_ephemeral = KeyPair::generate();
        let mut state = HandshakeState::new(&WA_MAGIC);
        let mut decoder = FrameDecoder::new();

        // <- e (strip the 4-byte magic prologue first)
        let chunk = transport.recv().await.unwrap();
        assert_eq!(&chunk[..4], &WA_MAGIC);
        let frames = decoder.feed(&chunk[4..]).unwrap();
        let hello = HandshakeMessage::decode(frames[0].as_slice()).unwrap();
        let client_ephemeral: [u8; 32] = hello
            .client_hello
            .unwrap()
            .ephemeral
            .unwrap()
            .try_into()
            .unwrap();
        state.authenticate(&client_ephemeral);

        // -> e, ee, s, es
        state.authenticate(&server_ephemeral.public);
        state.mix_key(&server_ephemeral.dh(&client_ephemeral));
        let static_ct = state.encrypt(&server_static.public).unwrap();
        state.mix_key(&server_static.dh(&client_ephemeral));
        let payload_ct = state.encrypt(b"mock certificate chain").unwrap();
        let reply = HandshakeMessage {
            client_hello: None,
            server_hello: Some(crate::proto::ServerHello {
                ephemeral: Some(server_ephemeral.public.to_vec()),
                r#static: Some(static_ct),
                payload: Some(payload_ct),
            }),
            client_finish: None,
        }
        .encode_to_vec();
        transport.send(encode_frame(&reply).unwrap()).await.unwrap();

        // <- s, se, payload
        let chunk = transport.recv().await.unwrap();
        let frames = decoder.feed(&chunk).unwrap();
        let finish = HandshakeMessage::decode(frames[0].as_slice())
            .unwrap()
            .client_finish
            .unwrap();
        let client_static: [u8; 32] = state
            .decrypt(&finish.r#static.unwrap())
            .unwrap()
            .try_into()
            .unwrap();
        state.mix_key(&server_ephemeral.dh(&client_static));
        let user_payload = state.decrypt(&finish.payload.unwrap()).unwrap();
        let (write_key, read_key) = state.finish_responder();
        (user_payload, transport, write_key, read_key)
    }

    #[tokio::test]
    async fn handshake_reaches_transport_and_frames_flow() {
        let (client_end, server_end) = MemoryTransport::pair();
        let server_static = KeyPair::generate();
        let client_static = KeyPair::generate();

        let server = tokio::spawn(mock_server(
            Transport::Memory(server_end),
            server_static,
        ));

        let payload = ClientPayload {
            passive: Some(false),
            push_name: Some("test".into()),
            ..Default::default()
        };
        let (handle, mut events, server_cert) = connect(
            Transport::Memory(client_end),
            &client_static,
            KeyPair::generate(),
            &payload,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(server_cert, b"mock certificate chain");

        let (user_payload, mut server_transport, s_write, s_read) = server.await.unwrap();
        let decoded = ClientPayload::decode(user_payload.as_slice()).unwrap();
        assert_eq!(decoded.push_name.as_deref(), Some("test"));

        // server -> client transport frame
        let mut s_tx = GcmCipher::new(&s_write);
        let ct = s_tx.encrypt_next(&[], b"\x00inbound").unwrap();
        server_transport
            .send(encode_frame(&ct).unwrap())
            .await
            .unwrap();
        match events.recv().await.unwrap() {
            SocketEvent::Frame(payload) => assert_eq!(payload, b"\x00inbound"),
            other => panic!("unexpected event: {other:?}"),
        }

        // client -> server transport frame
        handle.send_payload(b"\x00outbound".to_vec()).unwrap();
        let chunk = server_transport.recv().await.unwrap();
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&chunk).unwrap();
        let mut s_rx = GcmCipher::new(&s_read);
        assert_eq!(s_rx.decrypt_next(&[], &frames[0]).unwrap(), b"\x00outbound");

        handle.close();
        loop {
            match events.recv().await {
                Some(SocketEvent::Closed(err)) => {
                    assert!(err.is_none());
                    break;
                }
                Some(_) => continue,
                None => panic!("event stream ended without close"),
            }
        }
    }
}
