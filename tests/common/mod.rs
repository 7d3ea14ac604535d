//! Shared harness: an in-process mock server speaking the responder side
//! of the handshake and the node protocol, plus canned peer devices.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use prost::Message as _;
use tokio::sync::mpsc;

use waproto::binary::{self, Node};
use waproto::crypto::{GcmCipher, KeyPair, PreKey, SignedPreKey};
use waproto::noise::{HandshakeState, WA_MAGIC};
use waproto::proto::{ClientPayload, HandshakeMessage, ServerHello};
use waproto::transport::{encode_frame, FrameDecoder, Transport};
use waproto::types::{Event, EventSink, Jid};
use waproto::ErrorKind;

/// Responder end of a session, driving the frame stream in plaintext
/// nodes.
pub struct MockServer {
    transport: Transport,
    decoder: FrameDecoder,
    write: GcmCipher,
    read: GcmCipher,
    queued: VecDeque<Vec<u8>>,
}

impl MockServer {
    /// Performs the responder handshake and returns the decoded client
    /// payload alongside the connected server.
    pub async fn accept(mut transport: Transport) -> (Self, ClientPayload) {
        let server_static = KeyPair::generate();
        let server_ephemeral = KeyPair::generate();
        let mut state = HandshakeState::new(&WA_MAGIC);
        let mut decoder = FrameDecoder::new();

        // <- e
        let chunk = transport.recv().await.expect("client hello");
        assert_eq!(&chunk[..4], &WA_MAGIC, "first frame carries the magic");
        let frames = decoder.feed(&chunk[4..]).expect("hello frame");
        let hello = HandshakeMessage::decode(frames[0].as_slice()).expect("hello proto");
        let client_ephemeral: [u8; 32] = hello
            .client_hello
            .expect("client_hello")
            .ephemeral
            .expect("ephemeral")
            .try_into()
            .expect("32 bytes");
        state.authenticate(&client_ephemeral);

        // -> e, ee, s, es
        state.authenticate(&server_ephemeral.public);
        state.mix_key(&server_ephemeral.dh(&client_ephemeral));
        let static_ct = state.encrypt(&server_static.public).expect("static ct");
        state.mix_key(&server_static.dh(&client_ephemeral));
        let payload_ct = state.encrypt(b"intermediate certificate").expect("payload ct");
        let reply = HandshakeMessage {
            client_hello: None,
            server_hello: Some(ServerHello {
                ephemeral: Some(server_ephemeral.public.to_vec()),
                r#static: Some(static_ct),
                payload: Some(payload_ct),
            }),
            client_finish: None,
        }
        .encode_to_vec();
        transport
            .send(encode_frame(&reply).expect("frame"))
            .await
            .expect("send server hello");

        // <- s, se, user payload
        let chunk = transport.recv().await.expect("client finish");
        let frames = decoder.feed(&chunk).expect("finish frame");
        let finish = HandshakeMessage::decode(frames[0].as_slice())
            .expect("finish proto")
            .client_finish
            .expect("client_finish");
        let client_static: [u8; 32] = state
            .decrypt(&finish.r#static.expect("static"))
            .expect("static decrypt")
            .try_into()
            .expect("32 bytes");
        state.mix_key(&server_ephemeral.dh(&client_static));
        let user_payload = state
            .decrypt(&finish.payload.expect("payload"))
            .expect("payload decrypt");
        let payload = ClientPayload::decode(user_payload.as_slice()).expect("client payload");

        let (write_key, read_key) = state.finish_responder();
        (
            Self {
                transport,
                decoder,
                write: GcmCipher::new(&write_key),
                read: GcmCipher::new(&read_key),
                queued: VecDeque::new(),
            },
            payload,
        )
    }

    pub async fn send_node(&mut self, node: &Node) {
        let payload = binary::marshal(node);
        let ciphertext = self.write.encrypt_next(&[], &payload).expect("encrypt");
        self.transport
            .send(encode_frame(&ciphertext).expect("frame"))
            .await
            .expect("send");
    }

    pub async fn recv_node(&mut self) -> Node {
        loop {
            if let Some(frame) = self.queued.pop_front() {
                let plaintext = self.read.decrypt_next(&[], &frame).expect("decrypt");
                return binary::unmarshal(&plaintext).expect("node");
            }
            let chunk = self.transport.recv().await.expect("recv");
            for frame in self.decoder.feed(&chunk).expect("frames") {
                self.queued.push_back(frame);
            }
        }
    }

    /// Replies to an iq with a `result` carrying the given children.
    pub async fn reply_iq(&mut self, request: &Node, children: Vec<Node>) {
        let id = request.attr_str("id").expect("iq id").to_string();
        let reply = Node::new("iq")
            .attr("id", id)
            .attr("type", "result")
            .children(children);
        self.send_node(&reply).await;
    }
}

/// A remote device with full key material, able to act as a Signal peer.
pub struct PeerDevice {
    pub jid: Jid,
    pub identity: KeyPair,
    pub signed_pre_key: SignedPreKey,
    pub pre_key: PreKey,
    pub registration_id: u32,
}

impl PeerDevice {
    pub fn new(user: &str, device: u16) -> Self {
        let identity = KeyPair::generate();
        Self {
            jid: Jid::device(user, device),
            signed_pre_key: SignedPreKey::generate(1, &identity),
            pre_key: PreKey::new(1000 + device as u32),
            registration_id: 4000 + device as u32,
            identity,
        }
    }

    /// The `<user>` node a bundle fetch returns for this device.
    pub fn bundle_node(&self) -> Node {
        Node::new("user")
            .attr("jid", self.jid.clone())
            .child(Node::new("registration").bytes(self.registration_id.to_be_bytes().to_vec()))
            .child(Node::new("identity").bytes(self.identity.public.to_vec()))
            .child(
                Node::new("skey")
                    .child(Node::new("id").bytes(vec![0, 0, 1]))
                    .child(Node::new("value").bytes(self.signed_pre_key.key_pair.public.to_vec()))
                    .child(Node::new("signature").bytes(self.signed_pre_key.signature.to_vec())),
            )
            .child(
                Node::new("key")
                    .child(Node::new("id").bytes(self.pre_key.id.to_be_bytes()[1..].to_vec()))
                    .child(Node::new("value").bytes(self.pre_key.key_pair.public.to_vec())),
            )
    }

    /// A `<device>` entry for a usync reply.
    pub fn device_entry(&self) -> Node {
        let mut node = Node::new("device").attr("id", self.jid.device as i64);
        if self.jid.device != 0 {
            node.set_attr("key-index", "1");
        }
        node
    }
}

/// Builds the usync reply enumerating the given devices grouped by user.
pub fn usync_reply(devices: &[&PeerDevice]) -> Node {
    let mut users: Vec<(String, Vec<Node>)> = Vec::new();
    for device in devices {
        let entry = device.device_entry();
        match users.iter_mut().find(|(user, _)| *user == device.jid.user) {
            Some((_, entries)) => entries.push(entry),
            None => users.push((device.jid.user.clone(), vec![entry])),
        }
    }
    let user_nodes = users
        .into_iter()
        .map(|(user, entries)| {
            Node::new("user")
                .attr("jid", Jid::new(user, "s.whatsapp.net"))
                .child(Node::new("devices").child(Node::new("device-list").children(entries)))
        })
        .collect();
    Node::new("usync").child(Node::new("list").children(user_nodes))
}

/// Event sink feeding a channel the test can drain.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
    pub errors: Arc<Mutex<Vec<(ErrorKind, String)>>>,
}

impl ChannelSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                errors: Arc::new(Mutex::new(Vec::new())),
            }),
            rx,
        )
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    fn on_error(&self, kind: ErrorKind, cause: String) {
        self.errors.lock().expect("errors lock").push((kind, cause));
    }
}
