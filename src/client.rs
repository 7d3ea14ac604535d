//! Session orchestration.
//!
//! A `Client` owns the socket worker, the reader task and the two serial
//! queues (messages, app-state). The reader never blocks on user code:
//! inbound messages hop to the message queue, sync work to the app-state
//! queue, and everything else resolves inline.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use prost::Message as _;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::appstate::{AppStateEngine, AppStateKey, Collection, PatchEntry};
use crate::binary::{self, Node};
use crate::config::{ClientProfile, Config};
use crate::crypto::KeyPair;
use crate::dispatch::{
    build_device_query, build_receipt, build_session_query, pad_message, parse_device_list,
    parse_prekey_bundles, unpad_message, Context, Dispatcher, MessageCipher, RequestRouter,
};
use crate::error::{Error, Result};
use crate::proto::handshake::{platform, AppVersion, UserAgent, WebInfo};
use crate::proto::message::{
    DeviceSentMessage, HistorySyncNotification, HistorySyncType, ProtocolMessage,
    ProtocolMessageType, SenderKeyDistributionHolder,
};
use crate::proto::{ClientPayload, Message};
use crate::socket::{self, SocketEvent, SocketHandle};
use crate::store::{BlobStore, BoxFuture, Device, KeyStore, LocalSignalKeys};
use crate::transport::{TcpTransport, Transport, WebSocketTransport};
use crate::types::{
    server, Event, Jid, MessageEvent, MessageId, MessageInfo, NewChatEvent, PushNameEvent,
    ReceiptType, SharedSink,
};

/// Devices per group we remember as already holding our sender key.
/// An evicted device simply receives a fresh distribution message.
const GROUP_FANOUT_CAP: usize = 1024;

enum AppStateCommand {
    Pull(Vec<Collection>, oneshot::Sender<Result<()>>),
    Push(Collection, Vec<PatchEntry>, oneshot::Sender<Result<()>>),
    AddKey(AppStateKey),
}

pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Config,
    device: StdMutex<Device>,
    store: Arc<dyn KeyStore + Send + Sync>,
    blobs: Arc<dyn BlobStore>,
    sink: SharedSink,
    router: Arc<RequestRouter>,
    cipher: MessageCipher,
    socket: StdMutex<Option<SocketHandle>>,
    /// Bumped per connect; tasks from older sessions check it and bail.
    session_epoch: AtomicU64,
    online: AtomicBool,
    /// Latch so teardown runs once per session.
    closed: AtomicBool,
    /// Serializes outbound message assembly (fanout + session state).
    send_lock: tokio::sync::Mutex<()>,
    appstate_tx: StdMutex<Option<mpsc::UnboundedSender<AppStateCommand>>>,
    history_timer: StdMutex<Option<tokio::task::JoinHandle<()>>>,
    group_fanout: StdMutex<HashMap<String, VecDeque<Jid>>>,
}

impl Client {
    pub fn new(
        config: Config,
        device: Device,
        store: Arc<dyn KeyStore + Send + Sync>,
        blobs: Arc<dyn BlobStore>,
        sink: SharedSink,
    ) -> Self {
        let local = LocalSignalKeys {
            identity: device.identity_key.clone(),
            registration_id: device.registration_id,
            signed_pre_key: device.signed_pre_key.clone(),
        };
        let router = Arc::new(RequestRouter::new(config.iq_timeout));
        Self {
            inner: Arc::new(ClientInner {
                cipher: MessageCipher::new(store.clone(), local),
                config,
                device: StdMutex::new(device),
                store,
                blobs,
                sink,
                router,
                socket: StdMutex::new(None),
                session_epoch: AtomicU64::new(0),
                online: AtomicBool::new(false),
                closed: AtomicBool::new(true),
                send_lock: tokio::sync::Mutex::new(()),
                appstate_tx: StdMutex::new(None),
                history_timer: StdMutex::new(None),
                group_fanout: StdMutex::new(HashMap::new()),
            }),
        }
    }

    /// Connects using the profile's transport.
    pub async fn connect(&self) -> Result<()> {
        let transport = match self.inner.config.profile {
            ClientProfile::Web => {
                let cfg = &self.inner.config;
                let ws = match &cfg.proxy {
                    Some(proxy) => {
                        WebSocketTransport::connect_via_proxy(
                            &cfg.web_endpoint,
                            &cfg.web_origin,
                            &cfg.web_host,
                            proxy,
                        )
                        .await?
                    }
                    None => {
                        WebSocketTransport::connect(
                            &cfg.web_endpoint,
                            &cfg.web_origin,
                            &cfg.web_host,
                        )
                        .await?
                    }
                };
                Transport::WebSocket(ws)
            }
            ClientProfile::Mobile => {
                Transport::Tcp(TcpTransport::connect(&self.inner.config.mobile_endpoint).await?)
            }
        };
        self.connect_with_transport(transport).await
    }

    /// Connects over an already-established transport. Tests and
    /// simulations drive this with the in-memory transport.
    pub async fn connect_with_transport(&self, transport: Transport) -> Result<()> {
        if self.inner.socket.lock().expect("socket lock").is_some() {
            return Err(Error::Transport("already connected".into()));
        }

        let payload = self.inner.client_payload();
        let noise_key = self
            .inner
            .device
            .lock()
            .expect("device lock")
            .noise_key
            .clone();
        let (handle, events, _server_payload) = socket::connect(
            transport,
            &noise_key,
            KeyPair::generate(),
            &payload,
            self.inner.config.handshake_timeout,
        )
        .await?;

        let epoch = self.inner.session_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.socket.lock().expect("socket lock") = Some(handle);
        self.inner.closed.store(false, Ordering::SeqCst);

        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let ctx: Arc<dyn Context> = self.inner.clone();
        let dispatcher = Dispatcher::new(
            self.inner.router.clone(),
            ctx,
            self.inner.sink.clone(),
            message_tx,
        );

        self.ensure_appstate_worker();
        tokio::spawn(run_reader(self.inner.clone(), events, dispatcher, epoch));
        tokio::spawn(run_message_worker(self.inner.clone(), message_rx, epoch));
        tokio::spawn(run_keepalive(self.inner.clone(), epoch));

        info!(profile = ?self.inner.config.profile, "session reached transport phase");
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.inner.shutdown(None);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.socket.lock().expect("socket lock").is_some()
    }

    /// The registered account JID, if any.
    pub fn jid(&self) -> Option<Jid> {
        self.inner.device.lock().expect("device lock").jid.clone()
    }

    /// Marks the device as registered. Registration flows themselves are
    /// out of scope; embedders restore the JID from their store.
    pub fn set_jid(&self, jid: Jid) {
        self.inner.device.lock().expect("device lock").jid = Some(jid);
    }

    /// Sends one text message to a user, fanning out to every device of
    /// both sides.
    pub async fn send_text(&self, to: &Jid, text: &str) -> Result<MessageId> {
        let _guard = self.inner.send_lock.lock().await;
        let own = self.inner.own_jid()?;
        let id = RequestRouter::generate_id();

        let message = Message::text(text);
        let padded = pad_message(&message.encode_to_vec());
        let device_copy = Message {
            device_sent_message: Some(Box::new(DeviceSentMessage {
                destination_jid: Some(to.to_primary().to_string()),
                message: Some(Box::new(message)),
            })),
            ..Default::default()
        };
        let padded_copy = pad_message(&device_copy.encode_to_vec());

        let primaries = vec![own.to_primary(), to.to_primary()];
        let mut recipients = primaries.clone();
        recipients.extend(self.inner.query_devices(&primaries, true).await?);
        recipients.retain(|jid| !(jid.user == own.user && jid.device == own.device));
        self.inner.ensure_sessions(&recipients).await?;

        let mut to_nodes = Vec::with_capacity(recipients.len());
        for recipient in &recipients {
            let plaintext = if recipient.user == own.user {
                &padded_copy
            } else {
                &padded
            };
            let sealed = self.inner.cipher.encrypt_for(recipient, plaintext)?;
            to_nodes.push(
                Node::new("to").attr("jid", recipient.clone()).child(
                    Node::new("enc")
                        .attr("v", "2")
                        .attr("type", sealed.kind.as_attr())
                        .bytes(sealed.serialized),
                ),
            );
        }

        let node = Node::new("message")
            .attr("id", id.clone())
            .attr("to", to.to_primary())
            .attr("type", "text")
            .attr("t", unix_now() as i64)
            .child(Node::new("participants").children(to_nodes));
        self.inner.send_node(node)?;
        Ok(id)
    }

    /// Sends one text message to a group, distributing our sender key to
    /// devices that do not hold it yet.
    pub async fn send_group_text(
        &self,
        group: &Jid,
        participants: &[Jid],
        text: &str,
    ) -> Result<MessageId> {
        let _guard = self.inner.send_lock.lock().await;
        let own = self.inner.own_jid()?;
        let id = RequestRouter::generate_id();

        let distribution = self.inner.cipher.ensure_outbound_sender_key(group, &own)?;
        let padded = pad_message(&Message::text(text).encode_to_vec());
        let group_ciphertext = self.inner.cipher.group_encrypt(group, &own, &padded)?;

        let devices = self.inner.query_devices(participants, false).await?;
        let missing = self.inner.devices_missing_sender_key(group, &devices, &own);
        self.inner.ensure_sessions(&missing).await?;

        let skdm_container = Message {
            sender_key_distribution_message: Some(SenderKeyDistributionHolder {
                group_id: Some(group.to_string()),
                axolotl_sender_key_distribution_message: Some(distribution),
            }),
            ..Default::default()
        };
        let padded_skdm = pad_message(&skdm_container.encode_to_vec());

        let mut to_nodes = Vec::with_capacity(missing.len());
        for recipient in &missing {
            let sealed = self.inner.cipher.encrypt_for(recipient, &padded_skdm)?;
            to_nodes.push(
                Node::new("to").attr("jid", recipient.clone()).child(
                    Node::new("enc")
                        .attr("v", "2")
                        .attr("type", sealed.kind.as_attr())
                        .bytes(sealed.serialized),
                ),
            );
        }
        self.inner.mark_sender_key_delivered(group, &missing);

        let mut node = Node::new("message")
            .attr("id", id.clone())
            .attr("to", group.clone())
            .attr("type", "text")
            .attr("t", unix_now() as i64);
        if !to_nodes.is_empty() {
            node.push_child(Node::new("participants").children(to_nodes));
        }
        node.push_child(
            Node::new("enc")
                .attr("v", "2")
                .attr("type", "skmsg")
                .bytes(group_ciphertext),
        );
        self.inner.send_node(node)?;
        Ok(id)
    }

    /// Pushes a mute toggle through app-state sync.
    pub async fn mute_chat(&self, jid: &Jid, muted: bool, end_timestamp: i64) -> Result<()> {
        self.push_app_state(
            Collection::RegularHigh,
            vec![PatchEntry::mute(jid, muted, end_timestamp)],
        )
        .await
    }

    /// Pushes arbitrary patch entries to one collection.
    pub async fn push_app_state(
        &self,
        collection: Collection,
        entries: Vec<PatchEntry>,
    ) -> Result<()> {
        self.ensure_appstate_worker();
        let (tx, rx) = oneshot::channel();
        self.inner
            .appstate_sender()?
            .send(AppStateCommand::Push(collection, entries, tx))
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Pulls the given collections from the server.
    pub async fn pull_app_state(&self, collections: &[Collection]) -> Result<()> {
        self.ensure_appstate_worker();
        let (tx, rx) = oneshot::channel();
        self.inner
            .appstate_sender()?
            .send(AppStateCommand::Pull(collections.to_vec(), tx))
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    fn ensure_appstate_worker(&self) {
        let mut guard = self.inner.appstate_tx.lock().expect("appstate lock");
        if guard.is_some() {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *guard = Some(tx);
        let ctx: Arc<dyn Context> = self.inner.clone();
        let engine = AppStateEngine::new(
            self.inner.store.clone(),
            self.inner.blobs.clone(),
            ctx,
            self.inner.sink.clone(),
            self.inner.config.profile == ClientProfile::Web,
        );
        tokio::spawn(run_appstate_worker(
            rx,
            engine,
            self.inner.config.sync_pull_timeout,
        ));
    }
}

impl Context for ClientInner {
    fn send_iq(&self, node: Node) -> BoxFuture<'_, Result<Node>> {
        Box::pin(self.do_send_iq(node))
    }

    fn send_node(&self, node: Node) -> Result<()> {
        ClientInner::send_node(self, node)
    }
}

impl ClientInner {
    fn client_payload(&self) -> ClientPayload {
        let device = self.device.lock().expect("device lock");
        let mut payload = ClientPayload {
            passive: Some(false),
            user_agent: Some(UserAgent {
                platform: Some(platform::WEB),
                app_version: Some(AppVersion {
                    primary: Some(2),
                    secondary: Some(3000),
                    tertiary: Some(1015901307),
                }),
                release_channel: Some(0),
                os_version: Some("10.15.7".to_string()),
                device: Some("Desktop".to_string()),
                locale: Some("en".to_string()),
                ..Default::default()
            }),
            web_info: Some(WebInfo {
                version: Some("2.3000.1015901307".to_string()),
                web_sub_platform: Some(0),
            }),
            push_name: device.push_name.clone(),
            connect_type: Some(1),
            connect_reason: Some(1),
            connect_attempt_count: Some(0),
            oc: Some(false),
            ..Default::default()
        };
        match &device.jid {
            Some(jid) => {
                payload.username = jid.user.parse().ok();
                payload.device = Some(jid.device as u32);
            }
            None => {
                payload.device_pairing_data = Some(device.pairing_data());
            }
        }
        payload
    }

    fn own_jid(&self) -> Result<Jid> {
        self.device
            .lock()
            .expect("device lock")
            .jid
            .clone()
            .ok_or_else(|| Error::Protocol("device is not registered".into()))
    }

    fn appstate_sender(&self) -> Result<mpsc::UnboundedSender<AppStateCommand>> {
        self.appstate_tx
            .lock()
            .expect("appstate lock")
            .clone()
            .ok_or(Error::SessionClosed)
    }

    fn send_node(&self, node: Node) -> Result<()> {
        let payload = binary::marshal(&node);
        let guard = self.socket.lock().expect("socket lock");
        match guard.as_ref() {
            Some(handle) => handle.send_payload(payload),
            None => Err(Error::SessionClosed),
        }
    }

    async fn do_send_iq(&self, mut node: Node) -> Result<Node> {
        let id = RequestRouter::generate_id();
        node.set_attr("id", id.clone());
        if node.attrs.get("to").is_none() {
            node.set_attr("to", Jid::new("", server::WHATSAPP));
        }
        // Register before sending so a fast reply cannot race the waiter.
        let rx = self.router.register(&id);
        if let Err(e) = self.send_node(node) {
            self.router.cancel(&id);
            return Err(e);
        }
        let reply = self.router.wait(&id, rx).await?;
        if reply.attr_str("type") == Some("error") {
            let code = reply
                .find_child("error")
                .and_then(|e| e.attr_str("code"))
                .unwrap_or("unknown");
            return Err(Error::Protocol(format!("iq error {code}")));
        }
        Ok(reply)
    }

    fn shutdown(&self, error: Option<Error>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.socket.lock().expect("socket lock").take() {
            handle.close();
        }
        self.online.store(false, Ordering::SeqCst);
        self.router.fail_all();
        if let Some(e) = error {
            self.sink.on_error(e.kind(), e.to_string());
        }
        self.sink.on_close();
    }

    /// Enumerates recipient devices through a `usync` query. With
    /// `exclude_primaries` the reply's device-0 entries are dropped (the
    /// caller already has the primaries in hand).
    async fn query_devices(&self, users: &[Jid], exclude_primaries: bool) -> Result<Vec<Jid>> {
        let own = self.own_jid()?;
        let query = build_device_query(users, &RequestRouter::generate_id());
        let reply = self.do_send_iq(query).await?;
        Ok(parse_device_list(&reply, &own, exclude_primaries))
    }

    /// Fetches prekey bundles for addresses without sessions and builds
    /// them lazily.
    async fn ensure_sessions(&self, jids: &[Jid]) -> Result<()> {
        let mut missing = Vec::new();
        for jid in jids {
            if !self.cipher.has_session(jid)? {
                missing.push(jid.clone());
            }
        }
        if missing.is_empty() {
            return Ok(());
        }
        let reply = self.do_send_iq(build_session_query(&missing)).await?;
        for (jid, bundle) in parse_prekey_bundles(&reply)? {
            self.cipher.create_session(&jid, &bundle)?;
        }
        Ok(())
    }

    fn devices_missing_sender_key(&self, group: &Jid, devices: &[Jid], own: &Jid) -> Vec<Jid> {
        let fanout = self.group_fanout.lock().expect("fanout lock");
        let delivered = fanout.get(&group.to_string());
        devices
            .iter()
            .filter(|d| !(d.user == own.user && d.device == own.device))
            .filter(|d| delivered.map_or(true, |set| !set.contains(d)))
            .cloned()
            .collect()
    }

    fn mark_sender_key_delivered(&self, group: &Jid, devices: &[Jid]) {
        let mut fanout = self.group_fanout.lock().expect("fanout lock");
        let set = fanout.entry(group.to_string()).or_default();
        for device in devices {
            if !set.contains(device) {
                if set.len() >= GROUP_FANOUT_CAP {
                    set.pop_front();
                }
                set.push_back(device.clone());
            }
        }
    }

    /// Full inbound message pipeline; runs on the message queue.
    async fn process_message(self: &Arc<Self>, node: Node) {
        let Some(id) = node.attr_str("id").map(str::to_string) else {
            warn!("message without id");
            return;
        };
        let Some(from) = node.attr_jid("from") else {
            warn!(id, "message without from");
            return;
        };
        let participant = node.attr_jid("participant");
        let own = self
            .device
            .lock()
            .expect("device lock")
            .jid
            .clone()
            .unwrap_or_default();

        let is_group = from.is_group() || from.is_broadcast();
        let (chat, sender) = if is_group {
            match participant.clone() {
                Some(p) => (from.clone(), p),
                None => {
                    warn!(id, "group message without participant");
                    return;
                }
            }
        } else {
            (from.clone(), from.clone())
        };
        let from_me = sender.same_user(&own);

        let info = MessageInfo {
            id: id.clone(),
            chat: chat.clone(),
            sender: sender.clone(),
            from_me,
            timestamp: node.attr_int("t").unwrap_or(0) as u64,
            push_name: node.attr_str("notify").map(str::to_string),
        };

        for enc in node.find_children("enc") {
            let Some(enc_type) = enc.attr_str("type") else {
                continue;
            };
            let Some(payload) = enc.content_bytes() else {
                continue;
            };
            let decrypted = if enc_type == "skmsg" {
                self.cipher.group_decrypt(&chat, &sender, payload)
            } else {
                self.cipher.decrypt(&sender, enc_type, payload)
            };
            match decrypted {
                Ok(padded) => {
                    if let Err(e) = self.handle_plaintext(&info, &padded).await {
                        warn!(id, error = %e, "failed to handle decrypted message");
                    }
                }
                Err(e) => {
                    let cause = e.to_string();
                    if cause.contains("duplicate") {
                        debug!(id, "dropping replayed message");
                        continue;
                    }
                    // Per-message failure: drop, report, receipt anyway.
                    // A retry receipt could be scheduled here.
                    warn!(id, enc_type, error = %cause, "message decryption failed");
                    self.sink.on_error(e.kind(), cause);
                }
            }
        }

        let receipt_type = if node.attr_str("category") == Some("peer") {
            ReceiptType::PeerMessage
        } else if from_me {
            ReceiptType::Sender
        } else if !self.online.load(Ordering::SeqCst) {
            ReceiptType::Inactive
        } else {
            ReceiptType::Delivered
        };
        let participant_ref = is_group.then_some(&sender);
        let receipt = build_receipt(&id, &chat, participant_ref, receipt_type);
        if let Err(e) = self.send_node(receipt) {
            debug!(id, error = %e, "could not send delivery receipt");
        }
    }

    async fn handle_plaintext(self: &Arc<Self>, info: &MessageInfo, padded: &[u8]) -> Result<()> {
        let raw = unpad_message(padded)?;
        let message = Message::decode(raw)
            .map_err(|e| Error::Protocol(format!("bad message payload: {e}")))?
            .unbox();

        if let Some(holder) = &message.sender_key_distribution_message {
            let group_id = holder.group_id.clone().unwrap_or_default();
            if let Some(skdm) = &holder.axolotl_sender_key_distribution_message {
                self.cipher
                    .install_sender_key(&group_id, &info.sender, skdm)?;
                debug!(group = group_id, sender = %info.sender, "installed sender key");
            }
        }

        if let Some(protocol) = &message.protocol_message {
            self.handle_protocol_message(info, protocol).await?;
        }

        if let Some(text) = message.conversation {
            self.sink.on_event(Event::Message(MessageEvent {
                info: info.clone(),
                text: Some(text),
            }));
        }
        Ok(())
    }

    async fn handle_protocol_message(
        self: &Arc<Self>,
        info: &MessageInfo,
        protocol: &ProtocolMessage,
    ) -> Result<()> {
        match protocol.kind() {
            Some(ProtocolMessageType::AppStateSyncKeyShare) => {
                let Some(share) = &protocol.app_state_sync_key_share else {
                    return Ok(());
                };
                let sender = self.appstate_sender()?;
                for key in &share.keys {
                    let Some(key_id) = key.key_id.as_ref().and_then(|k| k.key_id.clone()) else {
                        continue;
                    };
                    let Some(data) = key
                        .key_data
                        .as_ref()
                        .and_then(|d| d.key_data.as_deref())
                        .and_then(|d| <[u8; 32]>::try_from(d).ok())
                    else {
                        continue;
                    };
                    let timestamp = key
                        .key_data
                        .as_ref()
                        .and_then(|d| d.timestamp)
                        .unwrap_or(0);
                    let _ = sender.send(AppStateCommand::AddKey(AppStateKey {
                        key_id,
                        key_data: data,
                        timestamp,
                    }));
                }
                // Fresh keys unlock the initial sync.
                let (tx, _rx) = oneshot::channel();
                let _ = sender.send(AppStateCommand::Pull(Collection::ALL.to_vec(), tx));
            }
            Some(ProtocolMessageType::HistorySyncNotification) => {
                if let Some(notification) = &protocol.history_sync_notification {
                    self.handle_history_sync(info, notification).await?;
                }
            }
            Some(ProtocolMessageType::Revoke) => {
                self.sink.on_event(Event::Notification {
                    kind: "revoke".to_string(),
                });
            }
            _ => {}
        }
        Ok(())
    }

    async fn handle_history_sync(
        self: &Arc<Self>,
        info: &MessageInfo,
        notification: &HistorySyncNotification,
    ) -> Result<()> {
        let blob = self.blobs.download(&notification.blob_ref()).await?;
        let raw = inflate(&blob)?;
        let history = crate::proto::message::HistorySync::decode(raw.as_slice())
            .map_err(|e| Error::Protocol(format!("bad history sync: {e}")))?;

        match history.kind() {
            HistorySyncType::InitialBootstrap | HistorySyncType::Recent | HistorySyncType::Full => {
                for conversation in &history.conversations {
                    let Ok(jid) = conversation.id.parse::<Jid>() else {
                        continue;
                    };
                    self.sink.on_event(Event::NewChat(NewChatEvent {
                        jid,
                        name: conversation.display_name.clone(),
                        message_count: conversation.unread_count.unwrap_or(0) as usize,
                    }));
                }
            }
            HistorySyncType::PushName => {
                for pushname in &history.pushnames {
                    let Some(jid) = pushname.id.as_deref().and_then(|s| s.parse::<Jid>().ok())
                    else {
                        continue;
                    };
                    self.sink.on_event(Event::PushName(PushNameEvent {
                        jid,
                        name: pushname.pushname.clone().unwrap_or_default(),
                    }));
                }
            }
            _ => {}
        }

        let receipt = build_receipt(&info.id, &info.chat, None, ReceiptType::HistorySync);
        let _ = self.send_node(receipt);
        self.arm_history_idle_timer();
        Ok(())
    }

    /// (Re)arms the idle timer that finalizes a history sync after the
    /// chunk stream goes quiet.
    fn arm_history_idle_timer(self: &Arc<Self>) {
        let mut guard = self.history_timer.lock().expect("history lock");
        if let Some(old) = guard.take() {
            old.abort();
        }
        let inner = self.clone();
        let idle = self.config.history_idle_timeout;
        *guard = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            inner.sink.on_event(Event::HistorySyncComplete);
        }));
    }
}

async fn run_reader(
    inner: Arc<ClientInner>,
    mut events: mpsc::UnboundedReceiver<SocketEvent>,
    dispatcher: Dispatcher,
    epoch: u64,
) {
    while let Some(event) = events.recv().await {
        if inner.session_epoch.load(Ordering::SeqCst) != epoch {
            debug!("dropping event from stale session");
            return;
        }
        match event {
            SocketEvent::Frame(payload) => match binary::unmarshal(&payload) {
                Ok(node) => {
                    if node.tag == "success" {
                        inner.online.store(true, Ordering::SeqCst);
                    }
                    dispatcher.dispatch(node);
                }
                // Malformed node: drop it, keep the session.
                Err(e) => {
                    warn!(error = %e, "failed to decode inbound frame");
                    inner.sink.on_error(e.kind(), e.to_string());
                }
            },
            SocketEvent::Closed(error) => {
                inner.shutdown(error);
                return;
            }
        }
    }
}

async fn run_message_worker(
    inner: Arc<ClientInner>,
    mut rx: mpsc::UnboundedReceiver<Node>,
    epoch: u64,
) {
    while let Some(node) = rx.recv().await {
        if inner.session_epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        inner.process_message(node).await;
    }
}

async fn run_appstate_worker(
    mut rx: mpsc::UnboundedReceiver<AppStateCommand>,
    mut engine: AppStateEngine,
    pull_timeout: std::time::Duration,
) {
    while let Some(command) = rx.recv().await {
        match command {
            AppStateCommand::Pull(collections, reply) => {
                let result =
                    match tokio::time::timeout(pull_timeout, engine.pull(&collections)).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::RequestTimeout {
                            id: "app-state-pull".to_string(),
                        }),
                    };
                let _ = reply.send(result);
            }
            AppStateCommand::Push(collection, entries, reply) => {
                let _ = reply.send(engine.push(collection, entries).await);
            }
            AppStateCommand::AddKey(key) => {
                if let Err(e) = engine.add_app_state_key(key) {
                    warn!(error = %e, "failed to store app state key");
                }
            }
        }
    }
}

async fn run_keepalive(inner: Arc<ClientInner>, epoch: u64) {
    let mut interval = tokio::time::interval(inner.config.keepalive_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;
    loop {
        interval.tick().await;
        if inner.session_epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        if inner.socket.lock().expect("socket lock").is_none() {
            return;
        }
        let ping = Node::new("iq")
            .attr("type", "get")
            .attr("xmlns", "w:p")
            .child(Node::new("ping"));
        if inner.do_send_iq(ping).await.is_err() {
            warn!("keepalive ping failed, closing session");
            inner.shutdown(Some(Error::Transport("keepalive timeout".into())));
            return;
        }
    }
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read;
    let mut out = Vec::new();
    flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| Error::Protocol(format!("inflate failed: {e}")))?;
    Ok(out)
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
