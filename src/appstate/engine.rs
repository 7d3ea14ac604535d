//! The app-state sync engine.
//!
//! Pushes local actions and pulls the server's authoritative view, one
//! collection at a time. The owning task serializes every operation, so
//! a collection is never applied concurrently; MAC mismatches reset the
//! collection and retry up to three times before surfacing.

use std::collections::HashMap;
use std::sync::Arc;

use prost::Message as _;
use tracing::{debug, warn};

use crate::appstate::hash_state::{Collection, HashState};
use crate::appstate::keys::AppStateKey;
use crate::appstate::patch::{
    open_mutation, patch_mac, seal_mutation, snapshot_mac, OpenedMutation, VALUE_MAC_LEN,
};
use crate::appstate::AppStateAction;
use crate::binary::Node;
use crate::dispatch::Context;
use crate::error::{Error, Result};
use crate::proto::sync::{
    SyncActionData, SyncActionValue, SyncdMutations, SyncdOperation, SyncdPatch, SyncdSnapshot,
};
use crate::store::{BlobStore, KeyStore};
use crate::types::{AppStateActionEvent, Event, SharedSink};

const PULL_ATTEMPTS: u32 = 3;

/// One local action queued for upload.
pub struct PatchEntry {
    pub index: Vec<String>,
    pub operation: SyncdOperation,
    pub value: SyncActionValue,
}

impl PatchEntry {
    /// Mute/unmute a chat.
    pub fn mute(jid: &crate::types::Jid, muted: bool, end_timestamp: i64) -> Self {
        Self {
            index: vec!["mute".into(), jid.to_string()],
            operation: SyncdOperation::Set,
            value: SyncActionValue {
                mute_action: Some(crate::proto::sync::MuteAction {
                    muted: Some(muted),
                    mute_end_timestamp: Some(end_timestamp),
                }),
                ..Default::default()
            },
        }
    }

    /// Pin/unpin a chat.
    pub fn pin(jid: &crate::types::Jid, pinned: bool) -> Self {
        Self {
            index: vec!["pin_v1".into(), jid.to_string()],
            operation: SyncdOperation::Set,
            value: SyncActionValue {
                pin_action: Some(crate::proto::sync::PinAction { pinned: Some(pinned) }),
                ..Default::default()
            },
        }
    }

    /// Archive/unarchive a chat.
    pub fn archive(jid: &crate::types::Jid, archived: bool) -> Self {
        Self {
            index: vec!["archive".into(), jid.to_string()],
            operation: SyncdOperation::Set,
            value: SyncActionValue {
                archive_chat_action: Some(crate::proto::sync::ArchiveChatAction {
                    archived: Some(archived),
                }),
                ..Default::default()
            },
        }
    }

    /// Star/unstar a message.
    pub fn star(chat: &crate::types::Jid, message_id: &str, starred: bool) -> Self {
        Self {
            index: vec![
                "star".into(),
                chat.to_string(),
                message_id.to_string(),
                "0".into(),
                "0".into(),
            ],
            operation: SyncdOperation::Set,
            value: SyncActionValue {
                star_action: Some(crate::proto::sync::StarAction { starred: Some(starred) }),
                ..Default::default()
            },
        }
    }

    /// Mark a chat read or unread.
    pub fn mark_read(jid: &crate::types::Jid, read: bool) -> Self {
        Self {
            index: vec!["markChatAsRead".into(), jid.to_string()],
            operation: SyncdOperation::Set,
            value: SyncActionValue {
                mark_chat_as_read_action: Some(crate::proto::sync::MarkChatAsReadAction {
                    read: Some(read),
                }),
                ..Default::default()
            },
        }
    }
}

pub struct AppStateEngine {
    store: Arc<dyn KeyStore + Send + Sync>,
    blobs: Arc<dyn BlobStore>,
    ctx: Arc<dyn Context>,
    sink: SharedSink,
    /// Web profile replays pushed patches locally; mobile does not.
    read_back_pushes: bool,
    attempts: HashMap<Collection, u32>,
}

impl AppStateEngine {
    pub fn new(
        store: Arc<dyn KeyStore + Send + Sync>,
        blobs: Arc<dyn BlobStore>,
        ctx: Arc<dyn Context>,
        sink: SharedSink,
        read_back_pushes: bool,
    ) -> Self {
        Self {
            store,
            blobs,
            ctx,
            sink,
            read_back_pushes,
            attempts: HashMap::new(),
        }
    }

    /// Downloads forward state for the given collections, looping on
    /// `has_more_patches` and retrying MAC failures per collection.
    pub async fn pull(&mut self, collections: &[Collection]) -> Result<()> {
        let mut remaining: Vec<Collection> = collections.to_vec();
        while !remaining.is_empty() {
            let mut request_children = Vec::new();
            for collection in &remaining {
                let state = self.load_state(*collection)?;
                request_children.push(state.to_collection_node());
            }
            let sync = Node::new("sync").children(request_children);
            let reply = self
                .ctx
                .send_iq(iq_set(sync))
                .await?;

            let mut next_round = Vec::new();
            for collection_node in collection_nodes(&reply) {
                let Some(name) = collection_node.attr_str("name") else {
                    continue;
                };
                let Ok(collection) = name.parse::<Collection>() else {
                    warn!(name, "ignoring unknown collection in sync reply");
                    continue;
                };
                if collection_node.attr_str("type") == Some("error") {
                    warn!(%collection, "server reported sync error for collection");
                    continue;
                }
                let has_more = collection_node.attr_bool("has_more_patches").unwrap_or(false);

                match self.apply_collection(collection, collection_node).await {
                    Ok(()) => {
                        self.attempts.remove(&collection);
                        if has_more {
                            next_round.push(collection);
                        }
                    }
                    Err(Error::MacMismatch { .. }) => {
                        let tries = self.attempts.entry(collection).or_insert(0);
                        *tries += 1;
                        warn!(%collection, attempt = *tries, "mac mismatch, resetting collection");
                        self.store.put_hash_state(&HashState::new(collection))?;
                        if *tries >= PULL_ATTEMPTS {
                            self.attempts.remove(&collection);
                            return Err(Error::MacMismatch {
                                collection: collection.wire_name().to_string(),
                            });
                        }
                        next_round.push(collection);
                    }
                    Err(e) => return Err(e),
                }
            }
            remaining = next_round;
        }
        Ok(())
    }

    /// Encrypts local actions into a patch, uploads it and persists the
    /// advanced state.
    pub async fn push(&mut self, collection: Collection, entries: Vec<PatchEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let key = self
            .store
            .latest_app_state_key()?
            .ok_or_else(|| Error::Store("no app state sync key available".into()))?;
        let mutation_keys = key.mutation_keys();

        let old_state = self.load_state(collection)?;
        let mut new_state = old_state.clone();
        new_state.version += 1;

        let timestamp = unix_now();
        let mut mutations = Vec::with_capacity(entries.len());
        let mut value_macs = Vec::with_capacity(entries.len());
        let mut opened = Vec::with_capacity(entries.len());
        for entry in &entries {
            let mut value = entry.value.clone();
            value.timestamp = Some(timestamp);
            let action = SyncActionData {
                index: Some(encode_index(&entry.index).into_bytes()),
                value: Some(value),
                padding: Some(Vec::new()),
                version: Some(action_version(collection)),
            };
            let sealed = seal_mutation(&mutation_keys, &key.key_id, entry.operation, &action);
            new_state.apply(entry.operation, &sealed.index_mac, &sealed.value_mac);
            value_macs.push(sealed.value_mac.to_vec());
            opened.push((entry.index.clone(), action));
            mutations.push(sealed.mutation);
        }

        let snap_mac = snapshot_mac(
            &new_state.hash,
            new_state.version,
            collection,
            &mutation_keys.snapshot_mac_key,
        );
        let p_mac = patch_mac(
            &snap_mac,
            &value_macs,
            new_state.version,
            collection,
            &mutation_keys.patch_mac_key,
        );
        let patch = SyncdPatch {
            version: Some(crate::proto::sync::SyncdVersion {
                version: Some(new_state.version),
            }),
            mutations,
            external_mutations: None,
            snapshot_mac: Some(snap_mac.to_vec()),
            patch_mac: Some(p_mac.to_vec()),
            key_id: Some(crate::proto::sync::KeyId {
                id: Some(key.key_id.clone()),
            }),
        };

        let collection_node = Node::new("collection")
            .attr("name", collection.wire_name())
            .attr("version", old_state.version)
            .attr("return_snapshot", false)
            .child(Node::new("patch").bytes(patch.encode_to_vec()));
        let sync = Node::new("sync").child(collection_node);
        self.ctx.send_iq(iq_set(sync)).await?;

        self.store.put_hash_state(&new_state)?;
        debug!(%collection, version = new_state.version, "pushed app state patch");

        if self.read_back_pushes {
            for (index, action) in opened {
                self.emit_action(collection, index, &action);
            }
        }
        Ok(())
    }

    /// Stores a freshly shared sync key.
    pub fn add_app_state_key(&self, key: AppStateKey) -> Result<()> {
        self.store.put_app_state_key(key)
    }

    fn load_state(&self, collection: Collection) -> Result<HashState> {
        Ok(self
            .store
            .get_hash_state(collection)?
            .unwrap_or_else(|| HashState::new(collection)))
    }

    async fn apply_collection(&mut self, collection: Collection, node: &Node) -> Result<()> {
        let mut state = self.load_state(collection)?;
        let mut actions = Vec::new();

        if let Some(snapshot_node) = node.find_child("snapshot") {
            let reference = crate::proto::sync::ExternalBlobReference::decode(
                snapshot_node
                    .content_bytes()
                    .ok_or_else(|| Error::Protocol("snapshot node without content".into()))?,
            )
            .map_err(|e| Error::Protocol(format!("bad snapshot reference: {e}")))?;
            let blob = self.blobs.download(&reference).await?;
            let snapshot = SyncdSnapshot::decode(blob.as_slice())
                .map_err(|e| Error::Protocol(format!("bad snapshot payload: {e}")))?;
            state = self.apply_snapshot(collection, snapshot, &mut actions)?;
        }

        let patches = node
            .find_child("patches")
            .unwrap_or(node)
            .find_children("patch");
        for patch_node in patches {
            let Some(bytes) = patch_node.content_bytes() else {
                continue;
            };
            let mut patch = SyncdPatch::decode(bytes)
                .map_err(|e| Error::Protocol(format!("bad patch payload: {e}")))?;
            if let Some(reference) = &patch.external_mutations {
                let blob = self.blobs.download(reference).await?;
                let external = SyncdMutations::decode(blob.as_slice())
                    .map_err(|e| Error::Protocol(format!("bad external mutations: {e}")))?;
                patch.mutations.extend(external.mutations);
            }
            self.apply_patch(collection, &mut state, &patch, &mut actions)?;
        }

        self.store.put_hash_state(&state)?;
        for (index, action) in actions {
            self.emit_action(collection, index, &action);
        }
        Ok(())
    }

    fn apply_snapshot(
        &self,
        collection: Collection,
        snapshot: SyncdSnapshot,
        actions: &mut Vec<(Vec<String>, SyncActionData)>,
    ) -> Result<HashState> {
        let keys = self.mutation_keys_for(&snapshot.key_id, collection)?;
        let mut state = HashState::new(collection);
        state.version = snapshot
            .version
            .as_ref()
            .and_then(|v| v.version)
            .unwrap_or(0);

        for record in &snapshot.records {
            let opened = open_mutation(&keys, SyncdOperation::Set, record, collection)?;
            state.apply(SyncdOperation::Set, &opened.index_mac, &opened.value_mac);
            push_action(actions, opened);
        }

        let expected = snapshot_mac(
            &state.hash,
            state.version,
            collection,
            &keys.snapshot_mac_key,
        );
        if snapshot.mac.as_deref() != Some(&expected[..]) {
            return Err(Error::MacMismatch {
                collection: collection.wire_name().to_string(),
            });
        }
        Ok(state)
    }

    fn apply_patch(
        &self,
        collection: Collection,
        state: &mut HashState,
        patch: &SyncdPatch,
        actions: &mut Vec<(Vec<String>, SyncActionData)>,
    ) -> Result<()> {
        let version = patch.version.as_ref().and_then(|v| v.version).unwrap_or(0);
        // Re-applying an already-seen version must not disturb the state.
        if version <= state.version {
            debug!(%collection, version, local = state.version, "skipping stale patch");
            return Ok(());
        }

        let keys = self.mutation_keys_for(&patch.key_id, collection)?;

        let value_macs: Vec<Vec<u8>> = patch
            .mutations
            .iter()
            .filter_map(|m| m.record.as_ref())
            .filter_map(|r| r.value.as_ref())
            .filter_map(|v| v.blob.as_deref())
            .filter(|b| b.len() >= VALUE_MAC_LEN)
            .map(|b| b[b.len() - VALUE_MAC_LEN..].to_vec())
            .collect();
        let expected_patch_mac = patch_mac(
            patch.snapshot_mac.as_deref().unwrap_or_default(),
            &value_macs,
            version,
            collection,
            &keys.patch_mac_key,
        );
        if patch.patch_mac.as_deref() != Some(&expected_patch_mac[..]) {
            return Err(Error::MacMismatch {
                collection: collection.wire_name().to_string(),
            });
        }

        let mut staged = state.clone();
        staged.version = version;
        for mutation in &patch.mutations {
            let record = mutation
                .record
                .as_ref()
                .ok_or_else(|| Error::Protocol("mutation without record".into()))?;
            let opened = open_mutation(&keys, mutation.op(), record, collection)?;
            staged.apply(opened.op, &opened.index_mac, &opened.value_mac);
            push_action(actions, opened);
        }

        let expected_snapshot = snapshot_mac(
            &staged.hash,
            staged.version,
            collection,
            &keys.snapshot_mac_key,
        );
        if patch.snapshot_mac.as_deref() != Some(&expected_snapshot[..]) {
            return Err(Error::MacMismatch {
                collection: collection.wire_name().to_string(),
            });
        }

        *state = staged;
        Ok(())
    }

    fn mutation_keys_for(
        &self,
        key_id: &Option<crate::proto::sync::KeyId>,
        collection: Collection,
    ) -> Result<crate::appstate::keys::MutationKeys> {
        let id = key_id
            .as_ref()
            .and_then(|k| k.id.as_deref())
            .ok_or_else(|| Error::Protocol("sync payload missing key id".into()))?;
        let key = self
            .store
            .get_app_state_key(id)?
            .ok_or_else(|| {
                Error::Store(format!(
                    "unknown app state key {} for {collection}",
                    hex::encode(id)
                ))
            })?;
        Ok(key.mutation_keys())
    }

    fn emit_action(&self, collection: Collection, index: Vec<String>, data: &SyncActionData) {
        let action = data
            .value
            .as_ref()
            .map(AppStateAction::from)
            .unwrap_or(AppStateAction::Unknown);
        self.sink.on_event(Event::AppStateAction(AppStateActionEvent {
            collection: collection.wire_name().to_string(),
            index,
            action,
        }));
    }
}

fn push_action(actions: &mut Vec<(Vec<String>, SyncActionData)>, opened: OpenedMutation) {
    let index = opened
        .action
        .index
        .as_deref()
        .map(parse_index)
        .unwrap_or_default();
    actions.push((index, opened.action));
}

fn iq_set(sync: Node) -> Node {
    Node::new("iq")
        .attr("type", "set")
        .attr("xmlns", "w:sync:app:state")
        .child(sync)
}

fn collection_nodes(reply: &Node) -> Vec<&Node> {
    reply
        .find_children("sync")
        .into_iter()
        .flat_map(|sync| sync.find_children("collection"))
        .collect()
}

/// Protocol version stamped into pushed action data, per collection.
fn action_version(collection: Collection) -> i32 {
    match collection {
        Collection::CriticalBlock => 1,
        Collection::CriticalUnblockLow => 1,
        _ => 2,
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Renders the index strings as the JSON array the protocol expects.
pub fn encode_index(parts: &[String]) -> String {
    let mut out = String::from("[");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('"');
        for c in part.chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                other => out.push(other),
            }
        }
        out.push('"');
    }
    out.push(']');
    out
}

/// Inverse of [`encode_index`] for the simple strings the protocol uses.
pub fn parse_index(bytes: &[u8]) -> Vec<String> {
    let Ok(s) = std::str::from_utf8(bytes) else {
        return Vec::new();
    };
    let inner = s.trim().trim_start_matches('[').trim_end_matches(']');
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in inner.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            if in_string {
                parts.push(std::mem::take(&mut current));
            }
            in_string = !in_string;
        } else if in_string {
            current.push(c);
        }
    }
    parts
}
