//! App-state engine scenarios: push with loopback, snapshot recovery,
//! stale-patch idempotence.

mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use prost::Message as _;

use common::ChannelSink;
use waproto::appstate::{
    patch, AppStateAction, AppStateEngine, AppStateKey, Collection, HashState, MutationKeys,
    PatchEntry,
};
use waproto::binary::Node;
use waproto::dispatch::Context;
use waproto::proto::sync::{
    ExternalBlobReference, KeyId, SyncActionData, SyncActionValue, SyncdOperation, SyncdPatch,
    SyncdSnapshot, SyncdVersion,
};
use waproto::store::{AppStateKeyStore, BoxFuture, HashStateStore, MemoryStore};
use waproto::types::{Event, Jid};
use waproto::{Error, Result};

/// Context stub replaying canned iq results and recording requests.
struct SyncServer {
    requests: Mutex<Vec<Node>>,
    replies: Mutex<VecDeque<Node>>,
}

impl SyncServer {
    fn new(replies: Vec<Node>) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(replies.into()),
        })
    }

    fn request(&self, index: usize) -> Node {
        self.requests.lock().unwrap()[index].clone()
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Context for SyncServer {
    fn send_iq(&self, node: Node) -> BoxFuture<'_, Result<Node>> {
        self.requests.lock().unwrap().push(node);
        let reply = self.replies.lock().unwrap().pop_front();
        Box::pin(async move {
            reply.ok_or_else(|| Error::Protocol("no canned reply left".into()))
        })
    }

    fn send_node(&self, _node: Node) -> Result<()> {
        Ok(())
    }
}

const KEY_ID: [u8; 6] = [0, 0, 0, 0, 0, 7];

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .put_app_state_key(AppStateKey {
            key_id: KEY_ID.to_vec(),
            key_data: [0x42; 32],
            timestamp: 1,
        })
        .expect("seed key");
    store
}

fn make_engine(
    store: Arc<MemoryStore>,
    server: Arc<SyncServer>,
) -> (AppStateEngine, tokio::sync::mpsc::UnboundedReceiver<Event>) {
    let (sink, events) = ChannelSink::new();
    let engine = AppStateEngine::new(store.clone(), store, server, sink, true);
    (engine, events)
}

fn iq_result() -> Node {
    Node::new("iq").attr("type", "result")
}

/// Pushing a mute with empty local state produces a version-1 patch and
/// the loopback reports the mute action.
#[tokio::test]
async fn mute_push_creates_version_one_patch() {
    let store = seeded_store();
    let server = SyncServer::new(vec![iq_result()]);
    let (mut engine, mut events) = make_engine(store.clone(), server.clone());

    let chat = Jid::new("15551234567", "s.whatsapp.net");
    engine
        .push(
            Collection::RegularHigh,
            vec![PatchEntry::mute(&chat, true, 0)],
        )
        .await
        .expect("push");

    // wire shape: <iq><sync><collection name version=0><patch>…
    let request = server.request(0);
    let collection = request.find_path(&["sync", "collection"]).unwrap();
    assert_eq!(collection.attr_str("name"), Some("regular_high"));
    assert_eq!(collection.attr_int("version"), Some(0));
    let patch_bytes = collection.find_child("patch").unwrap().content_bytes().unwrap();
    let patch = SyncdPatch::decode(patch_bytes).unwrap();
    assert_eq!(patch.version.as_ref().and_then(|v| v.version), Some(1));
    assert_eq!(patch.mutations.len(), 1);
    assert_eq!(
        patch.key_id.as_ref().and_then(|k| k.id.as_deref()),
        Some(&KEY_ID[..])
    );

    // state advanced and persisted
    let state = store.get_hash_state(Collection::RegularHigh).unwrap().unwrap();
    assert_eq!(state.version, 1);
    assert_eq!(state.index_value_map.len(), 1);

    // pull-loopback fires the same action
    match events.recv().await.expect("loopback event") {
        Event::AppStateAction(action) => {
            assert_eq!(action.collection, "regular_high");
            assert_eq!(action.index[0], "mute");
            assert_eq!(
                action.action,
                AppStateAction::Mute {
                    muted: true,
                    end_timestamp: 0
                }
            );
        }
        other => panic!("unexpected event {other:?}"),
    }
}

fn mutation_keys() -> MutationKeys {
    MutationKeys::from_key_data(&[0x42; 32])
}

fn sample_action(jid: &str) -> SyncActionData {
    SyncActionData {
        index: Some(format!(r#"["archive","{jid}"]"#).into_bytes()),
        value: Some(SyncActionValue {
            timestamp: Some(1_700_000_000),
            archive_chat_action: Some(waproto::proto::sync::ArchiveChatAction {
                archived: Some(true),
            }),
            ..Default::default()
        }),
        padding: Some(vec![]),
        version: Some(2),
    }
}

/// Builds a server-side snapshot with one mutation; `corrupt_mac` flips
/// the advertised MAC.
fn snapshot_blob(version: u64, corrupt_mac: bool) -> Vec<u8> {
    let keys = mutation_keys();
    let sealed = patch::seal_mutation(
        &keys,
        &KEY_ID,
        SyncdOperation::Set,
        &sample_action("15557770001@s.whatsapp.net"),
    );
    let mut state = HashState::new(Collection::Regular);
    state.version = version;
    state.apply(SyncdOperation::Set, &sealed.index_mac, &sealed.value_mac);
    let mut mac = patch::snapshot_mac(&state.hash, version, Collection::Regular, &keys.snapshot_mac_key);
    if corrupt_mac {
        mac[0] ^= 0xFF;
    }
    SyncdSnapshot {
        version: Some(SyncdVersion { version: Some(version) }),
        records: vec![sealed.mutation.record.unwrap()],
        mac: Some(mac.to_vec()),
        key_id: Some(KeyId { id: Some(KEY_ID.to_vec()) }),
    }
    .encode_to_vec()
}

fn snapshot_reply(store: &MemoryStore, path: &str, blob: Vec<u8>) -> Node {
    store.put_blob(path, blob);
    let reference = ExternalBlobReference {
        direct_path: Some(path.to_string()),
        ..Default::default()
    };
    Node::new("iq").attr("type", "result").child(
        Node::new("sync").child(
            Node::new("collection")
                .attr("name", "regular")
                .attr("version", 1i64)
                .child(Node::new("snapshot").bytes(reference.encode_to_vec())),
        ),
    )
}

/// A corrupt snapshot MAC resets the collection; the retry succeeds and
/// no user-visible error surfaces.
#[tokio::test]
async fn snapshot_mac_mismatch_recovers_on_retry() {
    let store = seeded_store();
    let bad = snapshot_reply(&store, "/snap/bad", snapshot_blob(1, true));
    let good = snapshot_reply(&store, "/snap/good", snapshot_blob(1, false));
    let server = SyncServer::new(vec![bad, good]);
    let (mut engine, mut events) = make_engine(store.clone(), server.clone());

    engine.pull(&[Collection::Regular]).await.expect("pull succeeds after retry");
    assert_eq!(server.request_count(), 2);

    let state = store.get_hash_state(Collection::Regular).unwrap().unwrap();
    assert_eq!(state.version, 1);
    assert_eq!(state.index_value_map.len(), 1);

    // the applied mutation surfaced as an action on the second attempt
    match events.recv().await.expect("event") {
        Event::AppStateAction(action) => {
            assert_eq!(action.action, AppStateAction::Archive(true));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

/// Three corrupt snapshots in a row propagate the MAC failure.
#[tokio::test]
async fn snapshot_mac_mismatch_gives_up_after_three_attempts() {
    let store = seeded_store();
    let replies: Vec<Node> = (0..3)
        .map(|i| snapshot_reply(&store, &format!("/snap/{i}"), snapshot_blob(1, true)))
        .collect();
    let server = SyncServer::new(replies);
    let (mut engine, _events) = make_engine(store.clone(), server.clone());

    let err = engine.pull(&[Collection::Regular]).await.unwrap_err();
    assert!(matches!(err, Error::MacMismatch { .. }));
    assert_eq!(server.request_count(), 3);
    // the collection was reset rather than left half-applied
    let state = store.get_hash_state(Collection::Regular).unwrap().unwrap();
    assert_eq!(state.version, 0);
    assert!(state.index_value_map.is_empty());
}

/// Re-applying a patch at an already-seen version leaves the state
/// untouched.
#[tokio::test]
async fn stale_patch_is_rejected_by_version() {
    let store = seeded_store();
    let server = SyncServer::new(vec![iq_result()]);
    let (mut engine, _events) = make_engine(store.clone(), server.clone());

    let chat = Jid::new("15551234567", "s.whatsapp.net");
    engine
        .push(Collection::RegularHigh, vec![PatchEntry::mute(&chat, true, 0)])
        .await
        .expect("push");
    let pushed = server.request(0);
    let patch_bytes = pushed
        .find_path(&["sync", "collection", "patch"])
        .unwrap()
        .content_bytes()
        .unwrap()
        .to_vec();
    let state_before = store.get_hash_state(Collection::RegularHigh).unwrap().unwrap();

    // The server replays the same version-1 patch in a pull.
    let replay = Node::new("iq").attr("type", "result").child(
        Node::new("sync").child(
            Node::new("collection")
                .attr("name", "regular_high")
                .attr("version", 1i64)
                .child(Node::new("patch").bytes(patch_bytes)),
        ),
    );
    let server2 = SyncServer::new(vec![replay]);
    let (mut engine2, _events2) = make_engine(store.clone(), server2);
    engine2
        .pull(&[Collection::RegularHigh])
        .await
        .expect("pull with stale patch");

    let state_after = store.get_hash_state(Collection::RegularHigh).unwrap().unwrap();
    assert_eq!(state_before.hash, state_after.hash);
    assert_eq!(state_before.version, state_after.version);
    assert_eq!(state_before.index_value_map, state_after.index_value_map);
}
