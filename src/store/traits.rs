//! Persistence trait seams.
//!
//! The core only ever talks to these traits; what sits behind them (and
//! how it serializes) belongs to the embedder.

use std::future::Future;
use std::pin::Pin;

use crate::appstate::{AppStateKey, Collection, HashState};
use crate::crypto::{PreKey, SignedPreKey};
use crate::error::Result;
use crate::proto::sync::ExternalBlobReference;
use crate::signal::{SenderKeyName, SenderKeyRecord, SessionRecord, SignalAddress};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Remote identity keys, trust-on-first-use.
pub trait IdentityStore: Send + Sync {
    fn put_identity(&self, address: &SignalAddress, key: [u8; 32]) -> Result<()>;
    fn get_identity(&self, address: &SignalAddress) -> Result<Option<[u8; 32]>>;

    fn is_trusted_identity(&self, address: &SignalAddress, key: &[u8; 32]) -> Result<bool> {
        Ok(match self.get_identity(address)? {
            Some(stored) => &stored == key,
            None => true,
        })
    }
}

/// Pairwise Signal sessions, keyed by device address.
pub trait SessionStore: Send + Sync {
    fn load_session(&self, address: &SignalAddress) -> Result<Option<SessionRecord>>;
    fn store_session(&self, address: &SignalAddress, record: &SessionRecord) -> Result<()>;
    fn contains_session(&self, address: &SignalAddress) -> Result<bool>;
    fn delete_session(&self, address: &SignalAddress) -> Result<()>;
}

/// One-time prekey pool.
pub trait PreKeyStore: Send + Sync {
    fn load_pre_key(&self, id: u32) -> Result<Option<PreKey>>;
    fn store_pre_key(&self, pre_key: PreKey) -> Result<()>;
    fn remove_pre_key(&self, id: u32) -> Result<()>;
    fn pre_key_count(&self) -> Result<usize>;
}

/// Pool refill hook, implemented outside the core. Called when the pool
/// drops under the service threshold.
pub trait PreKeyProvider: Send + Sync {
    fn refill(&self, count: usize) -> Result<Vec<PreKey>>;
}

/// Sender-key records per `(group, sender device)`.
pub trait SenderKeyStore: Send + Sync {
    fn load_sender_key(&self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>>;
    fn store_sender_key(&self, name: &SenderKeyName, record: &SenderKeyRecord) -> Result<()>;
}

/// App-state sync keys distributed by the primary device.
pub trait AppStateKeyStore: Send + Sync {
    fn put_app_state_key(&self, key: AppStateKey) -> Result<()>;
    fn get_app_state_key(&self, key_id: &[u8]) -> Result<Option<AppStateKey>>;
    /// Most recently issued key, used for outbound patches.
    fn latest_app_state_key(&self) -> Result<Option<AppStateKey>>;
}

/// Per-collection LTHash state.
pub trait HashStateStore: Send + Sync {
    fn get_hash_state(&self, collection: Collection) -> Result<Option<HashState>>;
    fn put_hash_state(&self, state: &HashState) -> Result<()>;
}

/// Everything the session core persists.
pub trait KeyStore:
    IdentityStore
    + SessionStore
    + PreKeyStore
    + SenderKeyStore
    + AppStateKeyStore
    + HashStateStore
{
}

impl<T> KeyStore for T where
    T: IdentityStore
        + SessionStore
        + PreKeyStore
        + SenderKeyStore
        + AppStateKeyStore
        + HashStateStore
{
}

/// Opaque blob transfer for snapshots, external mutations and history
/// sync payloads. Media handling proper is out of scope; this is the
/// whole surface the core needs.
pub trait BlobStore: Send + Sync {
    fn download(&self, reference: &ExternalBlobReference) -> BoxFuture<'_, Result<Vec<u8>>>;
    fn upload(&self, content: Vec<u8>) -> BoxFuture<'_, Result<ExternalBlobReference>>;
}

/// Local signed prekey material handed to the Signal layer on inbound
/// prekey messages.
#[derive(Clone)]
pub struct LocalSignalKeys {
    pub identity: crate::crypto::KeyPair,
    pub registration_id: u32,
    pub signed_pre_key: SignedPreKey,
}
