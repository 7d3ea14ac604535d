//! In-memory store, used by tests and as the default backend.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::appstate::{AppStateKey, Collection, HashState};
use crate::crypto::PreKey;
use crate::error::{Error, Result};
use crate::proto::sync::ExternalBlobReference;
use crate::signal::{SenderKeyName, SenderKeyRecord, SessionRecord, SignalAddress};
use crate::store::traits::{
    AppStateKeyStore, BlobStore, BoxFuture, HashStateStore, IdentityStore, PreKeyStore,
    SenderKeyStore, SessionStore,
};

fn poisoned(_: impl std::fmt::Debug) -> Error {
    Error::Store("store lock poisoned".into())
}

/// RwLock-backed implementation of every store trait.
#[derive(Default)]
pub struct MemoryStore {
    identities: RwLock<HashMap<String, [u8; 32]>>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
    pre_keys: RwLock<HashMap<u32, PreKey>>,
    sender_keys: RwLock<HashMap<String, SenderKeyRecord>>,
    app_state_keys: RwLock<Vec<AppStateKey>>,
    hash_states: RwLock<HashMap<Collection, HashState>>,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    blob_counter: RwLock<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a downloadable blob under a fixed path; tests use this to
    /// stand in for the media CDN.
    pub fn put_blob(&self, direct_path: impl Into<String>, content: Vec<u8>) {
        self.blobs
            .write()
            .expect("blob lock")
            .insert(direct_path.into(), content);
    }
}

impl IdentityStore for MemoryStore {
    fn put_identity(&self, address: &SignalAddress, key: [u8; 32]) -> Result<()> {
        self.identities
            .write()
            .map_err(poisoned)?
            .insert(address.to_string(), key);
        Ok(())
    }

    fn get_identity(&self, address: &SignalAddress) -> Result<Option<[u8; 32]>> {
        Ok(self
            .identities
            .read()
            .map_err(poisoned)?
            .get(&address.to_string())
            .copied())
    }
}

impl SessionStore for MemoryStore {
    fn load_session(&self, address: &SignalAddress) -> Result<Option<SessionRecord>> {
        Ok(self
            .sessions
            .read()
            .map_err(poisoned)?
            .get(&address.to_string())
            .cloned())
    }

    fn store_session(&self, address: &SignalAddress, record: &SessionRecord) -> Result<()> {
        self.sessions
            .write()
            .map_err(poisoned)?
            .insert(address.to_string(), record.clone());
        Ok(())
    }

    fn contains_session(&self, address: &SignalAddress) -> Result<bool> {
        Ok(self
            .sessions
            .read()
            .map_err(poisoned)?
            .get(&address.to_string())
            .map(|r| r.has_session())
            .unwrap_or(false))
    }

    fn delete_session(&self, address: &SignalAddress) -> Result<()> {
        self.sessions
            .write()
            .map_err(poisoned)?
            .remove(&address.to_string());
        Ok(())
    }
}

impl PreKeyStore for MemoryStore {
    fn load_pre_key(&self, id: u32) -> Result<Option<PreKey>> {
        Ok(self.pre_keys.read().map_err(poisoned)?.get(&id).cloned())
    }

    fn store_pre_key(&self, pre_key: PreKey) -> Result<()> {
        self.pre_keys
            .write()
            .map_err(poisoned)?
            .insert(pre_key.id, pre_key);
        Ok(())
    }

    fn remove_pre_key(&self, id: u32) -> Result<()> {
        self.pre_keys.write().map_err(poisoned)?.remove(&id);
        Ok(())
    }

    fn pre_key_count(&self) -> Result<usize> {
        Ok(self.pre_keys.read().map_err(poisoned)?.len())
    }
}

impl SenderKeyStore for MemoryStore {
    fn load_sender_key(&self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>> {
        Ok(self
            .sender_keys
            .read()
            .map_err(poisoned)?
            .get(&name.to_string())
            .cloned())
    }

    fn store_sender_key(&self, name: &SenderKeyName, record: &SenderKeyRecord) -> Result<()> {
        self.sender_keys
            .write()
            .map_err(poisoned)?
            .insert(name.to_string(), record.clone());
        Ok(())
    }
}

impl AppStateKeyStore for MemoryStore {
    fn put_app_state_key(&self, key: AppStateKey) -> Result<()> {
        let mut keys = self.app_state_keys.write().map_err(poisoned)?;
        keys.retain(|k| k.key_id != key.key_id);
        keys.push(key);
        Ok(())
    }

    fn get_app_state_key(&self, key_id: &[u8]) -> Result<Option<AppStateKey>> {
        Ok(self
            .app_state_keys
            .read()
            .map_err(poisoned)?
            .iter()
            .find(|k| k.key_id == key_id)
            .cloned())
    }

    fn latest_app_state_key(&self) -> Result<Option<AppStateKey>> {
        Ok(self.app_state_keys.read().map_err(poisoned)?.last().cloned())
    }
}

impl HashStateStore for MemoryStore {
    fn get_hash_state(&self, collection: Collection) -> Result<Option<HashState>> {
        Ok(self
            .hash_states
            .read()
            .map_err(poisoned)?
            .get(&collection)
            .cloned())
    }

    fn put_hash_state(&self, state: &HashState) -> Result<()> {
        self.hash_states
            .write()
            .map_err(poisoned)?
            .insert(state.collection, state.clone());
        Ok(())
    }
}

impl BlobStore for MemoryStore {
    fn download(&self, reference: &ExternalBlobReference) -> BoxFuture<'_, Result<Vec<u8>>> {
        let path = reference.direct_path.clone().unwrap_or_default();
        Box::pin(async move {
            self.blobs
                .read()
                .map_err(poisoned)?
                .get(&path)
                .cloned()
                .ok_or_else(|| Error::Store(format!("no blob at {path:?}")))
        })
    }

    fn upload(&self, content: Vec<u8>) -> BoxFuture<'_, Result<ExternalBlobReference>> {
        Box::pin(async move {
            let mut counter = self.blob_counter.write().map_err(poisoned)?;
            *counter += 1;
            let path = format!("/mem/{}", *counter);
            let len = content.len();
            self.blobs
                .write()
                .map_err(poisoned)?
                .insert(path.clone(), content);
            Ok(ExternalBlobReference {
                direct_path: Some(path),
                file_size_bytes: Some(len as i64),
                ..Default::default()
            })
        })
    }
}
