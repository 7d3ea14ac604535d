//! Per-message encryption glue between the store and the Signal layer.
//!
//! All methods run on the serial message queue, which is what guarantees
//! a single peer's session is never ratcheted concurrently.

use std::sync::Arc;

use rand::Rng;

use crate::error::{Error, Result};
use crate::signal::{
    cipher, InboundPreKeys, PreKeyBundle, SealedMessage, SenderKeyName, SenderKeyRecord,
    SessionRecord, SignalAddress,
};
use crate::store::{KeyStore, LocalSignalKeys};
use crate::types::Jid;

/// Appends N bytes of value N, N in 1..=15, as the container requires.
pub fn pad_message(plaintext: &[u8]) -> Vec<u8> {
    let pad = rand::thread_rng().gen_range(1..=15u8);
    let mut out = Vec::with_capacity(plaintext.len() + pad as usize);
    out.extend_from_slice(plaintext);
    out.extend(std::iter::repeat(pad).take(pad as usize));
    out
}

/// Strips container padding; the last byte is the pad length.
pub fn unpad_message(data: &[u8]) -> Result<&[u8]> {
    let pad = *data
        .last()
        .ok_or_else(|| Error::Decryption("empty padded message".into()))? as usize;
    if pad == 0 || pad > 15 || pad > data.len() {
        return Err(Error::Decryption(format!("invalid pad length {pad}")));
    }
    Ok(&data[..data.len() - pad])
}

pub struct MessageCipher {
    store: Arc<dyn KeyStore + Send + Sync>,
    local: LocalSignalKeys,
}

impl MessageCipher {
    pub fn new(store: Arc<dyn KeyStore + Send + Sync>, local: LocalSignalKeys) -> Self {
        Self { store, local }
    }

    pub fn has_session(&self, jid: &Jid) -> Result<bool> {
        self.store.contains_session(&SignalAddress::from(jid))
    }

    /// Builds an outbound session from a fetched bundle.
    pub fn create_session(&self, jid: &Jid, bundle: &PreKeyBundle) -> Result<()> {
        let address = SignalAddress::from(jid);
        if !self.store.is_trusted_identity(&address, &bundle.identity)? {
            return Err(Error::Decryption(format!("untrusted identity for {address}")));
        }
        let state = crate::signal::init_outbound(&self.local.identity, bundle)?;
        let mut record = self
            .store
            .load_session(&address)?
            .unwrap_or_else(SessionRecord::new);
        record.promote(state);
        self.store.store_session(&address, &record)?;
        self.store.put_identity(&address, bundle.identity)?;
        Ok(())
    }

    /// Encrypts one plaintext for a device with an established session.
    pub fn encrypt_for(&self, jid: &Jid, plaintext: &[u8]) -> Result<SealedMessage> {
        let address = SignalAddress::from(jid);
        let mut record = self
            .store
            .load_session(&address)?
            .filter(SessionRecord::has_session)
            .ok_or_else(|| Error::Decryption(format!("no session with {address}")))?;
        let sealed = cipher::encrypt(&mut record, self.local.registration_id, plaintext)?;
        self.store.store_session(&address, &record)?;
        Ok(sealed)
    }

    /// Decrypts a `pkmsg` or `msg` payload from the given device.
    pub fn decrypt(&self, sender: &Jid, enc_type: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let address = SignalAddress::from(sender);
        let mut record = self
            .store
            .load_session(&address)?
            .unwrap_or_else(SessionRecord::new);

        let plaintext = match enc_type {
            "pkmsg" => {
                let pre_key_id = cipher::peek_pre_key_id(payload)?;
                let one_time = match pre_key_id {
                    Some(id) => self.store.load_pre_key(id)?,
                    None => None,
                };
                let keys = InboundPreKeys {
                    identity: &self.local.identity,
                    signed_pre_key: &self.local.signed_pre_key.key_pair,
                    one_time_pre_key: one_time.as_ref().map(|p| &p.key_pair),
                };
                let (plaintext, consumed) = cipher::decrypt_prekey(&mut record, &keys, payload)?;
                if let Some(id) = consumed {
                    // Each one-time prekey serves exactly one session.
                    self.store.remove_pre_key(id)?;
                }
                plaintext
            }
            "msg" => cipher::decrypt_whisper(&mut record, payload)?,
            other => {
                return Err(Error::Protocol(format!("unsupported enc type {other:?}")));
            }
        };

        if let Some(state) = &record.current {
            self.store.put_identity(&address, state.remote_identity)?;
        }
        self.store.store_session(&address, &record)?;
        Ok(plaintext)
    }

    /// Our own sender key for a group, creating it on first use. Returns
    /// the serialized distribution message to fan out.
    pub fn ensure_outbound_sender_key(&self, group: &Jid, own_jid: &Jid) -> Result<Vec<u8>> {
        let name = SenderKeyName::new(group.to_string(), SignalAddress::from(own_jid));
        let record = match self.store.load_sender_key(&name)? {
            Some(record) if record.signing_private.is_some() => record,
            _ => {
                let record = SenderKeyRecord::new_outbound();
                self.store.store_sender_key(&name, &record)?;
                record
            }
        };
        Ok(record.distribution_message())
    }

    /// Encrypts a group payload under our sender key.
    pub fn group_encrypt(&self, group: &Jid, own_jid: &Jid, plaintext: &[u8]) -> Result<Vec<u8>> {
        let name = SenderKeyName::new(group.to_string(), SignalAddress::from(own_jid));
        let mut record = self
            .store
            .load_sender_key(&name)?
            .ok_or_else(|| Error::Decryption(format!("no sender key for {name}")))?;
        let sealed = record.encrypt(plaintext)?;
        self.store.store_sender_key(&name, &record)?;
        Ok(sealed)
    }

    /// Installs a peer's sender key from a distribution message.
    pub fn install_sender_key(
        &self,
        group_id: &str,
        sender: &Jid,
        distribution: &[u8],
    ) -> Result<()> {
        let name = SenderKeyName::new(group_id, SignalAddress::from(sender));
        let record = SenderKeyRecord::from_distribution(distribution)?;
        self.store.store_sender_key(&name, &record)
    }

    /// Decrypts an `skmsg` group payload.
    pub fn group_decrypt(&self, group: &Jid, participant: &Jid, payload: &[u8]) -> Result<Vec<u8>> {
        let name = SenderKeyName::new(group.to_string(), SignalAddress::from(participant));
        let mut record = self
            .store
            .load_sender_key(&name)?
            .ok_or_else(|| Error::Decryption(format!("no sender key for {name}")))?;
        let plaintext = record.decrypt(payload)?;
        self.store.store_sender_key(&name, &record)?;
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, PreKey, SignedPreKey};
    use crate::store::PreKeyStore;
    use crate::store::MemoryStore;

    fn local_keys() -> LocalSignalKeys {
        let identity = KeyPair::generate();
        LocalSignalKeys {
            signed_pre_key: SignedPreKey::generate(1, &identity),
            registration_id: 100,
            identity,
        }
    }

    fn cipher_with_store() -> (Arc<MemoryStore>, MessageCipher, LocalSignalKeys) {
        let store = Arc::new(MemoryStore::new());
        let local = local_keys();
        let cipher = MessageCipher::new(store.clone(), local.clone());
        (store, cipher, local)
    }

    fn bundle_for(store: &MemoryStore, local: &LocalSignalKeys) -> PreKeyBundle {
        let otp = PreKey::new(31);
        store.store_pre_key(otp.clone()).unwrap();
        PreKeyBundle {
            registration_id: local.registration_id,
            identity: local.identity.public,
            signed_pre_key_id: local.signed_pre_key.id,
            signed_pre_key: local.signed_pre_key.key_pair.public,
            signed_pre_key_signature: local.signed_pre_key.signature,
            pre_key: Some((otp.id, otp.key_pair.public)),
        }
    }

    #[test]
    fn pad_unpad_round_trip() {
        for _ in 0..50 {
            let padded = pad_message(b"payload");
            assert_eq!(unpad_message(&padded).unwrap(), b"payload");
        }
    }

    #[test]
    fn unpad_rejects_garbage() {
        assert!(unpad_message(&[]).is_err());
        assert!(unpad_message(&[0x00]).is_err());
        assert!(unpad_message(&[0xFF]).is_err());
    }

    #[test]
    fn end_to_end_between_two_stores() {
        let (alice_store, alice, _alice_local) = cipher_with_store();
        let (bob_store, bob, bob_local) = cipher_with_store();
        let alice_jid = Jid::device("alice", 0);
        let bob_jid = Jid::device("bob", 0);

        alice
            .create_session(&bob_jid, &bundle_for(&bob_store, &bob_local))
            .unwrap();
        assert!(alice.has_session(&bob_jid).unwrap());

        let sealed = alice.encrypt_for(&bob_jid, b"hello").unwrap();
        assert_eq!(sealed.kind.as_attr(), "pkmsg");
        let plaintext = bob
            .decrypt(&alice_jid, sealed.kind.as_attr(), &sealed.serialized)
            .unwrap();
        assert_eq!(plaintext, b"hello");
        // the advertised one-time prekey was consumed
        assert_eq!(bob_store.pre_key_count().unwrap(), 0);

        let reply = bob.encrypt_for(&alice_jid, b"hi back").unwrap();
        assert_eq!(reply.kind.as_attr(), "msg");
        assert_eq!(
            alice
                .decrypt(&bob_jid, reply.kind.as_attr(), &reply.serialized)
                .unwrap(),
            b"hi back"
        );

        let second = alice.encrypt_for(&bob_jid, b"again").unwrap();
        assert_eq!(second.kind.as_attr(), "msg");
        let _ = alice_store;
    }

    #[test]
    fn encrypt_without_session_fails() {
        let (_store, cipher, _) = cipher_with_store();
        assert!(cipher.encrypt_for(&Jid::device("nobody", 0), b"x").is_err());
    }

    #[test]
    fn group_flow_through_stores() {
        let (_s1, ours, _) = cipher_with_store();
        let (_s2, theirs, _) = cipher_with_store();
        let group = Jid::new("123-456", "g.us");
        let us = Jid::device("us", 0);

        let skdm = ours.ensure_outbound_sender_key(&group, &us).unwrap();
        theirs.install_sender_key(&group.to_string(), &us, &skdm).unwrap();

        let sealed = ours.group_encrypt(&group, &us, b"to the group").unwrap();
        assert_eq!(
            theirs.group_decrypt(&group, &us, &sealed).unwrap(),
            b"to the group"
        );
    }

    #[test]
    fn sender_key_is_reused_not_regenerated() {
        let (_s, ours, _) = cipher_with_store();
        let group = Jid::new("123-456", "g.us");
        let us = Jid::device("us", 0);
        let first = ours.ensure_outbound_sender_key(&group, &us).unwrap();
        let second = ours.ensure_outbound_sender_key(&group, &us).unwrap();
        assert_eq!(first, second);
    }
}
