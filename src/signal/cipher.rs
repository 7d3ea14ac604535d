//! The pairwise session cipher.
//!
//! Encrypts under the sending chain (wrapping in a prekey message while
//! the session is unconfirmed) and decrypts with the double-ratchet step,
//! bounded skipped-key storage and silent duplicate rejection.

use prost::Message as _;

use crate::crypto::{aescbc, hmac_sha256_parts, strip_key_prefix, KeyPair};
use crate::error::{Error, Result};
use crate::proto::signal::{
    split_versioned, PreKeySignalMessage, SignalMessage, MAC_LENGTH, VERSION_BYTE,
};
use crate::signal::builder;
use crate::signal::ratchet::MessageKeys;
use crate::signal::state::{ReceiverChain, SenderChain, SessionRecord, SessionState};

/// Wire kind of an encrypted payload, matching the `<enc type>` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    PreKey,
    Whisper,
}

impl MessageKind {
    pub fn as_attr(&self) -> &'static str {
        match self {
            MessageKind::PreKey => "pkmsg",
            MessageKind::Whisper => "msg",
        }
    }
}

/// A sealed payload ready for an `<enc>` node.
#[derive(Debug, Clone)]
pub struct SealedMessage {
    pub kind: MessageKind,
    pub serialized: Vec<u8>,
}

fn prefixed(key: &[u8; 32]) -> [u8; 33] {
    let mut out = [0u8; 33];
    out[0] = crate::crypto::KEY_TYPE_DJB;
    out[1..].copy_from_slice(key);
    out
}

/// Encrypts one plaintext under the session's sending chain.
pub fn encrypt(
    record: &mut SessionRecord,
    local_registration_id: u32,
    plaintext: &[u8],
) -> Result<SealedMessage> {
    let state = record
        .current
        .as_mut()
        .ok_or_else(|| Error::Decryption("no session for encryption".into()))?;
    let chain = state
        .sender_chain
        .as_mut()
        .ok_or_else(|| Error::Decryption("session has no sending chain".into()))?;

    let keys = chain.chain_key.message_keys();
    let body = aescbc::encrypt_with_iv(&keys.cipher_key, &keys.iv, plaintext);

    let proto = SignalMessage {
        ratchet_key: Some(chain.ratchet_key.public_with_prefix().to_vec()),
        counter: Some(keys.counter),
        previous_counter: Some(state.previous_counter),
        ciphertext: Some(body),
    };
    let mut versioned = vec![VERSION_BYTE];
    versioned.extend_from_slice(&proto.encode_to_vec());
    let mac = hmac_sha256_parts(
        &keys.mac_key,
        &[
            &prefixed(&state.local_identity),
            &prefixed(&state.remote_identity),
            &versioned,
        ],
    );
    versioned.extend_from_slice(&mac[..MAC_LENGTH]);
    chain.chain_key = chain.chain_key.next();

    match &state.pending_pre_key {
        Some(pending) => {
            let outer = PreKeySignalMessage {
                registration_id: Some(local_registration_id),
                pre_key_id: pending.pre_key_id,
                signed_pre_key_id: Some(pending.signed_pre_key_id),
                base_key: Some(prefixed(&pending.base_key).to_vec()),
                identity_key: Some(prefixed(&state.local_identity).to_vec()),
                message: Some(versioned),
            };
            let mut serialized = vec![VERSION_BYTE];
            serialized.extend_from_slice(&outer.encode_to_vec());
            Ok(SealedMessage {
                kind: MessageKind::PreKey,
                serialized,
            })
        }
        None => Ok(SealedMessage {
            kind: MessageKind::Whisper,
            serialized: versioned,
        }),
    }
}

/// Decrypts a `msg` payload, trying the current state first and archived
/// states after it.
pub fn decrypt_whisper(record: &mut SessionRecord, serialized: &[u8]) -> Result<Vec<u8>> {
    record.try_states(|state| decrypt_with_state(state, serialized))
}

/// One-time prekey material resolved by the caller for an inbound
/// `pkmsg`, looked up from the advertised ids.
pub struct InboundPreKeys<'a> {
    pub identity: &'a KeyPair,
    pub signed_pre_key: &'a KeyPair,
    pub one_time_pre_key: Option<&'a KeyPair>,
}

/// The prekey id a `pkmsg` advertises, so the caller can fetch it from
/// the store before decrypting.
pub fn peek_pre_key_id(serialized: &[u8]) -> Result<Option<u32>> {
    let proto = parse_prekey(serialized)?;
    Ok(proto.pre_key_id)
}

fn parse_prekey(serialized: &[u8]) -> Result<PreKeySignalMessage> {
    let (&first, rest) = serialized
        .split_first()
        .ok_or_else(|| Error::Decryption("empty pkmsg".into()))?;
    if first >> 4 != 3 {
        return Err(Error::Decryption(format!("unsupported pkmsg version {}", first >> 4)));
    }
    PreKeySignalMessage::decode(rest).map_err(|e| Error::Decryption(format!("bad pkmsg: {e}")))
}

/// Decrypts a `pkmsg` payload, building the inbound session when its base
/// key is new. Returns the plaintext and the consumed one-time prekey id.
pub fn decrypt_prekey(
    record: &mut SessionRecord,
    keys: &InboundPreKeys<'_>,
    serialized: &[u8],
) -> Result<(Vec<u8>, Option<u32>)> {
    let proto = parse_prekey(serialized)?;
    let base_key = proto
        .base_key
        .as_deref()
        .and_then(strip_key_prefix)
        .ok_or_else(|| Error::Decryption("pkmsg missing base key".into()))?;

    let mut consumed = None;
    if !record.knows_base_key(&base_key) {
        let (state, used) = builder::init_inbound(
            keys.identity,
            keys.signed_pre_key,
            keys.one_time_pre_key,
            &proto,
        )?;
        record.promote(state);
        consumed = used;
    }

    let inner = proto
        .message
        .as_deref()
        .ok_or_else(|| Error::Decryption("pkmsg missing inner message".into()))?;
    let plaintext = decrypt_whisper(record, inner)?;
    Ok((plaintext, consumed))
}

fn decrypt_with_state(state: &mut SessionState, serialized: &[u8]) -> Result<Vec<u8>> {
    let (body, their_mac) = split_versioned(serialized, MAC_LENGTH)
        .ok_or_else(|| Error::Decryption("truncated signal message".into()))?;
    let proto =
        SignalMessage::decode(body).map_err(|e| Error::Decryption(format!("bad signal message: {e}")))?;
    let their_ratchet = proto
        .ratchet_key
        .as_deref()
        .and_then(strip_key_prefix)
        .ok_or_else(|| Error::Decryption("missing ratchet key".into()))?;
    let counter = proto
        .counter
        .ok_or_else(|| Error::Decryption("missing counter".into()))?;
    let ciphertext = proto
        .ciphertext
        .as_deref()
        .ok_or_else(|| Error::Decryption("missing ciphertext".into()))?;

    if !state.has_receiver_chain(&their_ratchet) {
        ratchet_step(state, &their_ratchet)?;
    }
    let chain = state
        .receiver_chain_mut(&their_ratchet)
        .expect("chain exists after ratchet step");
    let keys = take_message_keys(chain, counter)?;

    let versioned = &serialized[..serialized.len() - MAC_LENGTH];
    let expected = hmac_sha256_parts(
        &keys.mac_key,
        &[
            &prefixed(&state.remote_identity),
            &prefixed(&state.local_identity),
            versioned,
        ],
    );
    if their_mac != &expected[..MAC_LENGTH] {
        return Err(Error::Decryption("signal message mac mismatch".into()));
    }

    let plaintext = aescbc::decrypt_with_iv(&keys.cipher_key, &keys.iv, ciphertext)?;
    // A round trip proves the session; stop advertising the prekey.
    state.pending_pre_key = None;
    Ok(plaintext)
}

/// DH ratchet: derive the receiving chain for the new remote key, then
/// rotate our sending ratchet.
fn ratchet_step(state: &mut SessionState, their_ratchet: &[u8; 32]) -> Result<()> {
    let old_chain = state
        .sender_chain
        .take()
        .ok_or_else(|| Error::Decryption("session has no sending chain".into()))?;

    let (receiver_root, receiver_chain) = state
        .root_key
        .create_chain(their_ratchet, &old_chain.ratchet_key);
    let new_ratchet = KeyPair::generate();
    let (next_root, sender_chain) = receiver_root.create_chain(their_ratchet, &new_ratchet);

    state.previous_counter = old_chain.chain_key.index();
    state.root_key = next_root;
    state.add_receiver_chain(ReceiverChain::new(*their_ratchet, receiver_chain));
    state.sender_chain = Some(SenderChain {
        ratchet_key: new_ratchet,
        chain_key: sender_chain,
    });
    Ok(())
}

/// Message keys for `counter`, fast-forwarding the chain and banking
/// skipped keys; counters behind the chain must hit the skipped store or
/// they are duplicates.
fn take_message_keys(chain: &mut ReceiverChain, counter: u32) -> Result<MessageKeys> {
    if counter < chain.chain_key.index() {
        return chain
            .take_skipped(counter)
            .ok_or_else(|| Error::Decryption(format!("duplicate message counter {counter}")));
    }
    while chain.chain_key.index() < counter {
        chain.push_skipped(chain.chain_key.message_keys());
        chain.chain_key = chain.chain_key.next();
    }
    let keys = chain.chain_key.message_keys();
    chain.chain_key = chain.chain_key.next();
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{PreKey, SignedPreKey};
    use crate::signal::builder::{init_outbound, PreKeyBundle};

    struct Bob {
        identity: KeyPair,
        signed_pre_key: SignedPreKey,
        one_time: PreKey,
        record: SessionRecord,
    }

    impl Bob {
        fn new() -> Self {
            let identity = KeyPair::generate();
            Self {
                signed_pre_key: SignedPreKey::generate(7, &identity),
                one_time: PreKey::new(99),
                identity,
                record: SessionRecord::new(),
            }
        }

        fn bundle(&self) -> PreKeyBundle {
            PreKeyBundle {
                registration_id: 1000,
                identity: self.identity.public,
                signed_pre_key_id: self.signed_pre_key.id,
                signed_pre_key: self.signed_pre_key.key_pair.public,
                signed_pre_key_signature: self.signed_pre_key.signature,
                pre_key: Some((self.one_time.id, self.one_time.key_pair.public)),
            }
        }

        fn decrypt(&mut self, sealed: &SealedMessage) -> Result<Vec<u8>> {
            match sealed.kind {
                MessageKind::PreKey => {
                    let keys = InboundPreKeys {
                        identity: &self.identity,
                        signed_pre_key: &self.signed_pre_key.key_pair,
                        one_time_pre_key: Some(&self.one_time.key_pair),
                    };
                    decrypt_prekey(&mut self.record, &keys, &sealed.serialized).map(|(pt, _)| pt)
                }
                MessageKind::Whisper => decrypt_whisper(&mut self.record, &sealed.serialized),
            }
        }
    }

    fn alice_session(bob: &Bob) -> (KeyPair, SessionRecord) {
        let identity = KeyPair::generate();
        let state = init_outbound(&identity, &bob.bundle()).unwrap();
        (identity, SessionRecord::fresh(state))
    }

    #[test]
    fn first_message_is_pkmsg_then_msg_after_reply() {
        let mut bob = Bob::new();
        let (_alice_id, mut alice) = alice_session(&bob);

        let sealed = encrypt(&mut alice, 555, b"hello bob").unwrap();
        assert_eq!(sealed.kind, MessageKind::PreKey);
        assert_eq!(bob.decrypt(&sealed).unwrap(), b"hello bob");

        // Without a reply Alice keeps advertising the prekey.
        let again = encrypt(&mut alice, 555, b"second").unwrap();
        assert_eq!(again.kind, MessageKind::PreKey);
        assert_eq!(bob.decrypt(&again).unwrap(), b"second");

        // Bob replies; Alice's next message drops to a plain msg.
        let reply = encrypt(&mut bob.record, 1000, b"hi alice").unwrap();
        assert_eq!(reply.kind, MessageKind::Whisper);
        assert_eq!(decrypt_whisper(&mut alice, &reply.serialized).unwrap(), b"hi alice");
        let third = encrypt(&mut alice, 555, b"third").unwrap();
        assert_eq!(third.kind, MessageKind::Whisper);
        assert_eq!(bob.decrypt(&third).unwrap(), b"third");
    }

    #[test]
    fn long_back_and_forth_ratchets() {
        let mut bob = Bob::new();
        let (_aid, mut alice) = alice_session(&bob);
        for round in 0..6u32 {
            let text = format!("alice round {round}").into_bytes();
            let sealed = encrypt(&mut alice, 1, &text).unwrap();
            assert_eq!(bob.decrypt(&sealed).unwrap(), text);

            let text = format!("bob round {round}").into_bytes();
            let sealed = encrypt(&mut bob.record, 2, &text).unwrap();
            assert_eq!(
                decrypt_whisper(&mut alice, &sealed.serialized).unwrap(),
                text
            );
        }
    }

    #[test]
    fn out_of_order_delivery_uses_skipped_keys() {
        let mut bob = Bob::new();
        let (_aid, mut alice) = alice_session(&bob);

        let first = encrypt(&mut alice, 1, b"one").unwrap();
        let second = encrypt(&mut alice, 1, b"two").unwrap();
        let third = encrypt(&mut alice, 1, b"three").unwrap();

        assert_eq!(bob.decrypt(&third).unwrap(), b"three");
        assert_eq!(bob.decrypt(&first).unwrap(), b"one");
        assert_eq!(bob.decrypt(&second).unwrap(), b"two");
    }

    #[test]
    fn duplicate_is_rejected() {
        let mut bob = Bob::new();
        let (_aid, mut alice) = alice_session(&bob);
        let sealed = encrypt(&mut alice, 1, b"once").unwrap();
        assert_eq!(bob.decrypt(&sealed).unwrap(), b"once");
        assert!(bob.decrypt(&sealed).is_err());
    }

    #[test]
    fn skipped_key_bound_holds_across_2001_messages() {
        let mut bob = Bob::new();
        let (_aid, mut alice) = alice_session(&bob);

        let first = encrypt(&mut alice, 1, b"msg 0").unwrap();
        for _ in 1..2000 {
            let _dropped = encrypt(&mut alice, 1, b"dropped").unwrap();
        }
        let last = encrypt(&mut alice, 1, b"msg 2000").unwrap();

        assert_eq!(bob.decrypt(&last).unwrap(), b"msg 2000");
        assert_eq!(bob.decrypt(&first).unwrap(), b"msg 0");
        let state = bob.record.current.as_ref().unwrap();
        assert!(state.total_skipped_keys() <= 2000);
    }

    #[test]
    fn tampered_mac_fails() {
        let mut bob = Bob::new();
        let (_aid, mut alice) = alice_session(&bob);
        let mut sealed = encrypt(&mut alice, 1, b"payload").unwrap();
        let len = sealed.serialized.len();
        sealed.serialized[len - 1] ^= 0x40;
        assert!(bob.decrypt(&sealed).is_err());
    }
}
