//! X3DH session establishment.

use crate::crypto::{strip_key_prefix, KeyPair, SignedPreKey};
use crate::error::{Error, Result};
use crate::proto::signal::PreKeySignalMessage;
use crate::signal::ratchet::derive_initial_keys;
use crate::signal::state::{PendingPreKey, ReceiverChain, SessionState};

/// Remote key material fetched from the server for an address without a
/// session.
#[derive(Debug, Clone)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub identity: [u8; 32],
    pub signed_pre_key_id: u32,
    pub signed_pre_key: [u8; 32],
    pub signed_pre_key_signature: [u8; 64],
    pub pre_key: Option<(u32, [u8; 32])>,
}

/// Builds the outbound (initiator) session from a fetched bundle. The
/// first message will advertise the consumed prekey as a `pkmsg`.
pub fn init_outbound(local_identity: &KeyPair, bundle: &PreKeyBundle) -> Result<SessionState> {
    if !SignedPreKey::verify(
        &bundle.identity,
        &bundle.signed_pre_key,
        &bundle.signed_pre_key_signature,
    ) {
        return Err(Error::Protocol("invalid signed prekey signature".into()));
    }

    let base = KeyPair::generate();
    let dh1 = local_identity.dh(&bundle.signed_pre_key);
    let dh2 = base.dh(&bundle.identity);
    let dh3 = base.dh(&bundle.signed_pre_key);
    let (root_key, chain_key) = match &bundle.pre_key {
        Some((_, one_time)) => {
            let dh4 = base.dh(one_time);
            derive_initial_keys(&[&dh1, &dh2, &dh3, &dh4])?
        }
        None => derive_initial_keys(&[&dh1, &dh2, &dh3])?,
    };

    let mut state = SessionState::new(local_identity.public, bundle.identity, root_key);
    state.remote_registration_id = bundle.registration_id;

    // The peer's signed prekey doubles as their first ratchet key: seed a
    // receiver chain with the initial chain key and ratchet the sender
    // side once with a fresh key pair.
    state.add_receiver_chain(ReceiverChain::new(bundle.signed_pre_key, chain_key));
    let sending_ratchet = KeyPair::generate();
    let (next_root, sending_chain) = state
        .root_key
        .create_chain(&bundle.signed_pre_key, &sending_ratchet);
    state.root_key = next_root;
    state.sender_chain = Some(crate::signal::state::SenderChain {
        ratchet_key: sending_ratchet,
        chain_key: sending_chain,
    });

    state.pending_pre_key = Some(PendingPreKey {
        pre_key_id: bundle.pre_key.as_ref().map(|(id, _)| *id),
        signed_pre_key_id: bundle.signed_pre_key_id,
        base_key: base.public,
    });
    Ok(state)
}

/// Builds the inbound (responder) session from the headers of a received
/// prekey message. Returns the new state and the consumed one-time prekey
/// id, which the store must delete.
pub fn init_inbound(
    local_identity: &KeyPair,
    signed_pre_key: &KeyPair,
    one_time_pre_key: Option<&KeyPair>,
    message: &PreKeySignalMessage,
) -> Result<(SessionState, Option<u32>)> {
    let their_identity = message
        .identity_key
        .as_deref()
        .and_then(strip_key_prefix)
        .ok_or_else(|| Error::Protocol("pkmsg missing identity key".into()))?;
    let their_base = message
        .base_key
        .as_deref()
        .and_then(strip_key_prefix)
        .ok_or_else(|| Error::Protocol("pkmsg missing base key".into()))?;

    let dh1 = signed_pre_key.dh(&their_identity);
    let dh2 = local_identity.dh(&their_base);
    let dh3 = signed_pre_key.dh(&their_base);
    let (root_key, chain_key) = match one_time_pre_key {
        Some(otp) => {
            let dh4 = otp.dh(&their_base);
            derive_initial_keys(&[&dh1, &dh2, &dh3, &dh4])?
        }
        None => derive_initial_keys(&[&dh1, &dh2, &dh3])?,
    };

    let mut state = SessionState::new(local_identity.public, their_identity, root_key);
    state.remote_registration_id = message.registration_id.unwrap_or(0);
    state.alice_base_key = Some(their_base);
    // Our signed prekey is the first sending ratchet key.
    state.sender_chain = Some(crate::signal::state::SenderChain {
        ratchet_key: signed_pre_key.clone(),
        chain_key,
    });

    let consumed = one_time_pre_key.and(message.pre_key_id);
    Ok((state, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SignedPreKey as LocalSignedPreKey;

    pub(crate) struct Party {
        pub identity: KeyPair,
        pub signed_pre_key: LocalSignedPreKey,
        pub one_time: crate::crypto::PreKey,
    }

    impl Party {
        pub fn new() -> Self {
            let identity = KeyPair::generate();
            Self {
                signed_pre_key: LocalSignedPreKey::generate(1, &identity),
                one_time: crate::crypto::PreKey::new(42),
                identity,
            }
        }

        pub fn bundle(&self) -> PreKeyBundle {
            PreKeyBundle {
                registration_id: 1234,
                identity: self.identity.public,
                signed_pre_key_id: self.signed_pre_key.id,
                signed_pre_key: self.signed_pre_key.key_pair.public,
                signed_pre_key_signature: self.signed_pre_key.signature,
                pre_key: Some((self.one_time.id, self.one_time.key_pair.public)),
            }
        }
    }

    #[test]
    fn outbound_session_has_pending_prekey() {
        let alice = KeyPair::generate();
        let bob = Party::new();
        let state = init_outbound(&alice, &bob.bundle()).unwrap();
        let pending = state.pending_pre_key.as_ref().unwrap();
        assert_eq!(pending.pre_key_id, Some(42));
        assert_eq!(pending.signed_pre_key_id, 1);
        assert!(state.sender_chain.is_some());
        assert_eq!(state.remote_registration_id, 1234);
    }

    #[test]
    fn bad_signature_rejected() {
        let alice = KeyPair::generate();
        let bob = Party::new();
        let mut bundle = bob.bundle();
        bundle.signed_pre_key_signature[0] ^= 1;
        assert!(init_outbound(&alice, &bundle).is_err());
    }

    #[test]
    fn inbound_reports_consumed_prekey() {
        let bob = Party::new();
        let alice_identity = KeyPair::generate();
        let alice_base = KeyPair::generate();
        let message = PreKeySignalMessage {
            registration_id: Some(77),
            pre_key_id: Some(bob.one_time.id),
            signed_pre_key_id: Some(1),
            base_key: Some(alice_base.public_with_prefix().to_vec()),
            identity_key: Some(alice_identity.public_with_prefix().to_vec()),
            message: None,
        };
        let (state, consumed) = init_inbound(
            &bob.identity,
            &bob.signed_pre_key.key_pair,
            Some(&bob.one_time.key_pair),
            &message,
        )
        .unwrap();
        assert_eq!(consumed, Some(42));
        assert_eq!(state.remote_registration_id, 77);
        assert_eq!(state.alice_base_key, Some(alice_base.public));
    }
}
