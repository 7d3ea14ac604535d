//! Session state for the double ratchet.

use std::collections::VecDeque;

use crate::crypto::KeyPair;
use crate::error::{Error, Result};
use crate::signal::ratchet::{ChainKey, MessageKeys, RootKey};

/// Skipped message keys retained per receiver chain. FIFO-evicted beyond
/// this bound.
pub const MAX_SKIPPED_MESSAGE_KEYS: usize = 2000;

/// Receiver chains kept per state for out-of-order traffic.
pub const MAX_RECEIVER_CHAINS: usize = 5;

/// Archived session states kept per record.
pub const MAX_ARCHIVED_STATES: usize = 3;

/// The sending half of the ratchet.
#[derive(Debug, Clone)]
pub struct SenderChain {
    pub ratchet_key: KeyPair,
    pub chain_key: ChainKey,
}

/// One receiving chain, keyed by the remote ratchet public key.
#[derive(Debug, Clone)]
pub struct ReceiverChain {
    pub ratchet_public: [u8; 32],
    pub chain_key: ChainKey,
    skipped: VecDeque<MessageKeys>,
}

impl ReceiverChain {
    pub fn new(ratchet_public: [u8; 32], chain_key: ChainKey) -> Self {
        Self {
            ratchet_public,
            chain_key,
            skipped: VecDeque::new(),
        }
    }

    /// Stores a skipped message key, evicting the oldest past the bound.
    pub fn push_skipped(&mut self, keys: MessageKeys) {
        if self.skipped.len() >= MAX_SKIPPED_MESSAGE_KEYS {
            self.skipped.pop_front();
        }
        self.skipped.push_back(keys);
    }

    /// Removes and returns the skipped keys for `counter`.
    pub fn take_skipped(&mut self, counter: u32) -> Option<MessageKeys> {
        let pos = self.skipped.iter().position(|k| k.counter == counter)?;
        self.skipped.remove(pos)
    }

    pub fn skipped_len(&self) -> usize {
        self.skipped.len()
    }
}

/// Advertisement data repeated in every outbound prekey message until the
/// peer replies.
#[derive(Debug, Clone)]
pub struct PendingPreKey {
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub base_key: [u8; 32],
}

/// One established (or establishing) pairwise ratchet.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub local_identity: [u8; 32],
    pub remote_identity: [u8; 32],
    pub remote_registration_id: u32,
    pub root_key: RootKey,
    pub sender_chain: Option<SenderChain>,
    pub previous_counter: u32,
    pub pending_pre_key: Option<PendingPreKey>,
    receiver_chains: VecDeque<ReceiverChain>,
    /// Base key of the inbound prekey message that created this state.
    pub alice_base_key: Option<[u8; 32]>,
}

impl SessionState {
    pub fn new(
        local_identity: [u8; 32],
        remote_identity: [u8; 32],
        root_key: RootKey,
    ) -> Self {
        Self {
            local_identity,
            remote_identity,
            remote_registration_id: 0,
            root_key,
            sender_chain: None,
            previous_counter: 0,
            pending_pre_key: None,
            receiver_chains: VecDeque::new(),
            alice_base_key: None,
        }
    }

    pub fn receiver_chain_mut(&mut self, ratchet_public: &[u8; 32]) -> Option<&mut ReceiverChain> {
        self.receiver_chains
            .iter_mut()
            .find(|c| &c.ratchet_public == ratchet_public)
    }

    pub fn has_receiver_chain(&self, ratchet_public: &[u8; 32]) -> bool {
        self.receiver_chains
            .iter()
            .any(|c| &c.ratchet_public == ratchet_public)
    }

    /// Adds a receiver chain, evicting the oldest beyond the bound.
    pub fn add_receiver_chain(&mut self, chain: ReceiverChain) {
        if self.receiver_chains.len() >= MAX_RECEIVER_CHAINS {
            self.receiver_chains.pop_front();
        }
        self.receiver_chains.push_back(chain);
    }

    /// Total skipped keys across chains; used by tests to check bounds.
    pub fn total_skipped_keys(&self) -> usize {
        self.receiver_chains.iter().map(|c| c.skipped_len()).sum()
    }
}

/// Per-address record: the live state plus a few archived predecessors
/// that still decrypt in-flight traffic after a re-handshake.
#[derive(Debug, Clone, Default)]
pub struct SessionRecord {
    pub current: Option<SessionState>,
    archived: VecDeque<SessionState>,
}

impl SessionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(state: SessionState) -> Self {
        Self {
            current: Some(state),
            archived: VecDeque::new(),
        }
    }

    pub fn has_session(&self) -> bool {
        self.current.is_some()
    }

    /// Replaces the current state, archiving the old one.
    pub fn promote(&mut self, state: SessionState) {
        if let Some(old) = self.current.take() {
            if self.archived.len() >= MAX_ARCHIVED_STATES {
                self.archived.pop_back();
            }
            self.archived.push_front(old);
        }
        self.current = Some(state);
    }

    /// Current plus archived states, most recent first.
    pub fn states_mut(&mut self) -> impl Iterator<Item = &mut SessionState> {
        self.current.iter_mut().chain(self.archived.iter_mut())
    }

    /// True when some state was created from this prekey base key, which
    /// makes a repeated prekey message a retransmission.
    pub fn knows_base_key(&self, base_key: &[u8; 32]) -> bool {
        self.current
            .iter()
            .chain(self.archived.iter())
            .any(|s| s.alice_base_key.as_ref() == Some(base_key))
    }

    /// Runs `attempt` against the current state, then each archived one.
    /// Each attempt works on a clone; only a successful clone is written
    /// back (and promoted, if it was archived), so a failed attempt never
    /// corrupts ratchet state.
    pub fn try_states<T>(
        &mut self,
        mut attempt: impl FnMut(&mut SessionState) -> Result<T>,
    ) -> Result<T> {
        let mut last_err = Error::Decryption("no session".into());

        if let Some(current) = &self.current {
            let mut candidate = current.clone();
            match attempt(&mut candidate) {
                Ok(value) => {
                    self.current = Some(candidate);
                    return Ok(value);
                }
                Err(e) => last_err = e,
            }
        }

        for i in 0..self.archived.len() {
            let mut candidate = self.archived[i].clone();
            match attempt(&mut candidate) {
                Ok(value) => {
                    self.archived.remove(i);
                    self.promote(candidate);
                    return Ok(value);
                }
                Err(e) => last_err = e,
            }
        }

        Err(last_err)
    }
}
