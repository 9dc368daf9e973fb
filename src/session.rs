// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-peer double-ratchet session state.
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::crypto::Secret;
use crate::crypto::x25519::{PublicKey, SecretKey};

pub const ROOT_KEY_SIZE: usize = 32;

pub const CHAIN_KEY_SIZE: usize = 32;

pub const MESSAGE_KEY_SIZE: usize = 32;

/// Maximum number of message keys cached for out-of-order delivery, across all chains of one
/// session. When the bound is exceeded the oldest entries are evicted first, making the
/// messages they belonged to permanently undecryptable. This caps memory under adversarial
/// out-of-order flooding, trading tolerance for very stale delivery against it.
pub const MAX_SKIPPED_KEYS: usize = 200;

pub(crate) type RootKey = Secret<ROOT_KEY_SIZE>;

pub(crate) type ChainKey = Secret<CHAIN_KEY_SIZE>;

pub(crate) type MessageKey = Secret<MESSAGE_KEY_SIZE>;

/// State of an end-to-end encrypted session with one peer.
///
/// A session is created once by a successful handshake and lives until the conversation is torn
/// down. It is an owned value, exclusively held by its peer-scoped caller: all operations on the
/// same session must be serialised, operations on different peers' sessions are independent.
///
/// All session methods in this crate are expressed as "pure functions" without any side-effects,
/// consuming the state and returning an updated state object. A failed operation never leaves a
/// partially-mutated session behind, the previously persisted state simply stays current.
///
/// The state is serializable so it can be persisted through a
/// [`SessionStore`](crate::traits::SessionStore). It contains the root key, chain keys and our
/// ratchet secret; it must never be written anywhere else.
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test_utils"), derive(Clone))]
pub struct SessionState {
    pub(crate) status: SessionStatus,
    pub(crate) our_identity_key: PublicKey,
    pub(crate) their_identity_key: PublicKey,
    pub(crate) root_key: RootKey,
    pub(crate) our_ratchet_secret: SecretKey,
    pub(crate) their_ratchet_key: Option<PublicKey>,
    pub(crate) sending: Option<Chain>,
    pub(crate) receiving: Option<Chain>,
    pub(crate) previous_sending_counter: u32,
    pub(crate) skipped_keys: SkippedMessageKeys,
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_established(&self) -> bool {
        self.status == SessionStatus::Established
    }

    pub fn our_identity_key(&self) -> &PublicKey {
        &self.our_identity_key
    }

    /// Public identity key of the peer, pinned at handshake time.
    ///
    /// Every message of this session is cryptographically bound to this identity.
    pub fn their_identity_key(&self) -> &PublicKey {
        &self.their_identity_key
    }
}

/// Lifecycle of a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Handshake completed, no inbound message processed yet. Sending may already be possible
    /// (the initiating side seeds its sending chain during the handshake).
    AwaitingFirstMessage,

    /// At least one inbound message was decrypted, both directions ratchet normally.
    Established,
}

/// One direction of the symmetric-key ratchet.
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test_utils"), derive(Clone))]
pub(crate) struct Chain {
    pub(crate) chain_key: ChainKey,

    /// Counter of the next message in this chain.
    pub(crate) counter: u32,
}

/// Bounded cache of message keys for messages which arrived out of order or after a ratchet step
/// before being consumed.
///
/// Keyed by the sender's ratchet public key and the message counter. A key is removed when its
/// message arrives; the oldest entries are evicted once [`MAX_SKIPPED_KEYS`] is reached.
#[derive(Debug, Default, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test_utils"), derive(Clone))]
pub struct SkippedMessageKeys(VecDeque<SkippedMessageKey>);

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test_utils"), derive(Clone))]
struct SkippedMessageKey {
    ratchet_key: PublicKey,
    counter: u32,
    message_key: MessageKey,
}

impl SkippedMessageKeys {
    pub(crate) fn new() -> Self {
        Self(VecDeque::new())
    }

    pub(crate) fn insert(&mut self, ratchet_key: PublicKey, counter: u32, message_key: MessageKey) {
        if self.0.len() == MAX_SKIPPED_KEYS {
            self.0.pop_front();
        }
        self.0.push_back(SkippedMessageKey {
            ratchet_key,
            counter,
            message_key,
        });
    }

    /// Removes and returns the cached key for the given chain position, if present.
    pub(crate) fn take(&mut self, ratchet_key: &PublicKey, counter: u32) -> Option<MessageKey> {
        let index = self
            .0
            .iter()
            .position(|entry| &entry.ratchet_key == ratchet_key && entry.counter == counter)?;
        self.0.remove(index).map(|entry| entry.message_key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
