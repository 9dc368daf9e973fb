// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire format of encrypted messages exchanged with the transport collaborator.
//!
//! Note that payloads do not contain any sender or receiver addressing. That information needs to
//! be added by the transport envelope; it is however authenticated, both identity keys are bound
//! into the AEAD associated data of every message.
use serde::{Deserialize, Serialize};

use crate::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use crate::crypto::x25519::PublicKey;
use crate::crypto::xchacha20::XAeadNonce;

/// Unencrypted header sent with each message, authenticated as part of the associated data.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Sender's current ratchet public key.
    pub ratchet_key: PublicKey,

    /// Index of this message in the sender's current sending chain.
    pub counter: u32,

    /// Number of messages in the sender's previous sending chain, so the receiver can close that
    /// chain and cache keys for messages still in flight.
    pub previous_counter: u32,
}

impl MessageHeader {
    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(&self)
    }
}

/// An encrypted message as it travels over the wire.
///
/// Carries no ratchet secrets: only the sender's current ratchet public key, the chain counters,
/// the AEAD nonce and the ciphertext cross the boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    pub(crate) header: MessageHeader,
    #[serde(with = "serde_bytes")]
    pub(crate) nonce: XAeadNonce,
    #[serde(with = "serde_bytes")]
    pub(crate) ciphertext: Vec<u8>,
}

impl EncryptedMessage {
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_cbor(bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(&self)
    }
}
