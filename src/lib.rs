// SPDX-License-Identifier: MIT OR Apache-2.0

//! `duplex-encryption` provides end-to-end encryption for two-party messaging: an X3DH
//! key-agreement handshake followed by a Double Ratchet with per-message forward secrecy and
//! break-in recovery.
//!
//! The crate is the cryptographic core only. It is transport- and storage-agnostic: pre-key
//! bundles, handshake metadata and encrypted messages are produced and consumed as opaque,
//! CBOR-codable values, while delivery, peer discovery and secure persistence are the
//! responsibility of the embedding application. No I/O happens inside this crate and no global
//! state exists; everything lives in explicit, serializable state values.
//!
//! ## Establishing sessions
//!
//! Each party holds a [`KeyManager`] state with its long-term identity secret, signed pre-keys
//! and a pool of one-time pre-keys. The public projection of this material is published as
//! [`PreKeyBundle`] values through a directory collaborator.
//!
//! To start messaging, the initiator runs [`Handshake::initiate`] against a fetched bundle. The
//! bundle's pre-key signature is verified first (XEdDSA with the X25519 identity key, so one
//! identity key pair serves both Diffie-Hellman and signing); an invalid signature aborts the
//! handshake. Up to four X25519 agreements are condensed into the initial root key and the
//! initiator can encrypt immediately, attaching the returned [`HandshakeMessage`] so the
//! responder can derive the same session via [`Handshake::respond`]. One-time pre-key secrets
//! are deleted when consumed; answering a replayed handshake fails.
//!
//! ## Messaging
//!
//! All sends and receives flow through the [`Ratchet`] operating on a per-peer
//! [`SessionState`]. Every message consumes a fresh key from a one-way chain; chains themselves
//! are re-seeded through a Diffie-Hellman ratchet step whenever the peer rotates its ratchet
//! key. Messages arriving out of order resolve through a bounded cache of skipped message keys.
//! Payloads are sealed with XChaCha20-Poly1305, with both identity keys and the message header
//! bound as associated data: tampered payloads and cross-session replays fail authentication
//! without touching session state.
//!
//! ## Persistence
//!
//! Applications provide a [`SessionStore`](traits::SessionStore) implementation backed by their
//! secure storage. The [`SessionManager`] drives handshakes and messaging on top of it and
//! persists every session transition _before_ releasing ciphertext or plaintext, keeping both
//! ends resynchronisable across crashes. Operations on one session must be serialised (the
//! manager's `&mut` methods enforce this); sessions of different peers are independent.
//!
//! ## Security
//!
//! Root keys, chain keys, message keys and private scalars are held in zeroizing containers,
//! compared in constant time and redacted from debug output. They leave the crate only inside
//! [`SessionState`] and [`KeyManagerState`] values handed to the secure-storage collaborator.
//! Note that this crate does not authenticate who handed over a bundle or message; binding
//! identities to real-world users (and verifying them out of band) is up to the application.
pub mod cbor;
pub mod crypto;
mod handshake;
mod key_bundle;
mod key_manager;
mod manager;
mod message;
mod ratchet;
mod session;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod traits;

pub use crypto::{Rng, RngError};
pub use handshake::{
    Handshake, HandshakeError, HandshakeMessage, HandshakeResult, SessionHandshake,
};
pub use key_bundle::{
    KeyBundleError, Lifetime, LifetimeError, OneTimePreKey, OneTimePreKeyId, PreKey, PreKeyBundle,
    PreKeyId,
};
pub use key_manager::{KeyManager, KeyManagerError, KeyManagerState};
pub use manager::{SessionManager, SessionManagerError, SessionManagerResult};
pub use message::{EncryptedMessage, MessageHeader};
pub use ratchet::{MAX_SKIP, Ratchet, RatchetError, RatchetResult};
pub use session::{MAX_SKIPPED_KEYS, SessionState, SessionStatus, SkippedMessageKeys};
