// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session lifecycle glue between the protocol engines and an injected session store.
//!
//! The manager enforces the persistence discipline the protocol needs to survive crashes: every
//! updated session state is saved through the [`SessionStore`] _before_ the resulting ciphertext
//! or plaintext is handed back to the caller. A failed `save` aborts the operation and the
//! cryptographic result is dropped, so a crash between an operation and its persistence can
//! never leave the peer with an unresynchronisable ratchet.
//!
//! Methods take `&mut self`, which gives the required single-writer discipline per manager: all
//! operations on one peer's session are serialised through its manager. Sessions of different
//! peers are fully independent and may live in separate managers operating in parallel.
use std::error::Error;
use std::marker::PhantomData;

use thiserror::Error as ThisError;

use crate::crypto::Rng;
use crate::handshake::{Handshake, HandshakeError, HandshakeMessage};
use crate::key_bundle::PreKeyBundle;
use crate::message::EncryptedMessage;
use crate::ratchet::{Ratchet, RatchetError};
use crate::session::{SessionState, SessionStatus};
use crate::traits::{IdentityManager, PreKeyManager, SessionStore};

/// Manages per-peer encrypted sessions on top of an injected [`SessionStore`].
#[derive(Debug)]
pub struct SessionManager<ID, STO> {
    store: STO,
    _marker: PhantomData<ID>,
}

impl<ID, STO> SessionManager<ID, STO>
where
    STO: SessionStore<ID>,
{
    pub fn new(store: STO) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    /// Hands the store back, for example to move it into a new manager after a restart.
    pub fn into_store(self) -> STO {
        self.store
    }

    /// Establishes and persists a new session towards a peer from their published pre-key
    /// bundle, returning the handshake metadata for the transport.
    ///
    /// Sessions are created once: initiating towards a peer which already has a session fails,
    /// tear the old one down first via [`close`](SessionManager::close).
    pub fn initiate<KMG>(
        &mut self,
        id: &ID,
        y_manager: &KMG::State,
        their_bundle: &PreKeyBundle,
        rng: &Rng,
    ) -> SessionManagerResult<HandshakeMessage, STO::Error>
    where
        KMG: IdentityManager<KMG::State> + PreKeyManager,
    {
        if self.load(id)?.is_some() {
            return Err(SessionManagerError::SessionAlreadyExists);
        }

        let (session, message) = Handshake::<KMG>::initiate(y_manager, their_bundle, rng)?;
        self.save(id, &session)?;

        Ok(message)
    }

    /// Derives and persists the session for an inbound handshake, consuming the one-time
    /// pre-key secret from the given key-manager state.
    pub fn respond<KMG>(
        &mut self,
        id: &ID,
        y_manager: KMG::State,
        message: &HandshakeMessage,
    ) -> SessionManagerResult<KMG::State, STO::Error>
    where
        KMG: IdentityManager<KMG::State> + PreKeyManager,
    {
        if self.load(id)?.is_some() {
            return Err(SessionManagerError::SessionAlreadyExists);
        }

        let (y_manager, session) = Handshake::<KMG>::respond(y_manager, message)?;
        self.save(id, &session)?;

        Ok(y_manager)
    }

    /// Encrypts a message towards the peer.
    ///
    /// The advanced session is persisted before the ciphertext is released; on a persistence
    /// failure no ciphertext is returned and the stored session is unchanged.
    pub fn encrypt(
        &mut self,
        id: &ID,
        plaintext: &[u8],
        rng: &Rng,
    ) -> SessionManagerResult<EncryptedMessage, STO::Error> {
        let session = self.load(id)?.ok_or(SessionManagerError::UnknownSession)?;

        let (session, message) = Ratchet::encrypt(session, plaintext, rng)?;
        self.save(id, &session)?;

        Ok(message)
    }

    /// Decrypts a message from the peer.
    ///
    /// The advanced session is persisted before the plaintext is released. Rejected messages
    /// (failed authentication, replays) leave the stored session untouched.
    pub fn decrypt(
        &mut self,
        id: &ID,
        message: &EncryptedMessage,
        rng: &Rng,
    ) -> SessionManagerResult<Vec<u8>, STO::Error> {
        let session = self.load(id)?.ok_or(SessionManagerError::UnknownSession)?;

        let (session, plaintext) = Ratchet::decrypt(session, message, rng)?;
        self.save(id, &session)?;

        Ok(plaintext)
    }

    /// Returns the status of the session with the given peer, if one exists.
    pub fn session_status(
        &self,
        id: &ID,
    ) -> SessionManagerResult<Option<SessionStatus>, STO::Error> {
        Ok(self.load(id)?.map(|session| session.status()))
    }

    /// Tears the session with the given peer down.
    pub fn close(&mut self, id: &ID) -> SessionManagerResult<(), STO::Error> {
        self.store
            .delete(id)
            .map_err(SessionManagerError::Persistence)
    }

    fn load(&self, id: &ID) -> SessionManagerResult<Option<SessionState>, STO::Error> {
        self.store.load(id).map_err(SessionManagerError::Persistence)
    }

    fn save(
        &mut self,
        id: &ID,
        session: &SessionState,
    ) -> SessionManagerResult<(), STO::Error> {
        self.store
            .save(id, session)
            .map_err(SessionManagerError::Persistence)
    }
}

pub type SessionManagerResult<T, E> = Result<T, SessionManagerError<E>>;

#[derive(Debug, ThisError)]
pub enum SessionManagerError<E: Error> {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Ratchet(#[from] RatchetError),

    #[error("no session exists for this peer")]
    UnknownSession,

    #[error("a session for this peer already exists")]
    SessionAlreadyExists,

    #[error("session could not be persisted: {0}")]
    Persistence(#[source] E),
}
