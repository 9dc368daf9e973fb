// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpers to test applications embedding this crate without a real storage backend.
use std::collections::HashMap;
use std::hash::Hash;

use thiserror::Error;

use crate::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use crate::session::SessionState;
use crate::traits::SessionStore;

/// In-memory session store.
///
/// Sessions are kept in their encoded form, so the store exercises the same serialization paths
/// a persistent implementation would.
#[derive(Debug, Default)]
pub struct MemorySessionStore<ID> {
    sessions: HashMap<ID, Vec<u8>>,
}

impl<ID> MemorySessionStore<ID> {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<ID> SessionStore<ID> for MemorySessionStore<ID>
where
    ID: Eq + Hash + Clone,
{
    type Error = MemoryStoreError;

    fn load(&self, id: &ID) -> Result<Option<SessionState>, Self::Error> {
        match self.sessions.get(id) {
            Some(bytes) => Ok(Some(decode_cbor(&bytes[..])?)),
            None => Ok(None),
        }
    }

    fn save(&mut self, id: &ID, session: &SessionState) -> Result<(), Self::Error> {
        let bytes = encode_cbor(session)?;
        self.sessions.insert(id.clone(), bytes);
        Ok(())
    }

    fn delete(&mut self, id: &ID) -> Result<(), Self::Error> {
        self.sessions.remove(id);
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum MemoryStoreError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
