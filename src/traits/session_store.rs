// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use crate::session::SessionState;

/// Persistence contract for per-peer session state, consumed by this crate but implemented by the
/// embedding application (for example on top of an encrypted database or platform keystore).
///
/// Session state contains secret key material and must only be written to secure storage. The
/// [`SessionManager`](crate::SessionManager) saves every updated session through this interface
/// _before_ releasing ciphertext or plaintext to the caller, so implementations should make
/// `save` atomic with respect to crashes.
pub trait SessionStore<ID> {
    type Error: Error;

    fn load(&self, id: &ID) -> Result<Option<SessionState>, Self::Error>;

    fn save(&mut self, id: &ID, session: &SessionState) -> Result<(), Self::Error>;

    fn delete(&mut self, id: &ID) -> Result<(), Self::Error>;
}
