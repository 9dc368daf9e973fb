// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::crypto::Rng;
use crate::crypto::x25519::SecretKey;
use crate::key_bundle::{Lifetime, OneTimePreKeyId, PreKeyBundle, PreKeyId};

/// Manages our own identity secret.
pub trait IdentityManager<Y> {
    fn identity_secret(y: &Y) -> &SecretKey;
}

/// Manages our own pre-key secrets and generates public pre-key bundles.
pub trait PreKeyManager {
    type State: Debug + Serialize + for<'a> Deserialize<'a>;

    type Error: Error;

    /// Returns the signed pre-key secret with the given id.
    ///
    /// Superseded pre-keys need to stay resolvable for as long as handshakes against them can
    /// still be in flight.
    fn prekey_secret<'a>(
        y: &'a Self::State,
        id: &PreKeyId,
    ) -> Result<&'a SecretKey, Self::Error>;

    fn rotate_prekey(
        y: Self::State,
        lifetime: Lifetime,
        rng: &Rng,
    ) -> Result<Self::State, Self::Error>;

    /// Returns the latest public pre-key bundle without a one-time pre-key.
    fn prekey_bundle(y: &Self::State) -> Result<PreKeyBundle, Self::Error>;

    /// Creates a new public pre-key bundle containing a fresh one-time pre-key.
    fn generate_onetime_bundle(
        y: Self::State,
        rng: &Rng,
    ) -> Result<(Self::State, PreKeyBundle), Self::Error>;

    /// Consumes a one-time pre-key secret; it is deleted and a second use fails.
    fn use_onetime_secret(
        y: Self::State,
        id: OneTimePreKeyId,
    ) -> Result<(Self::State, Option<SecretKey>), Self::Error>;
}
