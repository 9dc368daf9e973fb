// SPDX-License-Identifier: MIT OR Apache-2.0

//! Public pre-key bundles for X3DH key agreement.
//!
//! A party publishes its bundle (identity key, signed pre-key and optionally a one-time pre-key)
//! through a directory collaborator. Peers fetch the bundle to initiate an encrypted session
//! without the publishing party being online.
#[allow(clippy::module_inception)]
mod key_bundle;
mod lifetime;
mod prekey;

pub use key_bundle::{KeyBundleError, PreKeyBundle};
pub use lifetime::{Lifetime, LifetimeError};
pub use prekey::{OneTimePreKey, OneTimePreKeyId, PreKey, PreKeyId, latest_prekey};
