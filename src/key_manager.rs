// SPDX-License-Identifier: MIT OR Apache-2.0

//! Manager for our own secret key material.
//!
//! The manager holds the long-term identity secret, the signed pre-key secrets and the pool of
//! one-time pre-key secrets. Peers should rotate their pre-key bundles in good time before the
//! lifetime expires so others can still receive a valid bundle when the network is unstable or
//! peers are offline for longer.
//!
//! Superseded signed pre-keys are kept around (until garbage-collected via [`remove_expired`])
//! so handshakes that were initiated against an older bundle still complete. One-time pre-key
//! secrets are deleted the moment they are used, using one twice is an error.
//!
//! [`remove_expired`]: KeyManager::remove_expired
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::x25519::{PublicKey, SecretKey, X25519Error};
use crate::crypto::xeddsa::{XEdDSAError, XSignature};
use crate::crypto::{Rng, RngError};
use crate::key_bundle::{
    Lifetime, OneTimePreKey, OneTimePreKeyId, PreKey, PreKeyBundle, PreKeyId, latest_prekey,
};
use crate::traits::{IdentityManager, PreKeyManager};

/// Key manager to maintain secret key material (like our identity key) and to generate signed
/// public pre-key bundles.
#[derive(Clone, Debug)]
pub struct KeyManager;

/// Serializable state of key manager (for persistence via the secure-storage collaborator).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyManagerState {
    identity_secret: SecretKey,
    identity_key: PublicKey,
    prekeys: HashMap<PreKeyId, PreKeyState>,
    onetime_secrets: HashMap<OneTimePreKeyId, (PreKeyId, SecretKey)>,
    onetime_next_id: OneTimePreKeyId,
}

impl KeyManagerState {
    fn latest_prekey(&self) -> Option<PreKeyState> {
        let prekeys = self.prekeys.values().map(|state| &state.prekey).collect();
        let latest = latest_prekey(prekeys);
        latest.map(|prekey| {
            self.prekeys
                .get(prekey.key())
                .expect("we know the item exists in the set")
                .clone()
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreKeyState {
    prekey: PreKey,
    signature: XSignature,
    secret: SecretKey,
}

impl PreKeyState {
    pub fn init(
        identity_secret: &SecretKey,
        lifetime: Lifetime,
        rng: &Rng,
    ) -> Result<Self, KeyManagerError> {
        let secret = SecretKey::from_bytes(rng.random_array()?);
        let prekey = PreKey::new(secret.public_key()?, lifetime);
        let signature = prekey.sign(identity_secret, rng)?;

        Ok(Self {
            prekey,
            signature,
            secret,
        })
    }

    pub fn id(&self) -> PreKeyId {
        *self.prekey.key()
    }

    pub fn lifetime(&self) -> &Lifetime {
        self.prekey.lifetime()
    }
}

impl KeyManager {
    /// Generates a fresh long-term identity secret.
    ///
    /// This happens exactly once per user, the identity key is never rotated. Failing to collect
    /// entropy is fatal.
    pub fn generate_identity(rng: &Rng) -> Result<SecretKey, KeyManagerError> {
        Ok(SecretKey::from_bytes(rng.random_array()?))
    }

    /// Returns newly initialised key-manager state, holding our identity secret and a new signed
    /// pre-key secret which can be used to generate key bundles.
    pub fn init(
        identity_secret: &SecretKey,
        lifetime: Lifetime,
        rng: &Rng,
    ) -> Result<KeyManagerState, KeyManagerError> {
        let prekey = PreKeyState::init(identity_secret, lifetime, rng)?;

        Ok(KeyManagerState {
            identity_key: identity_secret.public_key()?,
            identity_secret: identity_secret.clone(),
            prekeys: HashMap::from([(prekey.id(), prekey)]),
            onetime_secrets: HashMap::new(),
            onetime_next_id: 0,
        })
    }

    /// Creates a pool of `count` public pre-key bundles, each with its own fresh one-time
    /// pre-key, ready to be handed to the publishing directory.
    pub fn generate_onetime_bundles(
        y: KeyManagerState,
        count: usize,
        rng: &Rng,
    ) -> Result<(KeyManagerState, Vec<PreKeyBundle>), KeyManagerError> {
        let mut y_i = y;
        let mut bundles = Vec::with_capacity(count);
        for _ in 0..count {
            let (y_ii, bundle) = Self::generate_onetime_bundle(y_i, rng)?;
            y_i = y_ii;
            bundles.push(bundle);
        }
        Ok((y_i, bundles))
    }

    /// Remove all expired pre-keys and the one-time secrets attached to them.
    pub fn remove_expired(mut y: KeyManagerState) -> KeyManagerState {
        y.prekeys = y
            .prekeys
            .into_iter()
            .filter(|(_, prekey)| prekey.prekey.verify_lifetime().is_ok())
            .collect();

        y.onetime_secrets = y
            .onetime_secrets
            .into_iter()
            .filter(|(_, (prekey_id, _))| y.prekeys.contains_key(prekey_id))
            .collect();

        y
    }
}

impl IdentityManager<KeyManagerState> for KeyManager {
    /// Returns identity key secret.
    fn identity_secret(y: &KeyManagerState) -> &SecretKey {
        &y.identity_secret
    }
}

impl PreKeyManager for KeyManager {
    type State = KeyManagerState;

    type Error = KeyManagerError;

    /// Returns signed pre-key secret by id.
    ///
    /// Throws an error if the pre-key was not found (for example because it expired and was
    /// garbage-collected).
    fn prekey_secret<'a>(
        y: &'a Self::State,
        id: &PreKeyId,
    ) -> Result<&'a SecretKey, Self::Error> {
        match y.prekeys.get(id) {
            Some(prekey) => Ok(&prekey.secret),
            None => Err(KeyManagerError::UnknownPreKeySecret(*id)),
        }
    }

    /// Generates a new signed pre-key secret with the given lifetime.
    ///
    /// The previous pre-keys stay available for handshakes which are still in flight.
    fn rotate_prekey(
        mut y: Self::State,
        lifetime: Lifetime,
        rng: &Rng,
    ) -> Result<Self::State, Self::Error> {
        let prekey = PreKeyState::init(&y.identity_secret, lifetime, rng)?;
        y.prekeys.insert(prekey.id(), prekey);
        Ok(y)
    }

    /// Returns the latest public pre-key bundle (without a one-time pre-key) which can be
    /// published on the network.
    ///
    /// Note that pre-keys can be expired and thus invalid, this method will return an error in
    /// this case and applications need to rotate when necessary.
    fn prekey_bundle(y: &Self::State) -> Result<PreKeyBundle, Self::Error> {
        y.latest_prekey()
            .map(|latest| {
                PreKeyBundle::new(y.identity_key, latest.prekey, latest.signature, None)
            })
            .ok_or(KeyManagerError::NoPreKeysAvailable)
    }

    /// Creates a new public pre-key bundle with a fresh one-time pre-key.
    fn generate_onetime_bundle(
        mut y: Self::State,
        rng: &Rng,
    ) -> Result<(Self::State, PreKeyBundle), Self::Error> {
        let latest = y
            .latest_prekey()
            .ok_or(KeyManagerError::NoPreKeysAvailable)?;

        let onetime_secret = SecretKey::from_bytes(rng.random_array()?);
        let onetime_key = OneTimePreKey::new(onetime_secret.public_key()?, y.onetime_next_id);

        {
            let existing_key = y
                .onetime_secrets
                .insert(onetime_key.id(), (latest.id(), onetime_secret));
            // Sanity check.
            assert!(
                existing_key.is_none(),
                "should never insert same id more than once"
            );
        };

        let bundle = PreKeyBundle::new(
            y.identity_key,
            latest.prekey,
            latest.signature,
            Some(onetime_key),
        );

        y.onetime_next_id += 1;

        Ok((y, bundle))
    }

    /// Returns a one-time pre-key secret used by a sender during X3DH and deletes it.
    ///
    /// Throws an error when the requested pre-key secret is unknown (and thus probably was
    /// already used once).
    fn use_onetime_secret(
        mut y: Self::State,
        id: OneTimePreKeyId,
    ) -> Result<(Self::State, Option<SecretKey>), Self::Error> {
        match y.onetime_secrets.remove(&id) {
            Some(secret) => Ok((y, Some(secret.1))),
            None => Err(KeyManagerError::UnknownOneTimeSecret(id)),
        }
    }
}

#[derive(Debug, Error)]
pub enum KeyManagerError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    XEdDSA(#[from] XEdDSAError),

    #[error(transparent)]
    X25519(#[from] X25519Error),

    #[error("could not find one-time pre-key secret with id {0}")]
    UnknownOneTimeSecret(OneTimePreKeyId),

    #[error("could not find pre-key secret with id {0}")]
    UnknownPreKeySecret(PreKeyId),

    #[error("no valid pre-keys available, they are either expired or too early")]
    NoPreKeysAvailable,
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use crate::crypto::Rng;
    use crate::key_bundle::Lifetime;
    use crate::key_manager::KeyManagerError;

    use super::{KeyManager, PreKeyManager};

    #[test]
    fn generate_onetime_bundles() {
        let rng = Rng::from_seed([1; 32]);

        let identity_secret = KeyManager::generate_identity(&rng).unwrap();
        let state = KeyManager::init(&identity_secret, Lifetime::default(), &rng).unwrap();

        let (state, mut bundles) = KeyManager::generate_onetime_bundles(state, 2, &rng).unwrap();
        let bundle_2 = bundles.pop().unwrap();
        let bundle_1 = bundles.pop().unwrap();

        // Signed pre-key stays the same between the bundles and matches the stored secret.
        assert_eq!(
            bundle_1.signed_prekey(),
            &KeyManager::prekey_secret(&state, bundle_1.signed_prekey())
                .expect("non-expired prekey exists")
                .public_key()
                .unwrap()
        );
        assert_eq!(bundle_1.signed_prekey(), bundle_2.signed_prekey());

        // Identity key matches the identity secret.
        assert_eq!(
            bundle_1.identity_key(),
            &identity_secret.public_key().unwrap()
        );

        // Signatures are correct.
        assert!(bundle_1.verify().is_ok());
        assert!(bundle_2.verify().is_ok());

        let (state, onetime_secret_1) =
            KeyManager::use_onetime_secret(state, bundle_1.onetime_prekey_id().unwrap()).unwrap();
        let (state, onetime_secret_2) =
            KeyManager::use_onetime_secret(state, bundle_2.onetime_prekey_id().unwrap()).unwrap();

        // Secrets got removed from state.
        assert_eq!(state.onetime_secrets.len(), 0);

        // Retrieving unknown one-time pre-keys throws an error.
        assert!(KeyManager::use_onetime_secret(state.clone(), 42).is_err());

        // Re-retrieving consumed one-time pre-keys throws an error.
        assert!(
            KeyManager::use_onetime_secret(state.clone(), bundle_1.onetime_prekey_id().unwrap())
                .is_err()
        );
        assert!(
            KeyManager::use_onetime_secret(state.clone(), bundle_2.onetime_prekey_id().unwrap())
                .is_err()
        );

        // One-time pre-keys match the secrets.
        assert_eq!(
            bundle_1.onetime_prekey().unwrap(),
            &onetime_secret_1.unwrap().public_key().unwrap()
        );
        assert_eq!(
            bundle_2.onetime_prekey().unwrap(),
            &onetime_secret_2.unwrap().public_key().unwrap()
        );

        // One-time pre-keys are unique.
        assert_ne!(bundle_1.onetime_prekey(), bundle_2.onetime_prekey());
        assert_ne!(bundle_1.onetime_prekey_id(), bundle_2.onetime_prekey_id());
    }

    #[test]
    fn expired_prekey_bundles() {
        let rng = Rng::from_seed([1; 32]);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is after the UNIX epoch")
            .as_secs();

        let identity_secret = KeyManager::generate_identity(&rng).unwrap();

        let y = KeyManager::init(
            &identity_secret,
            Lifetime::from_range(now - 120, now - 60), // expired lifetime
            &rng,
        )
        .unwrap();

        // Current pre-key bundle is invalid.
        assert!(matches!(
            KeyManager::prekey_bundle(&y),
            Err(KeyManagerError::NoPreKeysAvailable)
        ));

        // Can't generate one-time key bundles with expired pre-keys.
        assert!(matches!(
            KeyManager::generate_onetime_bundle(y.clone(), &rng),
            Err(KeyManagerError::NoPreKeysAvailable)
        ));

        // Generate a new one.
        let y_i = KeyManager::rotate_prekey(y, Lifetime::default(), &rng).unwrap();
        assert!(KeyManager::prekey_bundle(&y_i).is_ok());
    }

    #[test]
    fn rotation_keeps_superseded_prekeys() {
        let rng = Rng::from_seed([1; 32]);

        let identity_secret = KeyManager::generate_identity(&rng).unwrap();
        let y = KeyManager::init(&identity_secret, Lifetime::default(), &rng).unwrap();

        let old_bundle = KeyManager::prekey_bundle(&y).unwrap();

        let y = KeyManager::rotate_prekey(y, Lifetime::default(), &rng).unwrap();
        assert_eq!(y.prekeys.len(), 2);

        // The superseded pre-key secret is still resolvable for in-flight handshakes.
        assert!(KeyManager::prekey_secret(&y, old_bundle.signed_prekey()).is_ok());
    }

    #[test]
    fn garbage_collection() {
        let rng = Rng::from_seed([1; 32]);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is after the UNIX epoch")
            .as_secs();

        let identity_secret = KeyManager::generate_identity(&rng).unwrap();

        // Initialise key manager with one expired pre-key.
        let y = KeyManager::init(
            &identity_secret,
            Lifetime::from_range(now - 120, now - 60), // expired lifetime
            &rng,
        )
        .unwrap();
        assert_eq!(y.prekeys.len(), 1);

        // Add a second, _valid_ pre-key.
        let y = KeyManager::rotate_prekey(y, Lifetime::default(), &rng).unwrap();
        assert_eq!(y.prekeys.len(), 2);

        // Remove all expired pre-keys.
        let y = KeyManager::remove_expired(y);
        assert_eq!(y.prekeys.len(), 1);
    }
}
