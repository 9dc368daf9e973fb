// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use crate::crypto::x25519::PublicKey;
use crate::crypto::xeddsa::{XEdDSAError, XSignature, xeddsa_verify};
use crate::key_bundle::{LifetimeError, OneTimePreKey, OneTimePreKeyId, PreKey};

/// Public key bundle a party publishes so peers can initiate encrypted sessions.
///
/// A bundle carries no private material. The signed pre-key is signed by the identity key; the
/// one-time pre-key, when present, must be handed out at most once by the publishing directory
/// and is consumed by a single handshake. Bundles without a one-time pre-key are valid, forward
/// secrecy of the very first message then rests on the signed pre-key alone.
///
/// Note that while pre-keys are signed for X3DH, bundles should be part of an authenticated
/// messaging format where the whole payload is signed by the same identity to prevent replay and
/// impersonation attacks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyBundle {
    identity_key: PublicKey,
    signed_prekey: PreKey,
    prekey_signature: XSignature,
    onetime_prekey: Option<OneTimePreKey>,
}

impl PreKeyBundle {
    pub fn new(
        identity_key: PublicKey,
        signed_prekey: PreKey,
        prekey_signature: XSignature,
        onetime_prekey: Option<OneTimePreKey>,
    ) -> Self {
        Self {
            identity_key,
            signed_prekey,
            prekey_signature,
            onetime_prekey,
        }
    }

    pub fn identity_key(&self) -> &PublicKey {
        &self.identity_key
    }

    pub fn signed_prekey(&self) -> &PublicKey {
        self.signed_prekey.key()
    }

    pub fn onetime_prekey(&self) -> Option<&PublicKey> {
        self.onetime_prekey.as_ref().map(|key| key.key())
    }

    pub fn onetime_prekey_id(&self) -> Option<OneTimePreKeyId> {
        self.onetime_prekey.as_ref().map(|key| key.id())
    }

    /// Verifies the pre-key lifetime and the signature over the signed pre-key.
    pub fn verify(&self) -> Result<(), KeyBundleError> {
        // Check lifetime.
        self.signed_prekey.verify_lifetime()?;

        // Check signature.
        match xeddsa_verify(
            self.signed_prekey.as_bytes(),
            &self.identity_key,
            &self.prekey_signature,
        ) {
            Ok(()) => Ok(()),
            Err(XEdDSAError::VerificationFailed) => Err(KeyBundleError::InvalidSignature),
            Err(_) => Err(KeyBundleError::MalformedKey),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_cbor(bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(&self)
    }
}

#[derive(Debug, Error)]
pub enum KeyBundleError {
    #[error("pre-key signature is not valid for the bundle's identity key")]
    InvalidSignature,

    #[error("bundle contains a malformed public key")]
    MalformedKey,

    #[error(transparent)]
    Lifetime(#[from] LifetimeError),
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::crypto::x25519::SecretKey;
    use crate::crypto::xeddsa::xeddsa_sign;
    use crate::key_bundle::{KeyBundleError, Lifetime, OneTimePreKey, PreKey};

    use super::PreKeyBundle;

    #[test]
    fn verify() {
        let rng = Rng::from_seed([1; 32]);

        let identity_secret = SecretKey::from_bytes(rng.random_array().unwrap());
        let identity_key = identity_secret.public_key().unwrap();

        let signed_prekey_secret = SecretKey::from_bytes(rng.random_array().unwrap());
        let signed_prekey = PreKey::new(
            signed_prekey_secret.public_key().unwrap(),
            Lifetime::default(),
        );
        let prekey_signature = signed_prekey.sign(&identity_secret, &rng).unwrap();

        let onetime_prekey_secret = SecretKey::from_bytes(rng.random_array().unwrap());
        let onetime_prekey = OneTimePreKey::new(onetime_prekey_secret.public_key().unwrap(), 1);

        // Valid bundles, with and without a one-time pre-key.
        assert!(
            PreKeyBundle::new(
                identity_key,
                signed_prekey,
                prekey_signature,
                Some(onetime_prekey.clone()),
            )
            .verify()
            .is_ok()
        );
        assert!(
            PreKeyBundle::new(identity_key, signed_prekey, prekey_signature, None)
                .verify()
                .is_ok()
        );

        // Invalid lifetime of pre-key.
        let expired_prekey = PreKey::new(
            signed_prekey_secret.public_key().unwrap(),
            Lifetime::from_range(0, 0),
        );
        assert!(matches!(
            PreKeyBundle::new(identity_key, expired_prekey, prekey_signature, None).verify(),
            Err(KeyBundleError::Lifetime(_))
        ));

        // Invalid signature of pre-key.
        let wrong_signature = xeddsa_sign(b"wrong payload", &identity_secret, &rng).unwrap();
        assert!(matches!(
            PreKeyBundle::new(
                identity_key,
                signed_prekey,
                wrong_signature,
                Some(onetime_prekey),
            )
            .verify(),
            Err(KeyBundleError::InvalidSignature)
        ));
    }

    #[test]
    fn encode_decode() {
        let rng = Rng::from_seed([2; 32]);

        let identity_secret = SecretKey::from_bytes(rng.random_array().unwrap());
        let signed_prekey_secret = SecretKey::from_bytes(rng.random_array().unwrap());
        let signed_prekey = PreKey::new(
            signed_prekey_secret.public_key().unwrap(),
            Lifetime::default(),
        );
        let prekey_signature = signed_prekey.sign(&identity_secret, &rng).unwrap();

        let bundle = PreKeyBundle::new(
            identity_secret.public_key().unwrap(),
            signed_prekey,
            prekey_signature,
            None,
        );

        let bytes = bundle.to_bytes().unwrap();
        let bundle_again = PreKeyBundle::from_bytes(&bytes).unwrap();
        assert_eq!(bundle, bundle_again);
    }
}
