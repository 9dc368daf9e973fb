// SPDX-License-Identifier: MIT OR Apache-2.0

//! X3DH key agreement establishing new sessions.
//!
//! The initiator fetches the peer's published [`PreKeyBundle`] and derives a shared secret from
//! up to four Diffie-Hellman agreements between identity, signed pre-key, ephemeral and one-time
//! pre-key material. The responder derives the same secret later from the initiator's
//! [`HandshakeMessage`], without both parties ever being online at the same time.
//!
//! A bundle whose pre-key signature does not verify is rejected before any key material is
//! derived; no session is created from an unauthenticated bundle.
//!
//! <https://signal.org/docs/specifications/x3dh/>
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use crate::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use crate::crypto::hkdf::{HkdfError, hkdf};
use crate::crypto::x25519::{PublicKey, SecretKey, SHARED_SECRET_SIZE, X25519Error};
use crate::crypto::{Rng, RngError, Secret};
use crate::key_bundle::{KeyBundleError, OneTimePreKeyId, PreKeyBundle, PreKeyId};
use crate::key_manager::KeyManager;
use crate::ratchet::ratchet_root;
use crate::session::{Chain, RootKey, SessionState, SessionStatus, SkippedMessageKeys};
use crate::traits::{IdentityManager, PreKeyManager};

const X3DH_INFO: &[u8] = b"duplex-ratchet-x3dh";

/// X3DH handshake over a pre-key manager.
pub struct Handshake<KMG> {
    _marker: PhantomData<KMG>,
}

/// X3DH handshake using the default [`KeyManager`].
pub type SessionHandshake = Handshake<KeyManager>;

/// Metadata the initiator attaches to its first message so the responder can derive the same
/// session. Contains public key material only.
///
/// The named one-time pre-key is consumed by [`Handshake::respond`]; the publishing directory
/// must remove it from the published pool once the handshake succeeded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    sender_identity_key: PublicKey,
    ephemeral_key: PublicKey,
    signed_prekey: PreKeyId,
    onetime_prekey_id: Option<OneTimePreKeyId>,
}

impl HandshakeMessage {
    /// Identity key the initiator claims; pinned into the responder's session.
    pub fn sender_identity_key(&self) -> &PublicKey {
        &self.sender_identity_key
    }

    /// Signed pre-key of the responder this handshake was computed against.
    pub fn signed_prekey(&self) -> &PreKeyId {
        &self.signed_prekey
    }

    /// One-time pre-key consumed by this handshake, if the published bundle contained one.
    pub fn onetime_prekey_id(&self) -> Option<OneTimePreKeyId> {
        self.onetime_prekey_id
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_cbor(bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(&self)
    }
}

impl<KMG> Handshake<KMG>
where
    KMG: IdentityManager<KMG::State> + PreKeyManager,
{
    /// Establishes a new session towards a peer from their published pre-key bundle.
    ///
    /// The bundle is verified first; an invalid pre-key signature aborts the handshake and no
    /// session is created. A bundle without a one-time pre-key is accepted, forward secrecy of
    /// the very first message then rests on the signed pre-key alone.
    ///
    /// The returned session can encrypt immediately. The [`HandshakeMessage`] must reach the
    /// peer together with (or before) the first encrypted message.
    pub fn initiate(
        y_manager: &KMG::State,
        their_bundle: &PreKeyBundle,
        rng: &Rng,
    ) -> HandshakeResult<(SessionState, HandshakeMessage)> {
        their_bundle.verify().map_err(|err| match err {
            KeyBundleError::InvalidSignature => HandshakeError::InvalidSignature,
            err => HandshakeError::MalformedBundle(err),
        })?;

        let our_identity_secret = KMG::identity_secret(y_manager);
        let our_identity_key = our_identity_secret.public_key()?;

        let ephemeral_secret = SecretKey::from_bytes(rng.random_array()?);
        let ephemeral_key = ephemeral_secret.public_key()?;

        let dh_1 = our_identity_secret.calculate_agreement(their_bundle.signed_prekey())?;
        let dh_2 = ephemeral_secret.calculate_agreement(their_bundle.identity_key())?;
        let dh_3 = ephemeral_secret.calculate_agreement(their_bundle.signed_prekey())?;
        let dh_4 = their_bundle
            .onetime_prekey()
            .map(|onetime_prekey| ephemeral_secret.calculate_agreement(onetime_prekey))
            .transpose()?;

        let shared_secret = derive_shared_secret(&dh_1, &dh_2, &dh_3, dh_4.as_ref())?;

        // First ratchet step against the peer's signed pre-key, so our sending chain exists
        // before the peer ever comes online.
        let our_ratchet_secret = SecretKey::from_bytes(rng.random_array()?);
        let dh_output = our_ratchet_secret.calculate_agreement(their_bundle.signed_prekey())?;
        let (root_key, chain_key) = ratchet_root(&shared_secret, &dh_output)?;

        let session = SessionState {
            status: SessionStatus::AwaitingFirstMessage,
            our_identity_key,
            their_identity_key: *their_bundle.identity_key(),
            root_key,
            our_ratchet_secret,
            their_ratchet_key: Some(*their_bundle.signed_prekey()),
            sending: Some(Chain {
                chain_key,
                counter: 0,
            }),
            receiving: None,
            previous_sending_counter: 0,
            skipped_keys: SkippedMessageKeys::new(),
        };

        let message = HandshakeMessage {
            sender_identity_key: our_identity_key,
            ephemeral_key,
            signed_prekey: *their_bundle.signed_prekey(),
            onetime_prekey_id: their_bundle.onetime_prekey_id(),
        };

        Ok((session, message))
    }

    /// Derives the initiator's session on the responding side.
    ///
    /// Mirrors the initiator's Diffie-Hellman computations using the signed pre-key secret named
    /// in the message (superseded pre-keys still resolve) and the one-time pre-key secret, which
    /// is consumed in the process: responding to a second handshake against the same one-time
    /// pre-key fails with [`HandshakeError::PreKeyReuse`].
    ///
    /// The responder's session cannot send yet; its chains seed when the first message is
    /// decrypted.
    pub fn respond(
        y_manager: KMG::State,
        message: &HandshakeMessage,
    ) -> HandshakeResult<(KMG::State, SessionState)> {
        let our_identity_secret = KMG::identity_secret(&y_manager);
        let our_identity_key = our_identity_secret.public_key()?;

        let prekey_secret = KMG::prekey_secret(&y_manager, &message.signed_prekey)
            .map_err(|_| HandshakeError::UnknownPreKey(message.signed_prekey))?;
        let our_ratchet_secret = prekey_secret.clone();

        let dh_1 = prekey_secret.calculate_agreement(&message.sender_identity_key)?;
        let dh_2 = our_identity_secret.calculate_agreement(&message.ephemeral_key)?;
        let dh_3 = prekey_secret.calculate_agreement(&message.ephemeral_key)?;

        let (y_manager, onetime_secret) = match message.onetime_prekey_id {
            Some(id) => KMG::use_onetime_secret(y_manager, id)
                .map_err(|_| HandshakeError::PreKeyReuse(id))?,
            None => (y_manager, None),
        };
        let dh_4 = onetime_secret
            .map(|secret| secret.calculate_agreement(&message.ephemeral_key))
            .transpose()?;

        let shared_secret = derive_shared_secret(&dh_1, &dh_2, &dh_3, dh_4.as_ref())?;

        let session = SessionState {
            status: SessionStatus::AwaitingFirstMessage,
            our_identity_key,
            their_identity_key: message.sender_identity_key,
            root_key: shared_secret,
            our_ratchet_secret,
            their_ratchet_key: None,
            sending: None,
            receiving: None,
            previous_sending_counter: 0,
            skipped_keys: SkippedMessageKeys::new(),
        };

        Ok((y_manager, session))
    }
}

/// Concatenates the Diffie-Hellman outputs in their fixed order and condenses them into the
/// initial root key.
fn derive_shared_secret(
    dh_1: &Secret<SHARED_SECRET_SIZE>,
    dh_2: &Secret<SHARED_SECRET_SIZE>,
    dh_3: &Secret<SHARED_SECRET_SIZE>,
    dh_4: Option<&Secret<SHARED_SECRET_SIZE>>,
) -> Result<RootKey, HkdfError> {
    let mut ikm = Vec::with_capacity(4 * SHARED_SECRET_SIZE);
    ikm.extend_from_slice(dh_1.as_bytes());
    ikm.extend_from_slice(dh_2.as_bytes());
    ikm.extend_from_slice(dh_3.as_bytes());
    if let Some(dh_4) = dh_4 {
        ikm.extend_from_slice(dh_4.as_bytes());
    }

    let shared_secret: [u8; 32] = hkdf(None, &ikm, X3DH_INFO)?;
    ikm.zeroize();

    Ok(Secret::from_bytes(shared_secret))
}

pub type HandshakeResult<T> = Result<T, HandshakeError>;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    X25519(#[from] X25519Error),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error("pre-key bundle signature is not valid for its identity key")]
    InvalidSignature,

    #[error("pre-key bundle was rejected: {0}")]
    MalformedBundle(#[source] KeyBundleError),

    #[error("no signed pre-key secret known for {0}")]
    UnknownPreKey(PreKeyId),

    #[error("one-time pre-key {0} is unknown or has already been used")]
    PreKeyReuse(OneTimePreKeyId),
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::key_bundle::{Lifetime, PreKeyBundle};
    use crate::key_manager::KeyManager;
    use crate::session::SessionStatus;
    use crate::traits::PreKeyManager;

    use super::{HandshakeError, SessionHandshake};

    #[test]
    fn handshake_pins_identities_and_seeds_chains() {
        let rng = Rng::from_seed([1; 32]);

        let alice_identity = KeyManager::generate_identity(&rng).unwrap();
        let alice_manager = KeyManager::init(&alice_identity, Lifetime::default(), &rng).unwrap();

        let bob_identity = KeyManager::generate_identity(&rng).unwrap();
        let bob_manager = KeyManager::init(&bob_identity, Lifetime::default(), &rng).unwrap();
        let (bob_manager, bob_bundle) =
            KeyManager::generate_onetime_bundle(bob_manager, &rng).unwrap();

        let (alice_session, handshake_message) =
            SessionHandshake::initiate(&alice_manager, &bob_bundle, &rng).unwrap();
        let (_bob_manager, bob_session) =
            SessionHandshake::respond(bob_manager, &handshake_message).unwrap();

        // Alice already turned the ratchet once against Bob's signed pre-key; the shared X3DH
        // secret itself became Bob's initial root key.
        assert_ne!(alice_session.root_key, bob_session.root_key);
        assert!(alice_session.sending.is_some());
        assert!(bob_session.sending.is_none());

        // Both sessions pin the other party's identity.
        assert_eq!(
            alice_session.their_identity_key,
            bob_identity.public_key().unwrap()
        );
        assert_eq!(
            bob_session.their_identity_key,
            alice_identity.public_key().unwrap()
        );

        assert_eq!(alice_session.status(), SessionStatus::AwaitingFirstMessage);
        assert_eq!(bob_session.status(), SessionStatus::AwaitingFirstMessage);
    }

    #[test]
    fn handshake_without_onetime_prekey() {
        let rng = Rng::from_seed([2; 32]);

        let alice_identity = KeyManager::generate_identity(&rng).unwrap();
        let alice_manager = KeyManager::init(&alice_identity, Lifetime::default(), &rng).unwrap();

        let bob_identity = KeyManager::generate_identity(&rng).unwrap();
        let bob_manager = KeyManager::init(&bob_identity, Lifetime::default(), &rng).unwrap();
        let bob_bundle = KeyManager::prekey_bundle(&bob_manager).unwrap();

        let (_alice_session, handshake_message) =
            SessionHandshake::initiate(&alice_manager, &bob_bundle, &rng).unwrap();
        assert!(handshake_message.onetime_prekey_id().is_none());

        // Absence of a one-time pre-key is tolerated on both ends.
        assert!(SessionHandshake::respond(bob_manager, &handshake_message).is_ok());
    }

    #[test]
    fn invalid_bundle_signature_aborts_the_handshake() {
        let rng = Rng::from_seed([3; 32]);

        let alice_identity = KeyManager::generate_identity(&rng).unwrap();
        let alice_manager = KeyManager::init(&alice_identity, Lifetime::default(), &rng).unwrap();

        let bob_identity = KeyManager::generate_identity(&rng).unwrap();
        let bob_manager = KeyManager::init(&bob_identity, Lifetime::default(), &rng).unwrap();
        let (_bob_manager, bob_bundle) =
            KeyManager::generate_onetime_bundle(bob_manager, &rng).unwrap();

        // Re-assemble Bob's bundle with a signature by a different identity.
        let mallory_identity = KeyManager::generate_identity(&rng).unwrap();
        let mallory_manager =
            KeyManager::init(&mallory_identity, Lifetime::default(), &rng).unwrap();
        let mallory_bundle = KeyManager::prekey_bundle(&mallory_manager).unwrap();

        let forged_bundle = PreKeyBundle::new(
            *bob_bundle.identity_key(),
            crate::key_bundle::PreKey::new(*mallory_bundle.signed_prekey(), Lifetime::default()),
            crate::crypto::xeddsa::xeddsa_sign(
                mallory_bundle.signed_prekey().as_bytes(),
                &mallory_identity,
                &rng,
            )
            .unwrap(),
            None,
        );

        assert!(matches!(
            SessionHandshake::initiate(&alice_manager, &forged_bundle, &rng),
            Err(HandshakeError::InvalidSignature)
        ));
    }

    #[test]
    fn onetime_prekeys_cannot_be_reused() {
        let rng = Rng::from_seed([4; 32]);

        let alice_identity = KeyManager::generate_identity(&rng).unwrap();
        let alice_manager = KeyManager::init(&alice_identity, Lifetime::default(), &rng).unwrap();

        let bob_identity = KeyManager::generate_identity(&rng).unwrap();
        let bob_manager = KeyManager::init(&bob_identity, Lifetime::default(), &rng).unwrap();
        let (bob_manager, bob_bundle) =
            KeyManager::generate_onetime_bundle(bob_manager, &rng).unwrap();

        let (_alice_session, handshake_message) =
            SessionHandshake::initiate(&alice_manager, &bob_bundle, &rng).unwrap();

        // First handshake consumes the one-time pre-key secret.
        let (bob_manager, _bob_session) =
            SessionHandshake::respond(bob_manager, &handshake_message).unwrap();

        // Replaying the handshake fails, the secret is gone.
        let result = SessionHandshake::respond(bob_manager, &handshake_message);
        assert!(matches!(result, Err(HandshakeError::PreKeyReuse(_))));
    }

    #[test]
    fn rotated_prekeys_still_resolve_inflight_handshakes() {
        let rng = Rng::from_seed([5; 32]);

        let alice_identity = KeyManager::generate_identity(&rng).unwrap();
        let alice_manager = KeyManager::init(&alice_identity, Lifetime::default(), &rng).unwrap();

        let bob_identity = KeyManager::generate_identity(&rng).unwrap();
        let bob_manager = KeyManager::init(&bob_identity, Lifetime::default(), &rng).unwrap();
        let bob_bundle = KeyManager::prekey_bundle(&bob_manager).unwrap();

        // Alice initiates against the current bundle ...
        let (_alice_session, handshake_message) =
            SessionHandshake::initiate(&alice_manager, &bob_bundle, &rng).unwrap();

        // ... Bob rotates before the handshake message arrives.
        let bob_manager = KeyManager::rotate_prekey(bob_manager, Lifetime::default(), &rng).unwrap();

        assert!(SessionHandshake::respond(bob_manager, &handshake_message).is_ok());
    }
}
