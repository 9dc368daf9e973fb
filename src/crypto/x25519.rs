// SPDX-License-Identifier: MIT OR Apache-2.0

//! X25519 key types for Diffie-Hellman key agreement.
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::StaticSecret;

use crate::crypto::Secret;

pub const PUBLIC_KEY_SIZE: usize = 32;

pub const SECRET_KEY_SIZE: usize = 32;

pub const SHARED_SECRET_SIZE: usize = 32;

/// X25519 secret key.
///
/// Identity keys, signed pre-keys, one-time pre-keys, ephemeral handshake keys and ratchet keys
/// all share this type. The contained scalar is never exposed outside the crate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey(Secret<SECRET_KEY_SIZE>);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        // Clamping
        let mut bytes = bytes;
        bytes[0] &= 248u8;
        bytes[31] &= 127u8;
        bytes[31] |= 64u8;
        Self(Secret::from_bytes(bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        self.0.as_bytes()
    }

    /// Returns the public counterpart of this secret key.
    pub fn public_key(&self) -> Result<PublicKey, X25519Error> {
        let secret = StaticSecret::from(*self.as_bytes());
        Ok(PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes()))
    }

    /// X25519 Diffie-Hellman key agreement between our secret key and their public key.
    ///
    /// Fails when the other public key does not contribute to the shared secret (all-zero
    /// output, for example from a small-order point).
    pub fn calculate_agreement(
        &self,
        their_public_key: &PublicKey,
    ) -> Result<Secret<SHARED_SECRET_SIZE>, X25519Error> {
        let secret = StaticSecret::from(*self.as_bytes());
        let shared =
            secret.diffie_hellman(&x25519_dalek::PublicKey::from(their_public_key.to_bytes()));
        if !shared.was_contributory() {
            return Err(X25519Error::NonContributory);
        }
        Ok(Secret::from_bytes(shared.to_bytes()))
    }
}

/// X25519 public key.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "serde_bytes")] [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = X25519Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; PUBLIC_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| X25519Error::InvalidKeySize(bytes.len()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

#[derive(Debug, Error)]
pub enum X25519Error {
    #[error("public key does not contribute to the shared secret")]
    NonContributory,

    #[error("invalid x25519 key size {0}, expected 32 bytes")]
    InvalidKeySize(usize),
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;

    use super::SecretKey;

    #[test]
    fn key_agreement() {
        let rng = Rng::from_seed([1; 32]);

        let alice_secret = SecretKey::from_bytes(rng.random_array().unwrap());
        let bob_secret = SecretKey::from_bytes(rng.random_array().unwrap());

        let alice_shared = alice_secret
            .calculate_agreement(&bob_secret.public_key().unwrap())
            .unwrap();
        let bob_shared = bob_secret
            .calculate_agreement(&alice_secret.public_key().unwrap())
            .unwrap();

        assert_eq!(alice_shared, bob_shared);
    }

    #[test]
    fn distinct_agreements() {
        let rng = Rng::from_seed([1; 32]);

        let alice_secret = SecretKey::from_bytes(rng.random_array().unwrap());
        let bob_secret = SecretKey::from_bytes(rng.random_array().unwrap());
        let charlie_secret = SecretKey::from_bytes(rng.random_array().unwrap());

        let with_bob = alice_secret
            .calculate_agreement(&bob_secret.public_key().unwrap())
            .unwrap();
        let with_charlie = alice_secret
            .calculate_agreement(&charlie_secret.public_key().unwrap())
            .unwrap();

        assert_ne!(with_bob, with_charlie);
    }
}
