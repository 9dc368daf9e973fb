// SPDX-License-Identifier: MIT OR Apache-2.0

//! XChaCha20-Poly1305 authenticated encryption with associated data (AEAD).
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use thiserror::Error;

pub const XAEAD_KEY_SIZE: usize = 32;

pub const XAEAD_NONCE_SIZE: usize = 24;

/// Random nonce for XChaCha20-Poly1305, sent along with the ciphertext.
///
/// The extended 24-byte nonce makes random generation per message safe.
pub type XAeadNonce = [u8; XAEAD_NONCE_SIZE];

/// Encrypts plaintext with authentication over the optional associated data.
pub fn xaead_seal(
    plaintext: &[u8],
    key: &[u8; XAEAD_KEY_SIZE],
    nonce: XAeadNonce,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, XAeadError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: aad.unwrap_or_default(),
            },
        )
        .map_err(|_| XAeadError::Encrypt)?;
    Ok(ciphertext)
}

/// Decrypts ciphertext, verifying the authentication tag over ciphertext and associated data.
pub fn xaead_open(
    ciphertext: &[u8],
    key: &[u8; XAEAD_KEY_SIZE],
    nonce: XAeadNonce,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, XAeadError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let plaintext = cipher
        .decrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: ciphertext,
                aad: aad.unwrap_or_default(),
            },
        )
        .map_err(|_| XAeadError::Decrypt)?;
    Ok(plaintext)
}

#[derive(Debug, Error)]
pub enum XAeadError {
    #[error("aead encryption failed")]
    Encrypt,

    #[error("aead decryption failed")]
    Decrypt,
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;

    use super::{XAeadNonce, xaead_open, xaead_seal};

    #[test]
    fn seal_and_open() {
        let rng = Rng::from_seed([1; 32]);
        let key: [u8; 32] = rng.random_array().unwrap();
        let nonce: XAeadNonce = rng.random_array().unwrap();

        let ciphertext = xaead_seal(b"secret message", &key, nonce, Some(b"context")).unwrap();
        let plaintext = xaead_open(&ciphertext, &key, nonce, Some(b"context")).unwrap();

        assert_eq!(plaintext, b"secret message");
    }

    #[test]
    fn tampering_fails_authentication() {
        let rng = Rng::from_seed([1; 32]);
        let key: [u8; 32] = rng.random_array().unwrap();
        let nonce: XAeadNonce = rng.random_array().unwrap();

        let mut ciphertext = xaead_seal(b"secret message", &key, nonce, Some(b"context")).unwrap();
        ciphertext[0] ^= 1;
        assert!(xaead_open(&ciphertext, &key, nonce, Some(b"context")).is_err());
    }

    #[test]
    fn associated_data_is_bound() {
        let rng = Rng::from_seed([1; 32]);
        let key: [u8; 32] = rng.random_array().unwrap();
        let nonce: XAeadNonce = rng.random_array().unwrap();

        let ciphertext = xaead_seal(b"secret message", &key, nonce, Some(b"context")).unwrap();
        assert!(xaead_open(&ciphertext, &key, nonce, Some(b"other context")).is_err());
        assert!(xaead_open(&ciphertext, &key, nonce, None).is_err());
    }
}
