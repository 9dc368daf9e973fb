// SPDX-License-Identifier: MIT OR Apache-2.0

//! HKDF key derivation (HMAC-based extract-and-expand, SHA-256).
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

/// Derives `N` bytes of output key material from the given input key material.
///
/// The `info` string provides domain separation between the different derivations used in this
/// crate (handshake secret, root advance, chain advance).
pub fn hkdf<const N: usize>(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
) -> Result<[u8; N], HkdfError> {
    let hkdf = Hkdf::<Sha256>::new(salt, ikm);
    let mut out = [0u8; N];
    hkdf.expand(info, &mut out)
        .map_err(|_| HkdfError::InvalidOutputLength)?;
    Ok(out)
}

#[derive(Debug, Error)]
pub enum HkdfError {
    #[error("requested hkdf output length is invalid")]
    InvalidOutputLength,
}

#[cfg(test)]
mod tests {
    use super::hkdf;

    #[test]
    fn deterministic_derivation() {
        let out_1: [u8; 32] = hkdf(None, b"input key material", b"info").unwrap();
        let out_2: [u8; 32] = hkdf(None, b"input key material", b"info").unwrap();
        assert_eq!(out_1, out_2);
    }

    #[test]
    fn domain_separation() {
        let out_1: [u8; 32] = hkdf(None, b"input key material", b"info one").unwrap();
        let out_2: [u8; 32] = hkdf(None, b"input key material", b"info two").unwrap();
        assert_ne!(out_1, out_2);
    }
}
