// SPDX-License-Identifier: MIT OR Apache-2.0

//! Double-ratchet message encryption.
//!
//! Each session combines two ratchets. The symmetric-key ratchet advances a chain key one-way for
//! every message, deriving a fresh message key which cannot be recovered from the successor chain
//! key (forward secrecy within a chain). The Diffie-Hellman ratchet rotates the chain keys
//! themselves whenever a new ratchet public key is observed from the peer, mixing a fresh DH
//! output into the root key (break-in recovery).
//!
//! Messages arriving out of order are handled by deriving the keys for skipped counters ahead of
//! time and caching them in the session's bounded skipped-key cache.
//!
//! All operations consume the session state and return the updated state. A failed decryption
//! returns an error without any caller-visible mutation, so a corrupt or forged payload cannot
//! desynchronise the ratchet.
use thiserror::Error;
use zeroize::Zeroize;

use crate::cbor::EncodeError;
use crate::crypto::hkdf::{HkdfError, hkdf};
use crate::crypto::x25519::{PublicKey, SecretKey, X25519Error};
use crate::crypto::xchacha20::{XAeadError, XAeadNonce, xaead_open, xaead_seal};
use crate::crypto::{Rng, RngError, Secret};
use crate::message::{EncryptedMessage, MessageHeader};
use crate::session::{Chain, ChainKey, MessageKey, RootKey, SessionState, SessionStatus};

/// Maximum number of message keys derived ahead within one chain in a single step. Larger jumps
/// indicate desynchronisation or flooding and are rejected.
pub const MAX_SKIP: u32 = 100;

const ROOT_INFO: &[u8] = b"duplex-ratchet-root";

const CHAIN_INFO: &[u8] = b"duplex-ratchet-chain";

/// Double-ratchet engine operating on per-peer [`SessionState`] values.
pub struct Ratchet;

impl Ratchet {
    /// Encrypts a plaintext towards the peer, advancing the sending chain by one message key.
    ///
    /// The associated data of the AEAD binds both identity keys and the message header, so a
    /// payload can neither be replayed across sessions nor carry a tampered header.
    pub fn encrypt(
        y: SessionState,
        plaintext: &[u8],
        rng: &Rng,
    ) -> RatchetResult<(SessionState, EncryptedMessage)> {
        let mut y = y;

        let sending = y.sending.as_mut().ok_or(RatchetError::NoSendingChain)?;
        let counter = sending.counter;
        let (next_chain_key, message_key) = ratchet_chain(&sending.chain_key)?;
        sending.chain_key = next_chain_key;
        sending.counter += 1;

        let header = MessageHeader {
            ratchet_key: y.our_ratchet_secret.public_key()?,
            counter,
            previous_counter: y.previous_sending_counter,
        };

        let aad = associated_data(&y.our_identity_key, &y.their_identity_key, &header)?;
        let nonce: XAeadNonce = rng.random_array()?;
        let ciphertext = xaead_seal(plaintext, message_key.as_bytes(), nonce, Some(&aad))?;

        Ok((
            y,
            EncryptedMessage {
                header,
                nonce,
                ciphertext,
            },
        ))
    }

    /// Decrypts a message from the peer, performing a Diffie-Hellman ratchet step when the
    /// header carries a new ratchet public key.
    ///
    /// Messages resolved through the skipped-key cache do not advance the live chain. Replayed
    /// payloads and counters inconsistent with the session state are rejected without touching
    /// the cache or the chains.
    pub fn decrypt(
        y: SessionState,
        message: &EncryptedMessage,
        rng: &Rng,
    ) -> RatchetResult<(SessionState, Vec<u8>)> {
        let mut y = y;
        let header = &message.header;
        let aad = associated_data(&y.their_identity_key, &y.our_identity_key, header)?;

        // Messages from an older chain, or skipped earlier within the current one, resolve
        // through the cache.
        if let Some(message_key) = y.skipped_keys.take(&header.ratchet_key, header.counter) {
            let plaintext =
                xaead_open(&message.ciphertext, message_key.as_bytes(), message.nonce, Some(&aad))
                    .map_err(|_| RatchetError::DecryptionFailed)?;
            y.status = SessionStatus::Established;
            return Ok((y, plaintext));
        }

        if y.their_ratchet_key.as_ref() == Some(&header.ratchet_key) {
            // A counter behind the receiving chain without a cached key means the payload was
            // replayed (or the peer is desynchronised).
            if let Some(receiving) = &y.receiving {
                if header.counter < receiving.counter {
                    return Err(RatchetError::ReplayOrDesync);
                }
            }
        } else {
            // The peer rotated its ratchet key. It cannot claim fewer messages in the closing
            // chain than we already consumed from it.
            if let Some(receiving) = &y.receiving {
                if header.previous_counter < receiving.counter {
                    return Err(RatchetError::ReplayOrDesync);
                }
            }

            // Cache keys for messages of the closing chain which are still in flight, then turn
            // the ratchet.
            skip_message_keys(&mut y, header.previous_counter)?;
            dh_ratchet(&mut y, &header.ratchet_key, rng)?;
        }

        // Cache keys for messages skipped within the current chain.
        skip_message_keys(&mut y, header.counter)?;

        let receiving = match y.receiving.as_mut() {
            Some(receiving) => receiving,
            // The header matched our view of the peer's ratchet key before any receiving chain
            // was derived from it. An honest peer never produces this.
            None => return Err(RatchetError::ReplayOrDesync),
        };

        let (next_chain_key, message_key) = ratchet_chain(&receiving.chain_key)?;
        let plaintext =
            xaead_open(&message.ciphertext, message_key.as_bytes(), message.nonce, Some(&aad))
                .map_err(|_| RatchetError::DecryptionFailed)?;

        receiving.chain_key = next_chain_key;
        receiving.counter += 1;
        y.status = SessionStatus::Established;

        Ok((y, plaintext))
    }
}

/// Turns the Diffie-Hellman ratchet: derives the receiving chain for the peer's new key,
/// rotates our own ratchet key pair and derives the next sending chain.
fn dh_ratchet(
    y: &mut SessionState,
    their_new_key: &PublicKey,
    rng: &Rng,
) -> RatchetResult<()> {
    let dh_output = y.our_ratchet_secret.calculate_agreement(their_new_key)?;
    let (root_key, chain_key) = ratchet_root(&y.root_key, &dh_output)?;
    y.root_key = root_key;
    y.receiving = Some(Chain {
        chain_key,
        counter: 0,
    });
    y.their_ratchet_key = Some(*their_new_key);

    y.previous_sending_counter = y.sending.as_ref().map(|chain| chain.counter).unwrap_or(0);
    let our_new_secret = SecretKey::from_bytes(rng.random_array()?);
    let dh_output = our_new_secret.calculate_agreement(their_new_key)?;
    let (root_key, chain_key) = ratchet_root(&y.root_key, &dh_output)?;
    y.root_key = root_key;
    y.sending = Some(Chain {
        chain_key,
        counter: 0,
    });
    y.our_ratchet_secret = our_new_secret;

    Ok(())
}

/// Advances the receiving chain up to (excluding) the given counter, caching every derived
/// message key for later out-of-order delivery.
fn skip_message_keys(y: &mut SessionState, until: u32) -> RatchetResult<()> {
    let Some(their_ratchet_key) = y.their_ratchet_key else {
        return Ok(());
    };

    let SessionState {
        receiving,
        skipped_keys,
        ..
    } = y;
    let Some(receiving) = receiving.as_mut() else {
        return Ok(());
    };

    if until.saturating_sub(receiving.counter) > MAX_SKIP {
        return Err(RatchetError::SkipLimitExceeded(until - receiving.counter));
    }

    while receiving.counter < until {
        let (next_chain_key, message_key) = ratchet_chain(&receiving.chain_key)?;
        skipped_keys.insert(their_ratchet_key, receiving.counter, message_key);
        receiving.chain_key = next_chain_key;
        receiving.counter += 1;
    }

    Ok(())
}

/// Derives the next root key and a fresh chain key from the current root key and a
/// Diffie-Hellman output.
pub(crate) fn ratchet_root(
    root_key: &RootKey,
    dh_output: &Secret<32>,
) -> Result<(RootKey, ChainKey), HkdfError> {
    let mut okm: [u8; 64] = hkdf(Some(root_key.as_bytes()), dh_output.as_bytes(), ROOT_INFO)?;

    let mut next_root_key = [0u8; 32];
    next_root_key.copy_from_slice(&okm[..32]);
    let mut chain_key = [0u8; 32];
    chain_key.copy_from_slice(&okm[32..]);
    okm.zeroize();

    Ok((
        Secret::from_bytes(next_root_key),
        Secret::from_bytes(chain_key),
    ))
}

/// Advances a chain key by one step, yielding the successor chain key and the message key for
/// the current position.
///
/// The derivation is one-way: neither the consumed message key nor the previous chain key can be
/// recovered from the successor.
pub(crate) fn ratchet_chain(chain_key: &ChainKey) -> Result<(ChainKey, MessageKey), HkdfError> {
    let mut okm: [u8; 64] = hkdf(None, chain_key.as_bytes(), CHAIN_INFO)?;

    let mut next_chain_key = [0u8; 32];
    next_chain_key.copy_from_slice(&okm[..32]);
    let mut message_key = [0u8; 32];
    message_key.copy_from_slice(&okm[32..]);
    okm.zeroize();

    Ok((
        Secret::from_bytes(next_chain_key),
        Secret::from_bytes(message_key),
    ))
}

/// Associated data binding a ciphertext to both identities and its header.
fn associated_data(
    sender_identity: &PublicKey,
    receiver_identity: &PublicKey,
    header: &MessageHeader,
) -> Result<Vec<u8>, EncodeError> {
    let header_bytes = header.to_bytes()?;
    let mut aad = Vec::with_capacity(64 + header_bytes.len());
    aad.extend_from_slice(sender_identity.as_bytes());
    aad.extend_from_slice(receiver_identity.as_bytes());
    aad.extend_from_slice(&header_bytes);
    Ok(aad)
}

pub type RatchetResult<T> = Result<T, RatchetError>;

#[derive(Debug, Error)]
pub enum RatchetError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    X25519(#[from] X25519Error),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Aead(#[from] XAeadError),

    #[error("no sending chain established for this session yet")]
    NoSendingChain,

    #[error("message could not be authenticated and was dropped")]
    DecryptionFailed,

    #[error("message counters do not match the session state")]
    ReplayOrDesync,

    #[error("refusing to derive {0} message keys ahead in one step")]
    SkipLimitExceeded(u32),
}

#[cfg(test)]
mod tests {
    use crate::crypto::Secret;

    use super::{ratchet_chain, ratchet_root};

    #[test]
    fn chain_advance_is_deterministic() {
        let chain_key = Secret::from_bytes([1; 32]);

        let (next_1, message_1) = ratchet_chain(&chain_key).unwrap();
        let (next_2, message_2) = ratchet_chain(&chain_key).unwrap();

        assert_eq!(next_1, next_2);
        assert_eq!(message_1, message_2);
    }

    #[test]
    fn chain_positions_yield_distinct_keys() {
        let chain_key = Secret::from_bytes([1; 32]);

        let (next, message_0) = ratchet_chain(&chain_key).unwrap();
        let (_, message_1) = ratchet_chain(&next).unwrap();

        // Successive positions derive unrelated keys, and the chain key never equals any of the
        // message keys it produces.
        assert_ne!(message_0, message_1);
        assert_ne!(chain_key, next);
        assert_ne!(message_0, next);
    }

    #[test]
    fn root_advance_converges_for_both_parties() {
        let root_key = Secret::from_bytes([2; 32]);
        let dh_output = Secret::from_bytes([3; 32]);

        let (root_a, chain_a) = ratchet_root(&root_key, &dh_output).unwrap();
        let (root_b, chain_b) = ratchet_root(&root_key, &dh_output).unwrap();

        assert_eq!(root_a, root_b);
        assert_eq!(chain_a, chain_b);
    }
}
