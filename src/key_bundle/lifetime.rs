// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default validity period of a signed pre-key (90 days).
const DEFAULT_LIFETIME_SECS: u64 = 60 * 60 * 24 * 90;

/// Validity window of a pre-key in seconds since the UNIX epoch.
///
/// Pre-keys outside their window are rejected during bundle verification. Applications decide the
/// rotation policy themselves, pre-keys should be rotated in good time before expiry so peers
/// with bad connectivity can still pick up a valid bundle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifetime {
    not_before: u64,
    not_after: u64,
}

impl Lifetime {
    pub fn from_range(not_before: u64, not_after: u64) -> Self {
        Self {
            not_before,
            not_after,
        }
    }

    /// Checks if the current system time falls into the validity window.
    pub fn verify(&self) -> Result<(), LifetimeError> {
        let now = now_secs();
        if now < self.not_before {
            return Err(LifetimeError::NotYetValid);
        }
        if now > self.not_after {
            return Err(LifetimeError::Expired);
        }
        Ok(())
    }

    pub fn not_before(&self) -> u64 {
        self.not_before
    }

    pub fn not_after(&self) -> u64 {
        self.not_after
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        let now = now_secs();
        Self {
            not_before: now,
            not_after: now + DEFAULT_LIFETIME_SECS,
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time is after the UNIX epoch")
        .as_secs()
}

#[derive(Debug, Error)]
pub enum LifetimeError {
    #[error("pre-key is not valid yet")]
    NotYetValid,

    #[error("pre-key is expired")]
    Expired,
}
