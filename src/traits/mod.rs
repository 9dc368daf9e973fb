// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces between the encryption core and the application embedding it.
mod key_manager;
mod session_store;

pub use key_manager::{IdentityManager, PreKeyManager};
pub use session_store::SessionStore;
