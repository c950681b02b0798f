//! Worker identity.
//!
//! A worker carries two values derived independently from its name:
//! - `owner_token` is written to the ledger when the worker takes a job. It
//!   is unique per process so two restarts under the same hostname stay
//!   distinguishable.
//! - `exploration_offset` separates concurrent explorers' candidates. It is
//!   stable across restarts and only a heuristic; ledger exclusivity never
//!   depends on it.

use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub name: String,
    pub owner_token: String,
    pub exploration_offset: i64,
}

impl WorkerIdentity {
    pub fn new(name: impl Into<String>, offset_window: u64) -> Self {
        let name = name.into();
        let owner_token = format!("{}:{}", name, Uuid::new_v4());
        let exploration_offset = exploration_offset(&name, offset_window);
        Self {
            name,
            owner_token,
            exploration_offset,
        }
    }

    /// Identity with fixed values (tests).
    pub fn fixed(name: impl Into<String>, exploration_offset: i64) -> Self {
        let name = name.into();
        Self {
            owner_token: name.clone(),
            name,
            exploration_offset,
        }
    }
}

/// Stable hash of the worker name reduced into `[0, window)`.
pub fn exploration_offset(name: &str, window: u64) -> i64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % window.max(1)) as i64
}
