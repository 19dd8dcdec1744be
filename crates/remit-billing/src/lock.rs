//! Per-user serialization of ledger mutations.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per user.
///
/// Every ledger mutation for a user happens while that user's guard is
/// held, so handlers for concurrently published events cannot interleave
/// their read-modify-write cycles.
#[derive(Default)]
pub struct UserLocks {
    locks: parking_lot::Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, user_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().entry(user_id).or_default().clone();
        lock.lock_owned().await
    }
}
