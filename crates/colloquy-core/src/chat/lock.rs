//! Per-conversation turn serialization.
//!
//! Two turns on the same conversation must not interleave their history
//! reads and appends. `TurnLocks` hands out one async mutex per conversation
//! id and forgets it once the last holder lets go.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-conversation async locks.
#[derive(Debug, Default)]
pub struct TurnLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl TurnLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other turn holds `conversation_id`, then hold it.
    pub async fn acquire(&self, conversation_id: &str) -> TurnGuard {
        let lock = self
            .locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        TurnGuard {
            conversation_id: conversation_id.to_string(),
            guard: Some(guard),
            locks: Some(Arc::clone(&self.locks)),
        }
    }

    /// Number of conversations with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held for the duration of one turn. Releasing it wakes the next waiter.
#[derive(Debug)]
pub struct TurnGuard {
    conversation_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Option<Arc<DashMap<String, Arc<Mutex<()>>>>>,
}

impl TurnGuard {
    /// A guard that holds nothing, for when turn serialization is off.
    pub fn unlocked(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            guard: None,
            locks: None,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        // Release first so the strong count below excludes this guard.
        drop(self.guard.take());
        if let Some(locks) = self.locks.take() {
            // Only the map's own reference left: nobody holds or awaits it.
            locks.remove_if(&self.conversation_id, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}
