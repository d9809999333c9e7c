//! Synchronization points with the engine.
//!
//! A two-phase operation sends its preparatory commands, then `/sync id`, and
//! parks a continuation here. The continuation runs when `/synced id` comes
//! back, or is handed back as expired once its deadline passes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

struct PendingSync<T> {
    deadline: Instant,
    continuation: T,
}

pub struct SyncTracker<T> {
    next_id: i32,
    timeout: Duration,
    pending: HashMap<i32, PendingSync<T>>,
}

impl<T> SyncTracker<T> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: 1,
            timeout,
            pending: HashMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Park `continuation` and return the id to send with `/sync`.
    pub fn begin(&mut self, now: Instant, continuation: T) -> i32 {
        let id = self.next_id;
        // Ids stay positive; scsynth echoes them back as int32.
        self.next_id = if self.next_id == i32::MAX { 1 } else { self.next_id + 1 };
        self.pending.insert(
            id,
            PendingSync {
                deadline: now + self.timeout,
                continuation,
            },
        );
        id
    }

    /// Take the continuation for an answered sync id.
    pub fn complete(&mut self, id: i32) -> Option<T> {
        self.pending.remove(&id).map(|p| p.continuation)
    }

    /// Drop a sync whose preparatory commands failed to go out.
    pub fn cancel(&mut self, id: i32) -> Option<T> {
        self.pending.remove(&id).map(|p| p.continuation)
    }

    /// Remove and return every continuation whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<(i32, T)> {
        let overdue: Vec<i32> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        let mut expired: Vec<(i32, T)> = overdue
            .into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|p| (id, p.continuation)))
            .collect();
        expired.sort_by_key(|(id, _)| *id);
        expired
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: i32) -> bool {
        self.pending.contains_key(&id)
    }
}
