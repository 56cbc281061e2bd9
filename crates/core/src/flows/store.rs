use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::flows::states::{ConversationKey, ConversationState};

const SHARD_COUNT: usize = 16;

#[derive(Debug, Default)]
struct Slot {
    state: Option<ConversationState>,
    /// Set when the state was dropped for inactivity and the user has not
    /// been told yet.
    expired_at: Option<Instant>,
}

impl Slot {
    fn expire_if_idle(&mut self, idle_timeout: Option<Duration>, now: Instant) -> bool {
        let Some(timeout) = idle_timeout else {
            return false;
        };
        let idle = self
            .state
            .as_ref()
            .is_some_and(|state| now.saturating_duration_since(state.touched_at) >= timeout);
        if idle {
            self.state = None;
            self.expired_at = Some(now);
        }
        idle
    }

    fn is_vacant(&self) -> bool {
        self.state.is_none() && self.expired_at.is_none()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub reclaimed: usize,
}

type Slots = HashMap<ConversationKey, Arc<AsyncMutex<Slot>>>;
type Shard = Arc<Mutex<Slots>>;

/// Per-user conversation state, sharded so unrelated users rarely contend.
///
/// Each key has its own async lock. `lock` hands out that lock for the length
/// of a turn, which serializes messages from the same user while leaving
/// other users untouched. A slot left vacant by a turn is dropped when its
/// guard is released, so senders that never start a flow leave nothing behind.
pub struct ConversationStore {
    shards: Vec<Shard>,
    idle_timeout: Option<Duration>,
}

impl ConversationStore {
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        let shards = (0..SHARD_COUNT).map(|_| Arc::new(Mutex::new(HashMap::new()))).collect();
        Self { shards, idle_timeout }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    fn shard(&self, key: &ConversationKey) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Exclusive access to `key` until the guard drops. Idle state is expired
    /// on acquisition.
    pub async fn lock(&self, key: &ConversationKey) -> SlotGuard {
        let shard = self.shard(key);
        let slot = Arc::clone(entries(shard).entry(key.clone()).or_default());
        let mut guard = slot.lock_owned().await;
        guard.expire_if_idle(self.idle_timeout, Instant::now());
        SlotGuard { guard, shard: Arc::clone(shard), key: key.clone() }
    }

    /// Snapshot of the state for `key`.
    pub async fn get(&self, key: &ConversationKey) -> Option<ConversationState> {
        self.lock(key).await.state().cloned()
    }

    #[cfg(test)]
    pub(crate) async fn put(&self, key: &ConversationKey, state: ConversationState) {
        self.lock(key).await.put(state);
    }

    #[cfg(test)]
    pub(crate) async fn remove(&self, key: &ConversationKey) -> Option<ConversationState> {
        self.lock(key).await.remove()
    }

    /// Expires idle conversations and drops slots nobody is using. Slots whose
    /// lock is held are skipped; they are in the middle of a turn.
    pub fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let mut report = SweepReport::default();
        for shard in &self.shards {
            entries(shard).retain(|_, slot| {
                let Ok(mut guard) = slot.try_lock() else {
                    return true;
                };
                if guard.expire_if_idle(self.idle_timeout, now) {
                    report.expired += 1;
                }
                // Unread expiry notices are kept until a second timeout passes.
                if let (Some(expired_at), Some(timeout)) = (guard.expired_at, self.idle_timeout) {
                    if now.saturating_duration_since(expired_at) >= timeout {
                        guard.expired_at = None;
                    }
                }
                let reclaim = guard.is_vacant() && Arc::strong_count(slot) == 1;
                drop(guard);
                if reclaim {
                    report.reclaimed += 1;
                }
                !reclaim
            });
        }
        report
    }

    /// Conversations that currently hold state. Slots locked by an in-flight
    /// turn are counted as active.
    pub fn active_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                entries(shard)
                    .values()
                    .filter(|slot| slot.try_lock().map_or(true, |guard| guard.state.is_some()))
                    .count()
            })
            .sum()
    }

    /// Slots currently tracked, including vacant ones awaiting the sweeper.
    pub fn tracked_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| entries(shard).len())
            .sum()
    }
}

fn entries(shard: &Shard) -> MutexGuard<'_, Slots> {
    shard.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive handle on one conversation slot.
pub struct SlotGuard {
    guard: OwnedMutexGuard<Slot>,
    shard: Shard,
    key: ConversationKey,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.guard.is_vacant() {
            return;
        }
        // The map and this guard hold the only references unless a turn is waiting.
        let mut slots = entries(&self.shard);
        let unshared = slots.get(&self.key).is_some_and(|slot| {
            Arc::ptr_eq(slot, OwnedMutexGuard::mutex(&self.guard)) && Arc::strong_count(slot) == 2
        });
        if unshared {
            slots.remove(&self.key);
        }
    }
}

impl SlotGuard {
    pub fn state(&self) -> Option<&ConversationState> {
        self.guard.state.as_ref()
    }

    /// Stores `state` and marks it as touched now.
    pub fn put(&mut self, mut state: ConversationState) {
        state.touched_at = Instant::now();
        self.guard.state = Some(state);
        self.guard.expired_at = None;
    }

    pub fn remove(&mut self) -> Option<ConversationState> {
        self.guard.state.take()
    }

    /// True once after the previous state expired for inactivity.
    pub fn take_expiry_notice(&mut self) -> bool {
        self.guard.expired_at.take().is_some()
    }
}
