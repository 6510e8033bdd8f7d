//! In-memory time-ordered store.
//!
//! Mirrors Redis sorted-set semantics closely enough to stand in for it in
//! tests: unique members, score-ordered range deletes, empty keys disappear,
//! and key expiry driven by the injected clock.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{BatchAtomicity, OpReply, StoreOp, TimeOrderedStore, WindowEntry};
use crate::clock::{score_of, score_span, Clock, SystemClock};
use crate::error::{RatelogError, Result};

/// How often batches sweep expired keys out of the map.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct SortedLog {
    by_member: HashMap<String, i64>,
    by_score: BTreeSet<(i64, String)>,
    /// Absolute expiry in score units (epoch microseconds).
    expires_at: Option<i64>,
}

impl SortedLog {
    fn len(&self) -> usize {
        self.by_member.len()
    }

    fn is_empty(&self) -> bool {
        self.by_member.is_empty()
    }

    fn insert(&mut self, entry: WindowEntry) -> bool {
        match self.by_member.insert(entry.member.clone(), entry.score) {
            Some(previous) => {
                self.by_score.remove(&(previous, entry.member.clone()));
                self.by_score.insert((entry.score, entry.member));
                false
            }
            None => {
                self.by_score.insert((entry.score, entry.member));
                true
            }
        }
    }

    fn remove_range(&mut self, min: i64, max_exclusive: i64) -> u64 {
        if min >= max_exclusive {
            return 0;
        }

        let doomed: Vec<(i64, String)> = self
            .by_score
            .range((min, String::new())..(max_exclusive, String::new()))
            .cloned()
            .collect();

        for (score, member) in &doomed {
            self.by_score.remove(&(*score, member.clone()));
            self.by_member.remove(member);
        }

        doomed.len() as u64
    }

    fn remove_member(&mut self, member: &str) -> u64 {
        match self.by_member.remove(member) {
            Some(score) => {
                self.by_score.remove(&(score, member.to_string()));
                1
            }
            None => 0,
        }
    }
}

/// Sorted-set store held in process memory.
///
/// By default a batch is applied under one lock, so it behaves like a
/// transaction. [`InMemoryStore::pipelined`] instead releases the lock and
/// yields to the runtime between commands, letting concurrent batches
/// interleave the way a non-transactional pipeline does.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    logs: Arc<Mutex<HashMap<Arc<str>, SortedLog>>>,
    clock: Arc<dyn Clock>,
    atomicity: BatchAtomicity,
    unavailable: Arc<AtomicBool>,
    /// Score at or after which the next batch sweeps expired keys.
    next_sweep: Arc<AtomicI64>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create a transactional store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a transactional store whose expiry uses `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            logs: Arc::new(Mutex::new(HashMap::new())),
            clock,
            atomicity: BatchAtomicity::Transactional,
            unavailable: Arc::new(AtomicBool::new(false)),
            next_sweep: Arc::new(AtomicI64::new(i64::MIN)),
        }
    }

    /// Switch to interleavable, pipeline-like batch execution.
    pub fn pipelined(mut self) -> Self {
        self.atomicity = BatchAtomicity::Pipelined;
        self
    }

    /// Simulate an outage: every batch fails with `StoreUnavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of the live entries for `key`, ordered by score.
    pub fn entries(&self, key: &str) -> Vec<WindowEntry> {
        let now = score_of(self.clock.now());
        let mut logs = self.logs.lock();
        Self::purge_expired(&mut logs, key, now);
        logs.get(key)
            .map(|log| {
                log.by_score
                    .iter()
                    .map(|(score, member)| WindowEntry::new(*score, member.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remaining time to live for `key`, if it exists and has an expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = score_of(self.clock.now());
        let mut logs = self.logs.lock();
        Self::purge_expired(&mut logs, key, now);
        let expires_at = logs.get(key)?.expires_at?;
        let remaining = u64::try_from(expires_at - now).ok()?;
        Some(Duration::from_micros(remaining))
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        self.cleanup();
        self.logs.lock().len()
    }

    /// Drop every expired key. Returns how many were removed.
    ///
    /// Batches already run this at most once per second, so abandoned keys
    /// are freed even when nothing touches them again.
    pub fn cleanup(&self) -> usize {
        let now = score_of(self.clock.now());
        let mut logs = self.logs.lock();
        let before = logs.len();
        logs.retain(|_, log| !matches!(log.expires_at, Some(at) if at <= now));
        let removed = before - logs.len();
        if removed > 0 {
            debug!(removed, "Swept expired keys from in-memory store");
        }
        removed
    }

    fn sweep_if_due(&self) {
        let now = score_of(self.clock.now());
        let due = self.next_sweep.load(Ordering::Acquire);
        if now < due {
            return;
        }
        let next = now.saturating_add(score_span(SWEEP_INTERVAL));
        if self
            .next_sweep
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.cleanup();
        }
    }

    #[cfg(test)]
    fn resident_keys(&self) -> usize {
        self.logs.lock().len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RatelogError::StoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn purge_expired(logs: &mut HashMap<Arc<str>, SortedLog>, key: &str, now: i64) {
        let expired = logs
            .get(key)
            .and_then(|log| log.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            logs.remove(key);
        }
    }

    fn apply(logs: &mut HashMap<Arc<str>, SortedLog>, op: StoreOp, now: i64) -> OpReply {
        match op {
            StoreOp::RemoveRange {
                key,
                min,
                max_exclusive,
            } => {
                Self::purge_expired(logs, &key, now);
                let Some(log) = logs.get_mut(&key) else {
                    return OpReply::Removed(0);
                };
                let removed = log.remove_range(min, max_exclusive);
                if log.is_empty() {
                    logs.remove(&key);
                }
                OpReply::Removed(removed)
            }
            StoreOp::Insert { key, entry } => {
                Self::purge_expired(logs, &key, now);
                let added = logs.entry(key).or_default().insert(entry);
                OpReply::Inserted(added)
            }
            StoreOp::Cardinality { key } => {
                Self::purge_expired(logs, &key, now);
                let count = logs.get(&key).map_or(0, SortedLog::len);
                OpReply::Cardinality(count as u64)
            }
            StoreOp::Expire { key, ttl } => {
                Self::purge_expired(logs, &key, now);
                match logs.get_mut(&key) {
                    Some(log) => {
                        log.expires_at = Some(now.saturating_add(score_span(ttl)));
                        OpReply::Expired(true)
                    }
                    None => OpReply::Expired(false),
                }
            }
            StoreOp::RemoveMember { key, member } => {
                Self::purge_expired(logs, &key, now);
                let Some(log) = logs.get_mut(&key) else {
                    return OpReply::Removed(0);
                };
                let removed = log.remove_member(&member);
                if log.is_empty() {
                    logs.remove(&key);
                }
                OpReply::Removed(removed)
            }
        }
    }
}

#[async_trait]
impl TimeOrderedStore for InMemoryStore {
    fn atomicity(&self) -> BatchAtomicity {
        self.atomicity
    }

    async fn execute_batch(&self, ops: Vec<StoreOp>) -> Result<Vec<OpReply>> {
        self.check_available()?;
        self.sweep_if_due();
        trace!(ops = ops.len(), atomicity = ?self.atomicity, "Executing in-memory batch");

        match self.atomicity {
            BatchAtomicity::Transactional => {
                let now = score_of(self.clock.now());
                let mut logs = self.logs.lock();
                Ok(ops
                    .into_iter()
                    .map(|op| Self::apply(&mut logs, op, now))
                    .collect())
            }
            BatchAtomicity::Pipelined => {
                let mut replies = Vec::with_capacity(ops.len());
                for op in ops {
                    let reply = {
                        let now = score_of(self.clock.now());
                        let mut logs = self.logs.lock();
                        Self::apply(&mut logs, op, now)
                    };
                    replies.push(reply);
                    tokio::task::yield_now().await;
                }
                Ok(replies)
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
