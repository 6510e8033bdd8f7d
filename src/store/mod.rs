//! Time-ordered store abstraction.
//!
//! The limiter only needs a handful of sorted-set commands, submitted together
//! as one batch per decision. This trait captures exactly those commands so a
//! real store (Redis) and the in-memory fake are interchangeable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

mod memory;
mod redis_store;

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

/// One logged request: a score (epoch microseconds) and a unique member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowEntry {
    pub score: i64,
    pub member: String,
}

impl WindowEntry {
    pub fn new(score: i64, member: impl Into<String>) -> Self {
        Self {
            score,
            member: member.into(),
        }
    }
}

/// A single command inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Remove members with `min <= score < max_exclusive`.
    RemoveRange {
        key: Arc<str>,
        min: i64,
        max_exclusive: i64,
    },
    /// Add a member; an existing member only has its score updated.
    Insert { key: Arc<str>, entry: WindowEntry },
    /// Count all members of the key.
    Cardinality { key: Arc<str> },
    /// Set or refresh a relative expiry on the whole key.
    Expire { key: Arc<str>, ttl: Duration },
    /// Remove one member by name.
    RemoveMember { key: Arc<str>, member: String },
}

impl StoreOp {
    /// Evict every member scored strictly before `max_exclusive`.
    pub fn remove_before(key: Arc<str>, max_exclusive: i64) -> Self {
        StoreOp::RemoveRange {
            key,
            min: i64::MIN,
            max_exclusive,
        }
    }

    /// Command name, used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            StoreOp::RemoveRange { .. } => "remove_range",
            StoreOp::Insert { .. } => "insert",
            StoreOp::Cardinality { .. } => "cardinality",
            StoreOp::Expire { .. } => "expire",
            StoreOp::RemoveMember { .. } => "remove_member",
        }
    }
}

/// Per-command result, in the same order as the submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpReply {
    /// Number of members removed.
    Removed(u64),
    /// Whether a new member was added (false when only the score changed).
    Inserted(bool),
    /// Member count.
    Cardinality(u64),
    /// Whether the key existed and received the expiry.
    Expired(bool),
}

/// How a store executes a batch relative to other clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAtomicity {
    /// The whole batch runs without interleaving (transaction or script).
    Transactional,
    /// Commands are sent together but other clients' commands may run between them.
    ///
    /// Concurrent checks on one key may then observe counts taken mid-way
    /// through each other's batches. Admissions stay within `limit` plus the
    /// number of in-flight checks. Because each check inserts before it
    /// counts, interleaving shows up as extra denials rather than extra
    /// admissions.
    Pipelined,
}

/// A keyed store with sorted-set semantics, driven in batches.
#[async_trait]
pub trait TimeOrderedStore: Send + Sync {
    /// The batch guarantee this store provides.
    fn atomicity(&self) -> BatchAtomicity;

    /// Execute `ops` as one grouped round trip.
    ///
    /// Returns one reply per op, in order, or an error for the batch as a whole.
    /// A failure after some commands were applied is reported as
    /// [`crate::error::RatelogError::PartialBatchFailure`].
    async fn execute_batch(&self, ops: Vec<StoreOp>) -> Result<Vec<OpReply>>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
impl<S: TimeOrderedStore + ?Sized> TimeOrderedStore for Arc<S> {
    fn atomicity(&self) -> BatchAtomicity {
        (**self).atomicity()
    }

    async fn execute_batch(&self, ops: Vec<StoreOp>) -> Result<Vec<OpReply>> {
        (**self).execute_batch(ops).await
    }

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }
}
