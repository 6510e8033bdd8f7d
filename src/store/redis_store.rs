//! Redis-backed time-ordered store.
//!
//! Each batch is sent as one pipeline. With `atomic` enabled the pipeline is
//! wrapped in MULTI/EXEC, so a whole sliding-window check runs without other
//! clients' commands in between. Without it, commands from concurrent checks
//! on the same key may interleave.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Value};
use tracing::{debug, trace};

use super::{BatchAtomicity, OpReply, StoreOp, TimeOrderedStore};
use crate::error::{RatelogError, Result};

/// A [`TimeOrderedStore`] over a Redis sorted set per key.
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: ConnectionManager,
    atomic: bool,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("atomic", &self.atomic)
            .finish()
    }
}

impl RedisStore {
    /// Open a managed connection to `url`.
    pub async fn connect(url: &str, atomic: bool) -> Result<Self> {
        let client = Client::open(url).map_err(|e| RatelogError::Config(e.to_string()))?;
        let connection_manager = client
            .get_connection_manager()
            .await
            .map_err(map_redis_error)?;

        debug!(atomic, "Connected to Redis store");
        Ok(Self::from_connection_manager(connection_manager, atomic))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection_manager(connection_manager: ConnectionManager, atomic: bool) -> Self {
        Self {
            connection_manager,
            atomic,
        }
    }

    fn build_pipeline(&self, ops: &[StoreOp]) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        if self.atomic {
            pipe.atomic();
        }

        for op in ops {
            match op {
                StoreOp::RemoveRange {
                    key,
                    min,
                    max_exclusive,
                } => {
                    pipe.cmd("ZREMRANGEBYSCORE")
                        .arg(&**key)
                        .arg(min_bound(*min))
                        .arg(format!("({max_exclusive}"));
                }
                StoreOp::Insert { key, entry } => {
                    pipe.cmd("ZADD")
                        .arg(&**key)
                        .arg(entry.score)
                        .arg(&entry.member);
                }
                StoreOp::Cardinality { key } => {
                    pipe.cmd("ZCARD").arg(&**key);
                }
                StoreOp::Expire { key, ttl } => {
                    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1);
                    pipe.cmd("PEXPIRE").arg(&**key).arg(ttl_ms);
                }
                StoreOp::RemoveMember { key, member } => {
                    pipe.cmd("ZREM").arg(&**key).arg(member);
                }
            }
        }

        pipe
    }
}

fn min_bound(min: i64) -> String {
    if min == i64::MIN {
        "-inf".to_string()
    } else {
        min.to_string()
    }
}

fn map_redis_error(err: RedisError) -> RatelogError {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
    {
        RatelogError::StoreUnavailable(err.to_string())
    } else {
        RatelogError::PartialBatchFailure {
            index: None,
            reason: err.to_string(),
        }
    }
}

fn decode_reply(index: usize, op: &StoreOp, value: &Value) -> Result<OpReply> {
    let n: i64 = redis::from_redis_value(value).map_err(|e| RatelogError::PartialBatchFailure {
        index: Some(index),
        reason: format!("{} returned an unexpected reply: {}", op.name(), e),
    })?;
    let n = u64::try_from(n).unwrap_or(0);

    Ok(match op {
        StoreOp::RemoveRange { .. } | StoreOp::RemoveMember { .. } => OpReply::Removed(n),
        StoreOp::Insert { .. } => OpReply::Inserted(n == 1),
        StoreOp::Cardinality { .. } => OpReply::Cardinality(n),
        StoreOp::Expire { .. } => OpReply::Expired(n == 1),
    })
}

#[async_trait]
impl TimeOrderedStore for RedisStore {
    fn atomicity(&self) -> BatchAtomicity {
        if self.atomic {
            BatchAtomicity::Transactional
        } else {
            BatchAtomicity::Pipelined
        }
    }

    async fn execute_batch(&self, ops: Vec<StoreOp>) -> Result<Vec<OpReply>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let pipe = self.build_pipeline(&ops);
        let mut connection_manager = self.connection_manager.clone();

        trace!(ops = ops.len(), atomic = self.atomic, "Sending Redis pipeline");

        let values: Vec<Value> = pipe
            .query_async(&mut connection_manager)
            .await
            .map_err(map_redis_error)?;

        if values.len() != ops.len() {
            return Err(RatelogError::PartialBatchFailure {
                index: None,
                reason: format!("expected {} replies, got {}", ops.len(), values.len()),
            });
        }

        ops.iter()
            .zip(values.iter())
            .enumerate()
            .map(|(index, (op, value))| decode_reply(index, op, value))
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        let mut connection_manager = self.connection_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut connection_manager)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }
}
