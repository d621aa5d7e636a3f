//! Engine Facade (C5): the only component that touches the storage
//! engine directly. Each tenant is bound to its own [`Engine`] instance
//! (the spec's "column family"), and every call here is gated by the
//! rate limiter (C2) and the write-buffer manager (C3) before it reaches
//! the engine, with latency and outcome reported to the measurement
//! pipeline (C9).

use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::warn;

use crate::engine::{Engine, EngineConfig, EngineError};

use super::measurement::Measurements;
use super::rate_limiter::RateLimiter;
use super::types::{Direction, OpKind, Outcome, Priority, TenantId};
use super::usage::UsageMeter;
use super::write_buffer::WriteBufferManager;

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("engine error for tenant {tenant}: {source}")]
    Engine {
        tenant: TenantId,
        #[source]
        source: EngineError,
    },

    #[error("write buffer exhausted for tenant {tenant} after {retries} retries")]
    WriteBufferExhausted { tenant: TenantId, retries: u32 },
}

/// Number of times the facade will force a flush and retry a write-buffer
/// reservation before giving up.
const MAX_RESERVE_RETRIES: u32 = 8;

/// One bound engine instance per tenant, plus the shared data-plane
/// collaborators every call routes through.
pub struct EngineFacade {
    engines: Vec<Engine>,
    limiter: Arc<RateLimiter>,
    write_buffer: Arc<WriteBufferManager>,
    measurements: Arc<Measurements>,
    usage: Arc<UsageMeter>,
    /// Bytes reserved from `write_buffer` per tenant since that tenant's
    /// last forced flush, credited back to the manager once the flush
    /// actually frees the memtable space they correspond to.
    reserved_since_flush: Vec<AtomicU64>,
}

impl EngineFacade {
    /// Opens one engine per tenant under `root/<cf>`, using `config` as
    /// the template for every instance (write_buffer_size is overridden
    /// per-tenant by the scheduler after startup).
    pub fn open(
        root: impl Into<PathBuf>,
        cfs: &[String],
        config_template: impl Fn() -> EngineConfig,
        limiter: Arc<RateLimiter>,
        write_buffer: Arc<WriteBufferManager>,
        measurements: Arc<Measurements>,
        usage: Arc<UsageMeter>,
    ) -> Result<Self, FacadeError> {
        let root = root.into();
        let mut engines = Vec::with_capacity(cfs.len());
        for (i, cf) in cfs.iter().enumerate() {
            let path = root.join(cf);
            let engine = Engine::open(&path, config_template()).map_err(|source| FacadeError::Engine {
                tenant: i as TenantId,
                source,
            })?;
            engines.push(engine);
        }
        let reserved_since_flush = (0..cfs.len()).map(|_| AtomicU64::new(0)).collect();
        Ok(Self { engines, limiter, write_buffer, measurements, usage, reserved_since_flush })
    }

    fn engine(&self, tenant: TenantId) -> &Engine {
        &self.engines[tenant as usize]
    }

    /// Reserves write-buffer headroom for `bytes`, retrying after a
    /// forced flush a bounded number of times before failing the call
    /// rather than reserving unboundedly.
    fn reserve_for_write(&self, tenant: TenantId, bytes: usize) -> Result<(), FacadeError> {
        for attempt in 0..MAX_RESERVE_RETRIES {
            if self.write_buffer.reserve(tenant, bytes as u32) {
                self.reserved_since_flush[tenant as usize].fetch_add(bytes as u64, Ordering::Relaxed);
                return Ok(());
            }
            warn!(tenant, attempt, "write buffer at capacity, forcing flush");
            let flushed = self
                .engine(tenant)
                .flush_oldest_frozen()
                .map_err(|source| FacadeError::Engine { tenant, source })?;
            if flushed {
                let freed = self.reserved_since_flush[tenant as usize].swap(0, Ordering::Relaxed);
                self.write_buffer.release(tenant, freed.min(u32::MAX as u64) as u32);
            }
        }
        Err(FacadeError::WriteBufferExhausted { tenant, retries: MAX_RESERVE_RETRIES })
    }

    /// Runs `f`, reporting its latency/outcome to C9 and, on success,
    /// crediting `usage` (direction, bytes) to the Usage Meter (C1) so the
    /// scheduler's next sampling pass sees this call's contribution. Pass
    /// `None` when `f` itself records usage (its byte count isn't known
    /// until the call returns, e.g. a scan's result size).
    fn timed<T>(
        &self,
        tenant: TenantId,
        op: OpKind,
        usage: Option<(Direction, u64)>,
        f: impl FnOnce() -> Result<T, FacadeError>,
    ) -> Result<T, FacadeError> {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        let outcome = match &result {
            Ok(_) => Outcome::Ok,
            Err(_) => Outcome::Error,
        };
        if outcome == Outcome::Ok {
            if let Some((direction, bytes)) = usage {
                match direction {
                    Direction::Read => self.usage.record_read(tenant, bytes),
                    Direction::Write => self.usage.record_write(tenant, bytes),
                }
            }
        }
        self.measurements.record(tenant, op, elapsed, outcome);
        result
    }

    /// Like `scan`, the limiter/usage-meter bytes are sized from the
    /// actual value returned, not the request key — a read's footprint is
    /// dominated by its value, not its key.
    pub fn read(&self, tenant: TenantId, key: Vec<u8>) -> Result<Option<Vec<u8>>, FacadeError> {
        let key_bytes = key.len() as u64;
        self.timed(tenant, OpKind::Read, None, || {
            let value = self.engine(tenant).get(key).map_err(|source| FacadeError::Engine { tenant, source })?;
            let bytes = key_bytes + value.as_ref().map(|v| v.len() as u64).unwrap_or(0);
            self.limiter.acquire(tenant, Direction::Read, bytes, Priority::Normal);
            self.usage.record_read(tenant, bytes);
            Ok(value)
        })
    }

    pub fn read_batch(&self, tenant: TenantId, keys: Vec<Vec<u8>>) -> Result<Vec<Option<Vec<u8>>>, FacadeError> {
        let key_bytes: u64 = keys.iter().map(|k| k.len() as u64).sum();
        self.timed(tenant, OpKind::ReadBatch, None, || {
            let mut out = Vec::with_capacity(keys.len());
            for key in keys {
                out.push(self.engine(tenant).get(key).map_err(|source| FacadeError::Engine { tenant, source })?);
            }
            let value_bytes: u64 = out.iter().flatten().map(|v| v.len() as u64).sum();
            let bytes = key_bytes + value_bytes;
            self.limiter.acquire(tenant, Direction::Read, bytes, Priority::Normal);
            self.usage.record_read(tenant, bytes);
            Ok(out)
        })
    }

    pub fn update(&self, tenant: TenantId, key: Vec<u8>, value: Vec<u8>) -> Result<bool, FacadeError> {
        let bytes = (key.len() + value.len()) as u64;
        self.timed(tenant, OpKind::Update, Some((Direction::Write, bytes)), || {
            self.reserve_for_write(tenant, bytes as usize)?;
            self.limiter.acquire(tenant, Direction::Write, bytes, Priority::Normal);
            self.engine(tenant).put(key, value).map_err(|source| FacadeError::Engine { tenant, source })
        })
    }

    pub fn insert(&self, tenant: TenantId, key: Vec<u8>, value: Vec<u8>) -> Result<bool, FacadeError> {
        let bytes = (key.len() + value.len()) as u64;
        self.timed(tenant, OpKind::Insert, Some((Direction::Write, bytes)), || {
            self.reserve_for_write(tenant, bytes as usize)?;
            self.limiter.acquire(tenant, Direction::Write, bytes, Priority::Normal);
            self.engine(tenant).put(key, value).map_err(|source| FacadeError::Engine { tenant, source })
        })
    }

    pub fn insert_batch(&self, tenant: TenantId, rows: Vec<(Vec<u8>, Vec<u8>)>) -> Result<(), FacadeError> {
        let total = rows.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>() as u64;
        self.timed(tenant, OpKind::InsertBatch, Some((Direction::Write, total)), || {
            self.reserve_for_write(tenant, total as usize)?;
            self.limiter.acquire(tenant, Direction::Write, total, Priority::Normal);
            for (key, value) in rows {
                self.engine(tenant).put(key, value).map_err(|source| FacadeError::Engine { tenant, source })?;
            }
            Ok(())
        })
    }

    pub fn scan(&self, tenant: TenantId, range: Range<Vec<u8>>) -> Result<Vec<(Vec<u8>, Vec<u8>)>, FacadeError> {
        self.timed(tenant, OpKind::Scan, None, || {
            self.limiter.acquire(tenant, Direction::Read, 4096, Priority::Normal);
            let rows: Vec<_> = self
                .engine(tenant)
                .scan(&range.start, &range.end)
                .map_err(|source| FacadeError::Engine { tenant, source })?
                .collect();
            let bytes: u64 = rows.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum();
            self.usage.record_read(tenant, bytes);
            Ok(rows)
        })
    }

    pub fn read_modify_write(
        &self,
        tenant: TenantId,
        key: Vec<u8>,
        modify: impl FnOnce(Option<Vec<u8>>) -> Vec<u8>,
    ) -> Result<bool, FacadeError> {
        self.timed(tenant, OpKind::ReadModifyWrite, None, || {
            let key_bytes = key.len() as u64;
            let current = self
                .engine(tenant)
                .get(key.clone())
                .map_err(|source| FacadeError::Engine { tenant, source })?;
            let read_bytes = key_bytes + current.as_ref().map(|v| v.len() as u64).unwrap_or(0);
            self.limiter.acquire(tenant, Direction::Read, read_bytes, Priority::Normal);
            self.usage.record_read(tenant, read_bytes);
            let new_value = modify(current);
            let bytes = (key.len() + new_value.len()) as u64;
            self.reserve_for_write(tenant, bytes as usize)?;
            self.limiter.acquire(tenant, Direction::Write, bytes, Priority::Normal);
            self.usage.record_write(tenant, bytes);
            self.engine(tenant).put(key, new_value).map_err(|source| FacadeError::Engine { tenant, source })
        })
    }

    pub fn read_modify_insert_batch(
        &self,
        tenant: TenantId,
        reads: Vec<Vec<u8>>,
        inserts: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<Vec<Option<Vec<u8>>>, FacadeError> {
        self.timed(tenant, OpKind::ReadModifyInsertBatch, None, || {
            let key_bytes: u64 = reads.iter().map(|k| k.len() as u64).sum();
            let mut out = Vec::with_capacity(reads.len());
            for key in reads {
                out.push(self.engine(tenant).get(key).map_err(|source| FacadeError::Engine { tenant, source })?);
            }
            let value_bytes: u64 = out.iter().flatten().map(|v| v.len() as u64).sum();
            let read_bytes = key_bytes + value_bytes;
            self.limiter.acquire(tenant, Direction::Read, read_bytes, Priority::Normal);
            self.usage.record_read(tenant, read_bytes);
            let write_bytes = inserts.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>() as u64;
            self.reserve_for_write(tenant, write_bytes as usize)?;
            self.limiter.acquire(tenant, Direction::Write, write_bytes, Priority::Normal);
            self.usage.record_write(tenant, write_bytes);
            for (key, value) in inserts {
                self.engine(tenant).put(key, value).map_err(|source| FacadeError::Engine { tenant, source })?;
            }
            Ok(out)
        })
    }

    pub fn delete(&self, tenant: TenantId, key: Vec<u8>) -> Result<bool, FacadeError> {
        let bytes = key.len() as u64;
        self.timed(tenant, OpKind::Delete, Some((Direction::Write, bytes)), || {
            self.reserve_for_write(tenant, bytes as usize)?;
            self.limiter.acquire(tenant, Direction::Write, bytes, Priority::Normal);
            self.engine(tenant).delete(key).map_err(|source| FacadeError::Engine { tenant, source })
        })
    }

    /// Inserts a key chosen outside of the tenant's preloaded key range
    /// (used by the key generator's growth phase). Always admitted at
    /// `Priority::High`: table growth must not stall behind a throttled
    /// tenant's FIFO queue.
    pub fn random_insert(&self, tenant: TenantId, key: Vec<u8>, value: Vec<u8>) -> Result<bool, FacadeError> {
        let bytes = (key.len() + value.len()) as u64;
        self.timed(tenant, OpKind::RandomInsert, Some((Direction::Write, bytes)), || {
            self.reserve_for_write(tenant, bytes as usize)?;
            self.limiter.acquire(tenant, Direction::Write, bytes, Priority::High);
            self.engine(tenant).put(key, value).map_err(|source| FacadeError::Engine { tenant, source })
        })
    }

    /// Reports dispatch queueing delay (time spent waiting in the worker
    /// pool's per-tenant queue before a worker picked the job up) as a
    /// pseudo-operation, independent of any engine call.
    pub fn record_queue_wait(&self, tenant: TenantId, waited: std::time::Duration) {
        self.measurements.record(tenant, OpKind::QueueWait, waited, Outcome::Ok);
    }

    pub fn stats(&self, tenant: TenantId) -> Result<crate::engine::EngineStats, FacadeError> {
        self.engine(tenant).stats().map_err(|source| FacadeError::Engine { tenant, source })
    }

    pub fn close_all(&self) -> Result<(), FacadeError> {
        for (i, engine) in self.engines.iter().enumerate() {
            engine.close().map_err(|source| FacadeError::Engine { tenant: i as TenantId, source })?;
        }
        Ok(())
    }
}
