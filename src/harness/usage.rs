//! Usage Meter (C1): per-tenant cumulative byte counters, updated by the
//! Engine Facade on every completed I/O and sampled by the scheduler's
//! control loop.

use std::sync::atomic::{AtomicI64, Ordering};

use crossbeam::utils::CachePadded;

use super::types::{ResourceUsage, TenantId};

/// Lock-free per-tenant usage counters.
///
/// Each tenant gets its own cache line (`CachePadded`) so that concurrent
/// updates from different worker threads don't ping-pong the same line —
/// the same reasoning the engine applies to its own hot counters.
pub struct UsageMeter {
    counters: Vec<CachePadded<TenantCounters>>,
}

#[derive(Default)]
struct TenantCounters {
    io_written_kb: AtomicI64,
    io_read_kb: AtomicI64,
    mem_written_kb: AtomicI64,
}

impl UsageMeter {
    pub fn new(tenant_count: usize) -> Self {
        let counters = (0..tenant_count).map(|_| CachePadded::new(TenantCounters::default())).collect();
        Self { counters }
    }

    /// Records `bytes` written to the WAL/memtable path for `tenant`.
    pub fn record_write(&self, tenant: TenantId, bytes: u64) {
        self.counters[tenant as usize]
            .mem_written_kb
            .fetch_add(kb(bytes), Ordering::Relaxed);
        self.counters[tenant as usize]
            .io_written_kb
            .fetch_add(kb(bytes), Ordering::Relaxed);
    }

    /// Records `bytes` read back off disk (SSTable blocks) for `tenant`.
    ///
    /// Reads served entirely from the active memtable do not touch disk
    /// and must not be counted here — the facade distinguishes the two.
    pub fn record_read(&self, tenant: TenantId, bytes: u64) {
        self.counters[tenant as usize]
            .io_read_kb
            .fetch_add(kb(bytes), Ordering::Relaxed);
    }

    /// Snapshot of cumulative counters for every tenant, in tenant-id order.
    pub fn snapshot(&self) -> Vec<ResourceUsage> {
        self.counters
            .iter()
            .map(|c| ResourceUsage {
                io_written_kb: c.io_written_kb.load(Ordering::Relaxed),
                io_read_kb: c.io_read_kb.load(Ordering::Relaxed),
                mem_written_kb: c.mem_written_kb.load(Ordering::Relaxed),
            })
            .collect()
    }

    pub fn tenant_count(&self) -> usize {
        self.counters.len()
    }
}

/// Rounds bytes up to whole kilobytes; sub-kilobyte writes still register
/// as usage instead of being truncated to zero.
fn kb(bytes: u64) -> i64 {
    bytes.div_ceil(1024) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_independently_per_tenant() {
        let meter = UsageMeter::new(2);
        meter.record_write(0, 2048);
        meter.record_read(0, 512);
        meter.record_write(1, 4096);

        let snap = meter.snapshot();
        assert_eq!(snap[0].io_written_kb, 2);
        assert_eq!(snap[0].mem_written_kb, 2);
        assert_eq!(snap[0].io_read_kb, 1);
        assert_eq!(snap[1].io_written_kb, 4);
        assert_eq!(snap[1].io_read_kb, 0);
    }

    #[test]
    fn sub_kilobyte_write_rounds_up() {
        let meter = UsageMeter::new(1);
        meter.record_write(0, 1);
        assert_eq!(meter.snapshot()[0].io_written_kb, 1);
    }

    #[test]
    fn rate_since_clamps_negative_to_zero() {
        let newer = ResourceUsage { io_written_kb: 5, io_read_kb: 5, mem_written_kb: 5 };
        let older = ResourceUsage { io_written_kb: 10, io_read_kb: 10, mem_written_kb: 10 };
        let (w, r, m) = newer.rate_since(&older, 1.0);
        assert_eq!((w, r, m), (0.0, 0.0, 0.0));
    }
}
