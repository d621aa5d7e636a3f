//! Measurements (C9): fixed-bucket exponential latency histograms per
//! tenant/op, plus the periodic CSV dump threads that write
//! `client_stats.log`, `resource_shares.log`, and `resource_usage.log`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::error;

use super::cancel::Latch;
use super::types::{OpKind, Outcome, TenantId};

/// Bucket `i` covers `[BASE_NS * 2^i, BASE_NS * 2^(i+1))` nanoseconds.
const BASE_NS: u64 = 1_000; // 1 microsecond
const NUM_BUCKETS: usize = 40; // top bucket covers well past an hour

struct Histogram {
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_ns: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: (0..NUM_BUCKETS).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_ns: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
        }
    }

    fn record(&self, ns: u64) {
        let idx = bucket_index(ns);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ns.fetch_add(ns, Ordering::Relaxed);
        self.min_ns.fetch_min(ns, Ordering::Relaxed);
        self.max_ns.fetch_max(ns, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let counts: Vec<u64> = self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect();
        let min_ns = self.min_ns.load(Ordering::Relaxed);
        HistogramSnapshot {
            count: self.count.load(Ordering::Relaxed),
            sum_ns: self.sum_ns.load(Ordering::Relaxed),
            min_ns: if min_ns == u64::MAX { 0 } else { min_ns },
            max_ns: self.max_ns.load(Ordering::Relaxed),
            counts,
        }
    }

    /// Drains every counter back to its empty state and returns what it
    /// held, for per-interval (not lifetime-cumulative) reporting. A small
    /// race with concurrent `record` calls can lose an in-flight sample;
    /// acceptable for periodic reporting, same as the rest of this module's
    /// relaxed-ordering counters.
    fn reset(&self) -> HistogramSnapshot {
        let snap = self.snapshot();
        for bucket in &self.buckets {
            bucket.store(0, Ordering::Relaxed);
        }
        self.count.store(0, Ordering::Relaxed);
        self.sum_ns.store(0, Ordering::Relaxed);
        self.min_ns.store(u64::MAX, Ordering::Relaxed);
        self.max_ns.store(0, Ordering::Relaxed);
        snap
    }
}

fn bucket_index(ns: u64) -> usize {
    if ns < BASE_NS {
        return 0;
    }
    let ratio = ns / BASE_NS;
    let idx = 64 - ratio.leading_zeros() as usize;
    idx.min(NUM_BUCKETS - 1)
}

fn bucket_upper_bound_ns(idx: usize) -> u64 {
    BASE_NS << (idx as u32 + 1)
}

struct HistogramSnapshot {
    count: u64,
    sum_ns: u64,
    min_ns: u64,
    max_ns: u64,
    counts: Vec<u64>,
}

impl HistogramSnapshot {
    /// Linear interpolation between the two bucket boundaries straddling
    /// the target rank, using the bucket's upper edge as the estimate
    /// once the exact rank falls inside it.
    fn quantile(&self, q: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let target = (q * self.count as f64).ceil() as u64;
        let mut cumulative = 0u64;
        for (idx, &c) in self.counts.iter().enumerate() {
            cumulative += c;
            if cumulative >= target {
                return bucket_upper_bound_ns(idx) as f64 / 1000.0;
            }
        }
        bucket_upper_bound_ns(self.counts.len() - 1) as f64 / 1000.0
    }

    fn mean_us(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum_ns as f64 / self.count as f64) / 1000.0
        }
    }

    fn min_us(&self) -> f64 {
        self.min_ns as f64 / 1000.0
    }

    fn max_us(&self) -> f64 {
        self.max_ns as f64 / 1000.0
    }
}

struct TenantOpStats {
    histogram: Histogram,
    ok: AtomicU64,
    not_found: AtomicU64,
    error: AtomicU64,
}

impl TenantOpStats {
    fn new() -> Self {
        Self {
            histogram: Histogram::new(),
            ok: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
            error: AtomicU64::new(0),
        }
    }
}

/// One tenant/op's worth of resolved stats for a single reporting interval.
struct IntervalRow {
    count: u64,
    max_us: f64,
    min_us: f64,
    avg_us: f64,
    p50: f64,
    p90: f64,
    p99: f64,
    p999: f64,
}

/// Owns every tenant/op latency histogram and the resource-share/usage
/// history the scheduler reports, and drives the CSV dump threads.
pub struct Measurements {
    stats: Vec<TenantOpStats>,
    tenant_count: usize,
    shares_log: Mutex<Vec<(u64, TenantId, u32, u32, u32, u8)>>,
    usage_log: Mutex<Vec<(u64, TenantId, u32, u32, u32)>>,
    latch: Arc<Latch>,
    start: Instant,
}

impl Measurements {
    pub fn new(tenant_count: usize) -> Arc<Self> {
        let stats = (0..tenant_count * OpKind::COUNT).map(|_| TenantOpStats::new()).collect();
        Arc::new(Self {
            stats,
            tenant_count,
            shares_log: Mutex::new(Vec::new()),
            usage_log: Mutex::new(Vec::new()),
            latch: Arc::new(Latch::new()),
            start: Instant::now(),
        })
    }

    fn slot(&self, tenant: TenantId, op: OpKind) -> &TenantOpStats {
        &self.stats[tenant as usize * OpKind::COUNT + op.index()]
    }

    /// Microseconds elapsed since this `Measurements` was created; used as
    /// the timestamp column for resource rows.
    pub fn elapsed_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Milliseconds elapsed since this `Measurements` was created; used as
    /// the timestamp column for client-stats rows.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Records one completed operation. Only `Outcome::Ok` calls feed the
    /// latency histogram; `NotFound`/`Error` are counted but excluded from
    /// quantiles so a spike in misses can't be mistaken for slowness.
    pub fn record(&self, tenant: TenantId, op: OpKind, elapsed: Duration, outcome: Outcome) {
        let slot = self.slot(tenant, op);
        match outcome {
            Outcome::Ok => {
                slot.histogram.record(elapsed.as_nanos() as u64);
                slot.ok.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::NotFound => {
                slot.not_found.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Error => {
                slot.error.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Appends one scheduler push to the in-memory resource-share log:
    /// write/read rate in kbps, plus the write-buffer size (KB) and slot
    /// count handed to that tenant.
    pub fn log_shares(
        &self,
        t_us: u64,
        tenant: TenantId,
        write_kbps: u32,
        read_kbps: u32,
        write_buffer_size_kb: u32,
        max_write_buffer_number: u8,
    ) {
        self.shares_log
            .lock()
            .push((t_us, tenant, write_kbps, read_kbps, write_buffer_size_kb, max_write_buffer_number));
    }

    /// Appends one scheduler push to the in-memory resource-usage log, as
    /// instantaneous rates (kbps), not cumulative byte counts.
    pub fn log_usage(&self, t_us: u64, tenant: TenantId, io_write_kbps: u32, io_read_kbps: u32, mem_write_kbps: u32) {
        self.usage_log.lock().push((t_us, tenant, io_write_kbps, io_read_kbps, mem_write_kbps));
    }

    fn interval_row(slot: &TenantOpStats) -> Option<IntervalRow> {
        let not_found = slot.not_found.swap(0, Ordering::Relaxed);
        let error = slot.error.swap(0, Ordering::Relaxed);
        let ok = slot.ok.swap(0, Ordering::Relaxed);
        let snap = slot.histogram.reset();
        if snap.count == 0 && not_found == 0 && error == 0 && ok == 0 {
            return None;
        }
        Some(IntervalRow {
            count: snap.count + not_found + error,
            max_us: snap.max_us(),
            min_us: snap.min_us(),
            avg_us: snap.mean_us(),
            p50: snap.quantile(0.50),
            p90: snap.quantile(0.90),
            p99: snap.quantile(0.99),
            p999: snap.quantile(0.999),
        })
    }

    /// Writes `client_stats.log` with one row per (tenant, op) that saw at
    /// least one call since the previous dump, then resets those counters
    /// for the next interval.
    pub fn write_client_stats(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let t_ms = self.elapsed_ms();
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "timestamp_ms,client_id,op_type,count,max,min,avg,p50,p90,p99,p99.9")?;
        for tenant in 0..self.tenant_count {
            for op in OpKind::ALL {
                let slot = self.slot(tenant as TenantId, op);
                let Some(row) = Self::interval_row(slot) else { continue };
                writeln!(
                    w,
                    "{},{},{},{},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2}",
                    t_ms,
                    tenant,
                    op.as_str(),
                    row.count,
                    row.max_us,
                    row.min_us,
                    row.avg_us,
                    row.p50,
                    row.p90,
                    row.p99,
                    row.p999,
                )?;
            }
        }
        Ok(())
    }

    pub fn write_resource_shares(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "timestamp_us,client_id,write_kbps,read_kbps,write_buffer_size_kb,max_write_buffer_number")?;
        for (t_us, tenant, write_kbps, read_kbps, wb_kb, wb_count) in self.shares_log.lock().iter() {
            writeln!(w, "{t_us},{tenant},{write_kbps},{read_kbps},{wb_kb},{wb_count}")?;
        }
        Ok(())
    }

    pub fn write_resource_usage(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "timestamp_us,client_id,io_write_kbps,io_read_kbps,mem_write_kbps")?;
        for (t_us, tenant, write_kbps, read_kbps, mem_kbps) in self.usage_log.lock().iter() {
            writeln!(w, "{t_us},{tenant},{write_kbps},{read_kbps},{mem_kbps}")?;
        }
        Ok(())
    }

    /// Spawns a background thread that dumps all three CSV files every
    /// `interval` until [`Measurements::stop_dumper`] is called.
    pub fn start_periodic_dump(self: &Arc<Self>, out_dir: PathBuf, interval: Duration) -> JoinHandle<()> {
        let me = self.clone();
        let latch = self.latch.clone();
        std::thread::Builder::new()
            .name("tenantbench-measurements".into())
            .spawn(move || loop {
                if latch.wait_timeout(interval) {
                    break;
                }
                if let Err(err) = me.dump_all(&out_dir) {
                    error!(target: "tenantbench::measurement", %err, "periodic CSV dump failed");
                }
            })
            .expect("failed to spawn measurement dump thread")
    }

    pub fn dump_all(&self, out_dir: &Path) -> std::io::Result<()> {
        self.write_client_stats(out_dir.join("client_stats.log"))?;
        self.write_resource_shares(out_dir.join("resource_shares.log"))?;
        self.write_resource_usage(out_dir.join("resource_usage.log"))?;
        Ok(())
    }

    pub fn stop_dumper(&self) {
        self.latch.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_index_is_monotonic() {
        assert!(bucket_index(1) <= bucket_index(1000));
        assert!(bucket_index(1000) <= bucket_index(1_000_000));
    }

    #[test]
    fn quantiles_reflect_recorded_latencies() {
        let m = Measurements::new(1);
        for _ in 0..100 {
            m.record(0, OpKind::Read, Duration::from_micros(100), Outcome::Ok);
        }
        let snap = m.slot(0, OpKind::Read).histogram.snapshot();
        assert_eq!(snap.count, 100);
        assert!(snap.quantile(0.50) >= 100.0);
    }

    #[test]
    fn errors_excluded_from_latency_but_counted() {
        let m = Measurements::new(1);
        m.record(0, OpKind::Read, Duration::from_micros(5), Outcome::Error);
        let slot = m.slot(0, OpKind::Read);
        assert_eq!(slot.histogram.snapshot().count, 0);
        assert_eq!(slot.error.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn interval_row_resets_counters_for_the_next_dump() {
        let m = Measurements::new(1);
        m.record(0, OpKind::Read, Duration::from_micros(10), Outcome::Ok);
        let first = Measurements::interval_row(m.slot(0, OpKind::Read)).unwrap();
        assert_eq!(first.count, 1);
        assert!(Measurements::interval_row(m.slot(0, OpKind::Read)).is_none());
    }

    #[test]
    fn min_and_max_track_the_observed_extremes() {
        let m = Measurements::new(1);
        m.record(0, OpKind::Read, Duration::from_micros(5), Outcome::Ok);
        m.record(0, OpKind::Read, Duration::from_micros(500), Outcome::Ok);
        let row = Measurements::interval_row(m.slot(0, OpKind::Read)).unwrap();
        assert!(row.min_us <= 5.1);
        assert!(row.max_us >= 499.0);
    }
}
