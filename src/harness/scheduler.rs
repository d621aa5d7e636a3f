//! Fair-Share Scheduler (C4): periodically samples usage, smooths it over
//! a lookback window, runs Progressive Filling (max-min fair share) over
//! each resource dimension, and pushes the resulting shares into the rate
//! limiter (C2) and write-buffer manager (C3).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::cancel::Latch;
use super::config::{SchedulerOptions, FLOOR_IO_KBPS, FLOOR_MEMTABLE_BYTES};
use super::measurement::Measurements;
use super::rate_limiter::RateLimiter;
use super::types::{Direction, ResourceShares, TenantId};
use super::usage::UsageMeter;
use super::write_buffer::WriteBufferManager;

/// Progressive Filling max-min fair share: sorts clients by ascending
/// demand and walks them in a single pass, retiring each client whose
/// demand is strictly under its share of what remains; the first client
/// whose demand is not strictly under the fair share, and everyone still
/// unretired after it, all get that fair share.
///
/// The comparison against the fair share must be strict (`<`, not `<=`):
/// using `<=` lets a client whose demand exactly equals a stale fair share
/// retire and ramp up before the remaining clients are considered, which
/// can starve a later, needier client of capacity it should have received
/// under max-min fairness.
///
/// A client retired early (its demand comfortably under its fair share) is
/// allowed to ramp up past its own smoothed demand: it is granted
/// `max(ramp * demand_i, floor)`, not the raw demand itself, so a tenant
/// that was parked at `floor` in a prior interval can burst back up to its
/// fair share instead of being capped at what it was previously granted.
/// `capacity_remaining` is debited by each retired client's raw `demand`,
/// not by the ramped allocation it keeps — the original scheduler this is
/// modeled on does the same: a client's surplus above its own demand does
/// not exist to redistribute, ramp or no ramp.
///
/// Because ramp can push a retired client's allocation above its demand,
/// `Σ alloc_i` can end up above `capacity`; the result is normalized back
/// down proportionally before returning.
pub fn prf(demand: &[f64], capacity: f64, ramp: f64, floor: f64) -> Vec<f64> {
    let n = demand.len();
    if n == 0 {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| demand[a].partial_cmp(&demand[b]).unwrap_or(std::cmp::Ordering::Equal));

    let mut alloc = vec![0.0_f64; n];
    let mut remaining = capacity.max(0.0);
    let mut unassigned = n;

    for (pos, &i) in order.iter().enumerate() {
        let fair = remaining / unassigned as f64;
        if demand[i] < fair {
            alloc[i] = (ramp * demand[i]).max(floor);
            remaining -= demand[i];
            unassigned -= 1;
        } else {
            for &j in &order[pos..] {
                alloc[j] = fair;
            }
            break;
        }
    }

    normalize(&mut alloc, capacity);
    alloc
}

/// Step 4: if the ramp factor pushed `Σ alloc_i` above `capacity`, scale
/// every allocation down proportionally so the sum lands back at capacity.
/// A no-op when the sum is already within capacity (the common case once
/// every client has ramped past its floor).
fn normalize(alloc: &mut [f64], capacity: f64) {
    let total: f64 = alloc.iter().sum();
    if total > capacity && total > 0.0 {
        let scale = capacity / total;
        for a in alloc.iter_mut() {
            *a *= scale;
        }
    }
}

/// Max-over-window smoothing: takes the peak observed rate across the
/// last `window` samples rather than their average, so a tenant that
/// bursts briefly keeps its earned share instead of being smoothed away
/// by quieter neighboring intervals.
fn smooth_max(window: &VecDeque<f64>) -> f64 {
    window.iter().copied().fold(0.0, f64::max)
}

struct TenantWindow {
    read_rate: VecDeque<f64>,
    write_rate: VecDeque<f64>,
    mem_rate: VecDeque<f64>,
}

impl TenantWindow {
    fn new() -> Self {
        Self {
            read_rate: VecDeque::new(),
            write_rate: VecDeque::new(),
            mem_rate: VecDeque::new(),
        }
    }

    fn push(&mut self, read: f64, write: f64, mem: f64, cap: usize) {
        push_bounded(&mut self.read_rate, read, cap);
        push_bounded(&mut self.write_rate, write, cap);
        push_bounded(&mut self.mem_rate, mem, cap);
    }
}

fn push_bounded(deque: &mut VecDeque<f64>, value: f64, cap: usize) {
    deque.push_back(value);
    while deque.len() > cap {
        deque.pop_front();
    }
}

pub struct Scheduler {
    handle: Mutex<Option<JoinHandle<()>>>,
    latch: Arc<Latch>,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    /// Spawns the control loop thread; it runs until [`Scheduler::stop`]
    /// is called.
    pub fn start(
        usage: Arc<UsageMeter>,
        limiter: Arc<RateLimiter>,
        write_buffer: Arc<WriteBufferManager>,
        measurements: Arc<Measurements>,
        options: SchedulerOptions,
    ) -> Arc<Self> {
        let latch = Arc::new(Latch::new());
        let running = Arc::new(AtomicBool::new(true));

        let thread_latch = latch.clone();
        let thread_running = running.clone();
        let interval = Duration::from_millis(options.rsched_interval_ms);

        let handle = std::thread::Builder::new()
            .name("tenantbench-scheduler".into())
            .spawn(move || {
                let n = usage.tenant_count();
                let mut prev_usage = usage.snapshot();
                let mut windows: Vec<TenantWindow> = (0..n).map(|_| TenantWindow::new()).collect();
                let interval_s = options.rsched_interval_ms as f64 / 1000.0;

                while thread_running.load(Ordering::Relaxed) {
                    if thread_latch.wait_timeout(interval) {
                        break;
                    }

                    let cur_usage = usage.snapshot();
                    for (i, window) in windows.iter_mut().enumerate() {
                        let (w, r, m) = cur_usage[i].rate_since(&prev_usage[i], interval_s);
                        window.push(r, w, m, options.lookback_intervals);
                    }
                    prev_usage = cur_usage;

                    let read_demand: Vec<f64> = windows.iter().map(|w| smooth_max(&w.read_rate)).collect();
                    let write_demand: Vec<f64> =
                        windows.iter().map(|w| smooth_max(&w.write_rate)).collect();
                    let mem_demand: Vec<f64> = windows.iter().map(|w| smooth_max(&w.mem_rate)).collect();

                    let read_cap = options.io_read_capacity_kbps as f64 * 1024.0;
                    let write_cap = options.io_write_capacity_kbps as f64 * 1024.0;
                    let floor_bytes_per_sec = FLOOR_IO_KBPS as f64 * 1024.0;

                    let read_alloc = prf(&read_demand, read_cap, options.rampup_multiplier, floor_bytes_per_sec);
                    let write_alloc = prf(&write_demand, write_cap, options.rampup_multiplier, floor_bytes_per_sec);

                    let mut read_kbps_all = vec![0u32; n];
                    let mut write_kbps_all = vec![0u32; n];
                    for i in 0..n {
                        read_kbps_all[i] = to_kbps(read_alloc[i], floor_bytes_per_sec);
                        write_kbps_all[i] = to_kbps(write_alloc[i], floor_bytes_per_sec);
                    }
                    limiter.set_rates(&read_kbps_all, Direction::Read);
                    limiter.set_rates(&write_kbps_all, Direction::Write);

                    let mem_cap = (options.memtable_capacity_kb * 1024) as f64;
                    let mem_floor_bytes =
                        FLOOR_MEMTABLE_BYTES.max((options.min_memtable_size_kb as u32) * 1024) as f64;
                    let mem_alloc = prf(&mem_demand, mem_cap, options.rampup_multiplier, mem_floor_bytes);
                    let mem_total_demand: f64 = mem_demand.iter().sum();
                    let t_us = measurements.elapsed_us();
                    for i in 0..n {
                        let bytes = (mem_alloc[i].max(mem_floor_bytes))
                            .min((options.max_memtable_size_kb as f64) * 1024.0)
                            as u32;
                        let count = project_memtable_count(
                            mem_demand[i],
                            mem_total_demand,
                            options.min_memtable_count,
                        );
                        write_buffer.set_share(i as TenantId, bytes, count);

                        measurements.log_shares(
                            t_us,
                            i as TenantId,
                            write_kbps_all[i],
                            read_kbps_all[i],
                            bytes / 1024,
                            count,
                        );
                        measurements.log_usage(
                            t_us,
                            i as TenantId,
                            (write_demand[i] / 1024.0).round() as u32,
                            (read_demand[i] / 1024.0).round() as u32,
                            (mem_demand[i] / 1024.0).round() as u32,
                        );
                    }

                    debug!(
                        target: "tenantbench::scheduler",
                        ?read_alloc,
                        ?write_alloc,
                        "pushed resource shares"
                    );
                }
                info!(target: "tenantbench::scheduler", "control loop stopped");
            })
            .expect("failed to spawn scheduler thread");

        Arc::new(Self { handle: Mutex::new(Some(handle)), latch, running })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.latch.fire();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Converts a bytes/sec allocation to whole kbps for the rate limiter,
/// re-asserting the per-resource floor as a final safety net: normalization
/// (inside `prf`) only ever scales allocations down, so it is the one step
/// that could in principle push a client back under its floor.
fn to_kbps(bytes_per_sec: f64, floor_bytes_per_sec: f64) -> u32 {
    (bytes_per_sec.max(floor_bytes_per_sec) / 1024.0).round() as u32
}

/// Projects a tenant's memtable *count* budget as the starvation floor
/// plus a proportional share of whatever count headroom remains, weighted
/// by that tenant's fraction of total smoothed write-demand. Mirrors the
/// byte-budget projection but operates on the small integer count the
/// engine actually exposes (frozen memtable slots), not raw bytes.
fn project_memtable_count(demand: f64, total_demand: f64, floor_count: u8) -> u8 {
    if total_demand <= 0.0 {
        return floor_count;
    }
    let share = demand / total_demand;
    let extra = (share * 2.0).round() as u8;
    floor_count.saturating_add(extra)
}

/// Builds a [`ResourceShares`] snapshot for reporting (C9), independent of
/// the live control loop state, from the three raw allocations.
pub fn to_resource_shares(read_kbps: u32, write_kbps: u32, memtable_bytes: u32, memtable_count: u8) -> ResourceShares {
    ResourceShares { read_kbps, write_kbps, memtable_bytes, memtable_count }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prf_splits_evenly_when_demand_exceeds_capacity() {
        let alloc = prf(&[100.0, 100.0], 100.0, 1.0, 0.0);
        assert_eq!(alloc, vec![50.0, 50.0]);
    }

    #[test]
    fn prf_gives_small_demands_what_they_ask_and_redistributes_rest() {
        let alloc = prf(&[10.0, 1000.0], 100.0, 1.0, 0.0);
        assert_eq!(alloc[0], 10.0);
        assert_eq!(alloc[1], 90.0);
    }

    #[test]
    fn prf_handles_zero_capacity() {
        let alloc = prf(&[10.0, 20.0], 0.0, 1.0, 0.0);
        assert_eq!(alloc, vec![0.0, 0.0]);
    }

    #[test]
    fn prf_handles_empty_demand() {
        assert_eq!(prf(&[], 100.0, 1.0, 0.0), Vec::<f64>::new());
    }

    #[test]
    fn prf_ramps_a_retired_clients_raw_demand_not_its_prior_allocation() {
        // Plenty of slack capacity, so both retire in the first pass and
        // normalization never engages — isolates the ramp multiply itself.
        let alloc = prf(&[10.0, 40.0], 1000.0, 2.0, 0.0);
        assert_eq!(alloc[0], 20.0); // max(2.0 * 10.0, 0.0)
        assert_eq!(alloc[1], 80.0); // max(2.0 * 40.0, 0.0)
    }

    #[test]
    fn prf_does_not_let_a_tied_demand_starve_a_needier_client() {
        // All three tenants demand >= capacity / n, so max-min fairness
        // requires an even split. A `<=` comparison against the fair share
        // would let the two 100-demand tenants retire early and ramp up,
        // leaving the 1000-demand tenant with the smallest share instead.
        let alloc = prf(&[100.0, 100.0, 1000.0], 300.0, 2.0, 0.0);
        assert_eq!(alloc, vec![100.0, 100.0, 100.0]);
    }

    #[test]
    fn prf_enforces_floor_even_for_zero_demand() {
        let alloc = prf(&[0.0, 90.0], 1000.0, 1.5, 5.0);
        assert_eq!(alloc[0], 5.0); // max(1.5 * 0.0, 5.0)
        assert_eq!(alloc[1], 135.0); // max(1.5 * 90.0, 5.0)
    }

    #[test]
    fn prf_normalizes_proportionally_when_ramp_pushes_total_over_capacity() {
        // Unclamped each client would retire at max(3.0 * 5.0, 0.0) = 15.0,
        // for a total of 30.0 against a capacity of 10.0.
        let alloc = prf(&[5.0, 5.0], 10.0, 3.0, 0.0);
        assert_eq!(alloc, vec![5.0, 5.0]);
    }

    #[test]
    fn smooth_max_picks_the_peak_not_the_average() {
        let mut window = VecDeque::new();
        for v in [1.0, 9.0, 2.0] {
            window.push_back(v);
        }
        assert_eq!(smooth_max(&window), 9.0);
    }

    #[test]
    fn project_memtable_count_returns_floor_with_no_demand() {
        assert_eq!(project_memtable_count(0.0, 0.0, 2), 2);
    }
}
