//! Behavior executor (C7): drives a tenant's scripted phases
//! (`Steady`/`Bursty`/`Inactive`/`Replay`) end to end, turning each phase
//! into a stream of dispatch timings handed to the worker pool.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::cancel::Latch;
use super::trace::{Trace, TraceError, TraceFile};
use super::types::{BehaviorPhase, TenantId};

const BUSY_WAIT_THRESHOLD: Duration = Duration::from_millis(1);

/// Executes one tenant's full behavior script against a per-request
/// callback, respecting `latch` for early cancellation (shutdown).
pub struct BehaviorExecutor {
    latch: Arc<Latch>,
}

impl BehaviorExecutor {
    pub fn new(latch: Arc<Latch>) -> Self {
        Self { latch }
    }

    /// Runs every phase of `script` in order, invoking `on_request` once
    /// per generated request. Returns early without error if cancelled
    /// mid-script.
    pub fn run(
        &self,
        tenant: TenantId,
        script: &[BehaviorPhase],
        traces: Option<&TraceFile>,
        mut on_request: impl FnMut(TenantId),
    ) -> Result<(), TraceError> {
        for phase in script {
            if self.latch.is_fired() {
                return Ok(());
            }
            match phase {
                BehaviorPhase::Steady { qps, duration_s } => {
                    self.run_steady(tenant, *qps, *duration_s, &mut on_request);
                }
                BehaviorPhase::Bursty { qps, burst_ms, idle_ms, repeats } => {
                    self.run_bursty(tenant, *qps, *burst_ms, *idle_ms, *repeats, &mut on_request);
                }
                BehaviorPhase::Inactive { duration_s } => {
                    self.sleep_cancellable(Duration::from_secs(*duration_s as u64));
                }
                BehaviorPhase::Replay { trace, replay_id, scale } => {
                    let traces = traces.expect("REPLAY phase requires a loaded trace file");
                    let _ = trace; // the path is resolved once, up front, into `traces`
                    let t = traces.get(*replay_id)?;
                    self.run_replay(tenant, t, *scale, &mut on_request);
                }
            }
        }
        Ok(())
    }

    fn run_steady(&self, tenant: TenantId, qps: u32, duration_s: u32, on_request: &mut impl FnMut(TenantId)) {
        if qps == 0 {
            self.sleep_cancellable(Duration::from_secs(duration_s as u64));
            return;
        }
        let interval = Duration::from_secs_f64(1.0 / qps as f64);
        let deadline = std::time::Instant::now() + Duration::from_secs(duration_s as u64);
        while std::time::Instant::now() < deadline {
            if self.latch.is_fired() {
                return;
            }
            on_request(tenant);
            self.sleep_cancellable(interval);
        }
    }

    fn run_bursty(
        &self,
        tenant: TenantId,
        qps: u32,
        burst_ms: u32,
        idle_ms: u32,
        repeats: u32,
        on_request: &mut impl FnMut(TenantId),
    ) {
        for _ in 0..repeats {
            if self.latch.is_fired() {
                return;
            }
            if qps > 0 {
                let interval = Duration::from_secs_f64(1.0 / qps as f64);
                let deadline = std::time::Instant::now() + Duration::from_millis(burst_ms as u64);
                while std::time::Instant::now() < deadline {
                    if self.latch.is_fired() {
                        return;
                    }
                    on_request(tenant);
                    self.sleep_cancellable(interval);
                }
            } else {
                self.sleep_cancellable(Duration::from_millis(burst_ms as u64));
            }
            self.sleep_cancellable(Duration::from_millis(idle_ms as u64));
        }
    }

    fn run_replay(&self, tenant: TenantId, trace: &Trace, scale: f64, on_request: &mut impl FnMut(TenantId)) {
        for interval_s in trace.scaled_intervals_s(scale) {
            if self.latch.is_fired() {
                return;
            }
            on_request(tenant);
            self.sleep_cancellable(Duration::from_secs_f64(interval_s.max(0.0)));
        }
    }

    /// Sleeps for `dur` unless cancellation fires first, in which case it
    /// returns early. Intervals below `BUSY_WAIT_THRESHOLD` busy-spin
    /// instead of parking on the latch's condvar: at qps > 1000 the
    /// OS-scheduler wakeup jitter on a condvar park is large relative to
    /// the interval itself, and would make Steady phases systematically
    /// undershoot their configured rate.
    fn sleep_cancellable(&self, dur: Duration) {
        if dur >= BUSY_WAIT_THRESHOLD {
            self.latch.wait_timeout(dur);
            return;
        }
        let deadline = std::time::Instant::now() + dur;
        while std::time::Instant::now() < deadline {
            if self.latch.is_fired() {
                return;
            }
            std::hint::spin_loop();
        }
    }
}

/// Total number of requests a script will generate, independent of
/// timing — used to preallocate histograms and to print a startup
/// summary. `Replay` contributes its trace's interval count regardless of
/// `scale`, since scale only reshapes inter-arrival timing.
pub fn total_expected_ops(script: &[BehaviorPhase], traces: Option<&TraceFile>) -> usize {
    script
        .iter()
        .map(|phase| match phase {
            BehaviorPhase::Steady { qps, duration_s } => (*qps as u64 * *duration_s as u64) as usize,
            BehaviorPhase::Bursty { qps, burst_ms, repeats, .. } => {
                let per_burst = (*qps as u64 * *burst_ms as u64) / 1000;
                (per_burst * *repeats as u64) as usize
            }
            BehaviorPhase::Inactive { .. } => 0,
            BehaviorPhase::Replay { replay_id, .. } => traces
                .and_then(|t| t.get(*replay_id).ok())
                .map(|t| t.request_count())
                .unwrap_or(0),
        })
        .sum()
}

pub fn log_script_summary(tenant: TenantId, script: &[BehaviorPhase], traces: Option<&TraceFile>) {
    info!(
        tenant,
        phases = script.len(),
        expected_ops = total_expected_ops(script, traces),
        "behavior script loaded"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_millisecond_sleep_busy_waits_and_respects_cancellation() {
        let executor = BehaviorExecutor::new(Arc::new(Latch::new()));
        let start = std::time::Instant::now();
        executor.sleep_cancellable(Duration::from_micros(200));
        assert!(start.elapsed() >= Duration::from_micros(200));

        let latch = Arc::new(Latch::new());
        latch.fire();
        let cancelled = BehaviorExecutor::new(latch);
        let start = std::time::Instant::now();
        cancelled.sleep_cancellable(Duration::from_micros(500));
        assert!(start.elapsed() < Duration::from_micros(500));
    }

    #[test]
    fn steady_phase_counts_qps_times_duration() {
        let script = vec![BehaviorPhase::Steady { qps: 100, duration_s: 10 }];
        assert_eq!(total_expected_ops(&script, None), 1000);
    }

    #[test]
    fn bursty_phase_counts_per_burst_times_repeats() {
        let script = vec![BehaviorPhase::Bursty { qps: 1000, burst_ms: 200, idle_ms: 800, repeats: 3 }];
        // 1000 qps * 0.2s = 200 per burst, times 3 repeats.
        assert_eq!(total_expected_ops(&script, None), 600);
    }

    #[test]
    fn inactive_phase_contributes_no_ops() {
        let script = vec![BehaviorPhase::Inactive { duration_s: 30 }];
        assert_eq!(total_expected_ops(&script, None), 0);
    }

    #[test]
    fn replay_emits_before_sleeping_and_respects_trace_timing() {
        let executor = BehaviorExecutor::new(Arc::new(Latch::new()));
        let trace = Trace { intervals_s: vec![0.05, 0.05] };
        let mut emitted = Vec::new();
        let start = std::time::Instant::now();
        executor.run_replay(0, &trace, 1.0, &mut |tenant| {
            emitted.push((tenant, start.elapsed()));
        });
        // Both requests fire; the first fires immediately (no leading sleep).
        assert_eq!(emitted.len(), 2);
        assert!(emitted[0].1 < Duration::from_millis(10));
        // The second fires only after the first interval has elapsed.
        assert!(emitted[1].1 >= Duration::from_millis(40));
    }

    #[test]
    fn replay_count_is_independent_of_scale() {
        let trace = Trace { intervals_s: vec![1.0, 2.0, 3.0, 4.0] };
        assert_eq!(trace.request_count(), 4);
        let scaled_a: Vec<f64> = trace.scaled_intervals_s(0.5).collect();
        let scaled_b: Vec<f64> = trace.scaled_intervals_s(4.0).collect();
        assert_eq!(scaled_a.len(), scaled_b.len());
    }
}
