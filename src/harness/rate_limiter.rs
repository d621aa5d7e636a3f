//! Rate Limiter (C2): per-tenant, per-direction token buckets with a FIFO
//! wait queue and a priority bypass, refilled on a fixed tick by a
//! background thread.
//!
//! Modeled on the engine's own use of `parking_lot` for its hot locks: a
//! plain `Mutex` + `Condvar` pair outperforms the stdlib equivalents at the
//! sub-millisecond cadence the scheduler pushes rate changes at.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::types::{Direction, Priority, TenantId};

/// Default refill tick (§4.2: "on a fixed period P, default 1 ms"). Callers
/// normally supply the configured period via `RateLimiter::start`.
pub const DEFAULT_REFILL_PERIOD: Duration = Duration::from_millis(1);

struct Bucket {
    tokens: f64,
    capacity: f64,
    rate_per_sec: f64,
    refill_period: Duration,
    next_ticket: u64,
    serving: u64,
    queue_len: usize,
}

impl Bucket {
    fn new(rate_kbps: u32, refill_period: Duration) -> Self {
        let rate_per_sec = rate_kbps as f64 * 1024.0;
        let capacity = (rate_per_sec * refill_period.as_secs_f64()).max(1.0);
        Self {
            tokens: capacity,
            capacity,
            rate_per_sec,
            refill_period,
            next_ticket: 0,
            serving: 0,
            queue_len: 0,
        }
    }

    fn refill(&mut self, elapsed: Duration) {
        self.tokens = (self.tokens + self.rate_per_sec * elapsed.as_secs_f64()).min(self.capacity);
    }

    /// Capacity is bounded to one refill period's worth of tokens at the
    /// new rate, per the `tokens ≤ rate_kbps × refill_period` invariant.
    fn set_rate(&mut self, rate_kbps: u32) {
        self.rate_per_sec = rate_kbps as f64 * 1024.0;
        self.capacity = (self.rate_per_sec * self.refill_period.as_secs_f64()).max(1.0);
        self.tokens = self.tokens.min(self.capacity);
    }
}

struct Lane {
    bucket: Mutex<Bucket>,
    cv: Condvar,
    bytes_through: AtomicU64,
}

impl Lane {
    fn new(rate_kbps: u32, refill_period: Duration) -> Self {
        Self {
            bucket: Mutex::new(Bucket::new(rate_kbps, refill_period)),
            cv: Condvar::new(),
            bytes_through: AtomicU64::new(0),
        }
    }

    /// Blocks until `bytes` worth of tokens are available and it is this
    /// caller's turn in FIFO order, then debits the bucket.
    ///
    /// `Priority::High` skips both the token wait and the FIFO queue: it
    /// debits immediately, which can drive `tokens` negative. The next
    /// refill pays the debt down before anyone else draws from it.
    fn acquire(&self, bytes: u64, priority: Priority, shutdown: &AtomicBool) {
        if priority == Priority::High {
            let mut bucket = self.bucket.lock();
            bucket.tokens -= bytes as f64;
            return;
        }

        let mut bucket = self.bucket.lock();
        let my_ticket = bucket.next_ticket;
        bucket.next_ticket += 1;
        bucket.queue_len += 1;

        loop {
            if shutdown.load(Ordering::Relaxed) {
                bucket.queue_len -= 1;
                self.cv.notify_all();
                return;
            }
            if bucket.serving == my_ticket && bucket.tokens >= bytes as f64 {
                bucket.tokens -= bytes as f64;
                bucket.serving += 1;
                bucket.queue_len -= 1;
                self.cv.notify_all();
                return;
            }
            self.cv.wait_for(&mut bucket, Duration::from_millis(5));
        }
    }

    fn set_rate(&self, rate_kbps: u32) {
        self.bucket.lock().set_rate(rate_kbps);
        self.cv.notify_all();
    }

    fn refill(&self, elapsed: Duration) {
        self.bucket.lock().refill(elapsed);
        self.cv.notify_all();
    }

    fn queue_depth(&self) -> usize {
        self.bucket.lock().queue_len
    }
}

/// Owns one read lane and one write lane per tenant.
pub struct RateLimiter {
    lanes: Vec<(Arc<Lane>, Arc<Lane>)>,
    shutdown: Arc<AtomicBool>,
    refill_thread: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Builds a limiter with every tenant starting at `default_rate_kbps`
    /// in both directions, and spawns the background refill thread ticking
    /// every `refill_period`.
    pub fn start(tenant_count: usize, default_rate_kbps: u32, refill_period: Duration) -> Arc<Self> {
        let lanes = (0..tenant_count)
            .map(|_| {
                (
                    Arc::new(Lane::new(default_rate_kbps, refill_period)),
                    Arc::new(Lane::new(default_rate_kbps, refill_period)),
                )
            })
            .collect::<Vec<_>>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let limiter = Arc::new(Self {
            lanes,
            shutdown: shutdown.clone(),
            refill_thread: Mutex::new(None),
        });

        let refill_lanes: Vec<(Arc<Lane>, Arc<Lane>)> = limiter.lanes.clone();
        let handle = std::thread::Builder::new()
            .name("tenantbench-ratelimiter".into())
            .spawn(move || {
                let mut last = Instant::now();
                while !shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(refill_period);
                    let now = Instant::now();
                    let elapsed = now.duration_since(last);
                    last = now;
                    for (read, write) in &refill_lanes {
                        read.refill(elapsed);
                        write.refill(elapsed);
                    }
                }
            })
            .expect("failed to spawn rate limiter refill thread");
        *limiter.refill_thread.lock() = Some(handle);
        limiter
    }

    /// Blocks the caller until `bytes` of budget in `direction` is
    /// available for `tenant`, then debits it.
    pub fn acquire(&self, tenant: TenantId, direction: Direction, bytes: u64, priority: Priority) {
        let (read, write) = &self.lanes[tenant as usize];
        let lane = match direction {
            Direction::Read => read,
            Direction::Write => write,
        };
        lane.acquire(bytes, priority, &self.shutdown);
        lane.bytes_through.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Pushes a new rate for one tenant/direction; takes effect on the
    /// next refill tick without disturbing in-flight waiters.
    pub fn set_rate(&self, tenant: TenantId, direction: Direction, rate_kbps: u32) {
        let (read, write) = &self.lanes[tenant as usize];
        match direction {
            Direction::Read => read.set_rate(rate_kbps),
            Direction::Write => write.set_rate(rate_kbps),
        }
    }

    /// Bulk form of `set_rate`: pushes a full per-tenant rate vector for one
    /// direction in one call, the scheduler's documented way of landing a
    /// cycle's allocation.
    pub fn set_rates(&self, rates_kbps: &[u32], direction: Direction) {
        for (tenant, &rate_kbps) in rates_kbps.iter().enumerate() {
            self.set_rate(tenant as TenantId, direction, rate_kbps);
        }
    }

    /// Cumulative bytes successfully admitted per tenant, `(read, write)`.
    pub fn bytes_through(&self, tenant: TenantId) -> (u64, u64) {
        let (read, write) = &self.lanes[tenant as usize];
        (
            read.bytes_through.load(Ordering::Relaxed),
            write.bytes_through.load(Ordering::Relaxed),
        )
    }

    /// Number of callers currently parked waiting for tokens, summed over
    /// both directions, for one tenant. Exposed for diagnostics.
    pub fn queue_depth(&self, tenant: TenantId) -> usize {
        let (read, write) = &self.lanes[tenant as usize];
        read.queue_depth() + write.queue_depth()
    }

    /// Wakes every parked waiter so shutdown can proceed without a 5ms
    /// poll delay per waiter.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for (read, write) in &self.lanes {
            read.cv.notify_all();
            write.cv.notify_all();
        }
        if let Some(handle) = self.refill_thread.lock().take() {
            let _ = handle.join();
        }
    }
}
