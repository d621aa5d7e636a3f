//! Worker Pool (C6): a fixed number of worker threads draining one FIFO
//! queue per tenant. Each worker starts its round-robin scan at
//! `worker_id mod tenant_count` so that, under load, tenants are not all
//! contended for by worker 0 first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::types::TenantId;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Queues {
    per_tenant: Vec<VecDeque<(Job, Instant)>>,
    closed: bool,
}

/// A bounded pool of worker threads fed by per-tenant FIFO queues.
///
/// `dispatch` never blocks the caller on engine work; it only enqueues.
/// Per-tenant ordering is preserved (each tenant's jobs run in submission
/// order), while fairness across tenants comes from the round-robin scan.
pub struct WorkerPool {
    queues: Arc<Mutex<Queues>>,
    not_empty: Arc<Condvar>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    tenant_count: usize,
}

impl WorkerPool {
    pub fn start(worker_count: usize, tenant_count: usize, on_wait: impl Fn(TenantId, Duration) + Send + Sync + 'static) -> Arc<Self> {
        let queues = Arc::new(Mutex::new(Queues {
            per_tenant: (0..tenant_count).map(|_| VecDeque::new()).collect(),
            closed: false,
        }));
        let not_empty = Arc::new(Condvar::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let on_wait = Arc::new(on_wait);

        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let queues = queues.clone();
            let not_empty = not_empty.clone();
            let shutdown = shutdown.clone();
            let on_wait = on_wait.clone();
            let start_at = if tenant_count == 0 { 0 } else { worker_id % tenant_count };

            let handle = std::thread::Builder::new()
                .name(format!("tenantbench-worker-{worker_id}"))
                .spawn(move || worker_loop(queues, not_empty, shutdown, tenant_count, start_at, on_wait))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        Arc::new(Self {
            queues,
            not_empty,
            handles: Mutex::new(handles),
            shutdown,
            tenant_count,
        })
    }

    /// Enqueues `job` for `tenant`; returns immediately. Jobs submitted
    /// after `shutdown()` has been called are silently dropped.
    pub fn dispatch(&self, tenant: TenantId, job: impl FnOnce() + Send + 'static) {
        let mut queues = self.queues.lock();
        if queues.closed {
            return;
        }
        queues.per_tenant[tenant as usize].push_back((Box::new(job), Instant::now()));
        self.not_empty.notify_one();
    }

    pub fn tenant_count(&self) -> usize {
        self.tenant_count
    }

    /// Signals shutdown and wakes every worker. `dispatch` rejects any job
    /// submitted from this point on, but jobs already queued are not
    /// dropped: each worker keeps draining its round-robin scan until every
    /// tenant queue is empty, then returns. Joins all workers before
    /// returning.
    pub fn shutdown(&self) {
        self.queues.lock().closed = true;
        self.shutdown.store(true, Ordering::Relaxed);
        self.not_empty.notify_all();
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    queues: Arc<Mutex<Queues>>,
    not_empty: Arc<Condvar>,
    shutdown: Arc<AtomicBool>,
    tenant_count: usize,
    start_at: usize,
    on_wait: Arc<dyn Fn(TenantId, Duration) + Send + Sync>,
) {
    loop {
        let popped = {
            let mut guard = queues.lock();
            loop {
                if let Some((idx, job, enqueued_at)) = pop_round_robin(&mut guard.per_tenant, start_at) {
                    break Some((idx, job, enqueued_at));
                }
                if shutdown.load(Ordering::Relaxed) {
                    break None;
                }
                not_empty.wait_for(&mut guard, Duration::from_millis(50));
            }
        };

        match popped {
            Some((tenant, job, enqueued_at)) => {
                on_wait(tenant as TenantId, enqueued_at.elapsed());
                job();
            }
            None => break,
        }
    }
}

/// Scans tenant queues starting at `start_at`, wrapping around, and pops
/// the first non-empty one found.
fn pop_round_robin(
    per_tenant: &mut [VecDeque<(Job, Instant)>],
    start_at: usize,
) -> Option<(usize, Job, Instant)> {
    let n = per_tenant.len();
    if n == 0 {
        return None;
    }
    for offset in 0..n {
        let idx = (start_at + offset) % n;
        if let Some((job, enqueued_at)) = per_tenant[idx].pop_front() {
            return Some((idx, job, enqueued_at));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn preserves_per_tenant_submission_order() {
        let results = Arc::new(Mutex::new(Vec::new()));
        let pool = WorkerPool::start(1, 2, |_, _| {});
        for i in 0..5 {
            let results = results.clone();
            pool.dispatch(0, move || results.lock().push(i));
        }
        std::thread::sleep(Duration::from_millis(50));
        pool.shutdown();
        assert_eq!(*results.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn dispatch_after_shutdown_is_dropped() {
        let pool = WorkerPool::start(1, 1, |_, _| {});
        pool.shutdown();
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        pool.dispatch(0, move || r.store(true, Ordering::Relaxed));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!ran.load(Ordering::Relaxed));
    }

    #[test]
    fn reports_queue_wait_duration() {
        let waited = Arc::new(AtomicBool::new(false));
        let w = waited.clone();
        let pool = WorkerPool::start(1, 1, move |_, _| w.store(true, Ordering::Relaxed));
        let done = Arc::new(AtomicUsize::new(0));
        let d = done.clone();
        pool.dispatch(0, move || {
            d.fetch_add(1, Ordering::Relaxed);
        });
        std::thread::sleep(Duration::from_millis(50));
        pool.shutdown();
        assert_eq!(done.load(Ordering::Relaxed), 1);
        assert!(waited.load(Ordering::Relaxed));
    }
}
