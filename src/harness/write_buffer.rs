//! Write-Buffer Manager (C3): partitions the engine's total memtable
//! budget across tenants, giving each a reserved floor and letting the
//! remainder flow through a shared elastic pool.

use parking_lot::Mutex;

use super::config::{FLOOR_MEMTABLE_BYTES, MIN_MEMTABLE_COUNT};
use super::types::{MemtableClass, TenantId};

#[derive(Debug, Clone, Copy)]
struct Reservation {
    floor_bytes: u32,
    floor_count: u8,
    class: MemtableClass,
    /// Bytes currently held above the floor, borrowed from the elastic pool.
    borrowed: u32,
    active: bool,
}

struct State {
    reservations: Vec<Reservation>,
    elastic_pool: u64,
}

/// Tracks, per tenant, how much of the global memtable budget it is
/// currently allowed to hold.
///
/// The backing `Engine` has no dynamic per-tenant memtable resize knob, so
/// this manager is a virtual accounting layer: it governs how large a
/// logical write buffer the facade lets a tenant's memtable grow to before
/// forcing a flush, not the engine's own (fixed) internal buffer sizing.
pub struct WriteBufferManager {
    state: Mutex<State>,
    total_capacity: u64,
}

impl WriteBufferManager {
    pub fn new(total_capacity_bytes: u64, classes: &[MemtableClass]) -> Self {
        let reservations: Vec<Reservation> = classes
            .iter()
            .map(|&class| Reservation {
                floor_bytes: FLOOR_MEMTABLE_BYTES,
                floor_count: MIN_MEMTABLE_COUNT,
                class,
                borrowed: 0,
                active: true,
            })
            .collect();
        let floor_sum: u64 = reservations.iter().map(|r| r.floor_bytes as u64).sum();
        let elastic_pool = total_capacity_bytes.saturating_sub(floor_sum);
        Self {
            state: Mutex::new(State { reservations, elastic_pool }),
            total_capacity: total_capacity_bytes,
        }
    }

    /// Pushes a new (floor, count) share from the scheduler. The floor
    /// itself cannot exceed the tenant's prior reservation plus whatever
    /// is currently idle in the elastic pool.
    pub fn set_share(&self, tenant: TenantId, floor_bytes: u32, floor_count: u8) {
        let mut state = self.state.lock();
        let r = &mut state.reservations[tenant as usize];
        let delta = floor_bytes as i64 - r.floor_bytes as i64;
        if delta > 0 {
            let take = (delta as u64).min(state.elastic_pool);
            state.elastic_pool -= take;
            r.floor_bytes += take as u32;
        } else {
            state.elastic_pool += (-delta) as u64;
            r.floor_bytes = floor_bytes;
        }
        r.floor_count = floor_count;
    }

    /// Marks whether a tenant is currently issuing requests. An idle
    /// bursty tenant's unused headroom becomes available for others to
    /// borrow; a steady tenant holds its reservation regardless.
    pub fn set_active(&self, tenant: TenantId, active: bool) {
        self.state.lock().reservations[tenant as usize].active = active;
    }

    /// Requests `bytes` of memtable headroom for `tenant`. Returns `true`
    /// if granted (caller may proceed to write), `false` if the tenant is
    /// at its floor and the elastic pool has nothing to lend.
    pub fn reserve(&self, tenant: TenantId, bytes: u32) -> bool {
        let mut state = self.state.lock();
        let floor = state.reservations[tenant as usize].floor_bytes;
        let idle_slack = idle_slack(&state.reservations, tenant);
        let r = &mut state.reservations[tenant as usize];
        let used = r.borrowed as u64 + bytes as u64;
        if used <= floor as u64 {
            r.borrowed = used as u32;
            return true;
        }
        let needed = used - floor as u64;
        let available = state.elastic_pool + idle_slack;
        if needed <= available {
            if needed <= state.elastic_pool {
                state.elastic_pool -= needed;
            } else {
                let from_idle = needed - state.elastic_pool;
                state.elastic_pool = 0;
                borrow_from_idle(&mut state.reservations, tenant, from_idle);
            }
            state.reservations[tenant as usize].borrowed = used as u32;
            true
        } else {
            false
        }
    }

    /// Releases `bytes` previously reserved by `tenant` (after a flush),
    /// returning elastic borrowings to the shared pool first.
    pub fn release(&self, tenant: TenantId, bytes: u32) {
        let mut state = self.state.lock();
        let floor = state.reservations[tenant as usize].floor_bytes;
        let r = &mut state.reservations[tenant as usize];
        let new_borrowed = r.borrowed.saturating_sub(bytes);
        let above_floor_before = r.borrowed.saturating_sub(floor);
        let above_floor_after = new_borrowed.saturating_sub(floor);
        let returned = above_floor_before.saturating_sub(above_floor_after);
        r.borrowed = new_borrowed;
        state.elastic_pool += returned as u64;
    }

    pub fn total_capacity(&self) -> u64 {
        self.total_capacity
    }

    pub fn elastic_pool_remaining(&self) -> u64 {
        self.state.lock().elastic_pool
    }
}

/// Sum of unused floor headroom belonging to currently-idle bursty
/// tenants other than `exclude` — the slack a reservation request may
/// draw on once the shared elastic pool itself is exhausted.
fn idle_slack(reservations: &[Reservation], exclude: TenantId) -> u64 {
    reservations
        .iter()
        .enumerate()
        .filter(|(i, r)| *i as TenantId != exclude && !r.active && r.class == MemtableClass::Bursty)
        .map(|(_, r)| (r.floor_bytes.saturating_sub(r.borrowed)) as u64)
        .sum()
}

fn borrow_from_idle(reservations: &mut [Reservation], exclude: TenantId, mut needed: u64) {
    for (i, r) in reservations.iter_mut().enumerate() {
        if needed == 0 {
            break;
        }
        if i as TenantId == exclude || r.active || r.class != MemtableClass::Bursty {
            continue;
        }
        let slack = r.floor_bytes.saturating_sub(r.borrowed) as u64;
        let take = slack.min(needed);
        r.borrowed += take as u32;
        needed -= take;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mgr(n: usize, capacity: u64) -> WriteBufferManager {
        WriteBufferManager::new(capacity, &vec![MemtableClass::Steady; n])
    }

    #[test]
    fn reserve_within_floor_always_succeeds() {
        let m = mgr(2, 100 * 1024 * 1024);
        assert!(m.reserve(0, 1024));
    }

    #[test]
    fn reserve_beyond_floor_draws_from_elastic_pool() {
        let m = mgr(1, FLOOR_MEMTABLE_BYTES as u64 + 1024);
        assert!(m.reserve(0, FLOOR_MEMTABLE_BYTES + 512));
        assert_eq!(m.elastic_pool_remaining(), 512);
    }

    #[test]
    fn reserve_fails_when_pool_and_idle_slack_exhausted() {
        let m = mgr(1, FLOOR_MEMTABLE_BYTES as u64);
        assert!(!m.reserve(0, FLOOR_MEMTABLE_BYTES + 1));
    }

    #[test]
    fn idle_bursty_tenant_lends_headroom() {
        let m = WriteBufferManager::new(
            FLOOR_MEMTABLE_BYTES as u64 * 2,
            &[MemtableClass::Bursty, MemtableClass::Bursty],
        );
        m.set_active(1, false);
        assert!(m.reserve(0, FLOOR_MEMTABLE_BYTES + 1024));
    }

    #[test]
    fn release_returns_elastic_borrowing() {
        let m = mgr(1, FLOOR_MEMTABLE_BYTES as u64 + 1024);
        m.reserve(0, FLOOR_MEMTABLE_BYTES + 512);
        m.release(0, FLOOR_MEMTABLE_BYTES + 512);
        assert_eq!(m.elastic_pool_remaining(), 1024);
    }
}
