//! Shared data types for the multi-tenant benchmarking harness.
//!
//! These mirror the data model in the design: tenants, operations, behavior
//! phases, and the resource share/usage vectors that flow between the
//! scheduler (C4) and its two data-plane collaborators (C2, C3).

use std::path::PathBuf;

/// Stable tenant identifier, `0..N`.
pub type TenantId = u16;

/// Direction of an I/O operation, for rate-limiting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

/// Admission priority for a rate-limited request.
///
/// `High` bypasses the FIFO wait queue but still debits tokens, which can
/// drive a bucket negative; the debt is paid back by later refills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// Concrete operation kinds a tenant can issue, plus the `QueueWait`
/// pseudo-op used only to report dispatch queueing delay to the
/// measurement pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Read,
    ReadBatch,
    Update,
    Insert,
    InsertBatch,
    Scan,
    ReadModifyWrite,
    ReadModifyInsertBatch,
    Delete,
    RandomInsert,
    QueueWait,
}

impl OpKind {
    /// Total number of variants; used to size fixed-length per-op arrays.
    pub const COUNT: usize = 11;

    pub const ALL: [OpKind; Self::COUNT] = [
        OpKind::Read,
        OpKind::ReadBatch,
        OpKind::Update,
        OpKind::Insert,
        OpKind::InsertBatch,
        OpKind::Scan,
        OpKind::ReadModifyWrite,
        OpKind::ReadModifyInsertBatch,
        OpKind::Delete,
        OpKind::RandomInsert,
        OpKind::QueueWait,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The resource direction a successful call to this op consumes.
    ///
    /// `QueueWait` is a pseudo-op and has no I/O direction of its own;
    /// callers must not route it through the rate limiter.
    pub fn direction(self) -> Option<Direction> {
        match self {
            OpKind::Read | OpKind::ReadBatch | OpKind::Scan => Some(Direction::Read),
            OpKind::Update
            | OpKind::Insert
            | OpKind::InsertBatch
            | OpKind::ReadModifyWrite
            | OpKind::ReadModifyInsertBatch
            | OpKind::Delete
            | OpKind::RandomInsert => Some(Direction::Write),
            OpKind::QueueWait => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Read => "READ",
            OpKind::ReadBatch => "READ_BATCH",
            OpKind::Update => "UPDATE",
            OpKind::Insert => "INSERT",
            OpKind::InsertBatch => "INSERT_BATCH",
            OpKind::Scan => "SCAN",
            OpKind::ReadModifyWrite => "READMODIFYWRITE",
            OpKind::ReadModifyInsertBatch => "READ_MODIFY_INSERT_BATCH",
            OpKind::Delete => "DELETE",
            OpKind::RandomInsert => "RANDOM_INSERT",
            OpKind::QueueWait => "QUEUE_WAIT",
        }
    }
}

/// Outcome classification for a facade call; only `Ok` counts toward the
/// success latency histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    NotFound,
    Error,
}

/// Key-selection distribution for a tenant's workload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequestDistribution {
    Uniform,
    Zipfian,
    Latest,
}

/// One phase of a tenant's behavior script (§3 Data Model).
#[derive(Debug, Clone, PartialEq)]
pub enum BehaviorPhase {
    Steady {
        qps: u32,
        duration_s: u32,
    },
    Bursty {
        qps: u32,
        burst_ms: u32,
        idle_ms: u32,
        repeats: u32,
    },
    Inactive {
        duration_s: u32,
    },
    Replay {
        trace: PathBuf,
        replay_id: i32,
        scale: f64,
    },
}

/// Per-tenant output of the Fair-Share Scheduler (C4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceShares {
    pub write_kbps: u32,
    pub read_kbps: u32,
    pub memtable_bytes: u32,
    pub memtable_count: u8,
}

/// Per-tenant cumulative usage counters, as read from the Usage Meter (C1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub io_written_kb: i64,
    pub io_read_kb: i64,
    pub mem_written_kb: i64,
}

impl ResourceUsage {
    /// Rate vector `(cur - prev) / interval_s`, clamped at zero: cumulative
    /// counters never decrease, but a scheduler push or counter reset
    /// could otherwise produce a spurious negative rate.
    pub fn rate_since(&self, prev: &ResourceUsage, interval_s: f64) -> (f64, f64, f64) {
        let w = (self.io_written_kb - prev.io_written_kb).max(0) as f64 / interval_s;
        let r = (self.io_read_kb - prev.io_read_kb).max(0) as f64 / interval_s;
        let m = (self.mem_written_kb - prev.mem_written_kb).max(0) as f64 / interval_s;
        (w, r, m)
    }
}

/// Whether a tenant's memtable reservation is held while idle (`Steady`)
/// or released back to the elastic pool while idle (`Bursty`).
///
/// Carried on tenant config as an external hint per §4.3; this crate
/// derives it from the tenant's behavior script (see `TenantSpec::memtable_class`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemtableClass {
    Steady,
    Bursty,
}
