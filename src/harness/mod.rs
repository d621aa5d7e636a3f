//! Multi-tenant benchmark harness.
//!
//! Wraps the storage engine with a dynamic fair-share resource scheduler
//! and a YCSB-style workload driver. See [`driver::Context`] for the
//! entry point that wires every component together.

pub mod behavior;
pub mod cancel;
pub mod config;
pub mod driver;
pub mod facade;
pub mod keygen;
pub mod measurement;
pub mod rate_limiter;
pub mod scheduler;
pub mod trace;
pub mod types;
pub mod usage;
pub mod worker_pool;
pub mod write_buffer;

use thiserror::Error;

/// Top-level error composing every harness subsystem's error type, in the
/// same `#[from]`-composition style the engine uses for its own
/// `EngineError`.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("trace error: {0}")]
    Trace(#[from] trace::TraceError),

    #[error("facade error: {0}")]
    Facade(#[from] facade::FacadeError),

    #[error("driver error: {0}")]
    Driver(#[from] driver::DriverError),
}

pub use driver::{Context, HarnessConfig};
pub use types::{BehaviorPhase, MemtableClass, OpKind, Priority, RequestDistribution, TenantId};
