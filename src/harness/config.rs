//! Workload configuration: the YAML tenant spec (§6.1) and the Java-style
//! `.properties` files consumed by the driver (§6.3, §6.5).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use super::types::{BehaviorPhase, MemtableClass, OpKind, RequestDistribution};

/// Fatal, startup-time configuration errors. Anything reaching here aborts
/// the driver with exit code 1.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML workload config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("duplicate client_id {0} in workload config")]
    DuplicateClientId(i64),

    #[error("client_id {id} out of range; must be in 0..{n}")]
    ClientIdOutOfRange { id: i64, n: usize },

    #[error("client {client_id} has unknown op kind {op:?} in op_distribution")]
    UnknownOpKind { client_id: i64, op: String },

    #[error("client {client_id} behavior #{index} ({ty}) is missing field {field}")]
    MissingBehaviorField {
        client_id: i64,
        index: usize,
        ty: &'static str,
        field: &'static str,
    },

    #[error("client {client_id} has unknown behavior type {ty}")]
    UnknownBehaviorType { client_id: i64, ty: String },

    #[error("malformed properties line {line}: {text}")]
    MalformedProperty { line: usize, text: String },
}

// ------------------------------------------------------------------------------------------------
// Raw YAML shape (§6.1)
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawWorkload {
    clients: Vec<RawClient>,
}

#[derive(Debug, Deserialize)]
struct RawClient {
    client_id: i64,
    cf: Option<String>,
    record_count: u64,
    #[serde(default)]
    insert_start: u64,
    #[serde(default)]
    request_distribution: Option<String>,
    #[serde(default)]
    zipfian_const: Option<f64>,
    #[serde(default)]
    op_distribution: Option<HashMap<String, f64>>,
    #[serde(default)]
    behaviors: Vec<RawBehavior>,
}

#[derive(Debug, Deserialize)]
struct RawBehavior {
    #[serde(rename = "type")]
    ty: String,
    request_rate_qps: Option<u32>,
    duration_s: Option<u32>,
    burst_duration_ms: Option<u32>,
    idle_duration_ms: Option<u32>,
    repeats: Option<u32>,
    trace_file: Option<PathBuf>,
    replay_client_id: Option<i32>,
    scale_ratio: Option<f64>,
}

/// A fully-validated, immutable tenant definition.
#[derive(Debug, Clone)]
pub struct TenantSpec {
    pub client_id: TenantIdx,
    pub cf: String,
    pub record_count: u64,
    pub insert_start: u64,
    pub request_distribution: RequestDistribution,
    pub zipfian_const: f64,
    pub op_distribution: Vec<(OpKind, f64)>,
    pub behaviors: Vec<BehaviorPhase>,
}

/// Raw client index as parsed (kept as `u16` to match [`super::types::TenantId`]).
pub type TenantIdx = u16;

impl TenantSpec {
    /// Whether this tenant's memtable reservation should be held while
    /// idle (`Steady`) or yielded to the elastic pool (`Bursty`).
    ///
    /// Derived deterministically from the behavior script: a tenant whose
    /// script contains no `Bursty`/`Inactive` phase is classified steady;
    /// any burst or idle phase marks it bursty. The spec calls this an
    /// "external hint carried on the config" without specifying its
    /// source — this is the resolution recorded in DESIGN.md.
    pub fn memtable_class(&self) -> MemtableClass {
        let has_burst_or_idle = self.behaviors.iter().any(|b| {
            matches!(b, BehaviorPhase::Bursty { .. } | BehaviorPhase::Inactive { .. })
        });
        if has_burst_or_idle {
            MemtableClass::Bursty
        } else {
            MemtableClass::Steady
        }
    }
}

fn default_op_distribution() -> Vec<(OpKind, f64)> {
    vec![(OpKind::Read, 1.0)]
}

fn parse_op_kind(name: &str) -> Option<OpKind> {
    match name {
        "READ" => Some(OpKind::Read),
        "UPDATE" => Some(OpKind::Update),
        "INSERT" => Some(OpKind::Insert),
        "SCAN" => Some(OpKind::Scan),
        "READMODIFYWRITE" => Some(OpKind::ReadModifyWrite),
        "READ_BATCH" => Some(OpKind::ReadBatch),
        "INSERT_BATCH" => Some(OpKind::InsertBatch),
        "READ_MODIFY_INSERT_BATCH" => Some(OpKind::ReadModifyInsertBatch),
        "DELETE" => Some(OpKind::Delete),
        "RANDOM_INSERT" => Some(OpKind::RandomInsert),
        _ => None,
    }
}

/// Parses and validates a YAML tenant spec (§6.1) into a list of
/// [`TenantSpec`]s ordered by `client_id`.
pub fn load_workload(path: impl AsRef<Path>) -> Result<Vec<TenantSpec>, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_workload(&text)
}

/// As [`load_workload`], but takes the YAML text directly (used by tests
/// and by callers that already have the config in memory).
pub fn parse_workload(text: &str) -> Result<Vec<TenantSpec>, ConfigError> {
    let raw: RawWorkload = serde_yaml::from_str(text)?;
    let n = raw.clients.len();

    let mut seen = vec![false; n];
    let mut out: Vec<Option<TenantSpec>> = (0..n).map(|_| None).collect();

    for client in raw.clients {
        let id = client.client_id;
        if id < 0 || id as usize >= n {
            return Err(ConfigError::ClientIdOutOfRange { id, n });
        }
        if seen[id as usize] {
            return Err(ConfigError::DuplicateClientId(id));
        }
        seen[id as usize] = true;

        let request_distribution = match client.request_distribution.as_deref() {
            None | Some("uniform") => RequestDistribution::Uniform,
            Some("zipfian") => RequestDistribution::Zipfian,
            Some("latest") => RequestDistribution::Latest,
            Some(other) => {
                return Err(ConfigError::UnknownOpKind {
                    client_id: id,
                    op: format!("request_distribution={other}"),
                });
            }
        };

        let op_distribution = match client.op_distribution {
            None => default_op_distribution(),
            Some(map) => {
                let total: f64 = map.values().sum();
                let mut weighted = Vec::with_capacity(map.len());
                for (name, weight) in map {
                    let op = parse_op_kind(&name).ok_or_else(|| ConfigError::UnknownOpKind {
                        client_id: id,
                        op: name.clone(),
                    })?;
                    weighted.push((op, if total > 0.0 { weight / total } else { 0.0 }));
                }
                weighted
            }
        };

        let mut behaviors = Vec::with_capacity(client.behaviors.len());
        for (index, raw_b) in client.behaviors.into_iter().enumerate() {
            behaviors.push(parse_behavior(id, index, raw_b)?);
        }

        out[id as usize] = Some(TenantSpec {
            client_id: id as TenantIdx,
            cf: client.cf.unwrap_or_else(|| "default".to_string()),
            record_count: client.record_count,
            insert_start: client.insert_start,
            request_distribution,
            zipfian_const: client.zipfian_const.unwrap_or(0.99),
            op_distribution,
            behaviors,
        });
    }

    Ok(out.into_iter().map(|t| t.expect("client_id coverage validated above")).collect())
}

fn parse_behavior(
    client_id: i64,
    index: usize,
    raw: RawBehavior,
) -> Result<BehaviorPhase, ConfigError> {
    let missing = |field: &'static str, ty: &'static str| ConfigError::MissingBehaviorField {
        client_id,
        index,
        ty,
        field,
    };
    match raw.ty.as_str() {
        "STEADY" => Ok(BehaviorPhase::Steady {
            qps: raw.request_rate_qps.ok_or_else(|| missing("request_rate_qps", "STEADY"))?,
            duration_s: raw.duration_s.ok_or_else(|| missing("duration_s", "STEADY"))?,
        }),
        "BURSTY" => Ok(BehaviorPhase::Bursty {
            qps: raw.request_rate_qps.ok_or_else(|| missing("request_rate_qps", "BURSTY"))?,
            burst_ms: raw
                .burst_duration_ms
                .ok_or_else(|| missing("burst_duration_ms", "BURSTY"))?,
            idle_ms: raw
                .idle_duration_ms
                .ok_or_else(|| missing("idle_duration_ms", "BURSTY"))?,
            repeats: raw.repeats.ok_or_else(|| missing("repeats", "BURSTY"))?,
        }),
        "INACTIVE" => Ok(BehaviorPhase::Inactive {
            duration_s: raw.duration_s.ok_or_else(|| missing("duration_s", "INACTIVE"))?,
        }),
        "REPLAY" => Ok(BehaviorPhase::Replay {
            trace: raw.trace_file.ok_or_else(|| missing("trace_file", "REPLAY"))?,
            replay_id: raw
                .replay_client_id
                .ok_or_else(|| missing("replay_client_id", "REPLAY"))?,
            scale: raw.scale_ratio.ok_or_else(|| missing("scale_ratio", "REPLAY"))?,
        }),
        other => Err(ConfigError::UnknownBehaviorType {
            client_id,
            ty: other.to_string(),
        }),
    }
}

// ------------------------------------------------------------------------------------------------
// Java-style `.properties` files (§6.3)
// ------------------------------------------------------------------------------------------------

/// Flat string key/value store, built by processing `-P` files in order
/// and then applying `-p key=value` overrides, matching the driver's CLI
/// contract (§6.3).
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_str(&text)
    }

    pub fn load_str(&mut self, text: &str) -> Result<(), ConfigError> {
        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::MalformedProperty {
                    line: lineno + 1,
                    text: raw_line.to_string(),
                });
            };
            self.values.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }
}

// ------------------------------------------------------------------------------------------------
// Scheduler tuning knobs (§6.5), with the spec's defaults.
// ------------------------------------------------------------------------------------------------

/// Per-resource starvation floor and default scheduler constants (§4.4).
pub const MIN_MEMTABLE_BYTES: u32 = 10 * 1024 * 1024;
pub const MIN_MEMTABLE_COUNT: u8 = 2;
pub const FLOOR_IO_KBPS: u32 = 10 * 1024;
pub const FLOOR_MEMTABLE_BYTES: u32 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    pub rsched_interval_ms: u64,
    pub lookback_intervals: usize,
    pub rampup_multiplier: f64,
    pub io_read_capacity_kbps: u32,
    pub io_write_capacity_kbps: u32,
    pub memtable_capacity_kb: u64,
    pub max_memtable_size_kb: u32,
    pub min_memtable_size_kb: u32,
    pub min_memtable_count: u8,
    pub status_interval_ms: u64,
    /// Token-bucket refill period (§4.2 default 1 ms); also bounds the
    /// largest burst a bucket can bank (`tokens ≤ rate_kbps × this`).
    pub rate_limiter_refill_ms: u64,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            rsched_interval_ms: 100,
            lookback_intervals: 10,
            rampup_multiplier: 1.5,
            io_read_capacity_kbps: 200 * 1024,
            io_write_capacity_kbps: 200 * 1024,
            memtable_capacity_kb: 512 * 1024,
            max_memtable_size_kb: 64 * 1024,
            min_memtable_size_kb: MIN_MEMTABLE_BYTES / 1024,
            min_memtable_count: MIN_MEMTABLE_COUNT,
            status_interval_ms: 1000,
            rate_limiter_refill_ms: 1,
        }
    }
}

impl SchedulerOptions {
    /// Builds options from a properties bag, falling back to spec defaults
    /// for anything unset. A malformed numeric value silently falls back
    /// rather than aborting startup — these are tuning knobs, not
    /// structural config.
    pub fn from_properties(props: &Properties) -> Self {
        let defaults = Self::default();
        Self {
            rsched_interval_ms: props.parse_or("rsched_interval_ms", defaults.rsched_interval_ms),
            lookback_intervals: props.parse_or("lookback_intervals", defaults.lookback_intervals),
            rampup_multiplier: props
                .parse_or("rsched_rampup_multiplier", defaults.rampup_multiplier),
            io_read_capacity_kbps: props
                .parse_or("io_read_capacity_kbps", defaults.io_read_capacity_kbps),
            io_write_capacity_kbps: props
                .parse_or("io_write_capacity_kbps", defaults.io_write_capacity_kbps),
            memtable_capacity_kb: props
                .parse_or("memtable_capacity_kb", defaults.memtable_capacity_kb),
            max_memtable_size_kb: props
                .parse_or("max_memtable_size_kb", defaults.max_memtable_size_kb),
            min_memtable_size_kb: props
                .parse_or("min_memtable_size_kb", defaults.min_memtable_size_kb),
            min_memtable_count: props
                .parse_or("min_memtable_count", defaults.min_memtable_count),
            status_interval_ms: props.parse_or("status.interval_ms", defaults.status_interval_ms),
            rate_limiter_refill_ms: props
                .parse_or("rate_limiter_refill_ms", defaults.rate_limiter_refill_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_YAML: &str = r#"
clients:
  - client_id: 0
    cf: "users"
    record_count: 1000
    request_distribution: zipfian
    zipfian_const: 0.9
    op_distribution:
      READ: 0.9
      UPDATE: 0.1
    behaviors:
      - { type: STEADY, request_rate_qps: 100, duration_s: 10 }
  - client_id: 1
    cf: "orders"
    record_count: 500
    behaviors:
      - { type: BURSTY, request_rate_qps: 500, burst_duration_ms: 200, idle_duration_ms: 800, repeats: 3 }
      - { type: INACTIVE, duration_s: 5 }
"#;

    #[test]
    fn parses_full_schema() {
        let tenants = parse_workload(SAMPLE_YAML).unwrap();
        assert_eq!(tenants.len(), 2);
        assert_eq!(tenants[0].cf, "users");
        assert_eq!(tenants[0].request_distribution, RequestDistribution::Zipfian);
        assert!((tenants[0].zipfian_const - 0.9).abs() < f64::EPSILON);
        assert_eq!(tenants[0].op_distribution.len(), 2);
        assert_eq!(tenants[0].memtable_class(), MemtableClass::Steady);
        assert_eq!(tenants[1].memtable_class(), MemtableClass::Bursty);
    }

    #[test]
    fn missing_op_distribution_defaults_to_read() {
        let tenants = parse_workload(SAMPLE_YAML).unwrap();
        assert_eq!(tenants[1].op_distribution, vec![(OpKind::Read, 1.0)]);
    }

    #[test]
    fn duplicate_client_id_is_fatal() {
        let yaml = r#"
clients:
  - client_id: 0
    cf: "a"
    record_count: 10
  - client_id: 0
    cf: "b"
    record_count: 10
"#;
        let err = parse_workload(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateClientId(0)));
    }

    #[test]
    fn out_of_range_client_id_is_fatal() {
        let yaml = r#"
clients:
  - client_id: 5
    cf: "a"
    record_count: 10
"#;
        let err = parse_workload(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ClientIdOutOfRange { id: 5, n: 1 }));
    }

    #[test]
    fn properties_parses_and_overrides() {
        let mut props = Properties::new();
        props.load_str("rsched_interval_ms=50\n# comment\nlookback_intervals=4\n").unwrap();
        props.set("rsched_interval_ms", "25");
        let opts = SchedulerOptions::from_properties(&props);
        assert_eq!(opts.rsched_interval_ms, 25);
        assert_eq!(opts.lookback_intervals, 4);
        assert_eq!(opts.rampup_multiplier, SchedulerOptions::default().rampup_multiplier);
    }

    #[test]
    fn malformed_property_line_errors() {
        let mut props = Properties::new();
        let err = props.load_str("not_a_kv_pair\n").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedProperty { line: 1, .. }));
    }
}
