//! `tenantbench` — the driver CLI (§6.3): parses property files and
//! inline overrides, builds the component graph, and runs the load
//! and/or transaction phase against the configured backend.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use tenantbench::harness::driver::{Context, DriverError, HarnessConfig};
use tenantbench::harness::config::{ConfigError, Properties, SchedulerOptions};

#[derive(Debug, Parser)]
#[command(name = "tenantbench", about = "Multi-tenant LSM-tree benchmarking harness")]
struct Cli {
    /// Run the load phase (preload every tenant's records).
    #[arg(long = "load")]
    load: bool,

    /// Run the transaction (workload) phase.
    #[arg(long = "run")]
    run: bool,

    /// Alias for `--run`, matching the YCSB-style `-t` flag.
    #[arg(short = 't')]
    t: bool,

    /// Property file, processed in the order given (repeatable).
    #[arg(short = 'P', value_name = "FILE")]
    property_files: Vec<PathBuf>,

    /// Inline `key=value` property override (repeatable), applied after
    /// every `-P` file.
    #[arg(short = 'p', value_name = "key=value")]
    properties: Vec<String>,

    /// Engine backend: `aeternusdb` (default) or `mock`.
    #[arg(long = "db", default_value = "aeternusdb")]
    db: String,

    /// Worker pool size.
    #[arg(long = "threads", default_value_t = 4)]
    threads: usize,

    /// Enable periodic status logging.
    #[arg(short = 's')]
    status: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "fatal error");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut props = Properties::new();
    for path in &cli.property_files {
        props.load_file(path)?;
    }
    for kv in &cli.properties {
        let (key, value) = kv.split_once('=').ok_or_else(|| CliError::MalformedOverride(kv.clone()))?;
        props.set(key.trim(), value.trim());
    }

    let workload_path = props.get("workload_file").ok_or(CliError::MissingWorkloadFile)?;
    let tenants = tenantbench::harness::config::load_workload(workload_path)?;

    let data_dir = PathBuf::from(props.get_or("data_dir", "./tenantbench-data"));
    let out_dir = PathBuf::from(props.get_or("out_dir", "./tenantbench-out"));
    std::fs::create_dir_all(&data_dir).map_err(|source| CliError::Io { path: data_dir.clone(), source })?;
    std::fs::create_dir_all(&out_dir).map_err(|source| CliError::Io { path: out_dir.clone(), source })?;

    let field_count: usize = props.get_or("field_count", "10").parse().unwrap_or(10);
    let field_len: usize = props.get_or("field_len", "100").parse().unwrap_or(100);
    let csv_dump_interval_ms: u64 = props.get_or("csv_dump_interval_ms", "1000").parse().unwrap_or(1000);
    let trace_file = props.get("trace_file").map(PathBuf::from);

    let config = HarnessConfig {
        data_dir,
        out_dir,
        backend: cli.db,
        tenants,
        scheduler_options: SchedulerOptions::from_properties(&props),
        worker_count: cli.threads,
        field_count,
        field_len,
        trace_file,
        csv_dump_interval: Duration::from_millis(csv_dump_interval_ms),
    };

    let ctx = Context::build(config)?;
    ctx.start_csv_dumper();

    if cli.load {
        info!("starting load phase");
        ctx.run_load()?;
    }

    if cli.run || cli.t {
        info!("starting transaction phase");
        ctx.run_workload(None)?;
    }

    if cli.status {
        info!(usage = ?ctx.usage().snapshot(), "final usage snapshot");
    }

    ctx.shutdown()?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing required property \"workload_file\" (pass via -p workload_file=<path>)")]
    MissingWorkloadFile,

    #[error("malformed -p override {0:?}; expected key=value")]
    MalformedOverride(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}
