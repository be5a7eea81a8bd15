use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;

/// Top-level CLI for the sbench distributed storage benchmark.
#[derive(Debug, Parser)]
#[command(name = "sbench")]
#[command(about = "sbench: distributed storage benchmark", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (repeatable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the foreman daemon that managers drive benchmarks through.
    Server {
        /// Listen port (overrides the config file).
        #[arg(short = 'p', long)]
        port: Option<u16>,

        /// Directory for remote-filesystem mounts (overrides the config file).
        #[arg(short = 'm', long)]
        mounts_dir: Option<PathBuf>,
    },

    /// Benchmark the in-memory backend (sanity runs, single host).
    Memory(BackendCommand),

    /// Benchmark local or mounted filesystems.
    File(BackendCommand),

    /// Benchmark an S3-compatible object store.
    S3(BackendCommand),

    /// Benchmark Ceph RADOS pools.
    Rados(BackendCommand),

    /// Benchmark Ceph RBD images.
    Rbd(BackendCommand),

    /// Benchmark CephFS mounts.
    Cephfs(BackendCommand),

    /// Benchmark raw block devices.
    Block(BackendCommand),
}

#[derive(Debug, Args)]
pub struct BackendCommand {
    #[command(subcommand)]
    pub action: BackendAction,
}

#[derive(Debug, Subcommand)]
pub enum BackendAction {
    /// Run one benchmark job against the given targets.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Storage targets: endpoints, pools, devices or directories.
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Foreman port.
    #[arg(short = 'p', long, default_value_t = 5150)]
    pub port: u16,

    /// Object size, with optional K/M/G suffix.
    #[arg(short = 's', long, default_value = "1M")]
    pub size: String,

    /// Number of distinct objects across the whole fleet.
    #[arg(short = 'c', long, default_value_t = 1000)]
    pub count: u64,

    /// Measured run time in seconds.
    #[arg(short = 'r', long, default_value_t = 30)]
    pub run_time: u64,

    /// Ramp-up seconds (ops run, stats discarded).
    #[arg(short = 'u', long, default_value_t = 5)]
    pub ramp_up: u64,

    /// Ramp-down seconds.
    #[arg(short = 'd', long, default_value_t = 2)]
    pub ramp_down: u64,

    /// Per-foreman bandwidth cap in bytes/s (K/M/G suffix); 0 = unlimited.
    #[arg(short = 'b', long, default_value = "0")]
    pub bandwidth: String,

    /// Percentage of reads in a mixed phase; 0 runs separate passes.
    #[arg(short = 'x', long, default_value_t = 0)]
    pub read_write_mix: u8,

    /// Workers per core on each foreman.
    #[arg(short = 'w', long, default_value_t = 1.0)]
    pub worker_factor: f64,

    /// Payload generator: prng or sha.
    #[arg(short = 'g', long, default_value = "prng")]
    pub generator: String,

    /// Report output path.
    #[arg(short = 'o', long, default_value = "sbench.json")]
    pub output: PathBuf,

    /// Comma-separated foreman hosts.
    #[arg(long, default_value = "localhost", value_delimiter = ',')]
    pub servers: Vec<String>,

    /// Skip algorithmic verification of read data.
    #[arg(long)]
    pub skip_read_verification: bool,

    /// Leave objects (and the bucket) in place after the run.
    #[arg(long)]
    pub no_cleanup: bool,

    /// Generator seed; defaults to a per-run value.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Object key prefix.
    #[arg(long, default_value = "sbench")]
    pub prefix: String,

    /// Backend-specific settings as key=value (credentials, ports, ...).
    #[arg(long = "cfg", value_name = "KEY=VALUE")]
    pub cfg: Vec<String>,
}

pub async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        CliCommand::Server { port, mounts_dir } => commands::server::run(port, mounts_dir).await,
        CliCommand::Memory(cmd) => backend(cmd, "memory").await,
        CliCommand::File(cmd) => backend(cmd, "file").await,
        CliCommand::S3(cmd) => backend(cmd, "s3").await,
        CliCommand::Rados(cmd) => backend(cmd, "rados").await,
        CliCommand::Rbd(cmd) => backend(cmd, "rbd").await,
        CliCommand::Cephfs(cmd) => backend(cmd, "cephfs").await,
        CliCommand::Block(cmd) => backend(cmd, "block").await,
    }
}

async fn backend(cmd: BackendCommand, kind: &str) -> Result<()> {
    match cmd.action {
        BackendAction::Run(args) => commands::run::run(kind, args).await,
    }
}
