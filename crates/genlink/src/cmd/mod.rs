use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod call;
pub mod doctor;
pub mod mock_worker;
pub mod ping;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Spawn a worker, send one request, print the result.
    Call(CallArgs),
    /// Health probe: spawn a worker and measure a ping round trip.
    Ping(PingArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Run the built-in line-oriented JSON-RPC worker (used by tests and
    /// doctor).
    MockWorker(MockWorkerArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Call(args) => call::run(args, format),
        Command::Ping(args) => ping::run(args, format),
        Command::Doctor(args) => doctor::run(args, format),
        Command::Version(args) => version::run(args),
        Command::MockWorker(args) => mock_worker::run(args),
    }
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Worker executable to spawn.
    pub program: PathBuf,
    /// Method to invoke.
    #[arg(long, short = 'm')]
    pub method: String,
    /// JSON params.
    #[arg(long, conflicts_with = "params_file")]
    pub params: Option<String>,
    /// Read JSON params from file.
    #[arg(long, value_name = "FILE", conflicts_with = "params")]
    pub params_file: Option<PathBuf>,
    /// Print stream chunks to stderr as they arrive.
    #[arg(long)]
    pub stream: bool,
    /// Per-request timeout (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
    /// Arguments passed through to the worker.
    #[arg(last = true)]
    pub worker_args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Worker executable to spawn.
    pub program: PathBuf,
    /// Probe timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Arguments passed through to the worker.
    #[arg(last = true)]
    pub worker_args: Vec<String>,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug)]
pub struct MockWorkerArgs {
    /// Number of stream fragments per generate call.
    #[arg(long, default_value = "3")]
    pub chunks: usize,
}
