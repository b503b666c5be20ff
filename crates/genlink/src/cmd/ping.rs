use std::time::Instant;

use genlink_supervisor::{Supervisor, SupervisorConfig};
use serde::Serialize;

use crate::cmd::call::parse_duration;
use crate::cmd::PingArgs;
use crate::exit::{send_error, start_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct PingOutput<'a> {
    schema_id: &'a str,
    program: String,
    pid: Option<u32>,
    round_trip_ms: u128,
}

pub fn run(args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;

    let mut config = SupervisorConfig::new(&args.program);
    config.args = args.worker_args.clone();
    config.request_timeout = timeout;
    config.max_restarts = 0;

    let supervisor = Supervisor::new(config);
    supervisor
        .start()
        .map_err(|err| start_error("start failed", err))?;
    let pid = supervisor.state().pid;

    let started = Instant::now();
    let handle = supervisor
        .send("ping", None)
        .map_err(|err| send_error("ping failed", err))?;
    let result = handle.wait();
    let round_trip = started.elapsed();
    supervisor.stop();

    result.map_err(|err| send_error("ping failed", err))?;

    let output = PingOutput {
        schema_id: "https://schemas.genlink.dev/cli/v1/ping-result.schema.json",
        program: args.program.display().to_string(),
        pid,
        round_trip_ms: round_trip.as_millis(),
    };
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(&output).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table | OutputFormat::Pretty | OutputFormat::Raw => println!(
            "worker {} (pid {}) answered in {}ms",
            output.program,
            pid.map(|pid| pid.to_string())
                .unwrap_or_else(|| "?".to_string()),
            output.round_trip_ms
        ),
    }
    Ok(SUCCESS)
}
