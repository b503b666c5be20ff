use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use genlink_supervisor::{SendOptions, Supervisor, SupervisorConfig};
use serde_json::Value;

use crate::cmd::CallArgs;
use crate::exit::{io_error, send_error, start_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_call_result, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let params = resolve_params(&args)?;

    let mut config = SupervisorConfig::new(&args.program);
    config.args = args.worker_args.clone();
    config.request_timeout = timeout;
    // One-shot invocation: a dead worker is reported, not respawned.
    config.max_restarts = 0;

    let supervisor = Arc::new(Supervisor::new(config));
    install_interrupt_handler(&supervisor);
    supervisor
        .start()
        .map_err(|err| start_error("start failed", err))?;

    let options = SendOptions {
        timeout: None,
        on_chunk: args.stream.then(|| stream_printer()),
    };
    let started = Instant::now();
    let handle = supervisor
        .send_with(&args.method, params, options)
        .map_err(|err| send_error("send failed", err))?;
    let request_id = handle.id();
    let result = handle.wait();
    let elapsed = started.elapsed();
    supervisor.stop();

    let result = result.map_err(|err| send_error("call failed", err))?;
    print_call_result(&args.method, request_id, &result, elapsed, format);
    Ok(SUCCESS)
}

fn stream_printer() -> Box<dyn FnMut(&str, bool) + Send> {
    Box::new(|chunk, done| {
        let mut err = std::io::stderr();
        let _ = err.write_all(chunk.as_bytes());
        if done {
            let _ = err.write_all(b"\n");
        }
        let _ = err.flush();
    })
}

fn install_interrupt_handler(supervisor: &Arc<Supervisor>) {
    let supervisor = Arc::clone(supervisor);
    let result = ctrlc::set_handler(move || {
        supervisor.stop();
    });
    if let Err(err) = result {
        tracing::debug!(error = %err, "interrupt handler unavailable");
    }
}

fn resolve_params(args: &CallArgs) -> CliResult<Option<Value>> {
    if let Some(json) = &args.params {
        let value = serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--params is not valid JSON: {err}")))?;
        return Ok(Some(value));
    }
    if let Some(path) = &args.params_file {
        let raw = fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        let value = serde_json::from_str(&raw).map_err(|err| {
            CliError::new(USAGE, format!("{} is not valid JSON: {err}", path.display()))
        })?;
        return Ok(Some(value));
    }
    Ok(None)
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn params_must_be_valid_json() {
        let args = CallArgs {
            program: "/usr/bin/worker".into(),
            method: "generate".to_string(),
            params: Some("{not json".to_string()),
            params_file: None,
            stream: false,
            timeout: "5s".to_string(),
            worker_args: Vec::new(),
        };
        let err = resolve_params(&args).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn absent_params_resolve_to_none() {
        let args = CallArgs {
            program: "/usr/bin/worker".into(),
            method: "ping".to_string(),
            params: None,
            params_file: None,
            stream: false,
            timeout: "5s".to_string(),
            worker_args: Vec::new(),
        };
        assert!(resolve_params(&args).unwrap().is_none());
    }
}
