mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "genlink", version, about = "Supervised JSON-RPC generation worker CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_subcommand() {
        let cli = Cli::try_parse_from([
            "genlink",
            "call",
            "/usr/bin/worker",
            "--method",
            "generate",
            "--params",
            "{\"prompt\":\"hi\"}",
            "--stream",
        ])
        .expect("call args should parse");

        match cli.command {
            Command::Call(args) => {
                assert_eq!(args.method, "generate");
                assert!(args.stream);
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_params_args() {
        let err = Cli::try_parse_from([
            "genlink",
            "call",
            "/usr/bin/worker",
            "--method",
            "generate",
            "--params",
            "{}",
            "--params-file",
            "/tmp/params.json",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_worker_args_after_double_dash() {
        let cli = Cli::try_parse_from([
            "genlink",
            "ping",
            "/usr/bin/genlink",
            "--timeout",
            "2s",
            "--",
            "mock-worker",
            "--chunks",
            "5",
        ])
        .expect("ping args should parse");

        match cli.command {
            Command::Ping(args) => {
                assert_eq!(args.timeout, "2s");
                assert_eq!(args.worker_args, ["mock-worker", "--chunks", "5"]);
            }
            other => panic!("expected ping, got {other:?}"),
        }
    }

    #[test]
    fn parses_mock_worker_subcommand() {
        let cli = Cli::try_parse_from(["genlink", "mock-worker", "--chunks", "4"])
            .expect("mock-worker args should parse");
        assert!(matches!(cli.command, Command::MockWorker(_)));
    }
}
