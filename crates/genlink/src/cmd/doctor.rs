use std::time::Duration;

use genlink_supervisor::{Supervisor, SupervisorConfig};
use serde::Serialize;

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    schema_id: &'static str,
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let checks = vec![
        platform_pipes_check(),
        mock_worker_roundtrip_check(),
        build_profile_check(),
    ];

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let overall = if has_fail { "fail" } else { "pass" };

    let output = DoctorOutput {
        schema_id: "https://schemas.genlink.dev/cli/v1/doctor-report.schema.json",
        checks,
        overall,
    };
    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn platform_pipes_check() -> CheckResult {
    if cfg!(unix) {
        CheckResult {
            name: "platform_pipes".to_string(),
            status: CheckStatus::Pass,
            detail: "unix stdio pipes with non-blocking writes".to_string(),
        }
    } else {
        CheckResult {
            name: "platform_pipes".to_string(),
            status: CheckStatus::Fail,
            detail: "worker supervision requires unix pipes".to_string(),
        }
    }
}

/// Spawn this binary's built-in worker and complete one ping round trip,
/// exercising spawn, framing, correlation, and shutdown end to end.
fn mock_worker_roundtrip_check() -> CheckResult {
    let name = "mock_worker_roundtrip".to_string();
    let program = match std::env::current_exe() {
        Ok(program) => program,
        Err(err) => {
            return CheckResult {
                name,
                status: CheckStatus::Warn,
                detail: format!("cannot locate own binary: {err}"),
            }
        }
    };

    let mut config = SupervisorConfig::new(program);
    config.args = vec!["mock-worker".to_string()];
    config.request_timeout = Duration::from_secs(5);
    config.max_restarts = 0;

    let supervisor = Supervisor::new(config);
    if let Err(err) = supervisor.start() {
        return CheckResult {
            name,
            status: CheckStatus::Fail,
            detail: format!("spawn failed: {err}"),
        };
    }
    let result = supervisor
        .send("ping", None)
        .map(|handle| handle.wait())
        .map_err(|err| err.to_string());
    supervisor.stop();

    match result {
        Ok(Ok(_)) => CheckResult {
            name,
            status: CheckStatus::Pass,
            detail: "ping round trip completed".to_string(),
        },
        Ok(Err(err)) => CheckResult {
            name,
            status: CheckStatus::Fail,
            detail: format!("ping failed: {err}"),
        },
        Err(err) => CheckResult {
            name,
            status: CheckStatus::Fail,
            detail: format!("send failed: {err}"),
        },
    }
}

fn build_profile_check() -> CheckResult {
    CheckResult {
        name: "build_profile".to_string(),
        status: CheckStatus::Info,
        detail: format!(
            "{} {} on {}/{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH
        ),
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty | OutputFormat::Raw => {
            println!("genlink doctor\n");
            for check in &output.checks {
                println!("  [{:?}] {} — {}", check.status, check.name, check.detail);
            }
            println!("\noverall: {}", output.overall);
        }
    }
}
