use serde::Serialize;
use tempra_agent::HttpCompletionGateway;
use tempra_core::config::{AppConfig, LoadOptions};
use tempra_db::{connect_from_config, migrations};

use crate::commands::{command_runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_gateway(&config));
            checks.push(check_provider_token(&config));
            checks.push(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["llm_gateway", "provider_token", "database_schema"] {
                checks.push(DoctorCheck::skipped(name, "skipped because configuration did not load"));
            }
        }
    }

    let any_failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let (overall_status, summary) = if any_failed {
        (CheckStatus::Fail, "doctor: one or more readiness checks failed")
    } else {
        (CheckStatus::Pass, "doctor: readiness checks passed")
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn check_gateway(config: &AppConfig) -> DoctorCheck {
    match HttpCompletionGateway::from_config(&config.llm) {
        Ok(gateway) => DoctorCheck::pass(
            "llm_gateway",
            format!("{:?} requests go to `{}`", gateway.provider(), gateway.endpoint()),
        ),
        Err(error) => DoctorCheck::fail("llm_gateway", error.to_string()),
    }
}

/// A missing token is not fatal: commits and tools that need one ask the user to re-authenticate.
fn check_provider_token(config: &AppConfig) -> DoctorCheck {
    if config.providers.access_token.is_some() {
        DoctorCheck::pass("provider_token", "shared provider access token is configured")
    } else {
        DoctorCheck::skipped(
            "provider_token",
            "no providers.access_token; calendar and email actions will ask to re-authenticate",
        )
    }
}

fn check_database(config: &AppConfig) -> DoctorCheck {
    let runtime = match command_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::fail(
                "database_schema",
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let outcome = migrations::run_pending(&pool)
            .await
            .map_err(|error| format!("migrations could not be applied: {error}"));
        pool.close().await;
        outcome
    });

    match result {
        Ok(()) => DoctorCheck::pass(
            "database_schema",
            format!("connected and migrated `{}`", config.database.url),
        ),
        Err(error) => DoctorCheck::fail("database_schema", error),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
