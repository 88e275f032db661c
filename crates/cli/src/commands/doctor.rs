use fincalc_core::config::{AppConfig, LoadOptions};
use fincalc_db::connect_with_settings;
use serde::Serialize;

use crate::commands::current_thread_runtime;
use crate::wiring::durable_storage;

const CACHE_CHECK_KEY: &str = "fincalc_doctor_check";

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

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_database_connectivity(&config));
            checks.push(check_remote_endpoint(&config));
            checks.push(check_cache_medium(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["database_connectivity", "remote_endpoint", "cache_medium"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// An unset endpoint is a valid deployment: fee data is served offline.
fn check_remote_endpoint(config: &AppConfig) -> DoctorCheck {
    let details = match &config.remote.base_url {
        Some(base_url) => format!(
            "fee schedules fetched from `{base_url}` (timeout {}s, api key {})",
            config.remote.timeout_secs,
            if config.remote.api_key.is_some() { "set" } else { "unset" }
        ),
        None => "no remote endpoint configured; fee data is served offline".to_string(),
    };
    DoctorCheck { name: "remote_endpoint", status: CheckStatus::Pass, details }
}

fn check_cache_medium(config: &AppConfig) -> DoctorCheck {
    let round_trip = durable_storage(config).and_then(|storage| {
        storage.set_item(CACHE_CHECK_KEY, "ok")?;
        let read_back = storage.get_item(CACHE_CHECK_KEY)?;
        storage.remove_item(CACHE_CHECK_KEY)?;
        Ok(read_back)
    });

    let location = config
        .cache
        .medium_path
        .as_ref()
        .map(|path| format!("`{}`", path.display()))
        .unwrap_or_else(|| "process memory".to_string());
    match round_trip {
        Ok(Some(_)) => DoctorCheck {
            name: "cache_medium",
            status: CheckStatus::Pass,
            details: format!("cache medium writable at {location}"),
        },
        Ok(None) => DoctorCheck {
            name: "cache_medium",
            status: CheckStatus::Fail,
            details: format!("cache medium at {location} dropped a test write"),
        },
        Err(error) => DoctorCheck {
            name: "cache_medium",
            status: CheckStatus::Fail,
            details: format!("cache medium at {location} unusable: {error}"),
        },
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err((_, message, _)) => {
            return DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: message };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        pool.close().await;
        Ok::<(), String>(())
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

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
