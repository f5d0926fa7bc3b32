use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parley_core::config::{AppConfig, LoadOptions};
use parley_slack::api::{HttpSlackApi, SlackApi};
use parley_slack::signature::SignatureVerifier;
use secrecy::ExposeSecret;
use serde::Serialize;

use super::config::redact_token;
use super::CommandResult;

const SELF_TEST_BODY: &[u8] = br#"{"type":"event_callback","event":{"type":"message","text":"doctor"}}"#;

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

pub fn run(config_path: Option<PathBuf>, json_output: bool, online: bool) -> CommandResult {
    let options = LoadOptions {
        require_file: config_path.is_some(),
        config_path,
        ..LoadOptions::default()
    };
    let report = build_report(options, online);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report(options: LoadOptions, online: bool) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_slack_token(&config));
            checks.push(check_signing_secret(&config));
            checks.push(check_proxy(&config));
            checks.push(check_bot_bridge(&config));
            checks.push(if online {
                check_slack_auth(&config)
            } else {
                skipped("slack_auth", "pass --online to call Slack `auth.test`")
            });
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["slack_token", "signing_secret", "proxy", "bot_bridge", "slack_auth"] {
                checks.push(skipped(name, "skipped because configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn skipped(name: &'static str, details: &str) -> DoctorCheck {
    DoctorCheck { name, status: CheckStatus::Skipped, details: details.to_string() }
}

fn check_slack_token(config: &AppConfig) -> DoctorCheck {
    let token = config.slack.slack_token.expose_secret();
    DoctorCheck {
        name: "slack_token",
        status: CheckStatus::Pass,
        details: format!("bot token `{}` has the expected prefix", redact_token(token)),
    }
}

fn check_signing_secret(config: &AppConfig) -> DoctorCheck {
    let verifier = SignatureVerifier::new(
        config.slack.slack_signing_secret.clone(),
        Duration::from_secs(config.slack.max_request_age_secs),
    );
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default();
    let timestamp = now.to_string();

    let result = verifier
        .sign(&timestamp, SELF_TEST_BODY)
        .and_then(|signature| verifier.verify(Some(&timestamp), Some(&signature), SELF_TEST_BODY, now));

    match result {
        Ok(()) => DoctorCheck {
            name: "signing_secret",
            status: CheckStatus::Pass,
            details: format!(
                "signature round trip succeeded (replay window {}s)",
                verifier.max_age().as_secs()
            ),
        },
        Err(error) => DoctorCheck {
            name: "signing_secret",
            status: CheckStatus::Fail,
            details: format!("signature self-test failed: {error}"),
        },
    }
}

fn check_proxy(config: &AppConfig) -> DoctorCheck {
    let details = match &config.slack.proxy {
        Some(proxy) => format!("outbound Slack calls go through http proxy `{proxy}`"),
        None => "no proxy configured, Slack is called directly".to_string(),
    };
    DoctorCheck { name: "proxy", status: CheckStatus::Pass, details }
}

fn check_bot_bridge(config: &AppConfig) -> DoctorCheck {
    let details = match &config.bot.endpoint_url {
        Some(endpoint_url) => format!("rest mode, forwarding messages to `{endpoint_url}`"),
        None => "echo mode, no bot endpoint configured".to_string(),
    };
    DoctorCheck { name: "bot_bridge", status: CheckStatus::Pass, details }
}

fn check_slack_auth(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "slack_auth",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = HttpSlackApi::from_config(&config.slack)
        .and_then(|api| runtime.block_on(api.auth_test()));

    match result {
        Ok(identity) => DoctorCheck {
            name: "slack_auth",
            status: CheckStatus::Pass,
            details: format!(
                "authenticated as bot user `{}` in team `{}`",
                identity.user_id,
                identity.team.as_deref().unwrap_or("unknown")
            ),
        },
        Err(error) => DoctorCheck {
            name: "slack_auth",
            status: CheckStatus::Fail,
            details: format!("slack auth.test failed: {error}"),
        },
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
