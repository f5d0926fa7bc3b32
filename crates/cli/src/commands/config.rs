use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use parley_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use super::CommandResult;

struct Field {
    key_path: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run(config_path: Option<PathBuf>) -> CommandResult {
    let options = LoadOptions {
        require_file: config_path.is_some(),
        config_path: config_path.clone(),
        ..LoadOptions::default()
    };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                1,
            )
        }
    };

    let config_file_path = detect_config_path(config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let slack = &config.slack;
    let signing_secret = if slack.slack_signing_secret.expose_secret().trim().is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    };

    vec![
        Field {
            key_path: "slack.slack_token",
            env_keys: &["PARLEY_SLACK_TOKEN"],
            value: redact_token(slack.slack_token.expose_secret()),
        },
        Field {
            key_path: "slack.slack_signing_secret",
            env_keys: &["PARLEY_SLACK_SIGNING_SECRET"],
            value: signing_secret.to_string(),
        },
        Field {
            key_path: "slack.slack_channel",
            env_keys: &["PARLEY_SLACK_CHANNEL"],
            value: optional(slack.slack_channel.as_deref()),
        },
        Field {
            key_path: "slack.proxy",
            env_keys: &["PARLEY_SLACK_PROXY"],
            value: optional(slack.proxy.as_deref()),
        },
        Field {
            key_path: "slack.slack_retry_reason_header",
            env_keys: &["PARLEY_SLACK_RETRY_REASON_HEADER"],
            value: slack.slack_retry_reason_header.clone(),
        },
        Field {
            key_path: "slack.slack_retry_number_header",
            env_keys: &["PARLEY_SLACK_RETRY_NUMBER_HEADER"],
            value: slack.slack_retry_number_header.clone(),
        },
        Field {
            key_path: "slack.errors_ignore_retry",
            env_keys: &["PARLEY_SLACK_ERRORS_IGNORE_RETRY"],
            value: format!("[{}]", slack.errors_ignore_retry.join(", ")),
        },
        Field {
            key_path: "slack.use_threads",
            env_keys: &["PARLEY_SLACK_USE_THREADS"],
            value: slack.use_threads.to_string(),
        },
        Field {
            key_path: "slack.conversation_granularity",
            env_keys: &["PARLEY_SLACK_CONVERSATION_GRANULARITY"],
            value: slack.conversation_granularity.to_string(),
        },
        Field {
            key_path: "slack.api_base_url",
            env_keys: &["PARLEY_SLACK_API_BASE_URL"],
            value: slack.api_base_url.clone(),
        },
        Field {
            key_path: "slack.max_request_age_secs",
            env_keys: &["PARLEY_SLACK_MAX_REQUEST_AGE_SECS"],
            value: slack.max_request_age_secs.to_string(),
        },
        Field {
            key_path: "bot.endpoint_url",
            env_keys: &["PARLEY_BOT_ENDPOINT_URL"],
            value: optional(config.bot.endpoint_url.as_deref()),
        },
        Field {
            key_path: "bot.timeout_secs",
            env_keys: &["PARLEY_BOT_TIMEOUT_SECS"],
            value: config.bot.timeout_secs.to_string(),
        },
        Field {
            key_path: "server.bind_address",
            env_keys: &["PARLEY_SERVER_BIND_ADDRESS"],
            value: config.server.bind_address.clone(),
        },
        Field {
            key_path: "server.port",
            env_keys: &["PARLEY_SERVER_PORT"],
            value: config.server.port.to_string(),
        },
        Field {
            key_path: "server.graceful_shutdown_secs",
            env_keys: &["PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            value: config.server.graceful_shutdown_secs.to_string(),
        },
        Field {
            key_path: "logging.level",
            env_keys: &["PARLEY_LOGGING_LEVEL", "PARLEY_LOG_LEVEL"],
            value: config.logging.level.clone(),
        },
        Field {
            key_path: "logging.format",
            env_keys: &["PARLEY_LOGGING_FORMAT", "PARLEY_LOG_FORMAT"],
            value: format!("{:?}", config.logging.format).to_lowercase(),
        },
    ]
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let root = PathBuf::from("parley.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/parley.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    // Blank values are skipped by the loader, so they do not count as an env source.
    let set_in_env = |key: &str| env::var(key).is_ok_and(|value| !value.trim().is_empty());
    if let Some(env_key) = env_keys.iter().find(|env_key| set_in_env(env_key)) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn optional(value: Option<&str>) -> String {
    value.unwrap_or("<unset>").to_string()
}

pub(crate) fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
