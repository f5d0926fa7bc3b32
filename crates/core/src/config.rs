use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::conversation::ConversationGranularity;

pub const DEFAULT_RETRY_REASON_HEADER: &str = "x-slack-retry-reason";
pub const DEFAULT_RETRY_NUMBER_HEADER: &str = "x-slack-retry-num";
pub const DEFAULT_SLACK_API_BASE_URL: &str = "https://slack.com/api";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub bot: BotConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub slack_token: SecretString,
    pub slack_signing_secret: SecretString,
    pub slack_channel: Option<String>,
    pub proxy: Option<String>,
    pub slack_retry_reason_header: String,
    pub slack_retry_number_header: String,
    pub errors_ignore_retry: Vec<String>,
    pub use_threads: bool,
    pub conversation_granularity: ConversationGranularity,
    pub api_base_url: String,
    pub max_request_age_secs: u64,
}

#[derive(Clone, Debug)]
pub struct BotConfig {
    pub endpoint_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub slack_token: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub slack_channel: Option<String>,
    pub proxy: Option<String>,
    pub use_threads: Option<bool>,
    pub conversation_granularity: Option<ConversationGranularity>,
    pub bot_endpoint_url: Option<String>,
    pub server_port: Option<u16>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig {
                slack_token: String::new().into(),
                slack_signing_secret: String::new().into(),
                slack_channel: None,
                proxy: None,
                slack_retry_reason_header: DEFAULT_RETRY_REASON_HEADER.to_string(),
                slack_retry_number_header: DEFAULT_RETRY_NUMBER_HEADER.to_string(),
                errors_ignore_retry: vec!["http_timeout".to_string()],
                use_threads: false,
                conversation_granularity: ConversationGranularity::Sender,
                api_base_url: DEFAULT_SLACK_API_BASE_URL.to_string(),
                max_request_age_secs: 300,
            },
            bot: BotConfig { endpoint_url: None, timeout_secs: 30 },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 5005,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("parley.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Whether replies go to an external bot endpoint rather than the built-in echo handler.
    pub fn bot_mode(&self) -> &'static str {
        if self.bot.endpoint_url.is_some() {
            "rest"
        } else {
            "echo"
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(slack) = patch.slack {
            if let Some(slack_token_value) = slack.slack_token {
                self.slack.slack_token = secret_value(slack_token_value);
            }
            if let Some(signing_secret_value) = slack.slack_signing_secret {
                self.slack.slack_signing_secret = secret_value(signing_secret_value);
            }
            if let Some(channel) = slack.slack_channel {
                self.slack.slack_channel = non_empty(channel);
            }
            if let Some(proxy) = slack.proxy {
                self.slack.proxy = non_empty(proxy);
            }
            if let Some(header) = slack.slack_retry_reason_header {
                self.slack.slack_retry_reason_header = header;
            }
            if let Some(header) = slack.slack_retry_number_header {
                self.slack.slack_retry_number_header = header;
            }
            if let Some(errors) = slack.errors_ignore_retry {
                self.slack.errors_ignore_retry = errors;
            }
            if let Some(use_threads) = slack.use_threads {
                self.slack.use_threads = use_threads;
            }
            if let Some(granularity) = slack.conversation_granularity {
                self.slack.conversation_granularity = granularity;
            }
            if let Some(api_base_url) = slack.api_base_url {
                self.slack.api_base_url = api_base_url;
            }
            if let Some(max_request_age_secs) = slack.max_request_age_secs {
                self.slack.max_request_age_secs = max_request_age_secs;
            }
        }

        if let Some(bot) = patch.bot {
            if let Some(endpoint_url) = bot.endpoint_url {
                self.bot.endpoint_url = non_empty(endpoint_url);
            }
            if let Some(timeout_secs) = bot.timeout_secs {
                self.bot.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PARLEY_SLACK_TOKEN") {
            self.slack.slack_token = secret_value(value);
        }
        if let Some(value) = read_env("PARLEY_SLACK_SIGNING_SECRET") {
            self.slack.slack_signing_secret = secret_value(value);
        }
        if let Some(value) = read_env("PARLEY_SLACK_CHANNEL") {
            self.slack.slack_channel = Some(value);
        }
        if let Some(value) = read_env("PARLEY_SLACK_PROXY") {
            self.slack.proxy = Some(value);
        }
        if let Some(value) = read_env("PARLEY_SLACK_RETRY_REASON_HEADER") {
            self.slack.slack_retry_reason_header = value;
        }
        if let Some(value) = read_env("PARLEY_SLACK_RETRY_NUMBER_HEADER") {
            self.slack.slack_retry_number_header = value;
        }
        if let Some(value) = read_env("PARLEY_SLACK_ERRORS_IGNORE_RETRY") {
            self.slack.errors_ignore_retry = parse_list(&value);
        }
        if let Some(value) = read_env("PARLEY_SLACK_USE_THREADS") {
            self.slack.use_threads = parse_bool("PARLEY_SLACK_USE_THREADS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_SLACK_CONVERSATION_GRANULARITY") {
            self.slack.conversation_granularity = value.parse().map_err(|_| {
                ConfigError::InvalidEnvOverride {
                    key: "PARLEY_SLACK_CONVERSATION_GRANULARITY".to_string(),
                    value: value.clone(),
                }
            })?;
        }
        if let Some(value) = read_env("PARLEY_SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }
        if let Some(value) = read_env("PARLEY_SLACK_MAX_REQUEST_AGE_SECS") {
            self.slack.max_request_age_secs =
                parse_u64("PARLEY_SLACK_MAX_REQUEST_AGE_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_BOT_ENDPOINT_URL") {
            self.bot.endpoint_url = Some(value);
        }
        if let Some(value) = read_env("PARLEY_BOT_TIMEOUT_SECS") {
            self.bot.timeout_secs = parse_u64("PARLEY_BOT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PARLEY_SERVER_PORT") {
            self.server.port = parse_u16("PARLEY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("PARLEY_LOGGING_LEVEL").or_else(|| read_env("PARLEY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PARLEY_LOGGING_FORMAT").or_else(|| read_env("PARLEY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(slack_token) = overrides.slack_token {
            self.slack.slack_token = secret_value(slack_token);
        }
        if let Some(signing_secret) = overrides.slack_signing_secret {
            self.slack.slack_signing_secret = secret_value(signing_secret);
        }
        if let Some(channel) = overrides.slack_channel {
            self.slack.slack_channel = non_empty(channel);
        }
        if let Some(proxy) = overrides.proxy {
            self.slack.proxy = non_empty(proxy);
        }
        if let Some(use_threads) = overrides.use_threads {
            self.slack.use_threads = use_threads;
        }
        if let Some(granularity) = overrides.conversation_granularity {
            self.slack.conversation_granularity = granularity;
        }
        if let Some(endpoint_url) = overrides.bot_endpoint_url {
            self.bot.endpoint_url = non_empty(endpoint_url);
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_slack(&self.slack)?;
        validate_bot(&self.bot)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let token = slack.slack_token.expose_secret();
    if token.trim().is_empty() {
        return Err(ConfigError::Validation(
            "slack.slack_token is required. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string(),
        ));
    }
    if !token.starts_with("xoxb") {
        let hint = if token.starts_with("xapp-") {
            " (hint: you may have used the app-level token instead of the bot token)"
        } else if token.starts_with("xoxp-") {
            " (hint: you may have used a user token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.slack_token must start with `xoxb`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    if slack.slack_signing_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "slack.slack_signing_secret is required. Get it from https://api.slack.com/apps > Your App > Basic Information > App Credentials".to_string(),
        ));
    }

    if let Some(proxy) = &slack.proxy {
        let parsed = Url::parse(proxy).map_err(|error| {
            ConfigError::Validation(format!("slack.proxy is not a valid URL: {error}"))
        })?;
        if parsed.scheme() != "http" {
            return Err(ConfigError::Validation(format!(
                "slack.proxy must be an HTTP proxy (`http://...`), got scheme `{}`",
                parsed.scheme()
            )));
        }
    }

    for (key, header) in [
        ("slack.slack_retry_reason_header", &slack.slack_retry_reason_header),
        ("slack.slack_retry_number_header", &slack.slack_retry_number_header),
    ] {
        if !is_valid_header_name(header) {
            return Err(ConfigError::Validation(format!(
                "{key} must be a valid HTTP header name, got `{header}`"
            )));
        }
    }

    if slack.errors_ignore_retry.iter().any(|reason| reason.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "slack.errors_ignore_retry must not contain empty entries".to_string(),
        ));
    }

    if !slack.api_base_url.starts_with("http://") && !slack.api_base_url.starts_with("https://")
    {
        return Err(ConfigError::Validation(
            "slack.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if slack.max_request_age_secs == 0 || slack.max_request_age_secs > 3600 {
        return Err(ConfigError::Validation(
            "slack.max_request_age_secs must be in range 1..=3600".to_string(),
        ));
    }

    Ok(())
}

fn validate_bot(bot: &BotConfig) -> Result<(), ConfigError> {
    if let Some(endpoint_url) = &bot.endpoint_url {
        if !endpoint_url.starts_with("http://") && !endpoint_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "bot.endpoint_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if bot.timeout_secs == 0 || bot.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "bot.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

// RFC 9110 token characters.
fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|byte| {
            byte.is_ascii_alphanumeric()
                || matches!(
                    byte,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().to_ascii_lowercase().parse::<bool>().map_err(|_| {
        ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    slack: Option<SlackPatch>,
    bot: Option<BotPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    slack_token: Option<String>,
    slack_signing_secret: Option<String>,
    slack_channel: Option<String>,
    proxy: Option<String>,
    slack_retry_reason_header: Option<String>,
    slack_retry_number_header: Option<String>,
    errors_ignore_retry: Option<Vec<String>>,
    use_threads: Option<bool>,
    conversation_granularity: Option<ConversationGranularity>,
    api_base_url: Option<String>,
    max_request_age_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BotPatch {
    endpoint_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
