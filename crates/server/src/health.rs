use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use parley_core::config::AppConfig;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

/// Non-secret view of the Slack connector settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SlackSummary {
    pub channel: Option<String>,
    pub use_threads: bool,
    pub conversation_granularity: &'static str,
    pub proxy_configured: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub slack: SlackSummary,
    pub bot_mode: &'static str,
    pub checked_at: String,
}

#[derive(Clone)]
pub struct HealthState {
    slack: SlackSummary,
    bot_mode: &'static str,
}

impl HealthState {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            slack: SlackSummary {
                channel: config.slack.slack_channel.clone(),
                use_threads: config.slack.use_threads,
                conversation_granularity: config.slack.conversation_granularity.as_str(),
                proxy_configured: config.slack.proxy.is_some(),
            },
            bot_mode: config.bot_mode(),
        }
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let payload = HealthResponse {
        status: "ready",
        service: HealthCheck {
            status: "ready",
            detail: "parley-server webhook listener initialized".to_string(),
        },
        slack: state.slack,
        bot_mode: state.bot_mode,
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}
