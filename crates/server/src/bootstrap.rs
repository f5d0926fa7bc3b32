use std::sync::Arc;

use axum::Router;
use parley_core::config::AppConfig;
use parley_slack::api::{HttpSlackApi, SlackApi, SlackApiError};
use parley_slack::inbound::SlackInput;
use thiserror::Error;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::bot::{handler_for, BotError};
use crate::{health, webhook};

pub struct Application {
    pub config: AppConfig,
    pub router: Router,
    /// Bot handler tasks spawned by the webhook; drained on shutdown.
    pub tasks: TaskTracker,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("slack web api client could not be created: {0}")]
    SlackClient(#[source] SlackApiError),
    #[error("bot bridge could not be created: {0}")]
    BotClient(#[source] BotError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let api: Arc<dyn SlackApi> = Arc::new(
        HttpSlackApi::from_config(&config.slack).map_err(BootstrapError::SlackClient)?,
    );
    let input = Arc::new(SlackInput::from_config(&config.slack, api));
    let handler = handler_for(&config.bot).map_err(BootstrapError::BotClient)?;

    info!(
        event_name = "system.bootstrap.slack_connector_ready",
        correlation_id = "bootstrap",
        channel_id = config.slack.slack_channel.as_deref().unwrap_or("unset"),
        use_threads = config.slack.use_threads,
        conversation_granularity = config.slack.conversation_granularity.as_str(),
        bot_mode = config.bot_mode(),
        "slack connector initialized"
    );

    let tasks = TaskTracker::new();
    let router = webhook::router(input, handler, tasks.clone())
        .merge(health::router(health::HealthState::from_config(&config)))
        .layer(TraceLayer::new_for_http());

    Ok(Application { config, router, tasks })
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use parley_core::config::{AppConfig, ConfigOverrides, LoadOptions};
    use tower::ServiceExt;

    use crate::bootstrap::{bootstrap_with_config, BootstrapError};

    #[test]
    fn bootstrap_fails_fast_with_unusable_proxy() {
        let mut config = valid_config();
        config.slack.proxy = Some("http://[::1".to_string());

        let result = bootstrap_with_config(config);

        assert!(matches!(result, Err(BootstrapError::SlackClient(_))));
    }

    #[tokio::test]
    async fn bootstrapped_router_serves_health_and_webhook_routes() {
        let app = bootstrap_with_config(valid_config()).expect("bootstrap should succeed with valid config");
        assert_eq!(app.config.bot_mode(), "echo");

        let health = app
            .router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(health.status(), StatusCode::OK);

        let unsigned = app
            .router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/slack/webhook")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(unsigned.status(), StatusCode::BAD_REQUEST);
    }

    fn valid_config() -> AppConfig {
        AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                slack_token: Some("xoxb-test".to_string()),
                slack_signing_secret: Some("signing-secret".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("valid overrides should load")
    }
}
