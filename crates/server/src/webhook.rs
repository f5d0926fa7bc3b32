use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use parley_core::channel::{MessageHandler, OutputChannel};
use parley_core::message::UserMessage;
use parley_slack::inbound::{InboundOutcome, SlackInput};
use parley_slack::retry::NO_RETRY_HEADER;
use parley_slack::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

pub use parley_slack::inbound::{STATUS_PATH, WEBHOOK_PATH};

const NOT_SIGNED: &str = "Message is not properly signed with a valid X-Slack-Signature header";
const NOT_PROCESSED: &str = "The input message could not be processed.";

/// Bot handlers allowed to run at once; further messages wait for a free slot.
pub const MAX_CONCURRENT_HANDLERS: usize = 64;

#[derive(Clone)]
pub struct WebhookState {
    input: Arc<SlackInput>,
    handler: Arc<dyn MessageHandler>,
    tasks: TaskTracker,
    permits: Arc<Semaphore>,
}

/// Builds the Slack routes; handler tasks are spawned on `tasks` so shutdown can drain them.
pub fn router(input: Arc<SlackInput>, handler: Arc<dyn MessageHandler>, tasks: TaskTracker) -> Router {
    let permits = Arc::new(Semaphore::new(MAX_CONCURRENT_HANDLERS));
    Router::new()
        .route(STATUS_PATH, get(status))
        .route(WEBHOOK_PATH, post(webhook))
        .with_state(WebhookState { input, handler, tasks, permits })
}

async fn status() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn webhook(State(state): State<WebhookState>, headers: HeaderMap, body: Bytes) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());

    if let Err(error) = state.input.verifier().verify(
        header(TIMESTAMP_HEADER),
        header(SIGNATURE_HEADER),
        &body,
        Utc::now().timestamp(),
    ) {
        warn!(
            event_name = "slack.webhook.signature_rejected",
            correlation_id = %correlation_id,
            error = %error,
            "rejected unsigned slack request"
        );
        return (StatusCode::BAD_REQUEST, NOT_SIGNED).into_response();
    }

    match state.input.classify(header(CONTENT_TYPE.as_str()), &body) {
        Ok(InboundOutcome::Challenge(challenge)) => {
            info!(
                event_name = "slack.webhook.url_verification",
                correlation_id = %correlation_id,
                "answered slack url verification"
            );
            Json(json!({ "challenge": challenge })).into_response()
        }
        Ok(InboundOutcome::Ignored(reason)) => (StatusCode::OK, reason).into_response(),
        Ok(InboundOutcome::Message(message)) => {
            if let Some(notice) = state.input.retry_filter().inspect(header) {
                warn!(
                    event_name = "slack.webhook.retry_ignored",
                    correlation_id = %correlation_id,
                    attempt = %notice.attempt,
                    reason = %notice.reason,
                    "dropping slack redelivery"
                );
                return (StatusCode::CREATED, [(NO_RETRY_HEADER, "1")]).into_response();
            }

            dispatch(&state, message, correlation_id);
            StatusCode::OK.into_response()
        }
        Err(error) => {
            warn!(
                event_name = "slack.webhook.unprocessable",
                correlation_id = %correlation_id,
                error = %error,
                "could not process slack request"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, NOT_PROCESSED).into_response()
        }
    }
}

/// Hands the message to the bot off the request path; Slack expects an ack within 3 seconds.
fn dispatch(state: &WebhookState, message: UserMessage, correlation_id: String) {
    let output: Arc<dyn OutputChannel> = Arc::new(state.input.output_for(&message.metadata));
    let handler = state.handler.clone();
    let permits = state.permits.clone();

    info!(
        event_name = "slack.webhook.message_received",
        correlation_id = %correlation_id,
        conversation_id = %message.sender_id,
        channel_id = message.metadata.out_channel.as_deref().unwrap_or_default(),
        "dispatching slack message to bot"
    );

    state.tasks.spawn(async move {
        let conversation_id = message.sender_id.clone();
        let Ok(_permit) = permits.acquire_owned().await else {
            return;
        };
        if let Err(error) = handler.handle(message, output).await {
            let failure = error.into_interface(correlation_id);
            error!(
                event_name = "slack.webhook.handler_failed",
                correlation_id = failure.correlation_id(),
                conversation_id = %conversation_id,
                error = %failure,
                "bot handler failed: {}",
                failure.user_message()
            );
        }
    });
}
