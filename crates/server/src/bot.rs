use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_core::channel::{MessageHandler, OutputChannel};
use parley_core::config::BotConfig;
use parley_core::errors::ApplicationError;
use parley_core::message::{BotResponse, MessageMetadata, UserMessage};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum BotError {
    #[error("could not build bot http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("bot endpoint request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("bot endpoint answered http {status}")]
    Status { status: u16 },
    #[error("bot endpoint returned an unreadable body: {0}")]
    Decode(#[source] reqwest::Error),
}

impl From<BotError> for ApplicationError {
    fn from(error: BotError) -> Self {
        ApplicationError::Integration(error.to_string())
    }
}

#[derive(Debug, Serialize)]
struct BotRequest<'a> {
    sender: &'a str,
    message: &'a str,
    input_channel: &'a str,
    metadata: &'a MessageMetadata,
}

/// Forwards user messages to an HTTP bot and relays its replies.
pub struct RestBotHandler {
    http: reqwest::Client,
    endpoint_url: String,
}

impl RestBotHandler {
    pub fn new(endpoint_url: impl Into<String>, timeout: Duration) -> Result<Self, BotError> {
        let http = reqwest::Client::builder().timeout(timeout).build().map_err(BotError::Client)?;
        Ok(Self { http, endpoint_url: endpoint_url.into() })
    }

    async fn ask(&self, message: &UserMessage) -> Result<Vec<BotResponse>, BotError> {
        let request = BotRequest {
            sender: &message.sender_id,
            message: &message.text,
            input_channel: &message.input_channel,
            metadata: &message.metadata,
        };
        let response = self
            .http
            .post(&self.endpoint_url)
            .json(&request)
            .send()
            .await
            .map_err(BotError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Status { status: status.as_u16() });
        }
        response.json::<Vec<BotResponse>>().await.map_err(BotError::Decode)
    }
}

#[async_trait]
impl MessageHandler for RestBotHandler {
    async fn handle(
        &self,
        message: UserMessage,
        output: Arc<dyn OutputChannel>,
    ) -> Result<(), ApplicationError> {
        let responses = self.ask(&message).await?;
        debug!(
            event_name = "bot.rest.responses_received",
            conversation_id = %message.sender_id,
            message_id = %message.message_id,
            responses = responses.len(),
            "bot endpoint replied"
        );
        deliver(output.as_ref(), &message.sender_id, &responses).await
    }
}

/// Replies with the user's own text; used when no bot endpoint is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn handle(
        &self,
        message: UserMessage,
        output: Arc<dyn OutputChannel>,
    ) -> Result<(), ApplicationError> {
        deliver(output.as_ref(), &message.sender_id, &[BotResponse::text(message.text.as_str())]).await
    }
}

async fn deliver(
    output: &dyn OutputChannel,
    sender_id: &str,
    responses: &[BotResponse],
) -> Result<(), ApplicationError> {
    for response in responses.iter().filter(|response| !response.is_empty()) {
        let recipient_id = response.recipient_id.as_deref().unwrap_or(sender_id);
        output.send_response(recipient_id, response).await?;
    }
    Ok(())
}

/// Picks the REST bridge when an endpoint is configured, echo otherwise.
pub fn handler_for(config: &BotConfig) -> Result<Arc<dyn MessageHandler>, BotError> {
    match &config.endpoint_url {
        Some(endpoint_url) => {
            let handler =
                RestBotHandler::new(endpoint_url.as_str(), Duration::from_secs(config.timeout_secs))?;
            info!(event_name = "bot.handler.selected", mode = "rest", "bot replies come from http endpoint");
            Ok(Arc::new(handler))
        }
        None => {
            info!(event_name = "bot.handler.selected", mode = "echo", "no bot endpoint configured, echoing messages");
            Ok(Arc::new(EchoHandler))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use std::time::Duration;

    use async_trait::async_trait;
    use httpmock::prelude::*;
    use parley_core::channel::{MessageHandler, OutputChannel};
    use parley_core::config::BotConfig;
    use parley_core::errors::ApplicationError;
    use parley_core::message::{BotResponse, Button, MessageMetadata, UserMessage};
    use serde_json::{json, Value};
    use tokio::sync::Mutex;

    use super::{deliver, handler_for, EchoHandler, RestBotHandler};

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<String>>,
    }

    impl RecordingChannel {
        async fn record(&self, entry: String) -> Result<(), ApplicationError> {
            self.sent.lock().await.push(entry);
            Ok(())
        }

        async fn sent(&self) -> Vec<String> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl OutputChannel for RecordingChannel {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send_text_message(&self, recipient_id: &str, text: &str) -> Result<(), ApplicationError> {
            self.record(format!("text:{recipient_id}:{text}")).await
        }

        async fn send_image_url(&self, recipient_id: &str, image: &str) -> Result<(), ApplicationError> {
            self.record(format!("image:{recipient_id}:{image}")).await
        }

        async fn send_attachment(&self, recipient_id: &str, _attachment: &Value) -> Result<(), ApplicationError> {
            self.record(format!("attachment:{recipient_id}")).await
        }

        async fn send_text_with_buttons(
            &self,
            recipient_id: &str,
            text: &str,
            buttons: &[Button],
        ) -> Result<(), ApplicationError> {
            self.record(format!("buttons:{recipient_id}:{text}:{}", buttons.len())).await
        }

        async fn send_custom_json(&self, recipient_id: &str, _payload: &Value) -> Result<(), ApplicationError> {
            self.record(format!("custom:{recipient_id}")).await
        }
    }

    fn message(text: &str) -> UserMessage {
        UserMessage::new(text, "U1", "slack", MessageMetadata::default())
    }

    #[tokio::test]
    async fn echo_handler_replies_with_user_text() {
        let channel = Arc::new(RecordingChannel::default());
        EchoHandler.handle(message("ping"), channel.clone()).await.expect("echo");

        assert_eq!(channel.sent().await, vec!["text:U1:ping"]);
    }

    #[tokio::test]
    async fn deliver_skips_empty_responses_and_honors_recipient() {
        let channel = RecordingChannel::default();
        let responses = vec![
            BotResponse::text("hi"),
            BotResponse::default(),
            BotResponse { recipient_id: Some("U2".to_owned()), image: Some("https://x/y.png".to_owned()), ..BotResponse::default() },
        ];

        deliver(&channel, "U1", &responses).await.expect("deliver");

        assert_eq!(channel.sent().await, vec!["text:U1:hi", "image:U2:https://x/y.png"]);
    }

    fn rest_handler(server: &MockServer) -> RestBotHandler {
        RestBotHandler::new(server.url("/webhooks/rest/webhook"), Duration::from_secs(2)).expect("handler")
    }

    #[tokio::test]
    async fn rest_handler_relays_bot_replies() {
        let server = MockServer::start_async().await;
        let endpoint = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/webhooks/rest/webhook")
                    .header("content-type", "application/json");
                then.status(200).json_body(json!([
                    {"recipient_id": "U1", "text": "hi there"},
                    {"recipient_id": "U1", "buttons": [{"title": "Yes", "payload": "/affirm"}], "text": "Sure?"}
                ]));
            })
            .await;
        let channel = Arc::new(RecordingChannel::default());

        rest_handler(&server).handle(message("hello"), channel.clone()).await.expect("handle");

        assert_eq!(endpoint.calls_async().await, 1);
        assert_eq!(channel.sent().await, vec!["text:U1:hi there", "buttons:U1:Sure?:1"]);
    }

    #[tokio::test]
    async fn rest_handler_reports_endpoint_failures() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/webhooks/rest/webhook");
                then.status(500).body("boom");
            })
            .await;
        let channel = Arc::new(RecordingChannel::default());

        let result = rest_handler(&server).handle(message("hello"), channel.clone()).await;

        assert_eq!(
            result,
            Err(ApplicationError::Integration("bot endpoint answered http 500".to_owned()))
        );
        assert!(channel.sent().await.is_empty());
    }

    #[tokio::test]
    async fn rest_handler_rejects_non_json_replies() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/webhooks/rest/webhook");
                then.status(200).body("<html>not a bot</html>");
            })
            .await;

        let result = rest_handler(&server)
            .handle(message("hello"), Arc::new(RecordingChannel::default()))
            .await;

        assert!(matches!(
            result,
            Err(ApplicationError::Integration(message)) if message.starts_with("bot endpoint returned an unreadable body")
        ));
    }

    #[test]
    fn handler_selection_follows_endpoint_config() {
        let echo = handler_for(&BotConfig { endpoint_url: None, timeout_secs: 30 });
        assert!(echo.is_ok());

        let rest = handler_for(&BotConfig {
            endpoint_url: Some("http://localhost:5055/webhooks/rest/webhook".to_owned()),
            timeout_secs: 30,
        });
        assert!(rest.is_ok());
    }

    #[test]
    fn bot_request_uses_rest_channel_field_names() {
        let message = message("hello");
        let request = super::BotRequest {
            sender: &message.sender_id,
            message: &message.text,
            input_channel: &message.input_channel,
            metadata: &message.metadata,
        };

        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["sender"], "U1");
        assert_eq!(value["message"], "hello");
        assert_eq!(value["input_channel"], "slack");
        assert!(value["metadata"].is_object());
    }
}
