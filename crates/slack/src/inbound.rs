//! Classification of webhook deliveries into bot messages.

use std::sync::Arc;
use std::time::Duration;

use parley_core::config::SlackConfig;
use parley_core::conversation::{conversation_id, ConversationGranularity};
use parley_core::message::{MessageMetadata, UserMessage};
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::SlackApi;
use crate::events::{sanitize_text, EventsPayload};
use crate::interactive::{ActionKind, InteractivePayload};
use crate::output::{SlackBot, CHANNEL_NAME};
use crate::retry::RetryFilter;
use crate::signature::SignatureVerifier;

/// Route the Slack app's Events API and interactivity URLs point at.
pub const WEBHOOK_PATH: &str = "/webhooks/slack/webhook";
pub const STATUS_PATH: &str = "/webhooks/slack/";

pub const IGNORED_BOT_MESSAGE: &str = "Bot message delivered.";
pub const IGNORED_UNSUPPORTED_CHANNEL: &str = "Channel not supported.";
pub const IGNORED_LINK_BUTTON: &str = "User clicked link button.";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InboundError {
    #[error("request body is not valid JSON: {0}")]
    MalformedJson(String),
    #[error("form body has no `payload` field")]
    MissingPayload,
    #[error("interactive payload has no supported action (got `{0}`)")]
    UnsupportedAction(String),
    #[error("interactive payload has no user id")]
    MissingSender,
    #[error("`{0}` action carried no selected value")]
    EmptySelection(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum InboundOutcome {
    /// URL verification handshake; echo the challenge back.
    Challenge(String),
    Message(UserMessage),
    Ignored(&'static str),
}

/// The Slack side of the connector: verifies, filters and parses webhook deliveries.
#[derive(Clone)]
pub struct SlackInput {
    slack_channel: Option<String>,
    use_threads: bool,
    granularity: ConversationGranularity,
    verifier: SignatureVerifier,
    retry_filter: RetryFilter,
    api: Arc<dyn SlackApi>,
}

impl SlackInput {
    pub fn new(
        slack_channel: Option<String>,
        use_threads: bool,
        granularity: ConversationGranularity,
        verifier: SignatureVerifier,
        retry_filter: RetryFilter,
        api: Arc<dyn SlackApi>,
    ) -> Self {
        Self { slack_channel, use_threads, granularity, verifier, retry_filter, api }
    }

    pub fn from_config(config: &SlackConfig, api: Arc<dyn SlackApi>) -> Self {
        Self::new(
            config.slack_channel.clone(),
            config.use_threads,
            config.conversation_granularity,
            SignatureVerifier::new(
                config.slack_signing_secret.clone(),
                Duration::from_secs(config.max_request_age_secs),
            ),
            RetryFilter::from_config(config),
            api,
        )
    }

    pub fn name(&self) -> &'static str {
        CHANNEL_NAME
    }

    pub fn slack_channel(&self) -> Option<&str> {
        self.slack_channel.as_deref()
    }

    pub fn use_threads(&self) -> bool {
        self.use_threads
    }

    pub fn granularity(&self) -> ConversationGranularity {
        self.granularity
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    pub fn retry_filter(&self) -> &RetryFilter {
        &self.retry_filter
    }

    pub fn api(&self) -> Arc<dyn SlackApi> {
        self.api.clone()
    }

    /// Output channel replying where the message came from.
    ///
    /// The configured `slack_channel` is used when the event carried none, and the
    /// thread is only kept when threaded replies are enabled.
    pub fn output_channel(&self, out_channel: Option<&str>, thread_id: Option<&str>) -> SlackBot {
        let channel = out_channel.map(str::to_owned).or_else(|| self.slack_channel.clone());
        let thread_id = thread_id.filter(|_| self.use_threads).map(str::to_owned);
        SlackBot::new(self.api.clone(), channel, thread_id)
    }

    pub fn output_for(&self, metadata: &MessageMetadata) -> SlackBot {
        self.output_channel(metadata.out_channel.as_deref(), metadata.thread_id.as_deref())
    }

    /// Turns a verified request body into a message for the bot, or a reason not to.
    pub fn classify(&self, content_type: Option<&str>, body: &[u8]) -> Result<InboundOutcome, InboundError> {
        match content_type.map(mime_essence).as_deref() {
            Some("application/json") => self.classify_event(body),
            Some("application/x-www-form-urlencoded") => self.classify_interaction(body),
            other => {
                debug!(
                    event_name = "slack.inbound.unsupported_content_type",
                    content_type = other.unwrap_or_default(),
                    "ignoring request with unsupported content type"
                );
                Ok(InboundOutcome::Ignored(IGNORED_BOT_MESSAGE))
            }
        }
    }

    fn classify_event(&self, body: &[u8]) -> Result<InboundOutcome, InboundError> {
        let payload: EventsPayload =
            serde_json::from_slice(body).map_err(|error| InboundError::MalformedJson(error.to_string()))?;

        if let Some(challenge) = payload.challenge.clone() {
            return Ok(InboundOutcome::Challenge(challenge));
        }

        let Some(event) = payload.user_message() else {
            return Ok(InboundOutcome::Ignored(IGNORED_BOT_MESSAGE));
        };
        if !event.is_supported_channel(self.slack_channel.as_deref()) {
            debug!(
                event_name = "slack.inbound.unsupported_channel",
                channel_id = event.channel.as_deref().unwrap_or_default(),
                "ignoring message from channel the bot does not listen to"
            );
            return Ok(InboundOutcome::Ignored(IGNORED_UNSUPPORTED_CHANNEL));
        }
        let Some(user) = event.user.as_deref().filter(|user| !user.is_empty()) else {
            return Ok(InboundOutcome::Ignored(IGNORED_BOT_MESSAGE));
        };

        let metadata = payload.metadata();
        let text = sanitize_text(event.text.as_deref().unwrap_or_default(), &metadata.users);
        let sender_id = self.sender_id(user, &metadata);

        Ok(InboundOutcome::Message(UserMessage::new(text, sender_id, CHANNEL_NAME, metadata)))
    }

    fn classify_interaction(&self, body: &[u8]) -> Result<InboundOutcome, InboundError> {
        let raw = url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "payload")
            .map(|(_, value)| value.into_owned())
            .ok_or(InboundError::MissingPayload)?;
        let payload: InteractivePayload =
            serde_json::from_str(&raw).map_err(|error| InboundError::MalformedJson(error.to_string()))?;

        let Some((kind, action)) = payload.supported_action() else {
            let action_type =
                payload.first_action().map(|action| action.action_type.clone()).unwrap_or_default();
            warn!(
                event_name = "slack.inbound.unsupported_action",
                action_type = %action_type,
                "interactive payload is not a supported action"
            );
            return Err(InboundError::UnsupportedAction(action_type));
        };

        let Some(text) = action.response_text(kind) else {
            if kind == ActionKind::Button {
                return Ok(InboundOutcome::Ignored(IGNORED_LINK_BUTTON));
            }
            return Err(InboundError::EmptySelection(action.action_type.clone()));
        };
        let user = payload.sender_id().ok_or(InboundError::MissingSender)?;

        let metadata = payload.metadata();
        let sender_id = self.sender_id(user, &metadata);
        Ok(InboundOutcome::Message(UserMessage::new(text, sender_id, CHANNEL_NAME, metadata)))
    }

    fn sender_id(&self, user: &str, metadata: &MessageMetadata) -> String {
        conversation_id(
            self.granularity,
            user,
            metadata.out_channel.as_deref(),
            metadata.thread_id.as_deref(),
        )
    }
}

fn mime_essence(content_type: &str) -> String {
    content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parley_core::conversation::ConversationGranularity;
    use serde_json::json;

    use super::{
        InboundError, InboundOutcome, SlackInput, IGNORED_BOT_MESSAGE, IGNORED_LINK_BUTTON,
        IGNORED_UNSUPPORTED_CHANNEL,
    };
    use crate::api::{AuthIdentity, PostMessageRequest, PostedMessage, SlackApi, SlackApiError};
    use crate::retry::RetryFilter;
    use crate::signature::SignatureVerifier;

    struct NoopApi;

    #[async_trait]
    impl SlackApi for NoopApi {
        async fn post_message(&self, request: PostMessageRequest) -> Result<PostedMessage, SlackApiError> {
            Ok(PostedMessage { channel: request.channel().unwrap_or_default().to_owned(), ts: None })
        }

        async fn auth_test(&self) -> Result<AuthIdentity, SlackApiError> {
            Err(SlackApiError::Api("not_authed".to_owned()))
        }
    }

    fn input(channel: Option<&str>, use_threads: bool, granularity: ConversationGranularity) -> SlackInput {
        SlackInput::new(
            channel.map(str::to_owned),
            use_threads,
            granularity,
            SignatureVerifier::new("secret".to_owned().into(), Duration::from_secs(300)),
            RetryFilter::new("x-slack-retry-reason", "x-slack-retry-num", vec!["http_timeout".to_owned()]),
            Arc::new(NoopApi),
        )
    }

    fn event_body(event: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "type": "event_callback",
            "authorizations": [{"user_id": "UBOT"}],
            "event": event,
        }))
        .expect("body")
    }

    fn form_body(payload: serde_json::Value) -> Vec<u8> {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("payload", &payload.to_string())
            .finish()
            .into_bytes()
    }

    fn message(outcome: Result<InboundOutcome, InboundError>) -> parley_core::message::UserMessage {
        match outcome {
            Ok(InboundOutcome::Message(message)) => message,
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn url_verification_returns_challenge() {
        let body = br#"{"token":"t","challenge":"3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P","type":"url_verification"}"#;
        assert_eq!(
            input(None, false, ConversationGranularity::Sender).classify(Some("application/json"), body),
            Ok(InboundOutcome::Challenge("3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P".to_owned()))
        );
    }

    #[test]
    fn direct_message_becomes_user_message() {
        let body = event_body(json!({
            "type": "message", "user": "U1", "text": "<@UBOT> book a table",
            "channel": "D1", "channel_type": "im", "ts": "100.1"
        }));

        let message = message(
            input(None, false, ConversationGranularity::Sender)
                .classify(Some("application/json; charset=utf-8"), &body),
        );

        assert_eq!(message.text, "book a table");
        assert_eq!(message.sender_id, "U1");
        assert_eq!(message.input_channel, "slack");
        assert_eq!(message.metadata.out_channel.as_deref(), Some("D1"));
        assert_eq!(message.metadata.thread_id.as_deref(), Some("100.1"));
    }

    #[test]
    fn granularity_shapes_sender_id() {
        let body = event_body(json!({
            "type": "app_mention", "user": "U1", "text": "<@UBOT> hi",
            "channel": "C1", "ts": "2.0", "thread_ts": "1.0"
        }));

        let by_channel = message(input(None, false, ConversationGranularity::Channel).classify(Some("application/json"), &body));
        assert_eq!(by_channel.sender_id, "U1_C1");

        let by_thread = message(input(None, false, ConversationGranularity::Thread).classify(Some("application/json"), &body));
        assert_eq!(by_thread.sender_id, "U1_C1_1.0");
    }

    #[test]
    fn channel_messages_need_configured_channel() {
        let body = event_body(json!({"type": "message", "user": "U1", "text": "hi", "channel": "C1", "channel_type": "channel"}));

        assert_eq!(
            input(None, false, ConversationGranularity::Sender).classify(Some("application/json"), &body),
            Ok(InboundOutcome::Ignored(IGNORED_UNSUPPORTED_CHANNEL))
        );
        assert!(matches!(
            input(Some("C1"), false, ConversationGranularity::Sender).classify(Some("application/json"), &body),
            Ok(InboundOutcome::Message(_))
        ));
    }

    #[test]
    fn bot_echoes_are_ignored() {
        let body = event_body(json!({"type": "message", "bot_id": "B1", "text": "reply", "channel": "D1", "channel_type": "im"}));
        assert_eq!(
            input(None, false, ConversationGranularity::Sender).classify(Some("application/json"), &body),
            Ok(InboundOutcome::Ignored(IGNORED_BOT_MESSAGE))
        );
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            input(None, false, ConversationGranularity::Sender).classify(Some("application/json"), b"{not json"),
            Err(InboundError::MalformedJson(_))
        ));
    }

    #[test]
    fn other_content_types_are_ignored() {
        let input = input(None, false, ConversationGranularity::Sender);
        assert_eq!(input.classify(Some("text/plain"), b"hello"), Ok(InboundOutcome::Ignored(IGNORED_BOT_MESSAGE)));
        assert_eq!(input.classify(None, b"hello"), Ok(InboundOutcome::Ignored(IGNORED_BOT_MESSAGE)));
    }

    #[test]
    fn button_click_becomes_user_message() {
        let body = form_body(json!({
            "type": "block_actions",
            "user": {"id": "U1"},
            "channel": {"id": "C1"},
            "message": {"ts": "5.0"},
            "actions": [{"type": "button", "value": "/affirm"}]
        }));

        let message = message(
            input(None, false, ConversationGranularity::Sender)
                .classify(Some("application/x-www-form-urlencoded"), &body),
        );
        assert_eq!(message.text, "/affirm");
        assert_eq!(message.sender_id, "U1");
        assert_eq!(message.metadata.users, vec!["U1".to_owned()]);
    }

    #[test]
    fn link_button_is_ignored_and_unknown_actions_rejected() {
        let input = input(None, false, ConversationGranularity::Sender);
        let link = form_body(json!({
            "user": {"id": "U1"},
            "actions": [{"type": "button", "url": "https://example.com"}]
        }));
        assert_eq!(
            input.classify(Some("application/x-www-form-urlencoded"), &link),
            Ok(InboundOutcome::Ignored(IGNORED_LINK_BUTTON))
        );

        let typed = form_body(json!({"user": {"id": "U1"}, "actions": [{"type": "plain_text_input"}]}));
        assert_eq!(
            input.classify(Some("application/x-www-form-urlencoded"), &typed),
            Err(InboundError::UnsupportedAction("plain_text_input".to_owned()))
        );

        assert_eq!(
            input.classify(Some("application/x-www-form-urlencoded"), b"foo=bar"),
            Err(InboundError::MissingPayload)
        );
    }

    #[test]
    fn output_channel_respects_threading_setting() {
        let threaded = input(Some("CDEFAULT"), true, ConversationGranularity::Sender);
        let bot = threaded.output_channel(Some("C1"), Some("1.0"));
        assert_eq!(bot.slack_channel(), Some("C1"));
        assert_eq!(bot.thread_id(), Some("1.0"));

        let fallback = threaded.output_channel(None, None);
        assert_eq!(fallback.slack_channel(), Some("CDEFAULT"));

        let unthreaded = input(None, false, ConversationGranularity::Sender).output_channel(Some("C1"), Some("1.0"));
        assert_eq!(unthreaded.thread_id(), None);
    }
}
