use std::sync::Arc;

use async_trait::async_trait;
use parley_core::channel::OutputChannel;
use parley_core::errors::{ApplicationError, DomainError};
use parley_core::message::Button;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{PostMessageRequest, SlackApi, SlackApiError};
use crate::blocks::{buttons_message, image_message, MessageTemplate, MAX_BUTTONS};

pub const CHANNEL_NAME: &str = "slack";

impl From<SlackApiError> for ApplicationError {
    fn from(error: SlackApiError) -> Self {
        ApplicationError::Integration(error.to_string())
    }
}

/// Posts bot replies to Slack through `chat.postMessage`.
#[derive(Clone)]
pub struct SlackBot {
    api: Arc<dyn SlackApi>,
    slack_channel: Option<String>,
    thread_id: Option<String>,
}

impl SlackBot {
    pub fn new(api: Arc<dyn SlackApi>, slack_channel: Option<String>, thread_id: Option<String>) -> Self {
        Self { api, slack_channel, thread_id }
    }

    pub fn slack_channel(&self) -> Option<&str> {
        self.slack_channel.as_deref()
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    fn recipient<'a>(&'a self, recipient_id: &'a str) -> &'a str {
        self.slack_channel.as_deref().unwrap_or(recipient_id)
    }

    fn request(&self, recipient_id: &str) -> PostMessageRequest {
        PostMessageRequest::new(self.recipient(recipient_id)).thread_ts(self.thread_id.as_deref())
    }

    async fn post(&self, request: PostMessageRequest) -> Result<(), ApplicationError> {
        let posted = self.api.post_message(request).await?;
        debug!(
            event_name = "slack.output.posted",
            channel_id = %posted.channel,
            thread_ts = self.thread_id.as_deref().unwrap_or_default(),
            "delivered bot reply"
        );
        Ok(())
    }

    async fn post_template(
        &self,
        recipient_id: &str,
        template: &MessageTemplate,
    ) -> Result<(), ApplicationError> {
        let fields = template
            .to_payload()
            .map_err(|error| DomainError::InvalidPayload(error.to_string()))?;
        self.post(self.request(recipient_id).fields_from(fields)).await
    }
}

#[async_trait]
impl OutputChannel for SlackBot {
    fn name(&self) -> &'static str {
        CHANNEL_NAME
    }

    async fn send_text_message(&self, recipient_id: &str, text: &str) -> Result<(), ApplicationError> {
        for part in text.trim().split("\n\n").filter(|part| !part.trim().is_empty()) {
            let request = self.request(recipient_id).field("text", part).field("type", "mrkdwn");
            self.post(request).await?;
        }
        Ok(())
    }

    async fn send_image_url(&self, recipient_id: &str, image: &str) -> Result<(), ApplicationError> {
        self.post_template(recipient_id, &image_message(image)).await
    }

    async fn send_attachment(&self, recipient_id: &str, attachment: &Value) -> Result<(), ApplicationError> {
        let request = self
            .request(recipient_id)
            .field("attachments", Value::Array(vec![attachment.clone()]));
        self.post(request).await
    }

    async fn send_text_with_buttons(
        &self,
        recipient_id: &str,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), ApplicationError> {
        if buttons.len() > MAX_BUTTONS {
            warn!(
                event_name = "slack.output.too_many_buttons",
                buttons = buttons.len(),
                max_buttons = MAX_BUTTONS,
                "slack supports at most {MAX_BUTTONS} buttons, sending text only"
            );
            return self.send_text_message(recipient_id, text).await;
        }

        self.post_template(recipient_id, &buttons_message(text, buttons)).await
    }

    async fn send_custom_json(&self, recipient_id: &str, payload: &Value) -> Result<(), ApplicationError> {
        let Value::Object(fields) = payload else {
            return Err(DomainError::InvalidPayload(
                "custom slack payload must be a JSON object".to_owned(),
            )
            .into());
        };

        let mut fields = fields.clone();
        fields
            .entry("channel")
            .or_insert_with(|| Value::String(self.recipient(recipient_id).to_owned()));
        fields.entry("as_user").or_insert(Value::Bool(true));
        if let Some(thread_id) = &self.thread_id {
            fields.entry("thread_ts").or_insert_with(|| Value::String(thread_id.clone()));
        }

        self.post(PostMessageRequest::from_fields(fields)).await
    }
}
