use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::ApplicationError;
use crate::message::{BotResponse, Button, UserMessage};

/// Delivers bot replies back to the messaging platform a user wrote from.
#[async_trait]
pub trait OutputChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send_text_message(&self, recipient_id: &str, text: &str)
        -> Result<(), ApplicationError>;

    async fn send_image_url(&self, recipient_id: &str, image: &str)
        -> Result<(), ApplicationError>;

    async fn send_attachment(
        &self,
        recipient_id: &str,
        attachment: &Value,
    ) -> Result<(), ApplicationError>;

    async fn send_text_with_buttons(
        &self,
        recipient_id: &str,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), ApplicationError>;

    async fn send_custom_json(&self, recipient_id: &str, payload: &Value)
        -> Result<(), ApplicationError>;

    /// Renders carousel-style elements as one text message each.
    async fn send_elements(
        &self,
        recipient_id: &str,
        elements: &[Value],
    ) -> Result<(), ApplicationError> {
        for element in elements {
            let title = element.get("title").and_then(Value::as_str).unwrap_or_default();
            let subtitle = element.get("subtitle").and_then(Value::as_str).unwrap_or_default();
            let text = match (title.is_empty(), subtitle.is_empty()) {
                (false, false) => format!("{title} : {subtitle}"),
                (false, true) => title.to_owned(),
                (true, false) => subtitle.to_owned(),
                (true, true) => continue,
            };
            self.send_text_message(recipient_id, &text).await?;
        }
        Ok(())
    }

    /// Sends every part of a bot response.
    ///
    /// Buttons take precedence over plain text; custom payloads, images,
    /// attachments and elements are each sent independently afterwards.
    async fn send_response(
        &self,
        recipient_id: &str,
        response: &BotResponse,
    ) -> Result<(), ApplicationError> {
        let text = response.text.as_deref().unwrap_or_default();
        if !response.buttons.is_empty() {
            self.send_text_with_buttons(recipient_id, text, &response.buttons).await?;
        } else if !text.is_empty() {
            self.send_text_message(recipient_id, text).await?;
        }

        if let Some(custom) = &response.custom {
            self.send_custom_json(recipient_id, custom).await?;
        }
        if let Some(image) = &response.image {
            self.send_image_url(recipient_id, image).await?;
        }
        if let Some(attachment) = &response.attachment {
            self.send_attachment(recipient_id, attachment).await?;
        }
        if !response.elements.is_empty() {
            self.send_elements(recipient_id, &response.elements).await?;
        }
        Ok(())
    }
}

/// Receives user messages parsed by an input channel.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        message: UserMessage,
        output: Arc<dyn OutputChannel>,
    ) -> Result<(), ApplicationError>;
}
