use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Channel the reply should be posted to.
    pub out_channel: Option<String>,
    /// Thread timestamp of the originating message, or the message timestamp itself.
    pub thread_id: Option<String>,
    /// Bot user ids the event was delivered for; used to strip self-mentions.
    #[serde(default)]
    pub users: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UserMessage {
    pub message_id: String,
    pub text: String,
    pub sender_id: String,
    pub input_channel: String,
    pub metadata: MessageMetadata,
    pub received_at: DateTime<Utc>,
}

impl UserMessage {
    pub fn new(
        text: impl Into<String>,
        sender_id: impl Into<String>,
        input_channel: impl Into<String>,
        metadata: MessageMetadata,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().simple().to_string(),
            text: text.into(),
            sender_id: sender_id.into(),
            input_channel: input_channel.into(),
            metadata,
            received_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub title: String,
    pub payload: String,
}

impl Button {
    pub fn new(title: impl Into<String>, payload: impl Into<String>) -> Self {
        Self { title: title.into(), payload: payload.into() }
    }
}

/// One reply produced by the bot for a user message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BotResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<Value>,
}

impl BotResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.text.as_deref().map_or(true, str::is_empty)
            && self.image.is_none()
            && self.buttons.is_empty()
            && self.attachment.is_none()
            && self.custom.is_none()
            && self.elements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{BotResponse, Button, MessageMetadata, UserMessage};

    #[test]
    fn bot_response_deserializes_rest_style_payload() {
        let responses: Vec<BotResponse> = serde_json::from_value(json!([
            {"recipient_id": "U1", "text": "Pick one", "buttons": [{"title": "Yes", "payload": "/affirm"}]},
            {"recipient_id": "U1", "image": "https://example.com/cat.png"}
        ]))
        .expect("responses should deserialize");

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].buttons, vec![Button::new("Yes", "/affirm")]);
        assert_eq!(responses[1].image.as_deref(), Some("https://example.com/cat.png"));
        assert!(responses[1].text.is_none());
    }

    #[test]
    fn empty_response_detection_ignores_blank_text() {
        assert!(BotResponse::default().is_empty());
        assert!(BotResponse::text("").is_empty());
        assert!(!BotResponse::text("hi").is_empty());
    }

    #[test]
    fn user_messages_get_unique_ids() {
        let first = UserMessage::new("hi", "U1", "slack", MessageMetadata::default());
        let second = UserMessage::new("hi", "U1", "slack", MessageMetadata::default());
        assert_ne!(first.message_id, second.message_id);
        assert_eq!(first.input_channel, "slack");
    }
}
