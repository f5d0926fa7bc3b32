//! Events API payloads delivered as `application/json` to the webhook.

use std::sync::LazyLock;

use parley_core::message::MessageMetadata;
use regex::{Captures, Regex};
use serde::Deserialize;

const USER_MESSAGE_SUBTYPES: &[&str] = &["thread_broadcast", "file_share"];

static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*<@(?P<id>[^>|\s]+)(?:\|[^>]*)?>\s*").expect("hardcoded mention regex")
});

static LINK_MARKUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:mailto:|https?://)[^|>]*\|(?P<label>[^>]*)>").expect("hardcoded link regex")
});

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct EventsPayload {
    #[serde(rename = "type", default)]
    pub payload_type: Option<String>,
    #[serde(default)]
    pub challenge: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub event: Option<MessageEvent>,
    #[serde(default)]
    pub authed_users: Option<Vec<String>>,
    #[serde(default)]
    pub authorizations: Vec<Authorization>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Authorization {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct MessageEvent {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl EventsPayload {
    /// The event when it was written by a human, not by a bot or a message edit.
    pub fn user_message(&self) -> Option<&MessageEvent> {
        self.event.as_ref().filter(|event| event.is_user_message())
    }

    /// Bot user ids the app was addressed as in this delivery.
    pub fn bot_user_ids(&self) -> Vec<String> {
        if let Some(users) = &self.authed_users {
            return users.clone();
        }
        self.authorizations
            .first()
            .and_then(|authorization| authorization.user_id.clone())
            .into_iter()
            .collect()
    }

    pub fn metadata(&self) -> MessageMetadata {
        let event = self.event.as_ref();
        MessageMetadata {
            out_channel: event.and_then(|event| event.channel.clone()),
            thread_id: event.and_then(MessageEvent::thread_id).map(str::to_owned),
            users: self.bot_user_ids(),
        }
    }
}

impl MessageEvent {
    pub fn is_user_message(&self) -> bool {
        let typed = matches!(self.event_type.as_str(), "message" | "app_mention");
        let has_text = self.text.as_deref().is_some_and(|text| !text.trim().is_empty());
        let human_subtype = self
            .subtype
            .as_deref()
            .map_or(true, |subtype| USER_MESSAGE_SUBTYPES.contains(&subtype));

        typed && has_text && self.bot_id.is_none() && human_subtype
    }

    pub fn is_app_mention(&self) -> bool {
        self.event_type == "app_mention"
    }

    pub fn is_direct_message(&self) -> bool {
        self.channel_type.as_deref() == Some("im")
    }

    /// Threaded replies carry the parent `thread_ts`; top-level messages start a thread at `ts`.
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_ts.as_deref().or(self.ts.as_deref())
    }

    /// Whether the connector should answer this event at all.
    pub fn is_supported_channel(&self, slack_channel: Option<&str>) -> bool {
        self.is_direct_message()
            || self.is_app_mention()
            || slack_channel.is_some_and(|configured| self.channel.as_deref() == Some(configured))
    }
}

/// Strips bot mentions and unwraps Slack link markup so the bot sees plain text.
///
/// A bot mention and the whitespace around it collapse into a single space; other users'
/// mentions are left alone.
pub fn sanitize_text(text: &str, bot_user_ids: &[String]) -> String {
    let without_mentions = MENTION_RE.replace_all(text, |caps: &Captures<'_>| {
        if bot_user_ids.iter().any(|user_id| user_id == &caps["id"]) {
            " ".to_owned()
        } else {
            caps[0].to_owned()
        }
    });

    LINK_MARKUP_RE.replace_all(&without_mentions, "$label").trim().to_owned()
}
