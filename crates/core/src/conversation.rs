use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Scope at which Slack dialogue is partitioned into bot conversations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationGranularity {
    /// One conversation per user across every channel.
    #[default]
    Sender,
    /// One conversation per user per channel.
    Channel,
    /// One conversation per user per thread.
    Thread,
}

impl ConversationGranularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Channel => "channel",
            Self::Thread => "thread",
        }
    }
}

impl std::fmt::Display for ConversationGranularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConversationGranularity {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sender" => Ok(Self::Sender),
            "channel" => Ok(Self::Channel),
            "thread" => Ok(Self::Thread),
            other => Err(DomainError::UnsupportedGranularity(other.to_owned())),
        }
    }
}

/// Derives the conversation key for a sender.
///
/// Falls back to the coarser key when the channel or thread is unknown, so a
/// direct message without a thread still maps onto a stable conversation.
pub fn conversation_id(
    granularity: ConversationGranularity,
    sender_id: &str,
    channel_id: Option<&str>,
    thread_id: Option<&str>,
) -> String {
    let channel_id = channel_id.filter(|value| !value.is_empty());
    let thread_id = thread_id.filter(|value| !value.is_empty());

    match (granularity, channel_id, thread_id) {
        (ConversationGranularity::Sender, _, _) => sender_id.to_owned(),
        (ConversationGranularity::Channel, Some(channel), _)
        | (ConversationGranularity::Thread, Some(channel), None) => {
            format!("{sender_id}_{channel}")
        }
        (ConversationGranularity::Thread, Some(channel), Some(thread)) => {
            format!("{sender_id}_{channel}_{thread}")
        }
        (ConversationGranularity::Channel | ConversationGranularity::Thread, None, _) => {
            sender_id.to_owned()
        }
    }
}
