//! Block-kit and legacy attachment interactions, posted as a form-encoded `payload` field.

use parley_core::message::MessageMetadata;
use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    Button,
    Select,
    StaticSelect,
    ExternalSelect,
    ConversationsSelect,
    UsersSelect,
    ChannelsSelect,
    Overflow,
    Datepicker,
}

impl ActionKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "button" => Some(Self::Button),
            "select" => Some(Self::Select),
            "static_select" => Some(Self::StaticSelect),
            "external_select" => Some(Self::ExternalSelect),
            "conversations_select" => Some(Self::ConversationsSelect),
            "users_select" => Some(Self::UsersSelect),
            "channels_select" => Some(Self::ChannelsSelect),
            "overflow" => Some(Self::Overflow),
            "datepicker" => Some(Self::Datepicker),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct InteractivePayload {
    #[serde(rename = "type", default)]
    pub payload_type: Option<String>,
    #[serde(default)]
    pub user: Option<IdRef>,
    #[serde(default)]
    pub channel: Option<IdRef>,
    #[serde(default)]
    pub message: Option<MessageRef>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct IdRef {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct MessageRef {
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Action {
    #[serde(rename = "type", default)]
    pub action_type: String,
    #[serde(default)]
    pub action_id: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub selected_option: Option<SelectedOption>,
    #[serde(default)]
    pub selected_options: Vec<SelectedOption>,
    #[serde(default)]
    pub selected_conversation: Option<String>,
    #[serde(default)]
    pub selected_user: Option<String>,
    #[serde(default)]
    pub selected_channel: Option<String>,
    #[serde(default)]
    pub selected_date: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SelectedOption {
    #[serde(default)]
    pub value: Option<String>,
}

impl InteractivePayload {
    pub fn first_action(&self) -> Option<&Action> {
        self.actions.first()
    }

    /// The first action when its type is one the connector turns into a user message.
    pub fn supported_action(&self) -> Option<(ActionKind, &Action)> {
        let action = self.first_action()?;
        ActionKind::parse(&action.action_type).map(|kind| (kind, action))
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.user.as_ref().and_then(|user| user.id.as_deref()).filter(|id| !id.is_empty())
    }

    pub fn metadata(&self) -> MessageMetadata {
        let thread_id = self
            .message
            .as_ref()
            .and_then(|message| message.thread_ts.clone().or_else(|| message.ts.clone()));

        MessageMetadata {
            out_channel: self.channel.as_ref().and_then(|channel| channel.id.clone()),
            thread_id,
            users: self.sender_id().map(str::to_owned).into_iter().collect(),
        }
    }
}

impl Action {
    /// Text forwarded to the bot for this action, if the user picked something.
    pub fn response_text(&self, kind: ActionKind) -> Option<&str> {
        let text = match kind {
            ActionKind::Button => self.value.as_deref(),
            ActionKind::Select => {
                self.selected_options.first().and_then(|option| option.value.as_deref())
            }
            ActionKind::StaticSelect | ActionKind::ExternalSelect | ActionKind::Overflow => {
                self.selected_option.as_ref().and_then(|option| option.value.as_deref())
            }
            ActionKind::ConversationsSelect => self.selected_conversation.as_deref(),
            ActionKind::UsersSelect => self.selected_user.as_deref(),
            ActionKind::ChannelsSelect => self.selected_channel.as_deref(),
            ActionKind::Datepicker => self.selected_date.as_deref(),
        };
        text.filter(|text| !text.is_empty())
    }
}
