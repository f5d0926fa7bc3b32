use parley_core::message::Button;
use serde::Serialize;
use serde_json::{Map, Value};

/// Slack rejects action blocks with more buttons than this in a single bot reply.
pub const MAX_BUTTONS: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum TextObject {
    #[serde(rename = "plain_text")]
    Plain { text: String },
    #[serde(rename = "mrkdwn")]
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "button")]
pub struct ButtonElement {
    pub action_id: String,
    pub text: TextObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ButtonElement {
    pub fn new(action_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            text: TextObject::plain(label),
            value: None,
        }
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Actions { block_id: String, elements: Vec<ButtonElement> },
    Image { block_id: String, image_url: String, alt_text: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

impl MessageTemplate {
    /// `chat.postMessage` fields for this template: `text` plus `blocks`.
    pub fn to_payload(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let mut payload = Map::new();
        payload.insert("text".to_owned(), Value::String(self.fallback_text.clone()));
        payload.insert("blocks".to_owned(), serde_json::to_value(&self.blocks)?);
        Ok(payload)
    }
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Section { block_id: block_id.into(), text: builder.build() });
        self
    }

    pub fn actions<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ActionsBuilder),
    {
        let mut builder = ActionsBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Actions { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn image(
        mut self,
        block_id: impl Into<String>,
        image_url: impl Into<String>,
        alt_text: impl Into<String>,
    ) -> Self {
        self.blocks.push(Block::Image {
            block_id: block_id.into(),
            image_url: image_url.into(),
            alt_text: alt_text.into(),
        });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> TextObject {
        self.text.unwrap_or_else(|| TextObject::plain(""))
    }
}

#[derive(Default)]
pub struct ActionsBuilder {
    elements: Vec<ButtonElement>,
}

impl ActionsBuilder {
    pub fn button(&mut self, button: ButtonElement) -> &mut Self {
        self.elements.push(button);
        self
    }

    fn build(self) -> Vec<ButtonElement> {
        self.elements
    }
}

/// Prompt text followed by one button per bot suggestion; clicks post the button payload back.
pub fn buttons_message(text: &str, buttons: &[Button]) -> MessageTemplate {
    MessageBuilder::new(text)
        .section("parley.prompt.v1", |section| {
            section.plain(text);
        })
        .actions("parley.buttons.v1", |actions| {
            for (index, button) in buttons.iter().enumerate() {
                actions.button(
                    ButtonElement::new(format!("parley.button.{index}"), button.title.as_str())
                        .value(button.payload.as_str()),
                );
            }
        })
        .build()
}

pub fn image_message(image_url: &str) -> MessageTemplate {
    MessageBuilder::new(image_url).image("parley.image.v1", image_url, image_url).build()
}
