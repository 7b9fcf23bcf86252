use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    PlainText { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::PlainText { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Danger,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ButtonElement {
    #[serde(rename = "type")]
    kind: &'static str,
    pub action_id: String,
    pub text: TextObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ButtonStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ButtonElement {
    pub fn new(action_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind: "button",
            action_id: action_id.into(),
            text: TextObject::plain(label),
            style: None,
            value: None,
        }
    }

    /// Button wired to one of a flow instance's interaction ids, or `None`
    /// when the flow never registered `interaction`.
    pub fn for_interaction(
        interaction_ids: &BTreeMap<String, String>,
        interaction: &str,
        label: impl Into<String>,
    ) -> Option<Self> {
        interaction_ids.get(interaction).map(|action_id| Self::new(action_id.clone(), label))
    }

    pub fn style(mut self, style: ButtonStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section {
        #[serde(skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
        text: TextObject,
    },
    Actions {
        #[serde(skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
        elements: Vec<ButtonElement>,
    },
    Context {
        elements: Vec<TextObject>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    #[serde(rename = "text")]
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section(mut self, text: TextObject) -> Self {
        self.blocks.push(Block::Section { block_id: None, text });
        self
    }

    pub fn actions(
        mut self,
        block_id: Option<&str>,
        elements: impl IntoIterator<Item = ButtonElement>,
    ) -> Self {
        let elements: Vec<_> = elements.into_iter().collect();
        if !elements.is_empty() {
            self.blocks
                .push(Block::Actions { block_id: block_id.map(str::to_owned), elements });
        }
        self
    }

    pub fn context(mut self, text: TextObject) -> Self {
        self.blocks.push(Block::Context { elements: vec![text] });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

pub fn plain_message(text: impl Into<String>) -> MessageTemplate {
    let text = text.into();
    MessageBuilder::new(text.clone()).section(TextObject::plain(text)).build()
}
