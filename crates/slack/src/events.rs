use std::future::Future;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use wrench_core::FlowError;

use crate::blocks::MessageTemplate;

#[derive(Clone, Debug, PartialEq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

impl SlackEnvelope {
    /// Decodes a socket-mode envelope body into a typed event.
    pub fn from_socket_payload(
        envelope_id: impl Into<String>,
        envelope_type: &str,
        payload: Value,
    ) -> Result<Self, PayloadError> {
        let event = match envelope_type {
            "interactive" => parse_interactive_payload(payload)?,
            "slash_commands" => SlackEvent::SlashCommand(
                serde_json::from_value(payload)
                    .map_err(|error| PayloadError::Malformed(error.to_string()))?,
            ),
            other => SlackEvent::Unsupported { event_type: other.to_owned() },
        };
        Ok(Self { envelope_id: envelope_id.into(), event })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SlackEvent {
    SlashCommand(SlashCommandPayload),
    BlockAction(BlockActionEvent),
    ViewSubmission(ViewSubmissionEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::SlashCommand(_) => SlackEventType::SlashCommand,
            Self::BlockAction(_) => SlackEventType::BlockAction,
            Self::ViewSubmission(_) => SlackEventType::ViewSubmission,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    SlashCommand,
    BlockAction,
    ViewSubmission,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SlashCommandPayload {
    pub command: String,
    #[serde(default)]
    pub text: String,
    pub channel_id: String,
    pub user_id: String,
    #[serde(default)]
    pub trigger_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SlackUser {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ChannelRef {
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SelectedOption {
    pub value: String,
}

/// One element the user interacted with inside a block.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct BlockActionElement {
    pub action_id: String,
    #[serde(default)]
    pub block_id: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub selected_option: Option<SelectedOption>,
}

impl BlockActionElement {
    pub fn selected_value(&self) -> Option<&str> {
        self.value
            .as_deref()
            .or_else(|| self.selected_option.as_ref().map(|option| option.value.as_str()))
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BlockActionEvent {
    pub user: SlackUser,
    #[serde(default)]
    pub channel: Option<ChannelRef>,
    #[serde(default)]
    pub trigger_id: Option<String>,
    pub actions: Vec<BlockActionElement>,
    /// Present when the element lives inside a modal.
    #[serde(default)]
    pub view: Option<ViewPayload>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ViewPayload {
    #[serde(default)]
    pub id: Option<String>,
    pub callback_id: String,
    #[serde(default)]
    pub private_metadata: String,
    #[serde(default)]
    pub state: ViewState,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ViewState {
    #[serde(default)]
    pub values: Value,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ViewSubmissionEvent {
    pub user: SlackUser,
    #[serde(default)]
    pub trigger_id: Option<String>,
    pub view: ViewPayload,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("interactive payload is missing its `type` field")]
    MissingType,
    #[error("interactive payload could not be decoded: {0}")]
    Malformed(String),
}

/// Decides the shape of an interactive payload once, at the transport boundary.
pub fn parse_interactive_payload(payload: Value) -> Result<SlackEvent, PayloadError> {
    let payload_type = payload
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(PayloadError::MissingType)?;

    let malformed = |error: serde_json::Error| PayloadError::Malformed(error.to_string());
    match payload_type.as_str() {
        "block_actions" => {
            Ok(SlackEvent::BlockAction(serde_json::from_value(payload).map_err(malformed)?))
        }
        "view_submission" => {
            Ok(SlackEvent::ViewSubmission(serde_json::from_value(payload).map_err(malformed)?))
        }
        _ => Ok(SlackEvent::Unsupported { event_type: payload_type }),
    }
}

/// An interaction matched by the dispatcher: either the first element of a
/// block action or a modal submission.
#[derive(Clone, Debug, PartialEq)]
pub enum Interaction {
    Action { event: BlockActionEvent, element: BlockActionElement },
    View(ViewSubmissionEvent),
}

impl Interaction {
    /// Identifier carrying the flow correlation for this interaction.
    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Action { element, .. } => &element.action_id,
            Self::View(event) => &event.view.callback_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Self::Action { event, .. } => &event.user.id,
            Self::View(event) => &event.user.id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(MessageTemplate),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error("listener failure: {0}")]
    Listener(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

impl DispatchError {
    pub fn flow_error(&self) -> Option<&FlowError> {
        match self {
            Self::Handler(EventHandlerError::Flow(error)) => Some(error),
            Self::Handler(EventHandlerError::Listener(_)) => None,
        }
    }

    /// True when the failure was a click or submission for an ended or
    /// expired flow instance.
    pub fn is_flow_gone(&self) -> bool {
        self.flow_error().is_some_and(FlowError::is_flow_gone)
    }

    /// User-safe text for the failure.
    pub fn user_message(&self) -> &'static str {
        match self.flow_error() {
            Some(error) => error.user_message(),
            None => "The request could not be processed. Check inputs and try again.",
        }
    }
}

#[async_trait]
pub trait InteractionListener: Send + Sync {
    async fn handle(
        &self,
        interaction: Interaction,
        ctx: EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[async_trait]
impl<F, Fut> InteractionListener for F
where
    F: Fn(Interaction, EventContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HandlerResult, EventHandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        interaction: Interaction,
        ctx: EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        self(interaction, ctx).await
    }
}

#[async_trait]
pub trait CommandListener: Send + Sync {
    async fn handle(
        &self,
        command: SlashCommandPayload,
        ctx: EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[async_trait]
impl<F, Fut> CommandListener for F
where
    F: Fn(SlashCommandPayload, EventContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HandlerResult, EventHandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        command: SlashCommandPayload,
        ctx: EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        self(command, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wrench_core::flows::StoreError;
    use wrench_core::FlowError;

    use super::{
        parse_interactive_payload, DispatchError, EventHandlerError, PayloadError, SlackEnvelope,
        SlackEvent,
    };

    #[test]
    fn dispatch_errors_expose_flow_guidance() {
        let gone = DispatchError::from(EventHandlerError::from(FlowError::from(
            StoreError::Expired { key: "wizard_1".to_owned() },
        )));
        assert!(gone.is_flow_gone());
        assert_eq!(
            gone.user_message(),
            "This workflow has ended or expired. Start it again to continue."
        );

        let listener = DispatchError::from(EventHandlerError::Listener("boom".to_owned()));
        assert!(!listener.is_flow_gone());
        assert!(listener.flow_error().is_none());
        assert_eq!(
            listener.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn block_actions_payload_decodes_first_element() {
        let event = parse_interactive_payload(json!({
            "type": "block_actions",
            "user": { "id": "U1", "username": "rarity" },
            "channel": { "id": "C1" },
            "trigger_id": "T-1",
            "actions": [{
                "type": "button",
                "action_id": "wizard_RANDOM:::next",
                "block_id": "BLOCK",
                "value": "go"
            }]
        }))
        .expect("parse block action");

        let SlackEvent::BlockAction(event) = event else {
            panic!("expected block action");
        };
        assert_eq!(event.user.id, "U1");
        assert_eq!(event.actions[0].action_id, "wizard_RANDOM:::next");
        assert_eq!(event.actions[0].block_id.as_deref(), Some("BLOCK"));
        assert_eq!(event.actions[0].selected_value(), Some("go"));
        assert!(event.view.is_none());
    }

    #[test]
    fn view_submission_payload_decodes_callback_id() {
        let event = parse_interactive_payload(json!({
            "type": "view_submission",
            "user": { "id": "U2" },
            "view": {
                "id": "V1",
                "callback_id": "wizard_RANDOM:::details",
                "state": { "values": { "title": { "input": { "value": "hello" } } } }
            }
        }))
        .expect("parse view submission");

        let SlackEvent::ViewSubmission(event) = event else {
            panic!("expected view submission");
        };
        assert_eq!(event.view.callback_id, "wizard_RANDOM:::details");
        assert_eq!(event.view.private_metadata, "");
        assert_eq!(event.view.state.values["title"]["input"]["value"], "hello");
    }

    #[test]
    fn unknown_interactive_type_is_unsupported() {
        let event = parse_interactive_payload(json!({ "type": "shortcut", "callback_id": "x" }))
            .expect("parse shortcut");

        assert_eq!(event, SlackEvent::Unsupported { event_type: "shortcut".to_owned() });
    }

    #[test]
    fn payload_without_type_is_rejected() {
        assert_eq!(
            parse_interactive_payload(json!({ "actions": [] })),
            Err(PayloadError::MissingType)
        );
        assert!(matches!(
            parse_interactive_payload(json!({ "type": "block_actions" })),
            Err(PayloadError::Malformed(_))
        ));
    }

    #[test]
    fn socket_envelopes_route_by_envelope_type() {
        let envelope = SlackEnvelope::from_socket_payload(
            "env-1",
            "slash_commands",
            json!({ "command": "/wizard", "text": "", "channel_id": "C1", "user_id": "U1" }),
        )
        .expect("slash command envelope");
        assert!(matches!(
            envelope.event,
            SlackEvent::SlashCommand(ref command) if command.command == "/wizard"
        ));

        let envelope = SlackEnvelope::from_socket_payload("env-2", "events_api", json!({}))
            .expect("events envelope");
        assert_eq!(envelope.event, SlackEvent::Unsupported { event_type: "events_api".to_owned() });
    }
}
