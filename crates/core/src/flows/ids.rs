use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Joins a flow name to its instance id.
pub const FLOW_ID_SEPARATOR: &str = "_";

/// Joins an encoded flow id to an interaction name.
pub const INTERACTION_SEPARATOR: &str = ":::";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IdentifierParseError {
    #[error("flow id `{0}` is missing the `_` separator")]
    MissingFlowSeparator(String),
    #[error("interaction id `{0}` is missing the `:::` separator")]
    MissingInteractionSeparator(String),
    #[error("identifier `{0}` has an empty segment")]
    EmptySegment(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    FlowName,
    InstanceId,
    Interaction,
}

impl SegmentKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::FlowName => "flow name",
            Self::InstanceId => "instance id",
            Self::Interaction => "interaction name",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{} `{value}` must be non-empty and must not contain `_` or `:`", .kind.label())]
pub struct InvalidSegmentError {
    pub kind: SegmentKind,
    pub value: String,
}

/// Rejects segments that would make an encoded identifier ambiguous.
///
/// Any `:` is refused, not just a full `:::`, since a segment ending or
/// starting with `:` shifts where the interaction separator is found.
pub fn validate_segment(kind: SegmentKind, value: &str) -> Result<(), InvalidSegmentError> {
    if value.is_empty() || value.contains(FLOW_ID_SEPARATOR) || value.contains(':') {
        return Err(InvalidSegmentError { kind, value: value.to_owned() });
    }
    Ok(())
}

/// Identifies one running instance of a flow.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FlowId {
    pub name: String,
    pub instance_id: String,
}

impl FlowId {
    pub fn new(name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self { name: name.into(), instance_id: instance_id.into() }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn interaction_id(&self, interaction: &str) -> String {
        create_interaction_id(&self.encode(), interaction)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{FLOW_ID_SEPARATOR}{}", self.name, self.instance_id)
    }
}

impl std::str::FromStr for FlowId {
    type Err = IdentifierParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts = parse_flow_id(value)?;
        Ok(Self { name: parts.name, instance_id: parts.instance_id })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowIdParts {
    pub flow_id: String,
    pub name: String,
    pub instance_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteractionIdParts {
    pub flow_id: String,
    pub name: String,
    pub instance_id: String,
    pub interaction: String,
    pub interaction_id: String,
}

impl InteractionIdParts {
    pub fn flow(&self) -> FlowId {
        FlowId::new(self.name.clone(), self.instance_id.clone())
    }
}

pub fn create_flow_id(name: &str, instance_id: &str) -> FlowId {
    FlowId::new(name, instance_id)
}

pub fn parse_flow_id(flow_id: &str) -> Result<FlowIdParts, IdentifierParseError> {
    let (name, instance_id) = flow_id
        .split_once(FLOW_ID_SEPARATOR)
        .ok_or_else(|| IdentifierParseError::MissingFlowSeparator(flow_id.to_owned()))?;
    if name.is_empty() || instance_id.is_empty() {
        return Err(IdentifierParseError::EmptySegment(flow_id.to_owned()));
    }

    Ok(FlowIdParts {
        flow_id: flow_id.to_owned(),
        name: name.to_owned(),
        instance_id: instance_id.to_owned(),
    })
}

pub fn create_interaction_id(flow_id: &str, interaction: &str) -> String {
    format!("{flow_id}{INTERACTION_SEPARATOR}{interaction}")
}

pub fn parse_interaction_id(
    interaction_id: &str,
) -> Result<InteractionIdParts, IdentifierParseError> {
    let (flow_id, interaction) = interaction_id.split_once(INTERACTION_SEPARATOR).ok_or_else(
        || IdentifierParseError::MissingInteractionSeparator(interaction_id.to_owned()),
    )?;
    if interaction.is_empty() {
        return Err(IdentifierParseError::EmptySegment(interaction_id.to_owned()));
    }
    let flow = parse_flow_id(flow_id)?;

    Ok(InteractionIdParts {
        flow_id: flow.flow_id,
        name: flow.name,
        instance_id: flow.instance_id,
        interaction: interaction.to_owned(),
        interaction_id: interaction_id.to_owned(),
    })
}

/// Matches an inbound identifier either verbatim or structurally against a
/// flow interaction with any instance id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdPattern {
    Exact(String),
    FlowInteraction { flow: String, interaction: String },
}

impl IdPattern {
    pub fn exact(value: impl Into<String>) -> Self {
        Self::Exact(value.into())
    }

    pub fn flow_interaction(flow: impl Into<String>, interaction: impl Into<String>) -> Self {
        Self::FlowInteraction { flow: flow.into(), interaction: interaction.into() }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(value) => value == candidate,
            Self::FlowInteraction { flow, interaction } => parse_interaction_id(candidate)
                .map(|parts| &parts.name == flow && &parts.interaction == interaction)
                .unwrap_or(false),
        }
    }
}

impl From<&str> for IdPattern {
    fn from(value: &str) -> Self {
        Self::exact(value)
    }
}

impl From<String> for IdPattern {
    fn from(value: String) -> Self {
        Self::Exact(value)
    }
}

/// Source of fresh instance ids for `start`.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn generate(&self) -> String {
        self()
    }
}
