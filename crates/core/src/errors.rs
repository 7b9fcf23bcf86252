use thiserror::Error;

use crate::flows::{DuplicateFlowError, IdentifierParseError, InvalidSegmentError, StoreError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error(transparent)]
    DuplicateFlow(#[from] DuplicateFlowError),
    #[error(transparent)]
    IdentifierParse(#[from] IdentifierParseError),
    #[error(transparent)]
    InvalidSegment(#[from] InvalidSegmentError),
    #[error(transparent)]
    State(#[from] StoreError),
    #[error("state for flow `{flow_id}` could not be converted: {message}")]
    StateCodec { flow_id: String, message: String },
    #[error("application for flow `{0}` is no longer running")]
    AppReleased(String),
    #[error("flow handler failure: {0}")]
    Handler(String),
}

impl FlowError {
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// True when the flow instance ended or expired before this delivery.
    pub fn is_flow_gone(&self) -> bool {
        matches!(self, Self::State(error) if error.is_absent())
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::State(StoreError::NotFound { .. } | StoreError::Expired { .. }) => {
                "This workflow has ended or expired. Start it again to continue."
            }
            Self::State(StoreError::Backend(_)) => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::IdentifierParse(_) | Self::Handler(_) => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::DuplicateFlow(_)
            | Self::InvalidSegment(_)
            | Self::StateCodec { .. }
            | Self::AppReleased(_) => "An unexpected internal error occurred.",
        }
    }
}
