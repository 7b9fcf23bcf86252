//! Slack interaction flows over Socket Mode
//!
//! This crate turns independent Slack deliveries into multi-step workflows:
//! - **App** (`app`) - listener tables and the dispatcher every envelope goes through
//! - **Flows** (`flow`) - `InteractionFlow`, its per-delivery `FlowContext` and `define_flow`
//! - **Events** (`events`) - typed envelopes, payload parsing, listener traits
//! - **Block Kit** (`blocks`) - the message and button types handlers respond with
//! - **Socket Mode** (`socket`) - transport loop with reconnection logic
//!
//! # Architecture
//!
//! ```text
//! Slack envelope → SocketModeRunner → App::dispatch → FlowListener
//!                                                      ↓
//!                        StateStore ← FlowContext → FlowHandler chain
//! ```
//!
//! Every interaction a flow registers is addressed as
//! `{flow}_{instance}:::{interaction}`, so one listener serves all instances of
//! a flow and the instance state is found from the identifier alone.

pub mod app;
pub mod blocks;
pub mod events;
pub mod flow;
pub mod socket;

pub use app::{ActionConstraints, App, AppBuilder, ViewConstraints};
pub use events::{EventContext, EventHandlerError, HandlerResult, Interaction, SlackEnvelope};
pub use flow::{
    define_flow, FlowContext, FlowHandler, FlowRequest, FlowState, InteractionConstraints,
    InteractionFlow,
};
