use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use wrench_core::FlowError;
use wrench_slack::blocks::{
    plain_message, ButtonElement, ButtonStyle, MessageBuilder, MessageTemplate, TextObject,
};
use wrench_slack::events::SlashCommandPayload;
use wrench_slack::{
    define_flow, App, EventContext, EventHandlerError, FlowContext, FlowRequest, HandlerResult,
    Interaction, InteractionFlow,
};

pub const FLOW_NAME: &str = "wizard";
pub const COMMAND: &str = "/wizard";
pub const LAST_STEP: u32 = 3;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WizardState {
    pub step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Declares the demo wizard: `/wizard` starts an instance, `next` advances it,
/// `cancel` ends it and the `details` modal records a title.
///
/// Each `next` refreshes the instance state for `ttl` when one is configured.
pub fn define_wizard(
    ttl: Option<Duration>,
) -> impl FnOnce(&App) -> Result<Arc<InteractionFlow<WizardState>>, FlowError> {
    define_flow(FLOW_NAME, move |flow: &Arc<InteractionFlow<WizardState>>, app: &App| {
        flow.action("next", move |request: FlowRequest<WizardState>| next_step(request, ttl))?;
        flow.action("cancel", cancel)?;
        flow.view("details", save_details)?;

        let starter = flow.clone();
        app.command(COMMAND, move |command: SlashCommandPayload, _: EventContext| {
            start_wizard(starter.clone(), command)
        });
        Ok(())
    })
}

async fn start_wizard(
    flow: Arc<InteractionFlow<WizardState>>,
    command: SlashCommandPayload,
) -> Result<HandlerResult, EventHandlerError> {
    let context = flow.start(WizardState { step: 1, title: None }, None).await?;
    info!(
        event_name = "wizard.started",
        flow_id = %context.flow_id(),
        user_id = %command.user_id,
        channel_id = %command.channel_id,
        "wizard started from slash command"
    );
    Ok(HandlerResult::Responded(step_message(&context)))
}

async fn next_step(
    mut request: FlowRequest<WizardState>,
    ttl: Option<Duration>,
) -> Result<HandlerResult, FlowError> {
    let current = request.context.state.clone();
    if current.step >= LAST_STEP {
        request.context.end_flow().await?;
        return Ok(HandlerResult::Responded(plain_message(summary(&current))));
    }

    let next = WizardState { step: current.step + 1, ..current };
    request.context.set_state(next, ttl.map(|ttl| Utc::now() + ttl)).await?;
    Ok(HandlerResult::Responded(step_message(&request.context)))
}

async fn cancel(request: FlowRequest<WizardState>) -> Result<HandlerResult, FlowError> {
    request.context.end_flow().await?;
    Ok(HandlerResult::Responded(plain_message("Wizard cancelled.")))
}

async fn save_details(mut request: FlowRequest<WizardState>) -> Result<HandlerResult, FlowError> {
    let Interaction::View(submission) = &request.interaction else {
        return Ok(HandlerResult::Ignored);
    };
    let title = submission.view.state.values["details"]["title"]["value"]
        .as_str()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_owned);
    let Some(title) = title else {
        return Err(FlowError::handler("details form submitted without a title"));
    };

    let next = WizardState { title: Some(title), ..request.context.state.clone() };
    request.context.set_state(next, None).await?;
    Ok(HandlerResult::Responded(step_message(&request.context)))
}

fn step_message(context: &FlowContext<WizardState>) -> MessageTemplate {
    let state = &context.state;
    let heading = match &state.title {
        Some(title) => format!("*{title}* · step {} of {LAST_STEP}", state.step),
        None => format!("Step {} of {LAST_STEP}", state.step),
    };
    let next_label = if state.step >= LAST_STEP { "Finish" } else { "Next" };
    let buttons = [
        ButtonElement::for_interaction(&context.interaction_ids, "next", next_label)
            .map(|button| button.style(ButtonStyle::Primary)),
        ButtonElement::for_interaction(&context.interaction_ids, "cancel", "Cancel")
            .map(|button| button.style(ButtonStyle::Danger)),
    ];

    MessageBuilder::new(heading.clone())
        .section(TextObject::mrkdwn(heading))
        .actions(Some("wizard-actions"), buttons.into_iter().flatten())
        .context(TextObject::plain(format!("Flow {}", context.flow_id())))
        .build()
}

fn summary(state: &WizardState) -> String {
    match &state.title {
        Some(title) => format!("Wizard `{title}` finished after {} steps.", state.step),
        None => format!("Wizard finished after {} steps.", state.step),
    }
}
