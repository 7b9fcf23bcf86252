use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::json;
use wrench_core::flows::{MemoryStateStore, StoreError};
use wrench_core::FlowError;
use wrench_slack::blocks::{plain_message, ButtonElement, MessageBuilder, TextObject};
use wrench_slack::events::{DispatchError, SlashCommandPayload};
use wrench_slack::{
    define_flow, App, EventContext, EventHandlerError, FlowRequest, HandlerResult,
    InteractionFlow, SlackEnvelope,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct WizardState {
    step: u32,
}

type Seen = Arc<Mutex<Vec<WizardState>>>;

fn scripted_app() -> App {
    App::new(Arc::new(MemoryStateStore::new()), Arc::new(|| "RANDOM".to_owned()))
}

fn install_wizard(app: &App, seen: Seen) -> Arc<InteractionFlow<WizardState>> {
    define_flow("wizard", move |flow: &Arc<InteractionFlow<WizardState>>, app: &App| {
        flow.action("next", move |mut request: FlowRequest<WizardState>| {
            let seen = seen.clone();
            async move {
                seen.lock().expect("seen lock").push(request.context.state.clone());
                let step = request.context.state.step + 1;
                request.context.set_state(WizardState { step }, None).await?;
                Ok(HandlerResult::Responded(plain_message(format!("step {step}"))))
            }
        })?;
        flow.action("cancel", |request: FlowRequest<WizardState>| async move {
            request.context.end_flow().await?;
            Ok(HandlerResult::Responded(plain_message("cancelled")))
        })?;

        let starter = flow.clone();
        app.command("/wizard", move |_: SlashCommandPayload, _: EventContext| {
            let flow = starter.clone();
            async move {
                let context = flow
                    .start(WizardState { step: 1 }, None)
                    .await
                    .map_err(EventHandlerError::from)?;
                let buttons = ["next", "cancel"].into_iter().filter_map(|name| {
                    context.interaction_id(name).map(|id| ButtonElement::new(id, name))
                });
                Ok(HandlerResult::Responded(
                    MessageBuilder::new("step 1")
                        .section(TextObject::plain("step 1"))
                        .actions(Some("wizard"), buttons)
                        .build(),
                ))
            }
        });
        Ok(())
    })(app)
    .expect("wizard flow should be defined")
}

fn envelope(event_type: &str, payload: serde_json::Value) -> SlackEnvelope {
    SlackEnvelope::from_socket_payload("env", event_type, payload).expect("valid payload")
}

fn click(action_id: &str) -> SlackEnvelope {
    envelope(
        "interactive",
        json!({
            "type": "block_actions",
            "user": { "id": "U1" },
            "actions": [{ "type": "button", "action_id": action_id, "block_id": "wizard" }]
        }),
    )
}

#[tokio::test]
async fn wizard_walks_through_steps_from_a_slash_command() {
    let app = scripted_app();
    let seen = Seen::default();
    install_wizard(&app, seen.clone());

    let started = app
        .dispatch(
            &envelope(
                "slash_commands",
                json!({ "command": "/wizard", "channel_id": "C1", "user_id": "U1" }),
            ),
            &EventContext::default(),
        )
        .await
        .expect("start wizard");

    let HandlerResult::Responded(message) = started else {
        panic!("expected the wizard to answer the command");
    };
    let rendered = serde_json::to_value(&message).expect("serialize message");
    assert_eq!(rendered["blocks"][1]["elements"][0]["action_id"], "wizard_RANDOM:::next");
    assert_eq!(rendered["blocks"][1]["elements"][1]["action_id"], "wizard_RANDOM:::cancel");

    let first = app
        .dispatch(&click("wizard_RANDOM:::next"), &EventContext::default())
        .await
        .expect("first next");
    let second = app
        .dispatch(&click("wizard_RANDOM:::next"), &EventContext::default())
        .await
        .expect("second next");

    assert_eq!(first, HandlerResult::Responded(plain_message("step 2")));
    assert_eq!(second, HandlerResult::Responded(plain_message("step 3")));
    assert_eq!(
        *seen.lock().expect("seen lock"),
        vec![WizardState { step: 1 }, WizardState { step: 2 }]
    );
}

#[tokio::test]
async fn cancelled_wizard_rejects_further_clicks() {
    let app = scripted_app();
    let flow = install_wizard(&app, Seen::default());
    flow.start(WizardState { step: 1 }, None).await.expect("start");

    let cancelled = app
        .dispatch(&click("wizard_RANDOM:::cancel"), &EventContext::default())
        .await
        .expect("cancel");
    assert_eq!(cancelled, HandlerResult::Responded(plain_message("cancelled")));

    let error = app
        .dispatch(&click("wizard_RANDOM:::next"), &EventContext::default())
        .await
        .expect_err("ended flow");
    let DispatchError::Handler(EventHandlerError::Flow(FlowError::State(store_error))) = error
    else {
        panic!("expected a state error for the ended flow");
    };
    assert!(matches!(store_error, StoreError::Expired { .. } | StoreError::NotFound { .. }));
}

#[tokio::test]
async fn other_flows_never_see_wizard_clicks() {
    let app = scripted_app();
    install_wizard(&app, Seen::default());
    let survey_calls = Seen::default();
    let recorded = survey_calls.clone();
    let survey =
        define_flow("survey", move |flow: &Arc<InteractionFlow<WizardState>>, _: &App| {
            flow.action("next", move |request: FlowRequest<WizardState>| {
                recorded.lock().expect("survey lock").push(request.context.state.clone());
                async { Ok(HandlerResult::Processed) }
            })
        })(&app)
        .expect("survey flow");

    survey.start(WizardState { step: 7 }, Some("other")).await.expect("start survey");
    let wizard_click = app
        .dispatch(&click("wizard_missing:::next"), &EventContext::default())
        .await
        .expect_err("wizard instance was never started");
    let survey_click = app
        .dispatch(&click("survey_other:::next"), &EventContext::default())
        .await
        .expect("survey click");

    let DispatchError::Handler(EventHandlerError::Flow(wizard_error)) = wizard_click else {
        panic!("expected a flow error for the unknown wizard instance");
    };
    assert!(matches!(wizard_error, FlowError::State(StoreError::NotFound { .. })));
    assert_eq!(survey_click, HandlerResult::Processed);
    assert_eq!(*survey_calls.lock().expect("survey lock"), vec![WizardState { step: 7 }]);
}
