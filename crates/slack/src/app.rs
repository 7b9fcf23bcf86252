use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tracing::{debug, warn};
use wrench_core::{
    FlowRegistry, IdGenerator, IdPattern, MemoryStateStore, StateStore, UuidGenerator,
};

use crate::events::{
    BlockActionElement, BlockActionEvent, CommandListener, DispatchError, EventContext,
    HandlerResult, Interaction, InteractionListener, SlackEnvelope, SlackEvent,
};

/// Constraints a block action must satisfy to reach a listener.
///
/// `action_id` is matched against the first element of the action; `block_id`
/// and `callback_id` (of the enclosing modal) are exact matches when present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionConstraints {
    pub action_id: IdPattern,
    pub block_id: Option<String>,
    pub callback_id: Option<String>,
}

impl ActionConstraints {
    pub fn new(action_id: impl Into<IdPattern>) -> Self {
        Self { action_id: action_id.into(), block_id: None, callback_id: None }
    }

    pub fn block_id(mut self, block_id: impl Into<String>) -> Self {
        self.block_id = Some(block_id.into());
        self
    }

    pub fn callback_id(mut self, callback_id: impl Into<String>) -> Self {
        self.callback_id = Some(callback_id.into());
        self
    }

    fn matches(&self, event: &BlockActionEvent, element: &BlockActionElement) -> bool {
        if !self.action_id.matches(&element.action_id) {
            return false;
        }
        if let Some(block_id) = &self.block_id {
            if element.block_id.as_deref() != Some(block_id.as_str()) {
                return false;
            }
        }
        if let Some(callback_id) = &self.callback_id {
            let view_callback = event.view.as_ref().map(|view| view.callback_id.as_str());
            if view_callback != Some(callback_id.as_str()) {
                return false;
            }
        }
        true
    }
}

impl From<&str> for ActionConstraints {
    fn from(action_id: &str) -> Self {
        Self::new(action_id)
    }
}

impl From<IdPattern> for ActionConstraints {
    fn from(action_id: IdPattern) -> Self {
        Self::new(action_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewConstraints {
    pub callback_id: IdPattern,
}

impl ViewConstraints {
    pub fn new(callback_id: impl Into<IdPattern>) -> Self {
        Self { callback_id: callback_id.into() }
    }
}

impl From<&str> for ViewConstraints {
    fn from(callback_id: &str) -> Self {
        Self::new(callback_id)
    }
}

impl From<IdPattern> for ViewConstraints {
    fn from(callback_id: IdPattern) -> Self {
        Self::new(callback_id)
    }
}

struct ActionRoute {
    constraints: ActionConstraints,
    listener: Arc<dyn InteractionListener>,
}

struct ViewRoute {
    constraints: ViewConstraints,
    listener: Arc<dyn InteractionListener>,
}

struct CommandRoute {
    command: String,
    listener: Arc<dyn CommandListener>,
}

#[derive(Default)]
struct Listeners {
    actions: Vec<ActionRoute>,
    views: Vec<ViewRoute>,
    commands: Vec<CommandRoute>,
}

impl Listeners {
    fn len(&self) -> usize {
        self.actions.len() + self.views.len() + self.commands.len()
    }
}

struct AppInner {
    listeners: RwLock<Listeners>,
    flows: FlowRegistry,
    store: Arc<dyn StateStore>,
    id_generator: Arc<dyn IdGenerator>,
}

/// Shared handle to one Slack application: its listener tables, declared
/// flows, state store and instance id generator.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("listeners", &self.listener_count())
            .field("flows", &self.inner.flows)
            .finish_non_exhaustive()
    }
}

impl Default for App {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl App {
    pub fn new(store: Arc<dyn StateStore>, id_generator: Arc<dyn IdGenerator>) -> Self {
        Self {
            inner: Arc::new(AppInner {
                listeners: RwLock::new(Listeners::default()),
                flows: FlowRegistry::new(),
                store,
                id_generator,
            }),
        }
    }

    pub fn builder() -> AppBuilder {
        AppBuilder::default()
    }

    pub fn action<L>(&self, constraints: impl Into<ActionConstraints>, listener: L)
    where
        L: InteractionListener + 'static,
    {
        let constraints = constraints.into();
        debug!(
            event_name = "app.listener.registered",
            channel = "block_action",
            constraints = ?constraints,
            "registered action listener"
        );
        self.listeners_mut()
            .actions
            .push(ActionRoute { constraints, listener: Arc::new(listener) });
    }

    pub fn view<L>(&self, constraints: impl Into<ViewConstraints>, listener: L)
    where
        L: InteractionListener + 'static,
    {
        let constraints = constraints.into();
        debug!(
            event_name = "app.listener.registered",
            channel = "view_submission",
            constraints = ?constraints,
            "registered view listener"
        );
        self.listeners_mut().views.push(ViewRoute { constraints, listener: Arc::new(listener) });
    }

    pub fn command<L>(&self, command: impl Into<String>, listener: L)
    where
        L: CommandListener + 'static,
    {
        let command = command.into();
        debug!(
            event_name = "app.listener.registered",
            channel = "slash_command",
            command = %command,
            "registered command listener"
        );
        self.listeners_mut().commands.push(CommandRoute { command, listener: Arc::new(listener) });
    }

    /// Runs every listener matching the envelope in registration order.
    ///
    /// The first `Responded` result is returned; otherwise `Processed` when at
    /// least one listener ran and `Ignored` when none matched. A listener error
    /// stops the remaining listeners.
    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        match &envelope.event {
            SlackEvent::SlashCommand(payload) => {
                let listeners: Vec<_> = self
                    .listeners()
                    .commands
                    .iter()
                    .filter(|route| route.command == payload.command)
                    .map(|route| route.listener.clone())
                    .collect();

                let mut outcome = Outcome::default();
                for listener in listeners {
                    outcome.record(listener.handle(payload.clone(), ctx.clone()).await?);
                }
                Ok(outcome.finish(envelope, ctx))
            }
            SlackEvent::BlockAction(event) => {
                let Some(element) = event.actions.first() else {
                    warn!(
                        event_name = "app.dispatch.empty_action",
                        correlation_id = %ctx.correlation_id,
                        "block action carried no elements"
                    );
                    return Ok(HandlerResult::Ignored);
                };
                let listeners: Vec<_> = self
                    .listeners()
                    .actions
                    .iter()
                    .filter(|route| route.constraints.matches(event, element))
                    .map(|route| route.listener.clone())
                    .collect();

                let interaction =
                    Interaction::Action { event: event.clone(), element: element.clone() };
                self.run_interaction(listeners, interaction, envelope, ctx).await
            }
            SlackEvent::ViewSubmission(event) => {
                let listeners: Vec<_> = self
                    .listeners()
                    .views
                    .iter()
                    .filter(|route| route.constraints.callback_id.matches(&event.view.callback_id))
                    .map(|route| route.listener.clone())
                    .collect();

                self.run_interaction(listeners, Interaction::View(event.clone()), envelope, ctx)
                    .await
            }
            SlackEvent::Unsupported { event_type } => {
                debug!(
                    event_name = "app.dispatch.unsupported",
                    correlation_id = %ctx.correlation_id,
                    event_type = %event_type,
                    "ignoring unsupported slack event"
                );
                Ok(HandlerResult::Ignored)
            }
        }
    }

    async fn run_interaction(
        &self,
        listeners: Vec<Arc<dyn InteractionListener>>,
        interaction: Interaction,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let mut outcome = Outcome::default();
        for listener in listeners {
            outcome.record(listener.handle(interaction.clone(), ctx.clone()).await?);
        }
        Ok(outcome.finish(envelope, ctx))
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    pub fn flow_registry(&self) -> &FlowRegistry {
        &self.inner.flows
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        self.inner.store.clone()
    }

    pub fn id_generator(&self) -> Arc<dyn IdGenerator> {
        self.inner.id_generator.clone()
    }

    pub fn downgrade(&self) -> WeakApp {
        WeakApp { inner: Arc::downgrade(&self.inner) }
    }

    fn listeners(&self) -> RwLockReadGuard<'_, Listeners> {
        match self.inner.listeners.read() {
            Ok(listeners) => listeners,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn listeners_mut(&self) -> RwLockWriteGuard<'_, Listeners> {
        match self.inner.listeners.write() {
            Ok(listeners) => listeners,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Non-owning handle, held by flows so that listeners capturing a flow do not
/// keep the app alive.
#[derive(Clone)]
pub struct WeakApp {
    inner: Weak<AppInner>,
}

impl WeakApp {
    pub fn upgrade(&self) -> Option<App> {
        self.inner.upgrade().map(|inner| App { inner })
    }
}

impl fmt::Debug for WeakApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakApp").field("alive", &(self.inner.strong_count() > 0)).finish()
    }
}

#[derive(Default)]
pub struct AppBuilder {
    store: Option<Arc<dyn StateStore>>,
    id_generator: Option<Arc<dyn IdGenerator>>,
}

impl AppBuilder {
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(id_generator);
        self
    }

    pub fn build(self) -> App {
        App::new(
            self.store.unwrap_or_else(|| Arc::new(MemoryStateStore::new())),
            self.id_generator.unwrap_or_else(|| Arc::new(UuidGenerator)),
        )
    }
}

#[derive(Default)]
struct Outcome {
    matched: usize,
    response: Option<HandlerResult>,
}

impl Outcome {
    fn record(&mut self, result: HandlerResult) {
        if matches!(result, HandlerResult::Ignored) {
            return;
        }
        self.matched += 1;
        if self.response.is_none() && matches!(result, HandlerResult::Responded(_)) {
            self.response = Some(result);
        }
    }

    fn finish(self, envelope: &SlackEnvelope, ctx: &EventContext) -> HandlerResult {
        debug!(
            event_name = "app.dispatch.completed",
            envelope_id = %envelope.envelope_id,
            correlation_id = %ctx.correlation_id,
            event_type = ?envelope.event.event_type(),
            handled = self.matched,
            responded = self.response.is_some(),
            "dispatched slack event"
        );
        match self.response {
            Some(response) => response,
            None if self.matched > 0 => HandlerResult::Processed,
            None => HandlerResult::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use wrench_core::IdPattern;

    use super::{ActionConstraints, App};
    use crate::blocks::plain_message;
    use crate::events::{
        BlockActionElement, BlockActionEvent, DispatchError, EventContext, EventHandlerError,
        HandlerResult, Interaction, SlackEnvelope, SlackEvent, SlackUser, SlashCommandPayload,
        ViewPayload, ViewState, ViewSubmissionEvent,
    };

    fn block_action(action_id: &str, block_id: Option<&str>) -> SlackEnvelope {
        SlackEnvelope {
            envelope_id: "env-action".to_owned(),
            event: SlackEvent::BlockAction(BlockActionEvent {
                user: SlackUser { id: "U1".to_owned(), username: None },
                channel: None,
                trigger_id: None,
                actions: vec![BlockActionElement {
                    action_id: action_id.to_owned(),
                    block_id: block_id.map(str::to_owned),
                    value: None,
                    selected_option: None,
                }],
                view: None,
            }),
        }
    }

    fn view_submission(callback_id: &str) -> SlackEnvelope {
        SlackEnvelope {
            envelope_id: "env-view".to_owned(),
            event: SlackEvent::ViewSubmission(ViewSubmissionEvent {
                user: SlackUser { id: "U1".to_owned(), username: None },
                trigger_id: None,
                view: ViewPayload {
                    id: None,
                    callback_id: callback_id.to_owned(),
                    private_metadata: String::new(),
                    state: ViewState::default(),
                },
            }),
        }
    }

    #[tokio::test]
    async fn dispatch_returns_ignored_without_matching_listener() {
        let app = App::default();
        app.action("other", |_: Interaction, _: EventContext| async {
            Ok(HandlerResult::Processed)
        });

        let result = app
            .dispatch(&block_action("approve", None), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
    }

    #[tokio::test]
    async fn all_matching_listeners_run_in_registration_order() {
        let app = App::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second"] {
            let order = order.clone();
            app.action("approve", move |_: Interaction, _: EventContext| {
                order.lock().expect("order lock").push(label);
                async { Ok(HandlerResult::Processed) }
            });
        }

        let result = app
            .dispatch(&block_action("approve", None), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Processed);
        assert_eq!(*order.lock().expect("order lock"), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn first_response_wins() {
        let app = App::default();
        app.action("approve", |_: Interaction, _: EventContext| async {
            Ok(HandlerResult::Processed)
        });
        app.action("approve", |_: Interaction, _: EventContext| async {
            Ok(HandlerResult::Responded(plain_message("first")))
        });
        app.action("approve", |_: Interaction, _: EventContext| async {
            Ok(HandlerResult::Responded(plain_message("second")))
        });

        let result = app
            .dispatch(&block_action("approve", None), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Responded(plain_message("first")));
    }

    #[tokio::test]
    async fn listener_error_aborts_dispatch() {
        let app = App::default();
        let later_calls = Arc::new(AtomicUsize::new(0));
        app.action("approve", |_: Interaction, _: EventContext| async {
            Err(EventHandlerError::Listener("boom".to_owned()))
        });
        let counter = later_calls.clone();
        app.action("approve", move |_: Interaction, _: EventContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(HandlerResult::Processed) }
        });

        let error = app
            .dispatch(&block_action("approve", None), &EventContext::default())
            .await
            .expect_err("listener failure");

        assert_eq!(error, DispatchError::Handler(EventHandlerError::Listener("boom".to_owned())));
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn block_id_constraint_filters_actions() {
        let app = App::default();
        app.action(
            ActionConstraints::new("approve").block_id("review"),
            |_: Interaction, _: EventContext| async { Ok(HandlerResult::Processed) },
        );

        let other_block = app
            .dispatch(&block_action("approve", Some("summary")), &EventContext::default())
            .await
            .expect("dispatch");
        let review_block = app
            .dispatch(&block_action("approve", Some("review")), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(other_block, HandlerResult::Ignored);
        assert_eq!(review_block, HandlerResult::Processed);
    }

    #[tokio::test]
    async fn flow_interaction_pattern_ignores_instance_id() {
        let app = App::default();
        app.action(
            IdPattern::flow_interaction("wizard", "next"),
            |_: Interaction, _: EventContext| async { Ok(HandlerResult::Processed) },
        );

        let matched = app
            .dispatch(&block_action("wizard_abc:::next", None), &EventContext::default())
            .await
            .expect("dispatch");
        let other_flow = app
            .dispatch(&block_action("survey_abc:::next", None), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(matched, HandlerResult::Processed);
        assert_eq!(other_flow, HandlerResult::Ignored);
    }

    #[tokio::test]
    async fn views_and_commands_route_on_their_own_channels() {
        let app = App::default();
        app.view("feedback", |interaction: Interaction, _: EventContext| async move {
            assert!(matches!(interaction, Interaction::View(_)));
            Ok(HandlerResult::Processed)
        });
        app.command("/wizard", |command: SlashCommandPayload, _: EventContext| async move {
            Ok(HandlerResult::Responded(plain_message(format!("hi {}", command.user_id))))
        });

        let view = app
            .dispatch(&view_submission("feedback"), &EventContext::default())
            .await
            .expect("dispatch view");
        assert_eq!(view, HandlerResult::Processed);

        let action = app
            .dispatch(&block_action("feedback", None), &EventContext::default())
            .await
            .expect("dispatch action");
        assert_eq!(action, HandlerResult::Ignored);

        let command = SlackEnvelope {
            envelope_id: "env-cmd".to_owned(),
            event: SlackEvent::SlashCommand(SlashCommandPayload {
                command: "/wizard".to_owned(),
                text: String::new(),
                channel_id: "C1".to_owned(),
                user_id: "U9".to_owned(),
                trigger_id: None,
            }),
        };
        let result = app.dispatch(&command, &EventContext::default()).await.expect("dispatch");
        assert_eq!(result, HandlerResult::Responded(plain_message("hi U9")));
        assert_eq!(app.listener_count(), 2);
    }

    #[test]
    fn weak_handle_does_not_keep_app_alive() {
        let app = App::default();
        let weak = app.downgrade();
        assert!(weak.upgrade().is_some());

        drop(app);
        assert!(weak.upgrade().is_none());
    }
}
