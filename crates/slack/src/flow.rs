use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use wrench_core::flows::{
    parse_interaction_id, tombstone_expiry, validate_segment, FlowId, IdGenerator, IdPattern,
    SegmentKind, StateStore,
};
use wrench_core::FlowError;

use crate::app::{ActionConstraints, App, ViewConstraints, WeakApp};
use crate::events::{
    EventContext, EventHandlerError, HandlerResult, Interaction, InteractionListener,
};

/// State carried by a flow instance between deliveries.
pub trait FlowState: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> FlowState for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Per-delivery view of one flow instance.
pub struct FlowContext<S> {
    pub state: S,
    /// Interaction name to fully-qualified interaction id for this instance.
    pub interaction_ids: BTreeMap<String, String>,
    flow_id: FlowId,
    store: Arc<dyn StateStore>,
}

impl<S: Clone> Clone for FlowContext<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            interaction_ids: self.interaction_ids.clone(),
            flow_id: self.flow_id.clone(),
            store: self.store.clone(),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for FlowContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowContext")
            .field("flow_id", &self.flow_id)
            .field("state", &self.state)
            .field("interaction_ids", &self.interaction_ids)
            .finish_non_exhaustive()
    }
}

impl<S: FlowState> FlowContext<S> {
    pub fn flow_id(&self) -> &FlowId {
        &self.flow_id
    }

    pub fn interaction_id(&self, interaction: &str) -> Option<&str> {
        self.interaction_ids.get(interaction).map(String::as_str)
    }

    /// Persists `state` for this instance and makes it the context's state.
    pub async fn set_state(
        &mut self,
        state: S,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), FlowError> {
        let value = encode_state(&self.flow_id, &state)?;
        self.store.set(&self.flow_id.encode(), value, expires_at).await?;
        debug!(
            event_name = "flow.state.saved",
            flow_id = %self.flow_id,
            expires_at = ?expires_at,
            "saved flow state"
        );
        self.state = state;
        Ok(())
    }

    /// Replaces the instance state with an already-expired tombstone.
    pub async fn end_flow(&self) -> Result<(), FlowError> {
        self.store.set(&self.flow_id.encode(), Value::Null, Some(tombstone_expiry())).await?;
        info!(event_name = "flow.instance.ended", flow_id = %self.flow_id, "ended flow instance");
        Ok(())
    }
}

/// Everything a flow handler receives for one matched interaction.
#[derive(Clone, Debug)]
pub struct FlowRequest<S> {
    pub interaction: Interaction,
    pub context: FlowContext<S>,
    pub event_context: EventContext,
}

#[async_trait]
pub trait FlowHandler<S: FlowState>: Send + Sync {
    async fn handle(&self, request: FlowRequest<S>) -> Result<HandlerResult, FlowError>;
}

#[async_trait]
impl<S, F, Fut> FlowHandler<S> for F
where
    S: FlowState,
    F: Fn(FlowRequest<S>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HandlerResult, FlowError>> + Send + 'static,
{
    async fn handle(&self, request: FlowRequest<S>) -> Result<HandlerResult, FlowError> {
        self(request).await
    }
}

/// Interaction name plus optional exact `block_id` / enclosing view
/// `callback_id` filters for a flow action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteractionConstraints {
    pub interaction: String,
    pub block_id: Option<String>,
    pub callback_id: Option<String>,
}

impl InteractionConstraints {
    pub fn new(interaction: impl Into<String>) -> Self {
        Self { interaction: interaction.into(), block_id: None, callback_id: None }
    }

    pub fn block_id(mut self, block_id: impl Into<String>) -> Self {
        self.block_id = Some(block_id.into());
        self
    }

    pub fn callback_id(mut self, callback_id: impl Into<String>) -> Self {
        self.callback_id = Some(callback_id.into());
        self
    }
}

impl From<&str> for InteractionConstraints {
    fn from(interaction: &str) -> Self {
        Self::new(interaction)
    }
}

impl From<String> for InteractionConstraints {
    fn from(interaction: String) -> Self {
        Self::new(interaction)
    }
}

struct FlowScope {
    name: String,
    store: Arc<dyn StateStore>,
    id_generator: Arc<dyn IdGenerator>,
    interactions: RwLock<Vec<String>>,
}

impl FlowScope {
    fn record_interaction(&self, interaction: &str) {
        let mut interactions = match self.interactions.write() {
            Ok(interactions) => interactions,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !interactions.iter().any(|known| known == interaction) {
            interactions.push(interaction.to_owned());
        }
    }

    fn interaction_names(&self) -> Vec<String> {
        match self.interactions.read() {
            Ok(interactions) => interactions.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn interaction_ids(&self, flow_id: &FlowId) -> BTreeMap<String, String> {
        self.interaction_names()
            .into_iter()
            .map(|interaction| {
                let id = flow_id.interaction_id(&interaction);
                (interaction, id)
            })
            .collect()
    }

    fn context<S>(&self, flow_id: FlowId, state: S) -> FlowContext<S> {
        FlowContext {
            state,
            interaction_ids: self.interaction_ids(&flow_id),
            flow_id,
            store: self.store.clone(),
        }
    }

    /// Resolves the instance an inbound interaction belongs to and loads its
    /// state.
    async fn load_context<S: FlowState>(
        &self,
        interaction: &Interaction,
    ) -> Result<FlowContext<S>, FlowError> {
        let parts = parse_interaction_id(interaction.correlation_id())?;
        let flow_id = parts.flow();
        let value = self.store.get(&flow_id.encode()).await?;
        let state = serde_json::from_value(value).map_err(|error| FlowError::StateCodec {
            flow_id: flow_id.encode(),
            message: error.to_string(),
        })?;

        debug!(
            event_name = "flow.state.loaded",
            flow_id = %flow_id,
            interaction = %parts.interaction,
            user_id = %interaction.user_id(),
            "loaded flow state"
        );
        Ok(self.context(flow_id, state))
    }
}

fn encode_state<S: Serialize>(flow_id: &FlowId, state: &S) -> Result<Value, FlowError> {
    serde_json::to_value(state).map_err(|error| FlowError::StateCodec {
        flow_id: flow_id.encode(),
        message: error.to_string(),
    })
}

struct FlowListener<S: FlowState> {
    scope: Arc<FlowScope>,
    handlers: Vec<Arc<dyn FlowHandler<S>>>,
}

#[async_trait]
impl<S: FlowState> InteractionListener for FlowListener<S> {
    async fn handle(
        &self,
        interaction: Interaction,
        ctx: EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let context = match self.scope.load_context::<S>(&interaction).await {
            Ok(context) => context,
            Err(error) => {
                warn!(
                    event_name = "flow.state.load_failed",
                    flow = %self.scope.name,
                    correlation_id = %ctx.correlation_id,
                    interaction_id = %interaction.correlation_id(),
                    error = %error,
                    "could not resolve flow instance for interaction"
                );
                return Err(error.into());
            }
        };
        let flow_id = context.flow_id().clone();
        let request = FlowRequest { interaction, context, event_context: ctx };

        let mut response = None;
        for handler in &self.handlers {
            let result = handler.handle(request.clone()).await.map_err(|error| {
                warn!(
                    event_name = "flow.handler.failed",
                    flow_id = %flow_id,
                    correlation_id = %request.event_context.correlation_id,
                    error = %error,
                    "flow handler failed"
                );
                error
            })?;
            if response.is_none() && matches!(result, HandlerResult::Responded(_)) {
                response = Some(result);
            }
        }

        Ok(response.unwrap_or(HandlerResult::Processed))
    }
}

/// A named multi-step workflow declared on one [`App`].
pub struct InteractionFlow<S> {
    scope: Arc<FlowScope>,
    app: WeakApp,
    _state: PhantomData<fn() -> S>,
}

impl<S> fmt::Debug for InteractionFlow<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractionFlow")
            .field("name", &self.scope.name)
            .field("interactions", &self.scope.interaction_names())
            .finish_non_exhaustive()
    }
}

impl<S: FlowState> InteractionFlow<S> {
    /// Registers `name` on the app and runs `controller` to attach handlers.
    pub fn new<C>(
        name: impl Into<String>,
        app: &App,
        controller: C,
    ) -> Result<Arc<Self>, FlowError>
    where
        C: FnOnce(&Arc<Self>, &App) -> Result<(), FlowError>,
    {
        let name = name.into();
        validate_segment(SegmentKind::FlowName, &name)?;
        app.flow_registry().register(&name)?;

        let flow = Arc::new(Self {
            scope: Arc::new(FlowScope {
                name,
                store: app.store(),
                id_generator: app.id_generator(),
                interactions: RwLock::new(Vec::new()),
            }),
            app: app.downgrade(),
            _state: PhantomData,
        });
        controller(&flow, app)?;

        info!(
            event_name = "flow.defined",
            flow = %flow.scope.name,
            interactions = ?flow.scope.interaction_names(),
            "defined interaction flow"
        );
        Ok(flow)
    }

    pub fn name(&self) -> &str {
        &self.scope.name
    }

    pub fn interaction_names(&self) -> Vec<String> {
        self.scope.interaction_names()
    }

    /// Creates a new instance with `initial_state` and no expiry.
    ///
    /// A fresh instance id is drawn from the app's generator unless one is
    /// supplied.
    pub async fn start(
        &self,
        initial_state: S,
        instance_id: Option<&str>,
    ) -> Result<FlowContext<S>, FlowError> {
        let instance_id = match instance_id {
            Some(instance_id) => instance_id.to_owned(),
            None => self.scope.id_generator.generate(),
        };
        validate_segment(SegmentKind::InstanceId, &instance_id)?;

        let flow_id = FlowId::new(self.scope.name.clone(), instance_id);
        let value = encode_state(&flow_id, &initial_state)?;
        self.scope.store.set(&flow_id.encode(), value, None).await?;

        info!(event_name = "flow.instance.started", flow_id = %flow_id, "started flow instance");
        Ok(self.scope.context(flow_id, initial_state))
    }

    pub fn action<H>(
        &self,
        constraints: impl Into<InteractionConstraints>,
        handler: H,
    ) -> Result<(), FlowError>
    where
        H: FlowHandler<S> + 'static,
    {
        let handler: Arc<dyn FlowHandler<S>> = Arc::new(handler);
        self.action_chain(constraints, vec![handler])
    }

    /// Registers `handlers` to run in order for one action interaction.
    pub fn action_chain(
        &self,
        constraints: impl Into<InteractionConstraints>,
        handlers: Vec<Arc<dyn FlowHandler<S>>>,
    ) -> Result<(), FlowError> {
        let constraints = constraints.into();
        let app = self.prepare_interaction(&constraints.interaction)?;

        let action_id =
            IdPattern::flow_interaction(self.scope.name.clone(), &constraints.interaction);
        let mut action = ActionConstraints::new(action_id);
        action.block_id = constraints.block_id;
        action.callback_id = constraints.callback_id;
        app.action(action, self.listener(handlers));
        Ok(())
    }

    pub fn view<H>(&self, interaction: impl Into<String>, handler: H) -> Result<(), FlowError>
    where
        H: FlowHandler<S> + 'static,
    {
        let handler: Arc<dyn FlowHandler<S>> = Arc::new(handler);
        self.view_chain(interaction, vec![handler])
    }

    /// Registers `handlers` to run in order for one modal submission.
    pub fn view_chain(
        &self,
        interaction: impl Into<String>,
        handlers: Vec<Arc<dyn FlowHandler<S>>>,
    ) -> Result<(), FlowError> {
        let interaction = interaction.into();
        let app = self.prepare_interaction(&interaction)?;

        let callback_id = IdPattern::flow_interaction(self.scope.name.clone(), &interaction);
        app.view(ViewConstraints::new(callback_id), self.listener(handlers));
        Ok(())
    }

    fn prepare_interaction(&self, interaction: &str) -> Result<App, FlowError> {
        validate_segment(SegmentKind::Interaction, interaction)?;
        let app =
            self.app.upgrade().ok_or_else(|| FlowError::AppReleased(self.scope.name.clone()))?;
        self.scope.record_interaction(interaction);
        Ok(app)
    }

    fn listener(&self, handlers: Vec<Arc<dyn FlowHandler<S>>>) -> FlowListener<S> {
        FlowListener { scope: self.scope.clone(), handlers }
    }
}

/// Captures a flow definition to be attached to an [`App`] later.
pub fn define_flow<S, C>(
    name: impl Into<String>,
    controller: C,
) -> impl FnOnce(&App) -> Result<Arc<InteractionFlow<S>>, FlowError>
where
    S: FlowState,
    C: FnOnce(&Arc<InteractionFlow<S>>, &App) -> Result<(), FlowError>,
{
    let name = name.into();
    move |app: &App| InteractionFlow::new(name, app, controller)
}
