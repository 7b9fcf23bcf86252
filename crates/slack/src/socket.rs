use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use wrench_core::config::SocketConfig;
use wrench_core::flows::parse_interaction_id;

use crate::app::App;
use crate::events::{EventContext, SlackEnvelope, SlackEvent};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl From<&SocketConfig> for ReconnectPolicy {
    fn from(config: &SocketConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 1_u64 << attempt.min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms))
    }
}

#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Transport whose stream is always closed; lets the server run without a
/// live Slack connection.
#[derive(Default)]
pub struct NoopSocketTransport;

#[async_trait]
impl SocketTransport for NoopSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    app: App,
    reconnect_policy: ReconnectPolicy,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        app: App,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, app, reconnect_policy }
    }

    /// Pumps envelopes into the app until the stream closes or reconnect
    /// attempts run out. Transport failures never bubble up as errors.
    pub async fn start(&self) -> Result<()> {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(transport_error) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "socket mode transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "socket mode retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), TransportError> {
        info!(attempt, "opening socket mode transport connection");
        self.transport.connect().await?;
        info!(attempt, "socket mode transport connected");

        loop {
            let Some(envelope) = self.transport.next_envelope().await? else {
                info!(attempt, "socket mode transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };
            let (flow_id, user_id) = correlation_fields(&envelope);
            let flow_id = flow_id.as_deref().unwrap_or("none");
            let user_id = user_id.unwrap_or("unknown");

            info!(
                event_name = "ingress.slack.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                flow_id,
                user_id,
                "received slack envelope"
            );

            if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
                warn!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    flow_id,
                    error = %error,
                    "failed to acknowledge slack envelope"
                );
            } else {
                debug!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    flow_id,
                    "acknowledged slack envelope"
                );
            }

            let context = EventContext { correlation_id: envelope.envelope_id.clone() };
            match self.app.dispatch(&envelope, &context).await {
                Ok(result) => debug!(
                    event_name = "ingress.slack.dispatched",
                    envelope_id = %envelope.envelope_id,
                    flow_id,
                    result = ?result,
                    "dispatched slack envelope"
                ),
                Err(error) => warn!(
                    event_name = "ingress.slack.dispatch_failed",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    flow_id,
                    user_id,
                    flow_gone = error.is_flow_gone(),
                    user_message = error.user_message(),
                    error = %error,
                    "event dispatch failed; continuing socket loop"
                ),
            }
        }
    }
}

/// Flow instance id and user carried by an envelope, for log correlation.
fn correlation_fields(envelope: &SlackEnvelope) -> (Option<String>, Option<&str>) {
    let raw_id = match &envelope.event {
        SlackEvent::BlockAction(event) => {
            event.actions.first().map(|element| element.action_id.as_str())
        }
        SlackEvent::ViewSubmission(event) => Some(event.view.callback_id.as_str()),
        SlackEvent::SlashCommand(_) | SlackEvent::Unsupported { .. } => None,
    };
    let flow_id =
        raw_id.and_then(|raw_id| parse_interaction_id(raw_id).ok()).map(|parts| parts.flow_id);

    let user_id = match &envelope.event {
        SlackEvent::BlockAction(event) => Some(event.user.id.as_str()),
        SlackEvent::ViewSubmission(event) => Some(event.user.id.as_str()),
        SlackEvent::SlashCommand(payload) => Some(payload.user_id.as_str()),
        SlackEvent::Unsupported { .. } => None,
    };

    (flow_id, user_id)
}
