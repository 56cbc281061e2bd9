use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tally_core::config::ChatConfig;
use thiserror::Error;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::events::{ChatEnvelope, EventContext, EventDispatcher, HandlerResult};
use crate::replies::OutboundMessage;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunnerError {
    #[error("transport gave up after {attempts} connection attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: TransportError },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl From<&ChatConfig> for ReconnectPolicy {
    fn from(config: &ChatConfig) -> Self {
        Self {
            max_retries: config.max_reconnect_attempts,
            base_delay_ms: config.reconnect_base_delay_ms,
            max_delay_ms: config.reconnect_max_delay_ms,
        }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `Ok(None)` once the stream is closed for good.
    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl ChatTransport for NoopTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, _message: &OutboundMessage) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Pumps envelopes from a transport into the dispatcher.
///
/// Envelopes from different senders are handled in parallel, bounded by
/// `max_in_flight`; envelopes from one sender are handled in arrival order.
pub struct TransportRunner {
    transport: Arc<dyn ChatTransport>,
    dispatcher: Arc<EventDispatcher>,
    reconnect_policy: ReconnectPolicy,
    max_in_flight: usize,
}

impl TransportRunner {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        dispatcher: Arc<EventDispatcher>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy, max_in_flight: 64 }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub async fn start(&self) -> Result<(), RunnerError> {
        let mut attempt = 0;
        loop {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(transport_error) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "chat transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        return Err(RunnerError::RetriesExhausted {
                            attempts: attempt + 1,
                            last_error: transport_error,
                        });
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), TransportError> {
        info!(attempt, "opening chat transport connection");
        self.transport.connect().await?;
        info!(attempt, "chat transport connected");

        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();
        let mut tails: HashMap<String, oneshot::Receiver<()>> = HashMap::new();

        let outcome = loop {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(error) = joined {
                    warn!(error = %error, "chat dispatch task panicked");
                }
            }
            tails.retain(|_, done| matches!(done.try_recv(), Err(oneshot::error::TryRecvError::Empty)));

            let envelope = match self.transport.next_envelope().await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => {
                    info!(attempt, "chat transport stream closed");
                    break Ok(());
                }
                Err(error) => break Err(error),
            };

            info!(
                event_name = "ingress.chat.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                "received chat envelope"
            );
            self.acknowledge(&envelope).await;

            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break Err(TransportError::Receive("dispatch permits closed".to_owned()));
            };

            let lane = envelope.event.sender_id().unwrap_or(&envelope.envelope_id).to_owned();
            let (done, finished) = oneshot::channel();
            let previous = tails.insert(lane, finished);
            let transport = Arc::clone(&self.transport);
            let dispatcher = Arc::clone(&self.dispatcher);

            tasks.spawn(async move {
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                deliver(transport.as_ref(), &dispatcher, &envelope).await;
                drop(permit);
                let _ = done.send(());
            });
        };

        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                warn!(error = %error, "chat dispatch task panicked");
            }
        }

        outcome?;
        self.transport.disconnect().await
    }

    async fn acknowledge(&self, envelope: &ChatEnvelope) {
        if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
            warn!(
                event_name = "ingress.chat.ack_sent",
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                error = %error,
                "failed to acknowledge chat envelope"
            );
        } else {
            debug!(
                event_name = "ingress.chat.ack_sent",
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                "acknowledged chat envelope"
            );
        }
    }
}

async fn deliver(transport: &dyn ChatTransport, dispatcher: &EventDispatcher, envelope: &ChatEnvelope) {
    let context = EventContext { correlation_id: envelope.envelope_id.clone() };
    let messages = match dispatcher.dispatch(envelope, &context).await {
        Ok(HandlerResult::Responded(messages)) => messages,
        Ok(HandlerResult::Processed | HandlerResult::Ignored) => return,
        Err(error) => {
            warn!(
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                error = %error,
                "event dispatch failed; continuing transport loop"
            );
            return;
        }
    };

    for message in &messages {
        if let Err(error) = transport.send(message).await {
            warn!(
                event_name = "egress.chat.send_failed",
                correlation_id = %envelope.envelope_id,
                recipient = %message.recipient,
                error = %error,
                "failed to deliver chat reply"
            );
        }
    }
}
