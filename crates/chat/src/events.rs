use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tally_core::flows::{ConversationEngine, ConversationKey, Inbound, Turn, TurnOutcome};
use tally_core::ledger::{Ledger, UserDirectory};
use tally_core::rates::RateProvider;
use thiserror::Error;
use tracing::debug;

use crate::replies::{render_turn, OutboundMessage};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEnvelope {
    pub envelope_id: String,
    pub event: ChatEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    Message(MessageEvent),
    /// A pressed quick-reply button.
    Choice(ChoiceEvent),
    Unsupported { event_type: String },
}

impl ChatEvent {
    pub fn event_type(&self) -> ChatEventType {
        match self {
            Self::Message(_) => ChatEventType::Message,
            Self::Choice(_) => ChatEventType::Choice,
            Self::Unsupported { .. } => ChatEventType::Unsupported,
        }
    }

    pub fn sender_id(&self) -> Option<&str> {
        match self {
            Self::Message(event) => Some(&event.sender_id),
            Self::Choice(event) => Some(&event.sender_id),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatEventType {
    Message,
    Choice,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub sender_id: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChoiceEvent {
    pub sender_id: String,
    pub value: String,
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
    Responded(Vec<OutboundMessage>),
    /// Handled, nothing to send back.
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("conversation service failure: {0}")]
    Service(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

/// Whatever turns an inbound message into a [`Turn`].
#[async_trait]
pub trait ConversationService: Send + Sync {
    async fn converse(
        &self,
        inbound: &Inbound,
        ctx: &EventContext,
    ) -> Result<Turn, EventHandlerError>;
}

#[async_trait]
impl<L, R> ConversationService for ConversationEngine<L, R>
where
    L: Ledger + UserDirectory + 'static,
    R: RateProvider + 'static,
{
    async fn converse(
        &self,
        inbound: &Inbound,
        ctx: &EventContext,
    ) -> Result<Turn, EventHandlerError> {
        let turn = self.handle(inbound).await;
        debug!(
            event_name = "ingress.chat.turn_completed",
            correlation_id = %ctx.correlation_id,
            conversation_key = %inbound.key,
            outcome = turn.outcome.as_str(),
            "conversation turn completed"
        );
        Ok(turn)
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> ChatEventType;
    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<ChatEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Message and choice handlers over one shared conversation service.
pub fn conversation_dispatcher<S>(service: Arc<S>) -> EventDispatcher
where
    S: ConversationService + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(MessageHandler::new(Arc::clone(&service)));
    dispatcher.register(ChoiceHandler::new(service));
    dispatcher
}

pub struct MessageHandler<S> {
    service: Arc<S>,
}

impl<S> MessageHandler<S>
where
    S: ConversationService,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for MessageHandler<S>
where
    S: ConversationService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Message
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Message(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let inbound = Inbound::text(ConversationKey::new(event.sender_id.as_str()), &event.text);
        let turn = self.service.converse(&inbound, ctx).await?;
        Ok(handler_result(&event.sender_id, &turn))
    }
}

pub struct ChoiceHandler<S> {
    service: Arc<S>,
}

impl<S> ChoiceHandler<S>
where
    S: ConversationService,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for ChoiceHandler<S>
where
    S: ConversationService + 'static,
{
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Choice
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Choice(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let inbound = Inbound::choice(ConversationKey::new(event.sender_id.as_str()), &event.value);
        let turn = self.service.converse(&inbound, ctx).await?;
        Ok(handler_result(&event.sender_id, &turn))
    }
}

fn handler_result(recipient: &str, turn: &Turn) -> HandlerResult {
    let messages = render_turn(recipient, turn);
    match (turn.outcome, messages.is_empty()) {
        (TurnOutcome::Ignored, true) => HandlerResult::Ignored,
        (_, true) => HandlerResult::Processed,
        (_, false) => HandlerResult::Responded(messages),
    }
}
