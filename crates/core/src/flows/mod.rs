//! Declarative dialogue flows and the engine that runs them.
//!
//! A flow is a small graph of steps. Each step prompts for one field, parses
//! the reply, and either moves to the next step or, at the terminal step, runs
//! a completion action against the ledger. Conversations live in a
//! [`ConversationStore`] keyed by user.

pub mod actions;
pub mod catalog;
pub mod definition;
pub mod engine;
pub mod input;
pub mod states;
pub mod store;

pub use catalog::FlowCatalog;
pub use definition::{
    CatalogError, EntryGate, EntryTarget, FlowDefinition, InputShape, OneShot, StepCheck,
    StepDefinition, Successor, TerminalAction, Trigger, TriggerRule,
};
pub use engine::{ConversationEngine, EngineSettings};
pub use states::{
    ConversationKey, ConversationState, FieldValue, Fields, FlowId, Inbound, Notification,
    QuickReply, StepId, Turn, TurnOutcome,
};
pub use store::{ConversationStore, SlotGuard, SweepReport};
