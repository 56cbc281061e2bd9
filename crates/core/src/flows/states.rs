use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::domain::user::UserId;
use crate::errors::ApplicationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowId {
    Registration,
    AddOperation,
    ListOperations,
    DeleteOperation,
    AddCurrency,
    UpdateCurrency,
    DeleteCurrency,
    ConvertAmount,
}

impl FlowId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::AddOperation => "add_operation",
            Self::ListOperations => "list_operations",
            Self::DeleteOperation => "delete_operation",
            Self::AddCurrency => "add_currency",
            Self::UpdateCurrency => "update_currency",
            Self::DeleteCurrency => "delete_currency",
            Self::ConvertAmount => "convert_amount",
        }
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StepId(pub &'static str);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// One conversation per chat participant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConversationKey(UserId);

impl ConversationKey {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(UserId::new(identity))
    }

    pub fn user(&self) -> &UserId {
        &self.0
    }
}

impl From<UserId> for ConversationKey {
    fn from(value: UserId) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Number(Decimal),
    Integer(i64),
    Date(NaiveDate),
}

/// Values collected so far, keyed by the step's field name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fields(HashMap<&'static str, FieldValue>);

impl Fields {
    pub fn insert(&mut self, name: &'static str, value: FieldValue) {
        self.0.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn text(&self, name: &str) -> Result<&str, ApplicationError> {
        match self.get(name) {
            Some(FieldValue::Text(value)) => Ok(value.as_str()),
            _ => Err(missing(name)),
        }
    }

    pub fn number(&self, name: &str) -> Result<Decimal, ApplicationError> {
        match self.get(name) {
            Some(FieldValue::Number(value)) => Ok(*value),
            _ => Err(missing(name)),
        }
    }

    pub fn integer(&self, name: &str) -> Result<i64, ApplicationError> {
        match self.get(name) {
            Some(FieldValue::Integer(value)) => Ok(*value),
            _ => Err(missing(name)),
        }
    }

    pub fn date(&self, name: &str) -> Result<NaiveDate, ApplicationError> {
        match self.get(name) {
            Some(FieldValue::Date(value)) => Ok(*value),
            _ => Err(missing(name)),
        }
    }
}

fn missing(name: &str) -> ApplicationError {
    ApplicationError::Configuration(format!("field `{name}` was not collected"))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationState {
    pub flow: FlowId,
    pub step: StepId,
    pub fields: Fields,
    /// Consecutive rejected inputs at the current step.
    pub retries: u32,
    pub touched_at: Instant,
}

impl ConversationState {
    pub fn new(flow: FlowId, step: StepId) -> Self {
        Self { flow, step, fields: Fields::default(), retries: 0, touched_at: Instant::now() }
    }
}

/// A message as the engine sees it, stripped of transport detail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inbound {
    pub key: ConversationKey,
    pub text: String,
    /// Value of a pressed quick-reply button, when the transport reports one.
    pub choice: Option<String>,
}

impl Inbound {
    pub fn text(key: ConversationKey, text: impl Into<String>) -> Self {
        Self { key, text: text.into(), choice: None }
    }

    pub fn choice(key: ConversationKey, value: impl Into<String>) -> Self {
        let value = value.into();
        Self { key, text: value.clone(), choice: Some(value) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickReply {
    pub label: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub text: String,
    pub quick_replies: Vec<QuickReply>,
}

impl Notification {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), quick_replies: Vec::new() }
    }

    pub fn with_quick_replies(mut self, quick_replies: Vec<QuickReply>) -> Self {
        self.quick_replies = quick_replies;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Nothing matched and no conversation was active.
    Ignored,
    /// Stateless reply such as help or the currency list.
    Replied,
    /// A flow trigger matched but the entry gate refused it.
    Rejected,
    Started,
    Advanced,
    Reprompted,
    Completed,
    Failed,
    Cancelled,
    /// Reprompt budget exhausted.
    Abandoned,
}

impl TurnOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Replied => "replied",
            Self::Rejected => "rejected",
            Self::Started => "started",
            Self::Advanced => "advanced",
            Self::Reprompted => "reprompted",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Abandoned => "abandoned",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    pub outcome: TurnOutcome,
    pub notifications: Vec<Notification>,
}

impl Turn {
    pub fn ignored() -> Self {
        Self { outcome: TurnOutcome::Ignored, notifications: Vec::new() }
    }

    /// All notification texts joined by newlines, for logs and assertions.
    pub fn transcript(&self) -> String {
        self.notifications.iter().map(|n| n.text.as_str()).collect::<Vec<_>>().join("\n")
    }
}
