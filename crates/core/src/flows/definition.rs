use std::collections::HashSet;

use thiserror::Error;

use crate::domain::currency::CurrencyCode;
use crate::errors::ValidationError;
use crate::flows::input::{parse_date, parse_free_text, parse_integer, parse_positive_decimal};
use crate::flows::states::{FieldValue, FlowId, QuickReply, StepId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChoiceOption {
    pub value: String,
    pub label: String,
}

impl ChoiceOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self { value: value.into(), label: label.into() }
    }
}

/// What a step accepts and how raw input becomes a field value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputShape {
    FreeText { max_len: usize },
    PositiveNumber,
    Integer,
    Date,
    CurrencyCode,
    Choice(Vec<ChoiceOption>),
}

impl InputShape {
    pub fn parse(&self, raw: &str) -> Result<FieldValue, ValidationError> {
        match self {
            Self::FreeText { max_len } => parse_free_text(raw, *max_len).map(FieldValue::Text),
            Self::PositiveNumber => parse_positive_decimal(raw).map(FieldValue::Number),
            Self::Integer => parse_integer(raw).map(FieldValue::Integer),
            Self::Date => parse_date(raw).map(FieldValue::Date),
            Self::CurrencyCode => {
                CurrencyCode::parse(raw).map(|code| FieldValue::Text(code.as_str().to_owned()))
            }
            Self::Choice(options) => {
                let needle = raw.trim();
                options
                    .iter()
                    .find(|option| {
                        option.value.eq_ignore_ascii_case(needle)
                            || option.label.eq_ignore_ascii_case(needle)
                    })
                    .map(|option| FieldValue::Text(option.value.clone()))
                    .ok_or_else(|| ValidationError::UnknownChoice(needle.to_owned()))
            }
        }
    }

    pub fn quick_replies(&self) -> Vec<QuickReply> {
        match self {
            Self::Choice(options) => options
                .iter()
                .map(|option| QuickReply { label: option.label.clone(), value: option.value.clone() })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Ledger lookup performed after a currency code parses, before the flow advances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepCheck {
    /// The currency must exist; its current rate is cached under `current_rate`.
    CurrencyExists,
    CurrencyAbsent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Successor {
    Step(StepId),
    Terminal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepDefinition {
    pub id: StepId,
    pub field: &'static str,
    pub prompt: String,
    pub reprompt: String,
    pub shape: InputShape,
    pub check: Option<StepCheck>,
    pub next: Successor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryGate {
    Anyone,
    Unregistered,
    Registered,
    Admin,
}

/// Content rendered ahead of the first prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intro {
    /// Lists the user's operations; entry is refused when there are none.
    OwnOperations,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalAction {
    RegisterUser,
    RecordOperation,
    ListOperations,
    DeleteOperation,
    AddCurrency,
    UpdateCurrency,
    DeleteCurrency,
    ConvertAmount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowDefinition {
    pub id: FlowId,
    pub gate: EntryGate,
    pub intro: Option<Intro>,
    /// The first step is where every conversation of this flow starts.
    pub steps: Vec<StepDefinition>,
    pub action: TerminalAction,
}

impl FlowDefinition {
    pub fn first_step(&self) -> Option<&StepDefinition> {
        self.steps.first()
    }

    pub fn step(&self, id: StepId) -> Option<&StepDefinition> {
        self.steps.iter().find(|step| step.id == id)
    }

    pub(crate) fn validate(&self) -> Result<(), CatalogError> {
        if self.steps.is_empty() {
            return Err(CatalogError::EmptyFlow(self.id));
        }

        let mut ids = HashSet::new();
        let mut fields = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id) {
                return Err(CatalogError::DuplicateStep { flow: self.id, step: step.id });
            }
            if !fields.insert(step.field) {
                return Err(CatalogError::DuplicateField { flow: self.id, field: step.field });
            }
        }

        let mut terminal_steps = 0;
        for step in &self.steps {
            match step.next {
                Successor::Step(next) if !ids.contains(&next) => {
                    return Err(CatalogError::UnknownSuccessor { flow: self.id, step: next });
                }
                Successor::Step(_) => {}
                Successor::Terminal => terminal_steps += 1,
            }
        }
        if terminal_steps != 1 {
            return Err(CatalogError::TerminalCount { flow: self.id, count: terminal_steps });
        }
        Ok(())
    }
}

/// Built-in replies that never open a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OneShot {
    Start,
    Help,
    Currencies,
    ManageCurrency,
}

impl OneShot {
    pub fn gate(self) -> EntryGate {
        match self {
            Self::ManageCurrency => EntryGate::Admin,
            Self::Start | Self::Help | Self::Currencies => EntryGate::Anyone,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Command name without the slash.
    Command(&'static str),
    /// Exact text of a menu button, matched case-insensitively.
    Label(&'static str),
    /// Any non-command text; the text itself is fed to the first step.
    FreeText,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryTarget {
    Reply(OneShot),
    Flow(FlowId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerRule {
    pub trigger: Trigger,
    pub target: EntryTarget,
}

impl TriggerRule {
    /// Resolution tier; lower wins. `/cancel` is handled before any rule.
    pub(crate) fn tier(&self) -> u8 {
        match (self.trigger, self.target) {
            (Trigger::Command(_), EntryTarget::Reply(_)) => 0,
            (Trigger::Command(_), EntryTarget::Flow(_)) => 1,
            (Trigger::Label(_), _) => 2,
            (Trigger::FreeText, _) => 3,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("flow {0} has no steps")]
    EmptyFlow(FlowId),
    #[error("flow {flow} declares step {step} twice")]
    DuplicateStep { flow: FlowId, step: StepId },
    #[error("flow {flow} collects field `{field}` twice")]
    DuplicateField { flow: FlowId, field: &'static str },
    #[error("flow {flow} points at undefined step {step}")]
    UnknownSuccessor { flow: FlowId, step: StepId },
    #[error("flow {flow} must have exactly one terminal step, found {count}")]
    TerminalCount { flow: FlowId, count: usize },
    #[error("flow {0} is registered twice")]
    DuplicateFlow(FlowId),
    #[error("trigger {0:?} is bound more than once")]
    DuplicateTrigger(Trigger),
    #[error("trigger {trigger:?} targets unregistered flow {flow}")]
    UnknownFlow { trigger: Trigger, flow: FlowId },
    #[error("`cancel` is reserved and cannot be bound")]
    ReservedTrigger,
    #[error("display currency list is empty")]
    NoDisplayCurrencies,
}
