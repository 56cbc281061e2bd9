use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::user::UserId;
use crate::errors::{ApplicationError, ValidationError};
use crate::flows::actions;
use crate::flows::catalog::{
    FlowCatalog, ADD_CURRENCY_LABEL, CANCEL_COMMAND, DELETE_CURRENCY_LABEL, UPDATE_CURRENCY_LABEL,
};
use crate::flows::definition::{
    EntryGate, EntryTarget, FlowDefinition, OneShot, StepDefinition, Successor, Trigger,
};
use crate::flows::input::ParsedInput;
use crate::flows::states::{
    ConversationState, Inbound, Notification, QuickReply, Turn, TurnOutcome,
};
use crate::flows::store::{ConversationStore, SlotGuard};
use crate::ledger::{Ledger, UserDirectory};
use crate::rates::RateProvider;

const EXPIRED_NOTICE: &str =
    "Your previous dialogue was closed after a period of inactivity. Please start again.";
const CANCELLED: &str = "Cancelled. Send /help to see what I can do.";
const NOTHING_TO_CANCEL: &str = "There is nothing to cancel.";
const UNKNOWN_COMMAND: &str = "Unknown command. Send /help to see what I can do.";
const ABANDONED: &str = "Too many invalid attempts. The dialogue was cancelled; start again when ready.";
const ALREADY_REGISTERED: &str =
    "You are already registered. Send /help to see what I can do.";
const REGISTER_FIRST: &str = "Please register first with /reg.";
const NO_ACCESS: &str = "You do not have access to this command.";
const NO_OPERATIONS: &str = "You have no operations to delete.";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineSettings {
    /// Consecutive invalid inputs tolerated at one step; `None` is unbounded.
    pub max_reprompts: Option<u32>,
}

/// Drives one inbound message at a time through the flow catalog.
///
/// The per-user slot lock from the store is held for the whole turn, including
/// ledger and rate calls, so a user's messages are applied strictly in order
/// while different users proceed in parallel.
pub struct ConversationEngine<L, R> {
    catalog: Arc<FlowCatalog>,
    store: Arc<ConversationStore>,
    ledger: Arc<L>,
    rates: Arc<R>,
    settings: EngineSettings,
}

impl<L, R> ConversationEngine<L, R>
where
    L: Ledger + UserDirectory,
    R: RateProvider,
{
    pub fn new(
        catalog: Arc<FlowCatalog>,
        store: Arc<ConversationStore>,
        ledger: Arc<L>,
        rates: Arc<R>,
        settings: EngineSettings,
    ) -> Self {
        Self { catalog, store, ledger, rates, settings }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub async fn handle(&self, inbound: &Inbound) -> Turn {
        let mut slot = self.store.lock(&inbound.key).await;
        let mut notifications = Vec::new();
        if slot.take_expiry_notice() {
            notifications.push(Notification::text(EXPIRED_NOTICE));
        }

        let input = ParsedInput::classify(inbound);
        let active = slot.state().cloned();
        let flow = active.as_ref().map(|state| state.flow);
        let outcome = match active {
            Some(state) => self.continue_flow(&mut slot, state, inbound, &input, &mut notifications).await,
            None => self.begin(&mut slot, inbound, &input, &mut notifications).await,
        };

        info!(
            event_name = "conversation.turn",
            conversation_key = %inbound.key,
            flow = flow.map(|flow| flow.as_str()).unwrap_or("none"),
            outcome = outcome.as_str(),
            "conversation turn processed"
        );
        Turn { outcome, notifications }
    }

    async fn begin(
        &self,
        slot: &mut SlotGuard,
        inbound: &Inbound,
        input: &ParsedInput,
        notifications: &mut Vec<Notification>,
    ) -> TurnOutcome {
        if matches!(input, ParsedInput::Empty) {
            return TurnOutcome::Ignored;
        }
        if input.is_command(CANCEL_COMMAND) {
            notifications.push(Notification::text(NOTHING_TO_CANCEL));
            return TurnOutcome::Replied;
        }

        let Some(rule) = self.catalog.resolve(input) else {
            return match input {
                ParsedInput::Command(_) => {
                    notifications.push(Notification::text(UNKNOWN_COMMAND));
                    TurnOutcome::Replied
                }
                _ => TurnOutcome::Ignored,
            };
        };

        let user = inbound.key.user();
        match rule.target {
            EntryTarget::Reply(one_shot) => match self.one_shot(one_shot, user).await {
                Ok(Some(notification)) => {
                    notifications.push(notification);
                    TurnOutcome::Replied
                }
                Ok(None) => {
                    notifications.push(Notification::text(NO_ACCESS));
                    TurnOutcome::Rejected
                }
                Err(error) => fail(error, notifications),
            },
            EntryTarget::Flow(flow_id) => {
                let Some(flow) = self.catalog.flow(flow_id) else {
                    return fail(
                        ApplicationError::Configuration(format!("flow {flow_id} missing")),
                        notifications,
                    );
                };
                self.enter(slot, flow, rule.trigger, inbound, input, notifications).await
            }
        }
    }

    async fn enter(
        &self,
        slot: &mut SlotGuard,
        flow: &FlowDefinition,
        trigger: Trigger,
        inbound: &Inbound,
        input: &ParsedInput,
        notifications: &mut Vec<Notification>,
    ) -> TurnOutcome {
        let user = inbound.key.user();
        match self.admit(flow.gate, user).await {
            Ok(None) => {}
            Ok(Some(rejection)) => {
                notifications.push(Notification::text(rejection));
                return TurnOutcome::Rejected;
            }
            Err(error) => return fail(error, notifications),
        }

        let Some(first) = flow.first_step() else {
            return fail(
                ApplicationError::Configuration(format!("flow {} has no steps", flow.id)),
                notifications,
            );
        };

        let mut intro = None;
        if let Some(kind) = flow.intro {
            match actions::render_intro(self.ledger.as_ref(), kind, user).await {
                Ok(Some(text)) => intro = Some(text),
                Ok(None) => {
                    notifications.push(Notification::text(NO_OPERATIONS));
                    return TurnOutcome::Rejected;
                }
                Err(error) => return fail(error, notifications),
            }
        }

        let state = ConversationState::new(flow.id, first.id);
        if trigger == Trigger::FreeText {
            return self.apply(slot, flow, state, inbound, input, notifications).await;
        }

        let prompt = match intro {
            Some(intro) => format!("{intro}\n\n{}", first.prompt),
            None => first.prompt.clone(),
        };
        notifications.push(Notification::text(prompt).with_quick_replies(first.shape.quick_replies()));
        slot.put(state);
        TurnOutcome::Started
    }

    async fn continue_flow(
        &self,
        slot: &mut SlotGuard,
        state: ConversationState,
        inbound: &Inbound,
        input: &ParsedInput,
        notifications: &mut Vec<Notification>,
    ) -> TurnOutcome {
        if input.is_command(CANCEL_COMMAND) {
            slot.remove();
            notifications.push(Notification::text(CANCELLED));
            return TurnOutcome::Cancelled;
        }

        let Some(flow) = self.catalog.flow(state.flow) else {
            slot.remove();
            return fail(
                ApplicationError::Configuration(format!("active flow {} missing", state.flow)),
                notifications,
            );
        };
        self.apply(slot, flow, state, inbound, input, notifications).await
    }

    /// Feeds input to the current step of `state`.
    async fn apply(
        &self,
        slot: &mut SlotGuard,
        flow: &FlowDefinition,
        mut state: ConversationState,
        inbound: &Inbound,
        input: &ParsedInput,
        notifications: &mut Vec<Notification>,
    ) -> TurnOutcome {
        let Some(step) = flow.step(state.step) else {
            slot.remove();
            return fail(
                ApplicationError::Configuration(format!(
                    "flow {} has no step {}",
                    flow.id, state.step
                )),
                notifications,
            );
        };

        let parsed = match input {
            ParsedInput::Command(_) => Err(ValidationError::UnexpectedCommand),
            ParsedInput::Empty => Err(ValidationError::Empty),
            ParsedInput::Text(_) => step.shape.parse(inbound.choice.as_deref().unwrap_or(&inbound.text)),
        };
        let value = match parsed {
            Ok(value) => value,
            Err(error) => return self.reprompt(slot, step, state, &error, notifications),
        };

        if let Some(check) = step.check {
            if let Err(error) =
                actions::run_check(self.ledger.as_ref(), check, &value, &mut state.fields).await
            {
                slot.remove();
                return fail(error, notifications);
            }
        }
        state.fields.insert(step.field, value);
        state.retries = 0;

        match step.next {
            Successor::Step(next_id) => {
                let Some(next) = flow.step(next_id) else {
                    slot.remove();
                    return fail(
                        ApplicationError::Configuration(format!(
                            "flow {} has no step {next_id}",
                            flow.id
                        )),
                        notifications,
                    );
                };
                state.step = next_id;
                notifications.push(
                    Notification::text(next.prompt.clone()).with_quick_replies(next.shape.quick_replies()),
                );
                slot.put(state);
                TurnOutcome::Advanced
            }
            Successor::Terminal => {
                slot.remove();
                let result = actions::execute(
                    flow.action,
                    inbound.key.user(),
                    &state.fields,
                    self.ledger.as_ref(),
                    self.rates.as_ref(),
                )
                .await;
                match result {
                    Ok(text) => {
                        notifications.push(Notification::text(text));
                        TurnOutcome::Completed
                    }
                    Err(error) => fail(error, notifications),
                }
            }
        }
    }

    fn reprompt(
        &self,
        slot: &mut SlotGuard,
        step: &StepDefinition,
        mut state: ConversationState,
        error: &ValidationError,
        notifications: &mut Vec<Notification>,
    ) -> TurnOutcome {
        state.retries += 1;
        if self.settings.max_reprompts.is_some_and(|limit| state.retries > limit) {
            slot.remove();
            notifications.push(Notification::text(ABANDONED));
            return TurnOutcome::Abandoned;
        }

        info!(
            event_name = "conversation.reprompt",
            flow = state.flow.as_str(),
            step = %state.step,
            retries = state.retries,
            reason = %error,
            "input rejected"
        );
        notifications.push(
            Notification::text(step.reprompt.clone()).with_quick_replies(step.shape.quick_replies()),
        );
        slot.put(state);
        TurnOutcome::Reprompted
    }

    /// `Ok(Some(text))` when `gate` refuses `user`.
    async fn admit(&self, gate: EntryGate, user: &UserId) -> Result<Option<&'static str>, ApplicationError> {
        let refusal = match gate {
            EntryGate::Anyone => None,
            EntryGate::Unregistered => {
                self.ledger.is_registered(user).await?.then_some(ALREADY_REGISTERED)
            }
            EntryGate::Registered => {
                (!self.ledger.is_registered(user).await?).then_some(REGISTER_FIRST)
            }
            EntryGate::Admin => (!self.ledger.is_admin(user).await?).then_some(NO_ACCESS),
        };
        Ok(refusal)
    }

    /// `Ok(None)` when the one-shot's gate refuses `user`.
    async fn one_shot(
        &self,
        one_shot: OneShot,
        user: &UserId,
    ) -> Result<Option<Notification>, ApplicationError> {
        if self.admit(one_shot.gate(), user).await?.is_some() {
            return Ok(None);
        }

        let notification = match one_shot {
            OneShot::Start | OneShot::Help => {
                let registered = self.ledger.is_registered(user).await?;
                let admin = self.ledger.is_admin(user).await?;
                let help = help_text(registered, admin);
                let text = if one_shot == OneShot::Start {
                    format!("Hello! I keep track of your income and expenses.\n\n{help}")
                } else {
                    help
                };
                Notification::text(text)
            }
            OneShot::Currencies => {
                let currencies = self.ledger.list_currencies().await?;
                if currencies.is_empty() {
                    Notification::text("No currencies have been saved yet.")
                } else {
                    let mut lines = vec!["Saved currencies (rate to RUB):".to_owned()];
                    lines.extend(
                        currencies.iter().map(|currency| format!("{}: {}", currency.code, currency.rate)),
                    );
                    Notification::text(lines.join("\n"))
                }
            }
            OneShot::ManageCurrency => Notification::text("Choose an action:").with_quick_replies(
                [ADD_CURRENCY_LABEL, UPDATE_CURRENCY_LABEL, DELETE_CURRENCY_LABEL]
                    .into_iter()
                    .map(|label| QuickReply { label: label.to_owned(), value: label.to_owned() })
                    .collect(),
            ),
        };
        Ok(Some(notification))
    }
}

fn fail(error: ApplicationError, notifications: &mut Vec<Notification>) -> TurnOutcome {
    match &error {
        ApplicationError::Validation(_)
        | ApplicationError::NotFound(_)
        | ApplicationError::Conflict(_) => {}
        ApplicationError::Unavailable(detail)
        | ApplicationError::Persistence(detail)
        | ApplicationError::Configuration(detail) => {
            warn!(
                event_name = "conversation.action_failed",
                error_kind = error.kind(),
                detail = %detail,
                "conversation action failed"
            );
        }
    }
    notifications.push(Notification::text(error.user_message()));
    TurnOutcome::Failed
}

fn help_text(registered: bool, admin: bool) -> String {
    let mut lines = vec!["Available commands:"];
    if registered {
        lines.push("/add_operation - record an income or expense");
        lines.push("/operations - list your operations in a chosen currency");
        lines.push("/delete_operation - delete one of your operations");
    } else {
        lines.push("/reg - register (or just send your name)");
    }
    lines.push("/convert - convert an amount to RUB");
    lines.push("/currencies - show saved currencies");
    if admin {
        lines.push("/manage_currency - add, change, or delete currencies");
    }
    lines.push("/cancel - abandon the current dialogue");
    lines.push("/help - show this message");
    lines.join("\n")
}
