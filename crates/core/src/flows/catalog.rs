use std::collections::{HashMap, HashSet};

use crate::domain::currency::CurrencyCode;
use crate::flows::definition::{
    CatalogError, ChoiceOption, EntryGate, EntryTarget, FlowDefinition, InputShape, Intro,
    OneShot, StepCheck, StepDefinition, Successor, TerminalAction, Trigger, TriggerRule,
};
use crate::flows::input::ParsedInput;
use crate::flows::states::{FlowId, StepId};

pub const CANCEL_COMMAND: &str = "cancel";
pub const ADD_CURRENCY_LABEL: &str = "Add currency";
pub const UPDATE_CURRENCY_LABEL: &str = "Change currency rate";
pub const DELETE_CURRENCY_LABEL: &str = "Delete currency";
pub const MAX_USERNAME_LEN: usize = 64;

/// Immutable set of flows and the triggers that enter them. Built once at
/// startup and shared by every conversation.
#[derive(Clone, Debug)]
pub struct FlowCatalog {
    flows: HashMap<FlowId, FlowDefinition>,
    rules: Vec<TriggerRule>,
}

impl FlowCatalog {
    pub fn new(
        flows: Vec<FlowDefinition>,
        mut rules: Vec<TriggerRule>,
    ) -> Result<Self, CatalogError> {
        let mut by_id = HashMap::with_capacity(flows.len());
        for flow in flows {
            flow.validate()?;
            let id = flow.id;
            if by_id.insert(id, flow).is_some() {
                return Err(CatalogError::DuplicateFlow(id));
            }
        }

        let mut seen = HashSet::new();
        for rule in &rules {
            let normalized = match rule.trigger {
                Trigger::Command(name) if name.eq_ignore_ascii_case(CANCEL_COMMAND) => {
                    return Err(CatalogError::ReservedTrigger);
                }
                Trigger::Command(name) => format!("command:{}", name.to_ascii_lowercase()),
                Trigger::Label(label) => format!("label:{}", label.to_lowercase()),
                Trigger::FreeText => "free_text".to_owned(),
            };
            if !seen.insert(normalized) {
                return Err(CatalogError::DuplicateTrigger(rule.trigger));
            }
            if let EntryTarget::Flow(flow) = rule.target {
                if !by_id.contains_key(&flow) {
                    return Err(CatalogError::UnknownFlow { trigger: rule.trigger, flow });
                }
            }
        }
        rules.sort_by_key(TriggerRule::tier);

        Ok(Self { flows: by_id, rules })
    }

    /// The assistant's full dialogue set. `display_currencies` are offered when
    /// listing operations.
    pub fn standard(display_currencies: &[CurrencyCode]) -> Result<Self, CatalogError> {
        if display_currencies.is_empty() {
            return Err(CatalogError::NoDisplayCurrencies);
        }
        let display = display_currencies
            .iter()
            .map(|code| ChoiceOption::new(code.as_str(), code.as_str()))
            .collect();

        let flows = vec![
            registration(),
            add_operation(),
            list_operations(display),
            delete_operation(),
            add_currency(),
            update_currency(),
            delete_currency(),
            convert_amount(),
        ];

        let rules = vec![
            reply("start", OneShot::Start),
            reply("help", OneShot::Help),
            reply("currencies", OneShot::Currencies),
            reply("manage_currency", OneShot::ManageCurrency),
            command("reg", FlowId::Registration),
            command("add_operation", FlowId::AddOperation),
            command("operations", FlowId::ListOperations),
            command("delete_operation", FlowId::DeleteOperation),
            command("convert", FlowId::ConvertAmount),
            command("add_currency", FlowId::AddCurrency),
            command("update_currency", FlowId::UpdateCurrency),
            command("delete_currency", FlowId::DeleteCurrency),
            label(ADD_CURRENCY_LABEL, FlowId::AddCurrency),
            label(UPDATE_CURRENCY_LABEL, FlowId::UpdateCurrency),
            label(DELETE_CURRENCY_LABEL, FlowId::DeleteCurrency),
            TriggerRule { trigger: Trigger::FreeText, target: EntryTarget::Flow(FlowId::Registration) },
        ];

        Self::new(flows, rules)
    }

    pub fn flow(&self, id: FlowId) -> Option<&FlowDefinition> {
        self.flows.get(&id)
    }

    pub fn rules(&self) -> &[TriggerRule] {
        &self.rules
    }

    /// First rule, in tier order, that matches input arriving outside any flow.
    pub fn resolve(&self, input: &ParsedInput) -> Option<TriggerRule> {
        self.rules
            .iter()
            .find(|rule| match (rule.trigger, input) {
                (Trigger::Command(name), ParsedInput::Command(command)) => name == command,
                (Trigger::Label(label), ParsedInput::Text(text)) => label.eq_ignore_ascii_case(text),
                (Trigger::FreeText, ParsedInput::Text(_)) => true,
                _ => false,
            })
            .copied()
    }
}

fn reply(name: &'static str, one_shot: OneShot) -> TriggerRule {
    TriggerRule { trigger: Trigger::Command(name), target: EntryTarget::Reply(one_shot) }
}

fn command(name: &'static str, flow: FlowId) -> TriggerRule {
    TriggerRule { trigger: Trigger::Command(name), target: EntryTarget::Flow(flow) }
}

fn label(text: &'static str, flow: FlowId) -> TriggerRule {
    TriggerRule { trigger: Trigger::Label(text), target: EntryTarget::Flow(flow) }
}

fn step(
    id: &'static str,
    prompt: &str,
    reprompt: &str,
    shape: InputShape,
    next: Successor,
) -> StepDefinition {
    StepDefinition {
        id: StepId(id),
        field: id,
        prompt: prompt.to_owned(),
        reprompt: reprompt.to_owned(),
        shape,
        check: None,
        next,
    }
}

fn checked(mut definition: StepDefinition, check: StepCheck) -> StepDefinition {
    definition.check = Some(check);
    definition
}

fn registration() -> FlowDefinition {
    FlowDefinition {
        id: FlowId::Registration,
        gate: EntryGate::Unregistered,
        intro: None,
        steps: vec![step(
            "username",
            "Enter your username:",
            "The username must be between 1 and 64 characters. Enter your username:",
            InputShape::FreeText { max_len: MAX_USERNAME_LEN },
            Successor::Terminal,
        )],
        action: TerminalAction::RegisterUser,
    }
}

fn add_operation() -> FlowDefinition {
    FlowDefinition {
        id: FlowId::AddOperation,
        gate: EntryGate::Registered,
        intro: None,
        steps: vec![
            step(
                "category",
                "Choose the operation type:",
                "Please choose Income or Expense.",
                InputShape::Choice(vec![
                    ChoiceOption::new("income", "Income"),
                    ChoiceOption::new("expense", "Expense"),
                ]),
                Successor::Step(StepId("amount")),
            ),
            step(
                "amount",
                "Enter the operation amount in RUB:",
                "Invalid amount. Enter a positive number, for example 1500 or 1500,50.",
                InputShape::PositiveNumber,
                Successor::Step(StepId("date")),
            ),
            step(
                "date",
                "Enter the operation date (YYYY-MM-DD):",
                "Invalid date. Use the YYYY-MM-DD format, for example 2024-03-15.",
                InputShape::Date,
                Successor::Terminal,
            ),
        ],
        action: TerminalAction::RecordOperation,
    }
}

fn list_operations(display: Vec<ChoiceOption>) -> FlowDefinition {
    FlowDefinition {
        id: FlowId::ListOperations,
        gate: EntryGate::Registered,
        intro: None,
        steps: vec![step(
            "currency",
            "Choose the currency to display your operations in:",
            "Please choose one of the offered currencies.",
            InputShape::Choice(display),
            Successor::Terminal,
        )],
        action: TerminalAction::ListOperations,
    }
}

fn delete_operation() -> FlowDefinition {
    FlowDefinition {
        id: FlowId::DeleteOperation,
        gate: EntryGate::Registered,
        intro: Some(Intro::OwnOperations),
        steps: vec![step(
            "operation_id",
            "Enter the ID of the operation to delete:",
            "Please enter a numeric operation ID.",
            InputShape::Integer,
            Successor::Terminal,
        )],
        action: TerminalAction::DeleteOperation,
    }
}

const CODE_REPROMPT: &str = "Invalid currency code. Use letters and digits only, for example USD.";

fn add_currency() -> FlowDefinition {
    FlowDefinition {
        id: FlowId::AddCurrency,
        gate: EntryGate::Admin,
        intro: None,
        steps: vec![
            checked(
                step(
                    "code",
                    "Enter the currency code:",
                    CODE_REPROMPT,
                    InputShape::CurrencyCode,
                    Successor::Step(StepId("rate")),
                ),
                StepCheck::CurrencyAbsent,
            ),
            step(
                "rate",
                "Enter the rate to RUB:",
                "The rate must be a positive number, for example 75.43 or 75,43.",
                InputShape::PositiveNumber,
                Successor::Terminal,
            ),
        ],
        action: TerminalAction::AddCurrency,
    }
}

fn update_currency() -> FlowDefinition {
    FlowDefinition {
        id: FlowId::UpdateCurrency,
        gate: EntryGate::Admin,
        intro: None,
        steps: vec![
            checked(
                step(
                    "code",
                    "Enter the code of the currency to update:",
                    CODE_REPROMPT,
                    InputShape::CurrencyCode,
                    Successor::Step(StepId("rate")),
                ),
                StepCheck::CurrencyExists,
            ),
            step(
                "rate",
                "Enter the new rate to RUB:",
                "The rate must be a positive number, for example 75.43 or 75,43.",
                InputShape::PositiveNumber,
                Successor::Terminal,
            ),
        ],
        action: TerminalAction::UpdateCurrency,
    }
}

fn delete_currency() -> FlowDefinition {
    FlowDefinition {
        id: FlowId::DeleteCurrency,
        gate: EntryGate::Admin,
        intro: None,
        steps: vec![step(
            "code",
            "Enter the code of the currency to delete:",
            CODE_REPROMPT,
            InputShape::CurrencyCode,
            Successor::Terminal,
        )],
        action: TerminalAction::DeleteCurrency,
    }
}

fn convert_amount() -> FlowDefinition {
    FlowDefinition {
        id: FlowId::ConvertAmount,
        gate: EntryGate::Anyone,
        intro: None,
        steps: vec![
            checked(
                step(
                    "code",
                    "Enter the currency code:",
                    CODE_REPROMPT,
                    InputShape::CurrencyCode,
                    Successor::Step(StepId("amount")),
                ),
                StepCheck::CurrencyExists,
            ),
            step(
                "amount",
                "Enter the amount to convert:",
                "Invalid amount. Enter a positive number, for example 100 or 100,50.",
                InputShape::PositiveNumber,
                Successor::Terminal,
            ),
        ],
        action: TerminalAction::ConvertAmount,
    }
}

#[cfg(test)]
mod tests {
    use super::FlowCatalog;
    use crate::domain::currency::CurrencyCode;
    use crate::flows::definition::{
        CatalogError, EntryTarget, OneShot, Trigger, TriggerRule,
    };
    use crate::flows::input::ParsedInput;
    use crate::flows::states::FlowId;

    fn display() -> Vec<CurrencyCode> {
        ["RUB", "EUR", "USD"].iter().map(|raw| CurrencyCode::parse(raw).expect("code")).collect()
    }

    fn target(catalog: &FlowCatalog, input: ParsedInput) -> Option<EntryTarget> {
        catalog.resolve(&input).map(|rule| rule.target)
    }

    #[test]
    fn standard_catalog_builds_and_resolves_each_tier() {
        let catalog = FlowCatalog::standard(&display()).expect("standard catalog");

        assert_eq!(
            target(&catalog, ParsedInput::Command("help".to_owned())),
            Some(EntryTarget::Reply(OneShot::Help))
        );
        assert_eq!(
            target(&catalog, ParsedInput::Command("convert".to_owned())),
            Some(EntryTarget::Flow(FlowId::ConvertAmount))
        );
        assert_eq!(
            target(&catalog, ParsedInput::Text("change currency RATE".to_owned())),
            Some(EntryTarget::Flow(FlowId::UpdateCurrency))
        );
        assert_eq!(
            target(&catalog, ParsedInput::Text("Alice".to_owned())),
            Some(EntryTarget::Flow(FlowId::Registration))
        );
        assert_eq!(target(&catalog, ParsedInput::Command("unknown".to_owned())), None);
        assert_eq!(target(&catalog, ParsedInput::Empty), None);
    }

    #[test]
    fn rules_are_ordered_by_tier() {
        let catalog = FlowCatalog::standard(&display()).expect("standard catalog");
        let tiers: Vec<u8> = catalog.rules().iter().map(TriggerRule::tier).collect();
        let mut sorted = tiers.clone();
        sorted.sort_unstable();
        assert_eq!(tiers, sorted);
    }

    #[test]
    fn duplicate_trigger_is_a_catalog_error() {
        let rules = vec![
            TriggerRule { trigger: Trigger::Command("help"), target: EntryTarget::Reply(OneShot::Help) },
            TriggerRule { trigger: Trigger::Command("HELP"), target: EntryTarget::Reply(OneShot::Start) },
        ];
        assert_eq!(
            FlowCatalog::new(Vec::new(), rules).map(|_| ()),
            Err(CatalogError::DuplicateTrigger(Trigger::Command("HELP")))
        );
    }

    #[test]
    fn cancel_cannot_be_rebound() {
        let rules = vec![TriggerRule {
            trigger: Trigger::Command("cancel"),
            target: EntryTarget::Reply(OneShot::Help),
        }];
        assert_eq!(FlowCatalog::new(Vec::new(), rules).map(|_| ()), Err(CatalogError::ReservedTrigger));
    }

    #[test]
    fn trigger_for_missing_flow_is_rejected() {
        let rules = vec![TriggerRule {
            trigger: Trigger::Command("convert"),
            target: EntryTarget::Flow(FlowId::ConvertAmount),
        }];
        assert!(matches!(
            FlowCatalog::new(Vec::new(), rules),
            Err(CatalogError::UnknownFlow { flow: FlowId::ConvertAmount, .. })
        ));
    }

    #[test]
    fn empty_display_list_is_rejected() {
        assert_eq!(FlowCatalog::standard(&[]).map(|_| ()), Err(CatalogError::NoDisplayCurrencies));
    }
}
