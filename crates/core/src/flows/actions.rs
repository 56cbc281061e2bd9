use rust_decimal::Decimal;

use crate::domain::currency::{CurrencyCode, Rate};
use crate::domain::operation::{format_money, NewOperation, OperationCategory, OperationId};
use crate::domain::user::UserId;
use crate::errors::{ApplicationError, ValidationError};
use crate::flows::definition::{Intro, StepCheck, TerminalAction};
use crate::flows::states::{FieldValue, Fields};
use crate::ledger::{Ledger, LedgerError, UserDirectory};
use crate::rates::RateProvider;

/// Field that `StepCheck::CurrencyExists` fills with the stored rate.
pub const CURRENT_RATE_FIELD: &str = "current_rate";

fn currency_field(fields: &Fields, name: &str) -> Result<CurrencyCode, ApplicationError> {
    Ok(CurrencyCode::parse(fields.text(name)?)?)
}

fn rate_field(fields: &Fields, name: &str) -> Result<Rate, ApplicationError> {
    Ok(Rate::new(fields.number(name)?)?)
}

fn currency_not_found(code: &CurrencyCode) -> ApplicationError {
    ApplicationError::NotFound(format!("Currency {code} was not found."))
}

fn currency_exists(code: &CurrencyCode) -> ApplicationError {
    ApplicationError::Conflict(format!("Currency {code} already exists."))
}

pub(crate) async fn run_check<L: Ledger>(
    ledger: &L,
    check: StepCheck,
    value: &FieldValue,
    fields: &mut Fields,
) -> Result<(), ApplicationError> {
    let FieldValue::Text(raw) = value else {
        return Err(ApplicationError::Configuration(
            "currency check applied to a non-text field".to_owned(),
        ));
    };
    let code = CurrencyCode::parse(raw)?;

    match (check, ledger.get_currency(&code).await) {
        (StepCheck::CurrencyExists, Ok(rate)) => {
            fields.insert(CURRENT_RATE_FIELD, FieldValue::Number(rate.value()));
            Ok(())
        }
        (StepCheck::CurrencyExists, Err(LedgerError::NotFound)) => Err(currency_not_found(&code)),
        (StepCheck::CurrencyAbsent, Ok(_)) => Err(currency_exists(&code)),
        (StepCheck::CurrencyAbsent, Err(LedgerError::NotFound)) => Ok(()),
        (_, Err(error)) => Err(error.into()),
    }
}

/// Text shown before the first prompt. `Ok(None)` means the flow has nothing
/// to work on and must not start.
pub(crate) async fn render_intro<L: Ledger>(
    ledger: &L,
    intro: Intro,
    owner: &UserId,
) -> Result<Option<String>, ApplicationError> {
    match intro {
        Intro::OwnOperations => {
            let operations = ledger.list_operations(owner).await?;
            if operations.is_empty() {
                return Ok(None);
            }
            let mut lines = vec!["Your operations:".to_owned()];
            lines.extend(operations.iter().map(|operation| {
                format!(
                    "{}. {} {} {} ({})",
                    operation.id,
                    operation.category.label(),
                    format_money(operation.amount),
                    operation.currency,
                    operation.date
                )
            }));
            Ok(Some(lines.join("\n")))
        }
    }
}

/// Runs the completion action of a flow with everything it collected and
/// returns the confirmation text.
pub(crate) async fn execute<L, R>(
    action: TerminalAction,
    owner: &UserId,
    fields: &Fields,
    ledger: &L,
    rates: &R,
) -> Result<String, ApplicationError>
where
    L: Ledger + UserDirectory,
    R: RateProvider,
{
    match action {
        TerminalAction::RegisterUser => {
            let username = fields.text("username")?;
            ledger.register_user(owner, username).await.map_err(|error| match error {
                LedgerError::AlreadyExists => {
                    ApplicationError::Conflict("You are already registered.".to_owned())
                }
                other => other.into(),
            })?;
            Ok(format!("Registration complete. Welcome, {username}!"))
        }
        TerminalAction::RecordOperation => {
            let raw_category = fields.text("category")?;
            let category = OperationCategory::parse(raw_category)
                .ok_or_else(|| ValidationError::UnknownChoice(raw_category.to_owned()))?;
            let operation =
                NewOperation { date: fields.date("date")?, amount: fields.number("amount")?, category };
            let id = ledger.record_operation(owner, operation.clone()).await?;
            Ok(format!(
                "Operation {id} saved: {} {} RUB on {}.",
                category.label(),
                format_money(operation.amount),
                operation.date
            ))
        }
        TerminalAction::ListOperations => {
            let code = currency_field(fields, "currency")?;
            let rate = if code.is_base() { Rate::one() } else { rates.lookup(&code).await? };
            let operations = ledger.list_operations(owner).await?;
            if operations.is_empty() {
                return Ok("You have no operations yet.".to_owned());
            }
            let mut lines = vec![format!("Your operations in {code}:")];
            for operation in &operations {
                let converted =
                    operation.amount.checked_div(rate.value()).ok_or(ValidationError::Overflow)?;
                lines.push(format!(
                    "{}. {} {} {} ({})",
                    operation.id,
                    operation.category.label(),
                    format_money(converted),
                    code,
                    operation.date
                ));
            }
            Ok(lines.join("\n"))
        }
        TerminalAction::DeleteOperation => {
            let id = OperationId(fields.integer("operation_id")?);
            ledger.delete_operation(owner, id).await.map_err(|error| match error {
                LedgerError::NotFound => ApplicationError::NotFound(format!(
                    "Operation {id} was not found among your operations."
                )),
                other => other.into(),
            })?;
            Ok(format!("Operation {id} deleted."))
        }
        TerminalAction::AddCurrency => {
            let code = currency_field(fields, "code")?;
            let rate = rate_field(fields, "rate")?;
            ledger.upsert_currency(&code, rate).await.map_err(|error| match error {
                LedgerError::AlreadyExists => currency_exists(&code),
                other => other.into(),
            })?;
            Ok(format!("Currency {code} saved with rate {rate} RUB."))
        }
        TerminalAction::UpdateCurrency => {
            let code = currency_field(fields, "code")?;
            let rate = rate_field(fields, "rate")?;
            ledger.update_currency(&code, rate).await.map_err(|error| match error {
                LedgerError::NotFound => currency_not_found(&code),
                other => other.into(),
            })?;
            Ok(format!("Rate for {code} changed to {rate} RUB."))
        }
        TerminalAction::DeleteCurrency => {
            let code = currency_field(fields, "code")?;
            ledger.delete_currency(&code).await.map_err(|error| match error {
                LedgerError::NotFound => currency_not_found(&code),
                other => other.into(),
            })?;
            Ok(format!("Currency {code} deleted."))
        }
        TerminalAction::ConvertAmount => {
            let code = currency_field(fields, "code")?;
            let rate: Decimal = fields.number(CURRENT_RATE_FIELD)?;
            let amount = fields.number("amount")?;
            let converted = amount.checked_mul(rate).ok_or(ValidationError::Overflow)?;
            Ok(format!("{} {code} = {} RUB", format_money(amount), format_money(converted)))
        }
    }
}
