use std::fmt;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::{currency::CurrencyCode, user::UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub i64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    Income,
    Expense,
}

impl OperationCategory {
    /// Storage key.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }

    /// Label used when listing operations back to the user.
    pub fn label(self) -> &'static str {
        match self {
            Self::Income => "INCOME",
            Self::Expense => "EXPENSE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "income" => Some(Self::Income),
            "expense" => Some(Self::Expense),
            _ => None,
        }
    }
}

/// Operation as captured from the user, before the ledger assigns an id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOperation {
    pub date: NaiveDate,
    pub amount: Decimal,
    pub category: OperationCategory,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialOperation {
    pub id: OperationId,
    pub owner: UserId,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub category: OperationCategory,
    pub currency: CurrencyCode,
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Two-decimal rendering used in every user-facing amount.
pub fn format_money(value: Decimal) -> String {
    format!("{:.2}", round_money(value))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use super::{format_money, round_money, OperationCategory};

    fn dec(raw: &str) -> Decimal {
        Decimal::from_str(raw).expect("decimal literal")
    }

    #[test]
    fn money_rounds_half_away_from_zero() {
        assert_eq!(round_money(dec("0.125")), dec("0.13"));
        assert_eq!(round_money(dec("-0.125")), dec("-0.13"));
        assert_eq!(round_money(dec("2.5")), dec("2.5"));
    }

    #[test]
    fn money_always_renders_two_decimals() {
        assert_eq!(format_money(dec("250") / dec("100")), "2.50");
        assert_eq!(format_money(dec("1000") / dec("90")), "11.11");
        assert_eq!(format_money(dec("7")), "7.00");
    }

    #[test]
    fn categories_parse_case_insensitively() {
        assert_eq!(OperationCategory::parse(" Income "), Some(OperationCategory::Income));
        assert_eq!(OperationCategory::parse("EXPENSE"), Some(OperationCategory::Expense));
        assert_eq!(OperationCategory::parse("refund"), None);
        assert_eq!(OperationCategory::Expense.label(), "EXPENSE");
    }
}
