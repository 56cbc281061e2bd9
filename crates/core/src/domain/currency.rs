use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// All stored amounts and rates are expressed against this currency.
pub const BASE_CURRENCY: &str = "RUB";

const MAX_CODE_LEN: usize = 10;

/// Upper-cased currency code. Lookups are case-insensitive because every code
/// is normalized on the way in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Empty);
        }
        if trimmed.len() > MAX_CODE_LEN || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidCurrencyCode(trimmed.to_owned()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn base() -> Self {
        Self(BASE_CURRENCY.to_owned())
    }

    pub fn is_base(&self) -> bool {
        self.0 == BASE_CURRENCY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.0
    }
}

/// Units of the base currency per one unit of a currency. Always positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Rate(Decimal);

impl Rate {
    pub fn new(value: Decimal) -> Result<Self, ValidationError> {
        if value <= Decimal::ZERO {
            return Err(ValidationError::NotPositive);
        }
        Ok(Self(value.normalize()))
    }

    pub fn one() -> Self {
        Self(Decimal::ONE)
    }

    pub fn value(self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<Decimal> for Rate {
    type Error = ValidationError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Rate> for Decimal {
    fn from(value: Rate) -> Self {
        value.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyDefinition {
    pub code: CurrencyCode,
    pub rate: Rate,
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{CurrencyCode, Rate};
    use crate::errors::ValidationError;

    #[test]
    fn codes_are_trimmed_and_uppercased() {
        let code = CurrencyCode::parse("  usd ").expect("valid code");
        assert_eq!(code.as_str(), "USD");
        assert!(!code.is_base());
        assert!(CurrencyCode::parse("rub").expect("valid code").is_base());
    }

    #[test]
    fn codes_reject_blank_and_punctuation() {
        assert_eq!(CurrencyCode::parse("   "), Err(ValidationError::Empty));
        assert_eq!(
            CurrencyCode::parse("US-D"),
            Err(ValidationError::InvalidCurrencyCode("US-D".to_owned()))
        );
        assert!(CurrencyCode::parse("ABCDEFGHIJK").is_err());
    }

    #[test]
    fn rates_must_be_positive() {
        assert_eq!(Rate::new(Decimal::ZERO), Err(ValidationError::NotPositive));
        assert_eq!(Rate::new(Decimal::new(-5, 0)), Err(ValidationError::NotPositive));
        assert_eq!(Rate::new(Decimal::new(9000, 2)).expect("positive").to_string(), "90");
    }
}
