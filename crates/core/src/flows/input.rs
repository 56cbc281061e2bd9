use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::errors::ValidationError;
use crate::flows::states::Inbound;

/// How an inbound message reads before any flow looks at it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedInput {
    Empty,
    /// `/name` with the slash and any `@bot` suffix stripped, lowercased.
    Command(String),
    Text(String),
}

impl ParsedInput {
    pub fn classify(inbound: &Inbound) -> Self {
        if let Some(choice) = &inbound.choice {
            let choice = choice.trim();
            return if choice.is_empty() { Self::Empty } else { Self::Text(choice.to_owned()) };
        }

        let text = inbound.text.trim();
        if text.is_empty() {
            return Self::Empty;
        }
        match text.strip_prefix('/') {
            Some(rest) => {
                let word = rest.split_whitespace().next().unwrap_or_default();
                let name = word.split('@').next().unwrap_or_default();
                Self::Command(name.to_ascii_lowercase())
            }
            None => Self::Text(text.to_owned()),
        }
    }

    pub fn is_command(&self, name: &str) -> bool {
        matches!(self, Self::Command(command) if command == name)
    }
}

/// Positive decimal; a comma is accepted as the decimal separator.
/// Largest amount or rate accepted from a user.
pub const MAX_DECIMAL_INPUT: i64 = 1_000_000_000_000;

pub fn parse_positive_decimal(raw: &str) -> Result<Decimal, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    let value = Decimal::from_str(&trimmed.replace(',', "."))
        .map_err(|_| ValidationError::NotANumber(trimmed.to_owned()))?;
    if value <= Decimal::ZERO {
        return Err(ValidationError::NotPositive);
    }
    if value > Decimal::from(MAX_DECIMAL_INPUT) {
        return Err(ValidationError::TooLarge { max: MAX_DECIMAL_INPUT });
    }
    Ok(value)
}

pub fn parse_integer(raw: &str) -> Result<i64, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    trimmed.parse::<i64>().map_err(|_| ValidationError::NotAnInteger(trimmed.to_owned()))
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(trimmed.to_owned()))
}

pub fn parse_free_text(raw: &str, max_len: usize) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    if trimmed.chars().count() > max_len {
        return Err(ValidationError::TooLong { max: max_len });
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::{parse_date, parse_free_text, parse_integer, parse_positive_decimal, ParsedInput};
    use crate::errors::ValidationError;
    use crate::flows::states::{ConversationKey, Inbound};

    fn classify(text: &str) -> ParsedInput {
        ParsedInput::classify(&Inbound::text(ConversationKey::new("alice"), text))
    }

    #[test]
    fn commands_are_normalized() {
        assert_eq!(classify(" /Convert "), ParsedInput::Command("convert".to_owned()));
        assert_eq!(classify("/reg@tally_bot now"), ParsedInput::Command("reg".to_owned()));
        assert_eq!(classify("hello"), ParsedInput::Text("hello".to_owned()));
        assert_eq!(classify("   "), ParsedInput::Empty);
    }

    #[test]
    fn button_presses_are_never_commands() {
        let inbound = Inbound::choice(ConversationKey::new("alice"), "/cancel");
        assert_eq!(ParsedInput::classify(&inbound), ParsedInput::Text("/cancel".to_owned()));
    }

    #[test]
    fn decimals_accept_comma_separator() {
        assert_eq!(parse_positive_decimal("75,43"), Ok(Decimal::from_str("75.43").expect("dec")));
        assert_eq!(parse_positive_decimal(" 1500 "), Ok(Decimal::from(1500)));
        assert_eq!(parse_positive_decimal("0"), Err(ValidationError::NotPositive));
        assert_eq!(parse_positive_decimal("-3"), Err(ValidationError::NotPositive));
        assert_eq!(parse_positive_decimal("abc"), Err(ValidationError::NotANumber("abc".to_owned())));
    }

    #[test]
    fn decimals_above_the_input_cap_are_rejected() {
        assert_eq!(parse_positive_decimal("1000000000000"), Ok(Decimal::from(1_000_000_000_000_i64)));
        assert_eq!(
            parse_positive_decimal("10000000000000000000000000000"),
            Err(ValidationError::TooLarge { max: 1_000_000_000_000 })
        );
    }

    #[test]
    fn integers_and_dates_are_strict() {
        assert_eq!(parse_integer("42"), Ok(42));
        assert_eq!(parse_integer("4.2"), Err(ValidationError::NotAnInteger("4.2".to_owned())));
        assert_eq!(parse_date("2024-03-15"), Ok(NaiveDate::from_ymd_opt(2024, 3, 15).expect("date")));
        assert_eq!(parse_date("15.03.2024"), Err(ValidationError::InvalidDate("15.03.2024".to_owned())));
        assert!(parse_date("2024-02-30").is_err());
    }

    #[test]
    fn free_text_is_bounded() {
        assert_eq!(parse_free_text("  Alice ", 64), Ok("Alice".to_owned()));
        assert_eq!(parse_free_text("abcdef", 5), Err(ValidationError::TooLong { max: 5 }));
        assert_eq!(parse_free_text("", 5), Err(ValidationError::Empty));
    }
}
