use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// Upper bound: 10^12 - 0.01, expressed in minor units (cents).
const MAX_MINOR_UNITS: i64 = 99_999_999_999_999;

/// A fixed-point monetary amount with exactly 2 fractional digits,
/// stored internally as minor units (cents) to avoid floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(i64);

impl Amount {
    /// Construct from whole cents. Rejects negative values and values
    /// above the 10^12 - 0.01 ceiling.
    pub fn from_minor_units(minor: i64) -> Result<Self> {
        if minor < 0 {
            return Err(VaultError::InvalidAmount(
                "amount must be non-negative".into(),
            ));
        }
        if minor > MAX_MINOR_UNITS {
            return Err(VaultError::InvalidAmount(format!(
                "amount exceeds maximum of {}.{:02}",
                MAX_MINOR_UNITS / 100,
                MAX_MINOR_UNITS % 100
            )));
        }
        Ok(Self(minor))
    }

    /// Strict parse of `"5000.00"`-style decimal strings: exactly two
    /// fractional digits required, no thousands separators, no sign.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let bad = || VaultError::InvalidAmount(format!("not a valid amount: {}", s));

        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => return Err(bad()),
        };

        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        if frac_part.len() != 2 || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(VaultError::InvalidAmount(format!(
                "amount must have exactly 2 fractional digits: {}",
                s
            )));
        }

        let int_value: i64 = int_part.parse().map_err(|_| bad())?;
        let frac_value: i64 = frac_part.parse().map_err(|_| bad())?;

        let minor = int_value
            .checked_mul(100)
            .and_then(|v| v.checked_add(frac_value))
            .ok_or_else(bad)?;

        Self::from_minor_units(minor)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Amount {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Amount {
    type Error = VaultError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Amount> for String {
    fn from(value: Amount) -> Self {
        value.to_string()
    }
}

/// ISO-4217 three-letter currency codes this vault recognizes. Matches
/// the allow-list the original delegated-token schema validated
/// against; any code outside this set is rejected at the schema stage.
pub const RECOGNIZED_CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CHF", "CAD", "AUD", "NZD", "SEK", "NOK", "DKK", "PLN", "CZK",
    "HUF", "RON", "BGN", "INR", "CNY", "HKD", "SGD", "KRW", "BRL", "MXN", "ZAR", "AED", "SAR",
    "QAR", "KWD", "BHD", "OMR", "JOD", "ILS", "TRY", "RUB", "THB", "MYR", "IDR", "PHP", "VND",
    "PKR",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    pub fn parse(s: &str) -> Result<Self> {
        let upper = s.to_ascii_uppercase();
        if !RECOGNIZED_CURRENCIES.contains(&upper.as_str()) {
            return Err(VaultError::InvalidCurrency(s.to_string()));
        }
        let bytes = upper.as_bytes();
        Ok(Self([bytes[0], bytes[1], bytes[2]]))
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).expect("currency codes are ASCII by construction")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Currency {
    type Error = VaultError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_amount() {
        let a = Amount::parse("5000.00").unwrap();
        assert_eq!(a.minor_units(), 500_000);
        assert_eq!(a.to_string(), "5000.00");
    }

    #[test]
    fn rejects_single_fractional_digit() {
        assert!(Amount::parse("5000.0").is_err());
    }

    #[test]
    fn rejects_too_many_fractional_digits() {
        assert!(Amount::parse("5000.001").is_err());
    }

    #[test]
    fn boundary_one_cent_accepted() {
        assert!(Amount::parse("0.01").is_ok());
    }

    #[test]
    fn boundary_zero_rejected_by_caller_when_positivity_required() {
        let a = Amount::parse("0.00").unwrap();
        assert!(!a.is_positive());
    }

    #[test]
    fn rejects_above_ceiling() {
        assert!(Amount::parse("1000000000000.00").is_err());
        assert!(Amount::parse("999999999999.99").is_ok());
    }

    #[test]
    fn rejects_negative() {
        assert!(Amount::parse("-5.00").is_err());
    }

    #[test]
    fn currency_case_insensitive_and_validated() {
        assert_eq!(Currency::parse("usd").unwrap().as_str(), "USD");
        assert!(Currency::parse("XXX").is_err());
    }
}
