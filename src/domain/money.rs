use crate::error::LedgerError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// A non-negative monetary value in major units (e.g. `349.00`).
///
/// Wraps `rust_decimal::Decimal` so that settled, remaining and planned totals
/// can never go negative through arithmetic on the domain type.
///
/// Single amounts are bounded by [`Amount::MAX`], far below `Decimal::MAX`, so
/// summing any realistic number of them cannot overflow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Largest accepted single amount: one quadrillion major units.
    pub const MAX: Self = Self(dec!(1000000000000000));

    pub fn new(value: Decimal) -> Result<Self, LedgerError> {
        if value < Decimal::ZERO {
            return Err(LedgerError::ValidationError(format!(
                "Amount must not be negative, got {value}"
            )));
        }
        if value > Self::MAX.0 {
            return Err(LedgerError::ValidationError(format!(
                "Amount exceeds the maximum of {}, got {value}",
                Self::MAX
            )));
        }
        Ok(Self(value))
    }

    /// Like [`Amount::new`] but additionally rejects zero.
    pub fn positive(value: Decimal) -> Result<Self, LedgerError> {
        if value.is_zero() {
            return Err(LedgerError::ValidationError(
                "Amount must be positive".to_string(),
            ));
        }
        Self::new(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Subtraction that floors at zero instead of going negative.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        if rhs.0 >= self.0 {
            Self::ZERO
        } else {
            Self(self.0 - rhs.0)
        }
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// ISO 4217 currency code, normalised to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, LedgerError> {
        let code = code.trim().to_ascii_lowercase();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_lowercase()) {
            Ok(Self(code))
        } else {
            Err(LedgerError::ValidationError(format!(
                "Invalid currency code: {code:?}"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(0.0)).is_ok());
        assert!(Amount::positive(dec!(1.0)).is_ok());
        assert!(matches!(
            Amount::positive(dec!(0.0)),
            Err(LedgerError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(LedgerError::ValidationError(_))
        ));
        assert!(Amount::positive(dec!(-1.0)).is_err());
    }

    #[test]
    fn test_amount_upper_bound() {
        assert!(Amount::new(Amount::MAX.value()).is_ok());
        assert!(Amount::new(Amount::MAX.value() + dec!(0.01)).is_err());
        assert!(Amount::new(Decimal::MAX).is_err());
        assert!(serde_json::from_str::<Amount>("\"79228162514264337593543950335\"").is_err());
    }

    #[test]
    fn test_sums_of_maximal_amounts_do_not_overflow() {
        let total: Amount = std::iter::repeat_n(Amount::MAX, 10_000).sum();
        assert_eq!(total.value(), dec!(10000000000000000000));
    }

    #[test]
    fn test_amount_arithmetic() {
        let a = Amount::new(dec!(349.00)).unwrap();
        let b = Amount::new(dec!(50.00)).unwrap();
        assert_eq!(a.saturating_sub(b), Amount::new(dec!(299.00)).unwrap());
        assert_eq!(b.saturating_sub(a), Amount::ZERO);
        assert_eq!([a, b].iter().sum::<Amount>(), Amount::new(dec!(399.00)).unwrap());
    }

    #[test]
    fn test_amount_display_two_places() {
        assert_eq!(Amount::new(dec!(997)).unwrap().to_string(), "997.00");
    }

    #[test]
    fn test_currency_normalisation() {
        assert_eq!(Currency::new(" EUR ").unwrap().as_str(), "eur");
        assert!(Currency::new("euro").is_err());
        assert!(Currency::new("e1r").is_err());
    }

    #[test]
    fn test_amount_deserialization_rejects_negative() {
        let ok: Amount = serde_json::from_str("\"12.50\"").unwrap();
        assert_eq!(ok.value(), dec!(12.50));
        assert!(serde_json::from_str::<Amount>("\"-1\"").is_err());
    }
}
