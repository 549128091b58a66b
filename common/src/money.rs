//! [`Money`]-related definitions.

use std::{fmt, str::FromStr};

use rust_decimal::{prelude::ToPrimitive as _, Decimal};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Non-negative amount of money.
///
/// Always kept in its normalized form, so `10.50` and `10.5` are the same
/// [`Money`].
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Money(Decimal);

impl Money {
    /// Zero [`Money`].
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Creates a new [`Money`] if the provided `amount` is non-negative.
    #[must_use]
    pub fn new(amount: Decimal) -> Option<Self> {
        (!amount.is_sign_negative() || amount.is_zero())
            .then(|| Self(amount.normalize()))
    }

    /// Returns the amount of this [`Money`].
    #[must_use]
    pub fn amount(self) -> Decimal {
        self.0
    }

    /// Multiplies this [`Money`] by the provided `quantity`.
    ///
    /// [`None`] is returned on overflow.
    #[must_use]
    pub fn checked_times(self, quantity: u32) -> Option<Self> {
        self.0
            .checked_mul(Decimal::from(quantity))
            .map(|amount| Self(amount.normalize()))
    }

    /// Adds the provided `other` [`Money`] to this one.
    ///
    /// [`None`] is returned on overflow.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0
            .checked_add(other.0)
            .map(|amount| Self(amount.normalize()))
    }

    /// Sums up all the provided amounts.
    ///
    /// [`None`] is returned on overflow.
    pub fn checked_sum(amounts: impl IntoIterator<Item = Self>) -> Option<Self> {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, Self::checked_add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Money {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let amount = Decimal::from_str(s.trim()).map_err(|_| "invalid amount")?;
        Self::new(amount).ok_or("negative amount")
    }
}

impl TryFrom<f64> for Money {
    type Error = &'static str;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let amount = Decimal::try_from(value).map_err(|_| "invalid amount")?;
        Self::new(amount).ok_or("negative amount")
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.is_integer() {
            if let Some(amount) = self.0.to_u64() {
                return serializer.serialize_u64(amount);
            }
        }
        match self.0.to_f64() {
            Some(amount) => serializer.serialize_f64(amount),
            None => serializer.collect_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        /// [`de::Visitor`] accepting numbers and numeric strings.
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = Money;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative amount of money")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Money, E> {
                Ok(Money(Decimal::from(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Money, E> {
                Money::new(Decimal::from(v)).ok_or_else(|| {
                    E::invalid_value(de::Unexpected::Signed(v), &self)
                })
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Money, E> {
                Money::try_from(v).map_err(|_| {
                    E::invalid_value(de::Unexpected::Float(v), &self)
                })
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Money, E> {
                Money::from_str(v)
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

#[cfg(test)]
mod spec {
    use std::str::FromStr as _;

    use rust_decimal::Decimal;

    use super::Money;

    fn money(s: &str) -> Money {
        Money::from_str(s).unwrap()
    }

    #[test]
    fn from_str() {
        assert_eq!(money("123.45").amount(), Decimal::from_str("123.45").unwrap());
        assert_eq!(money("10.50"), money("10.5"));
        assert_eq!(money("0"), Money::ZERO);

        assert!(Money::from_str("-1").is_err());
        assert!(Money::from_str("12USD").is_err());
        assert!(Money::from_str("").is_err());
    }

    #[test]
    fn to_string() {
        assert_eq!(money("123.45").to_string(), "123.45");
        assert_eq!(money("123.00").to_string(), "123");
        assert_eq!(money("10.50").to_string(), "10.5");
    }

    #[test]
    fn arithmetic() {
        assert_eq!(money("10").checked_times(2), Some(money("20")));
        assert_eq!(money("0.1").checked_add(money("0.2")), Some(money("0.3")));
        assert_eq!(
            Money::checked_sum([money("1.25"), money("2.75"), money("6")]),
            Some(money("10")),
        );
        assert_eq!(Money::checked_sum([]), Some(Money::ZERO));
    }

    #[test]
    fn detects_overflow() {
        let max = money("79228162514264337593543950335");

        assert_eq!(max.checked_times(10), None);
        assert_eq!(max.checked_times(1), Some(max));
        assert_eq!(max.checked_add(money("1")), None);
        assert_eq!(Money::checked_sum([max, max]), None);
    }

    #[test]
    fn serializes_as_number() {
        assert_eq!(serde_json::to_string(&money("20")).unwrap(), "20");
        assert_eq!(serde_json::to_string(&money("19.99")).unwrap(), "19.99");
    }

    #[test]
    fn deserializes_numbers_and_strings() {
        let parse = |s| serde_json::from_str::<Money>(s);

        assert_eq!(parse("20").unwrap(), money("20"));
        assert_eq!(parse("19.99").unwrap(), money("19.99"));
        assert_eq!(parse("\"7.5\"").unwrap(), money("7.5"));

        assert!(parse("-3").is_err());
        assert!(parse("\"abc\"").is_err());
        assert!(parse("null").is_err());
    }
}
