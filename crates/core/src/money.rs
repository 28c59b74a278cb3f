//! Monetary amounts.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Amount in the smallest currency unit (VND has no minor unit, so đồng).
///
/// Both gateways take integer amounts, so money never goes through floats.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn new(amount: u64) -> Self {
        Self(amount)
    }

    pub const fn amount(self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or(DomainError::Overflow)
    }

    /// Line subtotal: unit price × quantity.
    pub fn times(self, quantity: u32) -> DomainResult<Money> {
        self.0
            .checked_mul(u64::from(quantity))
            .map(Money)
            .ok_or(DomainError::Overflow)
    }

    /// Sum a sequence of amounts, failing on overflow.
    pub fn sum<I>(amounts: I) -> DomainResult<Money>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }
}

impl ValueObject for Money {}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} VND", self.0)
    }
}

impl From<u64> for Money {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn times_multiplies_by_quantity() {
        assert_eq!(Money::new(50).times(2).unwrap(), Money::new(100));
        assert_eq!(Money::new(u64::MAX).times(2), Err(DomainError::Overflow));
    }

    #[test]
    fn serializes_as_plain_integer() {
        let json = serde_json::to_string(&Money::new(200)).unwrap();
        assert_eq!(json, "200");
    }

    proptest! {
        #[test]
        fn sum_matches_u128_reference(amounts in prop::collection::vec(0u64..1_000_000_000u64, 0..20)) {
            let expected: u128 = amounts.iter().map(|a| u128::from(*a)).sum();
            let total = Money::sum(amounts.into_iter().map(Money::new)).unwrap();
            prop_assert_eq!(u128::from(total.amount()), expected);
        }
    }
}
