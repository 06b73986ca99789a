use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use std::str::FromStr;

/// decimal places of the currency minor unit (cents)
pub const MINOR_UNIT_DP: u32 = 2;

fn round_minor(d: Decimal) -> Decimal {
    d.round_dp_with_strategy(MINOR_UNIT_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Money type rounded to the currency minor unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(from = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);
    pub const CENT: Money = Money(Decimal::from_parts(1, 0, 0, false, 2));

    /// create from decimal, rounding half away from zero to cents
    pub fn from_decimal(d: Decimal) -> Self {
        Money(round_minor(d))
    }

    /// create from string with exact parsing
    pub fn from_str_exact(s: &str) -> Result<Self, rust_decimal::Error> {
        Ok(Money(round_minor(Decimal::from_str(s)?)))
    }

    /// create from integer amount (pesos, dollars, etc)
    pub fn from_major(amount: i64) -> Self {
        Money(Decimal::from(amount))
    }

    /// create from minor amount (cents)
    pub fn from_minor(amount: i64) -> Self {
        Money(Decimal::new(amount, MINOR_UNIT_DP))
    }

    /// get underlying decimal
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    pub fn max(self, other: Self) -> Self {
        Money(self.0.max(other.0))
    }

    /// subtract, flooring the result at zero
    pub fn saturating_sub(self, other: Self) -> Self {
        (self - other).max(Money::ZERO)
    }

    /// apply a rate once (simple interest), e.g. 10% of 1000 is 100
    pub fn apply_rate(&self, rate: Rate) -> Self {
        Money(round_minor(self.0 * rate.as_decimal()))
    }

    /// equal share of this amount over `parts`, rounded to cents
    pub fn share(&self, parts: u32) -> Self {
        if parts == 0 {
            return *self;
        }
        Money(round_minor(self.0 / Decimal::from(parts)))
    }

    /// equal share over `parts`, truncated to cents so `parts` shares never exceed the whole
    pub fn share_down(&self, parts: u32) -> Self {
        if parts == 0 {
            return *self;
        }
        Money((self.0 / Decimal::from(parts)).round_dp_with_strategy(MINOR_UNIT_DP, RoundingStrategy::ToZero))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::from_str_exact(s)
    }
}

impl From<Decimal> for Money {
    fn from(d: Decimal) -> Self {
        Money::from_decimal(d)
    }
}

impl From<i32> for Money {
    fn from(i: i32) -> Self {
        Money::from_major(i as i64)
    }
}

impl From<u32> for Money {
    fn from(i: u32) -> Self {
        Money::from_major(i as i64)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, other: Money) -> Money {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Money) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, other: Money) -> Money {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Money) {
        self.0 -= other.0;
    }
}

impl Mul<u32> for Money {
    type Output = Money;

    fn mul(self, times: u32) -> Money {
        Money(self.0 * Decimal::from(times))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, x| acc + *x)
    }
}

/// rate type for interest rates, stored as a fraction (0.10 for 10%)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Rate(Decimal);

impl Rate {
    pub const ZERO: Rate = Rate(Decimal::ZERO);

    /// create from decimal (e.g., 0.05 for 5%)
    pub fn from_decimal(d: Decimal) -> Self {
        Rate(d)
    }

    /// create from whole percentage (e.g., 5 for 5%)
    pub fn from_percentage(p: u32) -> Self {
        Rate(Decimal::from(p) / Decimal::from(100))
    }

    /// create from a fractional percentage (e.g., 12.5 for 12.5%)
    pub fn from_percentage_decimal(p: Decimal) -> Self {
        Rate(p / Decimal::from(100))
    }

    /// create from basis points (e.g., 500 for 5%)
    pub fn from_bps(bps: u32) -> Self {
        Rate(Decimal::from(bps) / Decimal::from(10000))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn as_percentage(&self) -> Decimal {
        self.0 * Decimal::from(100)
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percentage().normalize())
    }
}

impl From<Decimal> for Rate {
    fn from(d: Decimal) -> Self {
        Rate::from_decimal(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_rounds_to_cents() {
        let m = Money::from_str_exact("100.125").unwrap();
        assert_eq!(m.to_string(), "100.13"); // half away from zero

        let m = Money::from_decimal(dec!(-0.005));
        assert_eq!(m, Money::from_decimal(dec!(-0.01)));
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(Money::from_minor(12_345), Money::from_decimal(dec!(123.45)));
        assert_eq!(Money::from_minor(1), Money::CENT);
    }

    #[test]
    fn test_share_and_rate() {
        let total = Money::from_major(1000);
        assert_eq!(total.share(3), Money::from_decimal(dec!(333.33)));
        assert_eq!(total.share(0), total);

        let interest = total.apply_rate(Rate::from_percentage(10));
        assert_eq!(interest, Money::from_major(100));

        let interest = Money::from_decimal(dec!(99.99)).apply_rate(Rate::from_percentage_decimal(dec!(12.5)));
        assert_eq!(interest, Money::from_decimal(dec!(12.50)));
    }

    #[test]
    fn test_share_down_never_overshoots() {
        let interest = Money::from_decimal(dec!(0.03));
        assert_eq!(interest.share(6), Money::CENT);
        assert_eq!(interest.share_down(6), Money::ZERO);
        assert_eq!(Money::from_major(1000).share_down(3), Money::from_decimal(dec!(333.33)));
        assert_eq!(Money::from_decimal(dec!(0.05)).share_down(2), Money::from_decimal(dec!(0.02)));
    }

    #[test]
    fn test_deserialize_rounds_to_cents() {
        let m: Money = serde_json::from_str("\"100.005\"").unwrap();
        assert_eq!(m, Money::from_decimal(dec!(100.01)));

        let m: Money = serde_json::from_str("\"19.994\"").unwrap();
        assert_eq!(m.to_string(), "19.99");

        let back: Money = serde_json::from_str(&serde_json::to_string(&m).unwrap()).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_saturating_sub_floors_at_zero() {
        let a = Money::from_major(50);
        assert_eq!(a.saturating_sub(Money::from_major(80)), Money::ZERO);
        assert_eq!(a.saturating_sub(Money::from_major(20)), Money::from_major(30));
    }

    #[test]
    fn test_sum() {
        let parts = vec![Money::from_minor(33_333), Money::from_minor(33_333), Money::from_minor(33_334)];
        let total: Money = parts.iter().sum();
        assert_eq!(total, Money::from_major(1000));
    }

    #[test]
    fn test_rate_display() {
        assert_eq!(Rate::from_percentage(15).to_string(), "15%");
        assert_eq!(Rate::from_bps(250).as_percentage(), dec!(2.5));
    }
}
