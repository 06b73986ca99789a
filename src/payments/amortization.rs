use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{BillingError, Result};

/// one row of an installment schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledInstallment {
    pub number: u32,
    pub due_date: NaiveDate,
    pub amount: Money,
    pub principal_portion: Money,
    pub interest_portion: Money,
    /// principal still owed before this installment
    pub remaining_principal: Money,
}

/// amortization schedule for one purchase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentSchedule {
    pub principal: Money,
    pub interest_rate: Rate,
    pub total_interest: Money,
    /// principal plus interest; installments sum to exactly this
    pub total_amount: Money,
    pub installments_count: u32,
    /// equal share paid by every installment but the last
    pub installment_amount: Money,
    pub start_date: NaiveDate,
    pub installments: Vec<ScheduledInstallment>,
}

impl InstallmentSchedule {
    pub fn get(&self, number: u32) -> Option<&ScheduledInstallment> {
        number
            .checked_sub(1)
            .and_then(|idx| self.installments.get(idx as usize))
    }

    pub fn last_due_date(&self) -> Option<NaiveDate> {
        self.installments.last().map(|i| i.due_date)
    }
}

/// splits a purchase into equal monthly installments
#[derive(Debug, Clone, Copy)]
pub struct AmortizationCalculator {
    max_installments: u32,
}

impl AmortizationCalculator {
    pub fn new(max_installments: u32) -> Self {
        Self { max_installments }
    }

    pub fn max_installments(&self) -> u32 {
        self.max_installments
    }

    /// build the schedule
    ///
    /// Interest is simple: the rate is applied once to the principal and the
    /// result is divided into `count` equal shares rounded to cents. The last
    /// installment absorbs the rounding remainder so the rows sum exactly to
    /// the interest-adjusted total. Installment `k` falls due `k` months after
    /// `start_date`, clamped to the end of shorter months.
    pub fn build(
        &self,
        amount: Money,
        count: u32,
        start_date: NaiveDate,
        rate: Rate,
    ) -> Result<InstallmentSchedule> {
        if !amount.is_positive() {
            return Err(BillingError::InvalidSchedule {
                message: format!("amount must be greater than 0, got {amount}"),
            });
        }
        if count < 1 || count > self.max_installments {
            return Err(BillingError::InvalidSchedule {
                message: format!(
                    "installments count must be between 1 and {}, got {count}",
                    self.max_installments
                ),
            });
        }
        if rate.is_negative() {
            return Err(BillingError::InvalidInterestRate { rate });
        }

        let total_interest = amount.apply_rate(rate);
        let total_amount = amount + total_interest;

        let installment_amount = total_amount.share(count);
        // truncated so the preceding shares never exceed the total interest
        let interest_share = total_interest.share_down(count);
        let principal_share = installment_amount - interest_share;

        let preceding = count - 1;
        let last_amount = total_amount - installment_amount * preceding;
        let last_interest = total_interest - interest_share * preceding;
        let last_principal = last_amount - last_interest;

        if !installment_amount.is_positive() || !last_amount.is_positive() {
            return Err(BillingError::InvalidSchedule {
                message: format!("amount {total_amount} is too small to split into {count} installments"),
            });
        }
        if principal_share.is_negative() || last_principal.is_negative() || last_interest.is_negative() {
            return Err(BillingError::InvalidSchedule {
                message: "interest share exceeds installment amount".to_string(),
            });
        }

        let mut installments = Vec::with_capacity(count as usize);
        let mut remaining_principal = amount;

        for number in 1..=count {
            let due_date = add_months(start_date, number)?;
            let is_last = number == count;

            let (amount, principal_portion, interest_portion) = if is_last {
                (last_amount, last_principal, last_interest)
            } else {
                (installment_amount, principal_share, interest_share)
            };

            installments.push(ScheduledInstallment {
                number,
                due_date,
                amount,
                principal_portion,
                interest_portion,
                remaining_principal,
            });

            remaining_principal = remaining_principal.saturating_sub(principal_portion);
        }

        Ok(InstallmentSchedule {
            principal: amount,
            interest_rate: rate,
            total_interest,
            total_amount,
            installments_count: count,
            installment_amount,
            start_date,
            installments,
        })
    }
}

/// add calendar months, clamping the day to the target month's length
fn add_months(date: NaiveDate, months: u32) -> Result<NaiveDate> {
    date.checked_add_months(Months::new(months))
        .ok_or_else(|| BillingError::InvalidDate {
            message: format!("{date} plus {months} months is out of range"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn total(schedule: &InstallmentSchedule) -> Money {
        schedule.installments.iter().map(|i| i.amount).sum()
    }

    #[test]
    fn test_thousand_over_three_puts_remainder_last() {
        let calc = AmortizationCalculator::new(24);
        let schedule = calc
            .build(Money::from_major(1000), 3, date(2024, 1, 15), Rate::ZERO)
            .unwrap();

        let amounts: Vec<Money> = schedule.installments.iter().map(|i| i.amount).collect();
        assert_eq!(
            amounts,
            vec![
                Money::from_decimal(dec!(333.33)),
                Money::from_decimal(dec!(333.33)),
                Money::from_decimal(dec!(333.34)),
            ]
        );
        assert_eq!(total(&schedule), Money::from_major(1000));
        assert_eq!(schedule.total_interest, Money::ZERO);
    }

    #[test]
    fn test_sum_matches_interest_adjusted_total() {
        let calc = AmortizationCalculator::new(24);
        let cases = [
            (dec!(1000.00), 3, dec!(0)),
            (dec!(999.99), 7, dec!(15)),
            (dec!(0.10), 2, dec!(0)),
            (dec!(12345.67), 24, dec!(37.5)),
            (dec!(100), 1, dec!(10)),
            (dec!(58.01), 11, dec!(3.3)),
        ];

        for (amount, count, pct) in cases {
            let amount = Money::from_decimal(amount);
            let rate = Rate::from_percentage_decimal(pct);
            let schedule = calc.build(amount, count, date(2024, 3, 1), rate).unwrap();

            assert_eq!(schedule.installments.len(), count as usize);
            assert_eq!(schedule.total_amount, amount + amount.apply_rate(rate));
            assert_eq!(total(&schedule), schedule.total_amount, "amount {amount} count {count}");

            let principal: Money = schedule.installments.iter().map(|i| i.principal_portion).sum();
            let interest: Money = schedule.installments.iter().map(|i| i.interest_portion).sum();
            assert_eq!(principal, amount);
            assert_eq!(interest, schedule.total_interest);
        }
    }

    #[test]
    fn test_small_interest_portions_stay_non_negative() {
        let calc = AmortizationCalculator::new(24);
        let amount = Money::from_decimal(dec!(0.60));
        let schedule = calc.build(amount, 6, date(2024, 1, 1), Rate::from_percentage(5)).unwrap();

        assert_eq!(schedule.total_interest, Money::from_decimal(dec!(0.03)));
        for row in &schedule.installments {
            assert!(!row.interest_portion.is_negative(), "row {}", row.number);
            assert!(!row.principal_portion.is_negative(), "row {}", row.number);
        }
        let last = schedule.installments.last().unwrap();
        assert_eq!(last.interest_portion, Money::from_decimal(dec!(0.03)));
        assert_eq!(last.amount, Money::from_decimal(dec!(0.08)));

        let principal: Money = schedule.installments.iter().map(|i| i.principal_portion).sum();
        assert_eq!(principal, amount);
        assert_eq!(total(&schedule), schedule.total_amount);
    }

    #[test]
    fn test_simple_interest_applied_before_split() {
        let calc = AmortizationCalculator::new(24);
        let schedule = calc
            .build(Money::from_major(1200), 12, date(2024, 1, 1), Rate::from_percentage(10))
            .unwrap();

        assert_eq!(schedule.total_interest, Money::from_major(120));
        assert_eq!(schedule.total_amount, Money::from_major(1320));
        assert_eq!(schedule.installment_amount, Money::from_major(110));
        assert_eq!(schedule.installments[0].interest_portion, Money::from_major(10));
        assert_eq!(schedule.installments[0].principal_portion, Money::from_major(100));
        assert_eq!(schedule.installments[5].remaining_principal, Money::from_major(700));
    }

    #[test]
    fn test_due_dates_clamp_to_month_end() {
        let calc = AmortizationCalculator::new(24);
        let schedule = calc
            .build(Money::from_major(400), 4, date(2024, 1, 31), Rate::ZERO)
            .unwrap();

        let dates: Vec<NaiveDate> = schedule.installments.iter().map(|i| i.due_date).collect();
        assert_eq!(
            dates,
            vec![date(2024, 2, 29), date(2024, 3, 31), date(2024, 4, 30), date(2024, 5, 31)]
        );
        assert_eq!(schedule.last_due_date(), Some(date(2024, 5, 31)));
    }

    #[test]
    fn test_numbers_are_gapless() {
        let calc = AmortizationCalculator::new(24);
        let schedule = calc
            .build(Money::from_major(500), 6, date(2024, 6, 10), Rate::ZERO)
            .unwrap();
        for (idx, row) in schedule.installments.iter().enumerate() {
            assert_eq!(row.number, idx as u32 + 1);
        }
        assert_eq!(schedule.get(1).map(|r| r.number), Some(1));
        assert!(schedule.get(0).is_none());
        assert!(schedule.get(7).is_none());
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let calc = AmortizationCalculator::new(24);
        let start = date(2024, 1, 1);

        assert!(matches!(
            calc.build(Money::ZERO, 3, start, Rate::ZERO),
            Err(BillingError::InvalidSchedule { .. })
        ));
        assert!(matches!(
            calc.build(Money::from_major(-5), 3, start, Rate::ZERO),
            Err(BillingError::InvalidSchedule { .. })
        ));
        assert!(matches!(
            calc.build(Money::from_major(100), 0, start, Rate::ZERO),
            Err(BillingError::InvalidSchedule { .. })
        ));
        assert!(matches!(
            calc.build(Money::from_major(100), 25, start, Rate::ZERO),
            Err(BillingError::InvalidSchedule { .. })
        ));
        assert!(matches!(
            calc.build(Money::from_major(100), 3, start, Rate::from_decimal(dec!(-0.01))),
            Err(BillingError::InvalidInterestRate { .. })
        ));
    }

    #[test]
    fn test_amount_too_small_for_count() {
        let calc = AmortizationCalculator::new(24);
        let start = date(2024, 1, 1);
        // 0.12 / 24 rounds to 0.01, so 23 shares already exceed the total
        assert!(matches!(
            calc.build(Money::from_decimal(dec!(0.12)), 24, start, Rate::ZERO),
            Err(BillingError::InvalidSchedule { .. })
        ));
        assert!(matches!(
            calc.build(Money::CENT, 3, start, Rate::ZERO),
            Err(BillingError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_is_deterministic() {
        let calc = AmortizationCalculator::new(24);
        let a = calc.build(Money::from_major(777), 9, date(2025, 8, 31), Rate::from_percentage(7)).unwrap();
        let b = calc.build(Money::from_major(777), 9, date(2025, 8, 31), Rate::from_percentage(7)).unwrap();
        assert_eq!(a, b);
    }
}
