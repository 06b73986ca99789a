//! Read-side views over committed plans.
//!
//! Everything here is a pure function of the plans passed in; the service
//! loads them from the repository and supplies today's date from its clock.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::card::Card;
use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::plan::{Installment, PlanAggregate};
use crate::types::{CardId, InstallmentId, InstallmentStatus, PlanId, PlanStatus};

/// an open installment as shown in agendas and summaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingInstallment {
    pub installment_id: InstallmentId,
    pub plan_id: PlanId,
    pub card_id: CardId,
    pub installment_number: u32,
    pub installments_count: u32,
    /// still owed, after partial payments
    pub amount: Money,
    pub due_date: NaiveDate,
    pub status: InstallmentStatus,
    pub description: String,
    pub merchant_name: String,
    /// negative when already past due
    pub days_until_due: i64,
}

impl UpcomingInstallment {
    fn new(aggregate: &PlanAggregate, installment: &Installment, today: NaiveDate) -> Self {
        Self {
            installment_id: installment.id,
            plan_id: aggregate.plan.id,
            card_id: aggregate.plan.card_id,
            installment_number: installment.installment_number,
            installments_count: aggregate.plan.installments_count,
            amount: installment.remaining_amount,
            due_date: installment.due_date,
            status: installment.status,
            description: aggregate.plan.description.clone(),
            merchant_name: aggregate.plan.merchant_name.clone(),
            days_until_due: (installment.due_date - today).num_days(),
        }
    }
}

/// credit position of one card across all of its plans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardSummary {
    pub card_id: CardId,
    pub balance: Money,
    pub credit_limit: Option<Money>,
    pub available_credit: Money,
    pub total_active_plans: u32,
    pub total_suspended_plans: u32,
    pub total_completed_plans: u32,
    pub total_cancelled_plans: u32,
    pub total_outstanding_amount: Money,
    pub total_paid_amount: Money,
    pub total_overdue_amount: Money,
    pub overdue_installments_count: u32,
    /// overdue for longer than the grace period
    pub past_grace_count: u32,
    pub next_payment_due: Option<NaiveDate>,
    pub next_payment_amount: Money,
    pub upcoming: Vec<UpcomingInstallment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLoad {
    pub date: NaiveDate,
    pub installments_count: u32,
    pub total_amount: Money,
    pub installments: Vec<UpcomingInstallment>,
}

/// installments falling due in one calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyLoad {
    pub card_id: CardId,
    pub year: i32,
    pub month: u32,
    pub total_installments: u32,
    pub total_amount: Money,
    pub paid_installments: u32,
    pub paid_amount: Money,
    pub pending_installments: u32,
    pub pending_amount: Money,
    pub overdue_installments: u32,
    pub overdue_amount: Money,
    /// only days with at least one installment, ascending
    pub daily_breakdown: Vec<DailyLoad>,
}

/// open installments of live plans due within `window_days` of `today`, soonest first
///
/// Overdue installments are always included regardless of their due date.
pub fn upcoming_installments(plans: &[PlanAggregate], today: NaiveDate, window_days: u32) -> Vec<UpcomingInstallment> {
    let horizon = today
        .checked_add_days(Days::new(u64::from(window_days)))
        .unwrap_or(NaiveDate::MAX);

    let mut upcoming: Vec<UpcomingInstallment> = plans
        .iter()
        .filter(|a| !a.plan.status.is_terminal())
        .flat_map(|a| {
            a.installments
                .iter()
                .filter(|i| i.is_open())
                .filter(move |i| i.status == InstallmentStatus::Overdue || (i.due_date >= today && i.due_date <= horizon))
                .map(move |i| UpcomingInstallment::new(a, i, today))
        })
        .collect();

    upcoming.sort_by(|a, b| {
        a.due_date
            .cmp(&b.due_date)
            .then(a.installment_number.cmp(&b.installment_number))
    });
    upcoming
}

pub fn card_summary(
    card: &Card,
    plans: &[PlanAggregate],
    today: NaiveDate,
    window_days: u32,
    grace_period_days: u32,
) -> CardSummary {
    let count_plans = |status: PlanStatus| plans.iter().filter(|a| a.plan.status == status).count() as u32;
    let grace_cutoff = today.checked_sub_days(Days::new(u64::from(grace_period_days)));

    let mut total_outstanding_amount = Money::ZERO;
    let mut total_paid_amount = Money::ZERO;
    let mut total_overdue_amount = Money::ZERO;
    let mut overdue_installments_count = 0;
    let mut past_grace_count = 0;

    for aggregate in plans {
        total_paid_amount += aggregate.paid_amount();
        if aggregate.plan.status == PlanStatus::Cancelled {
            continue;
        }
        total_outstanding_amount += aggregate.outstanding_amount();
        total_overdue_amount += aggregate.overdue_amount();
        for installment in aggregate.installments.iter().filter(|i| i.status == InstallmentStatus::Overdue) {
            overdue_installments_count += 1;
            if grace_cutoff.is_some_and(|cutoff| installment.due_date < cutoff) {
                past_grace_count += 1;
            }
        }
    }

    let next = plans
        .iter()
        .filter(|a| !a.plan.status.is_terminal())
        .filter_map(|a| a.next_due())
        .min_by_key(|i| i.due_date);

    CardSummary {
        card_id: card.id,
        balance: card.balance,
        credit_limit: card.credit_limit,
        available_credit: card.available_credit(),
        total_active_plans: count_plans(PlanStatus::Active),
        total_suspended_plans: count_plans(PlanStatus::Suspended),
        total_completed_plans: count_plans(PlanStatus::Completed),
        total_cancelled_plans: count_plans(PlanStatus::Cancelled),
        total_outstanding_amount,
        total_paid_amount,
        total_overdue_amount,
        overdue_installments_count,
        past_grace_count,
        next_payment_due: next.map(|i| i.due_date),
        next_payment_amount: next.map(|i| i.remaining_amount).unwrap_or(Money::ZERO),
        upcoming: upcoming_installments(plans, today, window_days),
    }
}

/// everything due in `year`-`month`, cancelled installments excluded
pub fn monthly_load(card_id: CardId, plans: &[PlanAggregate], year: i32, month: u32) -> Result<MonthlyLoad> {
    let first_day = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| BillingError::InvalidDate {
        message: format!("no such month {year}-{month}"),
    })?;

    let mut load = MonthlyLoad {
        card_id,
        year,
        month,
        total_installments: 0,
        total_amount: Money::ZERO,
        paid_installments: 0,
        paid_amount: Money::ZERO,
        pending_installments: 0,
        pending_amount: Money::ZERO,
        overdue_installments: 0,
        overdue_amount: Money::ZERO,
        daily_breakdown: Vec::new(),
    };
    let mut days: BTreeMap<NaiveDate, DailyLoad> = BTreeMap::new();

    for aggregate in plans.iter().filter(|a| a.plan.card_id == card_id) {
        for installment in &aggregate.installments {
            let due = installment.due_date;
            if due.year() != year || due.month() != month || installment.status == InstallmentStatus::Cancelled {
                continue;
            }

            load.total_installments += 1;
            load.total_amount += installment.amount;
            match installment.status {
                InstallmentStatus::Paid => {
                    load.paid_installments += 1;
                    load.paid_amount += installment.amount;
                }
                InstallmentStatus::Pending => {
                    load.pending_installments += 1;
                    load.pending_amount += installment.remaining_amount;
                }
                InstallmentStatus::Overdue => {
                    load.overdue_installments += 1;
                    load.overdue_amount += installment.remaining_amount;
                }
                InstallmentStatus::Cancelled => {}
            }

            let day = days.entry(due).or_insert_with(|| DailyLoad {
                date: due,
                installments_count: 0,
                total_amount: Money::ZERO,
                installments: Vec::new(),
            });
            day.installments_count += 1;
            day.total_amount += installment.amount;
            day.installments.push(UpcomingInstallment::new(aggregate, installment, first_day));
        }
    }

    load.daily_breakdown = days.into_values().collect();
    Ok(load)
}
