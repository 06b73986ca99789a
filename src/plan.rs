use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::payments::{InstallmentSchedule, ScheduledInstallment};
use crate::types::{CardId, InstallmentId, InstallmentStatus, PaymentMethod, PlanId, PlanStatus};

/// a purchase spread over a fixed number of installments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentPlan {
    pub id: PlanId,
    pub card_id: CardId,
    pub user_id: String,
    pub principal_amount: Money,
    pub interest_rate: Rate,
    pub total_interest: Money,
    /// interest-adjusted amount; installments sum to exactly this
    pub total_amount: Money,
    pub installments_count: u32,
    /// cached count of paid installments
    pub paid_installments: u32,
    pub status: PlanStatus,
    pub start_date: NaiveDate,
    pub transaction_id: Option<String>,
    pub description: String,
    pub merchant_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// one scheduled payment of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub id: InstallmentId,
    pub plan_id: PlanId,
    pub installment_number: u32,
    pub amount: Money,
    pub principal_portion: Money,
    pub interest_portion: Money,
    pub paid_amount: Money,
    pub remaining_amount: Money,
    pub due_date: NaiveDate,
    pub status: InstallmentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_reference: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Installment {
    fn from_schedule(plan_id: PlanId, row: &ScheduledInstallment, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan_id,
            installment_number: row.number,
            amount: row.amount,
            principal_portion: row.principal_portion,
            interest_portion: row.interest_portion,
            paid_amount: Money::ZERO,
            remaining_amount: row.amount,
            due_date: row.due_date,
            status: InstallmentStatus::Pending,
            paid_at: None,
            payment_method: None,
            payment_reference: None,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// pending and strictly before the cutoff
    pub fn is_due_before(&self, cutoff: NaiveDate) -> bool {
        self.status == InstallmentStatus::Pending && self.due_date < cutoff
    }
}

/// descriptive fields for a new plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlanTerms {
    pub card_id: CardId,
    pub user_id: String,
    pub description: String,
    pub merchant_name: String,
}

/// a plan together with the installments it owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanAggregate {
    pub plan: InstallmentPlan,
    /// ordered by installment number
    pub installments: Vec<Installment>,
}

impl PlanAggregate {
    /// materialize a schedule into a fresh active plan with pending installments
    pub fn from_schedule(terms: PlanTerms, schedule: &InstallmentSchedule, now: DateTime<Utc>) -> Self {
        let plan_id = Uuid::new_v4();
        let installments = schedule
            .installments
            .iter()
            .map(|row| Installment::from_schedule(plan_id, row, now))
            .collect();

        let plan = InstallmentPlan {
            id: plan_id,
            card_id: terms.card_id,
            user_id: terms.user_id,
            principal_amount: schedule.principal,
            interest_rate: schedule.interest_rate,
            total_interest: schedule.total_interest,
            total_amount: schedule.total_amount,
            installments_count: schedule.installments_count,
            paid_installments: 0,
            status: PlanStatus::Active,
            start_date: schedule.start_date,
            transaction_id: None,
            description: terms.description,
            merchant_name: terms.merchant_name,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
        };

        Self { plan, installments }
    }

    pub fn id(&self) -> PlanId {
        self.plan.id
    }

    pub fn installment(&self, id: InstallmentId) -> Option<&Installment> {
        self.installments.iter().find(|i| i.id == id)
    }

    pub fn installment_mut(&mut self, id: InstallmentId) -> Option<&mut Installment> {
        self.installments.iter_mut().find(|i| i.id == id)
    }

    /// debt still owed on pending and overdue installments
    pub fn outstanding_amount(&self) -> Money {
        self.installments
            .iter()
            .filter(|i| i.is_open())
            .map(|i| i.remaining_amount)
            .sum()
    }

    /// everything paid so far, including partial payments on open installments
    pub fn paid_amount(&self) -> Money {
        self.installments.iter().map(|i| i.paid_amount).sum()
    }

    pub fn overdue_amount(&self) -> Money {
        self.installments
            .iter()
            .filter(|i| i.status == InstallmentStatus::Overdue)
            .map(|i| i.remaining_amount)
            .sum()
    }

    pub fn count_with_status(&self, status: InstallmentStatus) -> u32 {
        self.installments.iter().filter(|i| i.status == status).count() as u32
    }

    /// earliest open installment
    pub fn next_due(&self) -> Option<&Installment> {
        self.installments
            .iter()
            .filter(|i| i.is_open())
            .min_by_key(|i| (i.due_date, i.installment_number))
    }

    /// structural invariants that must hold for every committed plan
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let paid = self.count_with_status(InstallmentStatus::Paid);
        if paid != self.plan.paid_installments {
            return Err(format!(
                "paid_installments {} does not match {} paid installments",
                self.plan.paid_installments, paid
            ));
        }

        let completed = self.plan.status == PlanStatus::Completed;
        if completed != (paid == self.plan.installments_count) {
            return Err(format!(
                "status {} inconsistent with {}/{} paid",
                self.plan.status, paid, self.plan.installments_count
            ));
        }

        if self.installments.len() as u32 != self.plan.installments_count {
            return Err("installment count mismatch".to_string());
        }

        for (idx, installment) in self.installments.iter().enumerate() {
            if installment.installment_number != idx as u32 + 1 {
                return Err(format!("installment numbering gap at position {}", idx + 1));
            }
        }

        let total: Money = self.installments.iter().map(|i| i.amount).sum();
        if (total - self.plan.total_amount).abs() > Money::CENT {
            return Err(format!("installments sum {} differs from total {}", total, self.plan.total_amount));
        }

        Ok(())
    }
}
