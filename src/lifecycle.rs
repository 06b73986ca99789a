//! Plan lifecycle state machine.
//!
//! ```text
//!   create ──► Active ◄──reactivate── Suspended
//!                │  └──────suspend──────►  │
//!                │                         │
//!        last payment                   cancel
//!                ▼                         ▼
//!            Completed                 Cancelled
//! ```
//!
//! `Completed` and `Cancelled` are terminal. Every transition except the
//! overdue sweep emits exactly one audit record into the caller's trail and
//! returns the card as it must be persisted alongside the plan.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use crate::audit::{AuditAction, AuditRecord, AuditTrail, BalanceSnapshot};
use crate::card::Card;
use crate::credit::CreditLedger;
use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::payments::{InstallmentSchedule, PaymentApplication};
use crate::plan::{Installment, PlanAggregate, PlanTerms};
use crate::types::{InstallmentId, InstallmentStatus, PaymentMethod, PlanStatus};

/// who asked for a transition and why
#[derive(Debug, Clone)]
pub struct TransitionContext {
    pub actor: String,
    pub reason: String,
    pub reference: Option<String>,
    pub now: DateTime<Utc>,
}

impl TransitionContext {
    pub fn new(actor: impl Into<String>, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            actor: actor.into(),
            reason: reason.into(),
            reference: None,
            now,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// drives plan and installment status changes together with their credit effects
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallmentPlanStateMachine {
    ledger: CreditLedger,
}

impl InstallmentPlanStateMachine {
    pub fn new(ledger: CreditLedger) -> Self {
        Self { ledger }
    }

    /// open a new active plan and charge its total against the card
    pub fn create(
        &self,
        card: &Card,
        terms: PlanTerms,
        schedule: &InstallmentSchedule,
        ctx: &TransitionContext,
        trail: &mut AuditTrail,
    ) -> Result<(PlanAggregate, Card)> {
        let charged = self.ledger.charge(card, schedule.total_amount)?;
        let aggregate = PlanAggregate::from_schedule(terms, schedule, ctx.now);

        trail.emit(
            AuditRecord::new(
                aggregate.id(),
                AuditAction::Created,
                ctx.actor.clone(),
                ctx.reason.clone(),
                None,
                PlanStatus::Active,
                ctx.now,
            )
            .with_reference(ctx.reference.clone())
            .with_amounts(
                schedule.total_amount,
                BalanceSnapshot { before: card.balance, after: charged.balance },
            ),
        );

        Ok((aggregate, charged))
    }

    /// apply a payment to one installment, completing the plan on the last one
    ///
    /// `amount = None` settles whatever is still owed. Completion never
    /// releases credit: each payment already reduced the card balance.
    pub fn pay_installment(
        &self,
        aggregate: &mut PlanAggregate,
        card: &Card,
        installment_id: InstallmentId,
        amount: Option<Money>,
        method: PaymentMethod,
        ctx: &TransitionContext,
        trail: &mut AuditTrail,
    ) -> Result<(Card, PaymentApplication)> {
        let plan_status = aggregate.plan.status;
        let installment = aggregate
            .installment(installment_id)
            .ok_or(BillingError::InstallmentNotFound { id: installment_id })?;

        if installment.status == InstallmentStatus::Paid {
            return Err(BillingError::AlreadyPaid { installment_id });
        }
        if plan_status != PlanStatus::Active {
            return Err(BillingError::PlanNotActive { status: plan_status });
        }
        if !installment.is_open() {
            return Err(BillingError::InstallmentNotPayable {
                installment_id,
                status: installment.status,
            });
        }

        let remaining = installment.remaining_amount;
        let applied = amount.unwrap_or(remaining);
        if !applied.is_positive() {
            return Err(BillingError::InvalidAmount { amount: applied });
        }
        if applied > remaining {
            return Err(BillingError::PaymentExceedsRemaining { amount: applied, remaining });
        }

        let updated_card = self.ledger.payment(card, applied)?;

        // validated; mutate
        let settled = applied == remaining;
        let installment_number;
        {
            let installment = aggregate
                .installment_mut(installment_id)
                .ok_or(BillingError::InstallmentNotFound { id: installment_id })?;
            installment.paid_amount += applied;
            installment.remaining_amount = remaining - applied;
            installment.payment_method = Some(method);
            installment.payment_reference = ctx.reference.clone();
            installment.updated_at = ctx.now;
            if settled {
                installment.status = InstallmentStatus::Paid;
                installment.paid_at = Some(ctx.now);
            }
            installment_number = installment.installment_number;
        }

        let plan = &mut aggregate.plan;
        if settled {
            plan.paid_installments += 1;
        }
        let completed = plan.paid_installments == plan.installments_count;
        if completed {
            plan.status = PlanStatus::Completed;
            plan.completed_at = Some(ctx.now);
        }
        plan.updated_at = ctx.now;

        let action = if settled { AuditAction::Paid } else { AuditAction::PartiallyPaid };
        let reason = if ctx.reason.is_empty() {
            format!("payment {} via {} on installment {}", applied, method, installment_number)
        } else {
            ctx.reason.clone()
        };

        trail.emit(
            AuditRecord::new(
                plan.id,
                action,
                ctx.actor.clone(),
                reason,
                Some(plan_status),
                plan.status,
                ctx.now,
            )
            .with_installment(installment_id)
            .with_reference(ctx.reference.clone())
            .with_amounts(applied, BalanceSnapshot { before: card.balance, after: updated_card.balance }),
        );

        debug!(
            plan_id = %plan.id,
            installment = installment_number,
            applied = %applied,
            settled,
            completed,
            "installment payment applied"
        );

        Ok((
            updated_card,
            PaymentApplication {
                applied,
                remaining_after: remaining - applied,
                installment_settled: settled,
                plan_completed: completed,
            },
        ))
    }

    /// cancel the plan and give the unpaid debt back to the card
    pub fn cancel(
        &self,
        aggregate: &mut PlanAggregate,
        card: &Card,
        ctx: &TransitionContext,
        trail: &mut AuditTrail,
    ) -> Result<Card> {
        let from = aggregate.plan.status;
        if from.is_terminal() {
            return Err(BillingError::InvalidTransition { from, action: "cancel" });
        }

        let unpaid = aggregate.outstanding_amount();
        let released = self.ledger.release(card, unpaid)?;

        for installment in aggregate.installments.iter_mut().filter(|i| i.is_open()) {
            installment.status = InstallmentStatus::Cancelled;
            installment.updated_at = ctx.now;
        }

        let plan = &mut aggregate.plan;
        plan.status = PlanStatus::Cancelled;
        plan.cancelled_at = Some(ctx.now);
        plan.updated_at = ctx.now;

        trail.emit(
            AuditRecord::new(
                plan.id,
                AuditAction::Cancelled,
                ctx.actor.clone(),
                ctx.reason.clone(),
                Some(from),
                PlanStatus::Cancelled,
                ctx.now,
            )
            .with_reference(ctx.reference.clone())
            .with_amounts(unpaid, BalanceSnapshot { before: card.balance, after: released.balance }),
        );

        Ok(released)
    }

    /// freeze an active plan; no balance effect
    pub fn suspend(&self, aggregate: &mut PlanAggregate, card: &Card, ctx: &TransitionContext, trail: &mut AuditTrail) -> Result<()> {
        self.toggle(aggregate, card, PlanStatus::Active, PlanStatus::Suspended, AuditAction::Suspended, "suspend", ctx, trail)
    }

    /// resume a suspended plan; no balance effect
    pub fn reactivate(&self, aggregate: &mut PlanAggregate, card: &Card, ctx: &TransitionContext, trail: &mut AuditTrail) -> Result<()> {
        self.toggle(aggregate, card, PlanStatus::Suspended, PlanStatus::Active, AuditAction::Reactivated, "reactivate", ctx, trail)
    }

    /// flag pending installments due before `cutoff` as overdue
    ///
    /// Batch operation: no plan status change, no balance effect and no audit
    /// rows. Already paid or overdue installments are not matched, so running
    /// it twice with the same cutoff is a no-op.
    pub fn mark_overdue<'a, I>(&self, installments: I, cutoff: NaiveDate, now: DateTime<Utc>) -> u64
    where
        I: IntoIterator<Item = &'a mut Installment>,
    {
        let mut affected = 0;
        for installment in installments {
            if installment.is_due_before(cutoff) {
                installment.status = InstallmentStatus::Overdue;
                installment.updated_at = now;
                affected += 1;
            }
        }
        affected
    }

    #[allow(clippy::too_many_arguments)]
    fn toggle(
        &self,
        aggregate: &mut PlanAggregate,
        card: &Card,
        expected: PlanStatus,
        target: PlanStatus,
        action: AuditAction,
        verb: &'static str,
        ctx: &TransitionContext,
        trail: &mut AuditTrail,
    ) -> Result<()> {
        let from = aggregate.plan.status;
        if from != expected {
            return Err(BillingError::InvalidTransition { from, action: verb });
        }

        aggregate.plan.status = target;
        aggregate.plan.updated_at = ctx.now;

        trail.emit(
            AuditRecord::new(
                aggregate.id(),
                action,
                ctx.actor.clone(),
                ctx.reason.clone(),
                Some(from),
                target,
                ctx.now,
            )
            .with_reference(ctx.reference.clone())
            .with_amounts(Money::ZERO, BalanceSnapshot::unchanged(card.balance)),
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::LedgerSyncStatus;
    use crate::decimal::Rate;
    use crate::payments::AmortizationCalculator;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct Fixture {
        machine: InstallmentPlanStateMachine,
        card: Card,
        aggregate: PlanAggregate,
        trail: AuditTrail,
        now: DateTime<Utc>,
    }

    fn fixture(amount: i64, count: u32, limit: i64, balance: i64) -> Fixture {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let machine = InstallmentPlanStateMachine::default();
        let card = Card::credit(Uuid::new_v4(), Money::from_major(limit), now).with_balance(Money::from_major(balance));
        let schedule = AmortizationCalculator::new(24)
            .build(Money::from_major(amount), count, now.date_naive(), Rate::ZERO)
            .unwrap();
        let terms = PlanTerms {
            card_id: card.id,
            user_id: "user-1".to_string(),
            description: "tv".to_string(),
            merchant_name: "electro".to_string(),
        };
        let mut trail = AuditTrail::new();
        let ctx = TransitionContext::new("user-1", "purchase", now).with_reference("purchase-1");
        let (aggregate, card) = machine.create(&card, terms, &schedule, &ctx, &mut trail).unwrap();

        Fixture { machine, card, aggregate, trail, now }
    }

    fn ctx(now: DateTime<Utc>) -> TransitionContext {
        TransitionContext::new("user-1", "", now)
    }

    #[test]
    fn test_create_charges_card_and_audits() {
        let f = fixture(300, 3, 1_000, 100);
        assert_eq!(f.card.balance, Money::from_major(400));
        assert_eq!(f.aggregate.plan.status, PlanStatus::Active);

        let records = f.trail.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, AuditAction::Created);
        assert_eq!(records[0].reference.as_deref(), Some("purchase-1"));
        assert_eq!(records[0].balance.before, Money::from_major(100));
        assert_eq!(records[0].balance.after, Money::from_major(400));
        assert!(records[0].ledger_sync.is_pending());
    }

    #[test]
    fn test_create_over_limit_fails() {
        let now = Utc::now();
        let machine = InstallmentPlanStateMachine::default();
        let card = Card::credit(Uuid::new_v4(), Money::from_major(500), now).with_balance(Money::from_major(400));
        let schedule = AmortizationCalculator::new(24)
            .build(Money::from_major(150), 3, now.date_naive(), Rate::ZERO)
            .unwrap();
        let terms = PlanTerms {
            card_id: card.id,
            user_id: "u".to_string(),
            description: String::new(),
            merchant_name: String::new(),
        };
        let mut trail = AuditTrail::new();
        let result = machine.create(&card, terms, &schedule, &ctx(now), &mut trail);
        assert!(matches!(result, Err(BillingError::InsufficientCredit { .. })));
        assert!(trail.is_empty());
    }

    #[test]
    fn test_paying_all_installments_completes_once() {
        let mut f = fixture(300, 3, 1_000, 0);
        let ids: Vec<_> = f.aggregate.installments.iter().map(|i| i.id).collect();
        let mut card = f.card.clone();

        for (idx, id) in ids.iter().enumerate() {
            let (next, applied) = f
                .machine
                .pay_installment(&mut f.aggregate, &card, *id, None, PaymentMethod::BankTransfer, &ctx(f.now), &mut f.trail)
                .unwrap();
            card = next;
            assert!(applied.installment_settled);
            assert_eq!(applied.plan_completed, idx == 2);
        }

        assert_eq!(f.aggregate.plan.status, PlanStatus::Completed);
        assert_eq!(f.aggregate.plan.paid_installments, 3);
        // balance back to where it started: 300 charged, 3 x 100 paid, nothing released
        assert_eq!(card.balance, Money::ZERO);
        assert!(f.aggregate.check_invariants().is_ok());

        let again = f.machine.pay_installment(
            &mut f.aggregate,
            &card,
            ids[2],
            None,
            PaymentMethod::BankTransfer,
            &ctx(f.now),
            &mut f.trail,
        );
        assert!(matches!(again, Err(BillingError::AlreadyPaid { .. })));
        let completions = f.trail.records().iter().filter(|r| r.new_status == PlanStatus::Completed).count();
        assert_eq!(completions, 1);
    }

    #[test]
    fn test_partial_payment_keeps_installment_open() {
        let mut f = fixture(300, 3, 1_000, 0);
        let id = f.aggregate.installments[0].id;

        let (card, applied) = f
            .machine
            .pay_installment(&mut f.aggregate, &f.card, id, Some(Money::from_major(40)), PaymentMethod::Cash, &ctx(f.now), &mut f.trail)
            .unwrap();
        assert!(!applied.installment_settled);
        assert_eq!(applied.remaining_after, Money::from_major(60));
        assert_eq!(card.balance, Money::from_major(260));

        let inst = f.aggregate.installment(id).unwrap();
        assert_eq!(inst.status, InstallmentStatus::Pending);
        assert_eq!(inst.paid_amount, Money::from_major(40));
        assert_eq!(f.aggregate.plan.paid_installments, 0);
        assert_eq!(f.trail.records().last().map(|r| r.action), Some(AuditAction::PartiallyPaid));

        let too_much = f.machine.pay_installment(
            &mut f.aggregate,
            &card,
            id,
            Some(Money::from_major(61)),
            PaymentMethod::Cash,
            &ctx(f.now),
            &mut f.trail,
        );
        assert!(matches!(too_much, Err(BillingError::PaymentExceedsRemaining { .. })));

        let (card, applied) = f
            .machine
            .pay_installment(&mut f.aggregate, &card, id, None, PaymentMethod::Cash, &ctx(f.now), &mut f.trail)
            .unwrap();
        assert!(applied.installment_settled);
        assert_eq!(applied.applied, Money::from_major(60));
        assert_eq!(card.balance, Money::from_major(200));
        assert_eq!(f.aggregate.plan.paid_installments, 1);
    }

    #[test]
    fn test_cancel_releases_only_unpaid_amount() {
        let mut f = fixture(300, 3, 1_000, 0);
        let first = f.aggregate.installments[0].id;
        let (card, _) = f
            .machine
            .pay_installment(&mut f.aggregate, &f.card, first, None, PaymentMethod::BankTransfer, &ctx(f.now), &mut f.trail)
            .unwrap();
        assert_eq!(card.balance, Money::from_major(200));

        let card = f
            .machine
            .cancel(&mut f.aggregate, &card, &TransitionContext::new("admin", "customer request", f.now), &mut f.trail)
            .unwrap();
        assert_eq!(card.balance, Money::ZERO);
        assert_eq!(f.aggregate.plan.status, PlanStatus::Cancelled);
        assert_eq!(f.aggregate.count_with_status(InstallmentStatus::Cancelled), 2);
        assert_eq!(f.aggregate.count_with_status(InstallmentStatus::Paid), 1);

        let record = f.trail.records().last().unwrap();
        assert_eq!(record.action, AuditAction::Cancelled);
        assert_eq!(record.amount, Money::from_major(200));
        assert_eq!(record.reason, "customer request");
        assert_eq!(record.actor, "admin");
    }

    #[test]
    fn test_cancel_uses_remaining_after_partial_payment() {
        let mut f = fixture(300, 3, 1_000, 0);
        let first = f.aggregate.installments[0].id;
        let (card, _) = f
            .machine
            .pay_installment(
                &mut f.aggregate,
                &f.card,
                first,
                Some(Money::from_decimal(dec!(25.50))),
                PaymentMethod::Cash,
                &ctx(f.now),
                &mut f.trail,
            )
            .unwrap();
        let card = f.machine.cancel(&mut f.aggregate, &card, &ctx(f.now), &mut f.trail).unwrap();
        assert_eq!(card.balance, Money::ZERO);
        assert_eq!(f.trail.records().last().unwrap().amount, Money::from_decimal(dec!(274.50)));
    }

    #[test]
    fn test_cancelled_is_terminal() {
        let mut f = fixture(300, 3, 1_000, 0);
        let card = f.machine.cancel(&mut f.aggregate, &f.card, &ctx(f.now), &mut f.trail).unwrap();

        assert!(matches!(
            f.machine.reactivate(&mut f.aggregate, &card, &ctx(f.now), &mut f.trail),
            Err(BillingError::InvalidTransition { from: PlanStatus::Cancelled, .. })
        ));
        assert!(matches!(
            f.machine.suspend(&mut f.aggregate, &card, &ctx(f.now), &mut f.trail),
            Err(BillingError::InvalidTransition { .. })
        ));
        assert!(matches!(
            f.machine.cancel(&mut f.aggregate, &card, &ctx(f.now), &mut f.trail),
            Err(BillingError::InvalidTransition { .. })
        ));

        let id = f.aggregate.installments[0].id;
        assert!(matches!(
            f.machine.pay_installment(&mut f.aggregate, &card, id, None, PaymentMethod::Cash, &ctx(f.now), &mut f.trail),
            Err(BillingError::PlanNotActive { status: PlanStatus::Cancelled })
        ));
    }

    #[test]
    fn test_suspend_reactivate_round_trips() {
        let mut f = fixture(300, 3, 1_000, 0);
        for _ in 0..3 {
            f.machine.suspend(&mut f.aggregate, &f.card, &ctx(f.now), &mut f.trail).unwrap();
            assert_eq!(f.aggregate.plan.status, PlanStatus::Suspended);
            f.machine.reactivate(&mut f.aggregate, &f.card, &ctx(f.now), &mut f.trail).unwrap();
            assert_eq!(f.aggregate.plan.status, PlanStatus::Active);
        }
        // created + 3 x (suspend, reactivate)
        assert_eq!(f.trail.records().len(), 7);
        assert!(f.trail.records()[1..].iter().all(|r| r.ledger_sync == LedgerSyncStatus::NotRequired));

        assert!(matches!(
            f.machine.reactivate(&mut f.aggregate, &f.card, &ctx(f.now), &mut f.trail),
            Err(BillingError::InvalidTransition { from: PlanStatus::Active, .. })
        ));
    }

    #[test]
    fn test_suspended_plan_rejects_payment_but_can_cancel() {
        let mut f = fixture(300, 3, 1_000, 0);
        f.machine.suspend(&mut f.aggregate, &f.card, &ctx(f.now), &mut f.trail).unwrap();

        let id = f.aggregate.installments[0].id;
        assert!(matches!(
            f.machine.pay_installment(&mut f.aggregate, &f.card, id, None, PaymentMethod::Cash, &ctx(f.now), &mut f.trail),
            Err(BillingError::PlanNotActive { status: PlanStatus::Suspended })
        ));

        let card = f.machine.cancel(&mut f.aggregate, &f.card, &ctx(f.now), &mut f.trail).unwrap();
        assert_eq!(card.balance, Money::ZERO);
    }

    #[test]
    fn test_completed_plan_cannot_be_suspended() {
        let mut f = fixture(100, 1, 1_000, 0);
        let id = f.aggregate.installments[0].id;
        let (card, _) = f
            .machine
            .pay_installment(&mut f.aggregate, &f.card, id, None, PaymentMethod::Cash, &ctx(f.now), &mut f.trail)
            .unwrap();
        assert_eq!(f.aggregate.plan.status, PlanStatus::Completed);
        assert!(matches!(
            f.machine.suspend(&mut f.aggregate, &card, &ctx(f.now), &mut f.trail),
            Err(BillingError::InvalidTransition { from: PlanStatus::Completed, .. })
        ));
    }

    #[test]
    fn test_mark_overdue_is_idempotent() {
        let mut f = fixture(300, 3, 1_000, 0);
        // due dates: Feb 1, Mar 1, Apr 1
        let cutoff = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();

        let first = f.machine.mark_overdue(f.aggregate.installments.iter_mut(), cutoff, f.now);
        assert_eq!(first, 2);
        assert_eq!(f.aggregate.count_with_status(InstallmentStatus::Overdue), 2);

        let second = f.machine.mark_overdue(f.aggregate.installments.iter_mut(), cutoff, f.now);
        assert_eq!(second, 0);
        assert_eq!(f.aggregate.plan.status, PlanStatus::Active);
        assert_eq!(f.trail.records().len(), 1);
    }

    #[test]
    fn test_overdue_installment_can_be_paid() {
        let mut f = fixture(300, 3, 1_000, 0);
        let cutoff = NaiveDate::from_ymd_opt(2024, 2, 2).unwrap();
        assert_eq!(f.machine.mark_overdue(f.aggregate.installments.iter_mut(), cutoff, f.now), 1);

        let id = f.aggregate.installments[0].id;
        f.machine
            .pay_installment(&mut f.aggregate, &f.card, id, None, PaymentMethod::Cash, &ctx(f.now), &mut f.trail)
            .unwrap();
        assert_eq!(f.aggregate.installment(id).unwrap().status, InstallmentStatus::Paid);
    }
}
