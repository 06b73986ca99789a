//! Billing orchestrator.
//!
//! Each mutating operation runs in two phases. First the local change (card
//! balance, plan rows, audit row) commits inside one card transaction. Then,
//! with no lock held, the remote ledger is told about it. A remote failure is
//! downgraded to a warning on [`Committed`] and leaves the audit row pending,
//! to be picked up later by [`BillingService::reconcile_ledger`].

use std::thread;

use chrono::{DateTime, NaiveDate, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{AuditAction, AuditRecord, AuditTrail, LedgerSyncStatus};
use crate::card::Card;
use crate::config::BillingConfig;
use crate::credit::CreditLedger;
use crate::decimal::{Money, Rate};
use crate::errors::{BillingError, Result};
use crate::ledger_client::{
    CancellationRecord, InstallmentPaymentRecord, LedgerClient, LedgerError, PurchaseRecord,
};
use crate::lifecycle::{InstallmentPlanStateMachine, TransitionContext};
use crate::payments::{AmortizationCalculator, InstallmentSchedule, PaymentRequest};
use crate::plan::{Installment, InstallmentPlan, PlanAggregate, PlanTerms};
use crate::reporting::{self, CardSummary, MonthlyLoad, UpcomingInstallment};
use crate::repository::{BillingRepository, CardTransaction};
use crate::types::{AuditId, CardId, PaymentMethod, PlanId, PlanStatus};

/// request to finance a purchase in installments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePlanRequest {
    pub card_id: CardId,
    pub user_id: String,
    pub amount: Money,
    pub installments_count: u32,
    pub interest_rate: Rate,
    /// defaults to today
    pub start_date: Option<NaiveDate>,
    pub description: String,
    pub merchant_name: String,
    /// idempotency key; replays return the plan created by the first call
    pub reference: String,
}

impl CreatePlanRequest {
    pub fn new(
        card_id: CardId,
        user_id: impl Into<String>,
        amount: Money,
        installments_count: u32,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            card_id,
            user_id: user_id.into(),
            amount,
            installments_count,
            interest_rate: Rate::ZERO,
            start_date: None,
            description: String::new(),
            merchant_name: String::new(),
            reference: reference.into(),
        }
    }

    pub fn with_interest_rate(mut self, rate: Rate) -> Self {
        self.interest_rate = rate;
        self
    }

    pub fn starting_on(mut self, start_date: NaiveDate) -> Self {
        self.start_date = Some(start_date);
        self
    }

    pub fn described_as(mut self, description: impl Into<String>, merchant_name: impl Into<String>) -> Self {
        self.description = description.into();
        self.merchant_name = merchant_name.into();
        self
    }
}

/// a locally committed result, with the remote ledger outcome attached
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub value: T,
    /// set when the ledger call failed; the audit row stays pending
    pub ledger_warning: Option<LedgerError>,
    /// the reference had already been applied; nothing changed this time
    pub replayed: bool,
}

impl<T> Committed<T> {
    pub fn is_synced(&self) -> bool {
        self.ledger_warning.is_none()
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// outcome of a payment against one installment
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReceipt {
    pub plan: InstallmentPlan,
    pub installment: Installment,
    pub applied: Money,
    pub plan_completed: bool,
    pub card_balance: Money,
}

/// result of one reconciliation pass over pending ledger syncs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub attempted: u32,
    pub synced: u32,
    pub still_pending: u32,
}

/// local side of a committed transition, before the remote call
struct LocalCommit {
    aggregate: PlanAggregate,
    record: Option<AuditRecord>,
    card: Card,
    replayed: bool,
}

pub struct BillingService<R, L> {
    repo: R,
    ledger: L,
    config: BillingConfig,
    time: SafeTimeProvider,
    calculator: AmortizationCalculator,
    machine: InstallmentPlanStateMachine,
}

impl<R, L> BillingService<R, L>
where
    R: BillingRepository,
    L: LedgerClient,
{
    pub fn new(repo: R, ledger: L, config: BillingConfig, time: SafeTimeProvider) -> Self {
        let calculator = AmortizationCalculator::new(config.max_installments);
        Self {
            repo,
            ledger,
            config,
            time,
            calculator,
            machine: InstallmentPlanStateMachine::new(CreditLedger::new()),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// schedule a purchase would get, without touching any card
    pub fn preview_plan(
        &self,
        amount: Money,
        installments_count: u32,
        start_date: Option<NaiveDate>,
        interest_rate: Rate,
    ) -> Result<InstallmentSchedule> {
        let start = start_date.unwrap_or_else(|| self.today());
        self.calculator.build(amount, installments_count, start, interest_rate)
    }

    pub fn create_plan(&self, request: CreatePlanRequest) -> Result<Committed<PlanAggregate>> {
        self.validate_create(&request)?;
        let start = request.start_date.unwrap_or_else(|| self.today());
        let schedule = self
            .calculator
            .build(request.amount, request.installments_count, start, request.interest_rate)?;

        let local = self.with_retry("create_plan", || self.create_locally(&request, &schedule))?;
        let warning = self.sync_ledger(&local);

        Ok(Committed {
            value: self.refreshed(local.aggregate)?,
            ledger_warning: warning,
            replayed: local.replayed,
        })
    }

    pub fn pay_installment(&self, request: PaymentRequest) -> Result<Committed<PaymentReceipt>> {
        request.validate()?;
        let installment = self
            .repo
            .find_installment(request.installment_id)?
            .ok_or(BillingError::InstallmentNotFound { id: request.installment_id })?;
        let owner = self.plan(installment.plan_id)?;

        let local = self.with_retry("pay_installment", || {
            self.pay_locally(owner.plan.card_id, owner.id(), &request)
        })?;
        let warning = self.sync_ledger(&local);

        let applied = match &local.record {
            Some(record) => record.amount,
            None => Money::ZERO,
        };
        let aggregate = self.refreshed(local.aggregate)?;
        let installment = aggregate
            .installment(request.installment_id)
            .cloned()
            .ok_or(BillingError::InstallmentNotFound { id: request.installment_id })?;

        Ok(Committed {
            value: PaymentReceipt {
                plan_completed: aggregate.plan.status == PlanStatus::Completed,
                plan: aggregate.plan,
                installment,
                applied,
                card_balance: local.card.balance,
            },
            ledger_warning: warning,
            replayed: local.replayed,
        })
    }

    /// cancel a plan and release the unpaid debt back to the card
    pub fn cancel_plan(&self, plan_id: PlanId, actor: &str, reason: &str) -> Result<Committed<PlanAggregate>> {
        require_reason(reason)?;
        let card_id = self.plan(plan_id)?.plan.card_id;

        let local = self.with_retry("cancel_plan", || {
            self.transition_locally(card_id, plan_id, actor, reason, |machine, aggregate, card, ctx, trail| {
                machine.cancel(aggregate, card, ctx, trail)
            })
        })?;
        let warning = self.sync_ledger(&local);

        Ok(Committed {
            value: self.refreshed(local.aggregate)?,
            ledger_warning: warning,
            replayed: false,
        })
    }

    pub fn suspend_plan(&self, plan_id: PlanId, actor: &str, reason: &str) -> Result<PlanAggregate> {
        require_reason(reason)?;
        let card_id = self.plan(plan_id)?.plan.card_id;
        let local = self.with_retry("suspend_plan", || {
            self.transition_locally(card_id, plan_id, actor, reason, |machine, aggregate, card, ctx, trail| {
                machine.suspend(aggregate, card, ctx, trail).map(|_| card.clone())
            })
        })?;
        Ok(local.aggregate)
    }

    pub fn reactivate_plan(&self, plan_id: PlanId, actor: &str, reason: &str) -> Result<PlanAggregate> {
        require_reason(reason)?;
        let card_id = self.plan(plan_id)?.plan.card_id;
        let local = self.with_retry("reactivate_plan", || {
            self.transition_locally(card_id, plan_id, actor, reason, |machine, aggregate, card, ctx, trail| {
                machine.reactivate(aggregate, card, ctx, trail).map(|_| card.clone())
            })
        })?;
        Ok(local.aggregate)
    }

    /// flag every pending installment due before today as overdue
    pub fn run_overdue_sweep(&self) -> Result<u64> {
        self.run_overdue_sweep_at(self.today())
    }

    pub fn run_overdue_sweep_at(&self, cutoff: NaiveDate) -> Result<u64> {
        let now = self.now();
        let affected = self.with_retry("overdue_sweep", || Ok(self.repo.mark_overdue_batch(cutoff, now)?))?;
        info!(affected, %cutoff, "overdue sweep finished");
        Ok(affected)
    }

    /// retry the remote call for every audit row still pending
    pub fn reconcile_ledger(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for record in self.repo.pending_ledger_syncs()? {
            let Some(aggregate) = self.repo.find_plan(record.plan_id)? else {
                warn!(audit_id = %record.id, plan_id = %record.plan_id, "pending sync for unknown plan");
                continue;
            };
            let card = self
                .repo
                .find_card(aggregate.plan.card_id)?
                .ok_or(BillingError::CardNotFound { id: aggregate.plan.card_id })?;

            report.attempted += 1;
            let local = LocalCommit {
                aggregate,
                record: Some(record),
                card,
                replayed: false,
            };
            match self.sync_ledger(&local) {
                None => report.synced += 1,
                Some(_) => report.still_pending += 1,
            }
        }

        info!(
            attempted = report.attempted,
            synced = report.synced,
            still_pending = report.still_pending,
            "ledger reconciliation finished"
        );
        Ok(report)
    }

    // reporting

    pub fn card(&self, card_id: CardId) -> Result<Card> {
        self.repo.find_card(card_id)?.ok_or(BillingError::CardNotFound { id: card_id })
    }

    pub fn plan(&self, plan_id: PlanId) -> Result<PlanAggregate> {
        self.repo.find_plan(plan_id)?.ok_or(BillingError::PlanNotFound { id: plan_id })
    }

    pub fn plans_for_card(&self, card_id: CardId) -> Result<Vec<PlanAggregate>> {
        Ok(self.repo.plans_for_card(card_id)?)
    }

    /// audit trail of one plan, oldest first
    pub fn plan_history(&self, plan_id: PlanId) -> Result<Vec<AuditRecord>> {
        self.plan(plan_id)?;
        Ok(self.repo.audit_for_plan(plan_id)?)
    }

    pub fn audit_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<AuditRecord>> {
        if from > to {
            return Err(BillingError::InvalidDate {
                message: format!("range start {from} is after end {to}"),
            });
        }
        Ok(self.repo.audit_between(from, to)?)
    }

    pub fn pending_ledger_syncs(&self) -> Result<Vec<AuditRecord>> {
        Ok(self.repo.pending_ledger_syncs()?)
    }

    pub fn card_summary(&self, card_id: CardId) -> Result<CardSummary> {
        let card = self.card(card_id)?;
        let plans = self.repo.plans_for_card(card_id)?;
        Ok(reporting::card_summary(
            &card,
            &plans,
            self.today(),
            self.config.upcoming_window_days,
            self.config.grace_period_days,
        ))
    }

    pub fn upcoming_installments(&self, card_id: CardId, window_days: Option<u32>) -> Result<Vec<UpcomingInstallment>> {
        let plans = self.repo.plans_for_card(card_id)?;
        let window = window_days.unwrap_or(self.config.upcoming_window_days);
        Ok(reporting::upcoming_installments(&plans, self.today(), window))
    }

    pub fn monthly_load(&self, card_id: CardId, year: i32, month: u32) -> Result<MonthlyLoad> {
        let plans = self.repo.plans_for_card(card_id)?;
        reporting::monthly_load(card_id, &plans, year, month)
    }

    // local phase

    fn validate_create(&self, request: &CreatePlanRequest) -> Result<()> {
        if request.reference.trim().is_empty() {
            return Err(BillingError::InvalidRequest {
                message: "plan reference is required".to_string(),
            });
        }
        if request.user_id.trim().is_empty() {
            return Err(BillingError::InvalidRequest {
                message: "user id is required".to_string(),
            });
        }
        let max_len = self.config.max_description_len;
        if request.description.chars().count() > max_len || request.merchant_name.chars().count() > max_len {
            return Err(BillingError::InvalidRequest {
                message: format!("description and merchant name are limited to {max_len} characters"),
            });
        }
        if let Some(start) = request.start_date {
            let today = self.today();
            if start < today && !self.config.allow_past_start_date {
                return Err(BillingError::InvalidDate {
                    message: format!("start date {start} is before today {today}"),
                });
            }
        }
        Ok(())
    }

    fn create_locally(&self, request: &CreatePlanRequest, schedule: &InstallmentSchedule) -> Result<LocalCommit> {
        let mut tx = self.repo.begin(request.card_id)?;
        let card = tx
            .get_card_for_update()?
            .ok_or(BillingError::CardNotFound { id: request.card_id })?;

        if let Some(existing) = tx.find_audit_by_reference(&request.reference)? {
            let aggregate = match tx.load_plan(existing.plan_id)? {
                Some(aggregate) if existing.action == AuditAction::Created => aggregate,
                _ => return Err(BillingError::ReferenceConflict { reference: request.reference.clone() }),
            };
            if aggregate.plan.principal_amount != request.amount
                || aggregate.plan.installments_count != request.installments_count
            {
                return Err(BillingError::ReferenceConflict { reference: request.reference.clone() });
            }
            debug!(plan_id = %aggregate.id(), reference = %request.reference, "create replayed");
            return Ok(LocalCommit {
                aggregate,
                record: Some(existing),
                card,
                replayed: true,
            });
        }

        let now = self.now();
        let terms = PlanTerms {
            card_id: request.card_id,
            user_id: request.user_id.clone(),
            description: request.description.clone(),
            merchant_name: request.merchant_name.clone(),
        };
        let ctx = TransitionContext::new(request.user_id.clone(), "installment purchase", now)
            .with_reference(request.reference.clone());
        let mut trail = AuditTrail::new();

        let (aggregate, mut charged) = self.machine.create(&card, terms, schedule, &ctx, &mut trail)?;
        charged.updated_at = now;

        tx.save_card(&charged)?;
        tx.create_plan_with_installments(&aggregate)?;
        let record = append_trail(&mut tx, &mut trail)?;
        tx.commit()?;

        info!(
            plan_id = %aggregate.id(),
            card_id = %request.card_id,
            total = %aggregate.plan.total_amount,
            installments = aggregate.plan.installments_count,
            balance = %charged.balance,
            "installment plan created"
        );

        Ok(LocalCommit {
            aggregate,
            record,
            card: charged,
            replayed: false,
        })
    }

    fn pay_locally(&self, card_id: CardId, plan_id: PlanId, request: &PaymentRequest) -> Result<LocalCommit> {
        let mut tx = self.repo.begin(card_id)?;
        let card = tx.get_card_for_update()?.ok_or(BillingError::CardNotFound { id: card_id })?;
        let mut aggregate = tx.load_plan(plan_id)?.ok_or(BillingError::PlanNotFound { id: plan_id })?;

        if let Some(existing) = tx.find_audit_by_reference(&request.reference)? {
            let same_payment = existing.installment_id == Some(request.installment_id)
                && matches!(existing.action, AuditAction::Paid | AuditAction::PartiallyPaid);
            if !same_payment {
                return Err(BillingError::ReferenceConflict { reference: request.reference.clone() });
            }
            debug!(installment_id = %request.installment_id, reference = %request.reference, "payment replayed");
            return Ok(LocalCommit {
                aggregate,
                record: Some(existing),
                card,
                replayed: true,
            });
        }

        let now = self.now();
        let ctx = TransitionContext::new(request.initiated_by.clone(), "", now).with_reference(request.reference.clone());
        let mut trail = AuditTrail::new();

        let (mut updated, application) = self.machine.pay_installment(
            &mut aggregate,
            &card,
            request.installment_id,
            request.amount,
            request.method,
            &ctx,
            &mut trail,
        )?;
        updated.updated_at = now;

        let installment = aggregate
            .installment(request.installment_id)
            .cloned()
            .ok_or(BillingError::InstallmentNotFound { id: request.installment_id })?;
        tx.save_card(&updated)?;
        tx.save_installment(&installment)?;
        tx.save_plan(&aggregate.plan)?;
        let record = append_trail(&mut tx, &mut trail)?;
        tx.commit()?;

        info!(
            plan_id = %plan_id,
            installment = installment.installment_number,
            applied = %application.applied,
            settled = application.installment_settled,
            completed = application.plan_completed,
            balance = %updated.balance,
            "installment payment committed"
        );

        Ok(LocalCommit {
            aggregate,
            record,
            card: updated,
            replayed: false,
        })
    }

    /// load, transition and persist a plan under its card lock
    fn transition_locally<F>(
        &self,
        card_id: CardId,
        plan_id: PlanId,
        actor: &str,
        reason: &str,
        transition: F,
    ) -> Result<LocalCommit>
    where
        F: Fn(&InstallmentPlanStateMachine, &mut PlanAggregate, &Card, &TransitionContext, &mut AuditTrail) -> Result<Card>,
    {
        let mut tx = self.repo.begin(card_id)?;
        let card = tx.get_card_for_update()?.ok_or(BillingError::CardNotFound { id: card_id })?;
        let mut aggregate = tx.load_plan(plan_id)?.ok_or(BillingError::PlanNotFound { id: plan_id })?;
        let before = aggregate.clone();

        let now = self.now();
        let ctx = TransitionContext::new(actor, reason, now);
        let mut trail = AuditTrail::new();
        let mut updated = transition(&self.machine, &mut aggregate, &card, &ctx, &mut trail)?;

        if updated.balance != card.balance {
            updated.updated_at = now;
            tx.save_card(&updated)?;
        }
        for installment in &aggregate.installments {
            if before.installment(installment.id) != Some(installment) {
                tx.save_installment(installment)?;
            }
        }
        tx.save_plan(&aggregate.plan)?;
        let record = append_trail(&mut tx, &mut trail)?;
        tx.commit()?;

        info!(
            plan_id = %plan_id,
            from = %before.plan.status,
            to = %aggregate.plan.status,
            actor,
            reason,
            balance = %updated.balance,
            "installment plan transitioned"
        );

        Ok(LocalCommit {
            aggregate,
            record,
            card: updated,
            replayed: false,
        })
    }

    // remote phase

    /// tell the remote ledger about a committed record; returns the failure, if any
    fn sync_ledger(&self, local: &LocalCommit) -> Option<LedgerError> {
        let record = local.record.as_ref().filter(|r| r.ledger_sync.is_pending())?;
        let card_id = local.aggregate.plan.card_id;

        match self.dispatch(&local.aggregate, record) {
            Ok(remote_tx_id) => {
                info!(audit_id = %record.id, action = %record.action, remote_tx_id = %remote_tx_id, "ledger synced");
                let link = (record.action == AuditAction::Created).then(|| (record.plan_id, remote_tx_id.clone()));
                self.store_sync_status(card_id, record.id, LedgerSyncStatus::Synced { remote_tx_id }, link);
                None
            }
            Err(e) => {
                warn!(
                    audit_id = %record.id,
                    plan_id = %record.plan_id,
                    action = %record.action,
                    error = %e,
                    "ledger sync failed, left pending"
                );
                self.store_sync_status(
                    card_id,
                    record.id,
                    LedgerSyncStatus::Pending { last_error: Some(e.to_string()) },
                    None,
                );
                Some(e)
            }
        }
    }

    fn dispatch(&self, aggregate: &PlanAggregate, record: &AuditRecord) -> std::result::Result<String, LedgerError> {
        let plan = &aggregate.plan;
        // references are unique per card, so the remote key carries the card too
        let idempotency_key = match &record.reference {
            Some(reference) => format!("{}:{reference}", plan.card_id),
            None => record.id.to_string(),
        };

        match record.action {
            AuditAction::Created => self.ledger.record_purchase(&PurchaseRecord {
                user_id: plan.user_id.clone(),
                card_id: plan.card_id,
                plan_id: plan.id,
                amount: plan.total_amount,
                installments_count: plan.installments_count,
                description: plan.description.clone(),
                merchant_name: plan.merchant_name.clone(),
                idempotency_key,
            }),
            AuditAction::Paid | AuditAction::PartiallyPaid => {
                let installment = record.installment_id.and_then(|id| aggregate.installment(id)).ok_or_else(|| {
                    LedgerError::InvalidResponse {
                        message: format!("audit record {} has no installment", record.id),
                    }
                })?;
                self.ledger.record_installment_payment(&InstallmentPaymentRecord {
                    user_id: plan.user_id.clone(),
                    card_id: plan.card_id,
                    plan_id: plan.id,
                    installment_id: installment.id,
                    installment_number: installment.installment_number,
                    amount: record.amount,
                    method: installment.payment_method.unwrap_or(PaymentMethod::BankTransfer),
                    idempotency_key,
                })
            }
            AuditAction::Cancelled => self.ledger.record_cancellation(&CancellationRecord {
                user_id: plan.user_id.clone(),
                card_id: plan.card_id,
                plan_id: plan.id,
                released: record.amount,
                reason: record.reason.clone(),
                idempotency_key,
            }),
            AuditAction::Suspended | AuditAction::Reactivated | AuditAction::OverdueMarked => Err(
                LedgerError::InvalidResponse {
                    message: format!("{} does not move money", record.action),
                },
            ),
        }
    }

    /// best effort: the local operation already committed, so failures here only log
    fn store_sync_status(
        &self,
        card_id: CardId,
        audit_id: AuditId,
        status: LedgerSyncStatus,
        link: Option<(PlanId, String)>,
    ) {
        let result = self.with_retry("store_sync_status", || {
            let mut tx = self.repo.begin(card_id)?;
            if let Some((plan_id, remote_tx_id)) = &link {
                if let Some(mut aggregate) = tx.load_plan(*plan_id)? {
                    aggregate.plan.transaction_id = Some(remote_tx_id.clone());
                    tx.save_plan(&aggregate.plan)?;
                }
            }
            tx.set_ledger_sync(audit_id, status.clone())?;
            Ok(tx.commit()?)
        });

        match result {
            Ok(()) => debug!(audit_id = %audit_id, linked = link.is_some(), "ledger sync status stored"),
            Err(e) => warn!(audit_id = %audit_id, error = %e, "could not store ledger sync status"),
        }
    }

    /// re-read an aggregate so callers see sync links written after commit
    fn refreshed(&self, aggregate: PlanAggregate) -> Result<PlanAggregate> {
        Ok(self.repo.find_plan(aggregate.id())?.unwrap_or(aggregate))
    }

    /// run `operation`, retrying lock timeouts with exponential backoff
    fn with_retry<T>(&self, operation: &'static str, mut attempt_fn: impl FnMut() -> Result<T>) -> Result<T> {
        let mut delays = self.config.retry.backoff();
        let mut attempt = 1u32;
        loop {
            match attempt_fn() {
                Err(e) if e.is_retryable() => match delays.next() {
                    Some(delay) => {
                        warn!(
                            operation,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retryable failure, backing off"
                        );
                        thread::sleep(delay);
                        attempt += 1;
                    }
                    None => return Err(e),
                },
                other => return other,
            }
        }
    }
}

/// persist everything a transition emitted; returns the last record
fn append_trail<T: CardTransaction>(tx: &mut T, trail: &mut AuditTrail) -> Result<Option<AuditRecord>> {
    let records = trail.take_records();
    for record in &records {
        tx.append_audit(record)?;
    }
    Ok(records.into_iter().last())
}

fn require_reason(reason: &str) -> Result<()> {
    if reason.trim().is_empty() {
        return Err(BillingError::InvalidRequest {
            message: "a reason is required".to_string(),
        });
    }
    Ok(())
}
