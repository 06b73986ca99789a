use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, warn};

use super::{BillingRepository, CardTransaction, RepoResult, RepositoryError};
use crate::audit::{AuditRecord, LedgerSyncStatus};
use crate::card::Card;
use crate::config::BillingConfig;
use crate::lifecycle::InstallmentPlanStateMachine;
use crate::plan::{Installment, InstallmentPlan, PlanAggregate};
use crate::types::{AuditId, CardId, InstallmentId, InstallmentStatus, PlanId};

#[derive(Debug, Default)]
struct Store {
    cards: HashMap<CardId, Card>,
    plans: HashMap<PlanId, PlanAggregate>,
    installment_index: HashMap<InstallmentId, PlanId>,
    audit: Vec<AuditRecord>,
}

impl Store {
    fn plan_owner(&self, plan_id: PlanId) -> Option<CardId> {
        self.plans.get(&plan_id).map(|a| a.plan.card_id)
    }
}

/// per-card exclusive locks with a bounded wait
#[derive(Debug, Default)]
struct CardLocks {
    held: Mutex<HashSet<CardId>>,
    released: Condvar,
}

impl CardLocks {
    fn acquire(&self, card_id: CardId, timeout: Duration) -> RepoResult<()> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock().map_err(|_| poisoned("card locks"))?;

        while held.contains(&card_id) {
            let now = Instant::now();
            if now >= deadline {
                warn!(card_id = %card_id, timeout_ms = timeout.as_millis() as u64, "card lock wait timed out");
                return Err(RepositoryError::LockTimeout { card_id });
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|_| poisoned("card locks"))?;
            held = guard;
        }

        held.insert(card_id);
        Ok(())
    }

    fn release(&self, card_id: CardId) {
        match self.held.lock() {
            Ok(mut held) => {
                held.remove(&card_id);
            }
            Err(poison) => {
                poison.into_inner().remove(&card_id);
            }
        }
        self.released.notify_all();
    }
}

fn poisoned(what: &str) -> RepositoryError {
    RepositoryError::Unavailable {
        message: format!("{what} poisoned by a panicked writer"),
    }
}

/// process-local repository used by tests, demos and single-node deployments
#[derive(Debug)]
pub struct InMemoryRepository {
    store: RwLock<Store>,
    locks: CardLocks,
    lock_timeout: Duration,
}

impl InMemoryRepository {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            store: RwLock::new(Store::default()),
            locks: CardLocks::default(),
            lock_timeout,
        }
    }

    pub fn from_config(config: &BillingConfig) -> Self {
        Self::new(config.lock_timeout())
    }

    /// seed or replace a card outside of any transaction
    pub fn insert_card(&self, card: Card) -> RepoResult<()> {
        self.write()?.cards.insert(card.id, card);
        Ok(())
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, Store>> {
        self.store.read().map_err(|_| poisoned("store"))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, Store>> {
        self.store.write().map_err(|_| poisoned("store"))
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::from_config(&BillingConfig::default())
    }
}

/// staged writes for one locked card, applied atomically on commit
///
/// Existing plans are written back row by row: only headers passed to
/// `save_plan` and installments passed to `save_installment` reach the store.
#[derive(Debug)]
pub struct MemoryTransaction<'a> {
    repo: &'a InMemoryRepository,
    card_id: CardId,
    card: Option<Card>,
    plans: HashMap<PlanId, PlanAggregate>,
    new_plans: HashSet<PlanId>,
    dirty_headers: HashSet<PlanId>,
    dirty_installments: HashSet<InstallmentId>,
    audit: Vec<AuditRecord>,
    sync_updates: Vec<(AuditId, LedgerSyncStatus)>,
}

impl<'a> MemoryTransaction<'a> {
    fn ensure_owned(&self, entity: &'static str, id: uuid::Uuid, owner: CardId) -> RepoResult<()> {
        if owner != self.card_id {
            return Err(RepositoryError::WrongAggregate {
                entity,
                id,
                owner,
                locked: self.card_id,
            });
        }
        Ok(())
    }

    /// staged copy of a plan, pulled from the store on first touch
    fn staged_plan(&mut self, plan_id: PlanId) -> RepoResult<Option<&mut PlanAggregate>> {
        if !self.plans.contains_key(&plan_id) {
            let loaded = self.repo.read()?.plans.get(&plan_id).cloned();
            match loaded {
                Some(aggregate) => {
                    self.ensure_owned("plan", plan_id, aggregate.plan.card_id)?;
                    self.plans.insert(plan_id, aggregate);
                }
                None => return Ok(None),
            }
        }
        Ok(self.plans.get_mut(&plan_id))
    }
}

impl<'a> CardTransaction for MemoryTransaction<'a> {
    fn card_id(&self) -> CardId {
        self.card_id
    }

    fn get_card_for_update(&mut self) -> RepoResult<Option<Card>> {
        if let Some(card) = &self.card {
            return Ok(Some(card.clone()));
        }
        Ok(self.repo.read()?.cards.get(&self.card_id).cloned())
    }

    fn save_card(&mut self, card: &Card) -> RepoResult<()> {
        self.ensure_owned("card", card.id, card.id)?;
        self.card = Some(card.clone());
        Ok(())
    }

    fn load_plan(&mut self, plan_id: PlanId) -> RepoResult<Option<PlanAggregate>> {
        Ok(self.staged_plan(plan_id)?.cloned())
    }

    fn create_plan_with_installments(&mut self, aggregate: &PlanAggregate) -> RepoResult<()> {
        let plan_id = aggregate.id();
        self.ensure_owned("plan", plan_id, aggregate.plan.card_id)?;
        if self.plans.contains_key(&plan_id) || self.repo.read()?.plans.contains_key(&plan_id) {
            return Err(RepositoryError::Duplicate { entity: "plan", id: plan_id });
        }
        self.new_plans.insert(plan_id);
        self.plans.insert(plan_id, aggregate.clone());
        Ok(())
    }

    fn save_plan(&mut self, plan: &InstallmentPlan) -> RepoResult<()> {
        self.ensure_owned("plan", plan.id, plan.card_id)?;
        let staged = self
            .staged_plan(plan.id)?
            .ok_or(RepositoryError::Missing { entity: "plan", id: plan.id })?;
        staged.plan = plan.clone();
        self.dirty_headers.insert(plan.id);
        Ok(())
    }

    fn save_installment(&mut self, installment: &Installment) -> RepoResult<()> {
        let staged = self.staged_plan(installment.plan_id)?.ok_or(RepositoryError::Missing {
            entity: "plan",
            id: installment.plan_id,
        })?;
        let slot = staged
            .installments
            .iter_mut()
            .find(|i| i.id == installment.id)
            .ok_or(RepositoryError::Missing { entity: "installment", id: installment.id })?;
        *slot = installment.clone();
        self.dirty_installments.insert(installment.id);
        Ok(())
    }

    fn append_audit(&mut self, record: &AuditRecord) -> RepoResult<()> {
        if self.staged_plan(record.plan_id)?.is_none() {
            return Err(RepositoryError::Missing { entity: "plan", id: record.plan_id });
        }
        self.audit.push(record.clone());
        Ok(())
    }

    fn find_audit_by_reference(&mut self, reference: &str) -> RepoResult<Option<AuditRecord>> {
        if let Some(record) = self.audit.iter().find(|r| r.reference.as_deref() == Some(reference)) {
            return Ok(Some(record.clone()));
        }
        let store = self.repo.read()?;
        Ok(store
            .audit
            .iter()
            .filter(|r| store.plan_owner(r.plan_id) == Some(self.card_id))
            .find(|r| r.reference.as_deref() == Some(reference))
            .cloned())
    }

    fn set_ledger_sync(&mut self, audit_id: AuditId, status: LedgerSyncStatus) -> RepoResult<()> {
        if let Some(record) = self.audit.iter_mut().find(|r| r.id == audit_id) {
            record.ledger_sync = status;
            return Ok(());
        }

        let owner = {
            let store = self.repo.read()?;
            let record = store
                .audit
                .iter()
                .find(|r| r.id == audit_id)
                .ok_or(RepositoryError::Missing { entity: "audit record", id: audit_id })?;
            store.plan_owner(record.plan_id)
        };
        if let Some(owner) = owner {
            self.ensure_owned("audit record", audit_id, owner)?;
        }
        self.sync_updates.push((audit_id, status));
        Ok(())
    }

    fn commit(mut self) -> RepoResult<()> {
        let mut store = self.repo.write()?;

        if let Some(card) = self.card.take() {
            store.cards.insert(card.id, card);
        }
        for (plan_id, staged) in self.plans.drain() {
            if self.new_plans.contains(&plan_id) {
                for installment in &staged.installments {
                    store.installment_index.insert(installment.id, plan_id);
                }
                store.plans.insert(plan_id, staged);
                continue;
            }

            let Some(stored) = store.plans.get_mut(&plan_id) else {
                continue;
            };
            if self.dirty_headers.contains(&plan_id) {
                stored.plan = staged.plan;
            }
            for row in staged.installments {
                if !self.dirty_installments.contains(&row.id) {
                    continue;
                }
                if let Some(slot) = stored.installments.iter_mut().find(|i| i.id == row.id) {
                    *slot = merge_row(slot, row);
                }
            }
        }
        store.audit.append(&mut self.audit);
        for (audit_id, status) in self.sync_updates.drain(..) {
            if let Some(record) = store.audit.iter_mut().find(|r| r.id == audit_id) {
                record.ledger_sync = status;
            }
        }

        debug!(card_id = %self.card_id, new_plans = self.new_plans.len(), "card transaction committed");
        Ok(())
    }
}

/// the sweep only moves pending rows to overdue; a row staged before it ran keeps the flag
fn merge_row(stored: &Installment, mut staged: Installment) -> Installment {
    if stored.status == InstallmentStatus::Overdue && staged.status == InstallmentStatus::Pending {
        staged.status = InstallmentStatus::Overdue;
    }
    staged
}

impl<'a> Drop for MemoryTransaction<'a> {
    fn drop(&mut self) {
        self.repo.locks.release(self.card_id);
    }
}

impl BillingRepository for InMemoryRepository {
    type Tx<'a>
        = MemoryTransaction<'a>
    where
        Self: 'a;

    fn begin(&self, card_id: CardId) -> RepoResult<MemoryTransaction<'_>> {
        self.locks.acquire(card_id, self.lock_timeout)?;
        Ok(MemoryTransaction {
            repo: self,
            card_id,
            card: None,
            plans: HashMap::new(),
            new_plans: HashSet::new(),
            dirty_headers: HashSet::new(),
            dirty_installments: HashSet::new(),
            audit: Vec::new(),
            sync_updates: Vec::new(),
        })
    }

    fn find_card(&self, card_id: CardId) -> RepoResult<Option<Card>> {
        Ok(self.read()?.cards.get(&card_id).cloned())
    }

    fn find_plan(&self, plan_id: PlanId) -> RepoResult<Option<PlanAggregate>> {
        Ok(self.read()?.plans.get(&plan_id).cloned())
    }

    fn find_installment(&self, installment_id: InstallmentId) -> RepoResult<Option<Installment>> {
        let store = self.read()?;
        Ok(store
            .installment_index
            .get(&installment_id)
            .and_then(|plan_id| store.plans.get(plan_id))
            .and_then(|aggregate| aggregate.installment(installment_id))
            .cloned())
    }

    fn plans_for_card(&self, card_id: CardId) -> RepoResult<Vec<PlanAggregate>> {
        let store = self.read()?;
        let mut plans: Vec<PlanAggregate> = store
            .plans
            .values()
            .filter(|a| a.plan.card_id == card_id)
            .cloned()
            .collect();
        plans.sort_by_key(|a| (a.plan.created_at, a.plan.id));
        Ok(plans)
    }

    fn audit_for_plan(&self, plan_id: PlanId) -> RepoResult<Vec<AuditRecord>> {
        Ok(self.read()?.audit.iter().filter(|r| r.plan_id == plan_id).cloned().collect())
    }

    fn audit_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> RepoResult<Vec<AuditRecord>> {
        let mut records: Vec<AuditRecord> = self
            .read()?
            .audit
            .iter()
            .filter(|r| r.timestamp >= from && r.timestamp < to)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    fn pending_ledger_syncs(&self) -> RepoResult<Vec<AuditRecord>> {
        Ok(self.read()?.audit.iter().filter(|r| r.ledger_sync.is_pending()).cloned().collect())
    }

    fn mark_overdue_batch(&self, cutoff: NaiveDate, now: DateTime<Utc>) -> RepoResult<u64> {
        let mut store = self.write()?;
        let installments = store.plans.values_mut().flat_map(|a| a.installments.iter_mut());
        let affected = InstallmentPlanStateMachine::default().mark_overdue(installments, cutoff, now);
        debug!(affected, %cutoff, "overdue batch applied");
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;
    use crate::decimal::{Money, Rate};
    use crate::payments::AmortizationCalculator;
    use crate::plan::PlanTerms;
    use crate::types::PlanStatus;
    use chrono::TimeZone;
    use std::thread;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
    }

    fn seeded(timeout_ms: u64) -> (InMemoryRepository, Card) {
        let repo = InMemoryRepository::new(Duration::from_millis(timeout_ms));
        let card = Card::credit(Uuid::new_v4(), Money::from_major(1_000), now());
        repo.insert_card(card.clone()).unwrap();
        (repo, card)
    }

    fn aggregate_for(card: &Card) -> PlanAggregate {
        let schedule = AmortizationCalculator::new(24)
            .build(Money::from_major(300), 3, now().date_naive(), Rate::ZERO)
            .unwrap();
        let terms = PlanTerms {
            card_id: card.id,
            user_id: "user-1".to_string(),
            description: "bike".to_string(),
            merchant_name: "shop".to_string(),
        };
        PlanAggregate::from_schedule(terms, &schedule, now())
    }

    fn created_record(aggregate: &PlanAggregate, reference: &str) -> AuditRecord {
        AuditRecord::new(aggregate.id(), AuditAction::Created, "user-1", "", None, PlanStatus::Active, now())
            .with_reference(Some(reference.to_string()))
    }

    #[test]
    fn test_commit_applies_all_writes() {
        let (repo, card) = seeded(100);
        let aggregate = aggregate_for(&card);

        let mut tx = repo.begin(card.id).unwrap();
        let mut locked = tx.get_card_for_update().unwrap().unwrap();
        locked.balance = Money::from_major(300);
        tx.save_card(&locked).unwrap();
        tx.create_plan_with_installments(&aggregate).unwrap();
        tx.append_audit(&created_record(&aggregate, "ref-1")).unwrap();
        tx.commit().unwrap();

        assert_eq!(repo.find_card(card.id).unwrap().unwrap().balance, Money::from_major(300));
        assert_eq!(repo.find_plan(aggregate.id()).unwrap(), Some(aggregate.clone()));
        let first = aggregate.installments[0].id;
        assert_eq!(repo.find_installment(first).unwrap().map(|i| i.installment_number), Some(1));
        assert_eq!(repo.audit_for_plan(aggregate.id()).unwrap().len(), 1);
        assert_eq!(repo.pending_ledger_syncs().unwrap().len(), 1);
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let (repo, card) = seeded(100);
        let aggregate = aggregate_for(&card);
        {
            let mut tx = repo.begin(card.id).unwrap();
            let mut locked = tx.get_card_for_update().unwrap().unwrap();
            locked.balance = Money::from_major(999);
            tx.save_card(&locked).unwrap();
            tx.create_plan_with_installments(&aggregate).unwrap();
        }
        assert_eq!(repo.find_card(card.id).unwrap().unwrap().balance, Money::ZERO);
        assert!(repo.find_plan(aggregate.id()).unwrap().is_none());

        // lock released by drop
        assert!(repo.begin(card.id).is_ok());
    }

    #[test]
    fn test_reads_see_staged_writes() {
        let (repo, card) = seeded(100);
        let aggregate = aggregate_for(&card);
        let mut tx = repo.begin(card.id).unwrap();
        tx.create_plan_with_installments(&aggregate).unwrap();

        let mut installment = aggregate.installments[1].clone();
        installment.status = InstallmentStatus::Paid;
        tx.save_installment(&installment).unwrap();

        let loaded = tx.load_plan(aggregate.id()).unwrap().unwrap();
        assert_eq!(loaded.installments[1].status, InstallmentStatus::Paid);

        tx.append_audit(&created_record(&aggregate, "ref-9")).unwrap();
        assert!(tx.find_audit_by_reference("ref-9").unwrap().is_some());
        assert!(tx.find_audit_by_reference("ref-10").unwrap().is_none());
    }

    #[test]
    fn test_second_writer_times_out() {
        let (repo, card) = seeded(50);
        let tx = repo.begin(card.id).unwrap();

        let result = thread::scope(|s| s.spawn(|| repo.begin(card.id).map(|_| ())).join().unwrap());
        let err = result.unwrap_err();
        assert_eq!(err, RepositoryError::LockTimeout { card_id: card.id });
        assert!(err.is_retryable());

        drop(tx);
        assert!(repo.begin(card.id).is_ok());
    }

    #[test]
    fn test_other_cards_are_not_blocked() {
        let (repo, card) = seeded(50);
        let other = Card::credit(Uuid::new_v4(), Money::from_major(10), now());
        repo.insert_card(other.clone()).unwrap();

        let _held = repo.begin(card.id).unwrap();
        let result = thread::scope(|s| s.spawn(|| repo.begin(other.id).map(|_| ())).join().unwrap());
        assert!(result.is_ok());
    }

    #[test]
    fn test_rejects_plan_of_another_card() {
        let (repo, card) = seeded(100);
        let other = Card::credit(Uuid::new_v4(), Money::from_major(1_000), now());
        repo.insert_card(other.clone()).unwrap();
        let aggregate = aggregate_for(&other);

        let mut tx = repo.begin(card.id).unwrap();
        assert!(matches!(
            tx.create_plan_with_installments(&aggregate),
            Err(RepositoryError::WrongAggregate { .. })
        ));
    }

    #[test]
    fn test_reference_lookup_is_scoped_to_card() {
        let (repo, card) = seeded(100);
        let aggregate = aggregate_for(&card);
        let mut tx = repo.begin(card.id).unwrap();
        tx.create_plan_with_installments(&aggregate).unwrap();
        tx.append_audit(&created_record(&aggregate, "shared-ref")).unwrap();
        tx.commit().unwrap();

        let other = Card::credit(Uuid::new_v4(), Money::from_major(10), now());
        repo.insert_card(other.clone()).unwrap();
        let mut tx = repo.begin(other.id).unwrap();
        assert!(tx.find_audit_by_reference("shared-ref").unwrap().is_none());
    }

    #[test]
    fn test_set_ledger_sync_after_commit() {
        let (repo, card) = seeded(100);
        let aggregate = aggregate_for(&card);
        let record = created_record(&aggregate, "ref-1");

        let mut tx = repo.begin(card.id).unwrap();
        tx.create_plan_with_installments(&aggregate).unwrap();
        tx.append_audit(&record).unwrap();
        tx.commit().unwrap();

        let mut tx = repo.begin(card.id).unwrap();
        tx.set_ledger_sync(record.id, LedgerSyncStatus::Synced { remote_tx_id: "tx-1".to_string() })
            .unwrap();
        tx.commit().unwrap();

        assert!(repo.pending_ledger_syncs().unwrap().is_empty());
        let stored = &repo.audit_for_plan(aggregate.id()).unwrap()[0];
        assert_eq!(stored.ledger_sync, LedgerSyncStatus::Synced { remote_tx_id: "tx-1".to_string() });
    }

    #[test]
    fn test_audit_between_is_half_open() {
        let (repo, card) = seeded(100);
        let aggregate = aggregate_for(&card);
        let mut tx = repo.begin(card.id).unwrap();
        tx.create_plan_with_installments(&aggregate).unwrap();
        tx.append_audit(&created_record(&aggregate, "a")).unwrap();
        tx.commit().unwrap();

        let at = now();
        assert_eq!(repo.audit_between(at, at + chrono::Duration::seconds(1)).unwrap().len(), 1);
        assert!(repo.audit_between(at - chrono::Duration::seconds(1), at).unwrap().is_empty());
    }

    #[test]
    fn test_mark_overdue_batch_is_idempotent() {
        let (repo, card) = seeded(100);
        let aggregate = aggregate_for(&card);
        let mut tx = repo.begin(card.id).unwrap();
        tx.create_plan_with_installments(&aggregate).unwrap();
        tx.commit().unwrap();

        let cutoff = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert_eq!(repo.mark_overdue_batch(cutoff, now()).unwrap(), 2);
        assert_eq!(repo.mark_overdue_batch(cutoff, now()).unwrap(), 0);

        let stored = repo.find_plan(aggregate.id()).unwrap().unwrap();
        assert_eq!(stored.count_with_status(InstallmentStatus::Overdue), 2);
        assert_eq!(stored.plan.status, PlanStatus::Active);
    }

    #[test]
    fn test_sweep_during_open_transaction_is_kept() {
        let (repo, card) = seeded(100);
        let aggregate = aggregate_for(&card);
        let plan_id = aggregate.id();
        let mut tx = repo.begin(card.id).unwrap();
        tx.create_plan_with_installments(&aggregate).unwrap();
        tx.commit().unwrap();

        // due Feb 1, Mar 1, Apr 1; staged while everything is still pending
        let mut tx = repo.begin(card.id).unwrap();
        let mut loaded = tx.load_plan(plan_id).unwrap().unwrap();
        let mut partial = loaded.installments[0].clone();
        partial.paid_amount = Money::from_major(40);
        partial.remaining_amount = Money::from_major(60);
        tx.save_installment(&partial).unwrap();
        let mut settled = loaded.installments[1].clone();
        settled.paid_amount = settled.amount;
        settled.remaining_amount = Money::ZERO;
        settled.status = InstallmentStatus::Paid;
        tx.save_installment(&settled).unwrap();
        loaded.plan.paid_installments = 1;
        tx.save_plan(&loaded.plan).unwrap();

        let cutoff = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(repo.mark_overdue_batch(cutoff, now()).unwrap(), 2);
        tx.commit().unwrap();

        let stored = repo.find_plan(plan_id).unwrap().unwrap();
        assert_eq!(stored.installments[0].status, InstallmentStatus::Overdue);
        assert_eq!(stored.installments[0].remaining_amount, Money::from_major(60));
        assert_eq!(stored.installments[1].status, InstallmentStatus::Paid);
        assert_eq!(stored.installments[2].status, InstallmentStatus::Pending);
        assert_eq!(stored.plan.paid_installments, 1);
        assert_eq!(repo.mark_overdue_batch(cutoff, now()).unwrap(), 0);
    }

    #[test]
    fn test_untouched_rows_are_not_written_back() {
        let (repo, card) = seeded(100);
        let aggregate = aggregate_for(&card);
        let plan_id = aggregate.id();
        let mut tx = repo.begin(card.id).unwrap();
        tx.create_plan_with_installments(&aggregate).unwrap();
        tx.commit().unwrap();

        let mut tx = repo.begin(card.id).unwrap();
        let loaded = tx.load_plan(plan_id).unwrap().unwrap();
        tx.save_plan(&loaded.plan).unwrap();
        tx.append_audit(&created_record(&loaded, "ref-2")).unwrap();

        let cutoff = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(repo.mark_overdue_batch(cutoff, now()).unwrap(), 2);
        tx.commit().unwrap();

        let stored = repo.find_plan(plan_id).unwrap().unwrap();
        assert_eq!(stored.count_with_status(InstallmentStatus::Overdue), 2);
        assert_eq!(repo.mark_overdue_batch(cutoff, now()).unwrap(), 0);
    }
}
