//! Persistence boundary.
//!
//! Writes go through a [`CardTransaction`], which holds the pessimistic lock
//! on one card for its whole lifetime. Every plan, installment and audit row
//! touched in a transaction must belong to that card. Dropping a transaction
//! without calling `commit` discards its writes and releases the lock.

pub mod memory;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::audit::{AuditRecord, LedgerSyncStatus};
use crate::card::Card;
use crate::plan::{Installment, InstallmentPlan, PlanAggregate};
use crate::types::{AuditId, CardId, InstallmentId, PlanId};

pub use memory::InMemoryRepository;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("timed out waiting for lock on card {card_id}")]
    LockTimeout {
        card_id: CardId,
    },

    #[error("{entity} {id} belongs to card {owner}, not to locked card {locked}")]
    WrongAggregate {
        entity: &'static str,
        id: Uuid,
        owner: CardId,
        locked: CardId,
    },

    #[error("{entity} {id} already exists")]
    Duplicate {
        entity: &'static str,
        id: Uuid,
    },

    #[error("{entity} {id} does not exist")]
    Missing {
        entity: &'static str,
        id: Uuid,
    },

    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
    },
}

impl RepositoryError {
    /// only lock contention is worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::LockTimeout { .. })
    }
}

pub type RepoResult<T> = std::result::Result<T, RepositoryError>;

/// read-modify-write unit scoped to one locked card
pub trait CardTransaction {
    fn card_id(&self) -> CardId;

    /// the locked card, or `None` when it does not exist
    fn get_card_for_update(&mut self) -> RepoResult<Option<Card>>;

    fn save_card(&mut self, card: &Card) -> RepoResult<()>;

    fn load_plan(&mut self, plan_id: PlanId) -> RepoResult<Option<PlanAggregate>>;

    fn create_plan_with_installments(&mut self, aggregate: &PlanAggregate) -> RepoResult<()>;

    fn save_plan(&mut self, plan: &InstallmentPlan) -> RepoResult<()>;

    fn save_installment(&mut self, installment: &Installment) -> RepoResult<()>;

    fn append_audit(&mut self, record: &AuditRecord) -> RepoResult<()>;

    /// audit row previously written for this card with the given caller reference
    fn find_audit_by_reference(&mut self, reference: &str) -> RepoResult<Option<AuditRecord>>;

    /// the only mutation allowed on an existing audit row
    fn set_ledger_sync(&mut self, audit_id: AuditId, status: LedgerSyncStatus) -> RepoResult<()>;

    fn commit(self) -> RepoResult<()>;
}

/// storage for cards, plans, installments and the audit log
pub trait BillingRepository: Send + Sync {
    type Tx<'a>: CardTransaction
    where
        Self: 'a;

    /// lock the card and open a transaction on it
    fn begin(&self, card_id: CardId) -> RepoResult<Self::Tx<'_>>;

    fn find_card(&self, card_id: CardId) -> RepoResult<Option<Card>>;

    fn find_plan(&self, plan_id: PlanId) -> RepoResult<Option<PlanAggregate>>;

    fn find_installment(&self, installment_id: InstallmentId) -> RepoResult<Option<Installment>>;

    fn plans_for_card(&self, card_id: CardId) -> RepoResult<Vec<PlanAggregate>>;

    /// oldest first
    fn audit_for_plan(&self, plan_id: PlanId) -> RepoResult<Vec<AuditRecord>>;

    /// records with `from <= timestamp < to`, oldest first
    fn audit_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> RepoResult<Vec<AuditRecord>>;

    /// money-moving records the remote ledger has not confirmed yet
    fn pending_ledger_syncs(&self) -> RepoResult<Vec<AuditRecord>>;

    /// guarded bulk update: pending installments due before `cutoff` become overdue
    fn mark_overdue_batch(&self, cutoff: NaiveDate, now: DateTime<Utc>) -> RepoResult<u64>;
}
