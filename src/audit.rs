use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{AuditId, InstallmentId, PlanId, PlanStatus};

/// kind of state transition recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    Created,
    Paid,
    PartiallyPaid,
    Cancelled,
    Suspended,
    Reactivated,
    OverdueMarked,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Paid => "paid",
            AuditAction::PartiallyPaid => "partially-paid",
            AuditAction::Cancelled => "cancelled",
            AuditAction::Suspended => "suspended",
            AuditAction::Reactivated => "reactivated",
            AuditAction::OverdueMarked => "overdue-marked",
        }
    }

    /// actions that move money and must reach the remote ledger
    pub fn moves_money(&self) -> bool {
        matches!(
            self,
            AuditAction::Created | AuditAction::Paid | AuditAction::PartiallyPaid | AuditAction::Cancelled
        )
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// whether the remote transaction ledger has seen this operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LedgerSyncStatus {
    /// no money moved, nothing to record remotely
    NotRequired,
    /// committed locally, remote call not yet confirmed
    Pending { last_error: Option<String> },
    Synced { remote_tx_id: String },
}

impl LedgerSyncStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, LedgerSyncStatus::Pending { .. })
    }
}

/// card balance around a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub before: Money,
    pub after: Money,
}

impl BalanceSnapshot {
    pub fn unchanged(balance: Money) -> Self {
        Self { before: balance, after: balance }
    }
}

/// append-only audit entry, one per plan state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditId,
    pub plan_id: PlanId,
    pub installment_id: Option<InstallmentId>,
    pub action: AuditAction,
    pub actor: String,
    pub reason: String,
    /// caller idempotency key
    pub reference: Option<String>,
    pub old_status: Option<PlanStatus>,
    pub new_status: PlanStatus,
    /// money moved by this transition, zero for pure status changes
    pub amount: Money,
    pub balance: BalanceSnapshot,
    pub timestamp: DateTime<Utc>,
    pub ledger_sync: LedgerSyncStatus,
}

impl AuditRecord {
    /// new record; money-moving actions start as pending remote sync
    pub fn new(
        plan_id: PlanId,
        action: AuditAction,
        actor: impl Into<String>,
        reason: impl Into<String>,
        old_status: Option<PlanStatus>,
        new_status: PlanStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let ledger_sync = if action.moves_money() {
            LedgerSyncStatus::Pending { last_error: None }
        } else {
            LedgerSyncStatus::NotRequired
        };

        Self {
            id: Uuid::new_v4(),
            plan_id,
            installment_id: None,
            action,
            actor: actor.into(),
            reason: reason.into(),
            reference: None,
            old_status,
            new_status,
            amount: Money::ZERO,
            balance: BalanceSnapshot::unchanged(Money::ZERO),
            timestamp,
            ledger_sync,
        }
    }

    pub fn with_installment(mut self, installment_id: InstallmentId) -> Self {
        self.installment_id = Some(installment_id);
        self
    }

    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_amounts(mut self, amount: Money, balance: BalanceSnapshot) -> Self {
        self.amount = amount;
        self.balance = balance;
        self
    }
}

/// collects audit records produced during one operation
#[derive(Debug, Default)]
pub struct AuditTrail {
    records: Vec<AuditRecord>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    pub fn emit(&mut self, record: AuditRecord) {
        self.records.push(record);
    }

    pub fn take_records(&mut self) -> Vec<AuditRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
