//! Client side of the remote transaction ledger.
//!
//! The ledger only records what already happened locally (`recordOnly`), so a
//! failed call never undoes a committed charge or payment. Every call carries
//! an idempotency key; the remote side returns the same transaction id when a
//! key is replayed.

pub mod http;
pub mod memory;

use serde::Serialize;
use thiserror::Error;

use crate::decimal::Money;
use crate::types::{CardId, InstallmentId, PaymentMethod, PlanId};

pub use http::HttpLedgerClient;
pub use memory::InMemoryLedgerClient;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("transaction service unreachable: {message}")]
    Transport {
        message: String,
    },

    #[error("transaction service timed out after {timeout_secs}s")]
    Timeout {
        timeout_secs: u64,
    },

    #[error("transaction service returned status {status}: {body}")]
    Rejected {
        status: u16,
        body: String,
    },

    #[error("invalid response from transaction service: {message}")]
    InvalidResponse {
        message: String,
    },
}

/// a purchase financed by a new plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseRecord {
    pub user_id: String,
    pub card_id: CardId,
    pub plan_id: PlanId,
    pub amount: Money,
    pub installments_count: u32,
    pub description: String,
    pub merchant_name: String,
    pub idempotency_key: String,
}

/// money received against one installment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallmentPaymentRecord {
    pub user_id: String,
    pub card_id: CardId,
    pub plan_id: PlanId,
    pub installment_id: InstallmentId,
    pub installment_number: u32,
    pub amount: Money,
    pub method: PaymentMethod,
    pub idempotency_key: String,
}

/// credit given back when a plan is cancelled
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancellationRecord {
    pub user_id: String,
    pub card_id: CardId,
    pub plan_id: PlanId,
    pub released: Money,
    pub reason: String,
    pub idempotency_key: String,
}

/// records billing events in the transaction service; returns the remote id
#[cfg_attr(test, mockall::automock)]
pub trait LedgerClient: Send + Sync {
    fn record_purchase(&self, record: &PurchaseRecord) -> Result<String, LedgerError>;

    fn record_installment_payment(&self, record: &InstallmentPaymentRecord) -> Result<String, LedgerError>;

    fn record_cancellation(&self, record: &CancellationRecord) -> Result<String, LedgerError>;
}
