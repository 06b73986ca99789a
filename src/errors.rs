use thiserror::Error;
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::repository::RepositoryError;
use crate::types::{CardStatus, InstallmentStatus, PlanStatus};

#[derive(Error, Debug)]
pub enum BillingError {
    // validation
    #[error("invalid schedule: {message}")]
    InvalidSchedule {
        message: String,
    },

    #[error("invalid amount: {amount}")]
    InvalidAmount {
        amount: Money,
    },

    #[error("invalid interest rate: {rate}")]
    InvalidInterestRate {
        rate: Rate,
    },

    #[error("invalid date: {message}")]
    InvalidDate {
        message: String,
    },

    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    // business rules
    #[error("insufficient credit: available {available}, requested {requested}")]
    InsufficientCredit {
        available: Money,
        requested: Money,
    },

    #[error("card not active: current status is {status:?}")]
    CardNotActive {
        status: CardStatus,
    },

    #[error("installment plans are only available for credit cards")]
    NotACreditCard,

    #[error("plan not active: current status is {status}")]
    PlanNotActive {
        status: PlanStatus,
    },

    #[error("installment {installment_id} already paid")]
    AlreadyPaid {
        installment_id: Uuid,
    },

    #[error("installment {installment_id} cannot be paid in status {status:?}")]
    InstallmentNotPayable {
        installment_id: Uuid,
        status: InstallmentStatus,
    },

    #[error("payment {amount} exceeds remaining amount {remaining}")]
    PaymentExceedsRemaining {
        amount: Money,
        remaining: Money,
    },

    #[error("invalid transition: cannot {action} a {from} plan")]
    InvalidTransition {
        from: PlanStatus,
        action: &'static str,
    },

    #[error("reference {reference} was already used for a different operation")]
    ReferenceConflict {
        reference: String,
    },

    // lookups
    #[error("card not found: {id}")]
    CardNotFound {
        id: Uuid,
    },

    #[error("installment plan not found: {id}")]
    PlanNotFound {
        id: Uuid,
    },

    #[error("installment not found: {id}")]
    InstallmentNotFound {
        id: Uuid,
    },

    // persistence
    #[error("persistence failure: {0}")]
    Persistence(#[from] RepositoryError),
}

/// coarse error classes, used by the transport layer to pick a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    BusinessRule,
    NotFound,
    Persistence,
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::InvalidSchedule { .. }
            | BillingError::InvalidAmount { .. }
            | BillingError::InvalidInterestRate { .. }
            | BillingError::InvalidDate { .. }
            | BillingError::InvalidRequest { .. }
            | BillingError::InvalidConfiguration { .. } => ErrorKind::Validation,
            BillingError::InsufficientCredit { .. }
            | BillingError::CardNotActive { .. }
            | BillingError::NotACreditCard
            | BillingError::PlanNotActive { .. }
            | BillingError::AlreadyPaid { .. }
            | BillingError::InstallmentNotPayable { .. }
            | BillingError::PaymentExceedsRemaining { .. }
            | BillingError::InvalidTransition { .. }
            | BillingError::ReferenceConflict { .. } => ErrorKind::BusinessRule,
            BillingError::CardNotFound { .. }
            | BillingError::PlanNotFound { .. }
            | BillingError::InstallmentNotFound { .. } => ErrorKind::NotFound,
            BillingError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// lock timeouts and write conflicts may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::Persistence(e) if e.is_retryable())
    }
}

pub type Result<T> = std::result::Result<T, BillingError>;
