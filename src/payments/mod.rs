pub mod amortization;

use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::types::{InstallmentId, PaymentMethod};

pub use amortization::{AmortizationCalculator, InstallmentSchedule, ScheduledInstallment};

/// payment request against one installment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub installment_id: InstallmentId,
    /// `None` pays whatever is still owed on the installment
    pub amount: Option<Money>,
    pub method: PaymentMethod,
    /// idempotency key; replays return the first result
    pub reference: String,
    pub initiated_by: String,
}

impl PaymentRequest {
    /// pay the full remaining amount
    pub fn full(installment_id: InstallmentId, method: PaymentMethod, reference: impl Into<String>) -> Self {
        Self {
            installment_id,
            amount: None,
            method,
            reference: reference.into(),
            initiated_by: "system".to_string(),
        }
    }

    /// pay part of the installment
    pub fn partial(
        installment_id: InstallmentId,
        amount: Money,
        method: PaymentMethod,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            amount: Some(amount),
            ..Self::full(installment_id, method, reference)
        }
    }

    pub fn initiated_by(mut self, actor: impl Into<String>) -> Self {
        self.initiated_by = actor.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(amount) = self.amount {
            if !amount.is_positive() {
                return Err(BillingError::InvalidAmount { amount });
            }
        }
        if self.reference.trim().is_empty() {
            return Err(BillingError::InvalidRequest {
                message: "payment reference is required".to_string(),
            });
        }
        Ok(())
    }
}

/// what a payment did to one installment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentApplication {
    pub applied: Money,
    pub remaining_after: Money,
    pub installment_settled: bool,
    pub plan_completed: bool,
}
