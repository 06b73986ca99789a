pub mod audit;
pub mod card;
pub mod config;
pub mod credit;
pub mod decimal;
pub mod errors;
pub mod ledger_client;
pub mod lifecycle;
pub mod payments;
pub mod plan;
pub mod reporting;
pub mod repository;
pub mod service;
pub mod types;

// re-export key types
pub use audit::{AuditAction, AuditRecord, AuditTrail, BalanceSnapshot, LedgerSyncStatus};
pub use card::Card;
pub use config::{BillingConfig, LedgerClientConfig, RetryConfig};
pub use credit::CreditLedger;
pub use decimal::{Money, Rate};
pub use errors::{BillingError, ErrorKind, Result};
pub use ledger_client::{
    CancellationRecord, HttpLedgerClient, InMemoryLedgerClient, InstallmentPaymentRecord, LedgerClient,
    LedgerError, PurchaseRecord,
};
pub use lifecycle::{InstallmentPlanStateMachine, TransitionContext};
pub use payments::{
    AmortizationCalculator, InstallmentSchedule, PaymentApplication, PaymentRequest, ScheduledInstallment,
};
pub use plan::{Installment, InstallmentPlan, PlanAggregate, PlanTerms};
pub use reporting::{CardSummary, DailyLoad, MonthlyLoad, UpcomingInstallment};
pub use repository::{BillingRepository, CardTransaction, InMemoryRepository, RepositoryError};
pub use service::{BillingService, Committed, CreatePlanRequest, PaymentReceipt, ReconcileReport};
pub use types::{
    AuditId, CardId, CardStatus, CardType, InstallmentId, InstallmentStatus, PaymentMethod, PlanId, PlanStatus,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
