use reqwest::blocking::Client;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{CancellationRecord, InstallmentPaymentRecord, LedgerClient, LedgerError, PurchaseRecord};
use crate::config::BillingConfig;
use crate::types::PaymentMethod;

const TRANSACTIONS_PATH: &str = "/api/v1/transactions";

/// body of `POST /api/v1/transactions`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionRequest {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    currency: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_method: Option<&'static str>,
    #[serde(skip_serializing_if = "String::is_empty")]
    merchant_name: String,
    reference_id: String,
    metadata: TransactionMetadata,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMetadata {
    card_id: Uuid,
    installment_plan_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    installment_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    installment_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    installments_count: Option<u32>,
    category: &'static str,
    /// the transaction service only records; balances are owned here
    record_only: bool,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    id: String,
}

/// blocking client for the transaction service
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    client: Client,
    endpoint: String,
    currency: String,
    timeout_secs: u64,
}

impl HttpLedgerClient {
    pub fn new(config: &BillingConfig) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(config.ledger.timeout())
            .build()
            .map_err(|e| LedgerError::Transport { message: e.to_string() })?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", config.ledger.base_url.trim_end_matches('/'), TRANSACTIONS_PATH),
            currency: config.currency.clone(),
            timeout_secs: config.ledger.timeout_secs,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn purchase_body(&self, record: &PurchaseRecord) -> TransactionRequest {
        TransactionRequest {
            kind: "credit_charge",
            amount: record.amount.as_decimal(),
            currency: self.currency.clone(),
            description: format!("{} ({} installments)", record.description, record.installments_count),
            payment_method: Some("credit_card"),
            merchant_name: record.merchant_name.clone(),
            reference_id: record.idempotency_key.clone(),
            metadata: TransactionMetadata {
                card_id: record.card_id,
                installment_plan_id: record.plan_id,
                installment_id: None,
                installment_number: None,
                installments_count: Some(record.installments_count),
                category: "installment_purchase",
                record_only: true,
            },
        }
    }

    fn payment_body(&self, record: &InstallmentPaymentRecord) -> TransactionRequest {
        TransactionRequest {
            kind: "installment_payment",
            amount: record.amount.as_decimal(),
            currency: self.currency.clone(),
            description: format!("Installment #{} payment", record.installment_number),
            payment_method: Some(payment_method_code(record.method)),
            merchant_name: String::new(),
            reference_id: record.idempotency_key.clone(),
            metadata: TransactionMetadata {
                card_id: record.card_id,
                installment_plan_id: record.plan_id,
                installment_id: Some(record.installment_id),
                installment_number: Some(record.installment_number),
                installments_count: None,
                category: "installment_payment",
                record_only: true,
            },
        }
    }

    fn cancellation_body(&self, record: &CancellationRecord) -> TransactionRequest {
        TransactionRequest {
            kind: "installment_refund",
            amount: record.released.as_decimal(),
            currency: self.currency.clone(),
            description: format!("Installment plan cancelled: {}", record.reason),
            payment_method: None,
            merchant_name: String::new(),
            reference_id: record.idempotency_key.clone(),
            metadata: TransactionMetadata {
                card_id: record.card_id,
                installment_plan_id: record.plan_id,
                installment_id: None,
                installment_number: None,
                installments_count: None,
                category: "installment_cancellation",
                record_only: true,
            },
        }
    }

    fn post(&self, user_id: &str, body: &TransactionRequest) -> Result<String, LedgerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-User-ID", user_id)
            .header("Idempotency-Key", &body.reference_id)
            .json(body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    LedgerError::Timeout { timeout_secs: self.timeout_secs }
                } else {
                    LedgerError::Transport { message: e.to_string() }
                }
            })?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body_text = response.text().unwrap_or_default();
            warn!(
                status = %status,
                kind = body.kind,
                reference = %body.reference_id,
                "transaction service rejected record"
            );
            return Err(LedgerError::Rejected { status: status.as_u16(), body: body_text });
        }

        let parsed: TransactionResponse = response
            .json()
            .map_err(|e| LedgerError::InvalidResponse { message: e.to_string() })?;

        debug!(remote_tx_id = %parsed.id, kind = body.kind, "transaction recorded");
        Ok(parsed.id)
    }
}

fn payment_method_code(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::BankTransfer => "bank_transfer",
        PaymentMethod::DebitCard => "debit_card",
        PaymentMethod::Cash => "cash",
        PaymentMethod::AccountBalance => "wallet",
    }
}

impl LedgerClient for HttpLedgerClient {
    fn record_purchase(&self, record: &PurchaseRecord) -> Result<String, LedgerError> {
        self.post(&record.user_id, &self.purchase_body(record))
    }

    fn record_installment_payment(&self, record: &InstallmentPaymentRecord) -> Result<String, LedgerError> {
        self.post(&record.user_id, &self.payment_body(record))
    }

    fn record_cancellation(&self, record: &CancellationRecord) -> Result<String, LedgerError> {
        self.post(&record.user_id, &self.cancellation_body(record))
    }
}
