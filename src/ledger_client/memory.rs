use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use super::{CancellationRecord, InstallmentPaymentRecord, LedgerClient, LedgerError, PurchaseRecord};

/// a call accepted by the in-memory ledger
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Purchase(PurchaseRecord),
    InstallmentPayment(InstallmentPaymentRecord),
    Cancellation(CancellationRecord),
}

impl RecordedCall {
    pub fn idempotency_key(&self) -> &str {
        match self {
            RecordedCall::Purchase(r) => &r.idempotency_key,
            RecordedCall::InstallmentPayment(r) => &r.idempotency_key,
            RecordedCall::Cancellation(r) => &r.idempotency_key,
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    calls: Vec<RecordedCall>,
    by_key: HashMap<String, String>,
    attempts: u64,
    failures_remaining: u32,
    offline: bool,
}

/// transaction ledger double with the same idempotency semantics as the remote one
#[derive(Debug, Default)]
pub struct InMemoryLedgerClient {
    state: Mutex<LedgerState>,
}

impl InMemoryLedgerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// reject the next `n` calls with a transport error
    pub fn fail_next(&self, n: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.failures_remaining = n;
        }
    }

    /// reject every call until switched back
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.offline = offline;
        }
    }

    /// accepted calls, oldest first; replays of a known key are not repeated
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// every call made, including rejected ones and replays
    pub fn attempts(&self) -> u64 {
        self.state.lock().map(|s| s.attempts).unwrap_or_default()
    }

    fn record(&self, key: &str, call: RecordedCall) -> Result<String, LedgerError> {
        let mut state = self.state.lock().map_err(|_| LedgerError::Transport {
            message: "in-memory ledger poisoned".to_string(),
        })?;
        state.attempts += 1;

        if state.offline {
            return Err(LedgerError::Transport { message: "ledger offline".to_string() });
        }
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(LedgerError::Transport { message: "injected failure".to_string() });
        }

        if let Some(existing) = state.by_key.get(key) {
            debug!(key, remote_tx_id = %existing, "replayed ledger record");
            return Ok(existing.clone());
        }

        let id = format!("tx-{:06}", state.calls.len() + 1);
        state.by_key.insert(key.to_string(), id.clone());
        state.calls.push(call);
        Ok(id)
    }
}

impl LedgerClient for InMemoryLedgerClient {
    fn record_purchase(&self, record: &PurchaseRecord) -> Result<String, LedgerError> {
        self.record(&record.idempotency_key, RecordedCall::Purchase(record.clone()))
    }

    fn record_installment_payment(&self, record: &InstallmentPaymentRecord) -> Result<String, LedgerError> {
        self.record(&record.idempotency_key, RecordedCall::InstallmentPayment(record.clone()))
    }

    fn record_cancellation(&self, record: &CancellationRecord) -> Result<String, LedgerError> {
        self.record(&record.idempotency_key, RecordedCall::Cancellation(record.clone()))
    }
}
