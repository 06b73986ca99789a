//! Credit-line bookkeeping for a single card.
//!
//! Every operation takes a card snapshot and returns the updated value; nothing
//! here persists anything. Callers write the result back inside the same
//! repository transaction that holds the card lock, so the balance and the plan
//! rows change together.

use tracing::warn;

use crate::card::Card;
use crate::decimal::Money;
use crate::errors::{BillingError, Result};

/// enforces `0 <= balance <= credit_limit` on credit cards
#[derive(Debug, Clone, Copy, Default)]
pub struct CreditLedger;

impl CreditLedger {
    pub fn new() -> Self {
        Self
    }

    /// consume credit; rejected when it would push the balance over the limit
    pub fn charge(&self, card: &Card, amount: Money) -> Result<Card> {
        if !amount.is_positive() {
            return Err(BillingError::InvalidAmount { amount });
        }
        if !card.is_credit() {
            return Err(BillingError::NotACreditCard);
        }
        if !card.is_active() {
            return Err(BillingError::CardNotActive { status: card.status });
        }

        let limit = card.credit_limit.unwrap_or(Money::ZERO);
        let new_balance = card.balance + amount;
        if new_balance > limit {
            return Err(BillingError::InsufficientCredit {
                available: card.available_credit(),
                requested: amount,
            });
        }

        let mut updated = card.clone();
        updated.balance = new_balance;
        Ok(updated)
    }

    /// give unused credit back to the card (plan cancellation)
    pub fn release(&self, card: &Card, amount: Money) -> Result<Card> {
        self.reduce(card, amount, "release")
    }

    /// installment payment reduces used credit
    pub fn payment(&self, card: &Card, amount: Money) -> Result<Card> {
        self.reduce(card, amount, "payment")
    }

    /// true when the card satisfies the balance invariant
    pub fn check_invariant(&self, card: &Card) -> bool {
        if card.balance.is_negative() {
            return false;
        }
        match card.credit_limit {
            Some(limit) if card.is_credit() => card.balance <= limit,
            _ => true,
        }
    }

    fn reduce(&self, card: &Card, amount: Money, operation: &'static str) -> Result<Card> {
        if amount.is_negative() {
            return Err(BillingError::InvalidAmount { amount });
        }
        if !card.is_credit() {
            return Err(BillingError::NotACreditCard);
        }

        if amount > card.balance {
            warn!(
                card_id = %card.id,
                balance = %card.balance,
                amount = %amount,
                operation,
                "credit reduction exceeds used balance, clamping to zero"
            );
        }

        let mut updated = card.clone();
        updated.balance = card.balance.saturating_sub(amount);
        Ok(updated)
    }
}
