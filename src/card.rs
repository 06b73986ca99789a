use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{CardId, CardStatus, CardType};

/// payment instrument whose used credit is tracked by the credit ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub account_id: Uuid,
    pub card_type: CardType,
    /// used credit for credit cards
    pub balance: Money,
    pub credit_limit: Option<Money>,
    pub status: CardStatus,
    pub is_default: bool,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// new active credit card with nothing used
    pub fn credit(account_id: Uuid, credit_limit: Money, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            card_type: CardType::Credit,
            balance: Money::ZERO,
            credit_limit: Some(credit_limit),
            status: CardStatus::Active,
            is_default: false,
            updated_at: now,
        }
    }

    /// new active debit card
    pub fn debit(account_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            card_type: CardType::Debit,
            balance: Money::ZERO,
            credit_limit: None,
            status: CardStatus::Active,
            is_default: false,
            updated_at: now,
        }
    }

    /// builder-style override of the used balance
    pub fn with_balance(mut self, balance: Money) -> Self {
        self.balance = balance;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == CardStatus::Active
    }

    pub fn is_credit(&self) -> bool {
        self.card_type == CardType::Credit
    }

    /// unused credit line; zero for debit cards or cards without a limit
    pub fn available_credit(&self) -> Money {
        match (self.card_type, self.credit_limit) {
            (CardType::Credit, Some(limit)) => limit.saturating_sub(self.balance),
            _ => Money::ZERO,
        }
    }
}
