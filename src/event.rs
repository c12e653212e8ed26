//! Financial movement records and boundary validation.
//!
//! Events are immutable once constructed: nothing downstream of the
//! ingestion boundary mutates them, snapshots hand out clones.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Transaction,
    Payment,
    Adjustment,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Transaction => "transaction",
            EventKind::Payment => "payment",
            EventKind::Adjustment => "adjustment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

/// Open metadata carried by every event. `direction` is required; the
/// rest is optional context used by liquidity and fx-jump bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMeta {
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_liability: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_rate: Option<f64>,
}

impl EventMeta {
    pub fn credit() -> Self {
        Self { direction: Direction::Credit, is_liability: None, exchange_rate: None }
    }

    pub fn debit() -> Self {
        Self { direction: Direction::Debit, is_liability: None, exchange_rate: None }
    }
}

/// A single financial movement record. `amount` is a non-negative
/// magnitude; sign comes from `metadata.direction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialEvent {
    pub id: String,
    pub ts_ms: u64,
    pub kind: EventKind,
    pub source: String,
    pub amount: f64,
    pub currency: String,
    pub account_id: String,
    pub metadata: EventMeta,
}

impl FinancialEvent {
    /// Signed amount: credits positive, debits negative.
    pub fn signed_amount(&self) -> f64 {
        match self.metadata.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }

    pub fn is_liability_credit(&self) -> bool {
        self.metadata.direction == Direction::Credit
            && self.metadata.is_liability.unwrap_or(false)
    }
}

pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    EmptyId,
    EmptyAccount,
    NonFiniteAmount,
    NegativeAmount,
    BadCurrency(String),
    BadExchangeRate,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::EmptyId => "empty_id",
            RejectReason::EmptyAccount => "empty_account",
            RejectReason::NonFiniteAmount => "non_finite_amount",
            RejectReason::NegativeAmount => "negative_amount",
            RejectReason::BadCurrency(_) => "bad_currency",
            RejectReason::BadExchangeRate => "bad_exchange_rate",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::BadCurrency(c) => write!(f, "bad_currency: {:?}", c),
            other => f.write_str(other.as_str()),
        }
    }
}

impl std::error::Error for RejectReason {}

/// Boundary validation. Events failing here are dropped with a counted
/// rejection and never reach the buffer or the ledger.
pub fn validate(event: &FinancialEvent) -> Result<(), RejectReason> {
    if event.id.trim().is_empty() {
        return Err(RejectReason::EmptyId);
    }
    if event.account_id.trim().is_empty() {
        return Err(RejectReason::EmptyAccount);
    }
    if !event.amount.is_finite() {
        return Err(RejectReason::NonFiniteAmount);
    }
    if event.amount < 0.0 {
        return Err(RejectReason::NegativeAmount);
    }
    if event.currency.len() != 3 || !event.currency.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(RejectReason::BadCurrency(event.currency.clone()));
    }
    if let Some(rate) = event.metadata.exchange_rate {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(RejectReason::BadExchangeRate);
        }
    }
    Ok(())
}
