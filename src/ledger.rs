//! Cash position aggregator: per-account and per-currency running
//! totals plus liquidity bookkeeping.
//!
//! `apply` is the sole mutator; the engine serializes applies behind a
//! mutex so queries never observe a partially-applied event. Positions
//! are cumulative and event-sourced: buffer eviction never unwinds them.

use std::collections::HashMap;

use serde::Serialize;

use crate::event::FinancialEvent;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

/// Query snapshot of the ledger. `total_cash` sums signed amounts across
/// all accounts and is display-only; liquidity math never mixes
/// currencies beyond what the inbound amounts themselves carry.
#[derive(Debug, Clone, Serialize)]
pub struct CashPosition {
    pub total_cash: f64,
    pub by_account: HashMap<String, f64>,
    pub by_currency: HashMap<String, f64>,
    /// `None` when there are no outstanding liabilities: no shortfall risk.
    pub liquidity_ratio: Option<f64>,
    pub projected_shortfall: f64,
}

#[derive(Debug, Default)]
pub struct CashLedger {
    by_account: HashMap<String, f64>,
    by_currency: HashMap<String, f64>,
    total_cash: f64,
    // Liquidity bookkeeping. Liability-flagged credits count toward
    // liabilities and are excluded from liquid cash; they still land in
    // by_account/by_currency like any other credit.
    liquid_cash: f64,
    total_liabilities: f64,
    applied: u64,
}

impl CashLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one validated event. Credit adds the amount to the account
    /// and currency buckets, debit subtracts.
    pub fn apply(&mut self, event: &FinancialEvent) {
        let signed = event.signed_amount();
        *self.by_account.entry(event.account_id.clone()).or_insert(0.0) += signed;
        *self.by_currency.entry(event.currency.clone()).or_insert(0.0) += signed;
        self.total_cash += signed;

        if event.is_liability_credit() {
            self.total_liabilities += event.amount;
        } else {
            self.liquid_cash += signed;
        }
        self.applied += 1;

        // Cross-check the running total against the per-account sum. A
        // divergence is logged at ERROR and the total is resynchronized
        // from the account buckets, which stay authoritative.
        let expected: f64 = self.by_account.values().sum();
        if (self.total_cash - expected).abs() > 1e-6 * expected.abs().max(1.0) {
            log(
                Level::Error,
                Domain::Ledger,
                "aggregate_divergence",
                obj(&[
                    ("event_id", v_str(&event.id)),
                    ("total_cash", v_num(self.total_cash)),
                    ("by_account_sum", v_num(expected)),
                ]),
            );
            self.total_cash = expected;
        }
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }

    fn liquidity_ratio(&self) -> Option<f64> {
        if self.total_liabilities > 0.0 {
            Some(self.liquid_cash / self.total_liabilities)
        } else {
            None
        }
    }

    pub fn query(&self) -> CashPosition {
        let liquidity_ratio = self.liquidity_ratio();
        let projected_shortfall = match liquidity_ratio {
            Some(r) if r < 1.0 => (self.total_liabilities - self.liquid_cash).max(0.0),
            _ => 0.0,
        };
        CashPosition {
            total_cash: self.total_cash,
            by_account: self.by_account.clone(),
            by_currency: self.by_currency.clone(),
            liquidity_ratio,
            projected_shortfall,
        }
    }
}
