//! Pattern rule engine: independent predicates over a window snapshot.
//!
//! Every rule runs on every tick against the same snapshot; rules are
//! order-insensitive and one firing never suppresses another. All
//! thresholds ride in `RuleConfig`.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::RuleConfig;
use crate::event::{EventKind, FinancialEvent};
use crate::scorer::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleName {
    RapidTransactions,
    DuplicateTransactions,
    LargeAdjustment,
    CurrencyFluctuation,
}

impl RuleName {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleName::RapidTransactions => "rapid_transactions",
            RuleName::DuplicateTransactions => "duplicate_transactions",
            RuleName::LargeAdjustment => "large_adjustment",
            RuleName::CurrencyFluctuation => "currency_fluctuation",
        }
    }

    /// Outbound channel name for this rule.
    pub fn channel(&self) -> String {
        format!("pattern.{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleMatch {
    pub rule: RuleName,
    pub severity: Severity,
    pub events: Vec<FinancialEvent>,
}

/// Evaluate every rule against `window` (oldest-first snapshot).
/// Deterministic for a fixed window: no clock reads, only event
/// timestamps.
pub fn evaluate(window: &[FinancialEvent], cfg: &RuleConfig) -> Vec<RuleMatch> {
    let mut out = Vec::new();

    if let Some(m) = rapid_transactions(window, cfg) {
        out.push(m);
    }
    out.extend(duplicate_transactions(window));
    if let Some(m) = large_adjustment(window, cfg) {
        out.push(m);
    }
    if let Some(m) = currency_fluctuation(window, cfg) {
        out.push(m);
    }

    out
}

/// N or more events from one account inside a short sub-window. Returns
/// the densest qualifying run per offending account.
fn rapid_transactions(window: &[FinancialEvent], cfg: &RuleConfig) -> Option<RuleMatch> {
    let mut by_account: HashMap<&str, Vec<&FinancialEvent>> = HashMap::new();
    for e in window {
        by_account.entry(e.account_id.as_str()).or_default().push(e);
    }

    let mut matched: Vec<FinancialEvent> = Vec::new();
    for events in by_account.values() {
        // Snapshot is insertion-ordered; sort by event time to be robust
        // against out-of-order arrival.
        let mut sorted: Vec<&FinancialEvent> = events.clone();
        sorted.sort_by_key(|e| e.ts_ms);
        let mut best: Option<(usize, usize)> = None;
        let mut lo = 0;
        for hi in 0..sorted.len() {
            while sorted[hi].ts_ms.saturating_sub(sorted[lo].ts_ms) > cfg.rapid_window_ms {
                lo += 1;
            }
            let len = hi - lo + 1;
            if len >= cfg.rapid_count && best.map_or(true, |(a, b)| len > b - a + 1) {
                best = Some((lo, hi));
            }
        }
        if let Some((a, b)) = best {
            matched.extend(sorted[a..=b].iter().map(|e| (*e).clone()));
        }
    }

    if matched.is_empty() {
        return None;
    }
    matched.sort_by(|a, b| (a.ts_ms, &a.id).cmp(&(b.ts_ms, &b.id)));
    Some(RuleMatch { rule: RuleName::RapidTransactions, severity: Severity::High, events: matched })
}

/// Two or more events with identical (account, amount, currency) are
/// treated as likely duplicates regardless of distinct ids.
fn duplicate_transactions(window: &[FinancialEvent]) -> Option<RuleMatch> {
    let mut groups: HashMap<(&str, u64, &str), Vec<&FinancialEvent>> = HashMap::new();
    for e in window {
        groups
            .entry((e.account_id.as_str(), e.amount.to_bits(), e.currency.as_str()))
            .or_default()
            .push(e);
    }
    let mut matched: Vec<FinancialEvent> = Vec::new();
    for events in groups.values() {
        if events.len() >= 2 {
            matched.extend(events.iter().map(|e| (*e).clone()));
        }
    }
    if matched.is_empty() {
        return None;
    }
    matched.sort_by(|a, b| (a.ts_ms, &a.id).cmp(&(b.ts_ms, &b.id)));
    Some(RuleMatch {
        rule: RuleName::DuplicateTransactions,
        severity: Severity::Medium,
        events: matched,
    })
}

fn large_adjustment(window: &[FinancialEvent], cfg: &RuleConfig) -> Option<RuleMatch> {
    let matched: Vec<FinancialEvent> = window
        .iter()
        .filter(|e| e.kind == EventKind::Adjustment && e.amount > cfg.large_adjustment_threshold)
        .cloned()
        .collect();
    if matched.is_empty() {
        return None;
    }
    Some(RuleMatch { rule: RuleName::LargeAdjustment, severity: Severity::High, events: matched })
}

/// Consecutive same-currency exchange rates jumping by more than the
/// configured relative threshold. Both sides of each jump are reported,
/// deduplicated by id.
fn currency_fluctuation(window: &[FinancialEvent], cfg: &RuleConfig) -> Option<RuleMatch> {
    let mut rated: HashMap<&str, Vec<&FinancialEvent>> = HashMap::new();
    for e in window {
        if e.metadata.exchange_rate.is_some() {
            rated.entry(e.currency.as_str()).or_default().push(e);
        }
    }

    let mut matched: Vec<FinancialEvent> = Vec::new();
    let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for events in rated.values() {
        let mut sorted: Vec<&FinancialEvent> = events.clone();
        sorted.sort_by_key(|e| e.ts_ms);
        for pair in sorted.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            let (r0, r1) = match (prev.metadata.exchange_rate, next.metadata.exchange_rate) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };
            if (r1 - r0).abs() / r0 > cfg.fx_jump_pct {
                for e in [prev, next] {
                    if seen.insert(e.id.as_str()) {
                        matched.push((*e).clone());
                    }
                }
            }
        }
    }

    if matched.is_empty() {
        return None;
    }
    matched.sort_by(|a, b| (a.ts_ms, &a.id).cmp(&(b.ts_ms, &b.id)));
    Some(RuleMatch {
        rule: RuleName::CurrencyFluctuation,
        severity: Severity::Medium,
        events: matched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Direction, EventMeta};

    fn cfg() -> RuleConfig {
        RuleConfig {
            rapid_count: 3,
            rapid_window_ms: 1000,
            large_adjustment_threshold: 1_000_000.0,
            fx_jump_pct: 0.05,
        }
    }

    fn event(id: &str, ts_ms: u64, account: &str, amount: f64) -> FinancialEvent {
        FinancialEvent {
            id: id.to_string(),
            ts_ms,
            kind: EventKind::Transaction,
            source: "test".to_string(),
            amount,
            currency: "BDT".to_string(),
            account_id: account.to_string(),
            metadata: EventMeta { direction: Direction::Debit, is_liability: None, exchange_rate: None },
        }
    }

    fn matches_for(out: &[RuleMatch], rule: RuleName) -> Option<&RuleMatch> {
        out.iter().find(|m| m.rule == rule)
    }

    #[test]
    fn test_rapid_fires_on_burst_within_subwindow() {
        let window = vec![
            event("a", 0, "acct", 5_000.0),
            event("b", 300, "acct", 5_001.0),
            event("c", 900, "acct", 5_002.0),
            event("d", 10_000, "other", 7.0),
        ];
        let out = evaluate(&window, &cfg());
        let m = matches_for(&out, RuleName::RapidTransactions).expect("rapid should fire");
        let ids: Vec<&str> = m.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rapid_silent_when_spread_out() {
        let window = vec![
            event("a", 0, "acct", 1.0),
            event("b", 2_000, "acct", 2.0),
            event("c", 4_000, "acct", 3.0),
        ];
        let out = evaluate(&window, &cfg());
        assert!(matches_for(&out, RuleName::RapidTransactions).is_none());
    }

    #[test]
    fn test_duplicates_ignore_distinct_ids() {
        let window = vec![
            event("a", 0, "acct", 99.0),
            event("b", 500, "acct", 99.0),
            event("c", 600, "acct", 98.0),
        ];
        let out = evaluate(&window, &cfg());
        let m = matches_for(&out, RuleName::DuplicateTransactions).expect("dup should fire");
        assert_eq!(m.events.len(), 2);
        assert!(m.events.iter().all(|e| e.amount == 99.0));
    }

    #[test]
    fn test_large_adjustment_only_for_adjustment_kind() {
        let mut big_txn = event("a", 0, "acct", 5_000_000.0);
        big_txn.kind = EventKind::Transaction;
        let mut big_adj = event("b", 1, "acct", 5_000_000.0);
        big_adj.kind = EventKind::Adjustment;
        let out = evaluate(&[big_txn, big_adj], &cfg());
        let m = matches_for(&out, RuleName::LargeAdjustment).expect("adjustment should fire");
        assert_eq!(m.events.len(), 1);
        assert_eq!(m.events[0].id, "b");
    }

    #[test]
    fn test_currency_fluctuation_on_rate_jump() {
        let mut a = event("a", 0, "x", 10.0);
        a.metadata.exchange_rate = Some(110.0);
        let mut b = event("b", 100, "y", 10.0);
        b.metadata.exchange_rate = Some(118.0); // +7.3%
        let out = evaluate(&[a, b], &cfg());
        let m = matches_for(&out, RuleName::CurrencyFluctuation).expect("fx should fire");
        assert_eq!(m.events.len(), 2);
    }

    #[test]
    fn test_currency_fluctuation_needs_same_currency() {
        let mut a = event("a", 0, "x", 10.0);
        a.metadata.exchange_rate = Some(110.0);
        let mut b = event("b", 100, "y", 10.0);
        b.currency = "USD".to_string();
        b.metadata.exchange_rate = Some(150.0);
        let out = evaluate(&[a, b], &cfg());
        assert!(matches_for(&out, RuleName::CurrencyFluctuation).is_none());
    }

    #[test]
    fn test_rules_independent_same_tick() {
        // One window trips rapid, duplicates, and large_adjustment at once.
        let mut window = vec![
            event("a", 0, "acct", 42.0),
            event("b", 100, "acct", 42.0),
            event("c", 200, "acct", 42.0),
        ];
        let mut adj = event("d", 300, "acct2", 2_000_000.0);
        adj.kind = EventKind::Adjustment;
        window.push(adj);
        let out = evaluate(&window, &cfg());
        assert!(matches_for(&out, RuleName::RapidTransactions).is_some());
        assert!(matches_for(&out, RuleName::DuplicateTransactions).is_some());
        assert!(matches_for(&out, RuleName::LargeAdjustment).is_some());
    }

    #[test]
    fn test_evaluate_deterministic() {
        let window = vec![
            event("a", 0, "acct", 42.0),
            event("b", 100, "acct", 42.0),
            event("c", 200, "acct", 42.0),
        ];
        let c = cfg();
        let r1 = evaluate(&window, &c);
        let r2 = evaluate(&window, &c);
        assert_eq!(r1.len(), r2.len());
        for (m1, m2) in r1.iter().zip(r2.iter()) {
            assert_eq!(m1.rule, m2.rule);
            let ids1: Vec<&str> = m1.events.iter().map(|e| e.id.as_str()).collect();
            let ids2: Vec<&str> = m2.events.iter().map(|e| e.id.as_str()).collect();
            assert_eq!(ids1, ids2);
        }
    }

    #[test]
    fn test_empty_window_matches_nothing() {
        assert!(evaluate(&[], &cfg()).is_empty());
    }
}
