//! Anomaly scoring boundary.
//!
//! The engine only depends on the `Scorer` trait; a pre-trained model
//! plugs in behind it. `ZScoreScorer` is both the default scorer and the
//! fallback path when a configured scorer errors, returns garbage, or
//! blows its latency budget.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::SeverityThresholds;
use crate::event::FinancialEvent;

/// Recent-context summary handed to the scorer alongside the event.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreContext {
    pub mean: f64,
    pub std: f64,
    pub count: usize,
}

impl ScoreContext {
    pub fn from_amounts(amounts: &[f64]) -> Self {
        let (mean, variance) = crate::stats::sample_stats(amounts);
        Self { mean, std: variance.sqrt(), count: amounts.len() }
    }
}

pub trait Scorer: Send + Sync {
    /// Score in [0,1]; higher is more anomalous.
    fn score(&self, event: &FinancialEvent, ctx: &ScoreContext) -> Result<f64>;

    fn name(&self) -> &'static str {
        "scorer"
    }
}

/// Heuristic scorer: saturating map of the amount's z-score against the
/// recent window, `1 - exp(-z/2)`. Degenerate context scores 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZScoreScorer;

impl Scorer for ZScoreScorer {
    fn score(&self, event: &FinancialEvent, ctx: &ScoreContext) -> Result<f64> {
        if ctx.count < 2 || ctx.std <= 0.0 {
            return Ok(0.0);
        }
        let z = (event.amount - ctx.mean).abs() / ctx.std;
        Ok((1.0 - (-z / 2.0).exp()).clamp(0.0, 1.0))
    }

    fn name(&self) -> &'static str {
        "zscore"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Bucket a score. `None` below the medium threshold: not anomalous,
    /// no record emitted. Monotone in `score` for any sane thresholds.
    pub fn from_score(score: f64, th: &SeverityThresholds) -> Option<Severity> {
        if score >= th.critical {
            Some(Severity::Critical)
        } else if score >= th.high {
            Some(Severity::High)
        } else if score >= th.medium {
            Some(Severity::Medium)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRecord {
    pub event: FinancialEvent,
    pub score: f64,
    pub severity: Severity,
    pub detected_ts_ms: u64,
}

/// Bounded most-recent history of anomalies, oldest-evicted.
#[derive(Debug)]
pub struct AnomalyHistory {
    capacity: usize,
    records: std::collections::VecDeque<AnomalyRecord>,
}

impl AnomalyHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, records: std::collections::VecDeque::with_capacity(capacity) }
    }

    pub fn push(&mut self, record: AnomalyRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Most recent first, up to `limit`.
    pub fn recent(&self, limit: usize) -> Vec<AnomalyRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
