//! Fire-and-forget outbound dispatch.
//!
//! Listeners are explicit typed channels, not a global registry: every
//! outbound message is one `Outbound` variant carrying its logical
//! channel name and payload. Dispatch never blocks the ingestion or
//! windowing path; a full channel gets a bounded retry with backoff and
//! is then dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::event::FinancialEvent;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::rules::RuleMatch;
use crate::scorer::Severity;
use crate::window::WindowStatistics;

#[derive(Debug, Clone)]
pub enum Outbound {
    /// `streaming.event.processed` — every accepted event.
    EventProcessed { event: FinancialEvent, anomaly_score: f64, latency_ms: f64 },
    /// `anomaly.detected` — events at or above the medium threshold.
    AnomalyDetected { event: FinancialEvent, severity: Severity, score: f64 },
    /// `pattern.<rule_name>` — one per firing rule per tick.
    PatternMatch(RuleMatch),
    /// `streaming.window.processed` — one per tick.
    WindowProcessed(WindowStatistics),
}

impl Outbound {
    pub fn channel(&self) -> String {
        match self {
            Outbound::EventProcessed { .. } => "streaming.event.processed".to_string(),
            Outbound::AnomalyDetected { .. } => "anomaly.detected".to_string(),
            Outbound::PatternMatch(m) => m.rule.channel(),
            Outbound::WindowProcessed(_) => "streaming.window.processed".to_string(),
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Outbound::EventProcessed { event, anomaly_score, latency_ms } => json!({
                "event": event,
                "anomaly_score": anomaly_score,
                "latency_ms": latency_ms,
            }),
            Outbound::AnomalyDetected { event, severity, score } => json!({
                "type": "detected",
                "severity": severity.as_str(),
                "event": event,
                "score": score,
            }),
            Outbound::PatternMatch(m) => json!(m.events),
            Outbound::WindowProcessed(stats) => json!({
                "ts_ms": stats.ts_ms,
                "event_count": stats.count,
                "total_amount": stats.total_amount,
                "avg_amount": stats.avg_amount,
                "variance": stats.variance,
                "throughput": stats.throughput,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PublishConfig {
    pub retries: u32,
    pub backoff_ms: u64,
}

/// Clonable dispatch handle over one bounded mpsc channel. The consumer
/// end is whoever built the engine (broker bridge, logger, tests).
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::Sender<Outbound>,
    cfg: PublishConfig,
    dropped: Arc<AtomicU64>,
}

impl Publisher {
    pub fn new(capacity: usize, cfg: PublishConfig) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, cfg, dropped: Arc::new(AtomicU64::new(0)) }, rx)
    }

    /// Dispatch one message. Returns false when the message was dropped
    /// after exhausting retries, or immediately when the consumer is
    /// gone (retrying a closed channel can never succeed). Every drop
    /// is logged and counted.
    pub async fn publish(&self, msg: Outbound) -> bool {
        let channel = msg.channel();
        let mut attempt = 0;
        let mut backoff = self.cfg.backoff_ms;
        let mut msg = msg;
        loop {
            match self.tx.try_send(msg) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.note_drop(&channel, "consumer_gone", attempt);
                    return false;
                }
                Err(mpsc::error::TrySendError::Full(back)) => {
                    if attempt >= self.cfg.retries {
                        self.note_drop(&channel, "channel_full", attempt);
                        return false;
                    }
                    attempt += 1;
                    tokio::time::sleep(tokio::time::Duration::from_millis(backoff)).await;
                    backoff = backoff.saturating_mul(2);
                    msg = back;
                }
            }
        }
    }

    fn note_drop(&self, channel: &str, reason: &str, attempts: u32) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        log(
            Level::Warn,
            Domain::Publish,
            "dropped",
            obj(&[
                ("channel", v_str(channel)),
                ("reason", v_str(reason)),
                ("attempts", v_num(attempts as f64)),
            ]),
        );
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
