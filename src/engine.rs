//! Stream engine orchestration.
//!
//! Owns the only shared mutable state (buffer, ledger, metrics, anomaly
//! history) and exposes the per-event ingestion path plus the
//! synchronous query API. Everything else in the crate is a pure
//! function over inputs.
//!
//! Per-event flow: validate → buffer append → score → (anomaly record +
//! publish) → ledger apply → metrics → publish processed. Multiple
//! events may flow concurrently; ledger applies are serialized behind
//! one mutex so readers never see a partially-applied event.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{mpsc, watch};

use crate::buffer::EventBuffer;
use crate::config::Config;
use crate::event::{self, FinancialEvent, RejectReason};
use crate::ledger::{CashLedger, CashPosition};
use crate::logging::{json_log, log, obj, v_num, v_str, Domain, Level};
use crate::metrics::{MetricsCollector, RealtimeMetrics};
use crate::publish::{Outbound, PublishConfig, Publisher};
use crate::scorer::{
    AnomalyHistory, AnomalyRecord, ScoreContext, Scorer, Severity, ZScoreScorer,
};
use crate::window::WindowProcessor;

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Accepted { score: f64, severity: Option<Severity> },
    Rejected(RejectReason),
    /// Engine is shutting down; new events are refused.
    Draining,
}

pub struct StreamEngine {
    cfg: Config,
    buffer: Arc<Mutex<EventBuffer>>,
    ledger: Arc<Mutex<CashLedger>>,
    metrics: Arc<Mutex<MetricsCollector>>,
    anomalies: Arc<Mutex<AnomalyHistory>>,
    scorer: Arc<dyn Scorer>,
    fallback: ZScoreScorer,
    publisher: Publisher,
    window: Arc<WindowProcessor>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl StreamEngine {
    /// Build the engine with a pluggable scorer. Returns the outbound
    /// receiver; the caller decides what consumes published messages.
    pub fn new(cfg: Config, scorer: Arc<dyn Scorer>) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (publisher, outbound_rx) = Publisher::new(
            cfg.publish_channel_capacity,
            PublishConfig { retries: cfg.publish_retries, backoff_ms: cfg.publish_backoff_ms },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let buffer = Arc::new(Mutex::new(EventBuffer::new(cfg.buffer_capacity)));
        let metrics = Arc::new(Mutex::new(MetricsCollector::new(cfg.latency_window)));
        // One processor instance serves both the periodic timer and
        // direct cycle calls, so the in-flight guard spans both drivers.
        let window = Arc::new(WindowProcessor::new(
            buffer.clone(),
            metrics.clone(),
            publisher.clone(),
            cfg.rule_config(),
            cfg.window_tick_secs,
        ));
        let engine = Arc::new(Self {
            buffer,
            ledger: Arc::new(Mutex::new(CashLedger::new())),
            metrics,
            anomalies: Arc::new(Mutex::new(AnomalyHistory::new(cfg.anomaly_history))),
            scorer,
            fallback: ZScoreScorer,
            publisher,
            window,
            shutdown_tx,
            shutdown_rx,
            cfg,
        });
        json_log(
            "system",
            obj(&[
                ("event", v_str("engine_started")),
                ("config_hash", v_str(&engine.cfg.config_hash())),
            ]),
        );
        (engine, outbound_rx)
    }

    pub fn with_default_scorer(cfg: Config) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        Self::new(cfg, Arc::new(ZScoreScorer))
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Spawn the periodic window processor. The task ends when
    /// `shutdown` is called.
    pub fn spawn_window(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.window.clone().run(self.shutdown_rx.clone()))
    }

    /// Drive one window cycle directly. Used by deployments that prefer
    /// an external trigger, and by tests that need deterministic ticks.
    /// Shares the periodic processor, so a cycle already in flight makes
    /// this a no-op returning `None`.
    pub async fn window_cycle(
        self: &Arc<Self>,
    ) -> Option<(crate::window::WindowStatistics, Vec<crate::rules::RuleMatch>)> {
        self.window.run_cycle(&self.shutdown_rx).await
    }

    /// Ingest one event. Identical semantics for every entry point:
    /// broker consumers and direct callers both land here.
    pub async fn ingest(&self, event: FinancialEvent) -> Result<IngestOutcome> {
        if *self.shutdown_rx.borrow() {
            return Ok(IngestOutcome::Draining);
        }

        if let Err(reason) = event::validate(&event) {
            {
                let mut m = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
                m.record_rejected();
            }
            log(
                Level::Warn,
                Domain::Ingest,
                "rejected",
                obj(&[
                    ("event_id", v_str(&event.id)),
                    ("reason", v_str(reason.as_str())),
                ]),
            );
            return Ok(IngestOutcome::Rejected(reason));
        }

        let started = Instant::now();

        // Score context covers the events that preceded this one.
        let (context_amounts, evicted) = {
            let mut buf = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            let amounts = buf.recent_amounts(self.cfg.score_context_len);
            let evicted = buf.append(event.clone());
            (amounts, evicted)
        };
        if let Some(old) = evicted {
            log(
                Level::Debug,
                Domain::Buffer,
                "evicted",
                obj(&[("event_id", v_str(&old.id))]),
            );
        }

        let ctx = ScoreContext::from_amounts(&context_amounts);
        let score = self.score_with_fallback(&event, &ctx).await;

        let severity = Severity::from_score(score, &self.cfg.severity_thresholds());
        if let Some(severity) = severity {
            let record = AnomalyRecord {
                event: event.clone(),
                score,
                severity,
                detected_ts_ms: event::now_ms(),
            };
            {
                let mut hist = self.anomalies.lock().unwrap_or_else(|e| e.into_inner());
                hist.push(record);
            }
            log(
                Level::Info,
                Domain::Anomaly,
                "detected",
                obj(&[
                    ("event_id", v_str(&event.id)),
                    ("account", v_str(&event.account_id)),
                    ("score", v_num(score)),
                    ("severity", v_str(severity.as_str())),
                ]),
            );
            let delivered = self
                .publisher
                .publish(Outbound::AnomalyDetected { event: event.clone(), severity, score })
                .await;
            if !delivered {
                self.count_publish_failure();
            }
        }

        {
            let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
            ledger.apply(&event);
        }

        let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
        {
            let mut m = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
            m.record_processed(latency_ms);
        }

        let delivered = self
            .publisher
            .publish(Outbound::EventProcessed {
                event,
                anomaly_score: score,
                latency_ms,
            })
            .await;
        if !delivered {
            self.count_publish_failure();
        }

        Ok(IngestOutcome::Accepted { score, severity })
    }

    /// Run the configured scorer under its latency budget; any error,
    /// out-of-range result, or budget overrun falls back to the z-score
    /// heuristic. The event always proceeds. The scorer runs on the
    /// blocking pool under a hard timeout, so a hung model never stalls
    /// ingestion past the budget; the abandoned call finishes off-path.
    async fn score_with_fallback(&self, event: &FinancialEvent, ctx: &ScoreContext) -> f64 {
        let t0 = Instant::now();
        let budget = Duration::from_millis(self.cfg.scorer_budget_ms.max(1));
        let scorer = self.scorer.clone();
        let ev = event.clone();
        let cx = *ctx;
        let primary = tokio::time::timeout(
            budget,
            tokio::task::spawn_blocking(move || scorer.score(&ev, &cx)),
        )
        .await;
        let elapsed_ms = t0.elapsed().as_millis() as u64;

        let fallback_reason = match &primary {
            Err(_) => Some("budget_exceeded"),
            Ok(Err(_)) | Ok(Ok(Err(_))) => Some("scorer_error"),
            Ok(Ok(Ok(s))) if !s.is_finite() || !(0.0..=1.0).contains(s) => {
                Some("score_out_of_range")
            }
            Ok(Ok(Ok(_))) => None,
        };

        match fallback_reason {
            None => match primary {
                Ok(Ok(Ok(s))) => s,
                _ => 0.0,
            },
            Some(reason) => {
                {
                    let mut m = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
                    m.record_scorer_fallback();
                }
                log(
                    Level::Warn,
                    Domain::Anomaly,
                    "scorer_fallback",
                    obj(&[
                        ("scorer", v_str(self.scorer.name())),
                        ("reason", v_str(reason)),
                        ("elapsed_ms", v_num(elapsed_ms as f64)),
                    ]),
                );
                self.fallback.score(event, ctx).unwrap_or(0.0)
            }
        }
    }

    fn count_publish_failure(&self) {
        let mut m = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        m.record_publish_failure();
    }

    // -------------------------------------------------------------------
    // Query API: synchronous, side-effect-free.
    // -------------------------------------------------------------------

    pub fn cash_position(&self) -> CashPosition {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner()).query()
    }

    pub fn realtime_metrics(&self) -> RealtimeMetrics {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner()).query()
    }

    /// Most recent first.
    pub fn recent_anomalies(&self, limit: usize) -> Vec<AnomalyRecord> {
        self.anomalies.lock().unwrap_or_else(|e| e.into_inner()).recent(limit)
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    // -------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------

    /// Stop accepting new events and cancel the window timer. In-flight
    /// `ingest` calls complete; callers drain naturally.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        json_log("system", obj(&[("event", v_str("shutdown_requested"))]));
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, EventMeta};

    struct FailingScorer;

    impl Scorer for FailingScorer {
        fn score(&self, _event: &FinancialEvent, _ctx: &ScoreContext) -> Result<f64> {
            anyhow::bail!("model unavailable")
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    struct WildScorer;

    impl Scorer for WildScorer {
        fn score(&self, _event: &FinancialEvent, _ctx: &ScoreContext) -> Result<f64> {
            Ok(7.5)
        }
    }

    struct HungScorer;

    impl Scorer for HungScorer {
        fn score(&self, _event: &FinancialEvent, _ctx: &ScoreContext) -> Result<f64> {
            std::thread::sleep(std::time::Duration::from_millis(300));
            Ok(0.1)
        }

        fn name(&self) -> &'static str {
            "hung"
        }
    }

    fn event(id: &str, amount: f64) -> FinancialEvent {
        FinancialEvent {
            id: id.to_string(),
            ts_ms: event::now_ms(),
            kind: EventKind::Payment,
            source: "test".to_string(),
            amount,
            currency: "BDT".to_string(),
            account_id: "acct".to_string(),
            metadata: EventMeta::credit(),
        }
    }

    #[tokio::test]
    async fn test_ingest_accepts_and_applies() {
        let (engine, _rx) = StreamEngine::with_default_scorer(Config::from_env());
        let outcome = engine.ingest(event("e1", 100.0)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Accepted { .. }));
        assert_eq!(engine.buffer_len(), 1);
        assert_eq!(engine.cash_position().by_account["acct"], 100.0);
        assert_eq!(engine.realtime_metrics().events_processed, 1);
    }

    #[tokio::test]
    async fn test_malformed_event_rejected_and_counted() {
        let (engine, _rx) = StreamEngine::with_default_scorer(Config::from_env());
        let outcome = engine.ingest(event("e1", -5.0)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Rejected(RejectReason::NegativeAmount));
        assert_eq!(engine.buffer_len(), 0);
        let m = engine.realtime_metrics();
        assert_eq!(m.events_processed, 0);
        assert_eq!(m.events_rejected, 1);
    }

    #[tokio::test]
    async fn test_failing_scorer_falls_back_and_event_proceeds() {
        let (engine, _rx) = StreamEngine::new(Config::from_env(), Arc::new(FailingScorer));
        let outcome = engine.ingest(event("e1", 100.0)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Accepted { .. }));
        let m = engine.realtime_metrics();
        assert_eq!(m.scorer_fallbacks, 1);
        assert_eq!(m.events_processed, 1);
        assert_eq!(engine.cash_position().total_cash, 100.0);
    }

    #[tokio::test]
    async fn test_out_of_range_score_falls_back() {
        let (engine, _rx) = StreamEngine::new(Config::from_env(), Arc::new(WildScorer));
        let outcome = engine.ingest(event("e1", 100.0)).await.unwrap();
        match outcome {
            IngestOutcome::Accepted { score, .. } => {
                assert!((0.0..=1.0).contains(&score));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(engine.realtime_metrics().scorer_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_hung_scorer_falls_back_at_budget_not_after() {
        let mut cfg = Config::from_env();
        cfg.scorer_budget_ms = 10;
        let (engine, _rx) = StreamEngine::new(cfg, Arc::new(HungScorer));
        let started = std::time::Instant::now();
        let outcome = engine.ingest(event("e1", 100.0)).await.unwrap();
        // The 300 ms scorer must not stall ingestion past its 10 ms budget.
        assert!(
            started.elapsed().as_millis() < 150,
            "ingest stalled {} ms",
            started.elapsed().as_millis()
        );
        assert!(matches!(outcome, IngestOutcome::Accepted { .. }));
        let m = engine.realtime_metrics();
        assert_eq!(m.scorer_fallbacks, 1);
        assert_eq!(m.events_processed, 1);
    }

    #[tokio::test]
    async fn test_direct_cycle_skipped_while_periodic_cycle_in_flight() {
        let mut cfg = Config::from_env();
        cfg.publish_channel_capacity = 1;
        cfg.publish_retries = 4;
        cfg.publish_backoff_ms = 25;
        let (engine, _rx) = StreamEngine::with_default_scorer(cfg);
        // Fills the only channel slot; nobody drains it.
        engine.ingest(event("e1", 10.0)).await.unwrap();

        // First cycle sits in its publish backoff with the guard held.
        let busy = engine.clone();
        let first = tokio::spawn(async move { busy.window_cycle().await });
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(engine.window_cycle().await.is_none(), "overlapping cycle must be dropped");
        assert!(first.await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_events() {
        let (engine, _rx) = StreamEngine::with_default_scorer(Config::from_env());
        engine.ingest(event("e1", 10.0)).await.unwrap();
        engine.shutdown();
        let outcome = engine.ingest(event("e2", 10.0)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Draining);
        assert_eq!(engine.realtime_metrics().events_processed, 1);
    }

    #[tokio::test]
    async fn test_recent_anomalies_most_recent_first() {
        let mut cfg = Config::from_env();
        cfg.score_context_len = 50;
        let (engine, mut rx) = StreamEngine::with_default_scorer(cfg);
        // Build a stable baseline, then two escalating outliers.
        for i in 0..30 {
            engine.ingest(event(&format!("base-{}", i), 1_000.0 + (i % 5) as f64)).await.unwrap();
        }
        engine.ingest(event("spike-1", 500_000.0)).await.unwrap();
        engine.ingest(event("spike-2", 900_000.0)).await.unwrap();

        let anomalies = engine.recent_anomalies(10);
        assert!(anomalies.len() >= 2, "expected anomalies, got {}", anomalies.len());
        assert_eq!(anomalies[0].event.id, "spike-2");
        assert!(anomalies.iter().all(|a| (0.0..=1.0).contains(&a.score)));

        // Drain so the bounded channel never interfered with ingestion.
        let mut saw_anomaly = false;
        while let Ok(msg) = rx.try_recv() {
            if msg.channel() == "anomaly.detected" {
                saw_anomaly = true;
            }
        }
        assert!(saw_anomaly);
    }
}
