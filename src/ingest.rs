//! Inbound boundary: event sources feeding the engine.
//!
//! The broker client itself is an external collaborator; it lands here
//! as a `ChannelSource` wrapping the channel that client writes into.
//! `ReplaySource` is the in-memory direct-call fallback with identical
//! semantics — both funnel into `StreamEngine::ingest`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::engine::{IngestOutcome, StreamEngine};
use crate::event::FinancialEvent;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

#[async_trait]
pub trait EventSource: Send {
    /// Next inbound event; `None` when the source is exhausted or the
    /// upstream producer went away.
    async fn next_event(&mut self) -> Option<FinancialEvent>;
}

/// Broker-fed source: the external consumer pushes into the channel.
pub struct ChannelSource {
    rx: mpsc::Receiver<FinancialEvent>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<FinancialEvent>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn next_event(&mut self) -> Option<FinancialEvent> {
        self.rx.recv().await
    }
}

/// In-memory replay source: the direct-call fallback mode.
pub struct ReplaySource {
    events: std::vec::IntoIter<FinancialEvent>,
}

impl ReplaySource {
    pub fn new(events: Vec<FinancialEvent>) -> Self {
        Self { events: events.into_iter() }
    }
}

#[async_trait]
impl EventSource for ReplaySource {
    async fn next_event(&mut self) -> Option<FinancialEvent> {
        self.events.next()
    }
}

/// Statistics for one drained source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: u64,
    pub rejected: u64,
    pub drained: u64,
}

/// Drain a source into the engine until it ends or shutdown flips.
pub async fn run_ingest<S: EventSource>(engine: Arc<StreamEngine>, mut source: S) -> IngestStats {
    let mut stats = IngestStats::default();
    while let Some(event) = source.next_event().await {
        match engine.ingest(event).await {
            Ok(IngestOutcome::Accepted { .. }) => stats.accepted += 1,
            Ok(IngestOutcome::Rejected(_)) => stats.rejected += 1,
            Ok(IngestOutcome::Draining) => {
                stats.drained += 1;
                break;
            }
            Err(err) => {
                log(
                    Level::Warn,
                    Domain::Ingest,
                    "error",
                    obj(&[("error", v_str(&err.to_string()))]),
                );
            }
        }
    }
    log(
        Level::Info,
        Domain::Ingest,
        "source_drained",
        obj(&[
            ("accepted", v_num(stats.accepted as f64)),
            ("rejected", v_num(stats.rejected as f64)),
        ]),
    );
    stats
}

/// Fan one shared inbound channel out to `workers` concurrent ingest
/// tasks. `workers == 0` sizes by CPU count. Per-event processing is the
/// unit of concurrency; ledger serialization happens inside the engine.
pub fn spawn_workers(
    engine: Arc<StreamEngine>,
    rx: mpsc::Receiver<FinancialEvent>,
    workers: usize,
) -> Vec<tokio::task::JoinHandle<IngestStats>> {
    let workers = if workers == 0 { num_cpus::get().max(1) } else { workers };
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    (0..workers)
        .map(|_| {
            let engine = engine.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                let mut stats = IngestStats::default();
                loop {
                    let event = { rx.lock().await.recv().await };
                    let Some(event) = event else { break };
                    match engine.ingest(event).await {
                        Ok(IngestOutcome::Accepted { .. }) => stats.accepted += 1,
                        Ok(IngestOutcome::Rejected(_)) => stats.rejected += 1,
                        Ok(IngestOutcome::Draining) => {
                            stats.drained += 1;
                            break;
                        }
                        Err(_) => {}
                    }
                }
                stats
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::event::{EventKind, EventMeta};

    fn event(id: u32) -> FinancialEvent {
        FinancialEvent {
            id: format!("e-{}", id),
            ts_ms: id as u64,
            kind: EventKind::Transaction,
            source: "test".to_string(),
            amount: 10.0,
            currency: "BDT".to_string(),
            account_id: "a".to_string(),
            metadata: EventMeta::credit(),
        }
    }

    #[tokio::test]
    async fn test_replay_source_drains_in_order() {
        let (engine, _rx) = StreamEngine::with_default_scorer(Config::from_env());
        let stats =
            run_ingest(engine.clone(), ReplaySource::new((0..5).map(event).collect())).await;
        assert_eq!(stats.accepted, 5);
        assert_eq!(engine.buffer_len(), 5);
    }

    #[tokio::test]
    async fn test_channel_source_matches_direct_semantics() {
        let (engine, _rx) = StreamEngine::with_default_scorer(Config::from_env());
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(run_ingest(engine.clone(), ChannelSource::new(rx)));
        for i in 0..5 {
            tx.send(event(i)).await.unwrap();
        }
        drop(tx);
        let stats = handle.await.unwrap();
        assert_eq!(stats.accepted, 5);
        assert_eq!(engine.realtime_metrics().events_processed, 5);
    }

    #[tokio::test]
    async fn test_workers_share_one_channel() {
        let (engine, _rx) = StreamEngine::with_default_scorer(Config::from_env());
        let (tx, rx) = mpsc::channel(64);
        let handles = spawn_workers(engine.clone(), rx, 4);
        for i in 0..40 {
            tx.send(event(i)).await.unwrap();
        }
        drop(tx);
        let mut accepted = 0;
        for h in handles {
            accepted += h.await.unwrap().accepted;
        }
        assert_eq!(accepted, 40);
        assert_eq!(engine.realtime_metrics().events_processed, 40);
    }
}
