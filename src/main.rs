use std::sync::Arc;

use anyhow::Result;
use ledgerstream::engine::StreamEngine;
use ledgerstream::event::{self, Direction, EventKind, EventMeta, FinancialEvent};
use ledgerstream::ingest::{run_ingest, ChannelSource, ReplaySource};
use ledgerstream::logging::{json_log, log, obj, v_num, v_str, Domain, Level};
use ledgerstream::Config;
use rand::Rng;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    json_log(
        "system",
        obj(&[
            ("event", v_str("startup")),
            ("config_hash", v_str(&cfg.config_hash())),
            ("config", serde_json::from_str(&cfg.to_json())?),
        ]),
    );

    let (engine, mut outbound) = StreamEngine::with_default_scorer(cfg.clone());
    let window_task = engine.spawn_window();

    // Drain every published message into the structured log. A broker
    // bridge would sit here in a deployed system.
    let consumer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            json_log(
                "publish",
                obj(&[
                    ("channel", v_str(&msg.channel())),
                    ("payload", msg.payload()),
                ]),
            );
        }
    });

    // Source selection: replay a JSONL file when INPUT_PATH is set,
    // otherwise run the synthetic generator.
    let ingest_task = match std::env::var("INPUT_PATH").ok() {
        Some(path) => {
            let events = load_events(&path)?;
            json_log(
                "ingest",
                obj(&[
                    ("event", v_str("replay_source")),
                    ("path", v_str(&path)),
                    ("events", v_num(events.len() as f64)),
                ]),
            );
            let engine = engine.clone();
            tokio::spawn(async move {
                run_ingest(engine, ReplaySource::new(events)).await;
            })
        }
        None => {
            json_log("ingest", obj(&[("event", v_str("synthetic_source"))]));
            let (tx, rx) = mpsc::channel(256);
            let mut shutdown = engine.shutdown_signal();
            tokio::spawn(async move {
                let mut seq: u64 = 0;
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    let event = synthetic_event(&mut seq);
                    if tx.send(event).await.is_err() {
                        break;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(tokio::time::Duration::from_millis(20)) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            });
            let engine = engine.clone();
            tokio::spawn(async move {
                run_ingest(engine, ChannelSource::new(rx)).await;
            })
        }
    };

    tokio::signal::ctrl_c().await?;
    engine.shutdown();
    let _ = ingest_task.await;
    let _ = window_task.await;

    let metrics = engine.realtime_metrics();
    let position = engine.cash_position();
    log(
        Level::Info,
        Domain::Metrics,
        "session_summary",
        obj(&[
            ("events_processed", v_num(metrics.events_processed as f64)),
            ("events_rejected", v_num(metrics.events_rejected as f64)),
            ("avg_latency_ms", v_num(metrics.average_latency_ms)),
            ("accounts", v_num(position.by_account.len() as f64)),
            ("total_cash", v_num(position.total_cash)),
            ("anomalies", v_num(engine.recent_anomalies(usize::MAX).len() as f64)),
        ]),
    );
    consumer.abort();
    Ok(())
}

fn load_events(path: &str) -> Result<Vec<FinancialEvent>> {
    let raw = std::fs::read_to_string(path)?;
    let mut events = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<FinancialEvent>(trimmed) {
            Ok(event) => events.push(event),
            Err(err) => json_log(
                "ingest",
                obj(&[("event", v_str("bad_line")), ("error", v_str(&err.to_string()))]),
            ),
        }
    }
    Ok(events)
}

/// Multi-account synthetic traffic: mostly routine payments with the
/// occasional outsized adjustment, liability credit, or fx-rated event.
fn synthetic_event(seq: &mut u64) -> FinancialEvent {
    let mut rng = rand::thread_rng();
    *seq += 1;
    let account = format!("acct-{}", rng.gen_range(0..8));
    let roll: f64 = rng.gen();
    let (kind, amount, is_liability, exchange_rate) = if roll < 0.02 {
        (EventKind::Adjustment, rng.gen_range(1_000_000.0..5_000_000.0), None, None)
    } else if roll < 0.05 {
        (EventKind::Payment, rng.gen_range(50_000.0..500_000.0), Some(true), None)
    } else if roll < 0.15 {
        let rate = 110.0 * rng.gen_range(0.9..1.1);
        (EventKind::Transaction, rng.gen_range(5_000.0..20_000.0), None, Some(rate))
    } else {
        (EventKind::Payment, rng.gen_range(5_000.0..20_000.0), None, None)
    };
    let direction = if rng.gen_bool(0.6) { Direction::Credit } else { Direction::Debit };
    FinancialEvent {
        id: format!("gen-{}", seq),
        ts_ms: event::now_ms(),
        kind,
        source: "synthetic".to_string(),
        amount,
        currency: "BDT".to_string(),
        account_id: account,
        metadata: EventMeta { direction, is_liability, exchange_rate },
    }
}
