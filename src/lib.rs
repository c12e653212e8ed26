//! ledgerstream: real-time anomaly scoring, pattern detection, and cash
//! position tracking over a stream of financial-movement records.

pub mod buffer;
pub mod config;
pub mod engine;
pub mod event;
pub mod ingest;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod publish;
pub mod rules;
pub mod scorer;
pub mod stats;
pub mod window;

pub use config::Config;
pub use engine::{IngestOutcome, StreamEngine};
pub use event::{Direction, EventKind, EventMeta, FinancialEvent};
pub use ledger::CashPosition;
pub use metrics::RealtimeMetrics;
pub use publish::Outbound;
pub use scorer::{AnomalyRecord, Scorer, Severity, ZScoreScorer};
