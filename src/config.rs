//! Engine configuration. Every tunable is an env var with a default;
//! thresholds are deployment parameters, not business law.

use serde_json::json;
use sha2::{Digest, Sha256};

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Event buffer capacity; oldest-eviction beyond this.
    pub buffer_capacity: usize,
    /// Window processor tick interval (time-based triggering).
    pub window_tick_secs: u64,
    /// How many recent amounts feed the score context.
    pub score_context_len: usize,
    /// Scorer latency budget per event; over-budget falls back.
    pub scorer_budget_ms: u64,
    pub severity_medium: f64,
    pub severity_high: f64,
    pub severity_critical: f64,
    /// rapid_transactions: count threshold inside the sub-window.
    pub rapid_count: usize,
    pub rapid_window_ms: u64,
    pub large_adjustment_threshold: f64,
    /// currency_fluctuation: relative jump between consecutive rates.
    pub fx_jump_pct: f64,
    /// Retained anomaly records for the query API.
    pub anomaly_history: usize,
    pub publish_channel_capacity: usize,
    pub publish_retries: u32,
    pub publish_backoff_ms: u64,
    /// 0 = one worker per CPU.
    pub ingest_workers: usize,
    /// Rolling latency sample size for average_latency_ms.
    pub latency_window: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            buffer_capacity: env_usize("BUFFER_CAPACITY", 1000),
            window_tick_secs: env_u64("WINDOW_TICK_SECS", 5),
            score_context_len: env_usize("SCORE_CONTEXT_LEN", 50),
            scorer_budget_ms: env_u64("SCORER_BUDGET_MS", 10),
            severity_medium: env_f64("SEVERITY_MEDIUM", 0.5),
            severity_high: env_f64("SEVERITY_HIGH", 0.8),
            severity_critical: env_f64("SEVERITY_CRITICAL", 0.95),
            rapid_count: env_usize("RAPID_COUNT", 3),
            rapid_window_ms: env_u64("RAPID_WINDOW_MS", 1000),
            large_adjustment_threshold: env_f64("LARGE_ADJUSTMENT_TH", 1_000_000.0),
            fx_jump_pct: env_f64("FX_JUMP_PCT", 0.05),
            anomaly_history: env_usize("ANOMALY_HISTORY", 100),
            publish_channel_capacity: env_usize("PUBLISH_CHANNEL_CAP", 256),
            publish_retries: env_u64("PUBLISH_RETRIES", 3) as u32,
            publish_backoff_ms: env_u64("PUBLISH_BACKOFF_MS", 50),
            ingest_workers: env_usize("INGEST_WORKERS", 0),
            latency_window: env_usize("LATENCY_WINDOW", 256),
        }
    }

    pub fn severity_thresholds(&self) -> SeverityThresholds {
        SeverityThresholds {
            medium: self.severity_medium,
            high: self.severity_high,
            critical: self.severity_critical,
        }
    }

    pub fn rule_config(&self) -> RuleConfig {
        RuleConfig {
            rapid_count: self.rapid_count,
            rapid_window_ms: self.rapid_window_ms,
            large_adjustment_threshold: self.large_adjustment_threshold,
            fx_jump_pct: self.fx_jump_pct,
        }
    }

    pub fn to_json(&self) -> String {
        json!({
            "buffer_capacity": self.buffer_capacity,
            "window_tick_secs": self.window_tick_secs,
            "score_context_len": self.score_context_len,
            "scorer_budget_ms": self.scorer_budget_ms,
            "severity_medium": self.severity_medium,
            "severity_high": self.severity_high,
            "severity_critical": self.severity_critical,
            "rapid_count": self.rapid_count,
            "rapid_window_ms": self.rapid_window_ms,
            "large_adjustment_threshold": self.large_adjustment_threshold,
            "fx_jump_pct": self.fx_jump_pct,
            "anomaly_history": self.anomaly_history,
            "publish_channel_capacity": self.publish_channel_capacity,
            "publish_retries": self.publish_retries,
            "publish_backoff_ms": self.publish_backoff_ms,
            "ingest_workers": self.ingest_workers,
            "latency_window": self.latency_window,
        })
        .to_string()
    }

    /// Deterministic hash of the configuration, for run manifests.
    pub fn config_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_json().as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Severity bucket boundaries for anomaly scores.
#[derive(Debug, Clone, Copy)]
pub struct SeverityThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

/// Thresholds for the pattern rule engine.
#[derive(Debug, Clone, Copy)]
pub struct RuleConfig {
    pub rapid_count: usize,
    pub rapid_window_ms: u64,
    pub large_adjustment_threshold: f64,
    pub fx_jump_pct: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_sane() {
        let cfg = Config::from_env();
        assert!(cfg.buffer_capacity >= 1);
        assert!(cfg.severity_medium < cfg.severity_high);
        assert!(cfg.severity_high < cfg.severity_critical);
        assert!(cfg.rapid_count >= 2);
    }

    #[test]
    fn test_config_hash_deterministic() {
        let cfg = Config::from_env();
        assert_eq!(cfg.config_hash(), cfg.config_hash());
        assert_eq!(cfg.config_hash().len(), 64);
    }

    #[test]
    fn test_config_hash_tracks_changes() {
        let a = Config::from_env();
        let mut b = a.clone();
        b.rapid_count += 1;
        assert_ne!(a.config_hash(), b.config_hash());
    }

    #[test]
    fn test_config_json_valid() {
        let cfg = Config::from_env();
        let parsed: serde_json::Value = serde_json::from_str(&cfg.to_json()).unwrap();
        assert!(parsed["buffer_capacity"].is_number());
        assert!(parsed["severity_critical"].is_number());
    }
}
