use std::collections::HashMap;
use std::sync::Arc;

use gantry_types::{CircuitCounters, CircuitState};
use tokio::sync::RwLock;

/// Per-provider failure isolation. One breaker instance guards the whole
/// provider fallback chain; each provider gets its own counters (§4.C).
pub struct CircuitBreaker {
    consecutive_failure_threshold: u32,
    cooldown_ms: u64,
    counters: RwLock<HashMap<String, CircuitCounters>>,
}

impl CircuitBreaker {
    pub fn new(consecutive_failure_threshold: u32, cooldown_ms: u64) -> Self {
        Self {
            consecutive_failure_threshold,
            cooldown_ms,
            counters: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(5, 30_000)
    }

    /// Whether a call may currently be attempted against `provider`. Moves
    /// `open -> half_open` as a side effect once the cooldown has elapsed.
    pub async fn allow(&self, provider: &str, now_ms: u64) -> bool {
        let mut counters = self.counters.write().await;
        let entry = counters
            .entry(provider.to_string())
            .or_insert_with(|| CircuitCounters {
                provider: provider.to_string(),
                ..Default::default()
            });

        match entry.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = entry.opened_at_ms.unwrap_or(now_ms);
                if now_ms.saturating_sub(opened_at) >= self.cooldown_ms {
                    entry.state = CircuitState::HalfOpen;
                    entry.half_open_at_ms = Some(now_ms);
                    tracing::warn!(provider, "circuit.state_changed half_open");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self, provider: &str) {
        let mut counters = self.counters.write().await;
        let entry = counters
            .entry(provider.to_string())
            .or_insert_with(|| CircuitCounters {
                provider: provider.to_string(),
                ..Default::default()
            });
        entry.consecutive_failures = 0;
        entry.successes_in_window += 1;
        if entry.state != CircuitState::Closed {
            tracing::warn!(provider, "circuit.state_changed closed");
        }
        entry.state = CircuitState::Closed;
        entry.opened_at_ms = None;
        entry.half_open_at_ms = None;
        entry.last_error = None;
    }

    pub async fn record_failure(&self, provider: &str, error: impl Into<String>, now_ms: u64) {
        let mut counters = self.counters.write().await;
        let entry = counters
            .entry(provider.to_string())
            .or_insert_with(|| CircuitCounters {
                provider: provider.to_string(),
                ..Default::default()
            });
        entry.consecutive_failures += 1;
        entry.failures_in_window += 1;
        entry.last_error = Some(error.into());

        match entry.state {
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.opened_at_ms = Some(now_ms);
                tracing::warn!(provider, "circuit.state_changed open (probe failed)");
            }
            CircuitState::Closed if entry.consecutive_failures >= self.consecutive_failure_threshold => {
                entry.state = CircuitState::Open;
                entry.opened_at_ms = Some(now_ms);
                tracing::warn!(
                    provider,
                    failures = entry.consecutive_failures,
                    "circuit.state_changed open"
                );
            }
            _ => {}
        }
    }

    pub async fn snapshot(&self) -> Vec<CircuitCounters> {
        self.counters.read().await.values().cloned().collect()
    }

    pub async fn reset(&self, provider: &str) {
        let mut counters = self.counters.write().await;
        counters.insert(
            provider.to_string(),
            CircuitCounters {
                provider: provider.to_string(),
                ..Default::default()
            },
        );
        tracing::warn!(provider, "circuit.state_changed closed (manual reset)");
    }
}

pub type SharedCircuitBreaker = Arc<CircuitBreaker>;
