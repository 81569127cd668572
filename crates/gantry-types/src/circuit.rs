use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl Default for CircuitState {
    fn default() -> Self {
        CircuitState::Closed
    }
}

/// Per-provider failure-rate window. The breaker trips to `Open` when
/// `failures` crosses the configured threshold within `window`, and probes
/// a single call through in `HalfOpen` before deciding to close or re-open.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitCounters {
    pub provider: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failures_in_window: u32,
    pub successes_in_window: u32,
    pub opened_at_ms: Option<u64>,
    pub half_open_at_ms: Option<u64>,
    pub last_error: Option<String>,
}
