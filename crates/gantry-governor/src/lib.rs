mod budget;
mod circuit;

pub use budget::{BudgetGovernor, BudgetLimits, SharedBudgetGovernor};
pub use circuit::{CircuitBreaker, SharedCircuitBreaker};

use std::sync::Arc;

use gantry_types::{GantryError, GantryResult};

/// Wraps a `ProviderRegistry` with circuit-breaker skip-on-open and budget
/// admission. This is the only entry point the Dispatcher should use to
/// reach a provider (§4.C, §4.E step 6).
pub struct Governor {
    pub circuit: SharedCircuitBreaker,
    pub budget: SharedBudgetGovernor,
}

impl Governor {
    pub fn new(circuit: SharedCircuitBreaker, budget: SharedBudgetGovernor) -> Self {
        Self { circuit, budget }
    }

    pub fn with_defaults() -> Self {
        Self {
            circuit: Arc::new(CircuitBreaker::with_defaults()),
            budget: Arc::new(BudgetGovernor::new(BudgetLimits::default())),
        }
    }

    /// Picks the first provider in `chain` whose circuit is closed or
    /// half-open, skipping any currently open breaker. Returns
    /// `provider_unavailable` if the whole chain is tripped.
    pub async fn select_from_chain(&self, chain: &[String], now_ms: u64) -> GantryResult<String> {
        for provider in chain {
            if self.circuit.allow(provider, now_ms).await {
                return Ok(provider.clone());
            }
        }
        Err(GantryError::ProviderUnavailable(
            "all providers in the fallback chain have an open circuit".to_string(),
        ))
    }

    pub async fn admit_and_select(
        &self,
        chain: &[String],
        agent: &str,
        workflow_run_id: Option<&str>,
        estimated_usd: f64,
        task_budget_usd: Option<f64>,
        now_ms: u64,
    ) -> GantryResult<String> {
        self.budget
            .admit(agent, workflow_run_id, estimated_usd, task_budget_usd, now_ms)
            .await?;
        self.select_from_chain(chain, now_ms).await
    }

    pub async fn record_outcome(
        &self,
        provider: &str,
        agent: &str,
        workflow_run_id: Option<&str>,
        result: &Result<(), GantryError>,
        actual_usd: f64,
        now_ms: u64,
    ) {
        match result {
            Ok(()) => {
                self.circuit.record_success(provider).await;
                self.budget.commit(agent, workflow_run_id, actual_usd, now_ms).await;
            }
            Err(err) if err.is_transient() => {
                self.circuit.record_failure(provider, err.to_string(), now_ms).await;
            }
            Err(_) => {}
        }
    }
}

pub type SharedGovernor = Arc<Governor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn circuit_opens_after_threshold_then_cools_down() {
        let breaker = CircuitBreaker::new(3, 1000);
        for _ in 0..3 {
            breaker.record_failure("openai", "boom", 0).await;
        }
        assert!(!breaker.allow("openai", 500).await);
        assert!(breaker.allow("openai", 1500).await);
    }

    #[tokio::test]
    async fn budget_rejects_when_daily_cap_exceeded() {
        let governor = BudgetGovernor::new(BudgetLimits {
            global_daily_usd: 1.0,
            global_weekly_usd: 10.0,
            global_monthly_usd: 20.0,
            agent_daily_usd: 10.0,
            workflow_daily_usd: 10.0,
        });
        governor.admit("researcher", None, 0.5, None, 0).await.unwrap();
        governor.commit("researcher", None, 0.5, 0).await;
        let err = governor.admit("researcher", None, 0.6, None, 0).await.unwrap_err();
        assert!(matches!(err, GantryError::OverBudget(_)));
    }

    #[tokio::test]
    async fn pause_rejects_all_admission() {
        let governor = BudgetGovernor::new(BudgetLimits::default());
        governor.pause().await;
        let err = governor.admit("researcher", None, 0.01, None, 0).await.unwrap_err();
        assert!(matches!(err, GantryError::Paused));
    }

    #[tokio::test]
    async fn admit_rejects_estimate_over_task_budget() {
        let governor = BudgetGovernor::new(BudgetLimits::default());
        let err = governor
            .admit("researcher", None, 5.0, Some(1.0), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, GantryError::OverBudget(_)));
    }
}
