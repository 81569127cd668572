use std::collections::HashMap;
use std::sync::Arc;

use gantry_types::{BudgetCounter, BudgetPeriod, BudgetScope, GantryError, GantryResult};
use tokio::sync::RwLock;

fn period_window_ms(period: BudgetPeriod) -> u64 {
    match period {
        BudgetPeriod::Daily => 24 * 60 * 60 * 1000,
        BudgetPeriod::Weekly => 7 * 24 * 60 * 60 * 1000,
        BudgetPeriod::Monthly => 30 * 24 * 60 * 60 * 1000,
    }
}

#[derive(Debug, Clone)]
pub struct BudgetLimits {
    pub global_daily_usd: f64,
    pub global_weekly_usd: f64,
    pub global_monthly_usd: f64,
    pub agent_daily_usd: f64,
    pub workflow_daily_usd: f64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            global_daily_usd: 50.0,
            global_weekly_usd: 250.0,
            global_monthly_usd: 1000.0,
            agent_daily_usd: 20.0,
            workflow_daily_usd: 20.0,
        }
    }
}

/// Holds one counter per `(scope, scope_key, period)` and a global
/// kill-switch. Every applicable counter for a scope is checked together
/// before admission, then incremented together on commit (§4.C).
pub struct BudgetGovernor {
    limits: BudgetLimits,
    counters: RwLock<HashMap<(BudgetScope, String, BudgetPeriod), BudgetCounter>>,
    kill_switch: RwLock<bool>,
}

impl BudgetGovernor {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            counters: RwLock::new(HashMap::new()),
            kill_switch: RwLock::new(false),
        }
    }

    pub async fn is_paused(&self) -> bool {
        *self.kill_switch.read().await
    }

    pub async fn pause(&self) {
        *self.kill_switch.write().await = true;
        tracing::warn!("budget kill-switch engaged");
    }

    pub async fn resume(&self) {
        *self.kill_switch.write().await = false;
        tracing::info!("budget kill-switch cleared");
    }

    fn limit_for(&self, scope: BudgetScope, period: BudgetPeriod) -> f64 {
        match (scope, period) {
            (BudgetScope::Global, BudgetPeriod::Daily) => self.limits.global_daily_usd,
            (BudgetScope::Global, BudgetPeriod::Weekly) => self.limits.global_weekly_usd,
            (BudgetScope::Global, BudgetPeriod::Monthly) => self.limits.global_monthly_usd,
            (BudgetScope::Agent, _) => self.limits.agent_daily_usd,
            (BudgetScope::Workflow, _) => self.limits.workflow_daily_usd,
        }
    }

    fn applicable_keys(agent: &str, workflow_run_id: Option<&str>) -> Vec<(BudgetScope, String, BudgetPeriod)> {
        let mut keys = vec![
            (BudgetScope::Global, "global".to_string(), BudgetPeriod::Daily),
            (BudgetScope::Global, "global".to_string(), BudgetPeriod::Weekly),
            (BudgetScope::Global, "global".to_string(), BudgetPeriod::Monthly),
            (BudgetScope::Agent, agent.to_string(), BudgetPeriod::Daily),
        ];
        if let Some(run_id) = workflow_run_id {
            keys.push((BudgetScope::Workflow, run_id.to_string(), BudgetPeriod::Daily));
        }
        keys
    }

    fn roll_window(counter: &mut BudgetCounter, now_ms: u64, period: BudgetPeriod) {
        if now_ms.saturating_sub(counter.period_start_ms) >= period_window_ms(period) {
            counter.spent_usd = 0.0;
            counter.period_start_ms = now_ms;
        }
    }

    /// Checks that `estimated_usd` fits under the task's own budget (if set)
    /// and every applicable scope/window, without committing it. Call
    /// `commit` once the actual cost is known.
    pub async fn admit(
        &self,
        agent: &str,
        workflow_run_id: Option<&str>,
        estimated_usd: f64,
        task_budget_usd: Option<f64>,
        now_ms: u64,
    ) -> GantryResult<()> {
        if self.is_paused().await {
            return Err(GantryError::Paused);
        }

        if let Some(task_budget) = task_budget_usd {
            if estimated_usd > task_budget {
                tracing::warn!(
                    agent,
                    estimated_usd,
                    task_budget_usd = task_budget,
                    "budget.task_cap_exceeded"
                );
                return Err(GantryError::OverBudget(format!(
                    "estimated cost {estimated_usd:.4} USD exceeds task budget {task_budget:.4} USD"
                )));
            }
        }

        let mut counters = self.counters.write().await;
        for (scope, scope_key, period) in Self::applicable_keys(agent, workflow_run_id) {
            let limit = self.limit_for(scope, period);
            let entry = counters
                .entry((scope, scope_key.clone(), period))
                .or_insert_with(|| BudgetCounter {
                    scope,
                    scope_key: scope_key.clone(),
                    period,
                    limit_usd: limit,
                    spent_usd: 0.0,
                    period_start_ms: now_ms,
                    kill_switch: false,
                });
            Self::roll_window(entry, now_ms, period);
            entry.limit_usd = limit;
            if entry.spent_usd + estimated_usd > entry.limit_usd {
                tracing::warn!(
                    scope = ?entry.scope,
                    scope_key = %entry.scope_key,
                    period = ?entry.period,
                    "budget.cap_exceeded"
                );
                return Err(GantryError::OverBudget(format!(
                    "{:?} budget for `{}` ({:?}) would exceed {:.2} USD cap",
                    entry.scope, entry.scope_key, entry.period, entry.limit_usd
                )));
            }
        }
        Ok(())
    }

    /// Commits an actual spend across every applicable counter. Called once
    /// per completed task, after the provider returns real usage (§4.C).
    pub async fn commit(&self, agent: &str, workflow_run_id: Option<&str>, actual_usd: f64, now_ms: u64) {
        if actual_usd <= 0.0 {
            return;
        }
        let mut counters = self.counters.write().await;
        for (scope, scope_key, period) in Self::applicable_keys(agent, workflow_run_id) {
            let limit = self.limit_for(scope, period);
            let entry = counters
                .entry((scope, scope_key.clone(), period))
                .or_insert_with(|| BudgetCounter {
                    scope,
                    scope_key: scope_key.clone(),
                    period,
                    limit_usd: limit,
                    spent_usd: 0.0,
                    period_start_ms: now_ms,
                    kill_switch: false,
                });
            Self::roll_window(entry, now_ms, period);
            entry.spent_usd += actual_usd;
        }
    }

    pub async fn snapshot(&self) -> Vec<BudgetCounter> {
        self.counters.read().await.values().cloned().collect()
    }
}

pub type SharedBudgetGovernor = Arc<BudgetGovernor>;
