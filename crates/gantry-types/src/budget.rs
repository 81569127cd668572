use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BudgetScope {
    Global,
    Agent,
    Workflow,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Daily,
    Weekly,
    Monthly,
}

/// One scope/period counter. The governor keeps one row per
/// `(scope, scope_key, period)` and resets `spent_usd` when `period_start_ms`
/// rolls over; `kill_switch` is an operator-set override independent of
/// the numeric limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetCounter {
    pub scope: BudgetScope,
    pub scope_key: String,
    pub period: BudgetPeriod,
    pub limit_usd: f64,
    pub spent_usd: f64,
    pub period_start_ms: u64,
    #[serde(default)]
    pub kill_switch: bool,
}

impl BudgetCounter {
    pub fn remaining_usd(&self) -> f64 {
        (self.limit_usd - self.spent_usd).max(0.0)
    }

    pub fn is_exhausted(&self) -> bool {
        self.kill_switch || self.spent_usd >= self.limit_usd
    }

    /// Fraction of the limit consumed, used to decide whether a
    /// `budget.warning` notification should fire (§7).
    pub fn utilization(&self) -> f64 {
        if self.limit_usd <= 0.0 {
            1.0
        } else {
            (self.spent_usd / self.limit_usd).min(1.0)
        }
    }
}
