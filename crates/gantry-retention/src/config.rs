/// Retention window, in days, for one table.
#[derive(Debug, Clone, Copy)]
pub struct RetentionDays {
    pub history: u32,
    pub sessions: u32,
    pub audit: u32,
    pub workflows: u32,
    pub queue: u32,
}

impl Default for RetentionDays {
    fn default() -> Self {
        Self { history: 90, sessions: 30, audit: 90, workflows: 30, queue: 3 }
    }
}

/// Sweeper tuning: how often it runs, the per-table windows, and the PII
/// redaction pass that runs ahead of (and independently from) deletion.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub days: RetentionDays,
    pub sweep_interval_secs: u64,
    /// Dotted field paths into a task's `payload`/`result` JSON (a
    /// `result.` prefix targets the result blob) to redact once a row
    /// is older than `redact_after_days`, ahead of its eventual deletion
    /// at `days.history`.
    pub redact_fields: Vec<String>,
    pub redact_after_days: Option<u32>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: RetentionDays::default(),
            sweep_interval_secs: 3600,
            redact_fields: Vec::new(),
            redact_after_days: None,
        }
    }
}
