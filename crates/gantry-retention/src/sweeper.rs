use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;

use gantry_storage::Store;

use crate::config::RetentionConfig;

fn cutoff_rfc3339(days: u32) -> String {
    (Utc::now() - ChronoDuration::days(i64::from(days))).to_rfc3339()
}

/// Periodic purge and redaction sweeper. One sweep is idempotent: running
/// it twice with the same config and clock deletes zero rows the second
/// time, since every purge is a `WHERE ... < cutoff` delete and the
/// redaction pass skips rows that are already redacted.
pub struct RetentionSweeper {
    store: Arc<Store>,
    config: RetentionConfig,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub tasks_purged: usize,
    pub sessions_purged: usize,
    pub workflow_runs_purged: usize,
    pub audit_purged: usize,
    pub offline_queue_purged: usize,
    pub tasks_redacted: usize,
}

impl RetentionSweeper {
    pub fn new(store: Arc<Store>, config: RetentionConfig) -> Self {
        Self { store, config, cancel: CancellationToken::new() }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn spawn(self: &Arc<Self>) {
        let sweeper = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(sweeper.config.sweep_interval_secs));
            loop {
                tokio::select! {
                    _ = sweeper.cancel.cancelled() => return,
                    _ = interval.tick() => {
                        let report = sweeper.sweep().await;
                        tracing::info!(?report, "retention sweep complete");
                    }
                }
            }
        });
    }

    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        if let Some(redact_after) = self.config.redact_after_days {
            if !self.config.redact_fields.is_empty() {
                match self
                    .store
                    .redact_task_fields_before(&cutoff_rfc3339(redact_after), &self.config.redact_fields)
                    .await
                {
                    Ok(n) => report.tasks_redacted = n,
                    Err(err) => tracing::warn!(error = %err, "task redaction pass failed"),
                }
            }
        }

        match self.store.purge_tasks_before(&cutoff_rfc3339(self.config.days.history)).await {
            Ok(n) => report.tasks_purged = n,
            Err(err) => tracing::warn!(error = %err, "task purge failed"),
        }
        match self.store.purge_sessions_before(&cutoff_rfc3339(self.config.days.sessions)).await {
            Ok(n) => report.sessions_purged = n,
            Err(err) => tracing::warn!(error = %err, "session purge failed"),
        }
        match self.store.purge_workflow_runs_before(&cutoff_rfc3339(self.config.days.workflows)).await {
            Ok(n) => report.workflow_runs_purged = n,
            Err(err) => tracing::warn!(error = %err, "workflow run purge failed"),
        }
        match self.store.purge_audit_before(&cutoff_rfc3339(self.config.days.audit)).await {
            Ok(n) => report.audit_purged = n,
            Err(err) => tracing::warn!(error = %err, "audit purge failed"),
        }
        match self.store.purge_expired_offline_before(&cutoff_rfc3339(self.config.days.queue)).await {
            Ok(n) => report.offline_queue_purged = n,
            Err(err) => tracing::warn!(error = %err, "offline queue purge failed"),
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_storage::Store;
    use gantry_types::{MessageRole, Session, SessionMessage, Task};

    #[tokio::test]
    async fn second_sweep_with_same_clock_is_a_no_op() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let session = Session::new("researcher", None, 0);
        store.put_session(&session).await.unwrap();
        store.append_message(&SessionMessage::new(&session.id, MessageRole::User, "hi", 0)).await.unwrap();
        store.put_task(&Task::new("researcher", "do a thing")).await.unwrap();

        // Zero-day windows so everything just inserted is already "expired".
        let config = RetentionConfig {
            days: crate::config::RetentionDays { history: 0, sessions: 0, audit: 0, workflows: 0, queue: 0 },
            sweep_interval_secs: 3600,
            redact_fields: vec![],
            redact_after_days: None,
        };
        let sweeper = RetentionSweeper::new(store.clone(), config);

        let first = sweeper.sweep().await;
        assert_eq!(first.sessions_purged, 1);

        let second = sweeper.sweep().await;
        assert_eq!(second.sessions_purged, 0, "nothing left to purge the second time");
        assert_eq!(second.tasks_purged, 0);
    }

    #[tokio::test]
    async fn redaction_runs_before_and_independent_of_deletion_window() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        store.put_task(&Task::new("researcher", "call 555-0100")).await.unwrap();

        let config = RetentionConfig {
            days: crate::config::RetentionDays { history: 365, sessions: 365, audit: 365, workflows: 365, queue: 365 },
            sweep_interval_secs: 3600,
            redact_fields: vec!["prompt".to_string()],
            redact_after_days: Some(0),
        };
        let sweeper = RetentionSweeper::new(store.clone(), config);

        let report = sweeper.sweep().await;
        assert_eq!(report.tasks_redacted, 1);
        assert_eq!(report.tasks_purged, 0, "history window not yet elapsed");
    }
}
