mod error;

pub use error::{StorageError, StorageResult};

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gantry_types::{
    AuditLogEntry, BudgetCounter, CircuitCounters, CronJob, OfflineQueueEntry, Session,
    SessionMessage, Task, TaskResult, Trigger, WorkflowRun,
};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Embedded SQLite store for every durable entity in the daemon: task
/// history, sessions/messages, triggers, workflow runs, audit log, the
/// offline delivery queue, and governor snapshots. One connection, guarded
/// by a mutex — write volume is modest enough that serializing writes is
/// simpler than a connection pool (§9 Design Notes).
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub async fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema().await?;
        store.validate_integrity().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn validate_integrity(&self) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let check: String = conn.query_row("PRAGMA quick_check(1)", [], |row| row.get(0))?;
        if check.trim().eq_ignore_ascii_case("ok") {
            return Ok(());
        }
        let lowered = check.to_lowercase();
        if lowered.contains("malformed") || lowered.contains("corrupt") {
            return Err(StorageError::InvalidState(format!(
                "database integrity check failed: {check}"
            )));
        }
        tracing::warn!(result = %check, "PRAGMA quick_check returned a non-ok, non-fatal status");
        Ok(())
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                agent TEXT NOT NULL,
                session_id TEXT,
                workflow_run_id TEXT,
                step_id TEXT,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                result TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_workflow_run ON tasks(workflow_run_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_session ON tasks(session_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_session ON session_messages(session_id)",
            [],
        )?;

        // Migration: older rows may predate `step_id` on tasks.
        let task_cols: HashSet<String> = {
            let mut stmt = conn.prepare("PRAGMA table_info(tasks)")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
            rows.collect::<Result<HashSet<_>, _>>()?
        };
        if !task_cols.contains("trace_id") {
            conn.execute("ALTER TABLE tasks ADD COLUMN trace_id TEXT", [])?;
        }

        conn.execute(
            "CREATE TABLE IF NOT EXISTS triggers (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS cron_jobs (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS workflow_runs (
                id TEXT PRIMARY KEY,
                workflow_name TEXT NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_runs_workflow ON workflow_runs(workflow_name)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS budget_counters (
                scope TEXT NOT NULL,
                scope_key TEXT NOT NULL,
                period TEXT NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (scope, scope_key, period)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS circuit_state (
                provider TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS offline_queue (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                next_attempt_at TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_queue_next_attempt ON offline_queue(next_attempt_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                action TEXT NOT NULL,
                at TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_at ON audit_log(at)",
            [],
        )?;

        Ok(())
    }

    // -- tasks ---------------------------------------------------------

    pub async fn put_task(&self, task: &Task) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let payload = serde_json::to_string(task)?;
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO tasks (id, parent_id, agent, session_id, workflow_run_id, step_id, status, payload, result, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', ?7, NULL, ?8, ?8)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
            params![
                task.id,
                task.parent_id,
                task.agent,
                task.session_id,
                task.workflow_run_id,
                task.step_id,
                payload,
                now,
            ],
        )?;
        Ok(())
    }

    pub async fn complete_task(&self, result: &TaskResult) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let payload = serde_json::to_string(result)?;
        let status = serde_json::to_value(&result.status)?
            .as_str()
            .unwrap_or("error")
            .to_string();
        conn.execute(
            "UPDATE tasks SET status = ?1, result = ?2, updated_at = ?3 WHERE id = ?4",
            params![status, payload, now_rfc3339(), result.task_id],
        )?;
        Ok(())
    }

    pub async fn get_task(&self, id: &str) -> StorageResult<Option<Task>> {
        let conn = self.conn.lock().await;
        let payload: Option<String> = conn
            .query_row("SELECT payload FROM tasks WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    pub async fn list_tasks_for_workflow_run(&self, run_id: &str) -> StorageResult<Vec<Task>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT payload FROM tasks WHERE workflow_run_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    /// Completed-task execution history, most recently updated first.
    pub async fn list_history(&self, limit: i64, offset: i64) -> StorageResult<Vec<TaskResult>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT result FROM tasks WHERE result IS NOT NULL ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit, offset], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    pub async fn get_history_entry(&self, task_id: &str) -> StorageResult<Option<TaskResult>> {
        let conn = self.conn.lock().await;
        let payload: Option<String> = conn
            .query_row("SELECT result FROM tasks WHERE id = ?1", params![task_id], |row| row.get(0))
            .optional()?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    // -- sessions --------------------------------------------------------

    pub async fn put_session(&self, session: &Session) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let payload = serde_json::to_string(session)?;
        conn.execute(
            "INSERT INTO sessions (id, payload, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
            params![session.id, payload, now_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> StorageResult<Option<Session>> {
        let conn = self.conn.lock().await;
        let payload: Option<String> = conn
            .query_row("SELECT payload FROM sessions WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    pub async fn append_message(&self, message: &SessionMessage) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let payload = serde_json::to_string(message)?;
        conn.execute(
            "INSERT INTO session_messages (id, session_id, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![message.id, message.session_id, payload, now_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn list_messages(&self, session_id: &str) -> StorageResult<Vec<SessionMessage>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT payload FROM session_messages WHERE session_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    // -- cron jobs ---------------------------------------------------------

    pub async fn put_cron_job(&self, job: &CronJob) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let payload = serde_json::to_string(job)?;
        conn.execute(
            "INSERT INTO cron_jobs (id, payload, enabled, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, enabled = excluded.enabled, updated_at = excluded.updated_at",
            params![job.id, payload, job.enabled as i64, now_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn delete_cron_job(&self, id: &str) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM cron_jobs WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub async fn get_cron_job(&self, id: &str) -> StorageResult<Option<CronJob>> {
        let conn = self.conn.lock().await;
        let payload: Option<String> = conn
            .query_row("SELECT payload FROM cron_jobs WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    pub async fn list_cron_jobs(&self) -> StorageResult<Vec<CronJob>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT payload FROM cron_jobs")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    // -- triggers --------------------------------------------------------

    pub async fn put_trigger(&self, trigger: &Trigger) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let payload = serde_json::to_string(trigger)?;
        conn.execute(
            "INSERT INTO triggers (id, payload, enabled, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, enabled = excluded.enabled, updated_at = excluded.updated_at",
            params![trigger.id, payload, trigger.enabled as i64, now_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn delete_trigger(&self, id: &str) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM triggers WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub async fn list_triggers(&self) -> StorageResult<Vec<Trigger>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT payload FROM triggers")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    // -- workflow runs -----------------------------------------------------

    pub async fn put_workflow_run(&self, run: &WorkflowRun) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let payload = serde_json::to_string(run)?;
        let status = serde_json::to_value(&run.status)?
            .as_str()
            .unwrap_or("running")
            .to_string();
        let started_at = chrono::DateTime::<Utc>::from_timestamp_millis(run.started_at_ms as i64)
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(now_rfc3339);
        let finished_at = run
            .finished_at_ms
            .and_then(|ms| chrono::DateTime::<Utc>::from_timestamp_millis(ms as i64))
            .map(|d| d.to_rfc3339());
        conn.execute(
            "INSERT INTO workflow_runs (id, workflow_name, status, payload, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, payload = excluded.payload, finished_at = excluded.finished_at",
            params![run.id, run.workflow_name, status, payload, started_at, finished_at],
        )?;
        Ok(())
    }

    pub async fn get_workflow_run(&self, id: &str) -> StorageResult<Option<WorkflowRun>> {
        let conn = self.conn.lock().await;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM workflow_runs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    /// Most recent workflow runs first, optionally narrowed to one workflow.
    pub async fn list_workflow_runs(
        &self,
        workflow_name: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> StorageResult<Vec<WorkflowRun>> {
        let conn = self.conn.lock().await;
        let mut stmt = if workflow_name.is_some() {
            conn.prepare(
                "SELECT payload FROM workflow_runs WHERE workflow_name = ?1
                 ORDER BY started_at DESC LIMIT ?2 OFFSET ?3",
            )?
        } else {
            conn.prepare(
                "SELECT payload FROM workflow_runs ORDER BY started_at DESC LIMIT ?1 OFFSET ?2",
            )?
        };
        let rows = if let Some(name) = workflow_name {
            stmt.query_map(params![name, limit, offset], |row| row.get::<_, String>(0))?
        } else {
            stmt.query_map(params![limit, offset], |row| row.get::<_, String>(0))?
        };
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    // -- governor snapshots ------------------------------------------------

    pub async fn put_budget_counter(&self, counter: &BudgetCounter) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let payload = serde_json::to_string(counter)?;
        let scope = serde_json::to_value(counter.scope)?
            .as_str()
            .unwrap_or("global")
            .to_string();
        let period = serde_json::to_value(counter.period)?
            .as_str()
            .unwrap_or("daily")
            .to_string();
        conn.execute(
            "INSERT INTO budget_counters (scope, scope_key, period, payload) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(scope, scope_key, period) DO UPDATE SET payload = excluded.payload",
            params![scope, counter.scope_key, period, payload],
        )?;
        Ok(())
    }

    pub async fn list_budget_counters(&self) -> StorageResult<Vec<BudgetCounter>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT payload FROM budget_counters")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    pub async fn put_circuit_counters(&self, counters: &CircuitCounters) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let payload = serde_json::to_string(counters)?;
        conn.execute(
            "INSERT INTO circuit_state (provider, payload) VALUES (?1, ?2)
             ON CONFLICT(provider) DO UPDATE SET payload = excluded.payload",
            params![counters.provider, payload],
        )?;
        Ok(())
    }

    pub async fn list_circuit_counters(&self) -> StorageResult<Vec<CircuitCounters>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT payload FROM circuit_state")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    // -- offline queue -------------------------------------------------

    pub async fn enqueue_offline(&self, entry: &OfflineQueueEntry) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let payload = serde_json::to_string(entry)?;
        let kind = serde_json::to_value(&entry.kind)?
            .as_str()
            .unwrap_or("notification")
            .to_string();
        let next_attempt = chrono::DateTime::<Utc>::from_timestamp_millis(entry.next_attempt_at_ms as i64)
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(now_rfc3339);
        conn.execute(
            "INSERT INTO offline_queue (id, kind, next_attempt_at, payload) VALUES (?1, ?2, ?3, ?4)",
            params![entry.id, kind, next_attempt, payload],
        )?;
        Ok(())
    }

    pub async fn list_due_offline(&self, now_rfc3339_value: &str) -> StorageResult<Vec<OfflineQueueEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT payload FROM offline_queue WHERE next_attempt_at <= ?1 ORDER BY next_attempt_at ASC",
        )?;
        let rows = stmt.query_map(params![now_rfc3339_value], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    /// Every queued entry regardless of `next_attempt_at`, for the `/queue`
    /// inspection endpoint (the sweeper only ever wants the due subset).
    pub async fn list_all_offline(&self) -> StorageResult<Vec<OfflineQueueEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT payload FROM offline_queue ORDER BY next_attempt_at ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    pub async fn update_offline_entry(&self, entry: &OfflineQueueEntry) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let payload = serde_json::to_string(entry)?;
        let next_attempt = chrono::DateTime::<Utc>::from_timestamp_millis(entry.next_attempt_at_ms as i64)
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(now_rfc3339);
        conn.execute(
            "UPDATE offline_queue SET payload = ?1, next_attempt_at = ?2 WHERE id = ?3",
            params![payload, next_attempt, entry.id],
        )?;
        Ok(())
    }

    pub async fn delete_offline_entry(&self, id: &str) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM offline_queue WHERE id = ?1", params![id])?;
        Ok(())
    }

    // -- audit log -------------------------------------------------------

    pub async fn append_audit(&self, entry: &AuditLogEntry) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let payload = serde_json::to_string(entry)?;
        let action = serde_json::to_value(&entry.action)?
            .as_str()
            .unwrap_or("unknown")
            .to_string();
        let at = chrono::DateTime::<Utc>::from_timestamp_millis(entry.at_ms as i64)
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(now_rfc3339);
        conn.execute(
            "INSERT INTO audit_log (id, action, at, payload) VALUES (?1, ?2, ?3, ?4)",
            params![entry.id, action, at, payload],
        )?;
        Ok(())
    }

    pub async fn list_audit_since(&self, since_rfc3339: &str, limit: i64) -> StorageResult<Vec<AuditLogEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT payload FROM audit_log WHERE at >= ?1 ORDER BY at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![since_rfc3339, limit], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    pub async fn purge_audit_before(&self, cutoff_rfc3339: &str) -> StorageResult<usize> {
        let conn = self.conn.lock().await;
        let affected = conn.execute("DELETE FROM audit_log WHERE at < ?1", params![cutoff_rfc3339])?;
        Ok(affected)
    }

    pub async fn purge_tasks_before(&self, cutoff_rfc3339: &str) -> StorageResult<usize> {
        let conn = self.conn.lock().await;
        let affected = conn.execute(
            "DELETE FROM tasks WHERE updated_at < ?1 AND status NOT IN ('queued', 'running')",
            params![cutoff_rfc3339],
        )?;
        Ok(affected)
    }

    pub async fn purge_sessions_before(&self, cutoff_rfc3339: &str) -> StorageResult<usize> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM session_messages WHERE session_id IN (SELECT id FROM sessions WHERE updated_at < ?1)",
            params![cutoff_rfc3339],
        )?;
        let affected = conn.execute("DELETE FROM sessions WHERE updated_at < ?1", params![cutoff_rfc3339])?;
        Ok(affected)
    }

    pub async fn purge_workflow_runs_before(&self, cutoff_rfc3339: &str) -> StorageResult<usize> {
        let conn = self.conn.lock().await;
        let affected = conn.execute(
            "DELETE FROM workflow_runs WHERE started_at < ?1 AND status NOT IN ('running', 'pending')",
            params![cutoff_rfc3339],
        )?;
        Ok(affected)
    }

    /// Transitions offline-queue entries whose `next_attempt_at` is still
    /// in the future but whose original enqueue time plus the caller's
    /// TTL has elapsed. Since the table has no `expired` status column by
    /// construction (`kind` carries the entry's own type), expiry is
    /// expressed by deleting the row — callers that need to observe the
    /// transition should read matching rows before calling this.
    pub async fn purge_expired_offline_before(&self, cutoff_rfc3339: &str) -> StorageResult<usize> {
        let conn = self.conn.lock().await;
        let affected =
            conn.execute("DELETE FROM offline_queue WHERE next_attempt_at < ?1", params![cutoff_rfc3339])?;
        Ok(affected)
    }

    /// Redacts `fields` (dotted paths into the task's `payload` JSON, e.g.
    /// `"prompt"`, or into its `result` JSON via a `result.` prefix, e.g.
    /// `"result.output"`) on every task older than `cutoff_rfc3339`.
    /// Returns the number of rows actually modified.
    pub async fn redact_task_fields_before(&self, cutoff_rfc3339: &str, fields: &[String]) -> StorageResult<usize> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, payload, result FROM tasks WHERE updated_at < ?1",
        )?;
        let rows: Vec<(String, String, Option<String>)> = stmt
            .query_map(params![cutoff_rfc3339], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut modified = 0usize;
        for (id, payload, result) in rows {
            let mut payload_value: serde_json::Value = serde_json::from_str(&payload)?;
            let mut result_value: Option<serde_json::Value> =
                result.as_deref().map(serde_json::from_str).transpose()?;
            let mut changed = false;

            for field in fields {
                if let Some(path) = field.strip_prefix("result.") {
                    if let Some(rv) = result_value.as_mut() {
                        changed |= redact_json_path(rv, path);
                    }
                } else {
                    changed |= redact_json_path(&mut payload_value, field);
                }
            }

            if changed {
                let new_payload = serde_json::to_string(&payload_value)?;
                let new_result = result_value.as_ref().map(serde_json::to_string).transpose()?;
                conn.execute(
                    "UPDATE tasks SET payload = ?1, result = ?2 WHERE id = ?3",
                    params![new_payload, new_result, id],
                )?;
                modified += 1;
            }
        }
        Ok(modified)
    }
}

/// Sets a dotted-path field on a JSON object to a redaction marker,
/// returning whether anything was actually changed (absent paths and
/// already-redacted values are no-ops).
fn redact_json_path(value: &mut serde_json::Value, path: &str) -> bool {
    let mut segments = path.split('.').peekable();
    let mut current = value;
    while let Some(segment) = segments.next() {
        let serde_json::Value::Object(map) = current else {
            return false;
        };
        if segments.peek().is_none() {
            match map.get(segment) {
                Some(serde_json::Value::String(s)) if s == "[redacted]" => return false,
                Some(v) if v.is_null() => return false,
                None => return false,
                _ => {
                    map.insert(segment.to_string(), serde_json::Value::String("[redacted]".to_string()));
                    return true;
                }
            }
        }
        let Some(next) = map.get_mut(segment) else {
            return false;
        };
        current = next;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_types::{MessageRole, RunMode, TaskStatus, WorkflowRunStatus};
    use std::collections::HashMap;

    #[tokio::test]
    async fn task_roundtrips_through_store() {
        let store = Store::open_in_memory().await.unwrap();
        let task = Task::new("researcher", "summarize the quarterly report");
        store.put_task(&task).await.unwrap();

        let loaded = store.get_task(&task.id).await.unwrap().expect("task present");
        assert_eq!(loaded.agent, "researcher");

        let result = TaskResult {
            task_id: task.id.clone(),
            status: TaskStatus::Success,
            exit_code: None,
            output: "done".to_string(),
            error: None,
            error_kind: None,
            duration_ms: 42,
            cost_usd: 0.01,
            input_tokens: 10,
            output_tokens: 20,
            model: None,
            provider: None,
            session_id: None,
            trace_id: None,
        };
        store.complete_task(&result).await.unwrap();
    }

    #[tokio::test]
    async fn session_messages_are_ordered() {
        let store = Store::open_in_memory().await.unwrap();
        let session = Session::new("researcher", None, 0);
        store.put_session(&session).await.unwrap();

        for i in 0..3 {
            let message = SessionMessage::new(&session.id, MessageRole::User, format!("msg {i}"), i);
            store.append_message(&message).await.unwrap();
        }

        let messages = store.list_messages(&session.id).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "msg 0");
    }

    #[tokio::test]
    async fn redact_task_fields_masks_prompt_and_result_output() {
        let store = Store::open_in_memory().await.unwrap();
        let task = Task::new("researcher", "call me at 555-0100");
        store.put_task(&task).await.unwrap();
        store
            .complete_task(&TaskResult {
                task_id: task.id.clone(),
                status: TaskStatus::Success,
                exit_code: None,
                output: "their number is 555-0100".to_string(),
                error: None,
                error_kind: None,
                duration_ms: 1,
                cost_usd: 0.0,
                input_tokens: 0,
                output_tokens: 0,
                model: None,
                provider: None,
                session_id: None,
                trace_id: None,
            })
            .await
            .unwrap();

        let future_cutoff = (Utc::now() + chrono::Duration::days(1)).to_rfc3339();
        let modified = store
            .redact_task_fields_before(&future_cutoff, &["prompt".to_string(), "result.output".to_string()])
            .await
            .unwrap();
        assert_eq!(modified, 1);

        let reloaded = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.prompt, "[redacted]");

        let second_pass = store
            .redact_task_fields_before(&future_cutoff, &["prompt".to_string(), "result.output".to_string()])
            .await
            .unwrap();
        assert_eq!(second_pass, 0, "re-redacting an already-redacted row should be a no-op");
    }

    #[tokio::test]
    async fn purge_sessions_before_cutoff_removes_session_and_messages() {
        let store = Store::open_in_memory().await.unwrap();
        let session = Session::new("researcher", None, 0);
        store.put_session(&session).await.unwrap();
        store
            .append_message(&SessionMessage::new(&session.id, MessageRole::User, "hi", 0))
            .await
            .unwrap();

        let future_cutoff = (Utc::now() + chrono::Duration::days(1)).to_rfc3339();
        let purged = store.purge_sessions_before(&future_cutoff).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_session(&session.id).await.unwrap().is_none());
        assert!(store.list_messages(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_history_excludes_incomplete_tasks_and_orders_most_recent_first() {
        let store = Store::open_in_memory().await.unwrap();
        let pending = Task::new("researcher", "still running");
        store.put_task(&pending).await.unwrap();

        let done = Task::new("researcher", "finished");
        store.put_task(&done).await.unwrap();
        store
            .complete_task(&TaskResult {
                task_id: done.id.clone(),
                status: TaskStatus::Success,
                exit_code: None,
                output: "done".to_string(),
                error: None,
                error_kind: None,
                duration_ms: 10,
                cost_usd: 0.0,
                input_tokens: 0,
                output_tokens: 0,
                model: None,
                provider: None,
                session_id: None,
                trace_id: None,
            })
            .await
            .unwrap();

        let history = store.list_history(10, 0).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].task_id, done.id);

        let entry = store.get_history_entry(&done.id).await.unwrap().expect("history entry");
        assert_eq!(entry.output, "done");
        assert!(store.get_history_entry(&pending.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_workflow_runs_filters_by_name_and_orders_recent_first() {
        let store = Store::open_in_memory().await.unwrap();
        let make_run = |id: &str, workflow_name: &str, started_at_ms: u64| WorkflowRun {
            id: id.to_string(),
            workflow_name: workflow_name.to_string(),
            status: WorkflowRunStatus::Success,
            mode: RunMode::Live,
            variables: HashMap::new(),
            step_results: HashMap::new(),
            total_cost_usd: 0.0,
            started_at_ms,
            finished_at_ms: Some(started_at_ms + 100),
            error: None,
        };

        store.put_workflow_run(&make_run("run-1", "nightly-digest", 1_000)).await.unwrap();
        store.put_workflow_run(&make_run("run-2", "nightly-digest", 2_000)).await.unwrap();
        store.put_workflow_run(&make_run("run-3", "onboarding", 3_000)).await.unwrap();

        let all = store.list_workflow_runs(None, 10, 0).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, "run-3", "most recently started run comes first");

        let scoped = store.list_workflow_runs(Some("nightly-digest"), 10, 0).await.unwrap();
        assert_eq!(scoped.len(), 2);
        assert_eq!(scoped[0].id, "run-2");
    }

    #[tokio::test]
    async fn list_all_offline_ignores_next_attempt_time() {
        use gantry_types::OfflineQueueKind;

        let store = Store::open_in_memory().await.unwrap();
        let far_future = OfflineQueueEntry {
            id: "q-1".to_string(),
            kind: OfflineQueueKind::Notification,
            target: "discord:ops".to_string(),
            payload: serde_json::json!({"text": "hi"}),
            attempts: 0,
            next_attempt_at_ms: (Utc::now() + chrono::Duration::days(30)).timestamp_millis() as u64,
            created_at_ms: Utc::now().timestamp_millis() as u64,
            last_error: None,
        };
        store.enqueue_offline(&far_future).await.unwrap();

        assert!(store.list_due_offline(&now_rfc3339()).await.unwrap().is_empty());
        assert_eq!(store.list_all_offline().await.unwrap().len(), 1);
    }
}
