use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use gantry_dispatch::Dispatcher;
use gantry_events::EventBus;
use gantry_storage::Store;
use gantry_types::event::topics;
use gantry_types::{
    CronJob, EngineEvent, MisfirePolicy, Task, TaskStatus, Trigger, TriggerAction, TriggerKind,
    TriggerSpec, Workflow,
};
use gantry_workflow::WorkflowEngine;

use crate::cron;

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Matches an event-trigger pattern against a topic, supporting a single
/// trailing `*` wildcard (`task.*` matches `task.completed`), per §4.I.
fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

#[derive(Default, Clone)]
struct TriggerRuntimeState {
    last_fired_minute: HashMap<String, i64>,
    cooldown_until_ms: HashMap<String, u64>,
    running: HashSet<String>,
}

/// Shared H+I implementation: one ticker drives cron matching, one
/// subscription loop drives event triggers, and the approval set holds
/// anything gated behind an operator decision.
pub struct SchedulerEngine {
    store: Arc<Store>,
    events: EventBus,
    dispatcher: Arc<Dispatcher>,
    workflow_engine: Arc<WorkflowEngine>,
    workflows: Arc<RwLock<HashMap<String, Workflow>>>,
    state: Arc<Mutex<TriggerRuntimeState>>,
    pending_approval: Arc<Mutex<HashMap<String, Trigger>>>,
    pending_cron_job_approval: Arc<Mutex<HashMap<String, CronJob>>>,
    cancel: CancellationToken,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<Store>,
        events: EventBus,
        dispatcher: Arc<Dispatcher>,
        workflow_engine: Arc<WorkflowEngine>,
        workflows: Arc<RwLock<HashMap<String, Workflow>>>,
    ) -> Self {
        Self {
            store,
            events,
            dispatcher,
            workflow_engine,
            workflows,
            state: Arc::new(Mutex::new(TriggerRuntimeState::default())),
            pending_approval: Arc::new(Mutex::new(HashMap::new())),
            pending_cron_job_approval: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Spawns the one-minute cron ticker and the event-trigger subscriber.
    /// Both loops run until `shutdown()` is called.
    pub fn spawn(self: &Arc<Self>) {
        let recover = self.clone();
        tokio::spawn(async move { recover.recover_cron_jobs_on_startup().await });
        let cron = self.clone();
        tokio::spawn(async move { cron.run_cron_ticker().await });
        let events = self.clone();
        tokio::spawn(async move { events.run_event_listener().await });
    }

    /// Clears any `running` flag left set by a crash (the flag is only
    /// ever cleared on a clean completion), and applies each enabled job's
    /// `misfire_policy` if its `next_run_at_ms` has already elapsed —
    /// which only happens when the daemon was down through a scheduled
    /// firing.
    async fn recover_cron_jobs_on_startup(&self) {
        let Ok(jobs) = self.store.list_cron_jobs().await else {
            return;
        };
        let now = Utc::now();
        for mut job in jobs {
            job.running = false;
            let missed = job.enabled && job.next_run_at_ms.map(|next| now_ms() >= next).unwrap_or(false);
            if missed {
                match job.misfire_policy {
                    MisfirePolicy::FireOnceImmediately => {
                        tracing::info!(job = %job.id, "firing missed cron job on recovery");
                        job.running = true;
                        job.next_run_at_ms = cron::next_fire_after(&job.expression, &job.timezone, now).map(|t| t.timestamp_millis() as u64);
                        self.store.put_cron_job(&job).await.ok();
                        self.fire_cron_job(job).await;
                        continue;
                    }
                    MisfirePolicy::Skip => {
                        tracing::info!(job = %job.id, "skipping missed cron job on recovery");
                    }
                }
            }
            job.next_run_at_ms = cron::next_fire_after(&job.expression, &job.timezone, now).map(|t| t.timestamp_millis() as u64);
            self.store.put_cron_job(&job).await.ok();
        }
    }

    async fn run_cron_ticker(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => {
                    if let Err(err) = self.tick_cron().await {
                        tracing::warn!(error = %err, "cron tick failed");
                    }
                    if let Err(err) = self.tick_cron_jobs().await {
                        tracing::warn!(error = %err, "cron job tick failed");
                    }
                }
            }
        }
    }

    async fn tick_cron(&self) -> Result<(), gantry_storage::StorageError> {
        let now = Utc::now();
        let minute = cron::minute_key(now);
        let triggers = self.store.list_triggers().await?;
        for trigger in triggers {
            if !trigger.enabled || trigger.spec.kind() != TriggerKind::Cron {
                continue;
            }
            let TriggerSpec::Cron { expression, timezone } = &trigger.spec else {
                continue;
            };
            let tz_name = timezone.clone().unwrap_or_else(|| "UTC".to_string());
            if !cron::matches(expression, &tz_name, now) {
                continue;
            }

            let mut state = self.state.lock().await;
            if state.last_fired_minute.get(&trigger.id).copied() == Some(minute) {
                continue;
            }
            if let Some(cooldown_until) = state.cooldown_until_ms.get(&trigger.id) {
                if now_ms() < *cooldown_until {
                    continue;
                }
            }
            if state.running.contains(&trigger.id) {
                tracing::debug!(trigger = %trigger.id, "skipping cron firing: previous run still in flight");
                continue;
            }
            state.last_fired_minute.insert(trigger.id.clone(), minute);
            state.running.insert(trigger.id.clone());
            drop(state);

            self.fire(trigger, "cron", HashMap::new()).await;
        }
        Ok(())
    }

    /// Iterates enabled Cron Jobs, firing each whose expression matches the
    /// current minute in its timezone (§4.H). Overlap suppression is the
    /// job's own persisted `running` flag, and the minute-boundary guard is
    /// its persisted `last_run_at_ms` rather than in-memory state, so both
    /// survive a daemon restart.
    async fn tick_cron_jobs(&self) -> Result<(), gantry_storage::StorageError> {
        let now = Utc::now();
        let minute = cron::minute_key(now);
        let jobs = self.store.list_cron_jobs().await?;
        for mut job in jobs {
            if !job.enabled || job.running {
                continue;
            }
            if !cron::matches(&job.expression, &job.timezone, now) {
                continue;
            }
            let already_fired_this_minute = job
                .last_run_at_ms
                .map(|ms| ms as i64 / 60_000 == minute)
                .unwrap_or(false);
            if already_fired_this_minute {
                continue;
            }
            job.running = true;
            job.next_run_at_ms = cron::next_fire_after(&job.expression, &job.timezone, now).map(|t| t.timestamp_millis() as u64);
            self.store.put_cron_job(&job).await.ok();
            self.fire_cron_job(job).await;
        }
        Ok(())
    }

    async fn fire_cron_job(&self, mut job: CronJob) {
        if job.approval_required {
            self.pending_cron_job_approval.lock().await.insert(job.id.clone(), job.clone());
            self.events.emit(
                topics::CRON_JOB_APPROVAL_PENDING,
                json!({"cron_job_id": job.id, "cron_job_name": job.name}),
                now_ms(),
            );
            job.running = false;
            self.store.put_cron_job(&job).await.ok();
            return;
        }
        self.dispatch_cron_job(job).await;
    }

    /// Starts a Task via §4.E and, once it completes, clears `running`,
    /// advances the consecutive-error counter, and records `last_run_at_ms`.
    async fn dispatch_cron_job(&self, mut job: CronJob) {
        let mut task = Task::new(job.agent.clone(), job.prompt.clone());
        task.model = job.model.clone();
        task.budget_usd = job.budget_usd;
        task.source = Some(format!("cron:{}", job.id));

        let fired_at = now_ms();
        job.last_run_at_ms = Some(fired_at);
        job.running = true;

        let dispatcher = self.dispatcher.clone();
        let store = self.store.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = dispatcher.dispatch(task).await;
            job.running = false;
            job.consecutive_errors = if result.status == TaskStatus::Success {
                0
            } else {
                job.consecutive_errors + 1
            };
            store.put_cron_job(&job).await.ok();
            events.emit(
                topics::CRON_JOB_FIRED,
                json!({
                    "cron_job_id": job.id,
                    "cron_job_name": job.name,
                    "status": format!("{:?}", result.status).to_lowercase(),
                    "consecutive_errors": job.consecutive_errors,
                }),
                fired_at,
            );
        });
    }

    /// Approves a held cron job firing, dispatching it immediately.
    pub async fn approve_cron_job(&self, job_id: &str) -> bool {
        let Some(job) = self.pending_cron_job_approval.lock().await.remove(job_id) else {
            return false;
        };
        self.dispatch_cron_job(job).await;
        true
    }

    pub async fn pending_cron_job_approvals(&self) -> Vec<CronJob> {
        self.pending_cron_job_approval.lock().await.values().cloned().collect()
    }

    /// Fires a Cron Job immediately, bypassing its schedule match — the
    /// operator "run now" action. Still honors `enabled`, overlap
    /// suppression, and `approval_required`.
    pub async fn fire_cron_job_now(&self, job_id: &str) -> Result<bool, gantry_storage::StorageError> {
        let Some(mut job) = self.store.get_cron_job(job_id).await? else {
            return Ok(false);
        };
        if !job.enabled || job.running {
            return Ok(false);
        }
        job.running = true;
        self.store.put_cron_job(&job).await.ok();
        self.fire_cron_job(job).await;
        Ok(true)
    }

    async fn run_event_listener(self: Arc<Self>) {
        let mut rx = self.events.subscribe();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                event = rx.recv() => {
                    match event {
                        Ok(event) => self.handle_event(event).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }

    async fn handle_event(&self, event: EngineEvent) {
        if event.topic == topics::TRIGGER_FIRED {
            return;
        }
        let triggers = match self.store.list_triggers().await {
            Ok(triggers) => triggers,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list triggers for event dispatch");
                return;
            }
        };
        for trigger in triggers {
            if !trigger.enabled {
                continue;
            }
            let TriggerSpec::Event { topic, filter: _ } = &trigger.spec else {
                continue;
            };
            if !topic_matches(topic, &event.topic) {
                continue;
            }
            if self.in_cooldown(&trigger.id).await {
                continue;
            }
            let mut vars = HashMap::new();
            if let Some(obj) = event.data.as_object() {
                for (key, value) in obj {
                    let rendered = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    vars.insert(format!("event_{key}"), rendered);
                }
            }
            self.fire(trigger, "event", vars).await;
        }
    }

    async fn in_cooldown(&self, trigger_id: &str) -> bool {
        let state = self.state.lock().await;
        state
            .cooldown_until_ms
            .get(trigger_id)
            .map(|until| now_ms() < *until)
            .unwrap_or(false)
    }

    /// Invoked synchronously by the HTTP layer for a webhook trigger; the
    /// payload becomes trigger variables directly (no `event_` prefix,
    /// unlike event triggers, since the caller already shaped the payload).
    pub async fn fire_webhook(&self, path: &str, payload: HashMap<String, String>) -> bool {
        let triggers = match self.store.list_triggers().await {
            Ok(triggers) => triggers,
            Err(_) => return false,
        };
        for trigger in triggers {
            if !trigger.enabled {
                continue;
            }
            if let TriggerSpec::Webhook { path: trigger_path, .. } = &trigger.spec {
                if trigger_path == path {
                    if self.in_cooldown(&trigger.id).await {
                        return false;
                    }
                    self.fire(trigger, "webhook", payload).await;
                    return true;
                }
            }
        }
        false
    }

    async fn fire(&self, mut trigger: Trigger, trigger_type: &str, extra_vars: HashMap<String, String>) {
        if trigger.approval_required {
            self.pending_approval.lock().await.insert(trigger.id.clone(), trigger.clone());
            self.events.emit(
                topics::TRIGGER_APPROVAL_PENDING,
                json!({"trigger_id": trigger.id, "trigger_name": trigger.name}),
                now_ms(),
            );
            self.finish_running(&trigger.id).await;
            return;
        }
        self.dispatch_trigger(&trigger, trigger_type, extra_vars).await;

        let fired_at = now_ms();
        trigger.last_fired_at_ms = Some(fired_at);
        if trigger.cooldown_secs > 0 {
            self.state
                .lock()
                .await
                .cooldown_until_ms
                .insert(trigger.id.clone(), fired_at + trigger.cooldown_secs * 1000);
        }
        self.store.put_trigger(&trigger).await.ok();
        self.events.emit(
            topics::TRIGGER_FIRED,
            json!({"trigger_id": trigger.id, "trigger_name": trigger.name, "type": trigger_type}),
            fired_at,
        );
        self.finish_running(&trigger.id).await;
    }

    async fn finish_running(&self, trigger_id: &str) {
        self.state.lock().await.running.remove(trigger_id);
    }

    /// Approves a held trigger firing, dispatching it immediately.
    pub async fn approve(&self, trigger_id: &str) -> bool {
        let Some(trigger) = self.pending_approval.lock().await.remove(trigger_id) else {
            return false;
        };
        self.dispatch_trigger(&trigger, "cron", HashMap::new()).await;
        let fired_at = now_ms();
        let mut trigger = trigger;
        trigger.last_fired_at_ms = Some(fired_at);
        self.store.put_trigger(&trigger).await.ok();
        self.events.emit(
            topics::TRIGGER_FIRED,
            json!({"trigger_id": trigger.id, "trigger_name": trigger.name, "type": "cron_approved"}),
            fired_at,
        );
        true
    }

    pub async fn pending_approvals(&self) -> Vec<Trigger> {
        self.pending_approval.lock().await.values().cloned().collect()
    }

    async fn dispatch_trigger(&self, trigger: &Trigger, trigger_type: &str, extra_vars: HashMap<String, String>) {
        let mut vars = trigger.variables.clone();
        vars.extend(extra_vars);
        vars.insert("_trigger_name".to_string(), trigger.name.clone());
        vars.insert("_trigger_type".to_string(), trigger_type.to_string());
        vars.insert("_trigger_time".to_string(), now_ms().to_string());

        match trigger.action {
            TriggerAction::RunWorkflow => {
                let workflow = self.workflows.read().await.get(&trigger.target).cloned();
                let Some(workflow) = workflow else {
                    tracing::warn!(trigger = %trigger.id, workflow = %trigger.target, "trigger references unknown workflow");
                    return;
                };
                let engine = self.workflow_engine.clone();
                tokio::spawn(async move {
                    engine.run(&workflow, vars, HashMap::new(), gantry_types::RunMode::Live).await;
                });
            }
            TriggerAction::DispatchTask => {
                let prompt = vars.get("prompt").cloned().unwrap_or_default();
                let task = Task::new(trigger.target.clone(), prompt);
                let dispatcher = self.dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher.dispatch(task).await;
                });
            }
        }
    }
}
