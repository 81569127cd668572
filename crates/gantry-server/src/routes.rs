use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;

use gantry_types::{CronJob, GantryError, OfflineQueueEntry, RunMode, Task, TriggerSpec, Workflow};

use crate::{ApiError, ApiResult, AppState};

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Crude pre-dispatch estimate, mirroring the Dispatcher's own admission
/// heuristic (per-1k-character flat rate) so `/dispatch/estimate` previews
/// the same number the dispatcher will actually gate on.
fn estimate_cost_usd(prompt: &str) -> f64 {
    const USD_PER_1K_CHARS: f64 = 0.002;
    (prompt.len() as f64 / 1000.0) * USD_PER_1K_CHARS
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/dispatch", post(dispatch))
        .route("/dispatch/estimate", post(dispatch_estimate))
        .route("/dispatch/{id}", get(get_task))
        .route("/cancel/{id}", post(cancel_task))
        .route("/tasks/running", get(list_running))
        .route("/route", post(route_provider))
        .route("/route/classify", post(route_classify))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/history", get(session_history))
        .route("/sessions/{id}/archive", post(archive_session))
        .route("/sessions/{id}/stream", get(session_stream))
        .route("/workflows", get(list_workflows).post(put_workflow))
        .route("/workflows/{name}", get(get_workflow))
        .route("/workflows/{name}/run", post(run_workflow))
        .route("/workflow-runs", get(list_workflow_runs))
        .route("/workflow-runs/{id}", get(get_workflow_run))
        .route("/triggers", get(list_triggers).post(put_trigger))
        .route("/triggers/{id}", axum::routing::delete(delete_trigger))
        .route("/triggers/{id}/approve", post(approve_trigger))
        .route("/triggers/{name}/fire", post(fire_trigger))
        .route("/webhooks/{name}", post(fire_webhook))
        .route("/cron-jobs", get(list_cron_jobs).post(put_cron_job))
        .route("/cron-jobs/{id}", axum::routing::delete(delete_cron_job))
        .route("/cron-jobs/{id}/approve", post(approve_cron_job))
        .route("/cron-jobs/{id}/run", post(run_cron_job_now))
        .route("/circuits", get(list_circuits))
        .route("/circuits/{provider}/reset", post(reset_circuit))
        .route("/queue", get(list_queue))
        .route("/budget", get(list_budget))
        .route("/budget/pause", post(pause_budget))
        .route("/budget/resume", post(resume_budget))
        .route("/history", get(list_history))
        .route("/history/{id}", get(get_history_entry))
        .route("/stats/cost", get(stats_cost))
        .route("/stats/metrics", get(stats_metrics))
}

async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let paused = state.governor.budget.is_paused().await;
    Json(json!({
        "status": "ok",
        "paused": paused,
        "running_tasks": state.dispatcher.state.list_running().await.len(),
    }))
}

// -- dispatch --------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DispatchInput {
    agent: String,
    prompt: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    budget_usd: Option<f64>,
    #[serde(default)]
    sandbox: bool,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    parent_id: Option<String>,
}

impl DispatchInput {
    fn into_task(self) -> Task {
        let mut task = Task::new(self.agent, self.prompt);
        task.model = self.model;
        task.provider = self.provider;
        task.session_id = self.session_id;
        task.budget_usd = self.budget_usd;
        task.sandbox = self.sandbox;
        task.parent_id = self.parent_id;
        if let Some(secs) = self.timeout_secs {
            task.timeout = Duration::from_secs(secs);
        }
        task
    }
}

async fn dispatch(State(state): State<AppState>, Json(input): Json<DispatchInput>) -> Json<Value> {
    let task = input.into_task();
    let result = state.dispatcher.dispatch(task).await;
    Json(serde_json::to_value(result).unwrap_or_else(|_| json!({})))
}

#[derive(Debug, Deserialize)]
struct EstimateInput {
    prompt: String,
}

#[derive(Debug, Serialize)]
struct EstimateOutput {
    estimated_cost_usd: f64,
}

async fn dispatch_estimate(Json(input): Json<EstimateInput>) -> Json<EstimateOutput> {
    Json(EstimateOutput {
        estimated_cost_usd: estimate_cost_usd(&input.prompt),
    })
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let task = state
        .store
        .get_task(&id)
        .await
        .map_err(|e| GantryError::Internal(e.to_string()))?
        .ok_or_else(|| GantryError::BadRequest(format!("task `{id}` not found")))?;
    let result = state
        .store
        .get_history_entry(&id)
        .await
        .map_err(|e| GantryError::Internal(e.to_string()))?;
    Ok(Json(json!({"task": task, "result": result})))
}

async fn cancel_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let cancelled = state.dispatcher.cancel(&id).await;
    if !cancelled {
        return Err(GantryError::BadRequest(format!("task `{id}` is not running")).into());
    }
    Ok(Json(json!({"cancelled": true})))
}

async fn list_running(State(state): State<AppState>) -> Json<Value> {
    let running = state.dispatcher.state.list_running().await;
    Json(json!(running))
}

// -- routing preview ---------------------------------------------------

#[derive(Debug, Deserialize)]
struct RouteInput {
    chain: Vec<String>,
}

async fn route_provider(State(state): State<AppState>, Json(input): Json<RouteInput>) -> ApiResult<Json<Value>> {
    let provider = state.governor.select_from_chain(&input.chain, now_ms()).await?;
    Ok(Json(json!({"provider": provider})))
}

#[derive(Debug, Deserialize)]
struct ClassifyInput {
    prompt: String,
}

/// Keyword heuristic only — there is no dedicated classifier model wired
/// in, so this picks the built-in agent whose purpose best matches a few
/// trigger words and falls back to `general`.
async fn route_classify(Json(input): Json<ClassifyInput>) -> Json<Value> {
    let lower = input.prompt.to_lowercase();
    let agent = if lower.contains("review") {
        "reviewer"
    } else if lower.contains("research") || lower.contains("investigate") {
        "researcher"
    } else if lower.contains("summarize") || lower.contains("summary") {
        "summary"
    } else {
        "general"
    };
    Json(json!({"agent": agent}))
}

// -- sessions -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateSessionInput {
    agent: String,
    #[serde(default)]
    source: Option<String>,
}

async fn create_session(State(state): State<AppState>, Json(input): Json<CreateSessionInput>) -> ApiResult<Json<Value>> {
    let session = state.sessions.create(&input.agent, input.source, now_ms()).await?;
    Ok(Json(json!(session)))
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let session = state.sessions.get(&id).await?;
    Ok(Json(json!(session)))
}

async fn session_history(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let history = state.sessions.history(&id).await?;
    Ok(Json(json!(history)))
}

async fn archive_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    state.sessions.archive(&id, now_ms()).await?;
    Ok(Json(json!({"archived": true})))
}

/// Tails the bus for events correlated to this session, either directly
/// (`EngineEvent::session_id`) or via the session id embedded in a task
/// payload (most task/workflow events only carry `task_id`/`workflow_run_id`
/// since they're emitted before a session association is known).
async fn session_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let receiver = state.events.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(move |item| {
        let event = item.ok()?;
        let matches = event.session_id.as_deref() == Some(id.as_str())
            || event.data.get("session_id").and_then(Value::as_str) == Some(id.as_str());
        if !matches {
            return None;
        }
        let data = serde_json::to_string(&event).unwrap_or_default();
        Some(Ok(SseEvent::default().event(event.topic).data(data)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// -- workflows ------------------------------------------------------------

async fn list_workflows(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.supervisor.workflows().list().await))
}

async fn get_workflow(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<Value>> {
    let workflow = state
        .supervisor
        .workflows()
        .get(&name)
        .await
        .ok_or_else(|| GantryError::WorkflowInvalid(format!("workflow `{name}` not found")))?;
    Ok(Json(json!(workflow)))
}

/// Persists the posted definition to `.gantry/workflow/<name>.yaml` and
/// reloads the registry, rather than mutating an in-memory map directly —
/// the file is the source of truth so a daemon restart sees the same set.
async fn put_workflow(State(state): State<AppState>, Json(workflow): Json<Workflow>) -> ApiResult<Json<Value>> {
    let root = state.supervisor.workspace_root();
    let dir = root.join(".gantry").join("workflow");
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| GantryError::Internal(e.to_string()))?;
    let yaml = serde_yaml::to_string(&workflow).map_err(|e| GantryError::BadRequest(e.to_string()))?;
    tokio::fs::write(dir.join(format!("{}.yaml", workflow.name)), yaml)
        .await
        .map_err(|e| GantryError::Internal(e.to_string()))?;
    state
        .supervisor
        .workflows()
        .reload(root)
        .await
        .map_err(|e| GantryError::Internal(e.to_string()))?;
    Ok(Json(json!({"saved": workflow.name})))
}

#[derive(Debug, Deserialize, Default)]
struct RunWorkflowInput {
    #[serde(default)]
    variables: HashMap<String, String>,
    #[serde(default)]
    dry_run: bool,
}

async fn run_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(input): Json<RunWorkflowInput>,
) -> ApiResult<Json<Value>> {
    let workflow = state
        .supervisor
        .workflows()
        .get(&name)
        .await
        .ok_or_else(|| GantryError::WorkflowInvalid(format!("workflow `{name}` not found")))?;
    let mode = if input.dry_run { RunMode::DryRun } else { RunMode::Live };
    let run = state.workflow_engine.run(&workflow, input.variables, HashMap::new(), mode).await;
    Ok(Json(json!(run)))
}

#[derive(Debug, Deserialize, Default)]
struct WorkflowRunsQuery {
    workflow: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_workflow_runs(State(state): State<AppState>, Query(query): Query<WorkflowRunsQuery>) -> ApiResult<Json<Value>> {
    let runs = state
        .store
        .list_workflow_runs(query.workflow.as_deref(), query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await
        .map_err(|e| GantryError::Internal(e.to_string()))?;
    Ok(Json(json!(runs)))
}

async fn get_workflow_run(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let run = state
        .store
        .get_workflow_run(&id)
        .await
        .map_err(|e| GantryError::Internal(e.to_string()))?
        .ok_or_else(|| GantryError::BadRequest(format!("workflow run `{id}` not found")))?;
    Ok(Json(json!(run)))
}

// -- triggers / cron / webhooks -------------------------------------------

async fn list_triggers(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let triggers = state.store.list_triggers().await.map_err(|e| GantryError::Internal(e.to_string()))?;
    Ok(Json(json!(triggers)))
}

async fn put_trigger(State(state): State<AppState>, Json(trigger): Json<gantry_types::Trigger>) -> ApiResult<Json<Value>> {
    state.store.put_trigger(&trigger).await.map_err(|e| GantryError::Internal(e.to_string()))?;
    Ok(Json(json!({"saved": trigger.id})))
}

async fn delete_trigger(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    state.store.delete_trigger(&id).await.map_err(|e| GantryError::Internal(e.to_string()))?;
    Ok(Json(json!({"deleted": id})))
}

/// Only webhook-kind triggers can be fired through this path — cron/event
/// triggers run on the scheduler's own ticker and have no public "fire now
/// by name" entry point short of `/triggers/{id}/approve` for a held
/// approval.
async fn fire_trigger(State(state): State<AppState>, Path(name): Path<String>, Json(payload): Json<HashMap<String, String>>) -> ApiResult<Json<Value>> {
    let triggers = state.store.list_triggers().await.map_err(|e| GantryError::Internal(e.to_string()))?;
    let trigger = triggers
        .into_iter()
        .find(|t| t.name == name)
        .ok_or_else(|| GantryError::TriggerNotFound(name.clone()))?;
    let TriggerSpec::Webhook { path, .. } = &trigger.spec else {
        return Err(GantryError::BadRequest(format!("trigger `{name}` is not webhook-backed")).into());
    };
    let fired = state.scheduler.fire_webhook(path, payload).await;
    Ok(Json(json!({"fired": fired})))
}

async fn fire_webhook(State(state): State<AppState>, Path(name): Path<String>, Json(payload): Json<HashMap<String, String>>) -> Json<Value> {
    let path = format!("/webhooks/{name}");
    let fired = state.scheduler.fire_webhook(&path, payload).await;
    Json(json!({"fired": fired}))
}

/// Releases a held cron-kind or event-kind trigger firing that is waiting
/// on `Trigger.approval_required`.
async fn approve_trigger(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let approved = state.scheduler.approve(&id).await;
    if !approved {
        return Err(GantryError::TriggerNotFound(id).into());
    }
    Ok(Json(json!({"approved": true})))
}

// -- cron jobs --------------------------------------------------------

async fn list_cron_jobs(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let jobs = state.store.list_cron_jobs().await.map_err(|e| GantryError::Internal(e.to_string()))?;
    Ok(Json(json!(jobs)))
}

async fn put_cron_job(State(state): State<AppState>, Json(job): Json<CronJob>) -> ApiResult<Json<Value>> {
    state.store.put_cron_job(&job).await.map_err(|e| GantryError::Internal(e.to_string()))?;
    Ok(Json(json!({"saved": job.id})))
}

async fn delete_cron_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    state.store.delete_cron_job(&id).await.map_err(|e| GantryError::Internal(e.to_string()))?;
    Ok(Json(json!({"deleted": id})))
}

async fn approve_cron_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let approved = state.scheduler.approve_cron_job(&id).await;
    if !approved {
        return Err(GantryError::CronJobNotFound(id).into());
    }
    Ok(Json(json!({"approved": true})))
}

async fn run_cron_job_now(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let fired = state.scheduler.fire_cron_job_now(&id).await.map_err(|e| GantryError::Internal(e.to_string()))?;
    if !fired {
        return Err(GantryError::CronJobNotFound(id).into());
    }
    Ok(Json(json!({"fired": true})))
}

// -- circuits / budget -----------------------------------------------------

async fn list_circuits(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.governor.circuit.snapshot().await))
}

async fn reset_circuit(State(state): State<AppState>, Path(provider): Path<String>) -> Json<Value> {
    state.governor.circuit.reset(&provider).await;
    Json(json!({"reset": provider}))
}

async fn list_budget(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "paused": state.governor.budget.is_paused().await,
        "counters": state.governor.budget.snapshot().await,
    }))
}

async fn pause_budget(State(state): State<AppState>) -> Json<Value> {
    state.governor.budget.pause().await;
    Json(json!({"paused": true}))
}

async fn resume_budget(State(state): State<AppState>) -> Json<Value> {
    state.governor.budget.resume().await;
    Json(json!({"paused": false}))
}

// -- offline queue -------------------------------------------------------

async fn list_queue(State(state): State<AppState>) -> ApiResult<Json<Vec<OfflineQueueEntry>>> {
    let entries = state.store.list_all_offline().await.map_err(|e| GantryError::Internal(e.to_string()))?;
    Ok(Json(entries))
}

// -- history ---------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct HistoryQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_history(State(state): State<AppState>, Query(query): Query<HistoryQuery>) -> ApiResult<Json<Value>> {
    let history = state
        .store
        .list_history(query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await
        .map_err(|e| GantryError::Internal(e.to_string()))?;
    Ok(Json(json!(history)))
}

async fn get_history_entry(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let entry = state
        .store
        .get_history_entry(&id)
        .await
        .map_err(|e| GantryError::Internal(e.to_string()))?
        .ok_or_else(|| GantryError::BadRequest(format!("history entry `{id}` not found")))?;
    Ok(Json(json!(entry)))
}

// -- stats -------------------------------------------------------------

/// Total spend across every budget counter, broken down by scope key. The
/// richer `/stats/trend`, `/stats/routing`, and `/stats/sla` breakdowns
/// named alongside this endpoint need time-bucketed aggregation this store
/// doesn't keep (it records running totals, not a timeseries) — left for a
/// dedicated metrics table rather than faked from what's here.
async fn stats_cost(State(state): State<AppState>) -> Json<Value> {
    let counters = state.governor.budget.snapshot().await;
    let total: f64 = counters.iter().map(|c| c.spent_usd).sum();
    Json(json!({"total_usd": total, "by_scope": counters}))
}

async fn stats_metrics(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "running_tasks": state.dispatcher.state.list_running().await.len(),
        "circuits": state.governor.circuit.snapshot().await,
        "budget_paused": state.governor.budget.is_paused().await,
    }))
}
