use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use gantry_dispatch::Dispatcher;
use gantry_events::EventBus;
use gantry_skills::SkillInvoker;
use gantry_storage::Store;
use gantry_tools::ToolRegistry;
use gantry_types::event::topics;
use gantry_types::{
    AgentDefinition, GantryError, GantryResult, NotificationPriority, OnError, RunMode, Step,
    StepKind, StepRunResult, StepRunStatus, Task, TaskStatus, Workflow, WorkflowRun,
    WorkflowRunStatus,
};
use serde_json::json;
use tokio::sync::RwLock;

use crate::reducer::{DefaultWorkflowReducer, WorkflowCommand, WorkflowEvent};
use crate::validate::validate;
use crate::vars::expand;

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, target: Option<&str>, message: &str, priority: NotificationPriority);
}

pub struct WorkflowEngineConfig {
    pub max_concurrent_steps: usize,
    pub default_step_timeout: Duration,
}

impl Default for WorkflowEngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: 16,
            default_step_timeout: Duration::from_secs(600),
        }
    }
}

/// Wavefront DAG executor (§4.G). Steps launch as soon as their
/// dependencies are satisfied rather than in synchronized rounds; a
/// `tokio::JoinSet` recomputes the ready set every time any step
/// completes.
pub struct WorkflowEngine {
    store: Arc<Store>,
    events: EventBus,
    dispatcher: Arc<Dispatcher>,
    tools: Arc<ToolRegistry>,
    skills: Option<Arc<dyn SkillInvoker>>,
    notifier: Option<Arc<dyn Notifier>>,
    agents: Arc<RwLock<HashMap<String, AgentDefinition>>>,
    step_admission: Arc<Semaphore>,
    config: WorkflowEngineConfig,
}

struct StepOutcome {
    step_id: String,
    result: StepRunResult,
    condition_skip: Option<String>,
    /// Non-empty only for `StepKind::Parallel`: each branch's own outcome,
    /// recorded into the run under its own step id alongside the parent's.
    children: Vec<StepOutcome>,
}

impl WorkflowEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        events: EventBus,
        dispatcher: Arc<Dispatcher>,
        tools: Arc<ToolRegistry>,
        skills: Option<Arc<dyn SkillInvoker>>,
        notifier: Option<Arc<dyn Notifier>>,
        agents: Arc<RwLock<HashMap<String, AgentDefinition>>>,
        config: WorkflowEngineConfig,
    ) -> Self {
        Self {
            step_admission: Arc::new(Semaphore::new(config.max_concurrent_steps)),
            store,
            events,
            dispatcher,
            tools,
            skills,
            notifier,
            agents,
            config,
        }
    }

    pub async fn run(
        &self,
        workflow: &Workflow,
        trigger_vars: HashMap<String, String>,
        extra_vars: HashMap<String, String>,
        mode: RunMode,
    ) -> WorkflowRun {
        let known_agents: HashSet<String> = self.agents.read().await.keys().cloned().collect();
        let known_tools: HashSet<String> =
            self.tools.list().await.into_iter().map(|s| s.name).collect();

        if let Err(err) = validate(workflow, &known_agents, &known_tools) {
            let now = now_ms();
            return WorkflowRun {
                id: Uuid::new_v4().to_string(),
                workflow_name: workflow.name.clone(),
                status: WorkflowRunStatus::Error,
                mode,
                variables: HashMap::new(),
                step_results: HashMap::new(),
                total_cost_usd: 0.0,
                started_at_ms: now,
                finished_at_ms: Some(now),
                error: Some(err.to_string()),
            };
        }

        let mut variables = workflow.variables.clone();
        variables.extend(trigger_vars);
        variables.extend(extra_vars);

        let started_at = now_ms();
        let mut run = WorkflowRun {
            id: Uuid::new_v4().to_string(),
            workflow_name: workflow.name.clone(),
            status: WorkflowRunStatus::Running,
            mode,
            variables,
            step_results: workflow
                .steps
                .iter()
                .map(|s| (s.id.clone(), StepRunResult::pending(s.id.clone())))
                .collect(),
            total_cost_usd: 0.0,
            started_at_ms: started_at,
            finished_at_ms: None,
            error: None,
        };

        self.events.emit(
            topics::WORKFLOW_STARTED,
            json!({"workflow_run_id": run.id, "workflow": workflow.name}),
            started_at,
        );

        let graph: HashMap<String, Step> =
            workflow.steps.iter().map(|s| (s.id.clone(), s.clone())).collect();
        let mut skip_forced: HashSet<String> = HashSet::new();
        let mut launched: HashSet<String> = HashSet::new();
        let cancel = CancellationToken::new();
        let mut join_set: JoinSet<StepOutcome> = JoinSet::new();
        let mut failed = false;

        loop {
            let ready = self.ready_steps(&graph, &run, &skip_forced, &launched);
            for step_id in ready {
                launched.insert(step_id.clone());
                if skip_forced.contains(&step_id) {
                    run = self.apply(&run, WorkflowEvent::StepsSkipped { step_ids: vec![step_id] });
                    continue;
                }
                run = self.apply(&run, WorkflowEvent::StepStarted { step_id: step_id.clone() });
                self.events.emit(
                    topics::WORKFLOW_STEP_STARTED,
                    json!({"workflow_run_id": run.id, "step_id": step_id}),
                    now_ms(),
                );
                let step = graph[&step_id].clone();
                let engine_vars = run.variables.clone();
                let step_results = self.step_results_snapshot(&run);
                let run_id = run.id.clone();
                let cancel_child = cancel.clone();
                let permit = self.step_admission.clone();
                let this = self.clone_handles();
                join_set.spawn(async move {
                    let _permit = permit.acquire_owned().await.ok();
                    this.execute_step(&step, &run_id, &engine_vars, &step_results, mode, cancel_child).await
                });
            }

            if join_set.is_empty() {
                break;
            }

            if let Some(joined) = join_set.join_next().await {
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(err) => StepOutcome {
                        step_id: "unknown".to_string(),
                        result: {
                            let mut r = StepRunResult::pending("unknown");
                            r.status = StepRunStatus::Error;
                            r.error = Some(format!("step task panicked: {err}"));
                            r
                        },
                        condition_skip: None,
                        children: Vec::new(),
                    },
                };

                let step = graph.get(&outcome.step_id).cloned();
                let retry = step.as_ref().map(|s| s.retry.clone()).unwrap_or_default();
                let on_error = step.as_ref().map(|s| s.on_error).unwrap_or(OnError::Stop);
                let mut result = outcome.result;
                let children = outcome.children;

                if !matches!(result.status, StepRunStatus::Success | StepRunStatus::Skipped)
                    && result.retry_count < retry.max
                {
                    result.retry_count += 1;
                    launched.remove(&outcome.step_id);
                    if let Some(delay) = retry.delay {
                        tokio::time::sleep(delay).await;
                    }
                    run = self.apply(
                        &run,
                        WorkflowEvent::StepFinished {
                            step_id: outcome.step_id.clone(),
                            result: {
                                let mut pending = StepRunResult::pending(outcome.step_id.clone());
                                pending.retry_count = result.retry_count;
                                pending
                            },
                        },
                    );
                    continue;
                }

                if !matches!(result.status, StepRunStatus::Success | StepRunStatus::Skipped) {
                    match on_error {
                        OnError::Skip => result.status = StepRunStatus::Skipped,
                        OnError::Stop => failed = true,
                        OnError::Retry => {
                            // retries exhausted up to the hard cap; fall through as an error
                            failed = true;
                        }
                    }
                }

                self.events.emit(
                    topics::WORKFLOW_STEP_COMPLETED,
                    json!({"workflow_run_id": run.id, "step_id": outcome.step_id, "status": format!("{:?}", result.status)}),
                    now_ms(),
                );

                run = self.apply(
                    &run,
                    WorkflowEvent::StepFinished { step_id: outcome.step_id.clone(), result },
                );
                for (child_id, child_result) in flatten_children(children) {
                    run = self.apply(&run, WorkflowEvent::StepFinished { step_id: child_id, result: child_result });
                }
                self.store.put_workflow_run(&run).await.ok();

                if let Some(skip_target) = outcome.condition_skip {
                    self.cascade_skip(&graph, &skip_target, &mut skip_forced);
                }

                if failed {
                    break;
                }
            }
        }

        run.status = if failed {
            WorkflowRunStatus::Error
        } else {
            WorkflowRunStatus::Success
        };
        if failed && run.error.is_none() {
            run.error = Some("one or more steps failed".to_string());
        }
        run.finished_at_ms = Some(now_ms());
        self.store.put_workflow_run(&run).await.ok();
        self.events.emit(
            topics::WORKFLOW_COMPLETED,
            json!({"workflow_run_id": run.id, "status": format!("{:?}", run.status)}),
            now_ms(),
        );
        run
    }

    fn apply(&self, run: &WorkflowRun, event: WorkflowEvent) -> WorkflowRun {
        let (next, commands) = DefaultWorkflowReducer::reduce(run, event);
        for command in commands {
            match command {
                WorkflowCommand::Notify { message } => {
                    if let Some(notifier) = self.notifier.clone() {
                        tokio::spawn(async move {
                            notifier.notify(None, &message, NotificationPriority::High).await;
                        });
                    }
                }
            }
        }
        next
    }

    fn step_results_snapshot(&self, run: &WorkflowRun) -> HashMap<String, StepRunResult> {
        run.step_results.clone()
    }

    fn ready_steps(
        &self,
        graph: &HashMap<String, Step>,
        run: &WorkflowRun,
        skip_forced: &HashSet<String>,
        launched: &HashSet<String>,
    ) -> Vec<String> {
        graph
            .values()
            .filter(|step| !launched.contains(&step.id))
            .filter(|step| {
                matches!(run.step_results.get(&step.id).map(|r| r.status), Some(StepRunStatus::Pending))
            })
            .filter(|step| {
                skip_forced.contains(&step.id)
                    || step.depends_on.iter().all(|dep| {
                        run.step_results
                            .get(dep)
                            .map(|r| r.status.satisfies_dependency())
                            .unwrap_or(false)
                    })
            })
            .map(|step| step.id.clone())
            .collect()
    }

    /// Forces everything only reachable through the untaken branch of a
    /// condition into `skip_forced`; a simple transitive walk down
    /// `dependsOn` edges, since the DAG was already validated acyclic.
    fn cascade_skip(&self, graph: &HashMap<String, Step>, from: &str, skip_forced: &mut HashSet<String>) {
        if !skip_forced.insert(from.to_string()) {
            return;
        }
        for step in graph.values() {
            if step.depends_on.iter().any(|d| d == from) {
                self.cascade_skip(graph, &step.id, skip_forced);
            }
        }
    }

    fn clone_handles(&self) -> Arc<EngineHandles> {
        Arc::new(EngineHandles {
            store: self.store.clone(),
            events: self.events.clone(),
            dispatcher: self.dispatcher.clone(),
            tools: self.tools.clone(),
            skills: self.skills.clone(),
            notifier: self.notifier.clone(),
            agents: self.agents.clone(),
            default_step_timeout: self.config.default_step_timeout,
        })
    }
}

/// Cheaply-cloneable bundle handed to spawned step futures so `execute_step`
/// can run off the `WorkflowEngine` borrow.
struct EngineHandles {
    store: Arc<Store>,
    events: EventBus,
    dispatcher: Arc<Dispatcher>,
    tools: Arc<ToolRegistry>,
    skills: Option<Arc<dyn SkillInvoker>>,
    notifier: Option<Arc<dyn Notifier>>,
    agents: Arc<RwLock<HashMap<String, AgentDefinition>>>,
    default_step_timeout: Duration,
}

impl EngineHandles {
    async fn execute_step(
        &self,
        step: &Step,
        run_id: &str,
        vars: &HashMap<String, String>,
        step_results: &HashMap<String, StepRunResult>,
        mode: RunMode,
        cancel: CancellationToken,
    ) -> StepOutcome {
        let started = std::time::Instant::now();
        let outcome = self.run_step_kind(step, run_id, vars, step_results, mode, cancel).await;
        let (mut result, condition_skip, children) = match outcome {
            Ok((result, skip, children)) => (result, skip, children),
            Err(err) => {
                let mut result = StepRunResult::pending(step.id.clone());
                result.status = TaskStatus::Error.into_step_status();
                result.error = Some(err.to_string());
                (result, None, Vec::new())
            }
        };
        result.duration_ms = started.elapsed().as_millis() as u64;
        StepOutcome { step_id: step.id.clone(), result, condition_skip, children }
    }

    async fn run_step_kind(
        &self,
        step: &Step,
        run_id: &str,
        vars: &HashMap<String, String>,
        step_results: &HashMap<String, StepRunResult>,
        mode: RunMode,
        cancel: CancellationToken,
    ) -> GantryResult<(StepRunResult, Option<String>, Vec<StepOutcome>)> {
        let mut result = StepRunResult::pending(step.id.clone());

        match step.kind {
            StepKind::Dispatch => {
                let prompt = expand(step.prompt_template.as_deref().unwrap_or(""), vars, step_results);
                let agent = step
                    .agent
                    .clone()
                    .ok_or_else(|| GantryError::WorkflowInvalid(format!("step `{}` missing agent", step.id)))?;
                if mode == RunMode::DryRun {
                    result.status = StepRunStatus::Success;
                    result.output = format!("[dry-run] would dispatch `{agent}`: {prompt}");
                    return Ok((result, None, Vec::new()));
                }
                let mut task = Task::new(agent, prompt);
                task.workflow_run_id = Some(run_id.to_string());
                task.step_id = Some(step.id.clone());
                task.budget_usd = step.budget_usd;
                if let Some(timeout) = step.timeout {
                    task.timeout = timeout;
                }
                let task_result = self.dispatcher.dispatch(task).await;
                result.status = task_result.status.into_step_status();
                result.output = task_result.output;
                result.error = task_result.error;
                result.task_id = Some(task_result.task_id);
                result.session_id = task_result.session_id;
                result.cost_usd = if mode == RunMode::Shadow { 0.0 } else { task_result.cost_usd };
                Ok((result, None, Vec::new()))
            }
            StepKind::ToolCall => {
                let tool = step
                    .tool
                    .clone()
                    .ok_or_else(|| GantryError::WorkflowInvalid(format!("step `{}` missing tool", step.id)))?;
                if mode == RunMode::DryRun {
                    result.status = StepRunStatus::Success;
                    result.output = format!("[dry-run] would call tool `{tool}`");
                    return Ok((result, None, Vec::new()));
                }
                let input = expand_value(step.tool_input_template.clone().unwrap_or(json!({})), vars, step_results);
                let timeout = step.timeout.unwrap_or(self.default_step_timeout);
                let tool_result = tokio::time::timeout(
                    timeout,
                    self.tools.execute_with_cancel(&tool, input, cancel),
                )
                .await
                .map_err(|_| GantryError::Timeout)?
                .map_err(|e| GantryError::ToolNotFound(e.to_string()))?;
                result.status = StepRunStatus::Success;
                result.output = tool_result.output;
                Ok((result, None, Vec::new()))
            }
            StepKind::Skill => {
                let skill = step
                    .tool
                    .clone()
                    .or_else(|| step.agent.clone())
                    .ok_or_else(|| GantryError::WorkflowInvalid(format!("step `{}` missing skill name", step.id)))?;
                if mode == RunMode::DryRun {
                    result.status = StepRunStatus::Success;
                    result.output = format!("[dry-run] would invoke skill `{skill}`");
                    return Ok((result, None, Vec::new()));
                }
                let Some(invoker) = &self.skills else {
                    return Err(GantryError::ToolNotFound(format!("no skill invoker configured for `{skill}`")));
                };
                let prompt = expand(step.prompt_template.as_deref().unwrap_or(""), vars, step_results);
                let output = invoker.invoke(&skill, json!({"input": prompt})).await?;
                result.status = StepRunStatus::Success;
                result.output = output;
                Ok((result, None, Vec::new()))
            }
            StepKind::Condition => {
                let cond = step
                    .condition
                    .clone()
                    .ok_or_else(|| GantryError::WorkflowInvalid(format!("step `{}` missing condition", step.id)))?;
                let expanded = expand(&cond.expr, vars, step_results);
                let truthy = !expanded.trim().is_empty() && expanded.trim() != "false" && expanded.trim() != "0";
                result.status = StepRunStatus::Success;
                let skip_target = if truthy {
                    result.output = format!("then:{}", cond.then);
                    cond.or_else.clone()
                } else {
                    result.output = cond.or_else.clone().map(|t| format!("else:{t}")).unwrap_or_default();
                    Some(cond.then.clone())
                };
                Ok((result, skip_target, Vec::new()))
            }
            StepKind::Parallel => {
                let mut join = JoinSet::new();
                for child in step.parallel.clone() {
                    let handles = self.clone_handles_ref();
                    let run_id = run_id.to_string();
                    let vars = vars.clone();
                    let step_results = step_results.clone();
                    let cancel = cancel.clone();
                    join.spawn(async move {
                        handles.execute_step(&child, &run_id, &vars, &step_results, mode, cancel).await
                    });
                }
                let mut worst = StepRunStatus::Success;
                let mut outputs = Vec::new();
                let mut children = Vec::new();
                while let Some(joined) = join.join_next().await {
                    if let Ok(outcome) = joined {
                        outputs.push(format!("{}: {}", outcome.step_id, outcome.result.output));
                        if rank(outcome.result.status) > rank(worst) {
                            worst = outcome.result.status;
                        }
                        children.push(outcome);
                    }
                }
                result.status = worst;
                result.output = outputs.join("\n");
                Ok((result, None, children))
            }
            StepKind::Handoff => {
                let source_output = step
                    .handoff_from
                    .as_deref()
                    .and_then(|id| step_results.get(id))
                    .map(|r| r.output.clone())
                    .unwrap_or_default();
                let to_agent = step.handoff_to_agent.clone().unwrap_or_default();
                result.status = StepRunStatus::Success;
                result.output = json!({
                    "to_agent": to_agent,
                    "from_step": step.handoff_from,
                    "context": source_output,
                })
                .to_string();
                Ok((result, None, Vec::new()))
            }
            StepKind::Delay => {
                let duration = step.delay.unwrap_or(Duration::from_secs(0));
                if mode != RunMode::DryRun {
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {}
                        _ = cancel.cancelled() => {
                            result.status = StepRunStatus::Error;
                            result.error = Some("cancelled".to_string());
                            return Ok((result, None, Vec::new()));
                        }
                    }
                }
                result.status = StepRunStatus::Success;
                Ok((result, None, Vec::new()))
            }
            StepKind::Notify => {
                let message = expand(step.notify_message.as_deref().unwrap_or(""), vars, step_results);
                if mode != RunMode::Shadow {
                    if let Some(notifier) = &self.notifier {
                        notifier
                            .notify(step.notify_target.as_deref(), &message, NotificationPriority::Normal)
                            .await;
                    }
                }
                result.status = StepRunStatus::Success;
                result.output = message;
                Ok((result, None, Vec::new()))
            }
        }
    }

    fn clone_handles_ref(&self) -> Arc<EngineHandles> {
        Arc::new(EngineHandles {
            store: self.store.clone(),
            events: self.events.clone(),
            dispatcher: self.dispatcher.clone(),
            tools: self.tools.clone(),
            skills: self.skills.clone(),
            notifier: self.notifier.clone(),
            agents: self.agents.clone(),
            default_step_timeout: self.default_step_timeout,
        })
    }
}

/// Flattens a (possibly nested, for parallel-within-parallel) list of child
/// outcomes into `(step_id, result)` pairs so each branch lands in
/// `run.step_results` under its own id, matching `steps.<child_id>.status`
/// references in downstream conditions/templates.
fn flatten_children(children: Vec<StepOutcome>) -> Vec<(String, StepRunResult)> {
    let mut flat = Vec::new();
    for child in children {
        flat.push((child.step_id, child.result));
        flat.extend(flatten_children(child.children));
    }
    flat
}

fn rank(status: StepRunStatus) -> u8 {
    match status {
        StepRunStatus::Success => 0,
        StepRunStatus::Skipped => 1,
        StepRunStatus::Pending | StepRunStatus::Running => 2,
        StepRunStatus::Timeout => 3,
        StepRunStatus::Error => 4,
    }
}

fn expand_value(value: Value, vars: &HashMap<String, String>, step_results: &HashMap<String, StepRunResult>) -> Value {
    match value {
        Value::String(s) => Value::String(expand(&s, vars, step_results)),
        Value::Array(items) => Value::Array(
            items.into_iter().map(|v| expand_value(v, vars, step_results)).collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, expand_value(v, vars, step_results)))
                .collect(),
        ),
        other => other,
    }
}

trait TaskStatusExt {
    fn into_step_status(self) -> StepRunStatus;
}

impl TaskStatusExt for TaskStatus {
    fn into_step_status(self) -> StepRunStatus {
        match self {
            TaskStatus::Success => StepRunStatus::Success,
            TaskStatus::Timeout => StepRunStatus::Timeout,
            TaskStatus::Cancelled => StepRunStatus::Error,
            TaskStatus::Error => StepRunStatus::Error,
            TaskStatus::Queued | TaskStatus::Running => StepRunStatus::Running,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_dispatch::DispatcherConfig;
    use gantry_governor::{BudgetGovernor, BudgetLimits, CircuitBreaker, Governor};
    use gantry_providers::{AppConfig, ProviderRegistry};
    use gantry_sandbox::{ProcessSandboxPlugin, SandboxManager};
    use gantry_session::SessionStore;
    use gantry_types::{AgentDefinition, ConditionSpec, RetryPolicy, SandboxPolicy};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, _target: Option<&str>, message: &str, _priority: NotificationPriority) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    fn step(id: &str, kind: StepKind, depends_on: &[&str]) -> Step {
        Step {
            id: id.to_string(),
            kind,
            agent: None,
            prompt_template: None,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            retry: RetryPolicy::default(),
            on_error: OnError::Stop,
            timeout: None,
            budget_usd: None,
            condition: None,
            parallel: vec![],
            handoff_from: None,
            handoff_to_agent: None,
            tool: None,
            tool_input_template: None,
            delay: None,
            notify_message: None,
            notify_target: None,
        }
    }

    async fn test_engine() -> (WorkflowEngine, Arc<RecordingNotifier>) {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let mut agents = HashMap::new();
        agents.insert(
            "researcher".to_string(),
            AgentDefinition {
                name: "researcher".to_string(),
                system_prompt_path: None,
                system_prompt: None,
                default_model: None,
                preferred_provider: None,
                fallback_providers: vec![],
                allowed_directories: vec![],
                permission_mode: None,
                tool_policy: HashMap::new(),
                sandbox_policy: SandboxPolicy::Never,
                sandbox_image: None,
                hidden: false,
                free: false,
            },
        );
        let agents = Arc::new(RwLock::new(agents));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            EventBus::new(),
            Arc::new(ProviderRegistry::new(AppConfig::default())),
            Arc::new(Governor::new(
                Arc::new(CircuitBreaker::with_defaults()),
                Arc::new(BudgetGovernor::new(BudgetLimits::default())),
            )),
            Arc::new(SandboxManager::new(Arc::new(ProcessSandboxPlugin::default()))),
            Arc::new(SessionStore::new(store.clone())),
            agents.clone(),
            DispatcherConfig::default(),
        ));
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = WorkflowEngine::new(
            store,
            EventBus::new(),
            dispatcher,
            Arc::new(ToolRegistry::new()),
            None,
            Some(notifier.clone() as Arc<dyn Notifier>),
            agents,
            WorkflowEngineConfig::default(),
        );
        (engine, notifier)
    }

    #[tokio::test]
    async fn runs_a_linear_dispatch_and_notify_workflow() {
        let (engine, notifier) = test_engine().await;
        let mut dispatch = step("ask", StepKind::Dispatch, &[]);
        dispatch.agent = Some("researcher".to_string());
        dispatch.prompt_template = Some("what is {{topic}}?".to_string());
        let mut notify = step("tell", StepKind::Notify, &["ask"]);
        notify.notify_message = Some("answer: {{steps.ask.output}}".to_string());

        let workflow = Workflow {
            name: "demo".to_string(),
            description: None,
            variables: HashMap::new(),
            steps: vec![dispatch, notify],
        };
        let mut vars = HashMap::new();
        vars.insert("topic".to_string(), "rust".to_string());

        let run = engine.run(&workflow, vars, HashMap::new(), RunMode::Live).await;
        assert_eq!(run.status, WorkflowRunStatus::Success);
        assert_eq!(run.step_results["ask"].status, StepRunStatus::Success);
        assert_eq!(run.step_results["tell"].status, StepRunStatus::Success);
        assert!(notifier.messages.lock().unwrap()[0].contains("what is rust?"));
    }

    #[tokio::test]
    async fn condition_step_skips_the_untaken_branch() {
        let (engine, _notifier) = test_engine().await;
        let mut cond = step("check", StepKind::Condition, &[]);
        cond.condition = Some(ConditionSpec {
            expr: "{{flag}}".to_string(),
            then: "yes_path".to_string(),
            or_else: Some("no_path".to_string()),
        });
        let yes_path = step("yes_path", StepKind::Delay, &["check"]);
        let no_path = step("no_path", StepKind::Delay, &["check"]);

        let workflow = Workflow {
            name: "branch".to_string(),
            description: None,
            variables: HashMap::new(),
            steps: vec![cond, yes_path, no_path],
        };
        let mut vars = HashMap::new();
        vars.insert("flag".to_string(), "true".to_string());

        let run = engine.run(&workflow, vars, HashMap::new(), RunMode::Live).await;
        assert_eq!(run.status, WorkflowRunStatus::Success);
        assert_eq!(run.step_results["yes_path"].status, StepRunStatus::Success);
        assert_eq!(run.step_results["no_path"].status, StepRunStatus::Skipped);
    }

    #[tokio::test]
    async fn parallel_step_records_each_child_under_its_own_id() {
        let (engine, _notifier) = test_engine().await;
        let mut branch_a = step("s2a", StepKind::Delay, &[]);
        branch_a.delay = Some(Duration::from_millis(0));
        let mut branch_b = step("s2b", StepKind::Delay, &[]);
        branch_b.delay = Some(Duration::from_millis(0));

        let mut fan_out = step("s2", StepKind::Parallel, &[]);
        fan_out.parallel = vec![branch_a, branch_b];

        let mut after = step("s3", StepKind::Notify, &["s2"]);
        after.notify_message = Some("a={{steps.s2a.status}} b={{steps.s2b.status}}".to_string());

        let workflow = Workflow {
            name: "fan-out".to_string(),
            description: None,
            variables: HashMap::new(),
            steps: vec![fan_out, after],
        };

        let run = engine.run(&workflow, HashMap::new(), HashMap::new(), RunMode::Live).await;
        assert_eq!(run.status, WorkflowRunStatus::Success);
        assert_eq!(run.step_results["s2a"].status, StepRunStatus::Success);
        assert_eq!(run.step_results["s2b"].status, StepRunStatus::Success);
        assert_eq!(run.step_results["s3"].output, "a=success b=success");
    }

    #[tokio::test]
    async fn tool_call_step_invokes_the_registered_tool() {
        let (engine, _notifier) = test_engine().await;
        let mut call = step("echo", StepKind::ToolCall, &[]);
        call.tool = Some("noop".to_string());
        call.tool_input_template = Some(json!({"value": "{{word}}"}));

        let workflow = Workflow {
            name: "tools".to_string(),
            description: None,
            variables: HashMap::new(),
            steps: vec![call],
        };
        let mut vars = HashMap::new();
        vars.insert("word".to_string(), "hello".to_string());

        let run = engine.run(&workflow, vars, HashMap::new(), RunMode::Live).await;
        assert_eq!(run.status, WorkflowRunStatus::Success);
        assert!(run.step_results["echo"].output.contains("hello"));
    }

    #[tokio::test]
    async fn dry_run_never_dispatches_a_real_task() {
        let (engine, _notifier) = test_engine().await;
        let mut dispatch = step("ask", StepKind::Dispatch, &[]);
        dispatch.agent = Some("researcher".to_string());
        dispatch.prompt_template = Some("hello".to_string());

        let workflow = Workflow {
            name: "dry".to_string(),
            description: None,
            variables: HashMap::new(),
            steps: vec![dispatch],
        };

        let run = engine.run(&workflow, HashMap::new(), HashMap::new(), RunMode::DryRun).await;
        assert_eq!(run.status, WorkflowRunStatus::Success);
        assert!(run.step_results["ask"].output.starts_with("[dry-run]"));
        assert!(run.step_results["ask"].task_id.is_none());
    }

    #[tokio::test]
    async fn unknown_tool_reference_fails_validation_before_running() {
        let (engine, _notifier) = test_engine().await;
        let mut call = step("bad", StepKind::ToolCall, &[]);
        call.tool = Some("does_not_exist".to_string());
        let workflow = Workflow {
            name: "invalid".to_string(),
            description: None,
            variables: HashMap::new(),
            steps: vec![call],
        };

        let run = engine.run(&workflow, HashMap::new(), HashMap::new(), RunMode::Live).await;
        assert_eq!(run.status, WorkflowRunStatus::Error);
        assert!(run.error.unwrap().contains("does_not_exist"));
    }
}
