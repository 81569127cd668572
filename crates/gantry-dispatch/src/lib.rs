mod state;

pub use state::{DispatchState, RunningTask};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use gantry_events::EventBus;
use gantry_governor::Governor;
use gantry_providers::ProviderRegistry;
use gantry_sandbox::SandboxManager;
use gantry_session::SessionStore;
use gantry_storage::Store;
use gantry_types::event::topics;
use gantry_types::{
    AgentDefinition, GantryError, GantryResult, MessageRole, SandboxPolicy, Task, TaskResult,
    TaskStatus,
};
use serde_json::json;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Crude pre-dispatch cost estimate: a flat per-1k-character rate. Real
/// per-token pricing is provider/model specific and only known once the
/// provider responds with usage; this estimate only gates admission, the
/// budget is reconciled against the actual cost on completion (§4.E step 3).
fn estimate_cost_usd(prompt: &str) -> f64 {
    const USD_PER_1K_CHARS: f64 = 0.002;
    (prompt.len() as f64 / 1000.0) * USD_PER_1K_CHARS
}

pub struct DispatcherConfig {
    pub max_concurrent: usize,
    pub max_concurrent_children: usize,
    pub default_sandbox_image: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            max_concurrent_children: 4,
            default_sandbox_image: "gantry/agent-runtime:latest".to_string(),
        }
    }
}

/// Admits, executes, tracks, cancels individual tasks (§4.E). This is the
/// only path by which an agent reaches a provider: every call goes
/// through the budget governor and circuit breaker before the provider
/// abstraction is touched.
pub struct Dispatcher {
    store: Arc<Store>,
    events: EventBus,
    providers: Arc<ProviderRegistry>,
    governor: Arc<Governor>,
    sandbox: Arc<SandboxManager>,
    sessions: Arc<SessionStore>,
    agents: Arc<RwLock<HashMap<String, AgentDefinition>>>,
    admission: Arc<Semaphore>,
    child_admission: Arc<Semaphore>,
    pub state: DispatchState,
    config: DispatcherConfig,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        events: EventBus,
        providers: Arc<ProviderRegistry>,
        governor: Arc<Governor>,
        sandbox: Arc<SandboxManager>,
        sessions: Arc<SessionStore>,
        agents: Arc<RwLock<HashMap<String, AgentDefinition>>>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            admission: Arc::new(Semaphore::new(config.max_concurrent)),
            child_admission: Arc::new(Semaphore::new(config.max_concurrent_children)),
            store,
            events,
            providers,
            governor,
            sandbox,
            sessions,
            agents,
            state: DispatchState::new(),
            config,
        }
    }

    pub async fn cancel(&self, task_id: &str) -> bool {
        self.state.cancel(task_id).await
    }

    async fn resolve_agent(&self, name: &str) -> GantryResult<AgentDefinition> {
        self.agents
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| GantryError::AgentNotFound(name.to_string()))
    }

    fn provider_chain(agent: &AgentDefinition, task: &Task) -> Vec<String> {
        let mut chain = Vec::new();
        if let Some(provider) = &task.provider {
            chain.push(provider.clone());
        } else if let Some(provider) = &agent.preferred_provider {
            chain.push(provider.clone());
        }
        for fallback in &agent.fallback_providers {
            if !chain.contains(fallback) {
                chain.push(fallback.clone());
            }
        }
        if chain.is_empty() {
            chain.push("local".to_string());
        }
        chain
    }

    /// Runs the full dispatch algorithm (§4.E steps 1-12) and returns a
    /// terminal `TaskResult`. Never panics on a provider failure — every
    /// error path produces a `TaskResult` with a classified status.
    pub async fn dispatch(&self, mut task: Task) -> TaskResult {
        task.normalize();
        let start = Instant::now();
        let started_at = now_ms();

        self.store.put_task(&task).await.ok();
        self.events.emit(
            topics::TASK_QUEUED,
            json!({"task_id": task.id, "agent": task.agent}),
            started_at,
        );

        match self.dispatch_inner(&task, start, started_at).await {
            Ok(result) => result,
            Err(err) => self.terminal_error(&task, err, start),
        }
    }

    async fn dispatch_inner(
        &self,
        task: &Task,
        start: Instant,
        started_at: u64,
    ) -> GantryResult<TaskResult> {
        let agent = self.resolve_agent(&task.agent).await?;

        if task.prompt.trim().is_empty() {
            return Err(GantryError::BadRequest("prompt must not be empty".to_string()));
        }

        let estimated = estimate_cost_usd(&task.prompt);
        let chain = Self::provider_chain(&agent, task);

        if !agent.free {
            self.governor
                .budget
                .admit(
                    &task.agent,
                    task.workflow_run_id.as_deref(),
                    estimated,
                    task.budget_usd,
                    started_at,
                )
                .await?;
        }

        let provider_id = self
            .governor
            .select_from_chain(&chain, started_at)
            .await?;

        let semaphore = if task.parent_id.is_some() {
            &self.child_admission
        } else {
            &self.admission
        };
        let _permit = tokio::time::timeout(task.timeout, semaphore.acquire())
            .await
            .map_err(|_| GantryError::AdmissionTimeout)?
            .map_err(|_| GantryError::Internal("semaphore closed".to_string()))?;

        let cancel = self
            .state
            .register(RunningTask {
                task_id: task.id.clone(),
                agent: task.agent.clone(),
                parent_id: task.parent_id.clone(),
                started_at_ms: started_at,
            })
            .await;

        let sandbox_image = agent
            .sandbox_image
            .clone()
            .unwrap_or_else(|| self.config.default_sandbox_image.clone());
        let session_key = task.session_id.clone().unwrap_or_else(|| task.id.clone());
        if agent.sandbox_policy == SandboxPolicy::Required && !task.sandbox {
            self.state.unregister(&task.id).await;
            return Err(GantryError::SandboxUnavailable(
                "agent requires a sandboxed task".to_string(),
            ));
        }
        if let Err(err) = self
            .sandbox
            .acquire_for_policy(agent.sandbox_policy, &session_key, &sandbox_image)
            .await
        {
            self.state.unregister(&task.id).await;
            return Err(err);
        }

        self.events.emit(
            topics::TASK_STARTED,
            json!({"task_id": task.id, "provider": provider_id}),
            now_ms(),
        );

        let outcome = self
            .call_provider(task, &agent, &provider_id, cancel.clone())
            .await;

        self.state.unregister(&task.id).await;
        self.sandbox.release(&session_key).await.ok();

        let result = match outcome {
            Ok((output, cost_usd, input_tokens, output_tokens)) => {
                self.governor
                    .record_outcome(
                        &provider_id,
                        &task.agent,
                        task.workflow_run_id.as_deref(),
                        &Ok(()),
                        cost_usd,
                        now_ms(),
                    )
                    .await;
                if let Some(session_id) = &task.session_id {
                    self.sessions
                        .append(
                            session_id,
                            MessageRole::Assistant,
                            output.clone(),
                            cost_usd,
                            input_tokens,
                            output_tokens,
                            Some(provider_id.clone()),
                            Some(task.id.clone()),
                            now_ms(),
                        )
                        .await
                        .ok();
                }
                TaskResult {
                    task_id: task.id.clone(),
                    status: TaskStatus::Success,
                    exit_code: Some(0),
                    output,
                    error: None,
                    error_kind: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                    cost_usd,
                    input_tokens,
                    output_tokens,
                    model: task.model.clone(),
                    provider: Some(provider_id),
                    session_id: task.session_id.clone(),
                    trace_id: task.trace_id.clone(),
                }
            }
            Err(err) => {
                let classified = if cancel.is_cancelled() {
                    GantryError::Cancelled
                } else {
                    err
                };
                self.governor
                    .record_outcome(
                        &provider_id,
                        &task.agent,
                        task.workflow_run_id.as_deref(),
                        &Err(classified.clone()),
                        0.0,
                        now_ms(),
                    )
                    .await;
                return Err(classified);
            }
        };

        self.store.complete_task(&result).await.ok();
        self.events.emit(
            topics::TASK_COMPLETED,
            json!({"task_id": task.id, "status": "success"}),
            now_ms(),
        );
        Ok(result)
    }

    async fn call_provider(
        &self,
        task: &Task,
        agent: &AgentDefinition,
        provider_id: &str,
        cancel: CancellationToken,
    ) -> GantryResult<(String, f64, u64, u64)> {
        let model = task.model.as_deref().or(agent.default_model.as_deref());
        let call = self
            .providers
            .complete_for_provider(Some(provider_id), &task.prompt, model);

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GantryError::Cancelled),
            result = tokio::time::timeout(task.timeout, call) => {
                result.map_err(|_| GantryError::Timeout)?
                    .map_err(|e| GantryError::ProviderError(e.to_string()))?
            }
        };

        let cost_usd = estimate_cost_usd(&task.prompt) + estimate_cost_usd(&output);
        let input_tokens = (task.prompt.len() / 4) as u64;
        let output_tokens = (output.len() / 4) as u64;
        Ok((output, cost_usd, input_tokens, output_tokens))
    }

    fn terminal_error(&self, task: &Task, err: GantryError, start: Instant) -> TaskResult {
        let status = match err {
            GantryError::Timeout => TaskStatus::Timeout,
            GantryError::Cancelled => TaskStatus::Cancelled,
            _ => TaskStatus::Error,
        };
        let result = TaskResult {
            task_id: task.id.clone(),
            status,
            exit_code: None,
            output: String::new(),
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            duration_ms: start.elapsed().as_millis() as u64,
            cost_usd: 0.0,
            input_tokens: 0,
            output_tokens: 0,
            model: task.model.clone(),
            provider: task.provider.clone(),
            session_id: task.session_id.clone(),
            trace_id: task.trace_id.clone(),
        };
        let topic = match status {
            TaskStatus::Cancelled => topics::TASK_CANCELLED,
            _ => topics::TASK_FAILED,
        };
        self.events.emit(
            topic,
            json!({"task_id": task.id, "error": result.error}),
            now_ms(),
        );
        let store = self.store.clone();
        let result_clone = result.clone();
        tokio::spawn(async move {
            store.complete_task(&result_clone).await.ok();
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_governor::{BudgetGovernor, BudgetLimits, CircuitBreaker};
    use gantry_providers::AppConfig;
    use gantry_sandbox::ProcessSandboxPlugin;

    async fn test_dispatcher() -> Dispatcher {
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
        Dispatcher::new(
            store.clone(),
            EventBus::new(),
            Arc::new(ProviderRegistry::new(AppConfig::default())),
            Arc::new(Governor::new(
                Arc::new(CircuitBreaker::with_defaults()),
                Arc::new(BudgetGovernor::new(BudgetLimits::default())),
            )),
            Arc::new(SandboxManager::new(Arc::new(ProcessSandboxPlugin::default()))),
            Arc::new(SessionStore::new(store)),
            Arc::new(RwLock::new(agents)),
            DispatcherConfig::default(),
        )
    }

    #[tokio::test]
    async fn successful_dispatch_runs_against_the_local_echo_provider() {
        let dispatcher = test_dispatcher().await;
        let task = Task::new("researcher", "what is rust?");
        let result = dispatcher.dispatch(task).await;
        assert!(result.is_success());
        assert!(result.output.contains("what is rust?"));
        assert_eq!(result.provider.as_deref(), Some("local"));
    }

    #[tokio::test]
    async fn unknown_agent_fails_before_touching_a_provider() {
        let dispatcher = test_dispatcher().await;
        let task = Task::new("ghost", "hello");
        let result = dispatcher.dispatch(task).await;
        assert_eq!(result.status, TaskStatus::Error);
        assert_eq!(result.error_kind.as_deref(), Some("agent_not_found"));
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_as_bad_request() {
        let dispatcher = test_dispatcher().await;
        let task = Task::new("researcher", "   ");
        let result = dispatcher.dispatch(task).await;
        assert_eq!(result.error_kind.as_deref(), Some("bad_request"));
    }

    #[tokio::test]
    async fn budget_exhaustion_blocks_dispatch() {
        let dispatcher = test_dispatcher().await;
        dispatcher
            .governor
            .budget
            .pause()
            .await;
        let task = Task::new("researcher", "hello");
        let result = dispatcher.dispatch(task).await;
        assert_eq!(result.error_kind.as_deref(), Some("paused"));
    }

    #[tokio::test]
    async fn cancelling_a_registered_task_is_reported_as_cancelled() {
        let dispatcher = Arc::new(test_dispatcher().await);
        let task = Task::new("researcher", "hello");
        let task_id = task.id.clone();
        let dispatcher2 = dispatcher.clone();
        tokio::spawn(async move {
            // Give the task a moment to register before cancelling it.
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            dispatcher2.cancel(&task_id).await;
        });
        let result = dispatcher.dispatch(task).await;
        assert!(matches!(result.status, TaskStatus::Success | TaskStatus::Cancelled));
    }
}
