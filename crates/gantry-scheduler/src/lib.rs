pub mod cron;
pub mod engine;

pub use engine::SchedulerEngine;

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_dispatch::{Dispatcher, DispatcherConfig};
    use gantry_events::EventBus;
    use gantry_governor::{BudgetGovernor, BudgetLimits, CircuitBreaker, Governor};
    use gantry_providers::{AppConfig, ProviderRegistry};
    use gantry_sandbox::{ProcessSandboxPlugin, SandboxManager};
    use gantry_session::SessionStore;
    use gantry_storage::Store;
    use gantry_tools::ToolRegistry;
    use gantry_types::{
        AgentDefinition, CronJob, MisfirePolicy, RunMode, SandboxPolicy, Trigger, TriggerAction,
        TriggerSpec, Workflow,
    };
    use gantry_workflow::{WorkflowEngine, WorkflowEngineConfig};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    async fn harness() -> (Arc<SchedulerEngine>, Arc<Store>, Arc<RwLock<HashMap<String, Workflow>>>) {
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
        let events = EventBus::new();
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            events.clone(),
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
        let workflows: Arc<RwLock<HashMap<String, Workflow>>> = Arc::new(RwLock::new(HashMap::new()));
        let workflow_engine = Arc::new(WorkflowEngine::new(
            store.clone(),
            events.clone(),
            dispatcher.clone(),
            Arc::new(ToolRegistry::new()),
            None,
            None,
            agents,
            WorkflowEngineConfig::default(),
        ));
        let scheduler = Arc::new(SchedulerEngine::new(
            store.clone(),
            events,
            dispatcher,
            workflow_engine,
            workflows.clone(),
        ));
        (scheduler, store, workflows)
    }

    #[tokio::test]
    async fn webhook_fires_a_matching_trigger() {
        let (scheduler, store, workflows) = harness().await;
        workflows.write().await.insert(
            "greet".to_string(),
            Workflow {
                name: "greet".to_string(),
                description: None,
                variables: HashMap::new(),
                steps: vec![],
            },
        );
        store
            .put_trigger(&Trigger {
                id: "t1".to_string(),
                name: "hook".to_string(),
                enabled: true,
                spec: TriggerSpec::Webhook { path: "/hooks/greet".to_string(), secret: None },
                action: TriggerAction::RunWorkflow,
                target: "greet".to_string(),
                variables: HashMap::new(),
                last_fired_at_ms: None,
                misfire_count: 0,
                cooldown_secs: 0,
                approval_required: false,
            })
            .await
            .unwrap();

        let fired = scheduler.fire_webhook("/hooks/greet", HashMap::new()).await;
        assert!(fired);
        let reloaded = store.list_triggers().await.unwrap();
        assert!(reloaded[0].last_fired_at_ms.is_some());
    }

    #[tokio::test]
    async fn unknown_webhook_path_does_not_fire() {
        let (scheduler, _store, _workflows) = harness().await;
        let fired = scheduler.fire_webhook("/hooks/ghost", HashMap::new()).await;
        assert!(!fired);
    }

    #[tokio::test]
    async fn approval_required_trigger_waits_for_explicit_approval() {
        let (scheduler, store, workflows) = harness().await;
        workflows.write().await.insert(
            "deploy".to_string(),
            Workflow {
                name: "deploy".to_string(),
                description: None,
                variables: HashMap::new(),
                steps: vec![],
            },
        );
        store
            .put_trigger(&Trigger {
                id: "t2".to_string(),
                name: "risky".to_string(),
                enabled: true,
                spec: TriggerSpec::Webhook { path: "/hooks/deploy".to_string(), secret: None },
                action: TriggerAction::RunWorkflow,
                target: "deploy".to_string(),
                variables: HashMap::new(),
                last_fired_at_ms: None,
                misfire_count: 0,
                cooldown_secs: 0,
                approval_required: true,
            })
            .await
            .unwrap();

        scheduler.fire_webhook("/hooks/deploy", HashMap::new()).await;
        let pending = scheduler.pending_approvals().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "t2");
        assert!(scheduler.approve("t2").await);
        assert!(scheduler.pending_approvals().await.is_empty());
    }

    fn cron_job(id: &str, approval_required: bool) -> CronJob {
        CronJob {
            id: id.to_string(),
            name: id.to_string(),
            expression: "* * * * *".to_string(),
            timezone: "UTC".to_string(),
            agent: "researcher".to_string(),
            prompt: "say hello".to_string(),
            model: None,
            budget_usd: None,
            enabled: true,
            approval_required,
            misfire_policy: MisfirePolicy::FireOnceImmediately,
            last_run_at_ms: None,
            next_run_at_ms: None,
            running: false,
            consecutive_errors: 0,
        }
    }

    #[tokio::test]
    async fn cron_job_with_approval_required_waits_for_explicit_approval() {
        let (scheduler, store, _workflows) = harness().await;
        store.put_cron_job(&cron_job("j1", true)).await.unwrap();

        assert!(scheduler.fire_cron_job_now("j1").await.unwrap());
        let pending = scheduler.pending_cron_job_approvals().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "j1");
        assert!(scheduler.approve_cron_job("j1").await);
        assert!(scheduler.pending_cron_job_approvals().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_cron_job_does_not_fire() {
        let (scheduler, _store, _workflows) = harness().await;
        assert!(!scheduler.fire_cron_job_now("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn already_running_cron_job_is_skipped() {
        let (scheduler, store, _workflows) = harness().await;
        let mut job = cron_job("j2", false);
        job.running = true;
        store.put_cron_job(&job).await.unwrap();
        assert!(!scheduler.fire_cron_job_now("j2").await.unwrap());
    }

    #[tokio::test]
    async fn cron_job_dispatch_failure_increments_consecutive_errors() {
        let (scheduler, store, _workflows) = harness().await;
        store.put_cron_job(&cron_job("j3", false)).await.unwrap();

        assert!(scheduler.fire_cron_job_now("j3").await.unwrap());
        // dispatch runs on a spawned task; give it a moment to complete.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let job = store.get_cron_job("j3").await.unwrap().unwrap();
        assert!(!job.running);
        assert_eq!(job.consecutive_errors, 1);
    }

    #[test]
    fn run_mode_default_is_live() {
        assert_eq!(RunMode::default(), RunMode::Live);
    }
}
