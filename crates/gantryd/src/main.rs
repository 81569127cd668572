use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use gantry_channels::ChannelBridge;
use gantry_core::ReloadSupervisor;
use gantry_dispatch::{Dispatcher, DispatcherConfig};
use gantry_events::EventBus;
use gantry_governor::{BudgetGovernor, BudgetLimits, CircuitBreaker, Governor};
use gantry_notify::NotificationRouter;
use gantry_observability::{init_process_logging, ProcessKind};
use gantry_providers::ProviderRegistry;
use gantry_retention::{RetentionConfig, RetentionSweeper};
use gantry_sandbox::{ProcessSandboxPlugin, SandboxManager};
use gantry_scheduler::SchedulerEngine;
use gantry_server::AppState;
use gantry_session::SessionStore;
use gantry_storage::Store;
use gantry_tools::ToolRegistry;
use gantry_workflow::{WorkflowEngine, WorkflowEngineConfig};

/// Headless Gantry orchestration daemon: binds the HTTP API and runs the
/// scheduler, notification, and retention loops until terminated.
#[derive(Parser, Debug)]
#[command(name = "gantryd")]
#[command(about = "Gantry orchestration daemon")]
struct Args {
    #[arg(long, alias = "host", default_value = "127.0.0.1", env = "GANTRY_HOST")]
    hostname: String,
    #[arg(long, default_value_t = 4884, env = "GANTRY_PORT")]
    port: u16,
    /// Workspace root: where `.gantry/agent` and `.gantry/workflow`
    /// definitions, and `config.json`, are read from.
    #[arg(long, default_value = ".", env = "GANTRY_WORKSPACE")]
    workspace: PathBuf,
    /// Data directory: where the embedded store and rotated logs live.
    #[arg(long, default_value = ".gantry/data", env = "GANTRY_DATA_DIR")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let logs_dir = args.data_dir.join("logs");
    let (_guard, log_info) = init_process_logging(ProcessKind::Daemon, &logs_dir, 7)
        .context("failed to initialize daemon logging")?;
    info!(?log_info, "gantryd: logging initialized");

    let config_path = args.workspace.join("config.json");
    let supervisor = Arc::new(ReloadSupervisor::new(&args.workspace, config_path).await?);
    supervisor.spawn_signal_listener();

    let state = build_state(&args, supervisor.clone()).await?;

    let scheduler = state.scheduler.clone();
    scheduler.spawn();

    let notifier = build_notifier();
    if let Some(notifier) = &notifier {
        notifier.spawn();
        let _bridge = ChannelBridge::new(scheduler.clone(), Some(notifier.clone()));
    }

    let retention = Arc::new(RetentionSweeper::new(state.store.clone(), RetentionConfig::default()));
    retention.spawn();

    let addr: SocketAddr = format!("{}:{}", args.hostname, args.port)
        .parse()
        .context("invalid hostname or port")?;
    info!(%addr, workspace = %args.workspace.display(), "gantryd: starting");

    gantry_server::serve(addr, state).await?;

    scheduler.shutdown();
    supervisor
        .shutdown(Duration::from_secs(30), std::future::ready(()))
        .await;
    Ok(())
}

fn build_notifier() -> Option<Arc<NotificationRouter>> {
    match gantry_notify::NotifyConfig::from_env() {
        Ok(config) => Some(Arc::new(NotificationRouter::new(config))),
        Err(err) => {
            info!(reason = %err, "gantryd: notification router disabled");
            None
        }
    }
}

async fn build_state(args: &Args, supervisor: Arc<ReloadSupervisor>) -> anyhow::Result<AppState> {
    tokio::fs::create_dir_all(&args.data_dir).await?;
    let store = Arc::new(Store::open(&args.data_dir.join("gantry.db")).await?);
    let events = EventBus::new();

    let app_config = supervisor.config().get().await;
    let provider_config = gantry_providers::AppConfig {
        providers: app_config.providers.clone(),
        default_provider: app_config.default_provider.clone(),
    };
    let providers = Arc::new(ProviderRegistry::new(provider_config));

    let governor = Arc::new(Governor::new(
        Arc::new(CircuitBreaker::with_defaults()),
        Arc::new(BudgetGovernor::new(BudgetLimits::default())),
    ));
    let sandbox = Arc::new(SandboxManager::new(Arc::new(ProcessSandboxPlugin::default())));
    let sessions = Arc::new(SessionStore::new(store.clone()));
    let agents = supervisor.agents().snapshot();

    let dispatcher_config = DispatcherConfig {
        max_concurrent: app_config.max_concurrent_tasks,
        max_concurrent_children: app_config.max_concurrent_child_tasks,
        ..DispatcherConfig::default()
    };
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        events.clone(),
        providers,
        governor.clone(),
        sandbox,
        sessions.clone(),
        agents.clone(),
        dispatcher_config,
    ));

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

    let workflows = supervisor.workflows().snapshot();
    let scheduler = Arc::new(SchedulerEngine::new(
        store.clone(),
        events.clone(),
        dispatcher.clone(),
        workflow_engine.clone(),
        workflows,
    ));

    let api_token = std::env::var("GANTRY_API_TOKEN").ok();

    Ok(AppState::new(
        store,
        events,
        dispatcher,
        workflow_engine,
        scheduler,
        governor,
        sessions,
        supervisor,
        api_token,
    ))
}
