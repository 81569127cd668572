use std::collections::HashMap;

use anyhow::{bail, Context};
use serde_json::{json, Value};

use gantry_core::config::ConfigStore;
use gantry_storage::Store;

use crate::args::{
    BudgetCommand, Cli, Commands, ConfigCommand, JobCommand, OutputFormat, SessionCommand,
    WorkflowCommand,
};
use crate::client::GantryClient;

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let client = GantryClient::new(cli.base_url.clone(), cli.token.clone());
    let format = cli.format;

    match cli.command {
        Commands::Init { refresh } => init_workspace(&cli.workspace, refresh).await,
        Commands::Serve { hostname, port } => exec_daemon(&cli, &hostname, port),
        Commands::Doctor => doctor(&cli, &client, format).await,
        Commands::Status => status(&cli, &client, format).await,
        Commands::Dispatch { agent, prompt, model, provider, session, budget_usd } => {
            let body = json!({
                "agent": agent,
                "prompt": prompt,
                "model": model,
                "provider": provider,
                "session_id": session,
                "budget_usd": budget_usd,
            });
            let result = client.post("/dispatch", &body).await?;
            print_value(&result, format);
            Ok(())
        }
        Commands::Route { prompt } => {
            let result = client.post("/route/classify", &json!({ "prompt": prompt })).await?;
            print_value(&result, format);
            Ok(())
        }
        Commands::Job(cmd) => job(&client, cmd, format).await,
        Commands::Workflow(cmd) => workflow(&client, cmd, format).await,
        Commands::Session(cmd) => session(&client, cmd, format).await,
        Commands::History { limit, offset } => history(&cli, &client, limit, offset, format).await,
        Commands::Budget(cmd) => budget(&client, cmd, format).await,
        Commands::Config(ConfigCommand::Show) => config_show(&cli, format).await,
        Commands::Memory => not_implemented("memory", "no memory subsystem exists in this daemon"),
        Commands::Knowledge => not_implemented("knowledge", "no knowledge-base subsystem exists in this daemon"),
        Commands::Trust => not_implemented("trust", "no trust/reputation subsystem exists in this daemon"),
        Commands::Data => not_implemented("data", "use `history`/`workflow runs` for execution data; no separate export exists"),
        Commands::Backup => not_implemented("backup", "back up the data directory with ordinary file tools; no in-process backup job exists"),
        Commands::Restore => not_implemented("restore", "restore the data directory with ordinary file tools; no in-process restore job exists"),
        Commands::Logs => not_implemented("logs", "read the rotated JSON files under the data directory's logs/ folder directly"),
        Commands::Service => not_implemented("service", "no OS service manager integration is implemented"),
        Commands::Completion { shell } => {
            print_completion(shell);
            Ok(())
        }
        Commands::Version => {
            println!("gantry {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn not_implemented(command: &str, reason: &str) -> anyhow::Result<()> {
    bail!("`{command}` is not implemented: {reason}")
}

fn print_value(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value).unwrap_or_default()),
        OutputFormat::Plain => println!("{}", serde_json::to_string_pretty(value).unwrap_or_default()),
    }
}

async fn init_workspace(workspace: &std::path::Path, refresh: bool) -> anyhow::Result<()> {
    let agent_dir = workspace.join(".gantry").join("agent");
    let workflow_dir = workspace.join(".gantry").join("workflow");
    tokio::fs::create_dir_all(&agent_dir).await?;
    tokio::fs::create_dir_all(&workflow_dir).await?;

    let config_path = workspace.join("config.json");
    if refresh || !config_path.exists() {
        let skeleton = json!({
            "providers": {},
            "default_provider": Value::Null,
            "max_concurrent_tasks": 8,
            "max_concurrent_child_tasks": 4,
            "default_task_timeout_secs": 300,
            "shutdown_drain_timeout_secs": 30,
        });
        tokio::fs::write(&config_path, serde_json::to_string_pretty(&skeleton)?).await?;
    }

    println!("initialized workspace at {}", workspace.display());
    Ok(())
}

fn exec_daemon(cli: &Cli, hostname: &str, port: u16) -> anyhow::Result<()> {
    let status = std::process::Command::new("gantryd")
        .arg("--hostname")
        .arg(hostname)
        .arg("--port")
        .arg(port.to_string())
        .arg("--workspace")
        .arg(&cli.workspace)
        .arg("--data-dir")
        .arg(&cli.data_dir)
        .status()
        .context("failed to launch gantryd — is it installed on PATH?")?;
    if !status.success() {
        bail!("gantryd exited with {status}");
    }
    Ok(())
}

async fn doctor(cli: &Cli, client: &GantryClient, format: OutputFormat) -> anyhow::Result<()> {
    let config_path = cli.workspace.join("config.json");
    let config_ok = match ConfigStore::new(&config_path, None).await {
        Ok(store) => store.get().await.validate().is_ok(),
        Err(_) => false,
    };
    let daemon_reachable = client.get("/healthz").await.is_ok();

    let report = json!({
        "workspace": cli.workspace.display().to_string(),
        "config_valid": config_ok,
        "daemon_reachable": daemon_reachable,
        "base_url": cli.base_url,
    });
    print_value(&report, format);
    if !config_ok {
        bail!("workspace config failed validation");
    }
    Ok(())
}

async fn status(cli: &Cli, client: &GantryClient, format: OutputFormat) -> anyhow::Result<()> {
    match client.get("/healthz").await {
        Ok(health) => {
            print_value(&health, format);
            Ok(())
        }
        Err(err) => {
            eprintln!("daemon unreachable ({err}); falling back to direct store access");
            let store = open_store(cli).await?;
            let history = store.list_history(1, 0).await.unwrap_or_default();
            let triggers = store.list_triggers().await.unwrap_or_default();
            let report = json!({
                "daemon_reachable": false,
                "has_history": !history.is_empty(),
                "trigger_count": triggers.len(),
            });
            print_value(&report, format);
            Ok(())
        }
    }
}

async fn open_store(cli: &Cli) -> anyhow::Result<Store> {
    let db_path = cli.data_dir.join("gantry.db");
    Store::open(&db_path).await.with_context(|| format!("failed to open store at {}", db_path.display()))
}

async fn history(cli: &Cli, client: &GantryClient, limit: i64, offset: i64, format: OutputFormat) -> anyhow::Result<()> {
    let path = format!("/history?limit={limit}&offset={offset}");
    match client.get(&path).await {
        Ok(value) => {
            print_value(&value, format);
            Ok(())
        }
        Err(err) => {
            eprintln!("daemon unreachable ({err}); falling back to direct store access");
            let store = open_store(cli).await?;
            let entries = store.list_history(limit, offset).await?;
            print_value(&json!(entries), format);
            Ok(())
        }
    }
}

async fn config_show(cli: &Cli, format: OutputFormat) -> anyhow::Result<()> {
    let config_path = cli.workspace.join("config.json");
    let store = ConfigStore::new(&config_path, None).await?;
    let effective = store.get_effective_value().await;
    print_value(&effective, format);
    Ok(())
}

async fn job(client: &GantryClient, cmd: JobCommand, format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        JobCommand::List => {
            let value = client.get("/cron-jobs").await?;
            print_value(&value, format);
        }
        JobCommand::Approve { id } => {
            let value = client.post_empty(&format!("/cron-jobs/{id}/approve")).await?;
            print_value(&value, format);
        }
        JobCommand::Run { id } => {
            let value = client.post_empty(&format!("/cron-jobs/{id}/run")).await?;
            print_value(&value, format);
        }
    }
    Ok(())
}

async fn workflow(client: &GantryClient, cmd: WorkflowCommand, format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        WorkflowCommand::List => {
            let value = client.get("/workflows").await?;
            print_value(&value, format);
        }
        WorkflowCommand::Get { name } => {
            let value = client.get(&format!("/workflows/{name}")).await?;
            print_value(&value, format);
        }
        WorkflowCommand::Run { name, dry_run, variables } => {
            let variables: HashMap<String, String> = variables.into_iter().collect();
            let body = json!({ "variables": variables, "dry_run": dry_run });
            let value = client.post(&format!("/workflows/{name}/run"), &body).await?;
            print_value(&value, format);
        }
        WorkflowCommand::Runs { workflow, limit } => {
            let mut path = format!("/workflow-runs?limit={limit}");
            if let Some(name) = workflow {
                path.push_str(&format!("&workflow={name}"));
            }
            let value = client.get(&path).await?;
            print_value(&value, format);
        }
    }
    Ok(())
}

async fn session(client: &GantryClient, cmd: SessionCommand, format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        SessionCommand::Create { agent, source } => {
            let value = client.post("/sessions", &json!({ "agent": agent, "source": source })).await?;
            print_value(&value, format);
        }
        SessionCommand::Get { id } => {
            let value = client.get(&format!("/sessions/{id}")).await?;
            print_value(&value, format);
        }
        SessionCommand::History { id } => {
            let value = client.get(&format!("/sessions/{id}/history")).await?;
            print_value(&value, format);
        }
        SessionCommand::Archive { id } => {
            let value = client.post_empty(&format!("/sessions/{id}/archive")).await?;
            print_value(&value, format);
        }
    }
    Ok(())
}

async fn budget(client: &GantryClient, cmd: BudgetCommand, format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        BudgetCommand::Show => {
            let value = client.get("/budget").await?;
            print_value(&value, format);
        }
        BudgetCommand::Pause => {
            let value = client.post_empty("/budget/pause").await?;
            print_value(&value, format);
        }
        BudgetCommand::Resume => {
            let value = client.post_empty("/budget/resume").await?;
            print_value(&value, format);
        }
    }
    Ok(())
}

fn print_completion(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
}
