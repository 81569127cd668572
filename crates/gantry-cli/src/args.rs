use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
#[value(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Plain,
    Json,
}

/// Operator CLI for a Gantry daemon. Read/write commands talk to the
/// daemon's HTTP API at `--base-url`; a handful of read-only commands
/// (`status`, `history`, `config`) fall back to opening the embedded
/// store/config directly under `--workspace`/`--data-dir` when the
/// daemon isn't reachable.
#[derive(Parser, Debug)]
#[command(name = "gantry")]
#[command(about = "Operator CLI for the Gantry orchestration daemon")]
#[command(version)]
pub struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:4884", global = true, env = "GANTRY_BASE_URL")]
    pub base_url: String,

    #[arg(long, global = true, env = "GANTRY_API_TOKEN")]
    pub token: Option<String>,

    #[arg(long, default_value = ".", global = true, env = "GANTRY_WORKSPACE")]
    pub workspace: PathBuf,

    #[arg(long, default_value = ".gantry/data", global = true, env = "GANTRY_DATA_DIR")]
    pub data_dir: PathBuf,

    #[arg(long, default_value = "plain", global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold `.gantry/agent`, `.gantry/workflow`, and `config.json` in the workspace.
    Init {
        #[arg(long)]
        refresh: bool,
    },
    /// Run (exec) the `gantryd` daemon binary with the given bind address.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 4884)]
        port: u16,
    },
    /// Check workspace and daemon health: config validity, reachability, provider setup.
    Doctor,
    /// Print daemon health and running-task counts.
    Status,
    /// Dispatch a single task and wait for the result.
    Dispatch {
        agent: String,
        prompt: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        budget_usd: Option<f64>,
    },
    /// Classify a prompt to the agent that would handle it.
    Route { prompt: String },
    #[command(subcommand)]
    Job(JobCommand),
    #[command(subcommand)]
    Workflow(WorkflowCommand),
    #[command(subcommand)]
    Session(SessionCommand),
    /// Paginated execution history.
    History {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// No memory subsystem is implemented in this daemon.
    Memory,
    /// No knowledge-base subsystem is implemented in this daemon.
    Knowledge,
    /// No trust/reputation subsystem is implemented in this daemon.
    Trust,
    #[command(subcommand)]
    Budget(BudgetCommand),
    /// No ad-hoc data export subsystem is implemented beyond `history`/`workflow`.
    Data,
    /// No backup subsystem is implemented; back up the data directory with ordinary file tools.
    Backup,
    /// No restore subsystem is implemented; restore the data directory with ordinary file tools.
    Restore,
    #[command(subcommand)]
    Config(ConfigCommand),
    /// No in-process log aggregation is exposed; read the rotated JSON files under `logs/` directly.
    Logs,
    /// No OS service manager integration (systemd unit install, etc.) is implemented.
    Service,
    /// Emit a shell completion script.
    Completion { shell: Shell },
    /// Print the CLI version.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum JobCommand {
    /// List Cron Jobs and their runtime state.
    List,
    /// Release a Cron Job firing that is holding for manual approval.
    Approve { id: String },
    /// Fire a Cron Job immediately, bypassing its schedule.
    Run { id: String },
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommand {
    List,
    Get { name: String },
    /// Run a workflow by name.
    Run {
        name: String,
        #[arg(long)]
        dry_run: bool,
        /// `key=value` pairs, repeatable.
        #[arg(long = "var", value_parser = parse_key_val)]
        variables: Vec<(String, String)>,
    },
    Runs {
        #[arg(long)]
        workflow: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    Create {
        agent: String,
        #[arg(long)]
        source: Option<String>,
    },
    Get { id: String },
    History { id: String },
    Archive { id: String },
}

#[derive(Subcommand, Debug)]
pub enum BudgetCommand {
    Show,
    Pause,
    Resume,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the merged effective configuration for `--workspace`.
    Show,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected `key=value`, got `{raw}`"))?;
    Ok((key.to_string(), value.to_string()))
}
