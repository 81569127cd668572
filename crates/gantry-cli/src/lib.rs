mod args;
mod client;
mod commands;

pub use args::Cli;

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    commands::dispatch(cli).await
}
