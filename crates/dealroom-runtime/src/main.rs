//! dealroom: follow real-time negotiation rooms from the terminal.

use clap::Parser;

mod cli;
mod client;
mod cmd_history;
mod cmd_status;
mod cmd_watch;
mod render;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("DEALROOM_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        cli::Command::Watch(opts) => {
            tracing::info!(server = %args.server, rooms = opts.rooms.len(), "dealroom watch starting");
            cmd_watch::cmd_watch(&args.server, &args.stream, &opts).await?;
        }
        cli::Command::History(opts) => {
            cmd_history::cmd_history(&args.server, &args.stream, &opts).await?;
        }
        cli::Command::Status(opts) => {
            cmd_status::cmd_status(&args.server, &opts).await?;
        }
    }

    Ok(())
}
