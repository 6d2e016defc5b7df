//! CLI definition using clap derive.

use std::time::Duration;

use clap::{Parser, Subcommand};
use dealroom_client::ClientConfig;
use dealroom_core::reconnect::ReconnectPolicy;

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

#[derive(Parser)]
#[command(name = "dealroom", about = "Follow live negotiation rooms")]
pub struct Cli {
    /// Negotiation server base URL
    #[arg(long, short = 's', global = true, env = "DEALROOM_SERVER", default_value = DEFAULT_SERVER)]
    pub server: String,

    #[command(flatten)]
    pub stream: StreamOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Stream rooms live until they complete (Ctrl-C disconnects)
    Watch(WatchOpts),
    /// Print the transcript of a completed room
    History(HistoryOpts),
    /// Show the dashboard summary for rooms
    Status(StatusOpts),
}

#[derive(clap::Args, Debug, Clone)]
pub struct StreamOpts {
    /// Delay after the start handshake before the stream opens (ms)
    #[arg(long, global = true, env = "DEALROOM_GRACE_MS", default_value = "500")]
    pub grace_ms: u64,

    /// Consecutive transport errors tolerated before giving up
    #[arg(long, global = true, default_value = "5")]
    pub max_attempts: u32,

    /// First reconnection delay (ms); doubles per attempt
    #[arg(long, global = true, default_value = "1000")]
    pub initial_backoff_ms: u64,

    /// Upper bound on a reconnection delay (ms)
    #[arg(long, global = true, default_value = "30000")]
    pub max_backoff_ms: u64,
}

impl StreamOpts {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            max_attempts: self.max_attempts,
            ..ReconnectPolicy::default()
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            grace: Duration::from_millis(self.grace_ms),
            policy: self.policy(),
        }
    }
}

#[derive(clap::Args)]
pub struct WatchOpts {
    /// Room ids to follow
    #[arg(required = true)]
    pub rooms: Vec<String>,

    /// Rooms that already completed: load history instead of streaming
    #[arg(long)]
    pub completed: Vec<String>,

    /// Color output: auto, always, never
    #[arg(long, default_value = "auto")]
    pub color: String,

    /// Redraw interval in milliseconds
    #[arg(long, default_value = "200")]
    pub interval_ms: u64,
}

#[derive(clap::Args)]
pub struct HistoryOpts {
    pub room: String,

    /// Color output: auto, always, never
    #[arg(long, default_value = "auto")]
    pub color: String,

    /// Print the raw snapshot as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct StatusOpts {
    #[arg(required = true)]
    pub rooms: Vec<String>,

    /// Color output: auto, always, never
    #[arg(long, default_value = "auto")]
    pub color: String,
}
