//! `dealroom history`: print a completed room from the state endpoint.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use dealroom_client::{HttpNegotiationApi, NegotiationApi};
use dealroom_core::room::summarize_decision;
use dealroom_core::session::SessionStore;

use crate::cli::{HistoryOpts, StreamOpts};
use crate::client::{build_controller, http_client};
use crate::render::{format_transcript, resolve_color};

/// Entry point for `dealroom history`.
pub async fn cmd_history(server: &str, stream: &StreamOpts, opts: &HistoryOpts) -> anyhow::Result<()> {
    if opts.json {
        let api = HttpNegotiationApi::new(http_client()?, server);
        let snapshot = api
            .fetch_history(&opts.room)
            .await
            .with_context(|| format!("failed to load history for {}", opts.room))?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let use_color = resolve_color(&opts.color);
    let sessions = Arc::new(Mutex::new(SessionStore::new()));
    let controller = build_controller(server, stream, sessions, use_color)?;
    controller.init_room(&opts.room)?;
    controller
        .enable_stream(&opts.room, true)
        .await
        .with_context(|| format!("failed to load history for {}", opts.room))?;

    let room = controller
        .room(&opts.room)
        .with_context(|| format!("room {} vanished after loading", opts.room))?;
    let transcript = format_transcript(&room, use_color);
    if transcript.is_empty() {
        println!("(no messages)");
    } else {
        println!("{transcript}");
    }
    // Snapshots carry the decision without its summary message.
    if let Some(decision) = &room.decision {
        println!("{}", summarize_decision(decision));
    }
    Ok(())
}
