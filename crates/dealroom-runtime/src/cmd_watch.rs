//! `dealroom watch`: follow rooms live until they complete.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dealroom_client::{EnableOutcome, HttpNegotiationApi, RoomController, SharedSessions};
use dealroom_core::session::SessionStore;
use dealroom_core::types::DealroomError;
use tokio::task::JoinSet;

use crate::cli::{StreamOpts, WatchOpts};
use crate::client::build_controller;
use crate::render::{format_dashboard, format_error, resolve_color, RoomCursor};

/// Every room named on the command line, live or completed, without repeats.
pub fn followed_rooms(opts: &WatchOpts) -> Vec<String> {
    let mut seen = BTreeSet::new();
    opts.rooms
        .iter()
        .chain(opts.completed.iter())
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Entry point for `dealroom watch`.
pub async fn cmd_watch(server: &str, stream: &StreamOpts, opts: &WatchOpts) -> anyhow::Result<()> {
    let use_color = resolve_color(&opts.color);
    let sessions: SharedSessions = Arc::new(Mutex::new(SessionStore::new()));
    let controller = build_controller(server, stream, Arc::clone(&sessions), use_color)?;
    let rooms = followed_rooms(opts);

    {
        let now = Utc::now();
        let mut list = sessions
            .lock()
            .map_err(|_| anyhow::anyhow!("session store poisoned"))?;
        for id in &rooms {
            list.upsert_listing(id, None, now);
        }
    }
    for id in &rooms {
        controller.init_room(id)?;
    }

    let mut enabling: JoinSet<(String, Result<EnableOutcome, DealroomError>)> = JoinSet::new();
    for id in &rooms {
        let c = controller.clone();
        let id = id.clone();
        let completed = opts.completed.contains(&id);
        enabling.spawn(async move {
            let result = c.enable_stream(&id, completed).await;
            (id, result)
        });
    }

    let mut cursors: HashMap<String, RoomCursor> = HashMap::new();
    let mut finished: HashSet<String> = HashSet::new();
    let mut tick = tokio::time::interval(Duration::from_millis(opts.interval_ms.max(10)));

    loop {
        tokio::select! {
            Some(joined) = enabling.join_next() => {
                match joined {
                    Ok((id, Ok(outcome))) => {
                        tracing::debug!(room_id = %id, ?outcome, "room enabled");
                        if outcome == EnableOutcome::Hydrated {
                            finished.insert(id);
                        }
                    }
                    Ok((id, Err(e))) => {
                        eprintln!("{}", format_error(&id, &e, use_color));
                        finished.insert(id);
                    }
                    Err(e) => tracing::warn!("enable task failed: {e}"),
                }
            }
            _ = tick.tick() => {
                render_updates(&controller, &rooms, &mut cursors, &mut finished, use_color);
                if enabling.is_empty() && finished.len() == rooms.len() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, disconnecting");
                break;
            }
        }
    }

    enabling.abort_all();
    for id in &rooms {
        controller.disconnect(id)?;
    }
    render_updates(&controller, &rooms, &mut cursors, &mut finished, use_color);

    let list = sessions
        .lock()
        .map_err(|_| anyhow::anyhow!("session store poisoned"))?;
    println!();
    println!("{}", format_dashboard(&list.list(), use_color));
    Ok(())
}

fn render_updates(
    controller: &RoomController<HttpNegotiationApi>,
    rooms: &[String],
    cursors: &mut HashMap<String, RoomCursor>,
    finished: &mut HashSet<String>,
    use_color: bool,
) {
    for id in rooms {
        let Some(room) = controller.room(id) else {
            continue;
        };
        let cursor = cursors.entry(id.clone()).or_default();
        for line in cursor.advance(&room, use_color) {
            println!("{line}");
        }
        if room.connection.is_closed() {
            finished.insert(id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(rooms: &[&str], completed: &[&str]) -> WatchOpts {
        WatchOpts {
            rooms: rooms.iter().map(|s| s.to_string()).collect(),
            completed: completed.iter().map(|s| s.to_string()).collect(),
            color: "never".to_string(),
            interval_ms: 200,
        }
    }

    #[test]
    fn completed_rooms_are_followed_too() {
        let o = opts(&["r1", "r2"], &["r3"]);
        assert_eq!(followed_rooms(&o), vec!["r1", "r2", "r3"]);
    }

    #[test]
    fn duplicates_are_followed_once() {
        let o = opts(&["r1", "r2", "r1"], &["r2"]);
        assert_eq!(followed_rooms(&o), vec!["r1", "r2"]);
    }
}
