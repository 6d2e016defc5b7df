//! `dealroom status`: dashboard rows for a set of rooms.

use chrono::Utc;
use dealroom_client::{HttpNegotiationApi, NegotiationApi};
use dealroom_core::room::RoomSnapshot;
use dealroom_core::session::SessionStore;
use dealroom_core::types::DealroomError;
use tokio::task::JoinSet;

use crate::cli::StatusOpts;
use crate::client::http_client;
use crate::render::{format_dashboard, format_error, resolve_color};

/// Fold snapshots into a fresh dashboard list. Rooms that failed to load
/// stay listed as pending.
pub fn build_dashboard(
    rooms: &[String],
    snapshots: Vec<(String, Result<RoomSnapshot, DealroomError>)>,
) -> (SessionStore, Vec<(String, DealroomError)>) {
    let now = Utc::now();
    let mut store = SessionStore::new();
    for id in rooms {
        store.upsert_listing(id, None, now);
    }
    let mut failures = Vec::new();
    for (id, result) in snapshots {
        match result {
            Ok(snapshot) => {
                store.apply_projection(&id, &snapshot.session_update(), now);
            }
            Err(e) => failures.push((id, e)),
        }
    }
    (store, failures)
}

/// Entry point for `dealroom status`.
pub async fn cmd_status(server: &str, opts: &StatusOpts) -> anyhow::Result<()> {
    let use_color = resolve_color(&opts.color);
    let api = HttpNegotiationApi::new(http_client()?, server);

    let mut tasks = JoinSet::new();
    for id in &opts.rooms {
        let api = api.clone();
        let id = id.clone();
        tasks.spawn(async move {
            let result = api.fetch_history(&id).await;
            (id, result)
        });
    }
    let mut snapshots = Vec::with_capacity(opts.rooms.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(item) => snapshots.push(item),
            Err(e) => tracing::warn!("status task failed: {e}"),
        }
    }

    let (store, failures) = build_dashboard(&opts.rooms, snapshots);
    for (id, e) in &failures {
        eprintln!("{}", format_error(id, e, use_color));
    }
    println!("{}", format_dashboard(&store.list(), use_color));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealroom_core::session::RoomStatus;

    fn snapshot(id: &str, round: u32, status: RoomStatus) -> RoomSnapshot {
        RoomSnapshot {
            room_id: id.into(),
            messages: Vec::new(),
            offers: Default::default(),
            current_round: round,
            max_rounds: Some(3),
            decision: None,
            status,
        }
    }

    #[test]
    fn failed_rooms_stay_pending() {
        let rooms = vec!["r1".to_string(), "r2".to_string()];
        let (store, failures) = build_dashboard(
            &rooms,
            vec![
                ("r1".into(), Ok(snapshot("r1", 2, RoomStatus::Active))),
                ("r2".into(), Err(DealroomError::Transport("refused".into()))),
            ],
        );
        assert_eq!(failures.len(), 1);
        assert_eq!(store.get("r1").map(|r| r.status), Some(RoomStatus::Active));
        assert_eq!(store.get("r1").map(|r| r.current_round), Some(2));
        assert_eq!(store.get("r2").map(|r| r.status), Some(RoomStatus::Pending));
        assert_eq!(store.list().len(), 2);
    }
}
