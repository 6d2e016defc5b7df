//! Dashboard-level room list and the one-directional projection into it.
//!
//! The room reducer is the only producer of [`SessionUpdate`]s; the
//! dashboard loader is the only writer of listing fields (`title`). This
//! store is the source of truth for dashboard summaries only; in-room
//! detail lives in [`crate::room::RoomState`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DealTerms, RoomId};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    #[default]
    Pending,
    Active,
    Completed,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

/// Narrow projection of room state: the only fields the dashboard mirrors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub round: Option<u32>,
    pub max_rounds: Option<u32>,
    pub status: Option<RoomStatus>,
    pub final_deal: Option<DealTerms>,
}

impl SessionUpdate {
    pub fn round_started(round: u32, max_rounds: Option<u32>) -> Self {
        Self {
            round: Some(round),
            max_rounds,
            status: Some(RoomStatus::Active),
            final_deal: None,
        }
    }

    /// Completion, with terms when they are fully known.
    pub fn completed(final_deal: Option<DealTerms>) -> Self {
        Self {
            status: Some(RoomStatus::Completed),
            final_deal,
            ..Self::default()
        }
    }
}

/// One row of the dashboard room list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardRoom {
    pub room_id: RoomId,
    pub title: Option<String>,
    pub status: RoomStatus,
    pub current_round: u32,
    pub max_rounds: Option<u32>,
    pub final_deal: Option<DealTerms>,
    pub updated_at: DateTime<Utc>,
}

impl DashboardRoom {
    fn new(room_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            room_id: room_id.to_owned(),
            title: None,
            status: RoomStatus::Pending,
            current_round: 0,
            max_rounds: None,
            final_deal: None,
            updated_at: now,
        }
    }
}

/// Independently owned dashboard room list.
#[derive(Debug, Default)]
pub struct SessionStore {
    rooms: HashMap<RoomId, DashboardRoom>,
    /// Bumped on every change so readers can detect staleness.
    version: u64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or relabel a room as listed by the dashboard loader.
    pub fn upsert_listing(&mut self, room_id: &str, title: Option<String>, now: DateTime<Utc>) {
        let entry = self
            .rooms
            .entry(room_id.to_owned())
            .or_insert_with(|| DashboardRoom::new(room_id, now));
        entry.title = title;
        entry.updated_at = now;
        self.version += 1;
    }

    /// Apply a projection from the room reducer. Returns `true` on change.
    ///
    /// A room not yet listed gets a minimal entry. A completed room never
    /// regresses to `Active`, and completion without terms keeps any terms
    /// already mirrored.
    pub fn apply_projection(
        &mut self,
        room_id: &str,
        update: &SessionUpdate,
        now: DateTime<Utc>,
    ) -> bool {
        let is_new = !self.rooms.contains_key(room_id);
        let entry = self
            .rooms
            .entry(room_id.to_owned())
            .or_insert_with(|| DashboardRoom::new(room_id, now));
        let before = entry.clone();

        if let Some(round) = update.round {
            entry.current_round = round;
        }
        if let Some(max) = update.max_rounds {
            entry.max_rounds = Some(max);
        }
        match update.status {
            Some(RoomStatus::Active) if entry.status == RoomStatus::Completed => {
                tracing::debug!(room_id, "ignoring active status for completed room");
            }
            Some(status) => entry.status = status,
            None => {}
        }
        if let Some(terms) = &update.final_deal {
            entry.final_deal = Some(terms.clone());
        }

        let changed = is_new || *entry != before;
        if changed {
            entry.updated_at = now;
            self.version += 1;
        }
        changed
    }

    pub fn get(&self, room_id: &str) -> Option<&DashboardRoom> {
        self.rooms.get(room_id)
    }

    /// Rooms sorted by id.
    pub fn list(&self) -> Vec<&DashboardRoom> {
        let mut rooms: Vec<&DashboardRoom> = self.rooms.values().collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("valid datetime")
    }

    fn terms() -> DealTerms {
        DealTerms {
            seller_name: "Acme".into(),
            price: 95.0,
            quantity: 5,
            total_cost: 475.0,
        }
    }

    #[test]
    fn projection_creates_missing_room() {
        let mut store = SessionStore::new();
        assert!(store.apply_projection("r1", &SessionUpdate::round_started(1, Some(3)), t0()));
        let room = store.get("r1").expect("room inserted");
        assert_eq!(room.status, RoomStatus::Active);
        assert_eq!(room.current_round, 1);
        assert_eq!(room.max_rounds, Some(3));
        assert!(room.title.is_none());
    }

    #[test]
    fn listing_and_projection_own_separate_fields() {
        let mut store = SessionStore::new();
        store.upsert_listing("r1", Some("Steel bolts".into()), t0());
        store.apply_projection("r1", &SessionUpdate::round_started(2, None), t0());
        store.upsert_listing("r1", Some("Steel bolts (bulk)".into()), t0());

        let room = store.get("r1").expect("room");
        assert_eq!(room.title.as_deref(), Some("Steel bolts (bulk)"));
        assert_eq!(room.current_round, 2);
        assert_eq!(room.status, RoomStatus::Active);
    }

    #[test]
    fn completed_with_terms() {
        let mut store = SessionStore::new();
        store.apply_projection("r1", &SessionUpdate::completed(Some(terms())), t0());
        let room = store.get("r1").expect("room");
        assert_eq!(room.status, RoomStatus::Completed);
        assert_eq!(room.final_deal.as_ref().map(|t| t.total_cost), Some(475.0));
    }

    #[test]
    fn completed_without_terms_keeps_earlier_terms() {
        let mut store = SessionStore::new();
        store.apply_projection("r1", &SessionUpdate::completed(Some(terms())), t0());
        let changed = store.apply_projection("r1", &SessionUpdate::completed(None), t0());
        assert!(!changed);
        assert!(store.get("r1").and_then(|r| r.final_deal.as_ref()).is_some());
    }

    #[test]
    fn completed_never_regresses_to_active() {
        let mut store = SessionStore::new();
        store.apply_projection("r1", &SessionUpdate::completed(None), t0());
        store.apply_projection("r1", &SessionUpdate::round_started(4, None), t0());
        let room = store.get("r1").expect("room");
        assert_eq!(room.status, RoomStatus::Completed);
        assert_eq!(room.current_round, 4);
    }

    #[test]
    fn version_tracks_changes_only() {
        let mut store = SessionStore::new();
        let update = SessionUpdate::round_started(1, None);
        store.apply_projection("r1", &update, t0());
        let v = store.version();
        assert!(!store.apply_projection("r1", &update, t0()));
        assert_eq!(store.version(), v);
        assert!(store.apply_projection("r1", &SessionUpdate::round_started(2, None), t0()));
        assert_eq!(store.version(), v + 1);
    }
}
