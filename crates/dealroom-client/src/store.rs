//! Explicit container for every followed room.
//!
//! Rooms are keyed by id and only exist after [`RoomStore::init_room`] (or
//! [`RoomStore::hydrate`]). Events for any other room are dropped with a
//! warning. Reducer projections are written straight into the shared
//! dashboard [`SessionStore`]; the remaining effects go back to the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dealroom_core::connection::ConnectionState;
use dealroom_core::room::{apply_event, RoomEffect, RoomSnapshot, RoomState};
use dealroom_core::session::{SessionStore, SessionUpdate};
use dealroom_core::types::{RoomId, StreamEvent};

use crate::manager::Disposer;

/// Dashboard list shared between the room store and its readers.
pub type SharedSessions = Arc<Mutex<SessionStore>>;

struct RoomSlot {
    state: RoomState,
    link: Option<Disposer>,
}

pub struct RoomStore {
    rooms: HashMap<RoomId, RoomSlot>,
    sessions: SharedSessions,
}

impl RoomStore {
    pub fn new(sessions: SharedSessions) -> Self {
        Self {
            rooms: HashMap::new(),
            sessions,
        }
    }

    pub fn sessions(&self) -> &SharedSessions {
        &self.sessions
    }

    /// Create an empty room. Returns `false` if it already existed.
    pub fn init_room(&mut self, room_id: &str) -> bool {
        if self.rooms.contains_key(room_id) {
            return false;
        }
        self.rooms.insert(
            room_id.to_owned(),
            RoomSlot {
                state: RoomState::new(room_id),
                link: None,
            },
        );
        true
    }

    /// Replace a room's state with a historical snapshot and mirror it.
    pub fn hydrate(&mut self, snapshot: RoomSnapshot, now: DateTime<Utc>) {
        let room_id = snapshot.room_id.clone();
        let update = snapshot.session_update();
        let state = RoomState::hydrate(snapshot);
        match self.rooms.get_mut(&room_id) {
            Some(slot) => slot.state = state,
            None => {
                self.rooms.insert(room_id.clone(), RoomSlot { state, link: None });
            }
        }
        self.project(&room_id, &update, now);
    }

    /// Run one event through the reducer.
    ///
    /// `None` when the room was never initialized or its connection is
    /// already closed; the store is untouched and the link should stop.
    /// Otherwise the effects not handled here (error surfacing and
    /// transport close) in reducer order.
    pub fn apply(
        &mut self,
        room_id: &str,
        event: &StreamEvent,
        now: DateTime<Utc>,
    ) -> Option<Vec<RoomEffect>> {
        let Some(slot) = self.rooms.get_mut(room_id) else {
            tracing::warn!(room_id, kind = event.kind(), "event for uninitialized room dropped");
            return None;
        };
        if slot.state.connection.is_closed() {
            tracing::debug!(room_id, kind = event.kind(), "event for closed room dropped");
            return None;
        }

        let (next, effects) = apply_event(std::mem::take(&mut slot.state), event, now);
        slot.state = next;

        let mut rest = Vec::with_capacity(effects.len());
        for effect in effects {
            match effect {
                RoomEffect::Project(update) => self.project(room_id, &update, now),
                other => rest.push(other),
            }
        }
        Some(rest)
    }

    fn project(&self, room_id: &str, update: &SessionUpdate, now: DateTime<Utc>) {
        match self.sessions.lock() {
            Ok(mut sessions) => {
                sessions.apply_projection(room_id, update, now);
            }
            Err(_) => tracing::error!(room_id, "session store poisoned; projection skipped"),
        }
    }

    pub fn set_connection(&mut self, room_id: &str, state: ConnectionState) -> bool {
        match self.rooms.get_mut(room_id) {
            Some(slot) => {
                slot.state.set_connection(state);
                true
            }
            None => false,
        }
    }

    /// Record a state reported by a room's own link. A closed room ignores
    /// reports from a link that was disposed while still running.
    pub fn report_connection(&mut self, room_id: &str, state: ConnectionState) -> bool {
        match self.rooms.get_mut(room_id) {
            Some(slot) if slot.state.connection.is_closed() => {
                tracing::debug!(room_id, %state, "state report for closed room dropped");
                false
            }
            Some(slot) => {
                slot.state.set_connection(state);
                true
            }
            None => false,
        }
    }

    /// Keep the link's disposer with its room. A previous link is disposed.
    pub fn attach_link(&mut self, room_id: &str, link: Disposer) -> bool {
        match self.rooms.get_mut(room_id) {
            Some(slot) => {
                if let Some(old) = slot.link.replace(link) {
                    old.dispose();
                }
                true
            }
            None => {
                link.dispose();
                false
            }
        }
    }

    pub fn take_link(&mut self, room_id: &str) -> Option<Disposer> {
        self.rooms.get_mut(room_id).and_then(|slot| slot.link.take())
    }

    pub fn has_link(&self, room_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|slot| slot.link.is_some())
    }

    /// Drop a room, disposing its link first.
    pub fn clear_room(&mut self, room_id: &str) -> Option<RoomState> {
        let slot = self.rooms.remove(room_id)?;
        if let Some(link) = &slot.link {
            link.dispose();
        }
        Some(slot.state)
    }

    pub fn dismiss_notice(&mut self, room_id: &str) {
        if let Some(slot) = self.rooms.get_mut(room_id) {
            slot.state.dismiss_notice();
        }
    }

    pub fn room(&self, room_id: &str) -> Option<&RoomState> {
        self.rooms.get(room_id).map(|slot| &slot.state)
    }
}
