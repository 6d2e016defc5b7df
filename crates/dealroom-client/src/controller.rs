//! Room lifecycle: handshake, grace delay, stream link, history, teardown.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use dealroom_core::connection::{CloseReason, ConnectionState};
use dealroom_core::reconnect::ReconnectPolicy;
use dealroom_core::room::{RoomEffect, RoomState};
use dealroom_core::types::{DealroomError, RoomId, StreamEvent};

use crate::api::{NegotiationApi, StartOutcome};
use crate::manager::{LinkControl, StreamConnectionManager, StreamHandler};
use crate::store::{RoomStore, SharedSessions};
use crate::transport::Transport;

/// Grace delay between a successful handshake and opening the stream.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub grace: Duration,
    pub policy: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            grace: DEFAULT_GRACE,
            policy: ReconnectPolicy::default(),
        }
    }
}

/// Called for every surfaced error, with the room it belongs to.
pub type ErrorCallback = Arc<dyn Fn(&str, &DealroomError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableOutcome {
    Streaming(StartOutcome),
    /// Completed room loaded from history; no stream opened.
    Hydrated,
}

pub struct RoomController<A> {
    api: Arc<A>,
    manager: StreamConnectionManager,
    store: Arc<Mutex<RoomStore>>,
    grace: Duration,
    on_error: Option<ErrorCallback>,
}

impl<A> Clone for RoomController<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            manager: self.manager.clone(),
            store: Arc::clone(&self.store),
            grace: self.grace,
            on_error: self.on_error.clone(),
        }
    }
}

impl<A: NegotiationApi> RoomController<A> {
    pub fn new(
        api: A,
        transport: Arc<dyn Transport>,
        sessions: SharedSessions,
        config: ClientConfig,
    ) -> Self {
        Self {
            api: Arc::new(api),
            manager: StreamConnectionManager::new(transport, config.policy),
            store: Arc::new(Mutex::new(RoomStore::new(sessions))),
            grace: config.grace,
            on_error: None,
        }
    }

    pub fn with_error_callback(
        mut self,
        callback: impl Fn(&str, &DealroomError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn store(&self) -> &Arc<Mutex<RoomStore>> {
        &self.store
    }

    pub fn manager(&self) -> &StreamConnectionManager {
        &self.manager
    }

    fn lock(&self) -> Result<MutexGuard<'_, RoomStore>, DealroomError> {
        self.store
            .lock()
            .map_err(|_| DealroomError::Transport("room store poisoned".into()))
    }

    pub fn init_room(&self, room_id: &str) -> Result<bool, DealroomError> {
        Ok(self.lock()?.init_room(room_id))
    }

    /// Clone of the room's current state.
    pub fn room(&self, room_id: &str) -> Option<RoomState> {
        self.lock().ok()?.room(room_id).cloned()
    }

    /// Start following an initialized room.
    ///
    /// Completed rooms are loaded from history instead. Live rooms go
    /// through the start handshake and the grace delay before the stream
    /// opens. A room cleared during the delay is not opened.
    pub async fn enable_stream(
        &self,
        room_id: &str,
        already_completed: bool,
    ) -> Result<EnableOutcome, DealroomError> {
        {
            let store = self.lock()?;
            if store.room(room_id).is_none() {
                return Err(DealroomError::UnknownRoom(room_id.to_owned()));
            }
            if store.has_link(room_id) {
                return Err(DealroomError::AlreadyOpen(room_id.to_owned()));
            }
        }

        if already_completed {
            let snapshot = self.api.fetch_history(room_id).await?;
            tracing::info!(room_id, messages = snapshot.messages.len(), "loaded room history");
            let mut store = self.lock()?;
            if store.room(room_id).is_none() {
                return Err(DealroomError::UnknownRoom(room_id.to_owned()));
            }
            store.hydrate(snapshot, Utc::now());
            return Ok(EnableOutcome::Hydrated);
        }

        let outcome = self.api.start_negotiation(room_id).await?;
        tracing::info!(room_id, ?outcome, grace_ms = self.grace.as_millis() as u64, "negotiation started");
        tokio::time::sleep(self.grace).await;

        let mut store = self.lock()?;
        if store.room(room_id).is_none() {
            tracing::debug!(room_id, "room cleared during grace delay");
            return Err(DealroomError::UnknownRoom(room_id.to_owned()));
        }
        let handler = RoomLink {
            room_id: room_id.to_owned(),
            store: Arc::clone(&self.store),
            on_error: self.on_error.clone(),
        };
        let link = self.manager.open(room_id, handler)?;
        store.attach_link(room_id, link);
        Ok(EnableOutcome::Streaming(outcome))
    }

    /// Stop streaming a room, cancelling any pending reconnect. Idempotent.
    pub fn disconnect(&self, room_id: &str) -> Result<(), DealroomError> {
        let mut store = self.lock()?;
        if let Some(link) = store.take_link(room_id) {
            link.dispose();
            store.set_connection(
                room_id,
                ConnectionState::Closed {
                    reason: CloseReason::Disconnected,
                },
            );
            tracing::info!(room_id, "room stream disconnected");
        }
        Ok(())
    }

    /// Tear a room down; its link is disposed before the state is dropped.
    pub fn clear_room(&self, room_id: &str) -> Result<Option<RoomState>, DealroomError> {
        Ok(self.lock()?.clear_room(room_id))
    }

    /// Reopen a room after exhaustion or disconnect. Accumulated messages,
    /// offers and decision are kept; the connection starts over from idle.
    pub async fn restart(&self, room_id: &str) -> Result<EnableOutcome, DealroomError> {
        self.disconnect(room_id)?;
        if !self.lock()?.set_connection(room_id, ConnectionState::Idle) {
            return Err(DealroomError::UnknownRoom(room_id.to_owned()));
        }
        self.enable_stream(room_id, false).await
    }

    pub fn dismiss_notice(&self, room_id: &str) -> Result<(), DealroomError> {
        self.lock()?.dismiss_notice(room_id);
        Ok(())
    }
}

/// Stream handler binding one link to its room in the store.
struct RoomLink {
    room_id: RoomId,
    store: Arc<Mutex<RoomStore>>,
    on_error: Option<ErrorCallback>,
}

impl StreamHandler for RoomLink {
    fn on_event(&mut self, event: StreamEvent) -> LinkControl {
        let effects = match self.store.lock() {
            Ok(mut store) => store.apply(&self.room_id, &event, Utc::now()),
            Err(_) => {
                tracing::error!(room_id = %self.room_id, "room store poisoned; closing link");
                return LinkControl::Close;
            }
        };
        // Unknown or already closed room: this link has nothing left to feed.
        let Some(effects) = effects else {
            return LinkControl::Close;
        };

        let mut control = LinkControl::Continue;
        for effect in effects {
            match effect {
                RoomEffect::SurfaceError(notice) => {
                    if let Some(callback) = &self.on_error {
                        callback(&self.room_id, &notice.to_error());
                    }
                }
                RoomEffect::CloseTransport => control = LinkControl::Close,
                RoomEffect::Project(_) => {}
            }
        }
        control
    }

    fn on_state(&mut self, state: ConnectionState) {
        if let Ok(mut store) = self.store.lock() {
            store.report_connection(&self.room_id, state);
        }
    }
}
