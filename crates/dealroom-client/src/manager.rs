//! Per-room stream links with reconnection.
//!
//! [`StreamConnectionManager::open`] spawns one task per room. The task
//! opens the transport, normalizes every frame and hands canonical events to
//! the room's [`StreamHandler`] in delivery order. Transport failures are
//! delivered as `Error` events with transport origin and then fed to the
//! [`ReconnectTracker`]. The returned [`Disposer`] cancels the task,
//! including any pending reconnection timer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dealroom_core::connection::{CloseReason, ConnectionState};
use dealroom_core::normalize::normalize;
use dealroom_core::reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectTracker};
use dealroom_core::types::{DealroomError, RoomId, StreamEvent};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::transport::{FrameStream, Transport};

/// Handler verdict after each event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkControl {
    Continue,
    /// Close the transport; no reconnection follows.
    Close,
}

/// Consumer side of one room link.
pub trait StreamHandler: Send + 'static {
    fn on_event(&mut self, event: StreamEvent) -> LinkControl;

    /// Connection state changes, already validated.
    fn on_state(&mut self, _state: ConnectionState) {}
}

impl<F> StreamHandler for F
where
    F: FnMut(StreamEvent) -> LinkControl + Send + 'static,
{
    fn on_event(&mut self, event: StreamEvent) -> LinkControl {
        self(event)
    }
}

struct ManagerInner {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    /// Live link generation per room.
    links: Mutex<HashMap<RoomId, u64>>,
    next_generation: AtomicU64,
    pending_timers: AtomicUsize,
}

impl ManagerInner {
    fn release(&self, room_id: &str, generation: u64) {
        if let Ok(mut links) = self.links.lock() {
            // A newer link for the same room is not ours to remove.
            if links.get(room_id) == Some(&generation) {
                links.remove(room_id);
            }
        }
    }
}

/// Owns at most one live link per room.
#[derive(Clone)]
pub struct StreamConnectionManager {
    inner: Arc<ManagerInner>,
}

impl StreamConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                policy,
                links: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                pending_timers: AtomicUsize::new(0),
            }),
        }
    }

    /// Open a link for `room_id`. Must be called inside a tokio runtime.
    ///
    /// Fails with [`DealroomError::AlreadyOpen`] while an earlier link for
    /// the room has not been disposed, even if that link already closed.
    /// A transport that cannot even start (bad URL) fails here and leaves
    /// nothing behind; later failures go through reconnection.
    pub fn open<H: StreamHandler>(
        &self,
        room_id: &str,
        handler: H,
    ) -> Result<Disposer, DealroomError> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut links = self
                .inner
                .links
                .lock()
                .map_err(|_| DealroomError::Transport("link table poisoned".into()))?;
            if links.contains_key(room_id) {
                return Err(DealroomError::AlreadyOpen(room_id.to_owned()));
            }
            links.insert(room_id.to_owned(), generation);
        }

        let first = match self.inner.transport.open(room_id) {
            Ok(frames) => frames,
            Err(e) => {
                self.inner.release(room_id, generation);
                tracing::warn!(room_id, error = %e, "room stream could not be opened");
                return Err(e);
            }
        };

        tracing::info!(room_id, generation, "opening room stream");
        let cancel = CancellationToken::new();
        let link = Link {
            inner: Arc::clone(&self.inner),
            room_id: room_id.to_owned(),
            cancel: cancel.clone(),
            state: ConnectionState::Idle,
        };
        tokio::spawn(link.run(handler, first));

        Ok(Disposer {
            inner: Arc::clone(&self.inner),
            room_id: room_id.to_owned(),
            generation,
            cancel,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn is_open(&self, room_id: &str) -> bool {
        self.inner
            .links
            .lock()
            .map(|links| links.contains_key(room_id))
            .unwrap_or(false)
    }

    /// Reconnection timers currently waiting to fire.
    pub fn pending_reconnects(&self) -> usize {
        self.inner.pending_timers.load(Ordering::SeqCst)
    }
}

/// Cancels one room link. Idempotent; also runs on drop.
pub struct Disposer {
    inner: Arc<ManagerInner>,
    room_id: RoomId,
    generation: u64,
    cancel: CancellationToken,
    disposed: AtomicBool,
}

impl Disposer {
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.inner.release(&self.room_id, self.generation);
        tracing::debug!(room_id = %self.room_id, generation = self.generation, "room stream disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Disposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposer")
            .field("room_id", &self.room_id)
            .field("generation", &self.generation)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Counts a scheduled reconnection for as long as it is alive.
struct TimerGuard<'a>(&'a AtomicUsize);

impl<'a> TimerGuard<'a> {
    fn arm(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum PumpOutcome {
    Cancelled,
    /// Handler asked to close.
    Closed,
    Failed(String),
}

struct Link {
    inner: Arc<ManagerInner>,
    room_id: RoomId,
    cancel: CancellationToken,
    state: ConnectionState,
}

impl Link {
    /// `first` is the stream opened by [`StreamConnectionManager::open`];
    /// reconnects open their own.
    async fn run<H: StreamHandler>(mut self, mut handler: H, first: FrameStream) {
        let mut tracker = ReconnectTracker::new(self.inner.policy.clone());
        let mut attempt = 0;
        let mut first = Some(first);

        loop {
            if !self.advance(&mut handler, ConnectionState::Connecting { attempt }) {
                return;
            }

            let opened = match first.take() {
                Some(frames) => Ok(frames),
                None => self.inner.transport.open(&self.room_id),
            };
            let outcome = match opened {
                Ok(frames) => self.pump(frames, &mut handler, &mut tracker).await,
                Err(e) => PumpOutcome::Failed(e.to_string()),
            };

            let reason = match outcome {
                PumpOutcome::Cancelled => return,
                PumpOutcome::Closed => {
                    tracing::info!(room_id = %self.room_id, "room stream closed by handler");
                    self.advance(
                        &mut handler,
                        ConnectionState::Closed {
                            reason: CloseReason::Completed,
                        },
                    );
                    return;
                }
                PumpOutcome::Failed(reason) => reason,
            };

            if self.cancel.is_cancelled() {
                return;
            }
            tracing::warn!(room_id = %self.room_id, error = %reason, "room stream transport error");
            if handler.on_event(StreamEvent::transport_error(reason)) == LinkControl::Close {
                self.advance(
                    &mut handler,
                    ConnectionState::Closed {
                        reason: CloseReason::Completed,
                    },
                );
                return;
            }

            match tracker.record_error() {
                ReconnectDecision::Retry { attempt: next, after_ms } => {
                    self.advance(
                        &mut handler,
                        ConnectionState::Reconnecting {
                            attempt: next,
                            delay_ms: after_ms,
                        },
                    );
                    tracing::info!(room_id = %self.room_id, attempt = next, after_ms, "scheduling reconnect");
                    let _timer = TimerGuard::arm(&self.inner.pending_timers);
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {
                            tracing::debug!(room_id = %self.room_id, "reconnect cancelled");
                            return;
                        }
                        _ = tokio::time::sleep(Duration::from_millis(after_ms)) => {}
                    }
                    attempt = next;
                }
                ReconnectDecision::GiveUp { attempts } => {
                    tracing::warn!(room_id = %self.room_id, attempts, "reconnect attempts exhausted");
                    self.advance(
                        &mut handler,
                        ConnectionState::Closed {
                            reason: CloseReason::Exhausted,
                        },
                    );
                    return;
                }
            }
        }
    }

    async fn pump<H: StreamHandler>(
        &mut self,
        mut frames: FrameStream,
        handler: &mut H,
        tracker: &mut ReconnectTracker,
    ) -> PumpOutcome {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PumpOutcome::Cancelled,
                next = frames.next() => next,
            };

            let payload = match next {
                Some(Ok(payload)) => payload,
                Some(Err(e)) => return PumpOutcome::Failed(e.to_string()),
                None => return PumpOutcome::Failed("stream ended unexpectedly".into()),
            };

            if matches!(self.state, ConnectionState::Connecting { .. })
                && !self.advance(handler, ConnectionState::Open)
            {
                return PumpOutcome::Cancelled;
            }

            let events = match normalize(&payload, Utc::now()) {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(room_id = %self.room_id, error = %e, "dropping malformed payload");
                    continue;
                }
            };

            for event in events {
                if self.cancel.is_cancelled() {
                    return PumpOutcome::Cancelled;
                }
                if matches!(event, StreamEvent::Connected { .. }) {
                    tracker.record_connected();
                }
                tracing::trace!(room_id = %self.room_id, kind = event.kind(), "delivering event");
                if handler.on_event(event) == LinkControl::Close {
                    return PumpOutcome::Closed;
                }
            }
        }
    }

    /// Move to `next` and report it. Returns `false` once cancelled.
    fn advance<H: StreamHandler>(&mut self, handler: &mut H, next: ConnectionState) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match self.state.transition(next) {
            Ok(state) => {
                self.state = state;
                handler.on_state(state);
            }
            Err(e) => tracing::debug!(room_id = %self.room_id, error = %e, "skipping transition"),
        }
        true
    }
}
