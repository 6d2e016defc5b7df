//! Per-room negotiation state and the reducer that applies canonical events.
//!
//! [`apply_event`] is pure: it takes the current state and one event and
//! returns the next state plus a list of [`RoomEffect`]s for the caller to
//! carry out (dashboard projection, error surfacing, transport close).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionState;
use crate::session::{RoomStatus, SessionUpdate};
use crate::types::{
    DealroomError, Decision, ErrorOrigin, Message, Offer, RoomId, SenderKind, StreamEvent,
};

/// Dismissible notice for the last surfaced error.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub message: String,
    pub code: Option<String>,
    pub origin: ErrorOrigin,
    pub raised_at: DateTime<Utc>,
}

impl Notice {
    /// The error a consumer callback receives for this notice.
    pub fn to_error(&self) -> DealroomError {
        match self.origin {
            ErrorOrigin::Transport => DealroomError::Transport(self.message.clone()),
            ErrorOrigin::Server => DealroomError::Application {
                message: self.message.clone(),
                code: self.code.clone(),
            },
        }
    }
}

/// Side effects requested by the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEffect {
    /// Mirror these fields into the dashboard room list.
    Project(SessionUpdate),
    /// Hand the notice to the consumer's error callback.
    SurfaceError(Notice),
    /// Close the room's transport before handling anything else.
    CloseTransport,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomState {
    pub room_id: RoomId,
    /// Append-only, in delivery order.
    pub messages: Vec<Message>,
    /// Latest offer per seller id.
    pub offers: BTreeMap<String, Offer>,
    pub current_round: u32,
    pub max_rounds: Option<u32>,
    pub decision: Option<Decision>,
    pub is_streaming: bool,
    /// Last state reported by the connection manager.
    pub connection: ConnectionState,
    pub notice: Option<Notice>,
}

impl RoomState {
    pub fn new(room_id: impl Into<RoomId>) -> Self {
        Self {
            room_id: room_id.into(),
            ..Self::default()
        }
    }

    /// Build a room from a historical snapshot (used instead of streaming
    /// for rooms that already completed).
    pub fn hydrate(snapshot: RoomSnapshot) -> Self {
        Self {
            room_id: snapshot.room_id,
            messages: snapshot.messages,
            offers: snapshot.offers,
            current_round: snapshot.current_round,
            max_rounds: snapshot.max_rounds,
            decision: snapshot.decision,
            ..Self::default()
        }
    }

    /// Record a connection-state report from the connection manager.
    ///
    /// Reaching `Closed` always ends streaming.
    pub fn set_connection(&mut self, state: ConnectionState) {
        self.connection = state;
        if state.is_closed() {
            self.is_streaming = false;
        }
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    pub fn offer(&self, seller_id: &str) -> Option<&Offer> {
        self.offers.get(seller_id)
    }
}

/// Apply one canonical event to a room.
pub fn apply_event(
    mut room: RoomState,
    event: &StreamEvent,
    now: DateTime<Utc>,
) -> (RoomState, Vec<RoomEffect>) {
    let mut effects = Vec::new();

    match event {
        StreamEvent::Connected { .. } => {
            room.is_streaming = true;
            if room
                .notice
                .as_ref()
                .is_some_and(|n| n.origin == ErrorOrigin::Transport)
            {
                room.notice = None;
            }
        }
        StreamEvent::Message {
            sender_kind,
            sender_id,
            sender_name,
            text,
            turn,
            mentioned,
            offer,
            timestamp,
        } => {
            let message = Message {
                id: next_message_id(&room),
                turn: *turn,
                timestamp: *timestamp,
                sender_kind: *sender_kind,
                sender_id: sender_id.clone(),
                sender_name: sender_name.clone(),
                text: text.clone(),
                mentioned: mentioned.iter().cloned().collect(),
                offer: offer.clone(),
            };
            room.messages.push(message);
        }
        StreamEvent::OfferUpdate {
            seller_id,
            seller_name,
            price,
            quantity,
            timestamp,
        } => {
            room.offers.insert(
                seller_id.clone(),
                Offer {
                    price: *price,
                    quantity: *quantity,
                    timestamp: *timestamp,
                    seller_name: seller_name.clone(),
                },
            );
        }
        StreamEvent::RoundStarted { round, max_rounds } => {
            room.current_round = *round;
            if max_rounds.is_some() {
                room.max_rounds = *max_rounds;
            }
            effects.push(RoomEffect::Project(SessionUpdate::round_started(
                *round,
                room.max_rounds,
            )));
        }
        StreamEvent::DecisionMade(decision) => {
            if room.decision.is_some() {
                tracing::debug!(room_id = %room.room_id, "ignoring repeated decision");
                return (room, effects);
            }
            let summary = Message {
                id: next_message_id(&room),
                turn: room.current_round,
                timestamp: decision.timestamp,
                sender_kind: SenderKind::System,
                sender_id: None,
                sender_name: "System".to_owned(),
                text: summarize_decision(decision),
                mentioned: Default::default(),
                offer: None,
            };
            room.messages.push(summary);
            if let Some(terms) = decision.deal_terms() {
                effects.push(RoomEffect::Project(SessionUpdate::completed(Some(terms))));
            }
            room.decision = Some(decision.clone());
        }
        StreamEvent::NegotiationComplete { .. } => {
            room.is_streaming = false;
            let terms = room.decision.as_ref().and_then(Decision::deal_terms);
            if terms.is_none() {
                tracing::debug!(room_id = %room.room_id, "completed without deal terms");
            }
            effects.push(RoomEffect::Project(SessionUpdate::completed(terms)));
            effects.push(RoomEffect::CloseTransport);
        }
        StreamEvent::Error {
            message,
            code,
            origin,
        } => {
            let notice = Notice {
                message: message.clone(),
                code: code.clone(),
                origin: *origin,
                raised_at: now,
            };
            room.notice = Some(notice.clone());
            effects.push(RoomEffect::SurfaceError(notice));
        }
        StreamEvent::Heartbeat { .. } => {}
    }

    (room, effects)
}

fn next_message_id(room: &RoomState) -> String {
    format!("{}-{}", room.room_id, room.messages.len())
}

/// System message text announcing the buyer's decision.
pub fn summarize_decision(decision: &Decision) -> String {
    let mut text = if decision.has_winner() {
        let seller = decision
            .selected_seller_name
            .as_deref()
            .or(decision.selected_seller_id.as_deref())
            .unwrap_or("seller");
        let mut s = format!("Deal reached with {seller}");
        if let (Some(quantity), Some(price)) = (decision.quantity, decision.final_price) {
            s.push_str(&format!(": {quantity} units at ${price:.2}"));
        }
        if let Some(total) = decision.total_cost {
            s.push_str(&format!(" (total ${total:.2})"));
        }
        s.push('.');
        s
    } else {
        "Negotiation ended without a deal.".to_owned()
    };
    if let Some(reason) = decision.reason.as_deref().filter(|r| !r.is_empty()) {
        text.push_str(" Reason: ");
        text.push_str(reason);
    }
    text
}

/// Historical room state, as returned by the state endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub offers: BTreeMap<String, Offer>,
    #[serde(default)]
    pub current_round: u32,
    pub max_rounds: Option<u32>,
    pub decision: Option<Decision>,
    #[serde(default)]
    pub status: RoomStatus,
}

impl RoomSnapshot {
    /// Projection mirroring this snapshot onto the dashboard.
    pub fn session_update(&self) -> SessionUpdate {
        SessionUpdate {
            round: Some(self.current_round),
            max_rounds: self.max_rounds,
            status: Some(self.status),
            final_deal: self.decision.as_ref().and_then(Decision::deal_terms),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("valid datetime")
    }

    fn apply_all(room: RoomState, events: &[StreamEvent]) -> (RoomState, Vec<RoomEffect>) {
        events.iter().fold((room, Vec::new()), |(room, mut all), ev| {
            let (next, effects) = apply_event(room, ev, t0());
            all.extend(effects);
            (next, all)
        })
    }

    fn chat(kind: SenderKind, text: &str) -> StreamEvent {
        StreamEvent::Message {
            sender_kind: kind,
            sender_id: None,
            sender_name: kind.to_string(),
            text: text.to_owned(),
            turn: 1,
            mentioned: vec!["Acme".into(), "Acme".into()],
            offer: None,
            timestamp: t0(),
        }
    }

    fn offer(seller: &str, price: f64, quantity: u32) -> StreamEvent {
        StreamEvent::OfferUpdate {
            seller_id: seller.to_owned(),
            seller_name: format!("{seller}-name"),
            price,
            quantity,
            timestamp: t0(),
        }
    }

    fn decision(total_cost: Option<f64>) -> Decision {
        Decision {
            selected_seller_id: Some("s1".into()),
            selected_seller_name: Some("Acme".into()),
            final_price: Some(95.0),
            quantity: Some(5),
            reason: Some("lowest price".into()),
            total_cost,
            timestamp: t0(),
        }
    }

    fn complete() -> StreamEvent {
        StreamEvent::NegotiationComplete {
            outcome: None,
            reason: None,
            timestamp: t0(),
        }
    }

    #[test]
    fn connected_starts_streaming() {
        let (room, effects) = apply_event(
            RoomState::new("r1"),
            &StreamEvent::Connected {
                room_id: Some("r1".into()),
                timestamp: t0(),
            },
            t0(),
        );
        assert!(room.is_streaming);
        assert!(effects.is_empty());
    }

    #[test]
    fn messages_append_with_sequential_ids() {
        let (room, _) = apply_all(
            RoomState::new("r1"),
            &[chat(SenderKind::Buyer, "hi"), chat(SenderKind::Seller, "hello")],
        );
        let ids: Vec<&str> = room.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["r1-0", "r1-1"]);
        assert_eq!(room.messages[1].text, "hello");
        assert_eq!(room.messages[0].mentioned.len(), 1, "mentions are a set");
    }

    #[test]
    fn offer_update_is_last_write_wins() {
        let (room, _) = apply_all(
            RoomState::new("r1"),
            &[offer("s1", 100.0, 5), offer("s2", 80.0, 3), offer("s1", 90.0, 6)],
        );
        assert_eq!(room.offers.len(), 2);
        let s1 = room.offer("s1").expect("s1 offer");
        assert!((s1.price - 90.0).abs() < f64::EPSILON);
        assert_eq!(s1.quantity, 6);
    }

    #[test]
    fn round_started_projects_active() {
        let (room, effects) = apply_event(
            RoomState::new("r1"),
            &StreamEvent::RoundStarted {
                round: 2,
                max_rounds: Some(4),
            },
            t0(),
        );
        assert_eq!(room.current_round, 2);
        assert_eq!(
            effects,
            vec![RoomEffect::Project(SessionUpdate::round_started(2, Some(4)))]
        );

        // Later rounds without max_rounds keep the known maximum.
        let (_, effects) = apply_event(
            room,
            &StreamEvent::RoundStarted {
                round: 3,
                max_rounds: None,
            },
            t0(),
        );
        assert_eq!(
            effects,
            vec![RoomEffect::Project(SessionUpdate::round_started(3, Some(4)))]
        );
    }

    #[test]
    fn decision_with_terms_appends_summary_and_projects() {
        let (room, effects) = apply_event(
            RoomState::new("r1"),
            &StreamEvent::DecisionMade(decision(Some(475.0))),
            t0(),
        );
        assert_eq!(room.messages.len(), 1);
        let summary = &room.messages[0];
        assert_eq!(summary.sender_kind, SenderKind::System);
        assert_eq!(
            summary.text,
            "Deal reached with Acme: 5 units at $95.00 (total $475.00). Reason: lowest price"
        );
        assert_eq!(effects.len(), 1);
        assert!(matches!(
            &effects[0],
            RoomEffect::Project(SessionUpdate {
                status: Some(RoomStatus::Completed),
                final_deal: Some(_),
                ..
            })
        ));
    }

    #[test]
    fn decision_without_total_does_not_project() {
        let (room, effects) = apply_event(
            RoomState::new("r1"),
            &StreamEvent::DecisionMade(decision(None)),
            t0(),
        );
        assert!(room.decision.is_some());
        assert!(effects.is_empty());
    }

    #[test]
    fn repeated_decision_is_ignored() {
        let first = StreamEvent::DecisionMade(decision(Some(475.0)));
        let mut second_decision = decision(Some(500.0));
        second_decision.final_price = Some(100.0);
        let second = StreamEvent::DecisionMade(second_decision);

        let (room, effects) = apply_all(RoomState::new("r1"), &[first, second]);
        assert_eq!(room.messages.len(), 1, "no duplicate summary message");
        assert_eq!(effects.len(), 1);
        assert_eq!(room.decision.and_then(|d| d.final_price), Some(95.0));
    }

    #[test]
    fn no_winner_summary() {
        let d = Decision {
            selected_seller_id: None,
            selected_seller_name: None,
            final_price: None,
            quantity: None,
            reason: None,
            total_cost: None,
            timestamp: t0(),
        };
        assert_eq!(summarize_decision(&d), "Negotiation ended without a deal.");
    }

    #[test]
    fn complete_uses_stored_decision_terms() {
        let (room, effects) = apply_all(
            RoomState::new("r1"),
            &[
                StreamEvent::Connected {
                    room_id: None,
                    timestamp: t0(),
                },
                StreamEvent::DecisionMade(decision(Some(475.0))),
                complete(),
            ],
        );
        assert!(!room.is_streaming);
        let tail = &effects[effects.len() - 2..];
        match &tail[0] {
            RoomEffect::Project(update) => {
                assert_eq!(update.status, Some(RoomStatus::Completed));
                assert_eq!(
                    update.final_deal.as_ref().map(|t| t.total_cost),
                    Some(475.0)
                );
            }
            other => panic!("unexpected effect: {other:?}"),
        }
        assert_eq!(tail[1], RoomEffect::CloseTransport);
    }

    #[test]
    fn complete_without_decision_degrades() {
        let (_, effects) = apply_event(RoomState::new("r1"), &complete(), t0());
        assert_eq!(
            effects,
            vec![
                RoomEffect::Project(SessionUpdate::completed(None)),
                RoomEffect::CloseTransport,
            ]
        );
    }

    #[test]
    fn error_sets_notice_and_surfaces() {
        let (room, effects) = apply_event(
            RoomState::new("r1"),
            &StreamEvent::transport_error("connection reset"),
            t0(),
        );
        let notice = room.notice.clone().expect("notice");
        assert_eq!(notice.origin, ErrorOrigin::Transport);
        assert_eq!(effects, vec![RoomEffect::SurfaceError(notice)]);

        // A successful reconnect clears a transport notice.
        let (room, _) = apply_event(
            room,
            &StreamEvent::Connected {
                room_id: None,
                timestamp: t0(),
            },
            t0(),
        );
        assert!(room.notice.is_none());
    }

    #[test]
    fn server_notice_survives_reconnect_until_dismissed() {
        let server_error = StreamEvent::Error {
            message: "llm timeout".into(),
            code: None,
            origin: ErrorOrigin::Server,
        };
        let (mut room, _) = apply_all(
            RoomState::new("r1"),
            &[
                server_error,
                StreamEvent::Connected {
                    room_id: None,
                    timestamp: t0(),
                },
            ],
        );
        assert!(room.notice.is_some());
        assert!(matches!(
            room.notice.as_ref().map(Notice::to_error),
            Some(DealroomError::Application { .. })
        ));
        room.dismiss_notice();
        assert!(room.notice.is_none());
    }

    #[test]
    fn heartbeat_changes_nothing() {
        let before = RoomState::new("r1");
        let (after, effects) = apply_event(
            before.clone(),
            &StreamEvent::Heartbeat { timestamp: t0() },
            t0(),
        );
        assert_eq!(before, after);
        assert!(effects.is_empty());
    }

    #[test]
    fn closed_connection_stops_streaming() {
        let mut room = RoomState::new("r1");
        room.is_streaming = true;
        room.set_connection(ConnectionState::Closed {
            reason: crate::connection::CloseReason::Exhausted,
        });
        assert!(!room.is_streaming);
        assert!(room.connection.is_stalled());
    }

    #[test]
    fn hydrate_from_snapshot() {
        let snapshot: RoomSnapshot = serde_json::from_value(serde_json::json!({
            "room_id": "r9",
            "current_round": 3,
            "max_rounds": 3,
            "status": "completed",
            "offers": {
                "s1": {"price": 9.5, "quantity": 10, "timestamp": "2026-03-01T09:00:00Z", "seller_name": "Acme"}
            },
            "decision": {
                "selected_seller_id": "s1",
                "selected_seller_name": "Acme",
                "final_price": 9.5,
                "quantity": 10,
                "reason": null,
                "total_cost": 95.0,
                "timestamp": "2026-03-01T09:05:00Z"
            }
        }))
        .expect("snapshot");

        let update = snapshot.session_update();
        assert_eq!(update.status, Some(RoomStatus::Completed));
        assert!(update.final_deal.is_some());

        let room = RoomState::hydrate(snapshot);
        assert_eq!(room.room_id, "r9");
        assert!(room.messages.is_empty());
        assert_eq!(room.current_round, 3);
        assert!(!room.is_streaming);
        assert!(room.offer("s1").is_some());
    }
}
