//! Terminal rendering for rooms and the dashboard list.

use std::collections::BTreeMap;

use dealroom_core::connection::ConnectionState;
use dealroom_core::room::RoomState;
use dealroom_core::session::{DashboardRoom, RoomStatus};
use dealroom_core::types::{DealroomError, Message, Offer, SenderKind};

const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// Resolve --color flag to bool.
pub fn resolve_color(color: &str) -> bool {
    use std::io::IsTerminal;
    match color {
        "always" => true,
        "never" => false,
        _ => std::io::stdout().is_terminal(),
    }
}

fn paint(text: &str, code: &str, color: bool) -> String {
    if color {
        format!("{code}{text}{RESET}")
    } else {
        text.to_string()
    }
}

/// Right-truncate to `max_len` characters with an ellipsis.
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_len.saturating_sub(1)).collect();
        format!("{kept}\u{2026}")
    }
}

pub fn format_message(room_id: &str, msg: &Message, color: bool) -> String {
    let who = match msg.sender_kind {
        SenderKind::Buyer => paint(&msg.sender_name, CYAN, color),
        SenderKind::Seller => paint(&msg.sender_name, YELLOW, color),
        SenderKind::System => paint(&msg.sender_name, BOLD, color),
    };
    let mut line = format!(
        "{} {}: {}",
        paint(&format!("[{room_id} r{}]", msg.turn), DIM, color),
        who,
        msg.text
    );
    if let Some(offer) = &msg.offer {
        line.push_str(&paint(&format!("  ({})", offer_terms(offer)), DIM, color));
    }
    line
}

fn offer_terms(offer: &Offer) -> String {
    format!("{} x ${:.2}", offer.quantity, offer.price)
}

pub fn format_offer(room_id: &str, seller_id: &str, offer: &Offer, color: bool) -> String {
    format!(
        "{} offer {} ({seller_id}): {}",
        paint(&format!("[{room_id}]"), DIM, color),
        offer.seller_name,
        offer_terms(offer)
    )
}

pub fn format_round(room_id: &str, round: u32, max_rounds: Option<u32>, color: bool) -> String {
    let label = match max_rounds {
        Some(max) => format!("round {round}/{max}"),
        None => format!("round {round}"),
    };
    format!("{} {}", paint(&format!("[{room_id}]"), DIM, color), paint(&label, BOLD, color))
}

pub fn format_connection(room_id: &str, state: ConnectionState, color: bool) -> String {
    let text = state.to_string();
    let code = match state {
        ConnectionState::Open => GREEN,
        ConnectionState::Closed { .. } if state.is_stalled() => RED,
        ConnectionState::Reconnecting { .. } => YELLOW,
        _ => DIM,
    };
    let mut line = format!("{} {}", paint(&format!("[{room_id}]"), DIM, color), paint(&text, code, color));
    if state.is_stalled() {
        line.push_str(" - stalled, restart to resume");
    }
    line
}

pub fn format_error(room_id: &str, err: &DealroomError, color: bool) -> String {
    format!("{} {}", paint(&format!("[{room_id}]"), DIM, color), paint(&err.to_string(), RED, color))
}

fn status_label(status: RoomStatus, color: bool) -> String {
    let code = match status {
        RoomStatus::Pending => DIM,
        RoomStatus::Active => YELLOW,
        RoomStatus::Completed => GREEN,
    };
    paint(status.as_str(), code, color)
}

/// Dashboard list, one row per room.
pub fn format_dashboard(rooms: &[&DashboardRoom], color: bool) -> String {
    if rooms.is_empty() {
        return "(no rooms)".to_string();
    }
    let mut lines = Vec::with_capacity(rooms.len());
    for room in rooms {
        let round = match room.max_rounds {
            Some(max) => format!("{}/{max}", room.current_round),
            None => room.current_round.to_string(),
        };
        let deal = match &room.final_deal {
            Some(terms) => format!(
                "{}: {} x ${:.2} = ${:.2}",
                terms.seller_name, terms.quantity, terms.price, terms.total_cost
            ),
            None => "-".to_string(),
        };
        let title = room.title.as_deref().map(|t| truncate(t, 24)).unwrap_or_default();
        // Pad before painting so escape codes do not skew the columns.
        let status = format!("{:<9}", room.status.as_str());
        let status = status.replacen(room.status.as_str(), &status_label(room.status, color), 1);
        lines.push(format!(
            "{:<12} {status} {:>5}  {:<24}  {deal}",
            truncate(&room.room_id, 12),
            round,
            title
        ));
    }
    lines.join("\n")
}

/// Full transcript of a room, for history output.
pub fn format_transcript(room: &RoomState, color: bool) -> String {
    let mut lines: Vec<String> = room
        .messages
        .iter()
        .map(|m| format_message(&room.room_id, m, color))
        .collect();
    for (seller_id, offer) in &room.offers {
        lines.push(format_offer(&room.room_id, seller_id, offer, color));
    }
    lines.join("\n")
}

/// What has already been printed for one room.
#[derive(Debug, Default)]
pub struct RoomCursor {
    messages_seen: usize,
    offers: BTreeMap<String, Offer>,
    round: Option<u32>,
    connection: Option<ConnectionState>,
}

impl RoomCursor {
    /// Lines describing what changed since the previous call.
    pub fn advance(&mut self, room: &RoomState, color: bool) -> Vec<String> {
        let mut out = Vec::new();

        if self.connection != Some(room.connection) {
            self.connection = Some(room.connection);
            out.push(format_connection(&room.room_id, room.connection, color));
        }
        if room.current_round > 0 && self.round != Some(room.current_round) {
            self.round = Some(room.current_round);
            out.push(format_round(&room.room_id, room.current_round, room.max_rounds, color));
        }
        for msg in room.messages.iter().skip(self.messages_seen) {
            out.push(format_message(&room.room_id, msg, color));
        }
        self.messages_seen = room.messages.len();

        for (seller_id, offer) in &room.offers {
            if self.offers.get(seller_id) != Some(offer) {
                out.push(format_offer(&room.room_id, seller_id, offer, color));
                self.offers.insert(seller_id.clone(), offer.clone());
            }
        }
        out
    }
}
