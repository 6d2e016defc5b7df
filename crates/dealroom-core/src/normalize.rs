//! Maps raw stream payloads into canonical [`StreamEvent`]s.
//!
//! Normalization rules:
//! - text is read from `content`, falling back to `message`
//! - reasoning markup (pseudo-tags and labeled prefix lines) is stripped
//! - an empty buyer turn becomes [`BUYER_PLACEHOLDER`]; any other empty turn
//!   is dropped
//! - a seller turn with an embedded offer yields a `Message` (offer attached)
//!   followed by an `OfferUpdate`
//! - a seller turn with no text but an offer gets a one-line offer summary

use chrono::{DateTime, Utc};

use crate::types::{DealroomError, Decision, ErrorOrigin, Offer, SenderKind, StreamEvent};
use crate::wire::{
    RawEvent, RawMessage, RawSellerResponse, parse_timestamp, pick_text, pick_turn,
};

/// Shown in place of a buyer turn whose text was entirely reasoning.
pub const BUYER_PLACEHOLDER: &str = "reviewing offers…";

const REASONING_TAGS: [&str; 5] = ["think", "thinking", "reasoning", "scratchpad", "internal"];

const REASONING_LABELS: [&str; 5] = ["reasoning:", "thinking:", "thought:", "internal:", "analysis:"];

/// Parse and normalize one raw JSON payload.
///
/// Returns an empty vec when the payload is valid but carries nothing to
/// display. Malformed JSON and unknown `type`s are protocol errors.
pub fn normalize(payload: &str, received_at: DateTime<Utc>) -> Result<Vec<StreamEvent>, DealroomError> {
    let raw: RawEvent =
        serde_json::from_str(payload).map_err(|e| DealroomError::Protocol(e.to_string()))?;
    Ok(normalize_raw(raw, received_at))
}

/// Normalize an already-deserialized payload.
pub fn normalize_raw(raw: RawEvent, received_at: DateTime<Utc>) -> Vec<StreamEvent> {
    match raw {
        RawEvent::Connected(c) => vec![StreamEvent::Connected {
            room_id: c.room_id,
            timestamp: parse_timestamp(c.timestamp.as_deref(), received_at),
        }],
        RawEvent::Message(m) => {
            let kind = sender_kind_or(&m, SenderKind::Buyer);
            chat_message(m, kind, received_at).into_iter().collect()
        }
        RawEvent::BuyerMessage(m) => chat_message(m, SenderKind::Buyer, received_at)
            .into_iter()
            .collect(),
        RawEvent::SellerResponse(r) => seller_response(r, received_at),
        RawEvent::Offer(o) => {
            let seller_name = o.seller_name.unwrap_or_else(|| o.seller_id.clone());
            vec![StreamEvent::OfferUpdate {
                seller_id: o.seller_id,
                seller_name,
                price: o.price_per_unit,
                quantity: o.quantity,
                timestamp: parse_timestamp(o.timestamp.as_deref(), received_at),
            }]
        }
        RawEvent::Decision(d) => vec![StreamEvent::DecisionMade(Decision {
            selected_seller_id: d.chosen_seller_id,
            selected_seller_name: d.chosen_seller_name,
            final_price: d.final_price,
            quantity: d.final_quantity,
            reason: d.reason.map(|r| strip_reasoning(&r)).filter(|r| !r.is_empty()),
            total_cost: d.total_cost,
            timestamp: parse_timestamp(d.timestamp.as_deref(), received_at),
        })],
        RawEvent::RoundStart(r) => vec![StreamEvent::RoundStarted {
            round: r.round_number,
            max_rounds: r.max_rounds,
        }],
        RawEvent::NegotiationComplete(c) => vec![StreamEvent::NegotiationComplete {
            outcome: c.outcome.or(c.status),
            reason: c.reason,
            timestamp: parse_timestamp(c.timestamp.as_deref(), received_at),
        }],
        RawEvent::Heartbeat(h) => vec![StreamEvent::Heartbeat {
            timestamp: parse_timestamp(h.timestamp.as_deref(), received_at),
        }],
        RawEvent::Error(e) => vec![StreamEvent::Error {
            message: if e.message.trim().is_empty() {
                "unspecified server error".to_owned()
            } else {
                e.message
            },
            code: e.error_code,
            origin: ErrorOrigin::Server,
        }],
    }
}

fn sender_kind_or(m: &RawMessage, default: SenderKind) -> SenderKind {
    match m.sender_type.as_deref().map(str::parse::<SenderKind>) {
        Some(Ok(kind)) => kind,
        Some(Err(e)) => {
            tracing::debug!(error = %e, "unrecognized sender_type, using {default}");
            default
        }
        None => default,
    }
}

fn chat_message(m: RawMessage, kind: SenderKind, received_at: DateTime<Utc>) -> Option<StreamEvent> {
    let mut text = strip_reasoning(pick_text(m.content.as_deref(), m.message.as_deref()));
    if text.is_empty() {
        if kind != SenderKind::Buyer {
            tracing::debug!(sender_kind = %kind, "dropping empty message");
            return None;
        }
        text = BUYER_PLACEHOLDER.to_owned();
    }

    let sender_name = m
        .sender_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| default_sender_name(kind).to_owned());

    Some(StreamEvent::Message {
        sender_kind: kind,
        sender_id: m.sender_id,
        sender_name,
        text,
        turn: pick_turn(m.turn_number, m.round),
        mentioned: m.mentioned_sellers.unwrap_or_default(),
        offer: None,
        timestamp: parse_timestamp(m.timestamp.as_deref(), received_at),
    })
}

fn seller_response(r: RawSellerResponse, received_at: DateTime<Utc>) -> Vec<StreamEvent> {
    let timestamp = parse_timestamp(r.timestamp.as_deref(), received_at);
    let sender_name = r
        .sender_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| r.seller_id.clone());
    let offer = r.offer.map(|o| Offer {
        price: o.price,
        quantity: o.quantity,
        timestamp,
        seller_name: sender_name.clone(),
    });

    let mut text = strip_reasoning(pick_text(r.content.as_deref(), r.message.as_deref()));
    if text.is_empty() {
        match &offer {
            Some(o) => text = describe_offer(o),
            None => {
                tracing::debug!(seller_id = %r.seller_id, "dropping empty seller response");
                return Vec::new();
            }
        }
    }

    let mut events = vec![StreamEvent::Message {
        sender_kind: SenderKind::Seller,
        sender_id: Some(r.seller_id.clone()),
        sender_name: sender_name.clone(),
        text,
        turn: pick_turn(r.turn_number, r.round),
        mentioned: Vec::new(),
        offer: offer.clone(),
        timestamp,
    }];

    if let Some(o) = offer {
        events.push(StreamEvent::OfferUpdate {
            seller_id: r.seller_id,
            seller_name: sender_name,
            price: o.price,
            quantity: o.quantity,
            timestamp,
        });
    }
    events
}

fn default_sender_name(kind: SenderKind) -> &'static str {
    match kind {
        SenderKind::Buyer => "Buyer",
        SenderKind::Seller => "Seller",
        SenderKind::System => "System",
    }
}

/// One-line summary used when a seller sends an offer without any text.
pub fn describe_offer(offer: &Offer) -> String {
    format!(
        "Offers {} units at ${:.2} each",
        offer.quantity, offer.price
    )
}

/// Remove internal reasoning markup from agent text.
///
/// Strips `<think>`-style blocks (case-insensitive, an unterminated block
/// runs to the end), text preceding an orphan closing tag, and lines that
/// start with a reasoning label such as `Reasoning:`. The result is trimmed.
pub fn strip_reasoning(text: &str) -> String {
    let mut out = text.to_owned();
    for tag in REASONING_TAGS {
        out = strip_tag_blocks(&out, tag);
    }

    let kept: Vec<&str> = out
        .lines()
        .filter(|line| {
            let lower = line.trim_start().to_ascii_lowercase();
            !REASONING_LABELS.iter().any(|label| lower.starts_with(label))
        })
        .collect();

    kept.join("\n").trim().to_owned()
}

fn strip_tag_blocks(text: &str, tag: &str) -> String {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut out = text.to_owned();

    loop {
        // ASCII lowercasing keeps byte offsets aligned with `out`.
        let lower = out.to_ascii_lowercase();
        let open_at = lower.find(&open);
        let close_at = lower.find(&close);

        match (open_at, close_at) {
            (Some(start), _) => {
                let end = lower[start + open.len()..]
                    .find(&close)
                    .map_or(out.len(), |rel| start + open.len() + rel + close.len());
                out.replace_range(start..end, "");
            }
            (None, Some(close_start)) => {
                out.replace_range(..close_start + close.len(), "");
            }
            (None, None) => return out,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
