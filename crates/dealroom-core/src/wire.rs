//! Raw inbound payload shapes, one per stream `type`.
//!
//! These structs mirror what the server actually pushes, including the
//! near-duplicate field names (`content`/`message`, `turn_number`/`round`).
//! They are consumed only by [`crate::normalize`].

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// One JSON object from the stream, discriminated by its `type` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawEvent {
    Connected(RawConnected),
    Message(RawMessage),
    BuyerMessage(RawMessage),
    SellerResponse(RawSellerResponse),
    Offer(RawOffer),
    Decision(RawDecision),
    RoundStart(RawRoundStart),
    NegotiationComplete(RawComplete),
    Heartbeat(RawHeartbeat),
    Error(RawError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawConnected {
    pub room_id: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub sender_type: Option<String>,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub content: Option<String>,
    pub message: Option<String>,
    pub turn_number: Option<u32>,
    pub round: Option<u32>,
    pub timestamp: Option<String>,
    pub mentioned_sellers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEmbeddedOffer {
    pub price: f64,
    #[serde(deserialize_with = "whole_quantity")]
    pub quantity: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSellerResponse {
    pub seller_id: String,
    pub sender_name: Option<String>,
    pub content: Option<String>,
    pub message: Option<String>,
    pub offer: Option<RawEmbeddedOffer>,
    pub turn_number: Option<u32>,
    pub round: Option<u32>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOffer {
    pub seller_id: String,
    pub seller_name: Option<String>,
    pub price_per_unit: f64,
    #[serde(deserialize_with = "whole_quantity")]
    pub quantity: u32,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDecision {
    pub chosen_seller_id: Option<String>,
    pub chosen_seller_name: Option<String>,
    pub final_price: Option<f64>,
    #[serde(default, deserialize_with = "whole_quantity_opt")]
    pub final_quantity: Option<u32>,
    pub total_cost: Option<f64>,
    pub reason: Option<String>,
    pub round: Option<u32>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRoundStart {
    pub round_number: u32,
    pub max_rounds: Option<u32>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawComplete {
    pub room_id: Option<String>,
    pub timestamp: Option<String>,
    pub outcome: Option<String>,
    pub status: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawHeartbeat {
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawError {
    #[serde(default)]
    pub message: String,
    pub error_code: Option<String>,
    pub timestamp: Option<String>,
}

/// Unit count as sent: some producers emit `5.0` where `5` is meant.
#[derive(Deserialize)]
#[serde(untagged)]
enum Count {
    Int(u64),
    Float(f64),
}

fn count_to_u32<E: serde::de::Error>(count: Count) -> Result<u32, E> {
    match count {
        Count::Int(n) => u32::try_from(n).map_err(|_| E::custom(format!("quantity {n} out of range"))),
        Count::Float(f) if f.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&f) => Ok(f as u32),
        Count::Float(f) => Err(E::custom(format!("quantity {f} is not a whole number"))),
    }
}

/// Accept a quantity as a JSON integer or a whole-valued float.
fn whole_quantity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    count_to_u32(Count::deserialize(deserializer)?)
}

fn whole_quantity_opt<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    Option::<Count>::deserialize(deserializer)?
        .map(count_to_u32)
        .transpose()
}

/// Pick the display text from whichever of the two text fields carries it.
///
/// `content` wins; a blank `content` falls through to `message`.
pub fn pick_text<'a>(content: Option<&'a str>, message: Option<&'a str>) -> &'a str {
    [content, message]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .unwrap_or("")
}

/// Turn number from `turn_number`, falling back to `round`, then 0.
pub fn pick_turn(turn_number: Option<u32>, round: Option<u32>) -> u32 {
    turn_number.or(round).unwrap_or(0)
}

/// Parse a server timestamp.
///
/// Accepts RFC 3339 and naive ISO 8601 (taken as UTC). Anything else falls
/// back to `received_at`.
pub fn parse_timestamp(raw: Option<&str>, received_at: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return received_at;
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.with_timezone(&Utc);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .unwrap_or(received_at)
}
