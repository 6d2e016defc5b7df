use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server-assigned room identifier.
pub type RoomId = String;

// ─── Sender ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    Buyer,
    Seller,
    System,
}

impl SenderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
            Self::System => "system",
        }
    }
}

impl fmt::Display for SenderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SenderKind {
    type Err = DealroomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buyer" => Ok(Self::Buyer),
            "seller" => Ok(Self::Seller),
            "system" => Ok(Self::System),
            _ => Err(DealroomError::Protocol(format!("unknown sender type: {s}"))),
        }
    }
}

// ─── Room contents ────────────────────────────────────────────────

/// A seller's current price/quantity proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub price: f64,
    pub quantity: u32,
    pub timestamp: DateTime<Utc>,
    pub seller_name: String,
}

/// One displayed chat turn. Immutable once appended to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub turn: u32,
    pub timestamp: DateTime<Utc>,
    pub sender_kind: SenderKind,
    pub sender_id: Option<String>,
    pub sender_name: String,
    pub text: String,
    pub mentioned: BTreeSet<String>,
    /// Offer snapshot attached for display (seller turns only).
    pub offer: Option<Offer>,
}

/// The buyer's final determination for a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub selected_seller_id: Option<String>,
    pub selected_seller_name: Option<String>,
    pub final_price: Option<f64>,
    pub quantity: Option<u32>,
    pub reason: Option<String>,
    pub total_cost: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    /// Final-deal terms, only when seller name, price, quantity and total
    /// cost are all known.
    pub fn deal_terms(&self) -> Option<DealTerms> {
        Some(DealTerms {
            seller_name: self.selected_seller_name.clone()?,
            price: self.final_price?,
            quantity: self.quantity?,
            total_cost: self.total_cost?,
        })
    }

    /// Whether the buyer picked a seller at all.
    pub fn has_winner(&self) -> bool {
        self.selected_seller_id.is_some() || self.selected_seller_name.is_some()
    }
}

/// Terms of a completed deal, as mirrored onto the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealTerms {
    pub seller_name: String,
    pub price: f64,
    pub quantity: u32,
    pub total_cost: f64,
}

// ─── Canonical events ─────────────────────────────────────────────

/// Where an error event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorOrigin {
    /// Connection-level failure; drives reconnection.
    Transport,
    /// `error` payload pushed by the server; the stream stays open.
    Server,
}

/// Normalized, internal representation of a server-pushed occurrence.
///
/// Produced only by [`crate::normalize`]; nothing downstream looks at raw
/// payload shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected {
        room_id: Option<RoomId>,
        timestamp: DateTime<Utc>,
    },
    Message {
        sender_kind: SenderKind,
        sender_id: Option<String>,
        sender_name: String,
        text: String,
        turn: u32,
        mentioned: Vec<String>,
        offer: Option<Offer>,
        timestamp: DateTime<Utc>,
    },
    OfferUpdate {
        seller_id: String,
        seller_name: String,
        price: f64,
        quantity: u32,
        timestamp: DateTime<Utc>,
    },
    DecisionMade(Decision),
    RoundStarted {
        round: u32,
        max_rounds: Option<u32>,
    },
    NegotiationComplete {
        outcome: Option<String>,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        code: Option<String>,
        origin: ErrorOrigin,
    },
}

impl StreamEvent {
    /// Short variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Message { .. } => "message",
            Self::OfferUpdate { .. } => "offer_update",
            Self::DecisionMade(_) => "decision_made",
            Self::RoundStarted { .. } => "round_started",
            Self::NegotiationComplete { .. } => "negotiation_complete",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Error { .. } => "error",
        }
    }

    /// Build the event a connection manager delivers for a transport failure.
    pub fn transport_error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: None,
            origin: ErrorOrigin::Transport,
        }
    }
}

// ─── Error ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DealroomError {
    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unrecognized payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error signaled by the server through an `error` event.
    #[error("server error: {message}")]
    Application {
        message: String,
        code: Option<String>,
    },

    /// Event addressed to a room that was never initialized.
    #[error("unknown room: {0}")]
    UnknownRoom(RoomId),

    #[error("room {0} already has an open stream")]
    AlreadyOpen(RoomId),

    #[error("invalid connection transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("start handshake failed: {0}")]
    Handshake(String),
}

// ─── Tests ────────────────────────────────────────────────────────
