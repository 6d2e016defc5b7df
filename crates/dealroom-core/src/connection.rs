//! Per-room connection state machine.
//!
//! `Idle → Connecting → Open`, `Open → Reconnecting` on a transport error
//! while attempts remain, `Reconnecting → Connecting` once the backoff
//! elapses, and any live state `→ Closed`. `Closed` is terminal; resuming a
//! room needs a fresh `Idle` state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::DealroomError;

/// Why a connection reached `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The server signaled `negotiation_complete`.
    Completed,
    /// The consumer disposed the link.
    Disconnected,
    /// Reconnection attempts ran out; needs a manual restart.
    Exhausted,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Disconnected => "disconnected",
            Self::Exhausted => "exhausted",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    /// `attempt` is 0 for the first open, then the reconnection attempt number.
    Connecting { attempt: u32 },
    Open,
    Reconnecting { attempt: u32, delay_ms: u64 },
    Closed { reason: CloseReason },
}

impl ConnectionState {
    /// Validate and perform a transition.
    pub fn transition(self, next: ConnectionState) -> Result<ConnectionState, DealroomError> {
        use ConnectionState::*;

        let allowed = match (self, next) {
            (Idle, Connecting { .. }) => true,
            (Idle, Closed { reason }) => reason == CloseReason::Disconnected,
            (Connecting { .. }, Open) => true,
            (Connecting { .. }, Reconnecting { .. }) => true,
            (Open, Reconnecting { .. }) => true,
            (Reconnecting { .. }, Connecting { .. }) => true,
            (Connecting { .. } | Open | Reconnecting { .. }, Closed { .. }) => true,
            _ => false,
        };

        if allowed {
            Ok(next)
        } else {
            Err(DealroomError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    /// Whether the consumer should show a stalled indicator.
    pub fn is_stalled(self) -> bool {
        matches!(
            self,
            Self::Closed {
                reason: CloseReason::Exhausted
            }
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting { attempt } => write!(f, "connecting(attempt {attempt})"),
            Self::Open => f.write_str("open"),
            Self::Reconnecting { attempt, delay_ms } => {
                write!(f, "reconnecting(attempt {attempt}, in {delay_ms}ms)")
            }
            Self::Closed { reason } => write!(f, "closed({})", reason.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let s = ConnectionState::Idle
            .transition(ConnectionState::Connecting { attempt: 0 })
            .and_then(|s| s.transition(ConnectionState::Open))
            .and_then(|s| {
                s.transition(ConnectionState::Closed {
                    reason: CloseReason::Completed,
                })
            })
            .expect("valid path");
        assert!(s.is_closed());
        assert!(!s.is_stalled());
    }

    #[test]
    fn reconnect_cycle() {
        let s = ConnectionState::Open
            .transition(ConnectionState::Reconnecting {
                attempt: 1,
                delay_ms: 1_000,
            })
            .and_then(|s| s.transition(ConnectionState::Connecting { attempt: 1 }))
            .and_then(|s| {
                s.transition(ConnectionState::Reconnecting {
                    attempt: 2,
                    delay_ms: 2_000,
                })
            })
            .and_then(|s| {
                s.transition(ConnectionState::Closed {
                    reason: CloseReason::Exhausted,
                })
            })
            .expect("valid path");
        assert!(s.is_stalled());
    }

    #[test]
    fn closed_is_terminal() {
        let closed = ConnectionState::Closed {
            reason: CloseReason::Disconnected,
        };
        for next in [
            ConnectionState::Idle,
            ConnectionState::Connecting { attempt: 0 },
            ConnectionState::Open,
            ConnectionState::Closed {
                reason: CloseReason::Completed,
            },
        ] {
            assert!(closed.transition(next).is_err(), "closed -> {next} must fail");
        }
    }

    #[test]
    fn idle_cannot_jump_to_open() {
        let err = ConnectionState::Idle
            .transition(ConnectionState::Open)
            .expect_err("idle -> open is invalid");
        assert!(err.to_string().contains("idle -> open"));
    }

    #[test]
    fn idle_may_only_close_by_disconnect() {
        assert!(
            ConnectionState::Idle
                .transition(ConnectionState::Closed {
                    reason: CloseReason::Disconnected
                })
                .is_ok()
        );
        assert!(
            ConnectionState::Idle
                .transition(ConnectionState::Closed {
                    reason: CloseReason::Completed
                })
                .is_err()
        );
    }
}
