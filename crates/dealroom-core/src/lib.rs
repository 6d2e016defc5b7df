//! Pure core of the dealroom stream follower.
//!
//! Raw payloads from a room's event stream enter through [`normalize`],
//! become canonical [`types::StreamEvent`]s, and are folded into a
//! [`room::RoomState`] by [`room::apply_event`]. Reducer effects mirror a
//! narrow summary into the dashboard [`session::SessionStore`].
//! [`reconnect`] and [`connection`] hold the deterministic parts of link
//! management; timers and IO live in `dealroom-client`.

pub mod connection;
pub mod normalize;
pub mod reconnect;
pub mod room;
pub mod session;
pub mod types;
pub mod wire;

pub use connection::{CloseReason, ConnectionState};
pub use normalize::normalize;
pub use reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectTracker};
pub use room::{apply_event, Notice, RoomEffect, RoomSnapshot, RoomState};
pub use session::{DashboardRoom, RoomStatus, SessionStore, SessionUpdate};
pub use types::{DealroomError, RoomId, StreamEvent};
