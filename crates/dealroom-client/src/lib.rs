//! Async side of the dealroom follower: SSE transport, per-room connection
//! manager with reconnection, the shared room store and the controller that
//! drives a room from handshake to teardown.

pub mod api;
pub mod controller;
pub mod manager;
pub mod sse;
pub mod store;
pub mod transport;

pub use api::{HttpNegotiationApi, NegotiationApi, StartOutcome};
pub use controller::{ClientConfig, EnableOutcome, RoomController};
pub use manager::{Disposer, LinkControl, StreamConnectionManager, StreamHandler};
pub use store::{RoomStore, SharedSessions};
pub use transport::{ChannelTransport, SseTransport, Transport};
