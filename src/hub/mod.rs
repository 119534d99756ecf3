//! Real-time notification hub — topic registry, events, WebSocket endpoint.

pub mod events;
pub mod registry;
pub mod ws;

pub use events::{ClientFrame, Event, Topic};
pub use registry::{ConnectionId, NotificationHub};
