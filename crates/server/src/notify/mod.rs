// crates/server/src/notify/mod.rs
//! Owner-scoped, best-effort push of task deltas to live WebSocket clients.
//!
//! - `ConnectionRegistry` owns the connection table and owner membership
//! - `NotificationBus` serializes an event once and fans it out to an owner
//! - `event` defines the wire messages in both directions

pub mod bus;
pub mod event;
pub mod registry;

pub use bus::NotificationBus;
pub use event::{ClientMessage, ServerMessage};
pub use registry::{ConnectionId, ConnectionRegistry};
