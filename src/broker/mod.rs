//! The `broker` module is a small in-process STOMP broker used as the
//! loopback endpoint for the test client. It mirrors the routing of the chat
//! backend: `/app/chat/{id}` commands become broadcasts on
//! `/topic/channel/{id}`.
//!
//! - `engine`: `Broker`, which applies client frames and routes messages
//! - `topic`: per-destination subscriber sets
//! - `session`: the broker's handle on one connected client

pub mod engine;
pub mod session;
pub mod topic;

pub use engine::{Broker, FrameOutcome};
pub use session::{Session, SessionId};

#[cfg(test)]
mod tests;
