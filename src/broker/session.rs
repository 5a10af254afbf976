//! Broker-side view of one WebSocket connection.
//!
//! The `sender` feeds the connection's writer task; frames queued here are
//! written in order. `display_name` is what chat broadcasts report as the
//! sender; it comes from the CONNECT `login` header when present.

use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::stomp::frame::{self, Frame};

pub type SessionId = String;

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub sender: UnboundedSender<WsMessage>,
    pub connected: bool,
    pub display_name: String,
}

impl Session {
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        let id = Uuid::new_v4().to_string();
        let display_name = format!("guest-{}", &id[..8]);
        Self {
            id,
            sender,
            connected: false,
            display_name,
        }
    }

    /// Queue a frame for this session. Returns `false` if the frame could not
    /// be encoded or the connection's writer has gone away.
    pub fn send_frame(&self, frame: Frame) -> bool {
        match frame::to_ws_message(frame) {
            Ok(message) => self.sender.send(message).is_ok(),
            Err(e) => {
                warn!("Failed to encode frame for {}: {e}", self.id);
                false
            }
        }
    }
}
