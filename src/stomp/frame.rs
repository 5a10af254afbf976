//! STOMP frames carried in WebSocket messages.
//!
//! Framing, header escaping and `content-length` bodies are handled by
//! `iridium_stomp::StompCodec`. A WebSocket message holds whole frames, so each
//! payload is run through the codec on its own buffer; anything left over is a
//! truncated frame.

use std::borrow::Cow;
use std::io;

use bytes::BytesMut;
use iridium_stomp::{StompCodec, StompItem};
use tokio_util::codec::{Decoder, Encoder};
use tungstenite::protocol::Message as WsMessage;

use crate::utils::{ClientError, Result};

pub use iridium_stomp::Frame;

fn invalid(err: io::Error) -> ClientError {
    ClientError::InvalidFrame(err.to_string())
}

/// Decode every frame in one WebSocket payload, skipping heart-beat EOLs.
pub fn decode(data: &[u8]) -> Result<Vec<Frame>> {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(data);
    let mut frames = Vec::new();

    while let Some(item) = codec.decode(&mut buf).map_err(invalid)? {
        if let StompItem::Frame(frame) = item {
            frames.push(frame);
        }
    }
    if !buf.is_empty() {
        return Err(ClientError::InvalidFrame(format!(
            "truncated frame ({} bytes left over)",
            buf.len()
        )));
    }

    Ok(frames)
}

fn encode(item: StompItem) -> Result<WsMessage> {
    let mut buf = BytesMut::new();
    StompCodec::new().encode(item, &mut buf).map_err(invalid)?;
    Ok(match String::from_utf8(buf.to_vec()) {
        Ok(text) => WsMessage::text(text),
        Err(err) => WsMessage::binary(err.into_bytes()),
    })
}

/// Encode `frame` as a WebSocket message: text when the bytes are valid
/// UTF-8, binary otherwise.
pub fn to_ws_message(frame: Frame) -> Result<WsMessage> {
    encode(StompItem::Frame(frame))
}

/// A single heart-beat EOL.
pub fn heartbeat_message() -> Result<WsMessage> {
    encode(StompItem::Heartbeat)
}

pub fn body_text(frame: &Frame) -> Cow<'_, str> {
    String::from_utf8_lossy(&frame.body)
}
