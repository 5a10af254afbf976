//! Chat payloads carried in STOMP frame bodies.
//!
//! Outbound: `{ "content": string }` sent to `/app/chat/{id}`.
//! Inbound: `{ "senderName", "content", "timestamp", ... }` broadcast on
//! `/topic/channel/{id}`. Chat servers also include the message id, sender id,
//! channel id and a message type; those are optional here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub sender_name: String,
    pub content: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<u64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl InboundMessage {
    /// Parse a MESSAGE frame body.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| ClientError::Deserialization(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub content: String,
}

impl OutboundMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ClientError::InvalidMessage(e.to_string()))
    }
}

/// Timestamps are written as epoch milliseconds. On input they may also be an
/// ISO-8601 string (a missing offset means UTC) or a
/// `[year, month, day, hour, minute, second, nanos]` array as produced by
/// Jackson for `LocalDateTime`.
mod timestamp {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Float(f64),
        Text(String),
        Parts(Vec<u32>),
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(ts.timestamp_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Millis(ms) => from_millis(ms),
            Raw::Float(ms) => from_millis(ms as i64),
            Raw::Text(text) => from_text(&text)
                .ok_or_else(|| D::Error::custom(format!("unrecognized timestamp '{text}'"))),
            Raw::Parts(parts) => from_parts(&parts)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp parts {parts:?}"))),
        }
    }

    fn from_millis<E: Error>(ms: i64) -> Result<DateTime<Utc>, E> {
        DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| E::custom(format!("timestamp {ms} out of range")))
    }

    fn from_text(text: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    fn from_parts(parts: &[u32]) -> Option<DateTime<Utc>> {
        if parts.len() < 5 {
            return None;
        }
        let part = |i: usize| parts.get(i).copied().unwrap_or(0);
        NaiveDate::from_ymd_opt(i32::try_from(part(0)).ok()?, part(1), part(2))?
            .and_hms_nano_opt(part(3), part(4), part(5), part(6))
            .map(|naive| naive.and_utc())
    }
}
