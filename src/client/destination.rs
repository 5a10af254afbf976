//! Destination naming for the chat endpoint.
//!
//! Broadcasts arrive on `/topic/channel/{id}` and commands are sent to
//! `/app/chat/{id}`. The two prefixes live in different broker namespaces and
//! never overlap.

pub const CHANNEL_TOPIC_PREFIX: &str = "/topic/channel/";
pub const CHAT_COMMAND_PREFIX: &str = "/app/chat/";
/// Older send mapping served by the chat backend next to `/app/chat/{id}`.
pub const CHAT_SEND_PREFIX: &str = "/app/chat.send/channelId/";

/// Where messages for `channel_id` are broadcast.
pub fn channel_topic(channel_id: u64) -> String {
    format!("{CHANNEL_TOPIC_PREFIX}{channel_id}")
}

/// Where new messages for `channel_id` are sent.
pub fn chat_command(channel_id: u64) -> String {
    format!("{CHAT_COMMAND_PREFIX}{channel_id}")
}

/// The channel part of a chat send destination, under either mapping.
pub fn chat_channel(destination: &str) -> Option<&str> {
    destination
        .strip_prefix(CHAT_COMMAND_PREFIX)
        .or_else(|| destination.strip_prefix(CHAT_SEND_PREFIX))
}
