use serde::Deserialize;
use serde_json::Value;

use crate::models::Notification;

/// A frame received on the realtime channel, after normalisation.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Notification(Notification),
    UnreadCount(u32),
    /// Valid JSON of a shape the session layer does not interpret.
    Other(Value),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default, alias = "data", alias = "payload")]
    notification: Option<Notification>,
    #[serde(default)]
    unread_count: Option<u32>,
}

/// Parse a text frame. Accepted shapes: a bare notification object,
/// `{"type": ..., "notification"|"data"|"payload": {...}}`, and
/// `{"type": ..., "unread_count": n}`. Non-JSON is an error.
pub fn parse_inbound(text: &str) -> Result<InboundMessage, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;

    if let Ok(notification) = Notification::deserialize(&value) {
        return Ok(InboundMessage::Notification(notification));
    }
    if let Ok(envelope) = Envelope::deserialize(&value) {
        if let Some(notification) = envelope.notification {
            return Ok(InboundMessage::Notification(notification));
        }
        if let Some(count) = envelope.unread_count {
            return Ok(InboundMessage::UnreadCount(count));
        }
    }
    Ok(InboundMessage::Other(value))
}
