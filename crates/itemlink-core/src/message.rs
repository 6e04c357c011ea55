//! Wire message model.
//!
//! Every bus carries the same shape:
//! `{unique_id, type, publisher, fields}`. Only reports and acknowledgments
//! are distinguished by the relay; any other tag is carried through as
//! [`MessageType::Other`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Literal some devices put in `unique_id` to mean "no id".
pub const EMPTY_ID_SENTINEL: &str = "EMPTY";

/// Returns `true` if `id` carries no identifier.
pub fn is_empty_id(id: &str) -> bool {
    id.is_empty() || id == EMPTY_ID_SENTINEL
}

/// Message type tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// Device report, deduplicated and forwarded to the internal bus.
    Report,
    /// Acknowledgment of an outbound message; `fields[0]` is the acked id.
    Acknowledgment,
    /// Any other tag, kept verbatim.
    Other(String),
}

impl MessageType {
    /// Get the wire tag.
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Report => "report",
            MessageType::Acknowledgment => "acknowledgment",
            MessageType::Other(tag) => tag,
        }
    }

    /// Parse a wire tag. Never fails: unknown tags become `Other`.
    pub fn parse(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "report" => MessageType::Report,
            "acknowledgment" | "ack" | "reply" => MessageType::Acknowledgment,
            _ => MessageType::Other(tag.to_string()),
        }
    }

    pub fn is_acknowledgment(&self) -> bool {
        matches!(self, MessageType::Acknowledgment)
    }
}

impl From<String> for MessageType {
    fn from(tag: String) -> Self {
        MessageType::parse(&tag)
    }
}

impl From<MessageType> for String {
    fn from(ty: MessageType) -> Self {
        match ty {
            MessageType::Other(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit exchanged on every bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Assigned by the publisher at send time. Empty until then.
    #[serde(default)]
    pub unique_id: String,
    /// Type tag
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Publisher identity
    pub publisher: String,
    /// Ordered payload fields
    #[serde(default)]
    pub fields: Vec<String>,
}

impl Message {
    /// Create a message without a unique id.
    pub fn new(msg_type: MessageType, publisher: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            unique_id: String::new(),
            msg_type,
            publisher: publisher.into(),
            fields,
        }
    }

    /// Create a report.
    pub fn report(publisher: impl Into<String>, fields: Vec<String>) -> Self {
        Self::new(MessageType::Report, publisher, fields)
    }

    /// Create an outbound command for a device.
    pub fn command(publisher: impl Into<String>, fields: Vec<String>) -> Self {
        Self::new(MessageType::Other("command".to_string()), publisher, fields)
    }

    /// Create an acknowledgment for `acked_id`.
    pub fn acknowledgment(publisher: impl Into<String>, acked_id: impl Into<String>) -> Self {
        Self::new(MessageType::Acknowledgment, publisher, vec![acked_id.into()])
    }

    /// Set the unique id.
    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = unique_id.into();
        self
    }

    pub fn has_unique_id(&self) -> bool {
        !is_empty_id(&self.unique_id)
    }

    /// The id an acknowledgment refers to.
    ///
    /// Returns `None` for non-acknowledgments and for acknowledgments whose
    /// first field is missing or empty.
    pub fn acknowledged_id(&self) -> Option<&str> {
        if !self.msg_type.is_acknowledgment() {
            return None;
        }
        self.fields
            .first()
            .map(String::as_str)
            .filter(|id| !is_empty_id(id))
    }

    /// Encode as JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags() {
        assert_eq!(MessageType::parse("report"), MessageType::Report);
        assert_eq!(MessageType::parse("REPLY"), MessageType::Acknowledgment);
        assert_eq!(
            MessageType::parse("heartbeat"),
            MessageType::Other("heartbeat".to_string())
        );
        assert_eq!(MessageType::Other("heartbeat".to_string()).as_str(), "heartbeat");
    }

    #[test]
    fn test_wire_shape() {
        let msg = Message::report("door-1", vec!["open".to_string()]).with_unique_id("door-1-7");
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(json["unique_id"], "door-1-7");
        assert_eq!(json["type"], "report");
        assert_eq!(json["publisher"], "door-1");
        assert_eq!(json["fields"][0], "open");
    }

    #[test]
    fn test_decode_unknown_type() {
        let msg = Message::from_json(
            r#"{"unique_id":"x1","type":"status","publisher":"lamp","fields":[]}"#,
        )
        .unwrap();
        assert_eq!(msg.msg_type, MessageType::Other("status".to_string()));
        assert_eq!(msg.acknowledged_id(), None);
    }

    #[test]
    fn test_acknowledged_id() {
        assert_eq!(Message::acknowledgment("lamp", "abc").acknowledged_id(), Some("abc"));
        assert_eq!(Message::acknowledgment("lamp", "").acknowledged_id(), None);
        assert_eq!(Message::acknowledgment("lamp", "EMPTY").acknowledged_id(), None);

        let bare = Message::new(MessageType::Acknowledgment, "lamp", Vec::new());
        assert_eq!(bare.acknowledged_id(), None);
    }

    #[test]
    fn test_empty_id() {
        assert!(is_empty_id(""));
        assert!(is_empty_id("EMPTY"));
        assert!(!is_empty_id("lamp-1"));
        assert!(!Message::report("lamp", Vec::new()).has_unique_id());
    }
}
