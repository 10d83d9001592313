//! Device message model
//!
//! A [`Message`] is what the application hands to the transport for
//! device-to-cloud telemetry, and what the transport assembles from a
//! polled cloud-to-device command. The payload is either raw bytes or a
//! UTF-8 string. The distinction is observable on the wire (byte payloads
//! are base64-encoded in batched sends, string payloads are embedded as
//! JSON) so it is kept in the type rather than inferred.
//!
//! Properties keep insertion order: batched serialization writes them in
//! the order the application added them.

use indexmap::IndexMap;

/// Message payload, preserving the byte-array/string distinction
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Bytes(Vec<u8>),
    Text(String),
}

impl MessageBody {
    /// Payload length in bytes, as counted by the size-limit rules
    pub fn len(&self) -> usize {
        match self {
            MessageBody::Bytes(bytes) => bytes.len(),
            MessageBody::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The raw bytes, regardless of variant
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MessageBody::Bytes(bytes) => bytes,
            MessageBody::Text(text) => text.as_bytes(),
        }
    }
}

/// A telemetry event or a received command
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    body: MessageBody,
    properties: IndexMap<String, String>,
    message_id: Option<String>,
    correlation_id: Option<String>,
}

impl Message {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageBody::Bytes(bytes.into()))
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(MessageBody::Text(text.into()))
    }

    fn new(body: MessageBody) -> Self {
        Self {
            body,
            properties: IndexMap::new(),
            message_id: None,
            correlation_id: None,
        }
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Application properties in insertion order
    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Add or update a property (add-or-update keeps the original position)
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Builder-style variant of [`set_property`](Self::set_property)
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_property(name, value);
        self
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn set_message_id(&mut self, id: impl Into<String>) {
        self.message_id = Some(id.into());
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn set_correlation_id(&mut self, id: impl Into<String>) {
        self.correlation_id = Some(id.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_length_counts_payload_bytes() {
        assert_eq!(Message::from_bytes(vec![1, 2, 3]).body().len(), 3);
        assert_eq!(Message::from_text("héllo").body().len(), 6); // UTF-8 bytes
    }

    #[test]
    fn test_properties_keep_insertion_order() {
        let message = Message::from_text("t")
            .with_property("bluekey", "bluevalue")
            .with_property("yellowkey", "yellowvaluekey");
        let keys: Vec<&str> = message.properties().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["bluekey", "yellowkey"]);
    }

    #[test]
    fn test_set_property_is_add_or_update() {
        let mut message = Message::from_text("t");
        message.set_property("a", "1");
        message.set_property("b", "2");
        message.set_property("a", "3");

        let pairs: Vec<(&str, &str)> = message.properties().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_ids_default_to_none() {
        let mut message = Message::from_bytes(b"x".to_vec());
        assert_eq!(message.message_id(), None);
        message.set_message_id("m-1");
        message.set_correlation_id("c-1");
        assert_eq!(message.message_id(), Some("m-1"));
        assert_eq!(message.correlation_id(), Some("c-1"));
    }
}
