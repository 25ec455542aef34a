//! Bus message envelope.

use crate::{
    channel::ChannelId,
    types::{MessageId, SessionId},
    Result,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A message exchanged on the bus.
///
/// The envelope mirrors the fields of a Bayeux message that the core reads or
/// writes. Application payloads travel untouched in `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message identifier, echoed by replies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,

    /// Channel the message is published on
    pub channel: ChannelId,

    /// Session that sent the message, or the session a reply is for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<SessionId>,

    /// Application payload
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,

    /// Extension fields
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub ext: Map<String, Value>,

    /// Outcome of a meta request, set on replies only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,

    /// Whether delivery of this message may be deferred
    #[serde(skip)]
    pub lazy: bool,
}

impl Message {
    /// Create a message on `channel` with the given payload.
    pub fn new(channel: ChannelId, data: Value) -> Self {
        Self {
            id: None,
            channel,
            client_id: None,
            data,
            ext: Map::new(),
            successful: None,
            lazy: false,
        }
    }

    /// Create a message builder for the given channel name.
    ///
    /// # Errors
    /// Returns an error if the channel name is invalid.
    pub fn builder(channel: impl AsRef<str>) -> Result<MessageBuilder> {
        Ok(MessageBuilder { message: Self::new(ChannelId::parse(channel)?, Value::Null) })
    }

    /// Create a successful reply to this message, on the same channel and
    /// with the same id.
    #[must_use]
    pub fn reply(&self) -> Self {
        Self {
            id: self.id.clone(),
            channel: self.channel.clone(),
            client_id: self.client_id.clone(),
            data: Value::Null,
            ext: Map::new(),
            successful: Some(true),
            lazy: false,
        }
    }

    /// Whether this is a meta message.
    #[must_use]
    pub fn is_meta(&self) -> bool {
        self.channel.is_meta()
    }

    /// Read an extension field.
    #[must_use]
    pub fn ext_value(&self, key: &str) -> Option<&Value> {
        self.ext.get(key)
    }

    /// Set an extension field, returning the previous value.
    pub fn set_ext(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.ext.insert(key.into(), value.into())
    }
}

/// Builder for [`Message`].
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    /// Set the message id.
    #[must_use]
    pub fn id(mut self, id: impl Into<MessageId>) -> Self {
        self.message.id = Some(id.into());
        self
    }

    /// Set the sending session.
    #[must_use]
    pub fn client_id(mut self, client_id: SessionId) -> Self {
        self.message.client_id = Some(client_id);
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn data(mut self, data: impl Into<Value>) -> Self {
        self.message.data = data.into();
        self
    }

    /// Add an extension field.
    #[must_use]
    pub fn ext(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.message.ext.insert(key.into(), value.into());
        self
    }

    /// Mark the message as lazy.
    #[must_use]
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.message.lazy = lazy;
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Message {
        self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_form_uses_camel_case_and_skips_lazy() {
        let message = Message::builder("/chat/lobby")
            .unwrap()
            .id("1")
            .client_id(SessionId::from("s1"))
            .data(json!({"text": "hi"}))
            .lazy(true)
            .build();

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"id": "1", "channel": "/chat/lobby", "clientId": "s1", "data": {"text": "hi"}})
        );

        let parsed: Message = serde_json::from_value(value).unwrap();
        assert!(!parsed.lazy);
        assert_eq!(parsed.channel.as_str(), "/chat/lobby");
    }

    #[test]
    fn test_reply_echoes_id_and_channel() {
        let request = Message::builder("/meta/connect").unwrap().id(5u64).ext("ack", 3).build();
        let reply = request.reply();
        assert_eq!(reply.id, request.id);
        assert_eq!(reply.channel, request.channel);
        assert_eq!(reply.successful, Some(true));
        assert!(reply.ext.is_empty());
        assert!(reply.is_meta());
    }

    #[test]
    fn test_invalid_channel_rejected() {
        assert!(Message::builder("chat").is_err());
        assert!(serde_json::from_value::<Message>(json!({"channel": "/a//b"})).is_err());
    }
}
