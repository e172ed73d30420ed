use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl ConversationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    #[serde(default)]
    pub bytes: Vec<u8>,
    pub size: u64,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        let size = bytes.len() as u64;
        Self {
            id: Uuid::new_v4().to_string(),
            filename: filename.into(),
            content_type: content_type.into(),
            bytes,
            size,
        }
    }
}

/// Inbound agent request. Fields are private so a request cannot be changed
/// once handed to the runtime; use [`Request::builder`] to assemble one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    request_id: RequestId,
    conversation_id: ConversationId,
    user_id: UserId,
    session_id: String,
    message: String,
    #[serde(default)]
    context: BTreeMap<String, Value>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

impl Request {
    pub fn builder(
        conversation_id: impl Into<String>,
        message: impl Into<String>,
    ) -> RequestBuilder {
        RequestBuilder {
            request_id: None,
            conversation_id: ConversationId(conversation_id.into()),
            user_id: None,
            session_id: None,
            message: message.into(),
            context: BTreeMap::new(),
            timestamp: None,
            attachments: Vec::new(),
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }
}

#[derive(Clone, Debug)]
pub struct RequestBuilder {
    request_id: Option<String>,
    conversation_id: ConversationId,
    user_id: Option<String>,
    session_id: Option<String>,
    message: String,
    context: BTreeMap<String, Value>,
    timestamp: Option<DateTime<Utc>>,
    attachments: Vec<Attachment>,
}

impl RequestBuilder {
    /// Pin the request id. Retries of the same logical request must reuse it.
    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn context_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn build(self) -> Request {
        Request {
            request_id: RequestId(
                self.request_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            ),
            conversation_id: self.conversation_id,
            user_id: UserId(self.user_id.unwrap_or_else(|| "anonymous".to_string())),
            session_id: self.session_id.unwrap_or_default(),
            message: self.message,
            context: self.context,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            attachments: self.attachments,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Attachment, Request};

    #[test]
    fn builder_fills_defaults_for_optional_fields() {
        let request = Request::builder("c1", "hello").build();

        assert_eq!(request.conversation_id().as_str(), "c1");
        assert_eq!(request.user_id().0, "anonymous");
        assert!(request.session_id().is_empty());
        assert!(request.context().is_empty());
        assert!(request.attachments().is_empty());
        assert!(!request.request_id().0.is_empty());
    }

    #[test]
    fn builder_keeps_explicit_values() {
        let request = Request::builder("c2", "create a ticket")
            .request_id("req-7")
            .user_id("u-1")
            .session_id("s-1")
            .context_value("channel", json!("web"))
            .attachment(Attachment::new("a.txt", "text/plain", b"abc".to_vec()))
            .build();

        assert_eq!(request.request_id().0, "req-7");
        assert_eq!(request.user_id().0, "u-1");
        assert_eq!(request.context().get("channel"), Some(&json!("web")));
        assert_eq!(request.attachments()[0].size, 3);
    }
}
