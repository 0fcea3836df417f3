use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shown when a conversation's counterpart could not be resolved.
pub const PLACEHOLDER_NAME: &str = "Gudjob user";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Conversation {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// The member that is not `me`.
    pub fn counterpart_id(&self, me: &str) -> Option<&str> {
        self.members.iter().map(String::as_str).find(|m| *m != me)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delivery {
    /// Appended locally, not yet echoed back by the server.
    Pending,
    #[default]
    Confirmed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    #[serde(rename = "_id", alias = "id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "conversationId", default)]
    pub conversation_id: String,
    pub sender: String,
    #[serde(alias = "content")]
    pub text: String,
    #[serde(rename = "createdAt", default = "chrono::Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip)]
    pub delivery: Delivery,
}

impl Message {
    /// True when both records describe the same message, by server id or by
    /// client correlation id.
    pub fn same_as(&self, other: &Message) -> bool {
        matches!((&self.id, &other.id), (Some(a), Some(b)) if a == b)
            || matches!((&self.client_id, &other.client_id), (Some(a), Some(b)) if a == b)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CounterpartInfo {
    pub name: Option<String>,
    pub company: Option<String>,
    pub avatar: Option<String>,
}

impl CounterpartInfo {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.company.as_deref().filter(|c| !c.trim().is_empty()))
            .unwrap_or(PLACEHOLDER_NAME)
    }
}

/// Payload of the `sendMessage` event.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub conversation_id: String,
    pub content: String,
    pub sender: String,
    pub client_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_accepts_server_shape() {
        let msg: Message = serde_json::from_value(json!({
            "_id": "m1",
            "conversationId": "c1",
            "sender": "u2",
            "text": "hi",
            "createdAt": "2026-03-04T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(msg.id.as_deref(), Some("m1"));
        assert_eq!(msg.text, "hi");
        assert_eq!(msg.delivery, Delivery::Confirmed);
        assert_eq!(msg.created_at.to_rfc3339(), "2026-03-04T10:00:00+00:00");
    }

    #[test]
    fn message_accepts_content_alias_and_missing_timestamp() {
        let before = Utc::now();
        let msg: Message = serde_json::from_value(json!({
            "sender": "u2",
            "content": "hello",
            "clientId": "abc"
        }))
        .unwrap();
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.client_id.as_deref(), Some("abc"));
        assert!(msg.created_at >= before);
    }

    #[test]
    fn counterpart_falls_back_to_company_then_placeholder() {
        let mut info = CounterpartInfo { company: Some("Acme".into()), ..Default::default() };
        assert_eq!(info.display_name(), "Acme");
        info.company = None;
        assert_eq!(info.display_name(), PLACEHOLDER_NAME);
        info.name = Some("Dana".into());
        assert_eq!(info.display_name(), "Dana");
    }

    #[test]
    fn counterpart_id_skips_self() {
        let conv = Conversation { id: "c".into(), members: vec!["me".into(), "you".into()], updated_at: None };
        assert_eq!(conv.counterpart_id("me"), Some("you"));
        assert_eq!(conv.counterpart_id("you"), Some("me"));
    }

    #[test]
    fn outgoing_uses_camel_case() {
        let out = OutgoingMessage {
            conversation_id: "c1".into(),
            content: "hey".into(),
            sender: "u1".into(),
            client_id: "x".into(),
        };
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["conversationId"], "c1");
        assert_eq!(v["clientId"], "x");
    }
}
