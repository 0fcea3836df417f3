use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client as HttpClient;
use serde_json::Value;
use url::Url;

use crate::api::ChatBackend;
use crate::api::models::{Conversation, CounterpartInfo, Message};
use crate::error::ApiError;

pub struct ApiClient {
    pub http: HttpClient,
    base_api: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, ApiError> {
        Ok(Self {
            http: HttpClient::new(),
            base_api: Self::base_api(base_url)?,
            token,
        })
    }

    fn base_api(base_url: &str) -> Result<Url, ApiError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let api = if trimmed.ends_with("/api") { trimmed.to_string() } else { format!("{}/api", trimmed) };
        let url = Url::parse(&api)?;
        if url.cannot_be_a_base() {
            return Err(ApiError::Missing("base url cannot carry a path"));
        }
        Ok(url)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_api.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Missing("base url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn with_auth(mut req: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
        if let Some(t) = token {
            req = req.header("Authorization", format!("Bearer {}", t));
        }
        req
    }

    async fn send_json(&self, req: reqwest::RequestBuilder) -> Result<Value, ApiError> {
        let resp = Self::with_auth(req, self.token.as_deref()).send().await?;
        if !resp.status().is_success() {
            return Err(ApiError::Status(resp.status()));
        }
        Ok(resp.json::<Value>().await?)
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn my_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let url = self.endpoint(&["chat", "my-conversations"])?;
        let json = self.send_json(self.http.get(url)).await?;
        Ok(parse_conversations(json))
    }

    async fn other_person(&self, conversation_id: &str) -> Result<CounterpartInfo, ApiError> {
        let url = self.endpoint(&["chat", "other-person"])?;
        let req = self.http.get(url).query(&[("conversationId", conversation_id)]);
        let json = self.send_json(req).await?;
        Ok(parse_counterpart(&json))
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        let url = self.endpoint(&["chat", "messages", conversation_id])?;
        let json = self.send_json(self.http.get(url)).await?;
        Ok(parse_messages(json))
    }

    async fn start_conversation(&self, receiver_id: &str) -> Result<Conversation, ApiError> {
        let url = self.endpoint(&["chat", "conversations"])?;
        let body = serde_json::json!({ "receiverId": receiver_id });
        let json = self.send_json(self.http.post(url).json(&body)).await?;
        let item = json.get("conversation").cloned().unwrap_or(json);
        let conv: Conversation = serde_json::from_value(item)?;
        if conv.id.is_empty() {
            return Err(ApiError::Missing("no conversation id in response"));
        }
        Ok(conv)
    }
}

/// Pulls the item list out of a bare array or a `{ key: [...] }` envelope.
fn list_items(json: Value, keys: &[&str]) -> Option<Vec<Value>> {
    match json {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => keys.iter().find_map(|k| match map.remove(*k) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        }),
        _ => None,
    }
}

pub fn parse_conversations(json: Value) -> Vec<Conversation> {
    let Some(items) = list_items(json, &["conversations", "data"]) else {
        warn!("conversation payload is not a list; showing none");
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Conversation>(item) {
            Ok(conv) if !conv.id.is_empty() => Some(conv),
            Ok(_) => None,
            Err(e) => {
                debug!("skipping conversation entry: {e}");
                None
            }
        })
        .collect()
}

pub fn parse_messages(json: Value) -> Vec<Message> {
    let Some(items) = list_items(json, &["messages", "data"]) else {
        warn!("message history payload is not a list; showing none");
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| {
            serde_json::from_value::<Message>(item)
                .map_err(|e| debug!("skipping message entry: {e}"))
                .ok()
        })
        .collect()
}

pub fn parse_counterpart(json: &Value) -> CounterpartInfo {
    let person = json.get("user").or_else(|| json.get("data")).unwrap_or(json);
    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| person.get(*k).and_then(|v| v.as_str()))
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    };
    let full_name = match (text(&["firstName"]), text(&["lastName"])) {
        (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
        (first, last) => first.or(last),
    };
    CounterpartInfo {
        name: text(&["name", "fullName", "username"]).or(full_name),
        company: text(&["companyName", "company"]),
        avatar: text(&["avatar", "profilePicture", "photo"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn base_api_appends_api_once() {
        assert_eq!(ApiClient::base_api("https://gudjob.io/").unwrap().as_str(), "https://gudjob.io/api");
        assert_eq!(ApiClient::base_api("https://gudjob.io/api").unwrap().as_str(), "https://gudjob.io/api");
    }

    #[test]
    fn endpoint_escapes_conversation_id() {
        let client = ApiClient::new("http://localhost:5000", None).unwrap();
        let url = client.endpoint(&["chat", "messages", "a b/c"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/api/chat/messages/a%20b%2Fc");
    }

    #[test]
    fn conversations_keep_server_order_and_skip_bad_entries() {
        let convs = parse_conversations(json!([
            { "_id": "c2", "members": ["u1", "u2"] },
            { "members": ["u1"] },
            { "_id": "c1", "members": ["u1", "u3"] }
        ]));
        let ids: Vec<_> = convs.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["c2", "c1"]);
    }

    #[test]
    fn conversations_accept_envelope() {
        let convs = parse_conversations(json!({ "conversations": [{ "_id": "c9" }] }));
        assert_eq!(convs.len(), 1);
    }

    #[test]
    fn non_list_history_is_empty() {
        assert!(parse_messages(json!({ "error": "nope" })).is_empty());
        assert!(parse_messages(json!("oops")).is_empty());
        assert!(parse_messages(Value::Null).is_empty());
    }

    #[test]
    fn counterpart_reads_name_variants() {
        let info = parse_counterpart(&json!({ "firstName": "Ada", "lastName": "Lovelace", "profilePicture": "a.png" }));
        assert_eq!(info.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(info.avatar.as_deref(), Some("a.png"));

        let info = parse_counterpart(&json!({ "user": { "companyName": "Acme" } }));
        assert_eq!(info.name, None);
        assert_eq!(info.display_name(), "Acme");
    }
}
