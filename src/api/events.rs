use serde::{Deserialize, Serialize};

/// Presence announcement, carries `{ "userId": ... }`.
pub const PRESENCE: &str = "addUser";
/// Outgoing chat message, carries an `OutgoingMessage`.
pub const SEND_MESSAGE: &str = "sendMessage";

const RECEIVE_PREFIX: &str = "getMessage:";

/// Event name on which messages for one conversation are delivered.
pub fn receive_event(conversation_id: &str) -> String {
    format!("{RECEIVE_PREFIX}{conversation_id}")
}

/// One websocket text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self { event: event.into(), data }
    }
}
