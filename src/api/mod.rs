pub mod client;
pub mod events;
pub mod models;

use async_trait::async_trait;

use crate::api::models::{Conversation, CounterpartInfo, Message};
use crate::error::ApiError;

/// REST surface the conversation page depends on.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Conversations of the signed-in user, in server order.
    async fn my_conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    async fn other_person(&self, conversation_id: &str) -> Result<CounterpartInfo, ApiError>;

    /// Stored history for one conversation. A non-list payload yields an empty list.
    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError>;

    async fn start_conversation(&self, receiver_id: &str) -> Result<Conversation, ApiError>;
}
