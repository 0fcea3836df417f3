//! Conversation core for the Gudjob marketplace: conversation list, message
//! history, live delivery over a websocket and optimistic sends.

pub mod api;
pub mod config;
pub mod error;
pub mod grouping;
pub mod identity;
pub mod session;
pub mod transport;
pub mod utils;

pub use api::client::ApiClient;
pub use api::models::{Conversation, CounterpartInfo, Delivery, Message, OutgoingMessage};
pub use api::ChatBackend;
pub use config::Settings;
pub use error::{ApiError, ConfigError, TransportError};
pub use identity::{AuthStore, Identity, Role, SessionUser};
pub use session::{ChatSession, ChatUpdate, LinkState};
pub use transport::Transport;
