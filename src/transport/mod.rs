//! Live channel used to push and receive chat events without polling.
//!
//! The conversation page only talks to the [`Transport`] trait. Two
//! implementations ship with the crate: [`ws::WsTransport`] over a real
//! websocket and [`memory::MemoryTransport`], an in-process loopback.

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::TransportError;

pub type Handler = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    /// Closes the connection and drops every registered listener.
    async fn disconnect(&self);

    async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError>;

    fn on(&self, event: &str, handler: Handler) -> HandlerId;

    /// Returns false if no such listener was registered.
    fn off(&self, event: &str, id: HandlerId) -> bool;
}

/// Event name to listener table shared by the transport implementations.
#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    table: Mutex<HashMap<String, Vec<(HandlerId, Handler)>>>,
}

impl Listeners {
    pub fn add(&self, event: &str, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut table) = self.table.lock() {
            table.entry(event.to_string()).or_default().push((id, handler));
        }
        id
    }

    pub fn remove(&self, event: &str, id: HandlerId) -> bool {
        let Ok(mut table) = self.table.lock() else { return false };
        let Some(list) = table.get_mut(event) else { return false };
        let before = list.len();
        list.retain(|(h, _)| *h != id);
        let removed = list.len() != before;
        if list.is_empty() {
            table.remove(event);
        }
        removed
    }

    pub fn clear(&self) {
        if let Ok(mut table) = self.table.lock() {
            table.clear();
        }
    }

    pub fn count(&self, event: &str) -> usize {
        self.table
            .lock()
            .map(|t| t.get(event).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.table.lock().map(|t| t.values().map(Vec::len).sum()).unwrap_or(0)
    }

    /// Calls every listener for `event`. Handlers run outside the table lock
    /// so they may register or remove listeners themselves.
    pub fn dispatch(&self, event: &str, data: &Value) -> usize {
        let handlers: Vec<Handler> = match self.table.lock() {
            Ok(table) => table
                .get(event)
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default(),
            Err(_) => return 0,
        };
        for handler in &handlers {
            handler(data.clone());
        }
        handlers.len()
    }
}
