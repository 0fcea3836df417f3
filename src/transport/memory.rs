use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::api::events::Frame;
use crate::error::TransportError;
use crate::transport::{Handler, HandlerId, Listeners, Transport};

/// In-process stand-in for the chat server. Records every emitted frame and
/// publishes events to all connected [`MemoryTransport`]s.
#[derive(Default)]
pub struct MemoryHub {
    peers: Mutex<Vec<Weak<Listeners>>>,
    sent: Mutex<Vec<Frame>>,
    refuse: AtomicBool,
    connects: AtomicUsize,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// New transports fail to connect while set.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn transport(self: &Arc<Self>) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            listeners: Arc::new(Listeners::default()),
            connected: AtomicBool::new(false),
        }
    }

    /// Delivers an event to every connected transport; returns how many
    /// handlers ran.
    pub fn publish(&self, event: &str, data: Value) -> usize {
        let peers: Vec<Arc<Listeners>> = match self.peers.lock() {
            Ok(mut peers) => {
                peers.retain(|p| p.strong_count() > 0);
                peers.iter().filter_map(Weak::upgrade).collect()
            }
            Err(_) => return 0,
        };
        peers.iter().map(|l| l.dispatch(event, &data)).sum()
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_with(&self, event: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|f| f.event == event)
            .map(|f| f.data)
            .collect()
    }

    /// Connections actually opened, across every transport of this hub.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn connected_peers(&self) -> usize {
        self.peers
            .lock()
            .map(|p| p.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }

    fn attach(&self, listeners: &Arc<Listeners>) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.push(Arc::downgrade(listeners));
        }
    }

    fn detach(&self, listeners: &Arc<Listeners>) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.retain(|p| !std::ptr::eq(p.as_ptr(), Arc::as_ptr(listeners)));
        }
    }
}

pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
    listeners: Arc<Listeners>,
    connected: AtomicBool,
}

impl MemoryTransport {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.total()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.hub.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.hub.connects.fetch_add(1, Ordering::SeqCst);
            self.hub.attach(&self.listeners);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.listeners.clear();
        if self.connected.swap(false, Ordering::SeqCst) {
            self.hub.detach(&self.listeners);
        }
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if let Ok(mut sent) = self.hub.sent.lock() {
            sent.push(Frame::new(event, payload));
        }
        Ok(())
    }

    fn on(&self, event: &str, handler: Handler) -> HandlerId {
        self.listeners.add(event, handler)
    }

    fn off(&self, event: &str, id: HandlerId) -> bool {
        self.listeners.remove(event, id)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.hub.detach(&self.listeners);
    }
}
