use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use crate::api::events::Frame;
use crate::error::TransportError;
use crate::transport::{Handler, HandlerId, Listeners, Transport};

struct Link {
    outbound: mpsc::UnboundedSender<WsMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Websocket transport speaking JSON `{event, data}` text frames.
pub struct WsTransport {
    url: Url,
    listeners: Arc<Listeners>,
    link: Mutex<Option<Link>>,
}

impl WsTransport {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            listeners: Arc::new(Listeners::default()),
            link: Mutex::new(None),
        }
    }

    pub fn parse(ws_url: &str) -> Result<Self, TransportError> {
        Ok(Self::new(Url::parse(ws_url)?))
    }

    /// False once either half of the socket has stopped, including after the
    /// server closed it.
    pub fn is_connected(&self) -> bool {
        self.link
            .lock()
            .map(|l| {
                l.as_ref()
                    .is_some_and(|link| !link.outbound.is_closed() && !link.reader.is_finished())
            })
            .unwrap_or(false)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.total()
    }

    fn take_link(&self) -> Option<Link> {
        self.link.lock().ok().and_then(|mut l| l.take())
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        info!("websocket connected to {}", self.url);
        let (mut sink, mut stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, WsMessage::Close(_));
                if let Err(e) = sink.send(msg).await {
                    warn!("websocket send failed: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let listeners = self.listeners.clone();
        let reader = tokio::spawn(async move {
            while let Some(next) = stream.next().await {
                match next {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<Frame>(&text) {
                        Ok(frame) => {
                            let delivered = listeners.dispatch(&frame.event, &frame.data);
                            if delivered == 0 {
                                debug!("no listener for {}", frame.event);
                            }
                        }
                        Err(e) => debug!("ignoring malformed frame: {e}"),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("websocket read failed: {e}");
                        break;
                    }
                }
            }
            debug!("websocket reader finished");
        });

        let previous = self.link.lock().ok().and_then(|mut l| l.replace(Link { outbound: tx, reader, writer }));
        if let Some(old) = previous {
            old.reader.abort();
            old.writer.abort();
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.listeners.clear();
        let Some(link) = self.take_link() else { return };
        let _ = link.outbound.send(WsMessage::Close(None));
        drop(link.outbound);
        link.reader.abort();
        if let Err(e) = link.writer.await {
            if !e.is_cancelled() {
                warn!("websocket writer ended abnormally: {e}");
            }
        }
        info!("websocket disconnected from {}", self.url);
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        let text = serde_json::to_string(&Frame::new(event, payload))?;
        let guard = self.link.lock().map_err(|_| TransportError::NotConnected)?;
        let link = guard.as_ref().ok_or(TransportError::NotConnected)?;
        link.outbound
            .send(WsMessage::Text(text))
            .map_err(|_| TransportError::NotConnected)
    }

    fn on(&self, event: &str, handler: Handler) -> HandlerId {
        self.listeners.add(event, handler)
    }

    fn off(&self, event: &str, id: HandlerId) -> bool {
        self.listeners.remove(event, id)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(link) = self.take_link() {
            link.reader.abort();
            link.writer.abort();
        }
    }
}
