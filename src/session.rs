//! State behind the conversation page: the conversation list, the history of
//! the selected conversation and the live channel feeding it.

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use log::{debug, info, warn};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::ChatBackend;
use crate::api::events::{PRESENCE, SEND_MESSAGE, receive_event};
use crate::api::models::{Conversation, CounterpartInfo, Delivery, Message, OutgoingMessage, PLACEHOLDER_NAME};
use crate::error::ApiError;
use crate::identity::{Identity, SessionUser};
use crate::transport::{Handler, HandlerId, Transport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connected with a listener attached for the active conversation.
    Subscribed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatUpdate {
    Link(LinkState),
    Conversations,
    Counterpart(String),
    Messages,
}

struct Subscription {
    event: String,
    id: HandlerId,
}

#[derive(Default)]
struct PageState {
    link: LinkState,
    conversations: Vec<Conversation>,
    counterparts: HashMap<String, CounterpartInfo>,
    active: Option<String>,
    // bumped on every selection; history responses carry the value they were requested under
    generation: u64,
    messages: Vec<Message>,
    subscription: Option<Subscription>,
    pending: HashSet<String>,
    draft: String,
    // user the current connection was announced for
    announced: Option<String>,
    identity_watch: Option<JoinHandle<()>>,
}

struct Inner {
    backend: Arc<dyn ChatBackend>,
    transport: Arc<dyn Transport>,
    identity: Arc<dyn Identity>,
    state: Mutex<PageState>,
    updates: broadcast::Sender<ChatUpdate>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = state.identity_watch.take() {
            task.abort();
        }
        if let Some(sub) = state.subscription.take() {
            self.transport.off(&sub.event, sub.id);
        }
    }
}

/// Handle to a mounted conversation page. Clones share the same state.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Inner>,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, transport: Arc<dyn Transport>, identity: Arc<dyn Identity>) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                backend,
                transport,
                identity,
                state: Mutex::new(PageState::default()),
                updates,
            }),
        }
    }

    /// Opens the live channel and loads the conversation list concurrently.
    /// Presence follows the identity afterwards: a later sign-in is announced
    /// on the open connection.
    pub async fn mount(backend: Arc<dyn ChatBackend>, transport: Arc<dyn Transport>, identity: Arc<dyn Identity>) -> Self {
        let user_changes = identity.watch_user();
        let session = Self::new(backend, transport, identity);
        tokio::join!(session.open_link(), session.load_conversations());
        if let Some(rx) = user_changes {
            let task = tokio::spawn(follow_identity(Arc::downgrade(&session.inner), rx));
            if let Some(old) = session.lock().identity_watch.replace(task) {
                old.abort();
            }
        }
        session
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, update: ChatUpdate) {
        let _ = self.inner.updates.send(update);
    }

    fn set_link(&self, link: LinkState) {
        self.lock().link = link;
        self.notify(ChatUpdate::Link(link));
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<ChatUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn link_state(&self) -> LinkState {
        self.lock().link
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.lock().conversations.clone()
    }

    pub fn counterpart(&self, conversation_id: &str) -> Option<CounterpartInfo> {
        self.lock().counterparts.get(conversation_id).cloned()
    }

    pub fn counterpart_name(&self, conversation_id: &str) -> String {
        self.counterpart(conversation_id)
            .map(|c| c.display_name().to_string())
            .unwrap_or_else(|| PLACEHOLDER_NAME.to_string())
    }

    pub fn active_conversation(&self) -> Option<String> {
        self.lock().active.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.inner.identity.current_user_id()
    }

    /// Connects the transport and announces presence when possible.
    /// Failures are logged and leave the link `Disconnected`.
    pub async fn open_link(&self) -> bool {
        self.set_link(LinkState::Connecting);
        match self.inner.transport.connect().await {
            Ok(()) => {
                let link = {
                    let mut s = self.lock();
                    s.announced = None;
                    s.link = if s.subscription.is_some() { LinkState::Subscribed } else { LinkState::Connected };
                    s.link
                };
                self.notify(ChatUpdate::Link(link));
                self.announce_presence().await;
                true
            }
            Err(e) => {
                warn!("live channel unavailable: {e}");
                self.set_link(LinkState::Disconnected);
                false
            }
        }
    }

    /// Associates the connection with the signed-in user. Does nothing until
    /// the user id is known, and only once per connection and user.
    pub async fn announce_presence(&self) -> bool {
        let Some(user_id) = self.inner.identity.current_user_id() else {
            debug!("presence deferred, no signed-in user yet");
            return false;
        };
        {
            let mut s = self.lock();
            if s.announced.as_deref() == Some(user_id.as_str())
                || !matches!(s.link, LinkState::Connected | LinkState::Subscribed)
            {
                return false;
            }
            s.announced = Some(user_id.clone());
        }
        match self.inner.transport.emit(PRESENCE, json!({ "userId": user_id })).await {
            Ok(()) => {
                info!("presence announced for {user_id}");
                true
            }
            Err(e) => {
                warn!("presence announcement failed: {e}");
                self.lock().announced = None;
                false
            }
        }
    }

    /// Fetches the user's conversations, then their counterparts. A failed
    /// fetch keeps whatever list was shown (empty on mount).
    pub async fn load_conversations(&self) -> usize {
        let conversations = match self.inner.backend.my_conversations().await {
            Ok(list) => list,
            Err(e) => {
                warn!("could not load conversations: {e}");
                return 0;
            }
        };
        let ids: Vec<String> = conversations.iter().map(|c| c.id.clone()).collect();
        self.lock().conversations = conversations;
        self.notify(ChatUpdate::Conversations);
        self.resolve_counterparts(&ids).await;
        ids.len()
    }

    async fn resolve_counterparts(&self, ids: &[String]) {
        let missing: Vec<&String> = {
            let s = self.lock();
            let missing = ids.iter().filter(|id| !s.counterparts.contains_key(*id)).collect();
            missing
        };
        let mut lookups: FuturesUnordered<_> = missing
            .into_iter()
            .map(|id| async move { (id, self.inner.backend.other_person(id).await) })
            .collect();
        while let Some((id, result)) = lookups.next().await {
            match result {
                Ok(info) => {
                    self.lock().counterparts.insert(id.clone(), info);
                    self.notify(ChatUpdate::Counterpart(id.clone()));
                }
                Err(e) => warn!("no counterpart info for {id}: {e}"),
            }
        }
    }

    /// Creates (or reopens) a conversation with another user and puts it at
    /// the top of the list.
    pub async fn start_conversation(&self, receiver_id: &str) -> Result<Conversation, ApiError> {
        let conv = self.inner.backend.start_conversation(receiver_id).await?;
        {
            let mut s = self.lock();
            s.conversations.retain(|c| c.id != conv.id);
            s.conversations.insert(0, conv.clone());
        }
        self.notify(ChatUpdate::Conversations);
        self.resolve_counterparts(std::slice::from_ref(&conv.id)).await;
        Ok(conv)
    }

    /// Makes `conversation_id` the active conversation: swaps the live
    /// listener and loads its history. Returns true if the fetched history
    /// was applied, false if the id was already active or a newer selection
    /// superseded this one.
    pub async fn select_conversation(&self, conversation_id: &str) -> bool {
        let (generation, link) = {
            let mut s = self.lock();
            if s.active.as_deref() == Some(conversation_id) {
                return false;
            }
            s.generation += 1;
            s.active = Some(conversation_id.to_string());
            s.messages.clear();
            s.pending.clear();
            if let Some(old) = s.subscription.take() {
                self.inner.transport.off(&old.event, old.id);
                if s.link == LinkState::Subscribed {
                    s.link = LinkState::Connected;
                }
            }
            let event = receive_event(conversation_id);
            let id = self.inner.transport.on(&event, self.inbound_handler(conversation_id));
            s.subscription = Some(Subscription { event, id });
            if s.link == LinkState::Connected {
                s.link = LinkState::Subscribed;
            }
            (s.generation, s.link)
        };
        debug!("selected conversation {conversation_id}");
        self.notify(ChatUpdate::Link(link));
        self.notify(ChatUpdate::Messages);
        self.fetch_history(conversation_id, generation).await
    }

    /// Refetches the active conversation's history.
    pub async fn reload_history(&self) -> bool {
        let (conversation_id, generation) = {
            let mut s = self.lock();
            let Some(active) = s.active.clone() else { return false };
            s.generation += 1;
            (active, s.generation)
        };
        self.fetch_history(&conversation_id, generation).await
    }

    async fn fetch_history(&self, conversation_id: &str, generation: u64) -> bool {
        let history = match self.inner.backend.messages(conversation_id).await {
            Ok(list) => list,
            Err(e) => {
                warn!("could not load messages for {conversation_id}: {e}");
                Vec::new()
            }
        };
        {
            let mut s = self.lock();
            if s.generation != generation {
                debug!("discarding stale history for {conversation_id}");
                return false;
            }
            // keep live and optimistic messages that arrived while the fetch was in flight
            let live = std::mem::take(&mut s.messages);
            let mut merged = history;
            for m in live {
                if !merged.iter().any(|h| h.same_as(&m)) {
                    merged.push(m);
                }
            }
            s.messages = merged;
        }
        self.notify(ChatUpdate::Messages);
        true
    }

    fn inbound_handler(&self, conversation_id: &str) -> Handler {
        let weak = Arc::downgrade(&self.inner);
        let scope = conversation_id.to_string();
        Arc::new(move |payload: Value| {
            if let Some(inner) = weak.upgrade() {
                ChatSession { inner }.receive(&scope, payload);
            }
        })
    }

    fn receive(&self, scope: &str, payload: Value) -> bool {
        let mut message: Message = match serde_json::from_value(payload) {
            Ok(m) => m,
            Err(e) => {
                debug!("dropping undecodable message: {e}");
                return false;
            }
        };
        if message.conversation_id.is_empty() {
            message.conversation_id = scope.to_string();
        }
        if message.conversation_id != scope {
            debug!("dropping message for {} on {scope}", message.conversation_id);
            return false;
        }
        message.delivery = Delivery::Confirmed;
        {
            let mut s = self.lock();
            if s.active.as_deref() != Some(scope) {
                return false;
            }
            if let Some(cid) = &message.client_id {
                s.pending.remove(cid);
            }
            // an echo of our own send, or a message the fetched history already holds
            match s.messages.iter_mut().find(|m| m.same_as(&message)) {
                Some(slot) => *slot = message,
                None => s.messages.push(message),
            }
        }
        self.notify(ChatUpdate::Messages);
        true
    }

    /// Sends `text` to the active conversation. The message is appended
    /// locally right away; the transport send is fire-and-forget.
    pub async fn send(&self, text: &str) -> Option<Message> {
        let content = text.trim();
        if content.is_empty() {
            return None;
        }
        let Some(sender) = self.inner.identity.current_user_id() else {
            warn!("cannot send before the user is known");
            return None;
        };
        let client_id = Uuid::new_v4().to_string();
        let (local, outgoing) = {
            let mut s = self.lock();
            let Some(conversation_id) = s.active.clone() else {
                debug!("no active conversation to send to");
                return None;
            };
            let local = Message {
                id: None,
                conversation_id: conversation_id.clone(),
                sender: sender.clone(),
                text: content.to_string(),
                created_at: Utc::now(),
                client_id: Some(client_id.clone()),
                delivery: Delivery::Pending,
            };
            s.messages.push(local.clone());
            s.pending.insert(client_id.clone());
            let outgoing = OutgoingMessage { conversation_id, content: content.to_string(), sender, client_id };
            (local, outgoing)
        };
        self.notify(ChatUpdate::Messages);

        match serde_json::to_value(&outgoing) {
            Ok(payload) => {
                if let Err(e) = self.inner.transport.emit(SEND_MESSAGE, payload).await {
                    warn!("message not delivered to the live channel: {e}");
                }
            }
            Err(e) => warn!("could not encode outgoing message: {e}"),
        }
        Some(local)
    }

    pub fn set_draft(&self, text: &str) {
        self.lock().draft = text.to_string();
    }

    pub fn draft(&self) -> String {
        self.lock().draft.clone()
    }

    /// Sends the draft and clears it. A blank draft is left untouched.
    pub async fn submit_draft(&self) -> Option<Message> {
        let text = {
            let mut s = self.lock();
            if s.draft.trim().is_empty() {
                return None;
            }
            std::mem::take(&mut s.draft)
        };
        let sent = self.send(&text).await;
        if sent.is_none() {
            let mut s = self.lock();
            if s.draft.is_empty() {
                s.draft = text;
            }
        }
        sent
    }

    /// Detaches the live listener and disconnects the transport. In-flight
    /// history fetches are discarded when they land.
    pub async fn unmount(&self) {
        let sub = {
            let mut s = self.lock();
            s.generation += 1;
            s.active = None;
            s.pending.clear();
            if let Some(task) = s.identity_watch.take() {
                task.abort();
            }
            s.subscription.take()
        };
        if let Some(sub) = sub {
            self.inner.transport.off(&sub.event, sub.id);
        }
        self.inner.transport.disconnect().await;
        self.lock().announced = None;
        self.set_link(LinkState::Disconnected);
        info!("conversation page unmounted");
    }
}

async fn follow_identity(session: Weak<Inner>, mut users: watch::Receiver<Option<SessionUser>>) {
    while users.changed().await.is_ok() {
        let signed_in = users.borrow_and_update().is_some();
        let Some(inner) = session.upgrade() else { break };
        if signed_in {
            ChatSession { inner }.announce_presence().await;
        }
    }
}
