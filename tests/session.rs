use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gudjob_chat::api::events::{PRESENCE, SEND_MESSAGE, receive_event};
use gudjob_chat::api::models::PLACEHOLDER_NAME;
use gudjob_chat::transport::memory::MemoryHub;
use gudjob_chat::{
    ApiError, AuthStore, ChatBackend, ChatSession, Conversation, CounterpartInfo, Delivery, LinkState, Message, Role,
    SessionUser,
};

const ME: &str = "me";

#[derive(Default)]
struct ScriptedBackend {
    conversations: Option<Vec<Conversation>>,
    counterparts: HashMap<String, CounterpartInfo>,
    histories: Mutex<HashMap<String, Vec<Message>>>,
    failing_histories: HashSet<String>,
    delays: Mutex<HashMap<String, VecDeque<Duration>>>,
}

impl ScriptedBackend {
    fn with_conversations(ids: &[&str]) -> Self {
        Self {
            conversations: Some(ids.iter().map(|id| conversation(id)).collect()),
            ..Self::default()
        }
    }

    fn history(mut self, id: &str, count: usize) -> Self {
        let msgs = (0..count).map(|i| stored(id, &format!("{id}-{i}"))).collect();
        self.histories.get_mut().unwrap().insert(id.to_string(), msgs);
        self
    }

    /// Persists a message the way the server would after a send.
    fn persist(&self, message: Message) {
        self.histories.lock().unwrap().entry(message.conversation_id.clone()).or_default().push(message);
    }

    fn delay_next(self, id: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().entry(id.to_string()).or_default().push_back(delay);
        self
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn my_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.conversations.clone().ok_or(ApiError::Missing("offline"))
    }

    async fn other_person(&self, conversation_id: &str) -> Result<CounterpartInfo, ApiError> {
        self.counterparts.get(conversation_id).cloned().ok_or(ApiError::Missing("unknown"))
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        let delay = self.delays.lock().unwrap().get_mut(conversation_id).and_then(|q| q.pop_front());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_histories.contains(conversation_id) {
            return Err(ApiError::Missing("boom"));
        }
        Ok(self.histories.lock().unwrap().get(conversation_id).cloned().unwrap_or_default())
    }

    async fn start_conversation(&self, receiver_id: &str) -> Result<Conversation, ApiError> {
        Ok(Conversation { id: format!("new-{receiver_id}"), members: vec![ME.into(), receiver_id.into()], updated_at: None })
    }
}

fn conversation(id: &str) -> Conversation {
    Conversation { id: id.to_string(), members: vec![ME.into(), format!("peer-{id}")], updated_at: None }
}

fn stored(conversation_id: &str, id: &str) -> Message {
    Message {
        id: Some(id.to_string()),
        conversation_id: conversation_id.to_string(),
        sender: "peer".into(),
        text: format!("text {id}"),
        created_at: Utc::now(),
        client_id: None,
        delivery: Delivery::Confirmed,
    }
}

fn signed_in() -> Arc<AuthStore> {
    Arc::new(AuthStore::new(Some(SessionUser { id: ME.into(), role: Role::Candidate })))
}

async fn mount(backend: ScriptedBackend, hub: &Arc<MemoryHub>) -> ChatSession {
    ChatSession::mount(Arc::new(backend), Arc::new(hub.transport()), signed_in()).await
}

fn texts(session: &ChatSession) -> Vec<String> {
    session.messages().into_iter().map(|m| m.text).collect()
}

#[tokio::test]
async fn mount_keeps_server_order_and_resolves_counterparts() {
    let mut backend = ScriptedBackend::with_conversations(&["c3", "c1", "c2"]);
    backend.counterparts.insert("c1".into(), CounterpartInfo { name: Some("Ada".into()), ..Default::default() });
    backend.counterparts.insert("c3".into(), CounterpartInfo { company: Some("Acme".into()), ..Default::default() });
    let hub = MemoryHub::new();

    let session = mount(backend, &hub).await;

    let ids: Vec<_> = session.conversations().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, ["c3", "c1", "c2"]);
    assert_eq!(session.counterpart_name("c1"), "Ada");
    assert_eq!(session.counterpart_name("c3"), "Acme");
    // lookup for c2 failed on its own
    assert!(session.counterpart("c2").is_none());
    assert_eq!(session.counterpart_name("c2"), PLACEHOLDER_NAME);
}

#[tokio::test]
async fn failed_conversation_fetch_leaves_list_empty() {
    let hub = MemoryHub::new();
    let session = mount(ScriptedBackend::default(), &hub).await;
    assert!(session.conversations().is_empty());
    assert_eq!(session.link_state(), LinkState::Connected);
}

#[tokio::test]
async fn mount_announces_presence_once() {
    let hub = MemoryHub::new();
    let session = mount(ScriptedBackend::default(), &hub).await;

    assert_eq!(hub.sent_with(PRESENCE), vec![json!({ "userId": ME })]);
    assert!(!session.announce_presence().await);
    assert_eq!(hub.sent_with(PRESENCE).len(), 1);
}

#[tokio::test]
async fn presence_waits_for_identity() {
    let hub = MemoryHub::new();
    let auth = Arc::new(AuthStore::default());
    let session = ChatSession::mount(Arc::new(ScriptedBackend::default()), Arc::new(hub.transport()), auth.clone()).await;
    assert!(hub.sent_with(PRESENCE).is_empty());

    auth.sign_in(SessionUser { id: "late".into(), role: Role::Recruiter });
    session.select_conversation("a").await;
    assert!(session.send("hi").await.is_some());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(hub.sent_with(PRESENCE), vec![json!({ "userId": "late" })]);
}

#[tokio::test]
async fn switching_accounts_announces_the_new_user() {
    let hub = MemoryHub::new();
    let auth = signed_in();
    let _session = ChatSession::mount(Arc::new(ScriptedBackend::default()), Arc::new(hub.transport()), auth.clone()).await;

    auth.sign_out();
    tokio::time::sleep(Duration::from_millis(20)).await;
    auth.sign_in(SessionUser { id: "other".into(), role: Role::Recruiter });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(hub.sent_with(PRESENCE), vec![json!({ "userId": ME }), json!({ "userId": "other" })]);
}

#[tokio::test]
async fn refused_connection_stays_disconnected() {
    let hub = MemoryHub::new();
    hub.refuse_connections(true);
    let session = mount(ScriptedBackend::with_conversations(&["a"]), &hub).await;
    assert_eq!(session.link_state(), LinkState::Disconnected);
    assert_eq!(session.conversations().len(), 1);
    assert!(hub.sent().is_empty());
}

#[tokio::test]
async fn switching_conversations_shows_each_history() {
    let backend = ScriptedBackend::with_conversations(&["a", "b"]).history("a", 5).history("b", 0);
    let hub = MemoryHub::new();
    let session = mount(backend, &hub).await;

    assert!(session.select_conversation("a").await);
    assert_eq!(session.messages().len(), 5);
    assert_eq!(session.link_state(), LinkState::Subscribed);
    assert!(session.select_conversation("b").await);
    assert_eq!(session.messages().len(), 0);
    assert!(session.select_conversation("a").await);
    assert_eq!(session.messages().len(), 5);
    assert!(session.messages().iter().all(|m| m.conversation_id == "a"));
}

#[tokio::test]
async fn slow_history_for_previous_selection_is_discarded() {
    let backend = ScriptedBackend::with_conversations(&["a", "b"])
        .history("a", 5)
        .history("b", 0)
        .delay_next("a", Duration::from_millis(200));
    let hub = MemoryHub::new();
    let session = mount(backend, &hub).await;

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.select_conversation("a").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(session.select_conversation("b").await);

    assert!(!first.await.unwrap());
    assert_eq!(session.active_conversation().as_deref(), Some("b"));
    assert!(session.messages().is_empty());
}

#[tokio::test]
async fn a_b_a_with_slow_first_fetch_settles_on_latest() {
    let backend = ScriptedBackend::with_conversations(&["a", "b"])
        .history("a", 5)
        .history("b", 0)
        .delay_next("a", Duration::from_millis(150));
    let hub = MemoryHub::new();
    let session = mount(backend, &hub).await;

    let stale = {
        let session = session.clone();
        tokio::spawn(async move { session.select_conversation("a").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    session.select_conversation("b").await;
    assert_eq!(session.messages().len(), 0);
    session.select_conversation("a").await;
    assert_eq!(session.messages().len(), 5);

    assert!(!stale.await.unwrap());
    assert_eq!(session.messages().len(), 5);
}

#[tokio::test]
async fn failed_history_shows_nothing() {
    let mut backend = ScriptedBackend::with_conversations(&["a"]).history("a", 3);
    backend.failing_histories.insert("a".into());
    let hub = MemoryHub::new();
    let session = mount(backend, &hub).await;

    assert!(session.select_conversation("a").await);
    assert!(session.messages().is_empty());
}

#[tokio::test]
async fn live_messages_append_in_arrival_order() {
    let backend = ScriptedBackend::with_conversations(&["a"]).history("a", 1);
    let hub = MemoryHub::new();
    let session = mount(backend, &hub).await;
    session.select_conversation("a").await;

    for text in ["one", "two", "three"] {
        hub.publish(&receive_event("a"), json!({ "conversationId": "a", "sender": "peer", "text": text }));
    }
    assert_eq!(texts(&session), ["text a-0", "one", "two", "three"]);
}

#[tokio::test]
async fn events_for_other_conversations_are_not_shown() {
    let backend = ScriptedBackend::with_conversations(&["x", "y"]);
    let hub = MemoryHub::new();
    let session = mount(backend, &hub).await;
    session.select_conversation("y").await;

    assert_eq!(hub.publish(&receive_event("x"), json!({ "sender": "peer", "text": "for x" })), 0);
    hub.publish(&receive_event("y"), json!({ "conversationId": "x", "sender": "peer", "text": "mislabelled" }));
    assert!(session.messages().is_empty());
}

#[tokio::test]
async fn switching_detaches_previous_listener() {
    let backend = ScriptedBackend::with_conversations(&["a", "b"]);
    let hub = MemoryHub::new();
    let transport = Arc::new(hub.transport());
    let session = ChatSession::mount(Arc::new(backend), transport.clone(), signed_in()).await;

    session.select_conversation("a").await;
    session.select_conversation("b").await;
    assert_eq!(transport.listener_count(), 1);
    assert_eq!(hub.publish(&receive_event("a"), json!({ "sender": "p", "text": "late" })), 0);
    assert_eq!(hub.publish(&receive_event("b"), json!({ "sender": "p", "text": "hi" })), 1);
    assert_eq!(texts(&session), ["hi"]);
}

#[tokio::test]
async fn send_appends_immediately_and_emits() {
    let backend = ScriptedBackend::with_conversations(&["a"]);
    let hub = MemoryHub::new();
    let session = mount(backend, &hub).await;
    session.select_conversation("a").await;

    let sent = session.send("hello").await.unwrap();
    assert_eq!(sent.sender, ME);
    assert_eq!(sent.delivery, Delivery::Pending);

    let messages = session.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "hello");
    assert_eq!(messages[0].sender, ME);

    let frames = hub.sent_with(SEND_MESSAGE);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["conversationId"], "a");
    assert_eq!(frames[0]["content"], "hello");
    assert_eq!(frames[0]["sender"], ME);
    assert_eq!(frames[0]["clientId"].as_str(), sent.client_id.as_deref());
}

#[tokio::test]
async fn blank_send_is_ignored() {
    let hub = MemoryHub::new();
    let session = mount(ScriptedBackend::with_conversations(&["a"]), &hub).await;
    session.select_conversation("a").await;

    assert!(session.send("   \n\t").await.is_none());
    assert!(session.messages().is_empty());
    assert!(hub.sent_with(SEND_MESSAGE).is_empty());
}

#[tokio::test]
async fn echo_of_own_message_replaces_optimistic_copy() {
    let hub = MemoryHub::new();
    let session = mount(ScriptedBackend::with_conversations(&["a"]), &hub).await;
    session.select_conversation("a").await;

    let sent = session.send("hello").await.unwrap();
    let mut echo = hub.sent_with(SEND_MESSAGE).remove(0);
    let fields = echo.as_object_mut().unwrap();
    let content = fields.remove("content").unwrap();
    fields.insert("text".into(), content);
    fields.insert("_id".into(), json!("srv-1"));
    hub.publish(&receive_event("a"), echo);

    let messages = session.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id.as_deref(), Some("srv-1"));
    assert_eq!(messages[0].client_id, sent.client_id);
    assert_eq!(messages[0].delivery, Delivery::Confirmed);
}

#[tokio::test]
async fn echo_after_switching_back_does_not_duplicate() {
    let backend = Arc::new(ScriptedBackend::with_conversations(&["a", "b"]));
    let hub = MemoryHub::new();
    let session = ChatSession::mount(backend.clone(), Arc::new(hub.transport()), signed_in()).await;
    session.select_conversation("a").await;

    let sent = session.send("hello").await.unwrap();
    let mut saved = sent.clone();
    saved.id = Some("srv-1".into());
    saved.delivery = Delivery::Confirmed;
    backend.persist(saved);

    session.select_conversation("b").await;
    session.select_conversation("a").await;
    assert_eq!(texts(&session), ["hello"]);

    hub.publish(
        &receive_event("a"),
        json!({ "_id": "srv-1", "conversationId": "a", "sender": ME, "text": "hello", "clientId": sent.client_id }),
    );
    let messages = session.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id.as_deref(), Some("srv-1"));
}

#[tokio::test]
async fn redelivered_message_replaces_history_entry() {
    let hub = MemoryHub::new();
    let session = mount(ScriptedBackend::with_conversations(&["a"]).history("a", 2), &hub).await;
    session.select_conversation("a").await;

    hub.publish(&receive_event("a"), json!({ "_id": "a-1", "sender": "peer", "text": "text a-1" }));
    assert_eq!(texts(&session), ["text a-0", "text a-1"]);
}

#[tokio::test]
async fn send_without_connection_still_shows_message() {
    let hub = MemoryHub::new();
    hub.refuse_connections(true);
    let session = mount(ScriptedBackend::with_conversations(&["a"]), &hub).await;
    session.select_conversation("a").await;

    assert!(session.send("offline hello").await.is_some());
    assert_eq!(texts(&session), ["offline hello"]);
    assert!(hub.sent().is_empty());
}

#[tokio::test]
async fn live_message_during_fetch_survives_history() {
    let backend = ScriptedBackend::with_conversations(&["a"])
        .history("a", 2)
        .delay_next("a", Duration::from_millis(100));
    let hub = MemoryHub::new();
    let session = mount(backend, &hub).await;

    let select = {
        let session = session.clone();
        tokio::spawn(async move { session.select_conversation("a").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    hub.publish(&receive_event("a"), json!({ "_id": "live-1", "sender": "peer", "text": "fresh" }));
    assert!(select.await.unwrap());

    assert_eq!(texts(&session), ["text a-0", "text a-1", "fresh"]);
}

#[tokio::test]
async fn unmount_leaves_nothing_behind_for_next_mount() {
    let hub = MemoryHub::new();
    let first_transport = Arc::new(hub.transport());
    let first = ChatSession::mount(Arc::new(ScriptedBackend::with_conversations(&["a"])), first_transport.clone(), signed_in()).await;
    first.select_conversation("a").await;
    first.unmount().await;
    assert_eq!(first.link_state(), LinkState::Disconnected);
    assert_eq!(first_transport.listener_count(), 0);
    assert!(!first_transport.is_connected());

    let second = mount(ScriptedBackend::with_conversations(&["a"]), &hub).await;
    second.select_conversation("a").await;
    assert_eq!(hub.connected_peers(), 1);
    assert_eq!(hub.publish(&receive_event("a"), json!({ "sender": "peer", "text": "once" })), 1);
    assert_eq!(texts(&second), ["once"]);
    assert!(first.messages().is_empty());
}

#[tokio::test]
async fn dropping_session_detaches_listener() {
    let hub = MemoryHub::new();
    let transport = Arc::new(hub.transport());
    let session = ChatSession::mount(Arc::new(ScriptedBackend::with_conversations(&["a"])), transport.clone(), signed_in()).await;
    session.select_conversation("a").await;
    assert_eq!(transport.listener_count(), 1);

    drop(session);
    assert_eq!(transport.listener_count(), 0);
}

#[tokio::test]
async fn switching_back_and_forth_keeps_one_connection() {
    let backend = ScriptedBackend::with_conversations(&["a", "b"]).history("a", 1);
    let hub = MemoryHub::new();
    let session = mount(backend, &hub).await;

    for id in ["a", "b", "a"] {
        assert!(session.select_conversation(id).await);
    }
    assert_eq!(hub.connect_count(), 1);
    assert_eq!(hub.connected_peers(), 1);
    assert_eq!(session.link_state(), LinkState::Subscribed);
    assert_eq!(hub.sent_with(PRESENCE).len(), 1);
}

#[tokio::test]
async fn start_conversation_goes_to_top() {
    let hub = MemoryHub::new();
    let session = mount(ScriptedBackend::with_conversations(&["a"]), &hub).await;

    let conv = session.start_conversation("recruiter-7").await.unwrap();
    assert_eq!(conv.counterpart_id(ME), Some("recruiter-7"));
    let ids: Vec<_> = session.conversations().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, ["new-recruiter-7", "a"]);
}

#[tokio::test]
async fn updates_are_broadcast() {
    let hub = MemoryHub::new();
    let session = mount(ScriptedBackend::with_conversations(&["a"]), &hub).await;
    let mut updates = session.subscribe_updates();

    session.select_conversation("a").await;
    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        seen.push(update);
    }
    assert!(seen.contains(&gudjob_chat::ChatUpdate::Link(LinkState::Subscribed)));
    assert!(seen.contains(&gudjob_chat::ChatUpdate::Messages));
}

#[tokio::test]
async fn reload_refetches_active_history() {
    let hub = MemoryHub::new();
    let session = mount(ScriptedBackend::with_conversations(&["a"]).history("a", 2), &hub).await;
    assert!(!session.reload_history().await);

    session.select_conversation("a").await;
    session.send("draft reply").await;
    assert!(session.reload_history().await);
    assert_eq!(texts(&session), ["text a-0", "text a-1", "draft reply"]);
}
