use std::collections::HashMap;

use gatesync_core::id;
use gatesync_core::protocol::{
    HistorySnapshot, InboundEvent, PushMessage, RawMessage, Role, SessionPatch, SessionSnapshot,
    ToolInvocation, ToolOutcome,
};
use serde::Serialize;
use tokio::sync::watch;

use crate::correlator::ToolCallCorrelator;
use crate::history::{normalize_history, normalize_message};
use crate::message::{Message, MessageMeta, ToolUpdate};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    #[default]
    Idle,
    Processing,
}

/// The conversation as last reported by the gateway plus local edits.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: Option<String>,
    pub messages: Vec<Message>,
    pub processing_state: ProcessingState,
}

impl Session {
    pub fn is_processing(&self) -> bool {
        self.processing_state == ProcessingState::Processing
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Owns the [`Session`] and applies inbound events to it.
///
/// Every transition that changes the session publishes a clone on a
/// `watch` channel; transitions that change nothing publish nothing.
#[derive(Debug)]
pub struct SessionStore {
    session: Session,
    message_index: HashMap<String, usize>,
    correlator: ToolCallCorrelator,
    tx: watch::Sender<Session>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Session::default());
        Self {
            session: Session::default(),
            message_index: HashMap::new(),
            correlator: ToolCallCorrelator::new(),
            tx,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn messages(&self) -> &[Message] {
        &self.session.messages
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.session_id.as_deref()
    }

    pub fn processing_state(&self) -> ProcessingState {
        self.session.processing_state
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.message_index
            .get(id)
            .and_then(|&position| self.session.messages.get(position))
    }

    pub fn correlator(&self) -> &ToolCallCorrelator {
        &self.correlator
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    /// Routes a content-affecting event to its transition. Returns whether
    /// the session changed.
    pub fn apply(&mut self, event: &InboundEvent) -> bool {
        match event {
            InboundEvent::Session(snapshot) => self.load_snapshot(snapshot),
            InboundEvent::History(history) => self.load_history(history),
            InboundEvent::SessionPatch(patch) => self.apply_patch(patch),
            InboundEvent::StreamStart => self.stream_start(),
            InboundEvent::StreamChunk(chunk) => self.stream_chunk(chunk.content.as_deref()),
            InboundEvent::StreamEnd => self.stream_end(),
            InboundEvent::Error(error) => {
                tracing::warn!(error = %error.describe(), "gateway reported an error");
                self.stream_end()
            }
            InboundEvent::PushMessage(push) => self.push_message(push),
            InboundEvent::ToolCall(invocation) => self.start_tool(invocation),
            InboundEvent::ToolResult(outcome) => self.finish_tool(outcome),
            InboundEvent::Close { .. } => self.connection_lost(),
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Replaces the conversation. A snapshot without a `sessionId` keeps
    /// the current id, or gets a local `ses_` id if there is none yet.
    pub fn load_snapshot(&mut self, snapshot: &SessionSnapshot) -> bool {
        let session_changed = match &snapshot.session_id {
            Some(id) if self.session.session_id.as_deref() != Some(id.as_str()) => {
                self.session.session_id = Some(id.clone());
                true
            }
            None if self.session.session_id.is_none() => {
                self.session.session_id = Some(id::session_id());
                true
            }
            _ => false,
        };
        let messages_changed = self.replace_messages(normalize_history(&snapshot.messages));
        self.commit(session_changed || messages_changed)
    }

    /// Legacy bulk history. Keeps the current session id.
    pub fn load_history(&mut self, history: &HistorySnapshot) -> bool {
        let changed = self.replace_messages(normalize_history(&history.messages));
        self.commit(changed)
    }

    // ------------------------------------------------------------------
    // Streaming
    // ------------------------------------------------------------------

    pub fn stream_start(&mut self) -> bool {
        let changed = self.set_processing(ProcessingState::Processing);
        self.commit(changed)
    }

    /// Appends streamed text. Text extends the last message only when that
    /// message is a plain assistant message; otherwise a new one is started.
    pub fn stream_chunk(&mut self, content: Option<&str>) -> bool {
        let Some(chunk) = content.filter(|chunk| !chunk.is_empty()) else {
            return false;
        };

        let extends_last = matches!(
            self.session.messages.last(),
            Some(last) if last.role == Role::Assistant && !last.is_tool()
        );
        if extends_last {
            if let Some(last) = self.session.messages.last_mut() {
                last.content.push_str(chunk);
            }
        } else {
            self.push(Message::new(Role::Assistant, chunk));
        }
        self.commit(true)
    }

    pub fn stream_end(&mut self) -> bool {
        let changed = self.set_processing(ProcessingState::Idle);
        self.commit(changed)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub fn push_message(&mut self, push: &PushMessage) -> bool {
        let Some(role) = push.role.as_deref().and_then(Role::parse) else {
            tracing::debug!(role = ?push.role, "discarding pushMessage without a known role");
            return false;
        };
        let Some(content) = push.content.as_deref().filter(|text| !text.is_empty()) else {
            tracing::debug!("discarding pushMessage without content");
            return false;
        };

        let meta = push.meta.as_ref().and_then(MessageMeta::from_value);
        self.push(Message::new(role, content).with_meta(meta));
        self.commit(true)
    }

    /// Optimistic local echo of a prompt the user just sent. Returns the new
    /// message id, or `None` for blank input.
    pub fn append_user_message(&mut self, content: &str) -> Option<String> {
        if content.trim().is_empty() {
            return None;
        }
        let message = Message::new(Role::User, content);
        let id = message.id.clone();
        self.push(message);
        self.commit(true);
        Some(id)
    }

    pub fn apply_patch(&mut self, patch: &SessionPatch) -> bool {
        match patch {
            SessionPatch::AddMessage { message } => self.add_message(message),
            SessionPatch::ToolStart(invocation) => self.start_tool(invocation),
            SessionPatch::ToolEnd(outcome) => self.finish_tool(outcome),
            SessionPatch::Unknown => {
                tracing::debug!("ignoring sessionPatch with unknown op");
                false
            }
        }
    }

    pub fn add_message(&mut self, raw: &RawMessage) -> bool {
        let Some(message) = normalize_message(raw) else {
            return false;
        };
        if self.message_index.contains_key(&message.id) {
            tracing::debug!(id = %message.id, "ignoring re-delivered message");
            return false;
        }
        if let Some(meta) = message.tool_meta() {
            self.correlator
                .register_placeholder(meta.tool_call_id.clone(), message.id.clone());
        }
        self.push(message);
        self.commit(true)
    }

    // ------------------------------------------------------------------
    // Tools
    // ------------------------------------------------------------------

    pub fn start_tool(&mut self, invocation: &ToolInvocation) -> bool {
        let placeholder = Message::tool_placeholder(invocation);
        self.correlator
            .register_placeholder(invocation.tool_call_id.clone(), placeholder.id.clone());
        tracing::debug!(
            tool_call_id = %invocation.tool_call_id,
            tool = %invocation.tool_name,
            "tool started"
        );
        self.push(placeholder);
        self.commit(true)
    }

    pub fn finish_tool(&mut self, outcome: &ToolOutcome) -> bool {
        self.resolve_tool(&outcome.tool_call_id, ToolUpdate::from(outcome))
    }

    /// Merges `update` into the placeholder registered for `tool_call_id`.
    /// Unknown ids and updates that match the current state change nothing.
    pub fn resolve_tool(&mut self, tool_call_id: &str, update: ToolUpdate) -> bool {
        let Some(message_id) = self.correlator.resolve(tool_call_id) else {
            tracing::debug!(tool_call_id, "no placeholder for tool result");
            return false;
        };
        let Some(&position) = self.message_index.get(message_id) else {
            tracing::debug!(tool_call_id, message_id, "tool placeholder no longer present");
            return false;
        };
        let Some(meta) = self
            .session
            .messages
            .get_mut(position)
            .and_then(Message::tool_meta_mut)
        else {
            return false;
        };

        let changed = meta.apply(update);
        self.commit(changed)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// The transport closed: nothing is streaming any more and in-flight
    /// tool calls can no longer be correlated.
    pub fn connection_lost(&mut self) -> bool {
        self.correlator.clear();
        let changed = self.set_processing(ProcessingState::Idle);
        self.commit(changed)
    }

    pub fn reset(&mut self) -> bool {
        self.correlator.clear();
        self.message_index.clear();
        let changed = self.session != Session::default();
        self.session = Session::default();
        self.commit(changed)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn push(&mut self, message: Message) {
        self.message_index
            .insert(message.id.clone(), self.session.messages.len());
        self.session.messages.push(message);
    }

    fn replace_messages(&mut self, messages: Vec<Message>) -> bool {
        self.correlator.rebuild_from(&messages);
        if self.session.messages == messages {
            return false;
        }
        self.message_index = messages
            .iter()
            .enumerate()
            .map(|(position, message)| (message.id.clone(), position))
            .collect();
        self.session.messages = messages;
        true
    }

    fn set_processing(&mut self, state: ProcessingState) -> bool {
        if self.session.processing_state == state {
            return false;
        }
        self.session.processing_state = state;
        true
    }

    fn commit(&mut self, changed: bool) -> bool {
        if changed {
            self.tx.send_replace(self.session.clone());
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatesync_core::protocol::StreamChunk;
    use serde_json::json;

    use crate::message::ToolStatus;

    fn chunk(text: &str) -> InboundEvent {
        InboundEvent::StreamChunk(StreamChunk {
            content: Some(text.to_string()),
        })
    }

    fn tool_start(call_id: &str, name: &str) -> InboundEvent {
        InboundEvent::SessionPatch(SessionPatch::ToolStart(ToolInvocation {
            tool_call_id: call_id.to_string(),
            tool_name: name.to_string(),
            reason: None,
            input: None,
        }))
    }

    fn tool_end(call_id: &str, success: Option<bool>, result: Option<serde_json::Value>) -> InboundEvent {
        InboundEvent::SessionPatch(SessionPatch::ToolEnd(ToolOutcome {
            tool_call_id: call_id.to_string(),
            success,
            result,
        }))
    }

    #[test]
    fn test_processing_state_transitions() {
        let mut store = SessionStore::new();
        assert_eq!(store.processing_state(), ProcessingState::Idle);

        assert!(store.apply(&InboundEvent::StreamStart));
        assert!(store.session().is_processing());
        assert!(!store.apply(&InboundEvent::StreamStart));

        assert!(store.apply(&InboundEvent::StreamEnd));
        assert!(!store.apply(&InboundEvent::StreamEnd));
        assert_eq!(store.processing_state(), ProcessingState::Idle);
    }

    #[test]
    fn test_error_returns_to_idle_and_keeps_messages() {
        let mut store = SessionStore::new();
        store.apply(&InboundEvent::StreamStart);
        store.apply(&chunk("partial"));

        let error = InboundEvent::Error(gatesync_core::protocol::ErrorEvent {
            message: Some("provider failed".to_string()),
            error: None,
        });
        assert!(store.apply(&error));
        assert_eq!(store.processing_state(), ProcessingState::Idle);
        assert_eq!(store.messages().len(), 1);
    }

    #[test]
    fn test_chunks_concatenate_into_one_message() {
        let mut store = SessionStore::new();
        store.apply(&InboundEvent::StreamStart);
        for part in ["Hel", "lo", ", world"] {
            store.apply(&chunk(part));
        }
        store.apply(&InboundEvent::StreamEnd);

        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.messages()[0].role, Role::Assistant);
        assert_eq!(store.messages()[0].content, "Hello, world");
    }

    #[test]
    fn test_chunk_extends_in_place() {
        let mut store = SessionStore::new();
        store.apply(&chunk("a"));
        let before = store.messages()[0].clone();
        store.apply(&chunk("b"));

        let after = &store.messages()[0];
        assert_eq!(after.id, before.id);
        assert_eq!(after.timestamp, before.timestamp);
        assert_eq!(after.content, "ab");
    }

    #[test]
    fn test_chunk_after_user_message_starts_new_reply() {
        let mut store = SessionStore::new();
        store.append_user_message("question");
        store.apply(&chunk("answer"));

        assert_eq!(store.messages().len(), 2);
        assert_eq!(store.messages()[1].role, Role::Assistant);
        assert_eq!(store.messages()[1].content, "answer");
    }

    #[test]
    fn test_chunk_after_tool_start_starts_new_message() {
        let mut store = SessionStore::new();
        store.apply(&tool_start("t1", "search"));
        store.apply(&chunk("found it"));

        let messages = store.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].is_tool());
        assert!(messages[0].content.is_empty());
        assert!(!messages[1].is_tool());
        assert_eq!(messages[1].content, "found it");
    }

    #[test]
    fn test_empty_chunk_is_ignored() {
        let mut store = SessionStore::new();
        let rx = store.subscribe();
        assert!(!store.apply(&chunk("")));
        assert!(!store.apply(&InboundEvent::StreamChunk(StreamChunk { content: None })));
        assert!(store.messages().is_empty());
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_tool_end_resolves_placeholder() {
        let mut store = SessionStore::new();
        store.apply(&tool_start("t1", "search"));
        assert!(store.apply(&tool_end("t1", Some(true), Some(json!({ "hits": 2 })))));

        let meta = store.messages()[0].tool_meta().unwrap();
        assert_eq!(meta.status, ToolStatus::Success);
        assert_eq!(meta.result, Some(json!({ "hits": 2 })));
        assert_eq!(meta.tool_name, "search");
    }

    #[test]
    fn test_tool_end_without_result_keeps_previous_result() {
        let mut store = SessionStore::new();
        store.apply(&tool_start("t1", "search"));
        store.resolve_tool(
            "t1",
            ToolUpdate {
                status: None,
                result: Some(json!("draft")),
            },
        );
        store.apply(&tool_end("t1", None, None));

        let meta = store.messages()[0].tool_meta().unwrap();
        assert_eq!(meta.status, ToolStatus::Success);
        assert_eq!(meta.result, Some(json!("draft")));
    }

    #[test]
    fn test_unknown_tool_end_is_noop() {
        let mut store = SessionStore::new();
        store.append_user_message("hi");
        let before = store.session().clone();
        let rx = store.subscribe();

        assert!(!store.apply(&tool_end("nope", Some(false), None)));
        assert_eq!(store.session(), &before);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_legacy_and_patch_protocols_share_correlation() {
        let mut store = SessionStore::new();
        store.apply(&InboundEvent::ToolCall(ToolInvocation {
            tool_call_id: "legacy".to_string(),
            tool_name: "fetch".to_string(),
            reason: Some("look".to_string()),
            input: None,
        }));
        assert!(store.apply(&tool_end("legacy", Some(false), Some(json!("timeout")))));

        store.apply(&tool_start("patched", "search"));
        assert!(store.apply(&InboundEvent::ToolResult(ToolOutcome {
            tool_call_id: "patched".to_string(),
            success: Some(true),
            result: None,
        })));

        let statuses: Vec<_> = store
            .messages()
            .iter()
            .map(|m| m.tool_meta().unwrap().status)
            .collect();
        assert_eq!(statuses, vec![ToolStatus::Error, ToolStatus::Success]);
    }

    #[test]
    fn test_add_message_ignores_duplicates_and_filtered() {
        let mut store = SessionStore::new();
        let mut raw = RawMessage::new("assistant", json!("from server"));
        raw.id = Some("srv-1".to_string());
        let patch = InboundEvent::SessionPatch(SessionPatch::AddMessage {
            message: raw.clone(),
        });

        assert!(store.apply(&patch));
        assert!(!store.apply(&patch));
        assert!(!store.add_message(&RawMessage::new("system", json!("prompt"))));
        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.message("srv-1").unwrap().content, "from server");
    }

    #[test]
    fn test_unknown_patch_op_is_noop() {
        let mut store = SessionStore::new();
        assert!(!store.apply(&InboundEvent::SessionPatch(SessionPatch::Unknown)));
    }

    #[test]
    fn test_push_message_requires_role_and_content() {
        let mut store = SessionStore::new();
        let push = |role: Option<&str>, content: Option<&str>| PushMessage {
            role: role.map(str::to_string),
            content: content.map(str::to_string),
            meta: Some(json!({ "source": "scheduler" })),
        };

        assert!(!store.push_message(&push(None, Some("hello"))));
        assert!(!store.push_message(&push(Some("wizard"), Some("hello"))));
        assert!(!store.push_message(&push(Some("assistant"), Some(""))));
        assert!(store.push_message(&push(Some("assistant"), Some("reminder"))));

        let message = &store.messages()[0];
        assert_eq!(message.content, "reminder");
        assert!(matches!(message.meta, Some(MessageMeta::Annotation(_))));
    }

    #[test]
    fn test_push_message_keeps_whitespace_content() {
        let mut store = SessionStore::new();
        assert!(store.push_message(&PushMessage {
            role: Some("assistant".to_string()),
            content: Some("\n".to_string()),
            meta: None,
        }));
        assert_eq!(store.messages()[0].content, "\n");
    }

    #[test]
    fn test_redelivered_tool_end_does_not_publish() {
        let mut store = SessionStore::new();
        store.apply(&tool_start("t1", "fetch"));
        assert!(store.apply(&tool_end("t1", Some(false), Some(json!("timeout")))));

        let rx = store.subscribe();
        assert!(!store.apply(&tool_end("t1", Some(false), Some(json!("timeout")))));
        assert!(!rx.has_changed().unwrap());

        assert!(store.apply(&tool_end("t1", Some(true), Some(json!("timeout")))));
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_added_tool_entry_resolves_later_tool_end() {
        let mut store = SessionStore::new();
        let mut raw = RawMessage::new(
            "tool",
            json!({ "toolCallId": "t2", "name": "fetch" }),
        );
        raw.id = Some("srv-tool".to_string());
        assert!(store.apply(&InboundEvent::SessionPatch(SessionPatch::AddMessage {
            message: raw,
        })));
        assert_eq!(store.correlator().resolve("t2"), Some("srv-tool"));

        assert!(store.apply(&tool_end("t2", Some(true), Some(json!("ok")))));
        let meta = store.message("srv-tool").unwrap().tool_meta().unwrap();
        assert_eq!(meta.status, ToolStatus::Success);
        assert_eq!(meta.result, Some(json!("ok")));
    }

    #[test]
    fn test_snapshot_replaces_and_rebuilds_correlation() {
        let mut store = SessionStore::new();
        store.append_user_message("local only");

        let snapshot = SessionSnapshot {
            session_id: Some("ses_1".to_string()),
            messages: vec![
                RawMessage::new("user", json!("hi")),
                RawMessage::new(
                    "tool",
                    json!({ "toolCallId": "t7", "name": "fetch" }),
                ),
            ],
        };
        assert!(store.apply(&InboundEvent::Session(snapshot)));

        assert_eq!(store.session_id(), Some("ses_1"));
        assert_eq!(store.messages().len(), 2);
        assert_eq!(store.correlator().len(), 1);

        assert!(store.apply(&tool_end("t7", Some(true), Some(json!("done")))));
        assert_eq!(
            store.messages()[1].tool_meta().unwrap().status,
            ToolStatus::Success
        );
    }

    #[test]
    fn test_snapshot_without_session_id_gets_local_id_once() {
        let mut store = SessionStore::new();
        let snapshot = SessionSnapshot {
            session_id: None,
            messages: vec![RawMessage::new("user", json!("hi"))],
        };
        assert!(store.load_snapshot(&snapshot));
        let local = store.session_id().unwrap().to_string();
        assert!(local.starts_with("ses_"));

        let replay = store.messages().iter().map(RawMessage::from).collect();
        assert!(!store.load_snapshot(&SessionSnapshot {
            session_id: None,
            messages: replay,
        }));
        assert_eq!(store.session_id(), Some(local.as_str()));

        assert!(store.load_snapshot(&SessionSnapshot {
            session_id: Some("ses_server".to_string()),
            messages: vec![],
        }));
        assert_eq!(store.session_id(), Some("ses_server"));
    }

    #[test]
    fn test_history_keeps_session_id() {
        let mut store = SessionStore::new();
        store.apply(&InboundEvent::Session(SessionSnapshot {
            session_id: Some("ses_1".to_string()),
            messages: vec![],
        }));
        store.apply(&InboundEvent::History(HistorySnapshot {
            messages: vec![RawMessage::new("user", json!("old"))],
        }));

        assert_eq!(store.session_id(), Some("ses_1"));
        assert_eq!(store.messages().len(), 1);
    }

    #[test]
    fn test_connection_lost_clears_correlation_and_idles() {
        let mut store = SessionStore::new();
        store.apply(&InboundEvent::StreamStart);
        store.apply(&tool_start("t1", "search"));

        assert!(store.apply(&InboundEvent::Close { reason: None }));
        assert_eq!(store.processing_state(), ProcessingState::Idle);
        assert!(store.correlator().is_empty());
        assert!(!store.apply(&tool_end("t1", Some(true), None)));
        assert_eq!(store.messages().len(), 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut store = SessionStore::new();
        store.append_user_message("hi");
        store.apply(&tool_start("t1", "search"));

        assert!(store.reset());
        assert_eq!(store.session(), &Session::default());
        assert!(store.correlator().is_empty());
        assert!(!store.reset());
    }

    #[test]
    fn test_append_user_message_rejects_blank() {
        let mut store = SessionStore::new();
        assert_eq!(store.append_user_message("   "), None);
        let id = store.append_user_message("hello").unwrap();
        assert_eq!(store.message(&id).unwrap().role, Role::User);
    }

    #[test]
    fn test_subscribers_see_latest_session() {
        let mut store = SessionStore::new();
        let mut rx = store.subscribe();

        store.apply(&chunk("hi"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().messages.len(), 1);

        store.apply(&InboundEvent::Open);
        assert!(!rx.has_changed().unwrap());
    }
}
