use chrono::Utc;
use gatesync_core::id;
use gatesync_core::protocol::{RawMessage, Role, ToolInvocation, ToolOutcome};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A normalized chat message as held by the session store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<MessageMeta>,
}

impl Message {
    /// A fresh message with a generated id, stamped now.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id::message_id(),
            role,
            content: content.into(),
            timestamp: now_millis(),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: Option<MessageMeta>) -> Self {
        self.meta = meta;
        self
    }

    /// Empty assistant message standing in for a running tool invocation.
    pub fn tool_placeholder(invocation: &ToolInvocation) -> Self {
        Self::new(Role::Assistant, "").with_meta(Some(MessageMeta::Tool(ToolMeta {
            kind: ToolTag::Tool,
            tool_call_id: invocation.tool_call_id.clone(),
            tool_name: invocation.tool_name.clone(),
            reason: invocation.reason(),
            status: ToolStatus::Running,
            result: None,
        })))
    }

    pub fn tool_meta(&self) -> Option<&ToolMeta> {
        match &self.meta {
            Some(MessageMeta::Tool(meta)) => Some(meta),
            _ => None,
        }
    }

    pub fn tool_meta_mut(&mut self) -> Option<&mut ToolMeta> {
        match &mut self.meta {
            Some(MessageMeta::Tool(meta)) => Some(meta),
            _ => None,
        }
    }

    pub fn is_tool(&self) -> bool {
        self.tool_meta().is_some()
    }
}

impl From<&Message> for RawMessage {
    fn from(message: &Message) -> Self {
        RawMessage {
            id: Some(message.id.clone()),
            role: message.role.as_str().to_string(),
            content: Value::String(message.content.clone()),
            timestamp: Some(message.timestamp),
            meta: message
                .meta
                .as_ref()
                .and_then(|meta| serde_json::to_value(meta).ok()),
        }
    }
}

/// Message metadata: either tool-call state or free-form annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageMeta {
    Tool(ToolMeta),
    Annotation(Map<String, Value>),
}

impl MessageMeta {
    /// Interprets a raw wire value. Anything but a JSON object is discarded.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolTag {
    #[default]
    #[serde(rename = "tool")]
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMeta {
    #[serde(rename = "type")]
    pub kind: ToolTag,
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ToolMeta {
    /// Merges an update. A missing field leaves the current value untouched.
    /// Returns whether anything changed.
    pub fn apply(&mut self, update: ToolUpdate) -> bool {
        let mut changed = false;
        if let Some(status) = update.status.filter(|status| *status != self.status) {
            self.status = status;
            changed = true;
        }
        if let Some(result) = update.result.filter(|result| self.result.as_ref() != Some(result)) {
            self.result = Some(result);
            changed = true;
        }
        changed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Running,
    Success,
    Error,
}

impl ToolStatus {
    /// `success: false` is an error; `true` or absent counts as success.
    pub fn from_success(success: Option<bool>) -> Self {
        match success {
            Some(false) => ToolStatus::Error,
            _ => ToolStatus::Success,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ToolStatus::Running)
    }
}

/// Partial update merged into a tool message's [`ToolMeta`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolUpdate {
    pub status: Option<ToolStatus>,
    pub result: Option<Value>,
}

impl From<&ToolOutcome> for ToolUpdate {
    fn from(outcome: &ToolOutcome) -> Self {
        Self {
            status: Some(ToolStatus::from_success(outcome.success)),
            result: outcome.result.clone(),
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
