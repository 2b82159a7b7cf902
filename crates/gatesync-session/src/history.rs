use std::collections::HashSet;

use gatesync_core::id;
use gatesync_core::protocol::{RawMessage, Role};
use serde::Deserialize;
use serde_json::Value;

use crate::message::{now_millis, Message, MessageMeta, ToolMeta, ToolStatus, ToolTag};

/// Tool-role history entry; its content carries the call as JSON. Name and
/// id spellings are read separately since producers often send several.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolEntry {
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(default, rename = "tool_call_id")]
    tool_call_id_snake: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default, rename = "tool_name")]
    tool_name_snake: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    input: Option<Value>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    result: Option<Value>,
}

impl ToolEntry {
    fn parse(content: &Value) -> Option<Self> {
        let parsed = match content {
            Value::String(text) => serde_json::from_str(text),
            Value::Object(_) => serde_json::from_value(content.clone()),
            _ => return None,
        };
        parsed.ok()
    }

    /// `None` when the entry lacks a call id or a tool name.
    fn into_meta(self) -> Option<ToolMeta> {
        let tool_call_id = self.tool_call_id.or(self.tool_call_id_snake)?;
        let tool_name = self.name.or(self.tool_name).or(self.tool_name_snake)?;
        let reason = self.reason.or_else(|| {
            self.input
                .as_ref()
                .and_then(|input| input.get("reason"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        let status = match self.success {
            Some(true) => ToolStatus::Success,
            Some(false) => ToolStatus::Error,
            None => ToolStatus::Running,
        };
        Some(ToolMeta {
            kind: ToolTag::Tool,
            tool_call_id,
            tool_name,
            reason,
            status,
            result: self.result,
        })
    }
}

/// Creation time carried by a `msg_` id, for entries sent without a timestamp.
fn created_at(message_id: &str) -> Option<i64> {
    if !id::validate_prefix(message_id, id::Prefix::Message) {
        return None;
    }
    id::timestamp(message_id).and_then(|millis| i64::try_from(millis).ok())
}

/// Normalizes one raw entry. `None` means the entry is filtered out.
pub fn normalize_message(raw: &RawMessage) -> Option<Message> {
    let role = match Role::parse(&raw.role) {
        Some(role) => role,
        None => {
            tracing::debug!(role = %raw.role, "dropping history entry with unknown role");
            return None;
        }
    };
    if role == Role::System || raw.is_hidden() {
        return None;
    }

    let id = raw.id.clone().unwrap_or_else(id::message_id);
    let timestamp = raw
        .timestamp
        .or_else(|| created_at(&id))
        .unwrap_or_else(now_millis);

    if role == Role::Tool {
        let Some(meta) = ToolEntry::parse(&raw.content).and_then(ToolEntry::into_meta) else {
            tracing::debug!(id = %id, "dropping unparseable tool history entry");
            return None;
        };
        return Some(Message {
            id,
            role: Role::Assistant,
            content: String::new(),
            timestamp,
            meta: Some(MessageMeta::Tool(meta)),
        });
    }

    Some(Message {
        id,
        role,
        content: raw.content_text(),
        timestamp,
        meta: raw.meta.as_ref().and_then(MessageMeta::from_value),
    })
}

/// Normalizes a full snapshot, keeping message ids unique.
pub fn normalize_history(raw: &[RawMessage]) -> Vec<Message> {
    let mut seen = HashSet::with_capacity(raw.len());
    let mut messages = Vec::with_capacity(raw.len());

    for entry in raw {
        let Some(mut message) = normalize_message(entry) else {
            continue;
        };
        if !seen.insert(message.id.clone()) {
            let fresh = id::message_id();
            tracing::debug!(duplicate = %message.id, fresh = %fresh, "reassigning duplicate message id");
            message.id = fresh.clone();
            seen.insert(fresh);
        }
        messages.push(message);
    }

    messages
}
