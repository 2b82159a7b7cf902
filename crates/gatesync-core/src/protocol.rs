//! Gateway wire protocol.
//!
//! Every frame is a JSON object with a string `type` field. Inbound frames are
//! decoded into [`InboundEvent`], a closed union keyed by [`EventKind`];
//! outbound requests are encoded from [`OutboundRequest`]. Field names are
//! camelCase on the wire, snake_case aliases are accepted on input.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ============================================================================
// Event kinds
// ============================================================================

/// Closed set of event kinds the dispatcher routes on.
///
/// `Open` and `Close` are local transport lifecycle events; they never appear
/// on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Close,
    Pong,
    Session,
    SessionPatch,
    StreamStart,
    StreamChunk,
    StreamEnd,
    Error,
    PushMessage,
    ToolCall,
    ToolResult,
    Config,
    Catalog,
    History,
    ReloadHistory,
    ProviderSet,
}

impl EventKind {
    pub const ALL: [EventKind; 17] = [
        EventKind::Open,
        EventKind::Close,
        EventKind::Pong,
        EventKind::Session,
        EventKind::SessionPatch,
        EventKind::StreamStart,
        EventKind::StreamChunk,
        EventKind::StreamEnd,
        EventKind::Error,
        EventKind::PushMessage,
        EventKind::ToolCall,
        EventKind::ToolResult,
        EventKind::Config,
        EventKind::Catalog,
        EventKind::History,
        EventKind::ReloadHistory,
        EventKind::ProviderSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Open => "open",
            EventKind::Close => "close",
            EventKind::Pong => "pong",
            EventKind::Session => "session",
            EventKind::SessionPatch => "sessionPatch",
            EventKind::StreamStart => "streamStart",
            EventKind::StreamChunk => "streamChunk",
            EventKind::StreamEnd => "streamEnd",
            EventKind::Error => "error",
            EventKind::PushMessage => "pushMessage",
            EventKind::ToolCall => "toolCall",
            EventKind::ToolResult => "toolResult",
            EventKind::Config => "config",
            EventKind::Catalog => "catalog",
            EventKind::History => "history",
            EventKind::ReloadHistory => "reloadHistory",
            EventKind::ProviderSet => "providerSet",
        }
    }

    /// Resolves a wire `type` string. Lifecycle kinds are never accepted from
    /// the wire.
    pub fn from_wire(event_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .filter(|kind| !kind.is_lifecycle())
            .find(|kind| kind.as_str() == event_type)
    }

    pub fn is_lifecycle(&self) -> bool {
        matches!(self, EventKind::Open | EventKind::Close)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Shared payload types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// A message as the gateway sends it in snapshots and patches, before
/// normalization. Every field is optional on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireMessage")]
pub struct RawMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Loosely typed message envelope. Ids may be numbers, timestamps may be
/// epoch milliseconds or RFC 3339 strings under any of their three names.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    role: Option<Value>,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    created_at: Option<Value>,
    #[serde(default, rename = "created_at")]
    created_at_snake: Option<Value>,
    #[serde(default)]
    meta: Option<Value>,
}

impl From<WireMessage> for RawMessage {
    fn from(wire: WireMessage) -> Self {
        let id = match wire.id {
            Some(Value::String(id)) if !id.is_empty() => Some(id),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        };
        let role = match wire.role {
            Some(Value::String(role)) => role,
            _ => String::new(),
        };
        let timestamp = [wire.timestamp, wire.created_at, wire.created_at_snake]
            .iter()
            .flatten()
            .find_map(epoch_millis);
        Self {
            id,
            role,
            content: wire.content,
            timestamp,
            meta: wire.meta,
        }
    }
}

fn epoch_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|millis| millis as i64)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| {
                chrono::DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|time| time.timestamp_millis())
            })
        }
        _ => None,
    }
}

/// Decodes a message list entry by entry; an entry that is not a message
/// object is logged and skipped instead of failing the whole frame.
fn lenient_messages<'de, D>(deserializer: D) -> Result<Vec<RawMessage>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(message) => Some(message),
            Err(err) => {
                tracing::warn!(index, %err, "dropping malformed history entry");
                None
            }
        })
        .collect())
}

impl RawMessage {
    pub fn new(role: &str, content: impl Into<Value>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// Content as text; non-string content is rendered as compact JSON.
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::Null => String::new(),
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.meta
            .as_ref()
            .and_then(|meta| meta.get("hidden"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

// ============================================================================
// Inbound payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Pong {
    /// Filled in by the transport from its heartbeat bookkeeping.
    #[serde(skip)]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(default, alias = "session_id")]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_messages")]
    pub messages: Vec<RawMessage>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct HistorySnapshot {
    #[serde(default, deserialize_with = "lenient_messages")]
    pub messages: Vec<RawMessage>,
}

/// Start of a tool invocation, shared by `sessionPatch/toolStart` and the
/// legacy `toolCall` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireToolInvocation")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    pub reason: Option<String>,
    pub input: Option<Value>,
}

/// Every spelling of the call id and tool name may appear together, so they
/// are read as separate fields and coalesced.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireToolInvocation {
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(default, rename = "tool_call_id")]
    tool_call_id_snake: Option<String>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "tool_name")]
    tool_name_snake: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

impl TryFrom<WireToolInvocation> for ToolInvocation {
    type Error = &'static str;

    fn try_from(wire: WireToolInvocation) -> Result<Self, Self::Error> {
        let tool_call_id = wire
            .tool_call_id
            .or(wire.tool_call_id_snake)
            .ok_or("missing field `toolCallId`")?;
        Ok(Self {
            tool_call_id,
            tool_name: wire
                .tool_name
                .or(wire.name)
                .or(wire.tool_name_snake)
                .unwrap_or_default(),
            reason: wire.reason,
            input: wire.input,
        })
    }
}

impl ToolInvocation {
    /// Explicit reason, falling back to `input.reason`.
    pub fn reason(&self) -> Option<String> {
        self.reason.clone().or_else(|| {
            self.input
                .as_ref()
                .and_then(|input| input.get("reason"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
    }
}

/// Completion of a tool invocation, shared by `sessionPatch/toolEnd` and the
/// legacy `toolResult` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutcome {
    #[serde(alias = "tool_call_id")]
    pub tool_call_id: String,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum SessionPatch {
    AddMessage { message: RawMessage },
    ToolStart(ToolInvocation),
    ToolEnd(ToolOutcome),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl ErrorEvent {
    pub fn describe(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        match &self.error {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Object(map)) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
            Some(other) => other.to_string(),
            None => "unknown error".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct PushMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPayload {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default, alias = "provider_ready")]
    pub provider_ready: Option<bool>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, alias = "current_model")]
    pub current_model: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConfigPayload {
    pub fn model(&self) -> Option<&str> {
        self.current_model.as_deref().or(self.model.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Catalog {
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(from = "WireProviderSet")]
pub struct ProviderSet {
    pub provider: Option<String>,
    pub provider_ready: Option<bool>,
    pub model: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProviderSet {
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    provider_ready: Option<bool>,
    #[serde(default)]
    ready: Option<bool>,
    #[serde(default, rename = "provider_ready")]
    provider_ready_snake: Option<bool>,
    #[serde(default)]
    model: Option<String>,
}

impl From<WireProviderSet> for ProviderSet {
    fn from(wire: WireProviderSet) -> Self {
        Self {
            provider: wire.provider,
            provider_ready: wire
                .provider_ready
                .or(wire.ready)
                .or(wire.provider_ready_snake),
            model: wire.model,
        }
    }
}

// ============================================================================
// Inbound events
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Open,
    Close { reason: Option<String> },
    Pong(Pong),
    Session(SessionSnapshot),
    SessionPatch(SessionPatch),
    StreamStart,
    StreamChunk(StreamChunk),
    StreamEnd,
    Error(ErrorEvent),
    PushMessage(PushMessage),
    ToolCall(ToolInvocation),
    ToolResult(ToolOutcome),
    Config(ConfigPayload),
    Catalog(Catalog),
    History(HistorySnapshot),
    ReloadHistory,
    ProviderSet(ProviderSet),
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::Open => EventKind::Open,
            InboundEvent::Close { .. } => EventKind::Close,
            InboundEvent::Pong(_) => EventKind::Pong,
            InboundEvent::Session(_) => EventKind::Session,
            InboundEvent::SessionPatch(_) => EventKind::SessionPatch,
            InboundEvent::StreamStart => EventKind::StreamStart,
            InboundEvent::StreamChunk(_) => EventKind::StreamChunk,
            InboundEvent::StreamEnd => EventKind::StreamEnd,
            InboundEvent::Error(_) => EventKind::Error,
            InboundEvent::PushMessage(_) => EventKind::PushMessage,
            InboundEvent::ToolCall(_) => EventKind::ToolCall,
            InboundEvent::ToolResult(_) => EventKind::ToolResult,
            InboundEvent::Config(_) => EventKind::Config,
            InboundEvent::Catalog(_) => EventKind::Catalog,
            InboundEvent::History(_) => EventKind::History,
            InboundEvent::ReloadHistory => EventKind::ReloadHistory,
            InboundEvent::ProviderSet(_) => EventKind::ProviderSet,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no string `type` field")]
    MissingType,

    #[error("unknown frame type: {0}")]
    UnknownType(String),

    #[error("malformed `{kind}` payload: {source}")]
    Payload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Decodes one inbound text frame.
pub fn decode_frame(text: &str) -> Result<InboundEvent, DecodeError> {
    let mut value: Value = serde_json::from_str(text).map_err(DecodeError::Json)?;
    let object = value.as_object_mut().ok_or(DecodeError::NotAnObject)?;
    let event_type = match object.remove("type") {
        Some(Value::String(event_type)) => event_type,
        _ => return Err(DecodeError::MissingType),
    };
    let kind = EventKind::from_wire(&event_type).ok_or(DecodeError::UnknownType(event_type))?;
    let payload = Value::Object(std::mem::take(object));

    let event = match kind {
        EventKind::Pong => InboundEvent::Pong(Pong::default()),
        EventKind::Session => InboundEvent::Session(payload_of(kind, payload)?),
        EventKind::SessionPatch => InboundEvent::SessionPatch(payload_of(kind, payload)?),
        EventKind::StreamStart => InboundEvent::StreamStart,
        EventKind::StreamChunk => InboundEvent::StreamChunk(payload_of(kind, payload)?),
        EventKind::StreamEnd => InboundEvent::StreamEnd,
        EventKind::Error => InboundEvent::Error(payload_of(kind, payload)?),
        EventKind::PushMessage => InboundEvent::PushMessage(payload_of(kind, payload)?),
        EventKind::ToolCall => InboundEvent::ToolCall(payload_of(kind, payload)?),
        EventKind::ToolResult => InboundEvent::ToolResult(payload_of(kind, payload)?),
        EventKind::Config => InboundEvent::Config(payload_of(kind, payload)?),
        EventKind::Catalog => InboundEvent::Catalog(payload_of(kind, payload)?),
        EventKind::History => InboundEvent::History(payload_of(kind, payload)?),
        EventKind::ReloadHistory => InboundEvent::ReloadHistory,
        EventKind::ProviderSet => InboundEvent::ProviderSet(payload_of(kind, payload)?),
        EventKind::Open | EventKind::Close => {
            return Err(DecodeError::UnknownType(kind.as_str().to_string()))
        }
    };
    Ok(event)
}

fn payload_of<T: DeserializeOwned>(kind: EventKind, payload: Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|source| DecodeError::Payload { kind, source })
}

// ============================================================================
// Outbound requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundRequest {
    Ping,
    GetSession,
    Chat { messages: Vec<ChatTurn> },
    GetConfig,
    GetCatalog,
    GetHistory,
    SetProvider { provider: String },
    GetModels,
    SetModel { model: String },
}

impl OutboundRequest {
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundRequest::Ping => "ping",
            OutboundRequest::GetSession => "getSession",
            OutboundRequest::Chat { .. } => "chat",
            OutboundRequest::GetConfig => "getConfig",
            OutboundRequest::GetCatalog => "getCatalog",
            OutboundRequest::GetHistory => "getHistory",
            OutboundRequest::SetProvider { .. } => "setProvider",
            OutboundRequest::GetModels => "getModels",
            OutboundRequest::SetModel { .. } => "setModel",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
