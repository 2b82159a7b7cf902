use gatesync_core::protocol::{InboundEvent, SessionPatch};

/// Terminal output for one event. Streamed text is printed inline so that
/// consecutive chunks join up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Inline(String),
    Line(String),
}

pub fn render(event: &InboundEvent) -> Option<Output> {
    let line = match event {
        InboundEvent::Open => "[connected]".to_string(),
        InboundEvent::Close { reason } => match reason {
            Some(reason) => format!("[disconnected: {}]", reason),
            None => "[disconnected]".to_string(),
        },
        InboundEvent::StreamChunk(chunk) => {
            return chunk
                .content
                .as_ref()
                .filter(|content| !content.is_empty())
                .map(|content| Output::Inline(content.clone()));
        }
        InboundEvent::StreamEnd => String::new(),
        InboundEvent::Error(error) => format!("[error] {}", error.describe()),
        InboundEvent::PushMessage(push) => match (&push.role, &push.content) {
            (Some(role), Some(content)) if !content.trim().is_empty() => {
                format!("{}: {}", role, content)
            }
            _ => return None,
        },
        InboundEvent::ToolCall(invocation)
        | InboundEvent::SessionPatch(SessionPatch::ToolStart(invocation)) => {
            match invocation.reason() {
                Some(reason) => format!("[tool {} running: {}]", invocation.tool_name, reason),
                None => format!("[tool {} running]", invocation.tool_name),
            }
        }
        InboundEvent::ToolResult(outcome)
        | InboundEvent::SessionPatch(SessionPatch::ToolEnd(outcome)) => {
            let status = if outcome.success == Some(false) {
                "failed"
            } else {
                "done"
            };
            format!("[tool {} {}]", outcome.tool_call_id, status)
        }
        InboundEvent::Session(snapshot) => format!(
            "[session {} · {} messages]",
            snapshot.session_id.as_deref().unwrap_or("-"),
            snapshot.messages.len()
        ),
        InboundEvent::History(history) => {
            format!("[history · {} messages]", history.messages.len())
        }
        InboundEvent::ProviderSet(ack) => match &ack.provider {
            Some(provider) => format!("[provider {}]", provider),
            None => "[provider updated]".to_string(),
        },
        InboundEvent::Catalog(catalog) => format!("[catalog · {} entries]", catalog.data.len()),
        _ => return None,
    };
    Some(Output::Line(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatesync_core::decode_frame;

    fn rendered(frame: &str) -> Option<Output> {
        render(&decode_frame(frame).unwrap())
    }

    #[test]
    fn test_chunks_render_inline() {
        assert_eq!(
            rendered(r#"{"type":"streamChunk","content":"Hel"}"#),
            Some(Output::Inline("Hel".to_string()))
        );
        assert_eq!(rendered(r#"{"type":"streamChunk","content":""}"#), None);
        assert_eq!(
            rendered(r#"{"type":"streamEnd"}"#),
            Some(Output::Line(String::new()))
        );
    }

    #[test]
    fn test_tool_lines() {
        assert_eq!(
            rendered(r#"{"type":"sessionPatch","op":"toolStart","toolCallId":"t1","toolName":"fetch","reason":"read docs"}"#),
            Some(Output::Line("[tool fetch running: read docs]".to_string()))
        );
        assert_eq!(
            rendered(r#"{"type":"toolResult","toolCallId":"t1","success":false}"#),
            Some(Output::Line("[tool t1 failed]".to_string()))
        );
    }

    #[test]
    fn test_lifecycle_lines() {
        assert_eq!(
            render(&InboundEvent::Close {
                reason: Some("connection closed".to_string())
            }),
            Some(Output::Line("[disconnected: connection closed]".to_string()))
        );
        assert_eq!(rendered(r#"{"type":"pong"}"#), None);
    }

    #[test]
    fn test_incomplete_push_message_renders_nothing() {
        assert_eq!(rendered(r#"{"type":"pushMessage","role":"assistant"}"#), None);
        assert_eq!(
            rendered(r#"{"type":"pushMessage","role":"assistant","content":"ping!"}"#),
            Some(Output::Line("assistant: ping!".to_string()))
        );
    }
}
