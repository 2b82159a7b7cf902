//! Values derived from store state. Nothing here mutates.

use gatesync_core::protocol::{ChatTurn, Role};

use crate::message::Message;
use crate::status::ConnectionStatus;
use crate::store::{ProcessingState, Session};

pub fn can_submit(session: &Session, status: &ConnectionStatus) -> bool {
    status.connected && session.processing_state == ProcessingState::Idle
}

pub fn pending_tool_calls(session: &Session) -> Vec<&Message> {
    session
        .messages
        .iter()
        .filter(|message| {
            message
                .tool_meta()
                .is_some_and(|meta| !meta.status.is_terminal())
        })
        .collect()
}

/// Conversation turns sent with a `chat` request. Tool placeholders and
/// empty messages are left out.
pub fn chat_history(session: &Session) -> Vec<ChatTurn> {
    session
        .messages
        .iter()
        .filter(|message| matches!(message.role, Role::User | Role::Assistant))
        .filter(|message| !message.is_tool() && !message.content.is_empty())
        .map(|message| ChatTurn {
            role: message.role,
            content: message.content.clone(),
        })
        .collect()
}

pub fn status_label(status: &ConnectionStatus) -> String {
    if !status.connected {
        return "offline".to_string();
    }
    if !status.provider_ready {
        return "connecting provider".to_string();
    }

    let target = match (&status.provider, &status.current_model) {
        (Some(provider), Some(model)) => format!("{}/{}", provider, model),
        (Some(provider), None) => provider.clone(),
        (None, Some(model)) => model.clone(),
        (None, None) => "connected".to_string(),
    };
    format!("{} · {}ms", target, status.latency_ms)
}
