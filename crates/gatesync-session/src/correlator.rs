use std::collections::HashMap;

use crate::message::Message;

/// Maps in-flight `toolCallId`s to the id of their placeholder message.
#[derive(Debug, Clone, Default)]
pub struct ToolCallCorrelator {
    placeholders: HashMap<String, String>,
}

impl ToolCallCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-registering a call id points it at the new message.
    pub fn register_placeholder(
        &mut self,
        tool_call_id: impl Into<String>,
        message_id: impl Into<String>,
    ) {
        self.placeholders
            .insert(tool_call_id.into(), message_id.into());
    }

    pub fn resolve(&self, tool_call_id: &str) -> Option<&str> {
        self.placeholders.get(tool_call_id).map(String::as_str)
    }

    pub fn contains(&self, tool_call_id: &str) -> bool {
        self.placeholders.contains_key(tool_call_id)
    }

    pub fn clear(&mut self) {
        self.placeholders.clear();
    }

    pub fn len(&self) -> usize {
        self.placeholders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placeholders.is_empty()
    }

    /// Replaces the table with the tool messages found in `messages`.
    pub fn rebuild_from(&mut self, messages: &[Message]) {
        self.placeholders.clear();
        for message in messages {
            if let Some(meta) = message.tool_meta() {
                self.placeholders
                    .insert(meta.tool_call_id.clone(), message.id.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatesync_core::protocol::{Role, ToolInvocation};

    fn placeholder(call_id: &str) -> Message {
        Message::tool_placeholder(&ToolInvocation {
            tool_call_id: call_id.to_string(),
            tool_name: "search".to_string(),
            reason: None,
            input: None,
        })
    }

    #[test]
    fn test_register_and_resolve() {
        let mut correlator = ToolCallCorrelator::new();
        assert!(correlator.is_empty());

        correlator.register_placeholder("t1", "msg_a");
        assert_eq!(correlator.resolve("t1"), Some("msg_a"));
        assert_eq!(correlator.resolve("t2"), None);
        assert_eq!(correlator.len(), 1);
    }

    #[test]
    fn test_reregistration_overwrites() {
        let mut correlator = ToolCallCorrelator::new();
        correlator.register_placeholder("t1", "msg_a");
        correlator.register_placeholder("t1", "msg_b");
        assert_eq!(correlator.resolve("t1"), Some("msg_b"));
        assert_eq!(correlator.len(), 1);
    }

    #[test]
    fn test_clear_empties_table() {
        let mut correlator = ToolCallCorrelator::new();
        correlator.register_placeholder("t1", "msg_a");
        correlator.clear();
        assert!(correlator.is_empty());
        assert!(!correlator.contains("t1"));
    }

    #[test]
    fn test_rebuild_from_only_tracks_tool_messages() {
        let tool = placeholder("t9");
        let messages = vec![Message::new(Role::User, "hi"), tool.clone()];

        let mut correlator = ToolCallCorrelator::new();
        correlator.register_placeholder("stale", "msg_gone");
        correlator.rebuild_from(&messages);

        assert_eq!(correlator.len(), 1);
        assert_eq!(correlator.resolve("t9"), Some(tool.id.as_str()));
        assert_eq!(correlator.resolve("stale"), None);
    }
}
