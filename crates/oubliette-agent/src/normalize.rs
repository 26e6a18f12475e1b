//! Backend event normalization.
//!
//! Reduces the SSE backend's wire events to [`StreamEventKind`] under four
//! rules:
//!
//! 1. Transport noise (keepalives, bare metadata updates) is dropped.
//! 2. Deltas win: when the backend streams `text.delta` chunks and later
//!    emits the consolidated `message.completed` for the same message ID,
//!    the consolidated copy is suppressed.
//! 3. Every backend "turn over" signal (`turn.completed`, `session.idle`)
//!    collapses to exactly one `completion` per turn.
//! 4. Tool call and tool result stay separate events, correlated by the
//!    backend's call ID.
//!
//! Normalization is pure state-machine: the same input sequence always
//! yields the same output sequence.

use std::collections::HashSet;

use serde_json::Value;

use oubliette_core::events::{Role, StreamEventKind};

use crate::contract::AgentEvent;

/// Stateful normalizer; one per executor run.
#[derive(Debug, Default)]
pub struct Normalizer {
    /// Message IDs that streamed deltas; their consolidated copies are
    /// suppressed.
    delta_messages: HashSet<String>,
    /// Whether anything happened since the last `completion`.
    turn_active: bool,
}

impl Normalizer {
    /// Create a fresh normalizer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one raw backend event into zero or one [`AgentEvent`]s.
    pub fn push(&mut self, raw: &Value) -> Option<AgentEvent> {
        let event_type = raw.get("type")?.as_str()?;
        match event_type {
            "text.delta" => {
                let text = str_field(raw, "text")?;
                if let Some(message_id) = raw.get("messageID").and_then(Value::as_str) {
                    let _ = self.delta_messages.insert(message_id.to_owned());
                }
                self.turn_active = true;
                Some(AgentEvent {
                    kind: StreamEventKind::Delta {
                        text: text.to_owned(),
                    },
                    raw: raw.clone(),
                })
            }
            "message.completed" => {
                let text = str_field(raw, "text")?;
                // Duplicate of a streamed message: deltas already carried it.
                if let Some(message_id) = raw.get("messageID").and_then(Value::as_str) {
                    if self.delta_messages.contains(message_id) {
                        return None;
                    }
                }
                let role = match raw.get("role").and_then(Value::as_str) {
                    Some("user") => Role::User,
                    _ => Role::Assistant,
                };
                self.turn_active = true;
                Some(AgentEvent {
                    kind: StreamEventKind::Message {
                        role,
                        text: text.to_owned(),
                    },
                    raw: raw.clone(),
                })
            }
            "tool.started" => {
                let invocation_id = str_field(raw, "callID")?;
                let tool = str_field(raw, "tool")?;
                self.turn_active = true;
                Some(AgentEvent {
                    kind: StreamEventKind::ToolCall {
                        invocation_id: invocation_id.to_owned(),
                        tool: tool.to_owned(),
                        args: raw.get("args").cloned().unwrap_or(Value::Null),
                    },
                    raw: raw.clone(),
                })
            }
            "tool.completed" => {
                let invocation_id = str_field(raw, "callID")?;
                let tool = str_field(raw, "tool")?;
                self.turn_active = true;
                Some(AgentEvent {
                    kind: StreamEventKind::ToolResult {
                        invocation_id: invocation_id.to_owned(),
                        tool: tool.to_owned(),
                        result: raw.get("result").cloned().unwrap_or(Value::Null),
                        is_error: raw
                            .get("isError")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    },
                    raw: raw.clone(),
                })
            }
            "turn.completed" | "session.idle" => {
                // Collapse to one completion per turn; a bare idle after a
                // completed turn is noise.
                if !self.turn_active {
                    return None;
                }
                self.turn_active = false;
                Some(AgentEvent {
                    kind: StreamEventKind::Completion {
                        stop_reason: raw
                            .get("stopReason")
                            .and_then(Value::as_str)
                            .map(str::to_owned),
                    },
                    raw: raw.clone(),
                })
            }
            "session.error" => {
                let message = raw
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("backend error")
                    .to_owned();
                Some(AgentEvent {
                    kind: StreamEventKind::Error { message },
                    raw: raw.clone(),
                })
            }
            "session.cancelled" => {
                self.turn_active = false;
                Some(AgentEvent {
                    kind: StreamEventKind::System {
                        subtype: "cancelled".to_owned(),
                        text: None,
                    },
                    raw: raw.clone(),
                })
            }
            // Keepalives, connection chatter, bare metadata updates.
            _ => None,
        }
    }
}

fn str_field<'a>(raw: &'a Value, field: &str) -> Option<&'a str> {
    raw.get(field).and_then(Value::as_str)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(events: &[Value]) -> Vec<AgentEvent> {
        let mut norm = Normalizer::new();
        events.iter().filter_map(|e| norm.push(e)).collect()
    }

    #[test]
    fn keepalives_dropped() {
        let out = run(&[
            json!({"type": "server.keepalive"}),
            json!({"type": "server.connected"}),
            json!({"type": "session.updated", "sessionID": "rt-1"}),
        ]);
        assert!(out.is_empty());
    }

    #[test]
    fn deltas_pass_through() {
        let out = run(&[
            json!({"type": "text.delta", "messageID": "m1", "text": "hel"}),
            json!({"type": "text.delta", "messageID": "m1", "text": "lo"}),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].kind, StreamEventKind::Delta { text: "hel".into() });
    }

    #[test]
    fn consolidated_duplicate_suppressed_after_deltas() {
        let out = run(&[
            json!({"type": "text.delta", "messageID": "m1", "text": "hello"}),
            json!({"type": "message.completed", "messageID": "m1", "role": "assistant", "text": "hello"}),
        ]);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].kind, StreamEventKind::Delta { .. }));
    }

    #[test]
    fn consolidated_message_kept_without_deltas() {
        let out = run(&[json!({
            "type": "message.completed", "messageID": "m2", "role": "assistant", "text": "short answer"
        })]);
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].kind,
            StreamEventKind::Message {
                role: Role::Assistant,
                text: "short answer".into()
            }
        );
    }

    #[test]
    fn user_role_preserved() {
        let out = run(&[json!({
            "type": "message.completed", "messageID": "m3", "role": "user", "text": "hi"
        })]);
        assert_eq!(
            out[0].kind,
            StreamEventKind::Message {
                role: Role::User,
                text: "hi".into()
            }
        );
    }

    #[test]
    fn one_completion_per_turn() {
        let out = run(&[
            json!({"type": "text.delta", "messageID": "m1", "text": "x"}),
            json!({"type": "turn.completed", "stopReason": "end_turn"}),
            json!({"type": "session.idle"}),
            json!({"type": "session.idle"}),
        ]);
        let completions: Vec<_> = out
            .iter()
            .filter(|e| matches!(e.kind, StreamEventKind::Completion { .. }))
            .collect();
        assert_eq!(completions.len(), 1);
        assert_eq!(
            completions[0].kind,
            StreamEventKind::Completion {
                stop_reason: Some("end_turn".into())
            }
        );
    }

    #[test]
    fn completion_resumes_after_new_activity() {
        let out = run(&[
            json!({"type": "text.delta", "messageID": "m1", "text": "x"}),
            json!({"type": "session.idle"}),
            json!({"type": "text.delta", "messageID": "m2", "text": "y"}),
            json!({"type": "session.idle"}),
        ]);
        let completions = out
            .iter()
            .filter(|e| matches!(e.kind, StreamEventKind::Completion { .. }))
            .count();
        assert_eq!(completions, 2);
    }

    #[test]
    fn idle_before_any_activity_dropped() {
        let out = run(&[json!({"type": "session.idle"})]);
        assert!(out.is_empty());
    }

    #[test]
    fn tool_pair_correlated() {
        let out = run(&[
            json!({"type": "tool.started", "callID": "c1", "tool": "bash", "args": {"cmd": "ls"}}),
            json!({"type": "tool.completed", "callID": "c1", "tool": "bash", "result": "ok", "isError": false}),
        ]);
        assert_eq!(out.len(), 2);
        let StreamEventKind::ToolCall { invocation_id, args, .. } = &out[0].kind else {
            panic!("expected tool_call");
        };
        assert_eq!(invocation_id, "c1");
        assert_eq!(args["cmd"], "ls");
        let StreamEventKind::ToolResult { invocation_id, is_error, .. } = &out[1].kind else {
            panic!("expected tool_result");
        };
        assert_eq!(invocation_id, "c1");
        assert!(!is_error);
    }

    #[test]
    fn error_event_maps() {
        let out = run(&[json!({"type": "session.error", "error": "stream parse failure"})]);
        assert_eq!(
            out[0].kind,
            StreamEventKind::Error {
                message: "stream parse failure".into()
            }
        );
    }

    #[test]
    fn cancelled_maps_to_system() {
        let out = run(&[json!({"type": "session.cancelled"})]);
        assert_eq!(
            out[0].kind,
            StreamEventKind::System {
                subtype: "cancelled".into(),
                text: None
            }
        );
    }

    #[test]
    fn raw_payload_preserved() {
        let raw = json!({"type": "text.delta", "messageID": "m1", "text": "x", "extra": {"a": 1}});
        let out = run(std::slice::from_ref(&raw));
        assert_eq!(out[0].raw, raw);
    }

    #[test]
    fn normalization_is_deterministic() {
        // The same raw stream, fed twice through fresh normalizers, yields
        // byte-identical output.
        let stream = vec![
            json!({"type": "server.keepalive"}),
            json!({"type": "text.delta", "messageID": "m1", "text": "a"}),
            json!({"type": "message.completed", "messageID": "m1", "role": "assistant", "text": "a"}),
            json!({"type": "tool.started", "callID": "c1", "tool": "bash", "args": {}}),
            json!({"type": "tool.completed", "callID": "c1", "tool": "bash", "result": null, "isError": true}),
            json!({"type": "turn.completed"}),
            json!({"type": "session.idle"}),
        ];
        let first = run(&stream);
        let second = run(&stream);
        assert_eq!(first, second);
        let first_json: Vec<String> = first
            .iter()
            .map(|e| serde_json::to_string(&e.kind).unwrap())
            .collect();
        let second_json: Vec<String> = second
            .iter()
            .map(|e| serde_json::to_string(&e.kind).unwrap())
            .collect();
        assert_eq!(first_json, second_json);
    }
}
