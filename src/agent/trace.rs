//! Intermediate agent events surfaced to the UI while a run is in progress

use serde::Serialize;
use std::sync::Mutex;

/// One observable step of an agent run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Streamed model output fragment
    Token { text: String },
    /// Reasoning text preceding an action or answer
    Thought { text: String },
    ToolStart { tool: String, input: String },
    ToolEnd {
        tool: String,
        output: String,
        success: bool,
    },
    /// Malformed model output and the observation fed back for it
    ParseError { message: String, observation: String },
    Finish { output: String },
}

/// Receives agent events as they are produced
///
/// Called from inside the agent loop, so implementations must not block.
pub trait TraceSink: Send + Sync {
    fn on_event(&self, event: AgentEvent);
}

/// Discards every event
#[derive(Debug, Default)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn on_event(&self, _event: AgentEvent) {}
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<AgentEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl TraceSink for CollectingSink {
    fn on_event(&self, event: AgentEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(AgentEvent::ToolStart {
            tool: "wikipedia".into(),
            input: "Paris".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "tool_start");
        assert_eq!(json["tool"], "wikipedia");
        assert_eq!(json["input"], "Paris");
    }

    #[test]
    fn collecting_sink_keeps_order() {
        let sink = CollectingSink::new();
        sink.on_event(AgentEvent::Token { text: "a".into() });
        sink.on_event(AgentEvent::Finish {
            output: "done".into(),
        });
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AgentEvent::Token { .. }));
        assert!(matches!(events[1], AgentEvent::Finish { .. }));
    }
}
