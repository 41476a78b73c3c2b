//! Events emitted to the presentation layer

use agribot_live::{ConnectionState, Turn};
use serde::{Deserialize, Serialize};

/// Events emitted during a conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantEvent {
    /// The connection state changed
    StateChanged { state: ConnectionState },

    /// The conversation log changed; carries a full snapshot
    LogUpdated { turns: Vec<Turn> },

    /// A tool invocation started
    ToolCallStart {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// A tool invocation finished
    ToolCallEnd { id: String, name: String, ok: bool },

    /// A non-fatal, advisory condition
    Warning { message: String },

    /// A fatal error; the session has been torn down
    Error { message: String },
}

impl AssistantEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssistantEvent::Error { .. })
    }
}
