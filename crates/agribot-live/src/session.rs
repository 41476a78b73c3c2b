//! Transport abstraction for live sessions

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::events::{ClientCommand, ServerEvent};

/// A tool made available to the model, described for the setup message
#[derive(Debug, Clone)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments
    pub parameters: serde_json::Value,
}

/// Configuration for opening a live session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Model identifier
    pub model: String,
    /// System instruction sent at setup
    pub system_instruction: String,
    /// Prebuilt voice name for spoken responses
    pub voice: String,
    /// Tools declared to the model
    pub tools: Vec<ToolDeclaration>,
}

impl SessionConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_instruction: String::new(),
            voice: String::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDeclaration>) -> Self {
        self.tools = tools;
        self
    }
}

/// An open live session: an inbound event stream plus an outbound
/// command channel.
///
/// Commands are fire-and-forget; transport failures surface on the event
/// stream, never to the sender.
pub struct LiveSession {
    events: mpsc::Receiver<ServerEvent>,
    commands: mpsc::UnboundedSender<ClientCommand>,
}

impl LiveSession {
    pub fn new(
        events: mpsc::Receiver<ServerEvent>,
        commands: mpsc::UnboundedSender<ClientCommand>,
    ) -> Self {
        Self { events, commands }
    }

    /// Receive the next inbound event. Returns `None` when the transport
    /// has shut down.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Send a command to the remote session. Returns `false` if the
    /// transport is gone.
    pub fn send(&self, command: ClientCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Get a cloneable sender for the outbound command channel.
    pub fn command_sender(&self) -> mpsc::UnboundedSender<ClientCommand> {
        self.commands.clone()
    }

    /// Request a clean close of the remote session.
    pub fn close(&self) {
        let _ = self.commands.send(ClientCommand::Close);
    }
}

/// Transport for opening live bidirectional sessions
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Open a session with the remote service.
    async fn connect(&self, config: &SessionConfig) -> Result<LiveSession>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_send_and_receive() {
        let (event_tx, event_rx) = mpsc::channel(8);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let mut session = LiveSession::new(event_rx, command_tx);

        event_tx.send(ServerEvent::Opened).await.unwrap();
        assert!(matches!(session.next_event().await, Some(ServerEvent::Opened)));

        assert!(session.send(ClientCommand::Close));
        assert!(matches!(command_rx.recv().await, Some(ClientCommand::Close)));
    }

    #[tokio::test]
    async fn test_send_after_transport_gone() {
        let (_event_tx, event_rx) = mpsc::channel(1);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let session = LiveSession::new(event_rx, command_tx);

        drop(command_rx);
        assert!(!session.send(ClientCommand::Close));
    }
}
