//! Inbound session events and outbound client commands

use serde::{Deserialize, Serialize};

/// A single model-issued tool invocation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// An encoded audio chunk from the response stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunk {
    /// Base64-encoded 16-bit little-endian PCM
    pub data: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// A base64-encoded PCM frame ready to send on the realtime input channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeAudioFrame {
    pub data: String,
    pub mime_type: String,
}

/// Events emitted by the remote session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The session acknowledged the setup and is ready for audio
    Opened,

    /// Incremental transcription of the user's speech
    InputTranscription { text: String },

    /// Incremental transcription of the model's spoken response
    OutputTranscription { text: String },

    /// A batch of tool-call requests attached to one inbound message
    ToolCall { requests: Vec<ToolCallRequest> },

    /// The model finished its turn
    TurnComplete,

    /// A chunk of response audio to schedule for playback
    Audio(AudioChunk),

    /// The user began speaking over the model's response
    Interrupted,

    /// The session failed remotely
    SessionError { message: String },

    /// The session was closed remotely
    Closed { code: Option<u16>, reason: String },
}

impl ServerEvent {
    /// Check if this event terminates the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerEvent::SessionError { .. } | ServerEvent::Closed { .. }
        )
    }
}

/// Commands sent to the remote session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// A captured microphone frame
    RealtimeAudio { frame: RealtimeAudioFrame },

    /// A tool response keyed by the original request id
    ToolResponse {
        id: String,
        name: String,
        result: serde_json::Value,
    },

    /// Close the session
    Close,
}

/// The decomposed content of one composite inbound server message.
///
/// Remote services bundle several signals into a single message. The
/// signals affect the conversation log in a fixed causal order, so
/// [`ServerContent::into_events`] always emits transcription first, then
/// tool calls, then turn-complete, then audio, then interruption.
#[derive(Debug, Clone, Default)]
pub struct ServerContent {
    pub input_transcription: Option<String>,
    pub output_transcription: Option<String>,
    pub tool_requests: Vec<ToolCallRequest>,
    pub turn_complete: bool,
    pub audio: Option<AudioChunk>,
    pub interrupted: bool,
}

impl ServerContent {
    /// Decompose into granular events in the fixed relative order.
    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        if let Some(text) = self.input_transcription {
            events.push(ServerEvent::InputTranscription { text });
        }
        if let Some(text) = self.output_transcription {
            events.push(ServerEvent::OutputTranscription { text });
        }
        if !self.tool_requests.is_empty() {
            events.push(ServerEvent::ToolCall {
                requests: self.tool_requests,
            });
        }
        if self.turn_complete {
            events.push(ServerEvent::TurnComplete);
        }
        if let Some(chunk) = self.audio {
            events.push(ServerEvent::Audio(chunk));
        }
        if self.interrupted {
            events.push(ServerEvent::Interrupted);
        }
        events
    }
}
