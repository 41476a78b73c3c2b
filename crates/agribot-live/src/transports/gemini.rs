//! Gemini Live websocket transport
//!
//! Speaks the `BidiGenerateContent` bidirectional protocol: one setup frame
//! at open, then realtime audio / tool responses outbound and composite
//! `serverContent` / `toolCall` frames inbound. Inbound frames are mapped to
//! granular [`ServerEvent`]s; the reader and writer run as independent
//! tokio tasks so neither side can block the other.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{Error, Result};
use crate::events::{AudioChunk, ClientCommand, ServerContent, ServerEvent, ToolCallRequest};
use crate::pcm::OUTPUT_SAMPLE_RATE;
use crate::session::{LiveSession, LiveTransport, SessionConfig};

const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Transport for Google's Gemini Live API
pub struct GeminiLiveTransport {
    api_key: String,
    endpoint: String,
}

impl GeminiLiveTransport {
    /// Create a new transport with an explicit API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Create a transport with the API key from `GEMINI_API_KEY`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| Error::InvalidApiKey)?;
        if api_key.is_empty() {
            return Err(Error::InvalidApiKey);
        }
        Ok(Self::new(api_key))
    }

    /// Override the websocket endpoint (for testing against a local server)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl LiveTransport for GeminiLiveTransport {
    async fn connect(&self, config: &SessionConfig) -> Result<LiveSession> {
        if self.api_key.is_empty() {
            return Err(Error::InvalidApiKey);
        }

        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        let setup = serde_json::to_string(&SetupFrame::from_config(config))?;
        ws_tx
            .send(Message::Text(setup))
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<ClientCommand>();

        // Writer: drains the command channel until Close or socket failure.
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                match command {
                    ClientCommand::Close => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    other => {
                        let frame = match command_frame(&other) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!("failed to encode outbound frame: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = ws_tx.send(Message::Text(frame)).await {
                            tracing::warn!("websocket send failed: {e}");
                            break;
                        }
                    }
                }
            }
        });

        // Reader: maps inbound frames to events until close or error.
        tokio::spawn(async move {
            while let Some(message) = ws_rx.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if !forward_frame(text.as_bytes(), &event_tx).await {
                            break;
                        }
                    }
                    Ok(Message::Binary(bytes)) => {
                        if !forward_frame(&bytes, &event_tx).await {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = match frame {
                            Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                            None => (None, String::new()),
                        };
                        let _ = event_tx.send(ServerEvent::Closed { code, reason }).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = event_tx
                            .send(ServerEvent::SessionError {
                                message: e.to_string(),
                            })
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(LiveSession::new(event_rx, command_tx))
    }
}

/// Forward all events of one inbound frame. Returns `false` when the
/// session side has gone away.
async fn forward_frame(bytes: &[u8], event_tx: &mpsc::Sender<ServerEvent>) -> bool {
    for event in map_frame(bytes) {
        if event_tx.send(event).await.is_err() {
            return false;
        }
    }
    true
}

/// Map one raw inbound frame to granular events.
///
/// Unparseable frames are logged and skipped; a malformed message must not
/// take the session down.
fn map_frame(bytes: &[u8]) -> Vec<ServerEvent> {
    let frame: ServerFrame = match serde_json::from_slice(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("skipping unparseable server frame: {e}");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    if frame.setup_complete.is_some() {
        events.push(ServerEvent::Opened);
    }

    let mut content = ServerContent::default();
    if let Some(tool_call) = frame.tool_call {
        content.tool_requests = tool_call
            .function_calls
            .into_iter()
            .map(|call| ToolCallRequest {
                id: call.id.unwrap_or_default(),
                name: call.name,
                args: call.args.unwrap_or(serde_json::Value::Null),
            })
            .collect();
    }
    if let Some(server_content) = frame.server_content {
        content.input_transcription = server_content.input_transcription.and_then(|t| t.text);
        content.output_transcription = server_content.output_transcription.and_then(|t| t.text);
        content.turn_complete = server_content.turn_complete;
        content.interrupted = server_content.interrupted;
        content.audio = server_content
            .model_turn
            .into_iter()
            .flat_map(|turn| turn.parts)
            .filter_map(|part| part.inline_data)
            .find(|data| data.mime_type.starts_with("audio/pcm"))
            .map(|data| AudioChunk {
                sample_rate: parse_pcm_rate(&data.mime_type),
                channels: 1,
                data: data.data,
            });
    }
    events.extend(content.into_events());

    if frame.go_away.is_some() {
        events.push(ServerEvent::Closed {
            code: None,
            reason: "server requested disconnect".into(),
        });
    }
    events
}

/// Extract the sample rate from a mime type like `audio/pcm;rate=24000`.
fn parse_pcm_rate(mime_type: &str) -> u32 {
    mime_type
        .split(';')
        .filter_map(|part| part.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
        .unwrap_or(OUTPUT_SAMPLE_RATE)
}

/// Encode an outbound command as a wire frame.
fn command_frame(command: &ClientCommand) -> Result<String> {
    let value = match command {
        ClientCommand::RealtimeAudio { frame } => serde_json::json!({
            "realtimeInput": {
                "mediaChunks": [{ "mimeType": frame.mime_type, "data": frame.data }]
            }
        }),
        ClientCommand::ToolResponse { id, name, result } => serde_json::json!({
            "toolResponse": {
                "functionResponses": [{
                    "id": id,
                    "name": name,
                    "response": { "result": result }
                }]
            }
        }),
        ClientCommand::Close => return Err(Error::Closed),
    };
    Ok(value.to_string())
}

// ---- Wire shapes ----

#[derive(Debug, Serialize)]
struct SetupFrame {
    setup: SetupPayload,
}

impl SetupFrame {
    fn from_config(config: &SessionConfig) -> Self {
        Self {
            setup: SetupPayload {
                model: config.model.clone(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".into()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: config.voice.clone(),
                            },
                        },
                    },
                },
                system_instruction: ContentPayload {
                    parts: vec![TextPart {
                        text: config.system_instruction.clone(),
                    }],
                },
                tools: vec![ToolsEntry {
                    function_declarations: config
                        .tools
                        .iter()
                        .map(|tool| FunctionDeclaration {
                            name: tool.name.clone(),
                            description: tool.description.clone(),
                            parameters: tool.parameters.clone(),
                        })
                        .collect(),
                }],
                input_audio_transcription: serde_json::json!({}),
                output_audio_transcription: serde_json::json!({}),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupPayload {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: ContentPayload,
    tools: Vec<ToolsEntry>,
    input_audio_transcription: serde_json::Value,
    output_audio_transcription: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Serialize)]
struct ContentPayload {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolsEntry {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerFrame {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<RawServerContent>,
    tool_call: Option<RawToolCall>,
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    model_turn: Option<RawModelTurn>,
    input_transcription: Option<RawTranscription>,
    output_transcription: Option<RawTranscription>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Deserialize)]
struct RawModelTurn {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    inline_data: Option<RawInlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct RawTranscription {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawToolCall {
    #[serde(default)]
    function_calls: Vec<RawFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct RawFunctionCall {
    id: Option<String>,
    name: String,
    args: Option<serde_json::Value>,
}
