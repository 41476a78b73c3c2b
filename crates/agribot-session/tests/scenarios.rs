//! End-to-end session scenarios against a scripted transport.
//!
//! The transport here is driven by the test: events pushed on a channel
//! arrive at the assistant exactly as a remote service's would, and every
//! outbound command is recorded for inspection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use agribot_live::events::{AudioChunk, ClientCommand, ServerEvent, ToolCallRequest};
use agribot_live::{
    ConnectionState, LiveSession, LiveTransport, Role, SessionConfig, SkyCondition, ToolPayload,
    WeatherData,
};
use agribot_session::device::{NullCapture, NullSink};
use agribot_session::{
    Assistant, AssistantConfig, AssistantEvent, BoxedDataTool, DataTool, ProviderError, ToolContext,
};

/// A transport whose inbound events are pushed by the test
struct ScriptedTransport {
    script: Mutex<Option<mpsc::UnboundedReceiver<ServerEvent>>>,
    sent: Arc<Mutex<Vec<ClientCommand>>>,
    connect_error: Option<agribot_live::Error>,
}

#[async_trait]
impl LiveTransport for ScriptedTransport {
    async fn connect(&self, _config: &SessionConfig) -> agribot_live::Result<LiveSession> {
        if let Some(error) = &self.connect_error {
            return Err(match error {
                agribot_live::Error::InvalidApiKey => agribot_live::Error::InvalidApiKey,
                other => agribot_live::Error::Connect(other.to_string()),
            });
        }
        let mut script = self
            .script
            .lock()
            .take()
            .expect("transport connected twice");
        let (event_tx, event_rx) = mpsc::channel(64);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(event) = script.recv().await {
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        let sent = self.sent.clone();
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                sent.lock().push(command);
            }
        });

        Ok(LiveSession::new(event_rx, command_tx))
    }
}

struct Harness {
    assistant: Assistant,
    events: broadcast::Receiver<AssistantEvent>,
    push: mpsc::UnboundedSender<ServerEvent>,
    sent: Arc<Mutex<Vec<ClientCommand>>>,
}

async fn start_session(tools: Vec<BoxedDataTool>) -> Harness {
    let (push, script_rx) = mpsc::unbounded_channel();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let transport = ScriptedTransport {
        script: Mutex::new(Some(script_rx)),
        sent: sent.clone(),
        connect_error: None,
    };
    let assistant = Assistant::new(
        Arc::new(transport),
        Arc::new(NullCapture),
        Box::new(NullSink::new()),
        tools,
        AssistantConfig::default(),
    );
    let events = assistant.subscribe();
    assistant.start().await.expect("start failed");
    Harness {
        assistant,
        events,
        push,
        sent,
    }
}

async fn wait_for(
    events: &mut broadcast::Receiver<AssistantEvent>,
    pred: impl Fn(&AssistantEvent) -> bool,
) -> AssistantEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn wait_for_command(
    sent: &Arc<Mutex<Vec<ClientCommand>>>,
    pred: impl Fn(&ClientCommand) -> bool,
) -> ClientCommand {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(command) = sent.lock().iter().find(|c| pred(c)) {
                return command.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for command")
}

fn short_chunk() -> AudioChunk {
    // 0.1 s of silence at 24 kHz mono
    AudioChunk {
        data: BASE64.encode(vec![0u8; 4_800]),
        sample_rate: 24_000,
        channels: 1,
    }
}

struct StubWeatherTool;

#[async_trait]
impl DataTool for StubWeatherTool {
    fn name(&self) -> &str {
        "getWeatherForecast"
    }
    fn description(&self) -> &str {
        "Get the weather forecast for a location"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"location": {"type": "string"}}})
    }
    async fn call(
        &self,
        arguments: serde_json::Value,
        _context: ToolContext,
        _cancel: CancellationToken,
    ) -> Result<ToolPayload, ProviderError> {
        let location = arguments["location"].as_str().unwrap_or("Nashik");
        Ok(ToolPayload::Weather(WeatherData {
            location: location.to_string(),
            temperature: "22°C".into(),
            condition: SkyCondition::Sunny,
            forecast: vec![],
        }))
    }
}

#[tokio::test]
async fn conversation_assembles_alternating_turns() {
    let mut h = start_session(vec![]).await;
    assert_eq!(h.assistant.connection_state(), ConnectionState::Connected);

    h.push
        .send(ServerEvent::InputTranscription {
            text: "what's the weather".into(),
        })
        .unwrap();
    h.push
        .send(ServerEvent::OutputTranscription {
            text: "It will ".into(),
        })
        .unwrap();
    h.push
        .send(ServerEvent::OutputTranscription {
            text: "be sunny".into(),
        })
        .unwrap();
    h.push.send(ServerEvent::TurnComplete).unwrap();

    wait_for(&mut h.events, |e| {
        matches!(e, AssistantEvent::LogUpdated { turns }
            if turns.len() == 2 && turns.iter().all(|t| t.is_final))
    })
    .await;

    let turns = h.assistant.conversation();
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[0].text.as_deref(), Some("what's the weather"));
    assert_eq!(turns[1].role, Role::Model);
    assert_eq!(turns[1].text.as_deref(), Some("It will be sunny"));

    h.assistant.stop();
    assert_eq!(h.assistant.connection_state(), ConnectionState::Idle);
}

#[tokio::test]
async fn tool_call_round_trip() {
    let mut h = start_session(vec![Arc::new(StubWeatherTool) as BoxedDataTool]).await;

    h.push
        .send(ServerEvent::ToolCall {
            requests: vec![ToolCallRequest {
                id: "call-1".into(),
                name: "getWeatherForecast".into(),
                args: serde_json::json!({"location": "Pune"}),
            }],
        })
        .unwrap();

    wait_for(&mut h.events, |e| {
        matches!(e, AssistantEvent::ToolCallEnd { id, ok: true, .. } if id == "call-1")
    })
    .await;

    // The response went back keyed by the original request id.
    let command = wait_for_command(&h.sent, |c| {
        matches!(c, ClientCommand::ToolResponse { id, .. } if id == "call-1")
    })
    .await;
    match command {
        ClientCommand::ToolResponse { name, result, .. } => {
            assert_eq!(name, "getWeatherForecast");
            assert_eq!(result["location"], "Pune");
        }
        other => panic!("unexpected command {other:?}"),
    }

    // The payload landed in the log as a final model turn.
    wait_for(&mut h.events, |e| {
        matches!(e, AssistantEvent::LogUpdated { turns }
            if turns.last().is_some_and(|t| t.weather.is_some() && t.is_final))
    })
    .await;

    h.assistant.stop();
}

#[tokio::test]
async fn failed_tool_surfaces_warning_not_error() {
    // No tools registered, so the request cannot be resolved.
    let mut h = start_session(vec![]).await;

    h.push
        .send(ServerEvent::ToolCall {
            requests: vec![ToolCallRequest {
                id: "call-9".into(),
                name: "getWeatherForecast".into(),
                args: serde_json::json!({}),
            }],
        })
        .unwrap();

    wait_for(&mut h.events, |e| {
        matches!(e, AssistantEvent::ToolCallEnd { ok: false, .. })
    })
    .await;
    wait_for(&mut h.events, |e| {
        matches!(e, AssistantEvent::Warning { .. })
    })
    .await;

    // The session stays healthy.
    assert_eq!(h.assistant.connection_state(), ConnectionState::Connected);
    h.assistant.stop();
}

#[tokio::test]
async fn interruption_resets_playback_but_keeps_transcript() {
    let mut h = start_session(vec![]).await;

    h.push.send(ServerEvent::Audio(short_chunk())).unwrap();
    h.push
        .send(ServerEvent::OutputTranscription {
            text: "As I was say".into(),
        })
        .unwrap();
    wait_for(&mut h.events, |e| {
        matches!(e, AssistantEvent::LogUpdated { turns } if turns.len() == 1)
    })
    .await;
    assert!(h.assistant.playback_cursor() > 0.0);

    h.push.send(ServerEvent::Interrupted).unwrap();
    h.push
        .send(ServerEvent::InputTranscription {
            text: "stop".into(),
        })
        .unwrap();
    wait_for(&mut h.events, |e| {
        matches!(e, AssistantEvent::LogUpdated { turns } if turns.len() == 2)
    })
    .await;

    assert_eq!(h.assistant.playback_cursor(), 0.0);
    assert_eq!(h.assistant.scheduled_voices(), 0);
    let turns = h.assistant.conversation();
    assert_eq!(turns[0].text.as_deref(), Some("As I was say"));
    assert_eq!(turns[1].text.as_deref(), Some("stop"));

    h.assistant.stop();
}

#[tokio::test]
async fn remote_error_tears_down_and_finalizes_log() {
    let mut h = start_session(vec![]).await;

    h.push
        .send(ServerEvent::InputTranscription {
            text: "half an utter".into(),
        })
        .unwrap();
    h.push
        .send(ServerEvent::SessionError {
            message: "quota exceeded".into(),
        })
        .unwrap();

    wait_for(&mut h.events, |e| {
        matches!(
            e,
            AssistantEvent::StateChanged {
                state: ConnectionState::Error
            }
        )
    })
    .await;

    assert_eq!(h.assistant.connection_state(), ConnectionState::Error);
    assert_eq!(h.assistant.last_error().as_deref(), Some("quota exceeded"));
    assert!(h.assistant.conversation().iter().all(|t| t.is_final));
}

#[tokio::test]
async fn remote_close_lands_in_disconnected() {
    let mut h = start_session(vec![]).await;

    h.push
        .send(ServerEvent::Closed {
            code: Some(1000),
            reason: "bye".into(),
        })
        .unwrap();

    wait_for(&mut h.events, |e| {
        matches!(
            e,
            AssistantEvent::StateChanged {
                state: ConnectionState::Disconnected
            }
        )
    })
    .await;
    assert!(h.assistant.last_error().is_none());
}

#[tokio::test]
async fn stop_is_immediate_and_idempotent() {
    let mut h = start_session(vec![]).await;

    h.push.send(ServerEvent::Audio(short_chunk())).unwrap();
    h.push
        .send(ServerEvent::InputTranscription {
            text: "half a question".into(),
        })
        .unwrap();
    wait_for(&mut h.events, |e| {
        matches!(e, AssistantEvent::LogUpdated { turns } if turns.len() == 1)
    })
    .await;

    h.assistant.stop();

    // Post-conditions hold as soon as stop returns.
    assert_eq!(h.assistant.connection_state(), ConnectionState::Idle);
    assert_eq!(h.assistant.playback_cursor(), 0.0);
    assert_eq!(h.assistant.scheduled_voices(), 0);
    assert!(h.assistant.conversation().iter().all(|t| t.is_final));

    wait_for_command(&h.sent, |c| matches!(c, ClientCommand::Close)).await;

    // A second stop changes nothing.
    h.assistant.stop();
    assert_eq!(h.assistant.connection_state(), ConnectionState::Idle);
}

#[tokio::test]
async fn stop_discards_buffered_events() {
    // A transcription the driver has already pulled off the socket can
    // race stop(); it must never reopen the log after stop finalized it.
    // Run many rounds so the interleaving actually gets hit.
    for _ in 0..200 {
        let h = start_session(vec![]).await;
        h.push
            .send(ServerEvent::InputTranscription {
                text: "half an utter".into(),
            })
            .unwrap();
        h.assistant.stop();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(h.assistant.connection_state(), ConnectionState::Idle);
        let turns = h.assistant.conversation();
        assert!(
            turns.iter().all(|t| t.is_final),
            "log reopened after stop: {turns:?}"
        );
    }
}

/// A tool that records the context it was called with
struct ContextEchoTool {
    seen_district: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl DataTool for ContextEchoTool {
    fn name(&self) -> &str {
        "getWeatherForecast"
    }
    fn description(&self) -> &str {
        "weather"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn call(
        &self,
        _arguments: serde_json::Value,
        context: ToolContext,
        _cancel: CancellationToken,
    ) -> Result<ToolPayload, ProviderError> {
        *self.seen_district.lock() = context.district;
        Ok(ToolPayload::Weather(WeatherData {
            location: "Nashik".into(),
            temperature: "22°C".into(),
            condition: SkyCondition::Sunny,
            forecast: vec![],
        }))
    }
}

#[tokio::test]
async fn configured_district_reaches_tool_calls() {
    let (push, script_rx) = mpsc::unbounded_channel();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let transport = ScriptedTransport {
        script: Mutex::new(Some(script_rx)),
        sent: sent.clone(),
        connect_error: None,
    };
    let seen_district = Arc::new(Mutex::new(None));
    let assistant = Assistant::new(
        Arc::new(transport),
        Arc::new(NullCapture),
        Box::new(NullSink::new()),
        vec![Arc::new(ContextEchoTool {
            seen_district: seen_district.clone(),
        }) as BoxedDataTool],
        AssistantConfig::default(),
    )
    .with_default_district("Nashik");
    let mut events = assistant.subscribe();
    assistant.start().await.expect("start failed");

    push.send(ServerEvent::ToolCall {
        requests: vec![ToolCallRequest {
            id: "d-1".into(),
            name: "getWeatherForecast".into(),
            args: serde_json::json!({}),
        }],
    })
    .unwrap();

    wait_for(&mut events, |e| {
        matches!(e, AssistantEvent::ToolCallEnd { ok: true, .. })
    })
    .await;
    assert_eq!(seen_district.lock().as_deref(), Some("Nashik"));

    assistant.stop();
}

#[tokio::test]
async fn start_while_connected_is_rejected() {
    let h = start_session(vec![]).await;
    let err = h.assistant.start().await.unwrap_err();
    assert!(matches!(
        err,
        agribot_session::Error::InvalidState {
            state: ConnectionState::Connected
        }
    ));
    h.assistant.stop();
}

#[tokio::test]
async fn missing_credential_fails_start() {
    let transport = ScriptedTransport {
        script: Mutex::new(None),
        sent: Arc::new(Mutex::new(Vec::new())),
        connect_error: Some(agribot_live::Error::InvalidApiKey),
    };
    let assistant = Assistant::new(
        Arc::new(transport),
        Arc::new(NullCapture),
        Box::new(NullSink::new()),
        vec![],
        AssistantConfig::default(),
    );

    let err = assistant.start().await.unwrap_err();
    assert!(matches!(err, agribot_session::Error::CredentialMissing));
    assert_eq!(assistant.connection_state(), ConnectionState::Error);
}

#[tokio::test]
async fn microphone_frames_flow_to_transport() {
    let h = start_session(vec![]).await;

    // The null capture backend emits silent frames on a timer; they must
    // arrive encoded on the outbound channel.
    let command = wait_for_command(&h.sent, |c| {
        matches!(c, ClientCommand::RealtimeAudio { .. })
    })
    .await;
    match command {
        ClientCommand::RealtimeAudio { frame } => {
            assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
            assert!(!frame.data.is_empty());
        }
        other => panic!("unexpected command {other:?}"),
    }

    h.assistant.stop();
}
