//! The conversation assistant: session lifecycle and event orchestration
//!
//! [`Assistant`] owns the whole runtime for a voice conversation: it opens
//! the live session, pumps microphone frames out, folds inbound server
//! events into the conversation log, schedules response audio, dispatches
//! tool calls, and tears everything down exactly once on stop, remote
//! close, or failure. All server and tool events pass through one driver
//! task, so log mutations are serialized.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use agribot_live::events::{ClientCommand, ServerEvent};
use agribot_live::{ConnectionState, GeoPoint, LiveSession, LiveTransport, SessionConfig, Turn};

use crate::capture::{self, AudioCapture};
use crate::dispatch::{BoxedDataTool, ToolContext, ToolDispatcher, ToolEvent};
use crate::error::{Error, Result};
use crate::events::AssistantEvent;
use crate::log::ConversationLog;
use crate::playback::{AudioSink, PlaybackScheduler};

const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
const DEFAULT_VOICE: &str = "Zephyr";

const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Agribot, a friendly and practical \
farming assistant for Indian farmers. Answer questions about crops, weather, \
irrigation, and mandi prices in simple language. When the farmer asks about \
weather or crop prices, use the available tools instead of guessing. Keep \
spoken answers short and concrete.";

/// Capacity of the broadcast channel carrying [`AssistantEvent`]s
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Tunable session parameters
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub model: String,
    pub system_instruction: String,
    pub voice: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            voice: DEFAULT_VOICE.to_string(),
        }
    }
}

/// Source of the device's current location, used as a contextual default
/// for weather lookups
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current(&self) -> std::result::Result<GeoPoint, String>;
}

/// State shared between the public handle and the driver task
struct Shared {
    state: ConnectionState,
    log: ConversationLog,
    last_error: Option<String>,
    location: Option<GeoPoint>,
}

/// Handles for the currently active session, if any
struct SessionCell {
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<ClientCommand>,
    /// Set by whichever side (stop or driver) runs teardown first
    finished: Arc<AtomicBool>,
}

/// Why the driver task is ending
enum EndReason {
    Disconnected,
    Errored(String),
}

/// The conversation assistant handle.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct Assistant {
    transport: Arc<dyn LiveTransport>,
    capture: Arc<dyn AudioCapture>,
    dispatcher: Arc<ToolDispatcher>,
    location_provider: Option<Arc<dyn LocationProvider>>,
    district: Option<String>,
    config: AssistantConfig,
    shared: Arc<Mutex<Shared>>,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    cell: Arc<Mutex<Option<SessionCell>>>,
    events: broadcast::Sender<AssistantEvent>,
}

impl Assistant {
    pub fn new(
        transport: Arc<dyn LiveTransport>,
        capture: Arc<dyn AudioCapture>,
        sink: Box<dyn AudioSink>,
        tools: Vec<BoxedDataTool>,
        config: AssistantConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            capture,
            dispatcher: Arc::new(ToolDispatcher::new(tools)),
            location_provider: None,
            district: None,
            config,
            shared: Arc::new(Mutex::new(Shared {
                state: ConnectionState::Idle,
                log: ConversationLog::new(),
                last_error: None,
                location: None,
            })),
            scheduler: Arc::new(Mutex::new(PlaybackScheduler::new(sink))),
            cell: Arc::new(Mutex::new(None)),
            events,
        }
    }

    pub fn with_location_provider(mut self, provider: Arc<dyn LocationProvider>) -> Self {
        self.location_provider = Some(provider);
        self
    }

    /// Set the home district handed to tool calls as a contextual default
    /// (e.g. for crop price lookups when the farmer names no district).
    pub fn with_default_district(mut self, district: impl Into<String>) -> Self {
        self.district = Some(district.into());
        self
    }

    /// Subscribe to session events. Late subscribers miss earlier events.
    pub fn subscribe(&self) -> broadcast::Receiver<AssistantEvent> {
        self.events.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Snapshot of the conversation log, oldest turn first
    pub fn conversation(&self) -> Vec<Turn> {
        self.shared.lock().log.snapshot()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    /// Device time at which the next response chunk would begin
    pub fn playback_cursor(&self) -> f64 {
        self.scheduler.lock().cursor()
    }

    /// Number of response buffers currently scheduled or playing
    pub fn scheduled_voices(&self) -> usize {
        self.scheduler.lock().active_voices()
    }

    /// Start a conversation session.
    ///
    /// Allowed from `Idle`, `Disconnected`, and `Error`; any previous
    /// conversation log is discarded. On failure the state lands in
    /// `Error` and the cause is also surfaced as an [`AssistantEvent`].
    pub async fn start(&self) -> Result<()> {
        {
            let mut shared = self.shared.lock();
            match shared.state {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    return Err(Error::InvalidState {
                        state: shared.state,
                    });
                }
                _ => {}
            }
            shared.state = ConnectionState::Connecting;
            shared.last_error = None;
            shared.log.clear();
        }
        self.scheduler.lock().reset();
        self.emit(AssistantEvent::StateChanged {
            state: ConnectionState::Connecting,
        });
        self.emit(AssistantEvent::LogUpdated { turns: Vec::new() });

        let session_config = SessionConfig::new(&self.config.model)
            .with_system_instruction(&self.config.system_instruction)
            .with_voice(&self.config.voice)
            .with_tools(self.dispatcher.declarations());

        let session = match self.transport.connect(&session_config).await {
            Ok(session) => session,
            Err(e) => {
                let error = match e {
                    agribot_live::Error::InvalidApiKey => Error::CredentialMissing,
                    other => Error::SessionConnect(other.to_string()),
                };
                self.fail_start(&error);
                return Err(error);
            }
        };

        let stream = match self.capture.open().await {
            Ok(stream) => stream,
            Err(e) => {
                session.close();
                let error = Error::DeviceUnavailable(e.to_string());
                self.fail_start(&error);
                return Err(error);
            }
        };

        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        let commands = session.command_sender();
        *self.cell.lock() = Some(SessionCell {
            cancel: cancel.clone(),
            commands: commands.clone(),
            finished: finished.clone(),
        });

        self.shared.lock().state = ConnectionState::Connected;
        self.emit(AssistantEvent::StateChanged {
            state: ConnectionState::Connected,
        });

        capture::spawn_pump(stream, commands.clone(), cancel.clone());
        self.spawn_locator(cancel.clone());

        let (tool_tx, tool_rx) = mpsc::unbounded_channel();
        let driver = SessionDriver {
            session,
            commands,
            tool_tx,
            tool_rx,
            dispatcher: self.dispatcher.clone(),
            district: self.district.clone(),
            shared: self.shared.clone(),
            scheduler: self.scheduler.clone(),
            cell: self.cell.clone(),
            events: self.events.clone(),
            cancel,
            finished,
        };
        tokio::spawn(driver.run());

        Ok(())
    }

    /// Stop the active session and release its resources.
    ///
    /// Idempotent. By the time this returns the state is `Idle`, all
    /// scheduled audio is halted, the playback cursor is zero, and any
    /// dangling open turn has been finalized.
    pub fn stop(&self) {
        let Some(cell) = self.cell.lock().take() else {
            return;
        };
        cell.cancel.cancel();
        let _ = cell.commands.send(ClientCommand::Close);

        if cell.finished.swap(true, Ordering::SeqCst) {
            return; // the driver already tore down
        }

        self.scheduler.lock().reset();
        let log_changed = {
            let mut shared = self.shared.lock();
            let changed = shared.log.finalize_dangling();
            shared.state = ConnectionState::Idle;
            changed.then(|| shared.log.snapshot())
        };
        if let Some(turns) = log_changed {
            self.emit(AssistantEvent::LogUpdated { turns });
        }
        self.emit(AssistantEvent::StateChanged {
            state: ConnectionState::Idle,
        });
        tracing::info!("conversation stopped");
    }

    fn fail_start(&self, error: &Error) {
        let message = error.to_string();
        {
            let mut shared = self.shared.lock();
            shared.state = ConnectionState::Error;
            shared.last_error = Some(message.clone());
        }
        self.emit(AssistantEvent::StateChanged {
            state: ConnectionState::Error,
        });
        self.emit(AssistantEvent::Error { message });
    }

    /// Resolve the device location in the background. The session never
    /// waits on this; a failure downgrades to a warning and weather
    /// lookups simply run without a location default.
    fn spawn_locator(&self, cancel: CancellationToken) {
        let Some(provider) = self.location_provider.clone() else {
            return;
        };
        let shared = self.shared.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let located = tokio::select! {
                _ = cancel.cancelled() => return,
                located = provider.current() => located,
            };
            match located {
                Ok(point) => {
                    tracing::debug!(lat = point.latitude, lon = point.longitude, "located device");
                    shared.lock().location = Some(point);
                }
                Err(message) => {
                    let _ = events.send(AssistantEvent::Warning {
                        message: format!("Location unavailable: {message}"),
                    });
                }
            }
        });
    }

    fn emit(&self, event: AssistantEvent) {
        let _ = self.events.send(event);
    }
}

/// The per-session driver task. Owns the inbound event stream and the
/// tool-result channel; everything that mutates the log funnels through
/// its `run` loop.
struct SessionDriver {
    session: LiveSession,
    commands: mpsc::UnboundedSender<ClientCommand>,
    tool_tx: mpsc::UnboundedSender<ToolEvent>,
    tool_rx: mpsc::UnboundedReceiver<ToolEvent>,
    dispatcher: Arc<ToolDispatcher>,
    district: Option<String>,
    shared: Arc<Mutex<Shared>>,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    cell: Arc<Mutex<Option<SessionCell>>>,
    events: broadcast::Sender<AssistantEvent>,
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl SessionDriver {
    async fn run(mut self) {
        let reason = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return, // stop() owns teardown
                event = self.session.next_event() => {
                    match event {
                        Some(event) => {
                            if let Some(reason) = self.on_server_event(event) {
                                break reason;
                            }
                        }
                        None => break EndReason::Disconnected,
                    }
                }
                Some(tool_event) = self.tool_rx.recv() => {
                    self.on_tool_event(tool_event);
                }
            }
        };
        self.teardown(reason);
    }

    /// Apply one inbound server event. Returns a reason when the session
    /// is over.
    ///
    /// `stop()` may finalize the session concurrently with an event
    /// already pulled off the socket, so every log and scheduler mutation
    /// re-checks `finished` under the lock it mutates behind. `stop()`
    /// raises the flag before taking either lock, which makes the check
    /// race-free: a mutation that wins the lock first is covered by
    /// stop's own `finalize_dangling`, one that loses it sees the flag.
    fn on_server_event(&mut self, event: ServerEvent) -> Option<EndReason> {
        match event {
            ServerEvent::Opened => {
                tracing::debug!("live session opened");
            }
            ServerEvent::InputTranscription { text } => {
                if let Some(turns) = self.mutate_log(|log| {
                    log.user_delta(&text);
                    true
                }) {
                    self.emit(AssistantEvent::LogUpdated { turns });
                }
            }
            ServerEvent::OutputTranscription { text } => {
                if let Some(turns) = self.mutate_log(|log| {
                    log.model_delta(&text);
                    true
                }) {
                    self.emit(AssistantEvent::LogUpdated { turns });
                }
            }
            ServerEvent::ToolCall { requests } => {
                let context = {
                    let shared = self.shared.lock();
                    if self.finished.load(Ordering::SeqCst) {
                        return None;
                    }
                    ToolContext {
                        location: shared.location,
                        district: self.district.clone(),
                    }
                };
                for request in &requests {
                    self.emit(AssistantEvent::ToolCallStart {
                        id: request.id.clone(),
                        name: request.name.clone(),
                        arguments: request.args.clone(),
                    });
                }
                self.dispatcher.dispatch_batch(
                    requests,
                    context,
                    self.tool_tx.clone(),
                    self.cancel.clone(),
                );
            }
            ServerEvent::TurnComplete => {
                if let Some(turns) = self.mutate_log(|log| log.turn_complete()) {
                    self.emit(AssistantEvent::LogUpdated { turns });
                }
            }
            ServerEvent::Audio(chunk) => {
                let mut scheduler = self.scheduler.lock();
                if !self.finished.load(Ordering::SeqCst) {
                    scheduler.schedule(&chunk);
                }
            }
            ServerEvent::Interrupted => {
                tracing::debug!("response interrupted, halting playback");
                let mut scheduler = self.scheduler.lock();
                if !self.finished.load(Ordering::SeqCst) {
                    scheduler.reset();
                }
            }
            ServerEvent::SessionError { message } => {
                return Some(EndReason::Errored(message));
            }
            ServerEvent::Closed { code, reason } => {
                tracing::info!(?code, reason, "session closed by remote");
                return Some(EndReason::Disconnected);
            }
        }
        None
    }

    fn on_tool_event(&mut self, event: ToolEvent) {
        match event {
            ToolEvent::Completed { id, name, payload } => {
                let result = payload.to_json();
                let Some(turns) = self.mutate_log(|log| {
                    log.tool_result(payload);
                    true
                }) else {
                    return; // session finalized, discard the late result
                };
                let _ = self.commands.send(ClientCommand::ToolResponse {
                    id: id.clone(),
                    name: name.clone(),
                    result,
                });
                self.emit(AssistantEvent::ToolCallEnd {
                    id,
                    name,
                    ok: true,
                });
                self.emit(AssistantEvent::LogUpdated { turns });
            }
            ToolEvent::Failed { id, name, message } => {
                if self.finished.load(Ordering::SeqCst) {
                    return;
                }
                tracing::warn!(tool = name, "tool call failed: {message}");
                self.emit(AssistantEvent::ToolCallEnd {
                    id,
                    name,
                    ok: false,
                });
                self.emit(AssistantEvent::Warning { message });
            }
        }
    }

    /// Run one log mutation unless the session has been finalized.
    ///
    /// Returns a snapshot when the mutation ran and `apply` reported a
    /// change, `None` when it was skipped or changed nothing.
    fn mutate_log(&self, apply: impl FnOnce(&mut ConversationLog) -> bool) -> Option<Vec<Turn>> {
        let mut shared = self.shared.lock();
        if self.finished.load(Ordering::SeqCst) {
            return None;
        }
        apply(&mut shared.log).then(|| shared.log.snapshot())
    }

    fn teardown(self, reason: EndReason) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return; // stop() got there first
        }
        self.cancel.cancel();
        self.cell.lock().take();
        self.scheduler.lock().reset();

        let (state, error) = match reason {
            EndReason::Disconnected => (ConnectionState::Disconnected, None),
            EndReason::Errored(message) => (ConnectionState::Error, Some(message)),
        };
        let log_changed = {
            let mut shared = self.shared.lock();
            let changed = shared.log.finalize_dangling();
            shared.state = state;
            shared.last_error = error.clone();
            changed.then(|| shared.log.snapshot())
        };
        if let Some(turns) = log_changed {
            self.emit(AssistantEvent::LogUpdated { turns });
        }
        self.emit(AssistantEvent::StateChanged { state });
        if let Some(message) = error {
            self.emit(AssistantEvent::Error { message });
        }
    }

    fn emit(&self, event: AssistantEvent) {
        let _ = self.events.send(event);
    }
}
