//! agribot-session: conversation session orchestrator
//!
//! This crate provides the runtime that manages a live voice session:
//! merging incremental transcription into an ordered conversation log,
//! scheduling gapless playback of response audio, dispatching model-issued
//! tool calls, and coordinating session lifecycle and teardown.

pub mod assistant;
pub mod capture;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod log;
pub mod playback;

pub use assistant::{Assistant, AssistantConfig, LocationProvider};
pub use capture::{AudioCapture, CaptureStream};
pub use device::{NullCapture, NullSink};
pub use dispatch::{BoxedDataTool, DataTool, ProviderError, ToolContext, ToolDispatcher};
pub use error::{Error, Result};
pub use events::AssistantEvent;
pub use log::ConversationLog;
pub use playback::{AudioSink, PlaybackScheduler, SinkVoice};
