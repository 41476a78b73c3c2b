//! agribot-live: live conversation session protocol layer
//!
//! This crate defines the shared conversation value types, the inbound
//! event / outbound command shapes of a live bidirectional session, PCM
//! framing helpers, and the `LiveTransport` trait together with a concrete
//! Gemini Live websocket transport.

pub mod error;
pub mod events;
pub mod pcm;
pub mod session;
pub mod transports;
pub mod types;

pub use error::{Error, Result};
pub use events::{
    AudioChunk, ClientCommand, RealtimeAudioFrame, ServerContent, ServerEvent, ToolCallRequest,
};
pub use session::{LiveSession, LiveTransport, SessionConfig, ToolDeclaration};
pub use types::{
    ConnectionState, CropPricesData, DailyForecast, GeoPoint, MarketPrice, Role, SkyCondition,
    ToolPayload, Turn, WeatherData,
};
