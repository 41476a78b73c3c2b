//! Concrete transports for the live session protocol

pub mod gemini;

pub use gemini::GeminiLiveTransport;
