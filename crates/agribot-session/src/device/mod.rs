//! Audio device backends.
//!
//! The null backend is always available and serves headless runs and
//! tests; real hardware capture and playback live behind the
//! `cpal-device` feature.

pub mod null;

#[cfg(feature = "cpal-device")]
pub mod cpal_backend;

pub use null::{NullCapture, NullSink};

#[cfg(feature = "cpal-device")]
pub use cpal_backend::{CpalCapture, CpalSink};
