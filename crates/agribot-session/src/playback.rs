//! Gapless playback scheduling of response audio chunks

use agribot_live::events::AudioChunk;
use agribot_live::pcm::{self, DecodedAudio};

use crate::error::Result;

/// A handle to one scheduled buffer on the output device.
///
/// Stopping is idempotent; dropping without stopping lets the buffer play
/// out naturally.
pub struct SinkVoice {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl SinkVoice {
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    /// A voice with no per-buffer control (e.g. a discard sink)
    pub fn noop() -> Self {
        Self { stop: None }
    }

    /// Halt this voice immediately.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl std::fmt::Debug for SinkVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkVoice")
            .field("stopped", &self.stop.is_none())
            .finish()
    }
}

/// An audio output device seam.
///
/// `now` is the device clock in seconds; `play_at` schedules a decoded
/// buffer to begin at an absolute device time.
pub trait AudioSink: Send + Sync {
    fn now(&self) -> f64;
    fn play_at(&self, audio: DecodedAudio, start: f64) -> Result<SinkVoice>;
}

struct ScheduledVoice {
    voice: SinkVoice,
    ends_at: f64,
}

/// Schedules decoded chunks back-to-back on an [`AudioSink`].
///
/// The cursor (`next_start`) is monotone while a response plays; it and the
/// tracked voice set are reset to (0, empty) on interruption or stop so no
/// stale audio continues after the model is cut off.
pub struct PlaybackScheduler {
    sink: Box<dyn AudioSink>,
    next_start: f64,
    voices: Vec<ScheduledVoice>,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            sink,
            next_start: 0.0,
            voices: Vec::new(),
        }
    }

    /// Decode a chunk and schedule it at `max(cursor, device now)`.
    ///
    /// Decode and device failures drop the chunk; they never stop the
    /// pipeline.
    pub fn schedule(&mut self, chunk: &AudioChunk) {
        let audio = match pcm::decode_chunk(chunk) {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!("dropping undecodable audio chunk: {e}");
                return;
            }
        };

        self.purge_finished();
        let start = self.next_start.max(self.sink.now());
        let duration = audio.duration_secs();
        match self.sink.play_at(audio, start) {
            Ok(voice) => {
                self.voices.push(ScheduledVoice {
                    voice,
                    ends_at: start + duration,
                });
                self.next_start = start + duration;
            }
            Err(e) => tracing::warn!("dropping unplayable audio chunk: {e}"),
        }
    }

    /// Halt every tracked voice and reset the cursor. Used on interruption
    /// and on stop; idempotent.
    pub fn reset(&mut self) {
        for scheduled in &mut self.voices {
            scheduled.voice.stop();
        }
        self.voices.clear();
        self.next_start = 0.0;
    }

    /// Drop voices whose buffers have played out.
    fn purge_finished(&mut self) {
        let now = self.sink.now();
        self.voices.retain(|v| v.ends_at > now);
    }

    /// When the next scheduled chunk would begin, in device seconds
    pub fn cursor(&self) -> f64 {
        self.next_start
    }

    /// Number of scheduled, not-yet-finished voices
    pub fn active_voices(&mut self) -> usize {
        self.purge_finished();
        self.voices.len()
    }
}
