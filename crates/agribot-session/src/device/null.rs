//! Null audio devices: silent capture, discarding playback.
//!
//! Used when no sound hardware is available and in tests. The capture
//! side emits silent frames at the real-time cadence so the rest of the
//! pipeline behaves as it would with a microphone; the sink keeps a real
//! monotonic clock so playback scheduling stays meaningful.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agribot_live::pcm::{CAPTURE_FRAME_SAMPLES, DecodedAudio, INPUT_SAMPLE_RATE};

use crate::capture::{AudioCapture, CaptureStream};
use crate::error::Result;
use crate::playback::{AudioSink, SinkVoice};

/// A capture backend producing silent frames at microphone cadence
#[derive(Debug, Default)]
pub struct NullCapture;

#[async_trait]
impl AudioCapture for NullCapture {
    async fn open(&self) -> Result<CaptureStream> {
        let (tx, rx) = mpsc::channel(8);
        let stop = CancellationToken::new();
        let cancel = stop.clone();

        let frame_period = Duration::from_secs_f64(
            CAPTURE_FRAME_SAMPLES as f64 / INPUT_SAMPLE_RATE as f64,
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(vec![0.0f32; CAPTURE_FRAME_SAMPLES]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(CaptureStream::new(rx, stop))
    }
}

/// A playback sink that discards audio but keeps real time
#[derive(Debug)]
pub struct NullSink {
    epoch: Instant,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for NullSink {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn play_at(&self, _audio: DecodedAudio, _start: f64) -> Result<SinkVoice> {
        Ok(SinkVoice::noop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_capture_emits_silent_frames() {
        let mut stream = NullCapture.open().await.unwrap();
        let frame = stream.next_frame().await.unwrap();
        assert_eq!(frame.len(), CAPTURE_FRAME_SAMPLES);
        assert!(frame.iter().all(|&s| s == 0.0));
        stream.stop();
    }

    #[tokio::test]
    async fn test_null_capture_stops_cleanly() {
        let mut stream = NullCapture.open().await.unwrap();
        stream.stop();
        // The producer notices cancellation and closes the channel.
        while stream.next_frame().await.is_some() {}
    }

    #[test]
    fn test_null_sink_clock_advances() {
        let sink = NullSink::new();
        let first = sink.now();
        std::thread::sleep(Duration::from_millis(5));
        assert!(sink.now() > first);
    }
}
