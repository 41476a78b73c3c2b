//! Real audio hardware via cpal.
//!
//! cpal streams are not `Send`, so each stream lives on a dedicated
//! thread for its whole lifetime; the async side talks to it through
//! channels and shared state. Capture resamples the device rate down to
//! the 16 kHz mono frames the session expects; playback resamples
//! response audio up to the device rate at schedule time and mixes it in
//! the output callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use agribot_live::pcm::{CAPTURE_FRAME_SAMPLES, DecodedAudio, INPUT_SAMPLE_RATE};

use crate::capture::{AudioCapture, CaptureStream};
use crate::error::{Error, Result};
use crate::playback::{AudioSink, SinkVoice};

/// Linear-interpolation resampler for mono f32 audio
struct LinearResampler {
    ratio: f64,
    /// Fractional read position into the stream, relative to `prev`
    pos: f64,
    prev: f32,
    primed: bool,
}

impl LinearResampler {
    fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            ratio: from_rate as f64 / to_rate as f64,
            pos: 0.0,
            prev: 0.0,
            primed: false,
        }
    }

    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) {
        for &sample in input {
            if !self.primed {
                self.prev = sample;
                self.primed = true;
                continue;
            }
            while self.pos < 1.0 {
                let t = self.pos as f32;
                output.push(self.prev * (1.0 - t) + sample * t);
                self.pos += self.ratio;
            }
            self.pos -= 1.0;
            self.prev = sample;
        }
    }
}

fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    let mut resampler = LinearResampler::new(from_rate, to_rate);
    let mut output = Vec::with_capacity(input.len() * to_rate as usize / from_rate as usize + 1);
    resampler.process(input, &mut output);
    output
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Microphone capture through the default cpal input device
#[derive(Debug, Default)]
pub struct CpalCapture;

#[async_trait]
impl AudioCapture for CpalCapture {
    async fn open(&self) -> Result<CaptureStream> {
        let (frame_tx, frame_rx) = mpsc::channel::<Vec<f32>>(32);
        let stop = CancellationToken::new();
        let cancel = stop.clone();
        let (ready_tx, ready_rx) = oneshot::channel::<std::result::Result<(), String>>();

        std::thread::Builder::new()
            .name("agribot-capture".into())
            .spawn(move || {
                let stream = match build_input_stream(frame_tx) {
                    Ok(stream) => stream,
                    Err(message) => {
                        let _ = ready_tx.send(Err(message));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // The stream stops when this thread drops it.
                while !cancel.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(50));
                }
            })
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(CaptureStream::new(frame_rx, stop)),
            Ok(Err(message)) => Err(Error::DeviceUnavailable(message)),
            Err(_) => Err(Error::DeviceUnavailable("capture thread died".into())),
        }
    }
}

fn build_input_stream(
    frames: mpsc::Sender<Vec<f32>>,
) -> std::result::Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or("no default input device")?;
    let config = device.default_input_config().map_err(|e| e.to_string())?;
    if config.sample_format() != cpal::SampleFormat::F32 {
        return Err(format!(
            "unsupported input sample format {:?}",
            config.sample_format()
        ));
    }
    let channels = config.channels() as usize;
    let device_rate = config.sample_rate().0;
    tracing::info!(
        device = device.name().unwrap_or_default(),
        rate = device_rate,
        channels,
        "opening input device"
    );

    let mut resampler = LinearResampler::new(device_rate, INPUT_SAMPLE_RATE);
    let mut pending: Vec<f32> = Vec::with_capacity(CAPTURE_FRAME_SAMPLES * 2);
    let stream = device
        .build_input_stream(
            &config.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = downmix(data, channels);
                if device_rate == INPUT_SAMPLE_RATE {
                    pending.extend_from_slice(&mono);
                } else {
                    resampler.process(&mono, &mut pending);
                }
                while pending.len() >= CAPTURE_FRAME_SAMPLES {
                    let frame: Vec<f32> = pending.drain(..CAPTURE_FRAME_SAMPLES).collect();
                    // Dropping a frame under backpressure beats stalling
                    // the audio callback.
                    let _ = frames.try_send(frame);
                }
            },
            |err| tracing::warn!("input stream error: {err}"),
            None,
        )
        .map_err(|e| e.to_string())?;
    Ok(stream)
}

struct QueuedVoice {
    id: u64,
    start_sample: u64,
    samples: Vec<f32>,
    pos: usize,
}

struct SinkState {
    /// Device clock in output samples
    clock: u64,
    voices: Vec<QueuedVoice>,
}

/// Playback through the default cpal output device.
///
/// `now` is the number of samples the device has consumed, in seconds.
pub struct CpalSink {
    state: Arc<Mutex<SinkState>>,
    device_rate: u32,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl CpalSink {
    pub async fn open() -> Result<Self> {
        let state = Arc::new(Mutex::new(SinkState {
            clock: 0,
            voices: Vec::new(),
        }));
        let shutdown = CancellationToken::new();
        let cancel = shutdown.clone();
        let callback_state = state.clone();
        let (ready_tx, ready_rx) = oneshot::channel::<std::result::Result<u32, String>>();

        std::thread::Builder::new()
            .name("agribot-playback".into())
            .spawn(move || {
                let (stream, rate) = match build_output_stream(callback_state) {
                    Ok(pair) => pair,
                    Err(message) => {
                        let _ = ready_tx.send(Err(message));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(rate));
                while !cancel.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(50));
                }
            })
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(device_rate)) => Ok(Self {
                state,
                device_rate,
                next_id: AtomicU64::new(0),
                shutdown,
            }),
            Ok(Err(message)) => Err(Error::DeviceUnavailable(message)),
            Err(_) => Err(Error::DeviceUnavailable("playback thread died".into())),
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn build_output_stream(
    state: Arc<Mutex<SinkState>>,
) -> std::result::Result<(cpal::Stream, u32), String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or("no default output device")?;
    let config = device.default_output_config().map_err(|e| e.to_string())?;
    if config.sample_format() != cpal::SampleFormat::F32 {
        return Err(format!(
            "unsupported output sample format {:?}",
            config.sample_format()
        ));
    }
    let channels = config.channels() as usize;
    let rate = config.sample_rate().0;
    tracing::info!(
        device = device.name().unwrap_or_default(),
        rate,
        channels,
        "opening output device"
    );

    let stream = device
        .build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut state = state.lock();
                for frame in data.chunks_exact_mut(channels) {
                    let now = state.clock;
                    let mut mixed = 0.0f32;
                    for voice in &mut state.voices {
                        if voice.start_sample <= now && voice.pos < voice.samples.len() {
                            mixed += voice.samples[voice.pos];
                            voice.pos += 1;
                        }
                    }
                    state.voices.retain(|v| v.pos < v.samples.len());
                    for out in frame.iter_mut() {
                        *out = mixed.clamp(-1.0, 1.0);
                    }
                    state.clock += 1;
                }
            },
            |err| tracing::warn!("output stream error: {err}"),
            None,
        )
        .map_err(|e| e.to_string())?;
    Ok((stream, rate))
}

impl AudioSink for CpalSink {
    fn now(&self) -> f64 {
        self.state.lock().clock as f64 / self.device_rate as f64
    }

    fn play_at(&self, audio: DecodedAudio, start: f64) -> Result<SinkVoice> {
        let samples = resample(&audio.samples, audio.sample_rate, self.device_rate);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let start_sample = (start * self.device_rate as f64) as u64;
        self.state.lock().voices.push(QueuedVoice {
            id,
            start_sample,
            samples,
            pos: 0,
        });

        let state = self.state.clone();
        Ok(SinkVoice::new(move || {
            state.lock().voices.retain(|v| v.id != id);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_preserves_duration() {
        let one_second = vec![0.5f32; 24_000];
        let out = resample(&one_second, 24_000, 48_000);
        // Linear interpolation loses at most a sample at each edge.
        assert!((out.len() as i64 - 48_000).unsigned_abs() < 4);
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let input = vec![0.1f32, 0.2, 0.3];
        assert_eq!(resample(&input, 16_000, 16_000), input);
    }

    #[test]
    fn test_downmix_averages_channels() {
        let stereo = vec![1.0f32, 0.0, 0.5, 0.5];
        assert_eq!(downmix(&stereo, 2), vec![0.5, 0.5]);
    }

    #[test]
    fn test_downmix_mono_passthrough() {
        let mono = vec![0.25f32, -0.25];
        assert_eq!(downmix(&mono, 1), mono);
    }
}
