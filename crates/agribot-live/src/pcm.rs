//! PCM framing: f32 capture frames to wire blobs and back

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::error::{Error, Result};
use crate::events::{AudioChunk, RealtimeAudioFrame};

/// Sample rate of the microphone capture stream
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of the response audio stream
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per captured frame
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

/// Encode one captured f32 frame as a base64 16-bit LE PCM blob.
pub fn encode_frame(samples: &[f32]) -> RealtimeAudioFrame {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    RealtimeAudioFrame {
        data: BASE64.encode(&bytes),
        mime_type: format!("audio/pcm;rate={INPUT_SAMPLE_RATE}"),
    }
}

/// A decoded audio chunk ready for scheduling
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    /// Playback duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// Decode a base64 16-bit LE PCM chunk into f32 samples.
pub fn decode_chunk(chunk: &AudioChunk) -> Result<DecodedAudio> {
    if chunk.sample_rate == 0 {
        return Err(Error::Decode("sample rate is zero".into()));
    }
    if chunk.channels == 0 {
        return Err(Error::Decode("channel count is zero".into()));
    }

    let bytes = BASE64
        .decode(&chunk.data)
        .map_err(|e| Error::Decode(format!("invalid base64: {e}")))?;
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "odd PCM byte count: {}",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    Ok(DecodedAudio {
        samples,
        sample_rate: chunk.sample_rate,
        channels: chunk.channels,
    })
}
