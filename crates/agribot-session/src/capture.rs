//! Microphone capture pipeline
//!
//! A capture backend yields fixed-size 16 kHz mono f32 frames; the pump
//! task encodes each frame as 16-bit PCM and hands it to the session's
//! outbound channel. Encoding is synchronous and local; transmission is
//! fire-and-forget, so the capture path never blocks on network I/O.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use agribot_live::events::ClientCommand;
use agribot_live::pcm;

use crate::error::Result;

/// An open microphone stream: a frame receiver plus a stop token.
///
/// Dropping the stream stops the device; calling [`CaptureStream::stop`]
/// repeatedly is a no-op.
pub struct CaptureStream {
    frames: mpsc::Receiver<Vec<f32>>,
    stop: CancellationToken,
}

impl CaptureStream {
    pub fn new(frames: mpsc::Receiver<Vec<f32>>, stop: CancellationToken) -> Self {
        Self { frames, stop }
    }

    /// Receive the next captured frame. Returns `None` once the device
    /// stream has ended.
    pub async fn next_frame(&mut self) -> Option<Vec<f32>> {
        self.frames.recv().await
    }

    /// Release the device stream. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// A microphone capture backend
#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Acquire the device and start producing frames.
    async fn open(&self) -> Result<CaptureStream>;
}

/// Pump captured frames into the outbound command channel until cancelled
/// or the device stream ends.
pub fn spawn_pump(
    mut stream: CaptureStream,
    commands: mpsc::UnboundedSender<ClientCommand>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = stream.next_frame() => {
                    let Some(samples) = frame else { break };
                    let frame = pcm::encode_frame(&samples);
                    if commands.send(ClientCommand::RealtimeAudio { frame }).is_err() {
                        break;
                    }
                }
            }
        }
        stream.stop();
        tracing::debug!("capture pump stopped");
    })
}
