//! Microphone capture
//!
//! Captures 16kHz mono audio from the system microphone, frames it into
//! fixed-size buffers, and forwards each frame to the live transport as
//! base64-wrapped 16-bit PCM. Frames are fire-and-forget: audio is real-time,
//! so a frame the transport cannot take immediately is dropped, never queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::audio::CAPTURE_MIME_TYPE;
use crate::audio::codec::encode_frame;
use crate::{Error, Result};

/// RMS level below which a frame is treated as background noise
const NOISE_GATE_RMS: f32 = 0.003;

/// Peak level the automatic gain control drives quiet frames toward
const AGC_TARGET_PEAK: f32 = 0.7;

/// Maximum boost the automatic gain control may apply
const AGC_MAX_GAIN: f32 = 4.0;

/// One encoded chunk of captured microphone audio
#[derive(Debug, Clone, Serialize)]
pub struct AudioFrame {
    /// Base64-wrapped 16-bit little-endian PCM
    pub data: String,

    /// MIME-like descriptor (`audio/pcm;rate=16000`)
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl AudioFrame {
    /// Encode a frame of floating-point samples for transport
    #[must_use]
    pub fn from_samples(samples: &[f32]) -> Self {
        Self {
            data: encode_frame(samples),
            mime_type: CAPTURE_MIME_TYPE.to_string(),
        }
    }
}

/// Explicit capture configuration
///
/// The input-conditioning toggles mirror the device-level constraints the
/// host platform would otherwise apply implicitly; here they are explicit.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Input device name (`None` uses the system default)
    pub device: Option<String>,

    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Samples per emitted frame
    pub frame_samples: usize,

    /// Drop microphone frames while response audio is playing (half-duplex)
    pub echo_cancellation: bool,

    /// Silence frames below the noise-gate threshold
    pub noise_suppression: bool,

    /// Boost quiet frames toward a target peak level
    pub auto_gain_control: bool,
}

/// Captures audio from the microphone on a dedicated thread
///
/// The cpal stream lives on its own OS thread so the capture handle itself
/// stays `Send` and can be owned by the session orchestrator.
pub struct AudioCapture {
    options: CaptureOptions,
    worker: Option<CaptureWorker>,
}

struct CaptureWorker {
    stop: Arc<AtomicBool>,
    handle: std::thread::JoinHandle<()>,
}

impl AudioCapture {
    /// Create a capture instance with the given options
    #[must_use]
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            options,
            worker: None,
        }
    }

    /// Start capturing, sending one [`AudioFrame`] per filled buffer
    ///
    /// `playback_active` is the half-duplex echo gate: while it reads true and
    /// echo cancellation is enabled, captured frames are discarded.
    ///
    /// # Errors
    ///
    /// Returns error if the input device cannot be opened or the stream
    /// cannot be built
    pub fn start(
        &mut self,
        frames: mpsc::Sender<AudioFrame>,
        playback_active: Arc<AtomicBool>,
    ) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let options = self.options.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let handle = std::thread::spawn(move || {
            let stream = match build_input_stream(&options, frames, &playback_active) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(Error::Audio(format!(
                    "failed to start input stream: {e}"
                ))));
                return;
            }

            let _ = ready_tx.send(Ok(()));

            // Hold the stream alive until stopped
            while !stop_thread.load(Ordering::Relaxed) {
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
            drop(stream);
            tracing::debug!("audio capture stopped");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(CaptureWorker { stop, handle });
                tracing::debug!(
                    sample_rate = self.options.sample_rate,
                    frame_samples = self.options.frame_samples,
                    "audio capture started"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Audio("capture thread exited early".to_string())),
        }
    }

    /// Stop capturing
    ///
    /// Idempotent: safe to call repeatedly from any teardown trigger.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Relaxed);
            if worker.handle.join().is_err() {
                tracing::warn!("capture thread panicked during shutdown");
            }
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the cpal input stream for the given options
fn build_input_stream(
    options: &CaptureOptions,
    frames: mpsc::Sender<AudioFrame>,
    playback_active: &Arc<AtomicBool>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = if let Some(ref name) = options.device {
        host.input_devices()
            .map_err(|e| Error::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| d.name().is_ok_and(|n| n == *name))
            .ok_or_else(|| Error::Audio(format!("input device '{name}' not found")))?
    } else {
        host.default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?
    };

    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(options.sample_rate)
                && c.max_sample_rate() >= SampleRate(options.sample_rate)
        })
        .ok_or_else(|| Error::Audio("no suitable input config found".to_string()))?;

    let config: StreamConfig = supported
        .with_sample_rate(SampleRate(options.sample_rate))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = options.sample_rate,
        "audio capture initialized"
    );

    let opts = options.clone();
    let gate = Arc::clone(playback_active);
    let mut pending: Vec<f32> = Vec::with_capacity(options.frame_samples * 2);

    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                pending.extend_from_slice(data);

                while pending.len() >= opts.frame_samples {
                    let mut frame: Vec<f32> = pending.drain(..opts.frame_samples).collect();

                    if opts.echo_cancellation && gate.load(Ordering::Relaxed) {
                        // Half-duplex: the model is speaking, so this frame is
                        // mostly speaker echo
                        tracing::trace!("dropping mic frame during playback");
                        continue;
                    }
                    condition_frame(&mut frame, &opts);

                    // Fire-and-forget: stale audio frames are worthless
                    if frames.try_send(AudioFrame::from_samples(&frame)).is_err() {
                        tracing::trace!("frame channel not ready, dropping frame");
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

/// Apply the enabled input-conditioning stages in place
fn condition_frame(frame: &mut [f32], options: &CaptureOptions) {
    if options.noise_suppression && rms(frame) < NOISE_GATE_RMS {
        frame.fill(0.0);
        return;
    }

    if options.auto_gain_control {
        let peak = frame.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        if peak > 0.0 && peak < AGC_TARGET_PEAK {
            let gain = (AGC_TARGET_PEAK / peak).min(AGC_MAX_GAIN);
            for sample in frame.iter_mut() {
                *sample = (*sample * gain).clamp(-1.0, 1.0);
            }
        }
    }
}

/// Root-mean-square energy of a frame
#[allow(clippy::cast_precision_loss)]
fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> CaptureOptions {
        CaptureOptions {
            device: None,
            sample_rate: 16_000,
            frame_samples: 4096,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }

    #[test]
    fn noise_gate_silences_quiet_frames() {
        let mut frame = vec![0.001f32; 4096];
        condition_frame(&mut frame, &options());
        assert!(frame.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn agc_boosts_quiet_speech() {
        let mut frame = vec![0.1f32; 4096];
        condition_frame(&mut frame, &options());
        assert!(frame[0] > 0.3, "expected boosted sample, got {}", frame[0]);
        assert!(frame[0] <= AGC_TARGET_PEAK + 0.001);
    }

    #[test]
    fn agc_leaves_loud_frames_alone() {
        let mut frame = vec![0.9f32; 4096];
        condition_frame(&mut frame, &options());
        assert!((frame[0] - 0.9).abs() < 0.001);
    }

    #[test]
    fn frame_carries_capture_mime_type() {
        let frame = AudioFrame::from_samples(&[0.0; 16]);
        assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
        assert!(!frame.data.is_empty());
    }

    #[test]
    fn stop_is_idempotent_without_start() {
        let mut capture = AudioCapture::new(options());
        capture.stop();
        capture.stop();
        assert!(!capture.is_capturing());
    }
}
