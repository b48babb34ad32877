//! Response audio playback
//!
//! Streams of decoded response chunks are scheduled back-to-back against a
//! monotonic output sample clock: each chunk starts at
//! `max(previous_end, now)`, so bursts play gaplessly and a chunk arriving
//! after silence starts immediately. [`ChunkScheduler`] is the pure,
//! hardware-free core; [`AudioPlayback`] drives it through a cpal output
//! stream on a dedicated thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;

use crate::audio::codec::AudioClip;
use crate::{Error, Result};

/// Playback state transitions surfaced to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The first scheduled chunk of a burst has started playing
    Started,
    /// Every scheduled chunk has finished; the output is silent again
    Drained,
}

/// A chunk scheduled on the output clock
#[derive(Debug)]
struct ScheduledChunk {
    /// Start position in samples on the output clock
    start: u64,
    samples: Vec<f32>,
}

/// Outcome of one output-buffer fill
#[derive(Debug, Clone, Copy, Default)]
pub struct FillOutcome {
    /// Playback transitioned from silent to playing during this fill
    pub started: bool,
    /// The last active chunk finished during this fill
    pub drained: bool,
}

/// Gapless sequential scheduler over a monotonic sample clock
///
/// All positions are in samples at the output rate. The `next_start` field is
/// the single serialization point for chunk ordering: it is read and
/// immediately rewritten inside [`ChunkScheduler::schedule`], which callers
/// must invoke under one lock acquisition.
#[derive(Debug, Default)]
pub struct ChunkScheduler {
    /// Samples elapsed on the output clock
    clock: u64,
    /// Where the next chunk will start
    next_start: u64,
    /// Whether audio was flowing as of the last fill
    playing: bool,
    active: Vec<ScheduledChunk>,
}

impl ChunkScheduler {
    /// Create an empty scheduler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a chunk, returning its assigned start position
    ///
    /// The chunk starts at `max(next_start, clock_now)`: back-to-back with the
    /// previous chunk, or immediately if the output has gone silent.
    pub fn schedule(&mut self, samples: Vec<f32>) -> u64 {
        let start = self.next_start.max(self.clock);
        self.next_start = start + samples.len() as u64;
        self.active.push(ScheduledChunk { start, samples });
        start
    }

    /// Render the next `out.len()` samples, advancing the clock
    ///
    /// Completed chunks are retired from the active set.
    pub fn fill(&mut self, out: &mut [f32]) -> FillOutcome {
        out.fill(0.0);

        let begin = self.clock;
        let end = begin + out.len() as u64;
        let was_playing = self.playing;
        let mut any_samples = false;

        for chunk in &self.active {
            let chunk_end = chunk.start + chunk.samples.len() as u64;
            let lo = chunk.start.max(begin);
            let hi = chunk_end.min(end);
            if lo >= hi {
                continue;
            }
            any_samples = true;
            for t in lo..hi {
                let out_idx = usize::try_from(t - begin).unwrap_or(usize::MAX);
                let chunk_idx = usize::try_from(t - chunk.start).unwrap_or(usize::MAX);
                out[out_idx] += chunk.samples[chunk_idx];
            }
        }

        self.clock = end;
        self.active
            .retain(|c| c.start + c.samples.len() as u64 > end);

        let mut outcome = FillOutcome::default();
        if !was_playing && any_samples {
            self.playing = true;
            outcome.started = true;
        }
        if self.playing && self.active.is_empty() {
            self.playing = false;
            outcome.drained = was_playing || outcome.started;
        }
        outcome
    }

    /// Immediately stop every active source and reset the schedule
    ///
    /// Returns the number of sources stopped. Used on barge-in and teardown.
    pub fn stop_all(&mut self) -> usize {
        let stopped = self.active.len();
        self.active.clear();
        self.next_start = 0;
        self.playing = false;
        stopped
    }

    /// Number of chunks currently scheduled or playing
    #[must_use]
    pub fn active_sources(&self) -> usize {
        self.active.len()
    }

    /// The next chunk's earliest start position in samples
    #[must_use]
    pub const fn next_start(&self) -> u64 {
        self.next_start
    }

    /// Samples elapsed on the output clock
    #[must_use]
    pub const fn clock(&self) -> u64 {
        self.clock
    }

    /// Whether audio was flowing as of the last fill
    #[must_use]
    pub const fn is_playing(&self) -> bool {
        self.playing
    }
}

/// Plays scheduled response audio through the default output device
pub struct AudioPlayback {
    scheduler: Arc<Mutex<ChunkScheduler>>,
    sample_rate: u32,
    output_device: Option<String>,
    /// Read by the capture pipeline as the half-duplex echo gate
    active_flag: Arc<AtomicBool>,
    worker: Option<PlaybackWorker>,
}

struct PlaybackWorker {
    stop: Arc<AtomicBool>,
    handle: std::thread::JoinHandle<()>,
}

impl AudioPlayback {
    /// Create a playback instance at the given output rate
    #[must_use]
    pub fn new(sample_rate: u32, output_device: Option<String>) -> Self {
        Self {
            scheduler: Arc::new(Mutex::new(ChunkScheduler::new())),
            sample_rate,
            output_device,
            active_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Shared flag that reads true while response audio is playing
    #[must_use]
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.active_flag)
    }

    /// Open the output stream and start rendering scheduled chunks
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be opened
    pub fn start(&mut self, events: mpsc::UnboundedSender<PlaybackEvent>) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let scheduler = Arc::clone(&self.scheduler);
        let active_flag = Arc::clone(&self.active_flag);
        let sample_rate = self.sample_rate;
        let output_device = self.output_device.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let handle = std::thread::spawn(move || {
            let stream = match build_output_stream(
                sample_rate,
                output_device.as_deref(),
                &scheduler,
                &active_flag,
                events,
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(Error::Audio(format!(
                    "failed to start output stream: {e}"
                ))));
                return;
            }

            let _ = ready_tx.send(Ok(()));

            while !stop_thread.load(Ordering::Relaxed) {
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
            drop(stream);
            tracing::debug!("audio playback stopped");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(PlaybackWorker { stop, handle });
                tracing::debug!(sample_rate = self.sample_rate, "audio playback started");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Audio("playback thread exited early".to_string())),
        }
    }

    /// Schedule a decoded clip for gapless playback, returning its start
    /// offset in seconds on the output clock
    #[allow(clippy::cast_precision_loss)]
    pub fn enqueue(&self, clip: &AudioClip) -> f64 {
        let start = {
            let mut scheduler = self.scheduler.lock().unwrap_or_else(|p| p.into_inner());
            scheduler.schedule(clip.samples.clone())
        };
        // Raise the echo gate as soon as audio is queued, not when the
        // first sample renders
        self.active_flag.store(true, Ordering::Relaxed);
        start as f64 / f64::from(self.sample_rate)
    }

    /// Hard-stop every active source and reset the schedule
    ///
    /// Returns the number of sources stopped.
    pub fn stop_all(&self) -> usize {
        let stopped = {
            let mut scheduler = self.scheduler.lock().unwrap_or_else(|p| p.into_inner());
            scheduler.stop_all()
        };
        self.active_flag.store(false, Ordering::Relaxed);
        if stopped > 0 {
            tracing::debug!(stopped, "stopped active playback sources");
        }
        stopped
    }

    /// Number of chunks currently scheduled or playing
    #[must_use]
    pub fn active_sources(&self) -> usize {
        self.scheduler
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .active_sources()
    }

    /// Close the output stream
    ///
    /// Idempotent: safe to call repeatedly from any teardown trigger.
    pub fn stop(&mut self) {
        self.stop_all();
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Relaxed);
            if worker.handle.join().is_err() {
                tracing::warn!("playback thread panicked during shutdown");
            }
        }
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the cpal output stream feeding from the scheduler
fn build_output_stream(
    sample_rate: u32,
    output_device: Option<&str>,
    scheduler: &Arc<Mutex<ChunkScheduler>>,
    active_flag: &Arc<AtomicBool>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = if let Some(name) = output_device {
        host.output_devices()
            .map_err(|e| Error::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| d.name().is_ok_and(|n| n == name))
            .ok_or_else(|| Error::Audio(format!("output device '{name}' not found")))?
    } else {
        host.default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?
    };

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            // Fallback: duplicate mono onto a stereo device
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio playback initialized"
    );

    let scheduler = Arc::clone(scheduler);
    let active_flag = Arc::clone(active_flag);
    let mut mono: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                mono.resize(frames, 0.0);

                let outcome = {
                    let mut sched = scheduler.lock().unwrap_or_else(|p| p.into_inner());
                    sched.fill(&mut mono)
                };

                for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }

                if outcome.started {
                    let _ = events.send(PlaybackEvent::Started);
                }
                if outcome.drained {
                    active_flag.store(false, Ordering::Relaxed);
                    let _ = events.send(PlaybackEvent::Drained);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_schedule_back_to_back() {
        let mut sched = ChunkScheduler::new();
        let a = sched.schedule(vec![0.1; 100]);
        let b = sched.schedule(vec![0.2; 50]);
        let c = sched.schedule(vec![0.3; 25]);
        assert_eq!(a, 0);
        assert_eq!(b, 100);
        assert_eq!(c, 150);
        assert_eq!(sched.next_start(), 175);
    }

    #[test]
    fn chunk_after_silence_starts_at_clock_now() {
        let mut sched = ChunkScheduler::new();
        sched.schedule(vec![0.1; 10]);
        let mut out = vec![0.0; 64];
        sched.fill(&mut out);
        assert_eq!(sched.clock(), 64);

        // next_start (10) is behind the clock (64): start now, not in the past
        let start = sched.schedule(vec![0.2; 10]);
        assert_eq!(start, 64);
    }

    #[test]
    fn fill_reports_start_and_drain() {
        let mut sched = ChunkScheduler::new();
        sched.schedule(vec![0.5; 32]);

        let mut out = vec![0.0; 16];
        let outcome = sched.fill(&mut out);
        assert!(outcome.started);
        assert!(!outcome.drained);
        assert!((out[0] - 0.5).abs() < f32::EPSILON);

        let outcome = sched.fill(&mut out);
        assert!(!outcome.started);
        assert!(outcome.drained);
        assert_eq!(sched.active_sources(), 0);
    }

    #[test]
    fn stop_all_clears_sources_and_resets_next_start() {
        let mut sched = ChunkScheduler::new();
        sched.schedule(vec![0.1; 100]);
        sched.schedule(vec![0.1; 100]);
        let mut out = vec![0.0; 10];
        sched.fill(&mut out);

        let stopped = sched.stop_all();
        assert_eq!(stopped, 2);
        assert_eq!(sched.active_sources(), 0);
        assert_eq!(sched.next_start(), 0);
        assert!(!sched.is_playing());
    }

    #[test]
    fn clock_stays_monotonic_across_stop_all() {
        let mut sched = ChunkScheduler::new();
        sched.schedule(vec![0.1; 100]);
        let mut out = vec![0.0; 50];
        sched.fill(&mut out);
        sched.stop_all();

        // A chunk scheduled after reset starts at the current clock
        let start = sched.schedule(vec![0.2; 10]);
        assert_eq!(start, 50);
    }
}
