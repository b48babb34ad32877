//! Audio pipeline integration tests
//!
//! Exercises the codec and the playback scheduler without audio hardware.

use hearth_gateway::{AudioClip, ChunkScheduler, decode_audio_clip, decode_base64, encode_frame};

/// Deterministic pseudo-random samples in [-1, 1]
fn generate_samples(count: usize) -> Vec<f32> {
    let mut state: u32 = 0x1234_5678;
    (0..count)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (f64::from(state) / f64::from(u32::MAX)).mul_add(2.0, -1.0) as f32
        })
        .collect()
}

#[test]
fn round_trip_reproduces_samples_within_quantization_error() {
    let original = generate_samples(4096);

    let encoded = encode_frame(&original);
    let bytes = decode_base64(&encoded).expect("valid base64");
    let clip = decode_audio_clip(&bytes, 16_000, 1).expect("valid PCM");

    assert_eq!(clip.samples.len(), original.len());
    for (a, b) in original.iter().zip(clip.samples.iter()) {
        assert!(
            (a - b).abs() <= 2.0 / 32768.0,
            "sample outside quantization error: {a} vs {b}"
        );
    }
}

#[test]
fn encoding_is_deterministic() {
    let samples = generate_samples(512);
    assert_eq!(encode_frame(&samples), encode_frame(&samples));
}

#[test]
fn clip_duration_reflects_rate_and_channels() {
    let clip = AudioClip {
        samples: vec![0.0; 48_000],
        sample_rate: 24_000,
        channels: 2,
    };
    assert!((clip.duration_secs() - 1.0).abs() < f64::EPSILON);
}

#[test]
fn scheduler_start_times_are_monotonic_and_contiguous() {
    let mut scheduler = ChunkScheduler::new();
    let durations = [4800_usize, 2400, 9600, 1200, 240];

    let mut starts = Vec::new();
    for &duration in &durations {
        starts.push(scheduler.schedule(vec![0.1; duration]));
    }

    for i in 1..starts.len() {
        let previous_end = starts[i - 1] + durations[i - 1] as u64;
        assert!(
            starts[i] >= starts[i - 1],
            "start times must be monotonic"
        );
        assert_eq!(
            starts[i], previous_end,
            "chunks enqueued back-to-back must be contiguous"
        );
    }
}

#[test]
fn scheduler_never_schedules_in_the_past() {
    let mut scheduler = ChunkScheduler::new();
    scheduler.schedule(vec![0.1; 100]);

    // Play everything out plus some silence
    let mut out = vec![0.0; 500];
    scheduler.fill(&mut out);

    let start = scheduler.schedule(vec![0.2; 100]);
    assert_eq!(start, scheduler.clock(), "late chunk starts at clock now");
}

#[test]
fn barge_in_clears_sources_and_resets_next_start() {
    let mut scheduler = ChunkScheduler::new();
    scheduler.schedule(vec![0.1; 4800]);
    scheduler.schedule(vec![0.1; 4800]);

    // Both chunks actively scheduled, playback begun
    let mut out = vec![0.0; 256];
    scheduler.fill(&mut out);
    assert_eq!(scheduler.active_sources(), 2);

    let stopped = scheduler.stop_all();
    assert_eq!(stopped, 2);
    assert_eq!(scheduler.active_sources(), 0);
    assert_eq!(scheduler.next_start(), 0);

    // Output goes silent immediately
    let mut out = vec![1.0; 256];
    scheduler.fill(&mut out);
    assert!(out.iter().all(|&s| s == 0.0));
}

#[test]
fn fill_renders_scheduled_audio_in_order() {
    let mut scheduler = ChunkScheduler::new();
    scheduler.schedule(vec![0.25; 8]);
    scheduler.schedule(vec![0.75; 8]);

    let mut out = vec![0.0; 16];
    let outcome = scheduler.fill(&mut out);

    assert!(outcome.started);
    assert!(outcome.drained, "both chunks fit into one fill");
    assert!(out[..8].iter().all(|&s| (s - 0.25).abs() < f32::EPSILON));
    assert!(out[8..].iter().all(|&s| (s - 0.75).abs() < f32::EPSILON));
}
