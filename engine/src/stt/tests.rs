//! STT backend and feeder tests
//!
//! Model-backed variants need real weights, so tests exercise the shared
//! feeder, the echo backend, and the factory's mode gating.

use super::*;
use crate::config::{EngineMode, SttConfig};

fn voiced(seconds: f64, rate: u32) -> Vec<f32> {
    let count = (seconds * rate as f64) as usize;
    (0..count)
        .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / rate as f32).sin())
        .collect()
}

fn silence(seconds: f64, rate: u32) -> Vec<f32> {
    vec![0.0; (seconds * rate as f64) as usize]
}

fn missing_models() -> SttConfig {
    SttConfig {
        whisper_model_path: "/nonexistent/ggml-base.en.bin".to_string(),
        parakeet_model_dir: "/nonexistent/parakeet".to_string(),
    }
}

#[test]
fn test_feeder_holds_until_min_slice() {
    let mut feeder = SegmentFeeder::new(16_000);
    feeder.push(&voiced(1.0, 16_000));

    assert!(feeder.take_slice(false).unwrap().is_none());
    assert!((feeder.buffered_seconds() - 1.0).abs() < 1e-6);
}

#[test]
fn test_feeder_releases_resampled_slice() {
    let mut feeder = SegmentFeeder::new(48_000);
    feeder.push(&voiced(2.0, 48_000));

    let slice = feeder.take_slice(false).unwrap().expect("2s is enough");
    assert!((slice.start_s - 0.0).abs() < 1e-9);
    assert!((slice.end_s - 2.0).abs() < 1e-6);
    // Resampled 48k -> 16k.
    assert!((slice.samples.len() as i64 - 32_000).abs() <= 1);
    assert_eq!(feeder.buffered_seconds(), 0.0);
}

#[test]
fn test_feeder_timeline_advances_across_slices() {
    let mut feeder = SegmentFeeder::new(16_000);

    feeder.push(&voiced(2.0, 16_000));
    let first = feeder.take_slice(false).unwrap().unwrap();

    feeder.push(&voiced(3.0, 16_000));
    let second = feeder.take_slice(false).unwrap().unwrap();

    assert!((first.end_s - 2.0).abs() < 1e-6);
    assert!((second.start_s - 2.0).abs() < 1e-6);
    assert!((second.end_s - 5.0).abs() < 1e-6);
}

#[test]
fn test_feeder_force_drains_short_tail() {
    let mut feeder = SegmentFeeder::new(16_000);
    feeder.push(&voiced(0.5, 16_000));

    let slice = feeder.take_slice(true).unwrap().expect("force drains");
    assert!((slice.end_s - 0.5).abs() < 1e-6);
    assert!(feeder.take_slice(true).unwrap().is_none());
}

#[test]
fn test_echo_emits_segment_for_voiced_audio() {
    let mut backend = EchoBackend::new(16_000);

    let segments = backend.push(&voiced(2.5, 16_000)).unwrap();
    assert_eq!(segments.len(), 1);
    assert!(!segments[0].text.is_empty());
    assert_eq!(segments[0].arrival_index, 0);
    assert!((segments[0].start_s - 0.0).abs() < 1e-6);
    assert!((segments[0].end_s - 2.5).abs() < 1e-6);
    assert_eq!(backend.buffered_seconds(), 0.0);
}

#[test]
fn test_echo_stays_quiet_for_silence() {
    let mut backend = EchoBackend::new(16_000);

    let segments = backend.push(&silence(3.0, 16_000)).unwrap();
    assert!(segments.is_empty());

    let flushed = backend.flush().unwrap();
    assert!(flushed.is_empty());
}

#[test]
fn test_echo_is_deterministic() {
    let run = |seconds: f64| {
        let mut backend = EchoBackend::new(16_000);
        let mut texts = Vec::new();
        for _ in 0..3 {
            for segment in backend.push(&voiced(seconds, 16_000)).unwrap() {
                texts.push(segment.text);
            }
        }
        texts
    };

    assert_eq!(run(2.0), run(2.0));
}

#[test]
fn test_echo_buffers_below_threshold_then_flushes() {
    let mut backend = EchoBackend::new(16_000);

    assert!(backend.push(&voiced(1.0, 16_000)).unwrap().is_empty());
    assert!(backend.buffered_seconds() > 0.9);

    let flushed = backend.flush().unwrap();
    assert_eq!(flushed.len(), 1);
    assert_eq!(backend.buffered_seconds(), 0.0);
}

#[test]
fn test_factory_rejects_echo_in_prod() {
    let err = create_transcriber("echo", 16_000, &missing_models(), EngineMode::Prod).unwrap_err();
    assert_eq!(err.error_code(), "STT_BACKEND_UNAVAILABLE");
}

#[test]
fn test_factory_allows_echo_in_dev() {
    let backend = create_transcriber("echo", 16_000, &missing_models(), EngineMode::Dev);
    assert!(backend.is_ok());
}

#[test]
fn test_factory_rejects_unknown_backend() {
    let err =
        create_transcriber("carrier-pigeon", 16_000, &missing_models(), EngineMode::Dev).unwrap_err();
    assert_eq!(err.error_code(), "STT_BACKEND_UNAVAILABLE");
}

#[test]
fn test_factory_fails_fast_on_missing_model_files() {
    let err = create_transcriber("whisper", 16_000, &missing_models(), EngineMode::Prod).unwrap_err();
    assert_eq!(err.error_code(), "STT_BACKEND_UNAVAILABLE");

    let err = create_transcriber("parakeet", 16_000, &missing_models(), EngineMode::Prod).unwrap_err();
    assert_eq!(err.error_code(), "STT_BACKEND_UNAVAILABLE");
}

#[test]
fn test_advertised_backends_by_mode() {
    assert_eq!(available_backends(EngineMode::Prod), vec!["whisper", "parakeet"]);
    assert!(available_backends(EngineMode::Dev).contains(&"echo"));
    assert!(is_known_backend("whisper", EngineMode::Prod));
    assert!(!is_known_backend("echo", EngineMode::Prod));
    assert!(is_known_backend("echo", EngineMode::Dev));
}
