//! Session lifecycle tests
//!
//! Run against the dev echo backend and a mock LLM runtime so no model
//! files or live Ollama are needed.

use base64::Engine as _;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::config::{GuardConfig, LlmConfig, SessionTunables};
use crate::llm::OllamaClient;
use crate::stt::EchoBackend;
use crate::summarizer::{PromptTemplates, Summarizer};

const RATE: u32 = 16_000;

fn encode(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn voiced_b64(seconds: f64) -> String {
    let count = (seconds * RATE as f64) as usize;
    let samples: Vec<f32> = (0..count)
        .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / RATE as f32).sin())
        .collect();
    encode(&samples)
}

fn silence_b64(seconds: f64) -> String {
    encode(&vec![0.0f32; (seconds * RATE as f64) as usize])
}

fn tunables() -> SessionTunables {
    SessionTunables {
        chunk_duration_seconds: 60.0,
        max_queue_depth: 64,
        push_deadline: Duration::from_secs(5),
        stop_drain_timeout: Duration::from_secs(30),
        max_concurrent_sessions: 1,
    }
}

fn guard() -> GuardConfig {
    GuardConfig {
        min_words: 30,
        filler_dominance: 0.8,
    }
}

/// Mock LLM: structured requests return a small valid extraction, everything
/// else returns a plain summary line.
async fn mock_llm() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(serde_json::json!({
            "format": { "type": "object" },
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": r#"{"contacts":[{"name":"Dana Reyes"}],"companies":[],"deals":[]}"#,
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": "Summary of the discussion.",
        })))
        .mount(&server)
        .await;

    server
}

fn build_session(
    dir: &TempDir,
    server_uri: &str,
    tunables: SessionTunables,
    chunk_duration_seconds: f64,
) -> Arc<Session> {
    let config = SessionConfig {
        session_id: "00000000-0000-0000-0000-000000000001".to_string(),
        backend: "echo".to_string(),
        sample_rate: RATE,
        llm_model: "llama3.2".to_string(),
        output_dir: dir.path().to_str().unwrap().to_string(),
        csv_export_path: dir.path().join("meetings.csv").to_str().unwrap().to_string(),
        append_csv: true,
        chunk_duration_seconds,
    };

    let llm_config = LlmConfig {
        base_url: server_uri.to_string(),
        max_concurrent_calls: 2,
        request_timeout: Duration::from_secs(30),
    };
    let client = OllamaClient::new(&llm_config).unwrap();
    let summarizer = Summarizer::new(
        Arc::new(client),
        config.llm_model.clone(),
        PromptTemplates {
            chunk_summary: "Summarize: {text}".to_string(),
            final_summary: "Combine: {summaries_text}".to_string(),
            data_extraction: "Extract from: {summaries_text}".to_string(),
        },
        Arc::new(Semaphore::new(2)),
    );

    Session::start(
        config,
        tunables,
        guard(),
        Box::new(EchoBackend::new(RATE)),
        summarizer,
        Arc::new(tokio::sync::Mutex::new(())),
        false,
    )
}

#[tokio::test]
async fn test_happy_path_single_chunk() {
    let dir = TempDir::new().unwrap();
    let server = mock_llm().await;
    let session = build_session(&dir, &server.uri(), tunables(), 60.0);

    let outcome = session.push_chunk(&voiced_b64(10.0), RATE).await.unwrap();
    assert_eq!(outcome.buffered_seconds, 0.0);
    assert!(outcome.queue_depth >= 1);

    let result = session.stop().await.unwrap();
    assert!(!result.already_stopped);
    assert_eq!(result.outcome.state, SessionState::Completed);

    let summary_path = result.outcome.paths.summary_path.unwrap();
    let summary = std::fs::read_to_string(&summary_path).unwrap();
    assert_eq!(summary, "Summary of the discussion.\n");

    let data = std::fs::read_to_string(result.outcome.paths.data_path.unwrap()).unwrap();
    assert!(data.contains("Dana Reyes"));

    let csv = std::fs::read_to_string(result.outcome.paths.csv_path.unwrap()).unwrap();
    assert_eq!(csv.lines().count(), 2);
}

#[tokio::test]
async fn test_silence_only_session_is_insufficient_content() {
    let dir = TempDir::new().unwrap();
    let server = mock_llm().await;
    let session = build_session(&dir, &server.uri(), tunables(), 60.0);

    session.push_chunk(&silence_b64(1.0), RATE).await.unwrap();

    let result = session.stop().await.unwrap();
    assert_eq!(result.outcome.state, SessionState::InsufficientContent);

    let summary = std::fs::read_to_string(result.outcome.paths.summary_path.unwrap()).unwrap();
    assert_eq!(summary.trim_end(), NO_CONTENT_SUMMARY);

    let data: crate::summarizer::types::MeetingData =
        serde_json::from_str(&std::fs::read_to_string(result.outcome.paths.data_path.unwrap()).unwrap())
            .unwrap();
    assert!(data.is_empty());

    // CSV still gets its row, with empty entity fields.
    let csv = std::fs::read_to_string(result.outcome.paths.csv_path.unwrap()).unwrap();
    let row = csv.lines().nth(1).unwrap();
    assert!(row.ends_with("0,0,0"));
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let server = mock_llm().await;
    let session = build_session(&dir, &server.uri(), tunables(), 60.0);

    session.push_chunk(&voiced_b64(4.0), RATE).await.unwrap();

    let first = session.stop().await.unwrap();
    let second = session.stop().await.unwrap();

    assert!(!first.already_stopped);
    assert!(second.already_stopped);
    assert_eq!(first.outcome.paths, second.outcome.paths);
    assert_eq!(first.outcome.state, second.outcome.state);
}

#[tokio::test]
async fn test_push_after_stop_is_rejected() {
    let dir = TempDir::new().unwrap();
    let server = mock_llm().await;
    let session = build_session(&dir, &server.uri(), tunables(), 60.0);

    session.stop().await.unwrap();

    let err = session.push_chunk(&voiced_b64(2.0), RATE).await.unwrap_err();
    assert_eq!(err.error_code(), "SESSION_ALREADY_STOPPED");
}

#[tokio::test]
async fn test_invalid_audio_does_not_alter_session() {
    let dir = TempDir::new().unwrap();
    let server = mock_llm().await;
    let session = build_session(&dir, &server.uri(), tunables(), 60.0);

    let err = session.push_chunk("%%% not base64 %%%", RATE).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_AUDIO_FORMAT");

    let out_of_range = encode(&[0.5, 2.0]);
    let err = session.push_chunk(&out_of_range, RATE).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_AUDIO_FORMAT");

    // Nothing was ingested, so the session ends with no content.
    let result = session.stop().await.unwrap();
    assert_eq!(result.outcome.state, SessionState::InsufficientContent);
}

#[tokio::test]
async fn test_mismatched_sample_rate_is_rejected() {
    let dir = TempDir::new().unwrap();
    let server = mock_llm().await;
    let session = build_session(&dir, &server.uri(), tunables(), 60.0);

    let err = session.push_chunk(&voiced_b64(1.0), 44_100).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_AUDIO_FORMAT");
}

#[tokio::test]
async fn test_backpressure_reports_overload_without_dropping() {
    let dir = TempDir::new().unwrap();

    // A slow LLM keeps the MAP worker busy so chunks pile up.
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(serde_json::json!({
            "format": { "type": "object" },
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": r#"{"contacts":[],"companies":[],"deals":[]}"#,
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "response": "note" }))
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&server)
        .await;

    let mut tunables = tunables();
    tunables.max_queue_depth = 2;
    // Every 2s push seals one chunk.
    let session = build_session(&dir, &server.uri(), tunables, 2.0);

    let mut overloaded = 0;
    let mut accepted = 0;
    for _ in 0..5 {
        match session.push_chunk(&voiced_b64(2.0), RATE).await {
            Ok(_) => accepted += 1,
            Err(err) => {
                assert_eq!(err.error_code(), "ENGINE_OVERLOADED");
                overloaded += 1;
            }
        }
    }
    assert!(overloaded >= 1, "expected at least one 429");
    assert!(accepted >= 1);

    // Despite the overload signals, nothing was dropped: every sealed chunk
    // gets exactly one MAP summary and the session completes.
    let result = session.stop().await.unwrap();
    assert_eq!(result.outcome.state, SessionState::Completed);
}

#[tokio::test]
async fn test_map_stall_fails_the_session() {
    let dir = TempDir::new().unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "response": "late" }))
                .set_delay(Duration::from_secs(20)),
        )
        .mount(&server)
        .await;

    let mut tunables = tunables();
    tunables.stop_drain_timeout = Duration::from_millis(300);
    let session = build_session(&dir, &server.uri(), tunables, 2.0);

    session.push_chunk(&voiced_b64(2.5), RATE).await.unwrap();

    let err = session.stop().await.unwrap_err();
    assert_eq!(err.error_code(), "MAP_STALL");

    // The failure is terminal and idempotent.
    let result = session.stop().await.unwrap();
    assert!(result.already_stopped);
    assert_eq!(result.outcome.state, SessionState::Failed);
}

#[tokio::test]
async fn test_audio_seconds_accumulate_per_accepted_chunk() {
    let dir = TempDir::new().unwrap();
    let server = mock_llm().await;
    let session = build_session(&dir, &server.uri(), tunables(), 60.0);

    session.push_chunk(&voiced_b64(2.0), RATE).await.unwrap();
    session.push_chunk(&voiced_b64(3.0), RATE).await.unwrap();

    let counters = session.counters.lock().await;
    assert!((counters.total_audio_seconds - 5.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_abort_marks_failed_and_keeps_partial_summaries() {
    let dir = TempDir::new().unwrap();
    let server = mock_llm().await;
    let session = build_session(&dir, &server.uri(), tunables(), 2.0);

    session.push_chunk(&voiced_b64(2.5), RATE).await.unwrap();
    // Give the worker a moment to MAP the sealed chunk.
    tokio::time::sleep(Duration::from_millis(200)).await;

    session.abort().await;
    assert_eq!(session.state().await, SessionState::Failed);

    let outcome = session.outcome().await.unwrap();
    assert_eq!(outcome.state, SessionState::Failed);
    if let Some(path) = outcome.paths.summary_path {
        let text = std::fs::read_to_string(path).unwrap();
        assert!(!text.trim().is_empty());
    }
}

#[test]
fn test_low_content_guard_heuristics() {
    let guard = guard();

    // Filler-dominated short transcript trips the guard.
    assert!(is_low_content("thank you thank you uh um you", &guard));
    assert!(is_low_content("", &guard));
    assert!(is_low_content("Uh. Um... thanks! You", &guard));

    // Short but substantive content passes through.
    assert!(!is_low_content(
        "We agreed to move forward with the onboarding next week",
        &guard
    ));

    // Long transcripts never trip the guard regardless of filler.
    let long = "thank you ".repeat(40);
    assert!(!is_low_content(&long, &guard));
}
