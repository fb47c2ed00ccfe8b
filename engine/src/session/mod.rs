//! Recording session lifecycle
//!
//! A session owns one STT backend, one transcript buffer, one summarizer,
//! and one MAP worker task. Audio flows in through `push_chunk`; the worker
//! summarizes sealed chunks as they appear; `stop` drains the pipeline, runs
//! REDUCE and extraction, and persists artifacts.

pub mod registry;

#[cfg(test)]
mod tests;

use chrono::Local;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::audio;
use crate::config::{GuardConfig, SessionTunables};
use crate::error::{EngineError, Result};
use crate::output::{ArtifactPaths, CsvLock, OutputWriter};
use crate::stt::Transcriber;
use crate::summarizer::types::MeetingData;
use crate::summarizer::Summarizer;
use crate::transcript::{TranscriptBuffer, TranscriptChunk};

/// Summary text written when the low-content guard trips.
pub const NO_CONTENT_SUMMARY: &str = "No usable call audio was captured from the target app. \
Please check your capture configuration.";

/// Filler phrases the low-content guard checks for dominance.
const FILLER_PHRASES: &[&str] = &["thank you", "thanks", "you", "uh", "um"];

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Active,
    Stopping,
    Completed,
    InsufficientContent,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::InsufficientContent | Self::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Completed => "completed",
            Self::InsufficientContent => "insufficient_content",
            Self::Failed => "failed",
        }
    }
}

/// Immutable per-session configuration captured at `/start_session`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_id: String,
    pub backend: String,
    pub sample_rate: u32,
    pub llm_model: String,
    pub output_dir: String,
    pub csv_export_path: String,
    pub append_csv: bool,
    pub chunk_duration_seconds: f64,
}

/// Terminal result retained in the registry history.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub paths: ArtifactPaths,
}

/// Response data for one accepted audio chunk.
#[derive(Debug, Clone, Copy)]
pub struct PushOutcome {
    pub buffered_seconds: f64,
    pub queue_depth: usize,
}

/// Result of a stop call.
#[derive(Debug, Clone)]
pub struct StopResult {
    pub outcome: SessionOutcome,
    pub already_stopped: bool,
}

struct Counters {
    total_audio_seconds: f64,
}

/// One live recording session.
pub struct Session {
    config: SessionConfig,
    tunables: SessionTunables,
    guard: GuardConfig,

    state: RwLock<SessionState>,
    /// `None` after teardown; the backend and its model memory are released
    /// on the terminal transition.
    stt: Arc<Mutex<Option<Box<dyn Transcriber>>>>,
    buffer: Mutex<TranscriptBuffer>,
    counters: Mutex<Counters>,

    /// Chunks sealed but not yet folded into a MAP summary.
    unmapped_chunks: Arc<AtomicUsize>,
    /// Sender side of the MAP queue; dropped during stop to drain the worker.
    chunk_tx: Mutex<Option<mpsc::Sender<TranscriptChunk>>>,
    /// MAP worker handle; resolves to the ordered chunk summaries.
    worker: Mutex<Option<JoinHandle<Vec<String>>>>,
    shutdown_tx: watch::Sender<bool>,

    summarizer: Arc<Summarizer>,
    writer: OutputWriter,
    csv_lock: CsvLock,

    /// Cached terminal result; also serves as the stop idempotency marker.
    outcome: Mutex<Option<SessionOutcome>>,
    /// Serializes concurrent stop calls.
    stop_lock: Mutex<()>,
}

impl Session {
    /// Construct the session and start its MAP worker. The returned session
    /// is `active`.
    pub fn start(
        config: SessionConfig,
        tunables: SessionTunables,
        guard: GuardConfig,
        transcriber: Box<dyn Transcriber>,
        summarizer: Summarizer,
        csv_lock: CsvLock,
        meeting_folders: bool,
    ) -> Arc<Self> {
        let summarizer = Arc::new(summarizer);
        let unmapped_chunks = Arc::new(AtomicUsize::new(0));

        // Capacity covers the backpressure bound; a client that keeps pushing
        // past repeated 429s eventually blocks here rather than losing audio.
        let (chunk_tx, chunk_rx) =
            mpsc::channel::<TranscriptChunk>(tunables.max_queue_depth.max(1) + 1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let writer = OutputWriter::new(
            &config.output_dir,
            &config.csv_export_path,
            config.append_csv,
            meeting_folders,
        );

        let worker = spawn_map_worker(
            config.session_id.clone(),
            summarizer.clone(),
            chunk_rx,
            shutdown_rx,
            unmapped_chunks.clone(),
        );

        let chunk_duration_seconds = config.chunk_duration_seconds;

        Arc::new(Self {
            config,
            tunables,
            guard,
            state: RwLock::new(SessionState::Active),
            stt: Arc::new(Mutex::new(Some(transcriber))),
            buffer: Mutex::new(TranscriptBuffer::new(chunk_duration_seconds)),
            counters: Mutex::new(Counters {
                total_audio_seconds: 0.0,
            }),
            unmapped_chunks,
            chunk_tx: Mutex::new(Some(chunk_tx)),
            worker: Mutex::new(Some(worker)),
            shutdown_tx,
            summarizer,
            writer,
            csv_lock,
            outcome: Mutex::new(None),
            stop_lock: Mutex::new(()),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.session_id
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Cached terminal result, if the session has reached one.
    pub async fn outcome(&self) -> Option<SessionOutcome> {
        self.outcome.lock().await.clone()
    }

    /// Ingest one audio chunk: decode, transcribe, buffer, then report
    /// backpressure. Decode failures leave the session untouched.
    pub async fn push_chunk(&self, pcm_b64: &str, sample_rate: u32) -> Result<PushOutcome> {
        match *self.state.read().await {
            SessionState::Active => {}
            SessionState::Starting => {
                return Err(EngineError::SessionNotReady {
                    session_id: self.config.session_id.clone(),
                })
            }
            _ => {
                return Err(EngineError::SessionAlreadyStopped {
                    session_id: self.config.session_id.clone(),
                })
            }
        }

        let samples = audio::decode_pcm(pcm_b64, sample_rate)?;
        if sample_rate != self.config.sample_rate {
            return Err(EngineError::invalid_audio(format!(
                "sample_rate {} differs from session capture rate {}",
                sample_rate, self.config.sample_rate
            )));
        }
        let chunk_seconds = audio::duration_seconds(samples.len(), sample_rate);

        // STT work is CPU-bound and per-session serialized; the soft deadline
        // fails the request but leaves the session active.
        let guard = self.stt.clone().lock_owned().await;
        let push_task = tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            match guard.as_mut() {
                Some(backend) => {
                    let segments = backend.push(&samples);
                    let buffered = backend.buffered_seconds();
                    (segments, buffered)
                }
                None => (Ok(Vec::new()), 0.0),
            }
        });

        let (segments, buffered_seconds) = match timeout(self.tunables.push_deadline, push_task)
            .await
        {
            Err(_) => {
                return Err(EngineError::SttBackendFailure {
                    message: format!(
                        "transcription exceeded the {}s deadline",
                        self.tunables.push_deadline.as_secs()
                    ),
                })
            }
            Ok(Err(join_err)) => {
                return Err(EngineError::internal(format!(
                    "STT task failed: {join_err}"
                )))
            }
            Ok(Ok((segments, buffered))) => (segments?, buffered),
        };

        let queue_depth = {
            let mut buffer = self.buffer.lock().await;
            for segment in segments {
                if let Some(chunk) = buffer.add(segment) {
                    self.enqueue_chunk(chunk).await?;
                }
            }
            buffer.pending_len() + self.unmapped_chunks.load(Ordering::SeqCst)
        };

        {
            let mut counters = self.counters.lock().await;
            counters.total_audio_seconds += chunk_seconds;
        }

        if queue_depth > self.tunables.max_queue_depth {
            return Err(EngineError::EngineOverloaded {
                depth: queue_depth,
                limit: self.tunables.max_queue_depth,
            });
        }

        Ok(PushOutcome {
            buffered_seconds,
            queue_depth,
        })
    }

    /// Stop the session: drain STT and the MAP queue, run REDUCE and
    /// extraction (or the low-content guard), persist artifacts.
    ///
    /// Idempotent for terminal sessions.
    pub async fn stop(&self) -> Result<StopResult> {
        let _stop_guard = self.stop_lock.lock().await;

        if let Some(outcome) = self.outcome.lock().await.clone() {
            return Ok(StopResult {
                outcome,
                already_stopped: true,
            });
        }

        {
            let mut state = self.state.write().await;
            if state.is_terminal() {
                // Terminal without a cached outcome only happens for aborts.
                let outcome = SessionOutcome {
                    state: *state,
                    paths: ArtifactPaths::default(),
                };
                return Ok(StopResult {
                    outcome,
                    already_stopped: true,
                });
            }
            *state = SessionState::Stopping;
        }

        // Flush whatever the backend still holds; stop-path STT faults are
        // absorbed so the collected transcript can still be summarized. The
        // backend is taken out of the session and dropped after the flush.
        let guard = self.stt.clone().lock_owned().await;
        let flush_task = tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            match guard.take() {
                Some(mut backend) => backend.flush(),
                None => Ok(Vec::new()),
            }
        });
        match flush_task.await {
            Ok(Ok(segments)) => {
                let mut buffer = self.buffer.lock().await;
                for segment in segments {
                    if let Some(chunk) = buffer.add(segment) {
                        self.enqueue_chunk(chunk).await?;
                    }
                }
            }
            Ok(Err(err)) => warn!(session_id = %self.config.session_id, error = %err, "STT flush failed at stop"),
            Err(err) => warn!(session_id = %self.config.session_id, error = %err, "STT flush task failed at stop"),
        }

        if let Some(chunk) = self.buffer.lock().await.force_finalize() {
            self.enqueue_chunk(chunk).await?;
        }

        // Closing the sender lets the worker drain the queue and exit.
        self.chunk_tx.lock().await.take();

        let worker = self.worker.lock().await.take();
        let chunk_summaries = match worker {
            None => Vec::new(),
            Some(mut handle) => match timeout(self.tunables.stop_drain_timeout, &mut handle).await {
                Ok(Ok(summaries)) => summaries,
                Ok(Err(join_err)) => {
                    self.finish(SessionState::Failed, ArtifactPaths::default())
                        .await;
                    return Err(EngineError::internal(format!(
                        "MAP worker panicked: {join_err}"
                    )));
                }
                Err(_) => {
                    handle.abort();
                    self.finish(SessionState::Failed, ArtifactPaths::default())
                        .await;
                    return Err(EngineError::MapStall {
                        timeout_secs: self.tunables.stop_drain_timeout.as_secs(),
                    });
                }
            },
        };

        let (full_text, chunk_count, total_segments) = {
            let buffer = self.buffer.lock().await;
            (
                buffer.full_text().to_string(),
                buffer.chunk_count(),
                buffer.total_segments(),
            )
        };

        let low_content = chunk_summaries.is_empty()
            || is_low_content(&full_text, &self.guard);

        let (state, summary, data) = if low_content {
            (
                SessionState::InsufficientContent,
                NO_CONTENT_SUMMARY.to_string(),
                MeetingData::empty(),
            )
        } else {
            // A persistently failing REDUCE is unrecoverable for the session.
            let summary = match self.summarizer.reduce(&chunk_summaries).await {
                Ok(summary) => summary,
                Err(err) => {
                    self.finish(SessionState::Failed, ArtifactPaths::default())
                        .await;
                    return Err(err);
                }
            };
            let data = self.summarizer.extract(&chunk_summaries).await;
            (SessionState::Completed, summary, data)
        };

        // The transcript is only needed up to REDUCE; release it now.
        *self.buffer.lock().await = TranscriptBuffer::new(self.config.chunk_duration_seconds);

        let (paths, write_result) = self
            .writer
            .write_artifacts(&summary, &data, Local::now(), &self.csv_lock)
            .await;

        let audio_seconds = self.counters.lock().await.total_audio_seconds;
        info!(
            session_id = %self.config.session_id,
            backend = %self.config.backend,
            llm_model = %self.config.llm_model,
            audio_seconds,
            segments = total_segments,
            chunks = chunk_count,
            summaries = chunk_summaries.len(),
            status = state.as_str(),
            "session finished"
        );

        self.finish(state, paths.clone()).await;

        write_result?;

        Ok(StopResult {
            outcome: SessionOutcome { state, paths },
            already_stopped: false,
        })
    }

    /// Abort on process shutdown: mark failed, stop the worker, and write a
    /// best-effort partial summary of whatever MAP already produced.
    pub async fn abort(&self) {
        {
            let mut state = self.state.write().await;
            if state.is_terminal() {
                return;
            }
            *state = SessionState::Failed;
        }

        let _ = self.shutdown_tx.send(true);
        self.chunk_tx.lock().await.take();
        self.stt.lock().await.take();

        let worker = self.worker.lock().await.take();
        let summaries = match worker {
            Some(mut handle) => {
                match timeout(std::time::Duration::from_secs(2), &mut handle).await {
                    Ok(Ok(summaries)) => summaries,
                    Ok(Err(_)) => Vec::new(),
                    Err(_) => {
                        handle.abort();
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };

        let mut paths = ArtifactPaths::default();
        if !summaries.is_empty() {
            paths.summary_path = self
                .writer
                .write_partial_summary(&summaries.join("\n\n"), Local::now());
        }

        warn!(session_id = %self.config.session_id, "session aborted by shutdown");
        self.finish(SessionState::Failed, paths).await;
    }

    async fn finish(&self, state: SessionState, paths: ArtifactPaths) {
        *self.state.write().await = state;
        *self.outcome.lock().await = Some(SessionOutcome { state, paths });
    }

    async fn enqueue_chunk(&self, chunk: TranscriptChunk) -> Result<()> {
        let tx = self.chunk_tx.lock().await.clone();
        match tx {
            Some(tx) => {
                self.unmapped_chunks.fetch_add(1, Ordering::SeqCst);
                tx.send(chunk).await.map_err(|_| {
                    self.unmapped_chunks.fetch_sub(1, Ordering::SeqCst);
                    EngineError::internal("MAP queue closed while session active")
                })
            }
            None => Err(EngineError::internal(
                "MAP queue closed while session active",
            )),
        }
    }
}

/// One long-lived MAP task per session: chunks in sealing order, one LLM
/// call at a time, summaries out in the same order.
fn spawn_map_worker(
    session_id: String,
    summarizer: Arc<Summarizer>,
    mut chunk_rx: mpsc::Receiver<TranscriptChunk>,
    mut shutdown_rx: watch::Receiver<bool>,
    unmapped_chunks: Arc<AtomicUsize>,
) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut summaries = Vec::new();
        loop {
            tokio::select! {
                maybe_chunk = chunk_rx.recv() => match maybe_chunk {
                    Some(chunk) => {
                        let text = chunk.text();
                        let summary = summarizer.map(&text).await;
                        summaries.push(summary);
                        unmapped_chunks.fetch_sub(1, Ordering::SeqCst);
                    }
                    // Sender dropped and queue drained: normal stop path.
                    None => break,
                },
                _ = shutdown_rx.changed() => {
                    warn!(session_id = %session_id, "MAP worker shut down early");
                    break;
                }
            }
        }
        summaries
    })
}

/// Low-content heuristic: a short transcript dominated by filler phrases.
fn is_low_content(full_text: &str, guard: &GuardConfig) -> bool {
    let normalized = full_text.to_lowercase();
    let words: Vec<&str> = normalized
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect();

    if words.is_empty() {
        return true;
    }
    if words.len() >= guard.min_words {
        return false;
    }

    let mut filler_words = 0usize;
    let mut i = 0usize;
    while i < words.len() {
        let mut matched = 0usize;
        for phrase in FILLER_PHRASES {
            let parts: Vec<&str> = phrase.split_whitespace().collect();
            if i + parts.len() <= words.len() && words[i..i + parts.len()] == parts[..] {
                matched = matched.max(parts.len());
            }
        }
        if matched > 0 {
            filler_words += matched;
            i += matched;
        } else {
            i += 1;
        }
    }

    filler_words as f64 / words.len() as f64 >= guard.filler_dominance
}
