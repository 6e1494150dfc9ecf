//! Concurrent chunk recognition with ordered reassembly.
//!
//! ## Pipeline stages (per chunk)
//!
//! ```text
//! 1. submit() registers the sequence number with the collector
//!    (deadline = now + chunk_timeout) and enqueues the chunk
//! 2. A worker serializes the chunk to the canonical WAV container
//! 3. Primary backend recognizes; on Unreachable, one retry against
//!    the fallback backend
//! 4. The collector resolves the sequence in the reorder stage and
//!    releases segments in contiguous ascending order only
//! ```
//!
//! Recognition calls are blocking network/CPU work, so they run on a small
//! fixed pool of worker threads, never on the capture thread. The collector
//! thread is the single writer of the transcript; everything else observes
//! it through snapshots or the broadcast channel.

pub mod reorder;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::audio::wav;
use crate::buffering::chunk::AudioChunk;
use crate::error::Result;
use crate::pipeline::reorder::{ReorderStage, Resolution};
use crate::recognition::{normalize_text, RecognitionBackend, RecognitionError};

/// Which backend produced a segment's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentOrigin {
    Primary,
    Fallback,
}

/// One committed piece of the transcript.
///
/// Segments are only ever appended in ascending `seq` order; gaps mark
/// chunks that recognized as silence or were abandoned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    /// The chunk's window number.
    pub seq: u64,
    /// Normalized recognized text, never empty.
    pub text: String,
    pub origin: SegmentOrigin,
    /// When the segment was committed, not when the audio was captured.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Recognition worker threads. Backends block, so this bounds the
    /// number of concurrent backend calls.
    pub workers: usize,
    /// Overall per-chunk budget covering queue wait plus recognition.
    /// A chunk past its deadline is abandoned as empty text so later
    /// sequences are not blocked indefinitely.
    pub chunk_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            chunk_timeout: Duration::from_secs(15),
        }
    }
}

pub struct PipelineDiagnostics {
    pub chunks_submitted: AtomicU64,
    pub samples_windowed: AtomicU64,
    pub recognition_calls: AtomicU64,
    pub fallback_calls: AtomicU64,
    pub recognition_failures: AtomicU64,
    pub segments_committed: AtomicU64,
    pub segments_suppressed: AtomicU64,
    pub chunks_timed_out: AtomicU64,
    pub late_results: AtomicU64,
}

impl Default for PipelineDiagnostics {
    fn default() -> Self {
        Self {
            chunks_submitted: AtomicU64::new(0),
            samples_windowed: AtomicU64::new(0),
            recognition_calls: AtomicU64::new(0),
            fallback_calls: AtomicU64::new(0),
            recognition_failures: AtomicU64::new(0),
            segments_committed: AtomicU64::new(0),
            segments_suppressed: AtomicU64::new(0),
            chunks_timed_out: AtomicU64::new(0),
            late_results: AtomicU64::new(0),
        }
    }
}

impl PipelineDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            chunks_submitted: self.chunks_submitted.load(Ordering::Relaxed),
            samples_windowed: self.samples_windowed.load(Ordering::Relaxed),
            recognition_calls: self.recognition_calls.load(Ordering::Relaxed),
            fallback_calls: self.fallback_calls.load(Ordering::Relaxed),
            recognition_failures: self.recognition_failures.load(Ordering::Relaxed),
            segments_committed: self.segments_committed.load(Ordering::Relaxed),
            segments_suppressed: self.segments_suppressed.load(Ordering::Relaxed),
            chunks_timed_out: self.chunks_timed_out.load(Ordering::Relaxed),
            late_results: self.late_results.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub chunks_submitted: u64,
    pub samples_windowed: u64,
    pub recognition_calls: u64,
    pub fallback_calls: u64,
    pub recognition_failures: u64,
    pub segments_committed: u64,
    pub segments_suppressed: u64,
    pub chunks_timed_out: u64,
    pub late_results: u64,
}

enum CollectorMsg {
    /// A chunk entered the pipeline; its slot must exist before any result
    /// can arrive (guaranteed by channel FIFO order).
    Submitted { seq: u64, deadline: Instant },
    Done { seq: u64, result: WorkerResult },
    /// No further submissions; drain through results and deadline expiry.
    Drain,
}

struct WorkerResult {
    text: Option<String>,
    origin: SegmentOrigin,
}

/// Handle to a running recognition pipeline.
///
/// Dropping the handle without [`finish`](Self::finish) disconnects the
/// channels; the workers and collector drain what is queued and exit.
pub struct TranscriptionPipeline {
    jobs_tx: Option<Sender<AudioChunk>>,
    collector_tx: Option<Sender<CollectorMsg>>,
    done_rx: Receiver<()>,
    transcript: Arc<Mutex<Vec<TranscriptSegment>>>,
    diagnostics: Arc<PipelineDiagnostics>,
    chunk_timeout: Duration,
}

impl TranscriptionPipeline {
    /// Spawn the worker pool and the collector thread.
    ///
    /// `transcript` is the shared segment list the collector appends to
    /// (callers keep a clone for live snapshots); committed segments are
    /// additionally broadcast on `segments_tx`.
    pub fn spawn(
        config: PipelineConfig,
        primary: Arc<dyn RecognitionBackend>,
        fallback: Arc<dyn RecognitionBackend>,
        transcript: Arc<Mutex<Vec<TranscriptSegment>>>,
        segments_tx: broadcast::Sender<TranscriptSegment>,
    ) -> Result<Self> {
        let (jobs_tx, jobs_rx) = unbounded::<AudioChunk>();
        let (collector_tx, collector_rx) = unbounded::<CollectorMsg>();
        let (done_tx, done_rx) = bounded(1);
        let diagnostics = Arc::new(PipelineDiagnostics::default());

        for worker in 0..config.workers.max(1) {
            let jobs_rx = jobs_rx.clone();
            let results_tx = collector_tx.clone();
            let primary = Arc::clone(&primary);
            let fallback = Arc::clone(&fallback);
            let diagnostics = Arc::clone(&diagnostics);
            thread::Builder::new()
                .name(format!("confab-recog-{worker}"))
                .spawn(move || run_worker(jobs_rx, results_tx, primary, fallback, diagnostics))?;
        }

        {
            let transcript = Arc::clone(&transcript);
            let diagnostics = Arc::clone(&diagnostics);
            thread::Builder::new()
                .name("confab-collect".into())
                .spawn(move || {
                    run_collector(collector_rx, transcript, diagnostics, segments_tx, done_tx)
                })?;
        }

        Ok(Self {
            jobs_tx: Some(jobs_tx),
            collector_tx: Some(collector_tx),
            done_rx,
            transcript,
            diagnostics,
            chunk_timeout: config.chunk_timeout,
        })
    }

    /// Hand a chunk to the worker pool. Registration with the collector
    /// happens first so the sequence slot exists before any result.
    pub fn submit(&self, chunk: AudioChunk) {
        self.diagnostics
            .chunks_submitted
            .fetch_add(1, Ordering::Relaxed);
        self.diagnostics
            .samples_windowed
            .fetch_add(chunk.samples.len() as u64, Ordering::Relaxed);

        let deadline = Instant::now() + self.chunk_timeout;
        if let Some(tx) = &self.collector_tx {
            let _ = tx.send(CollectorMsg::Submitted {
                seq: chunk.seq,
                deadline,
            });
        }
        if let Some(tx) = &self.jobs_tx {
            let _ = tx.send(chunk);
        }
    }

    /// Snapshot of the segments committed so far, in sequence order.
    pub fn transcript_snapshot(&self) -> Vec<TranscriptSegment> {
        self.transcript.lock().clone()
    }

    pub fn diagnostics(&self) -> &Arc<PipelineDiagnostics> {
        &self.diagnostics
    }

    /// Stop accepting chunks and wait up to `grace` for every in-flight
    /// sequence to resolve or be abandoned at its deadline.
    ///
    /// Workers past the grace are not joined; a result arriving after the
    /// collector has exited is silently dropped. Returns the final ordered
    /// transcript.
    pub fn finish(mut self, grace: Duration) -> Vec<TranscriptSegment> {
        // Workers drain the remaining queued chunks, then exit.
        self.jobs_tx.take();
        if let Some(tx) = self.collector_tx.take() {
            let _ = tx.send(CollectorMsg::Drain);
        }
        if self.done_rx.recv_timeout(grace).is_err() {
            warn!("recognition grace period elapsed, abandoning in-flight chunks");
        }
        self.transcript.lock().clone()
    }
}

fn run_worker(
    jobs_rx: Receiver<AudioChunk>,
    results_tx: Sender<CollectorMsg>,
    primary: Arc<dyn RecognitionBackend>,
    fallback: Arc<dyn RecognitionBackend>,
    diagnostics: Arc<PipelineDiagnostics>,
) {
    for chunk in jobs_rx.iter() {
        let seq = chunk.seq;
        let result = recognize_chunk(&chunk, primary.as_ref(), fallback.as_ref(), &diagnostics);
        // A failed send means the collector already exited; the session is
        // tearing down and the result is discarded.
        let _ = results_tx.send(CollectorMsg::Done { seq, result });
    }
}

/// One recognition attempt with the explicit fallback policy: retry on
/// `Unreachable` only, absorb `Unrecognized` as silence.
fn recognize_chunk(
    chunk: &AudioChunk,
    primary: &dyn RecognitionBackend,
    fallback: &dyn RecognitionBackend,
    diagnostics: &PipelineDiagnostics,
) -> WorkerResult {
    let wav = match wav::encode_chunk(chunk) {
        Ok(bytes) => bytes,
        Err(e) => {
            diagnostics
                .recognition_failures
                .fetch_add(1, Ordering::Relaxed);
            warn!(seq = chunk.seq, error = %e, "chunk could not be serialized for recognition");
            return WorkerResult {
                text: None,
                origin: SegmentOrigin::Primary,
            };
        }
    };

    diagnostics
        .recognition_calls
        .fetch_add(1, Ordering::Relaxed);

    match primary.recognize(&wav, chunk.sample_rate) {
        Ok(text) => WorkerResult {
            text: normalize_text(&text),
            origin: SegmentOrigin::Primary,
        },
        Err(RecognitionError::Unrecognized) => {
            debug!(seq = chunk.seq, backend = primary.name(), "no speech in chunk");
            WorkerResult {
                text: None,
                origin: SegmentOrigin::Primary,
            }
        }
        Err(RecognitionError::Unreachable(reason)) => {
            warn!(
                seq = chunk.seq,
                backend = primary.name(),
                %reason,
                "primary backend unreachable, retrying on fallback"
            );
            diagnostics.fallback_calls.fetch_add(1, Ordering::Relaxed);
            match fallback.recognize(&wav, chunk.sample_rate) {
                Ok(text) => WorkerResult {
                    text: normalize_text(&text),
                    origin: SegmentOrigin::Fallback,
                },
                Err(RecognitionError::Unrecognized) => WorkerResult {
                    text: None,
                    origin: SegmentOrigin::Fallback,
                },
                Err(RecognitionError::Unreachable(reason)) => {
                    diagnostics
                        .recognition_failures
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        seq = chunk.seq,
                        backend = fallback.name(),
                        %reason,
                        "fallback backend unreachable too, absorbing chunk as silence"
                    );
                    WorkerResult {
                        text: None,
                        origin: SegmentOrigin::Fallback,
                    }
                }
            }
        }
    }
}

fn run_collector(
    results_rx: Receiver<CollectorMsg>,
    transcript: Arc<Mutex<Vec<TranscriptSegment>>>,
    diagnostics: Arc<PipelineDiagnostics>,
    segments_tx: broadcast::Sender<TranscriptSegment>,
    done_tx: Sender<()>,
) {
    const IDLE_TICK: Duration = Duration::from_millis(100);

    let mut stage: ReorderStage<(String, SegmentOrigin)> = ReorderStage::new(0);
    let mut draining = false;
    let mut disconnected = false;

    loop {
        let now = Instant::now();
        let expired = stage.expire_due(now);
        if expired > 0 {
            diagnostics
                .chunks_timed_out
                .fetch_add(expired as u64, Ordering::Relaxed);
            warn!(expired, "abandoned chunks past their recognition deadline");
        }
        commit_released(&mut stage, &transcript, &diagnostics, &segments_tx);

        if (draining || disconnected) && stage.is_drained() {
            break;
        }

        let wait = stage
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
            .unwrap_or(IDLE_TICK);

        if disconnected {
            // Only deadline expiry can make progress now.
            thread::sleep(wait.min(IDLE_TICK));
            continue;
        }

        match results_rx.recv_timeout(wait) {
            Ok(CollectorMsg::Submitted { seq, deadline }) => stage.note_submitted(seq, deadline),
            Ok(CollectorMsg::Done { seq, result }) => {
                let payload = result.text.map(|text| (text, result.origin));
                if stage.resolve(seq, payload) == Resolution::Late {
                    diagnostics.late_results.fetch_add(1, Ordering::Relaxed);
                    debug!(seq, "discarded late result for an abandoned chunk");
                }
            }
            Ok(CollectorMsg::Drain) => draining = true,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => disconnected = true,
        }
    }

    let snap = diagnostics.snapshot();
    info!(
        chunks = snap.chunks_submitted,
        committed = snap.segments_committed,
        suppressed = snap.segments_suppressed,
        timed_out = snap.chunks_timed_out,
        fallback_calls = snap.fallback_calls,
        failures = snap.recognition_failures,
        "recognition collector drained"
    );
    let _ = done_tx.send(());
}

fn commit_released(
    stage: &mut ReorderStage<(String, SegmentOrigin)>,
    transcript: &Mutex<Vec<TranscriptSegment>>,
    diagnostics: &PipelineDiagnostics,
    segments_tx: &broadcast::Sender<TranscriptSegment>,
) {
    for (seq, payload) in stage.release_ready() {
        match payload {
            Some((text, origin)) => {
                let segment = TranscriptSegment {
                    seq,
                    text,
                    origin,
                    timestamp: Utc::now(),
                };
                transcript.lock().push(segment.clone());
                diagnostics
                    .segments_committed
                    .fetch_add(1, Ordering::Relaxed);
                debug!(seq, origin = ?segment.origin, "transcript segment committed");
                let _ = segments_tx.send(segment);
            }
            None => {
                diagnostics
                    .segments_suppressed
                    .fetch_add(1, Ordering::Relaxed);
                debug!(seq, "empty recognition result suppressed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Clone, Copy)]
    enum Reply {
        Text(&'static str, Duration),
        Silence,
        Unreachable,
    }

    /// Backend scripted by chunk length, so the reply is deterministic
    /// regardless of which worker picks the chunk up.
    struct ScriptedBackend {
        label: &'static str,
        by_len: HashMap<usize, Reply>,
    }

    impl ScriptedBackend {
        fn new(label: &'static str, replies: &[(usize, Reply)]) -> Arc<Self> {
            Arc::new(Self {
                label,
                by_len: replies.iter().copied().collect(),
            })
        }
    }

    impl RecognitionBackend for ScriptedBackend {
        fn recognize(
            &self,
            wav_bytes: &[u8],
            _sample_rate: u32,
        ) -> std::result::Result<String, RecognitionError> {
            let pcm = wav::decode(wav_bytes)
                .map_err(|e| RecognitionError::Unreachable(e.to_string()))?;
            match self.by_len.get(&pcm.samples.len()) {
                Some(Reply::Text(text, delay)) => {
                    thread::sleep(*delay);
                    Ok(text.to_string())
                }
                Some(Reply::Silence) => Err(RecognitionError::Unrecognized),
                Some(Reply::Unreachable) | None => {
                    Err(RecognitionError::Unreachable("scripted outage".into()))
                }
            }
        }

        fn name(&self) -> &'static str {
            self.label
        }
    }

    fn chunk(seq: u64, len: usize) -> AudioChunk {
        AudioChunk {
            seq,
            samples: vec![0.25; len],
            sample_rate: 16_000,
            channels: 1,
            start_offset: 0,
            end_offset: len as u64,
        }
    }

    fn spawn_pipeline(
        config: PipelineConfig,
        primary: Arc<dyn RecognitionBackend>,
        fallback: Arc<dyn RecognitionBackend>,
    ) -> (
        TranscriptionPipeline,
        broadcast::Receiver<TranscriptSegment>,
    ) {
        let (segments_tx, segments_rx) = broadcast::channel(64);
        let transcript = Arc::new(Mutex::new(Vec::new()));
        let pipeline =
            TranscriptionPipeline::spawn(config, primary, fallback, transcript, segments_tx)
                .expect("spawn pipeline");
        (pipeline, segments_rx)
    }

    #[test]
    fn segments_release_in_sequence_order_under_latency_jitter() {
        let primary = ScriptedBackend::new(
            "primary",
            &[
                (100, Reply::Text("hello", Duration::from_millis(80))),
                (200, Reply::Text("world", Duration::from_millis(5))),
                (300, Reply::Text("test", Duration::from_millis(30))),
            ],
        );
        let fallback = ScriptedBackend::new("fallback", &[]);
        let (pipeline, _rx) = spawn_pipeline(PipelineConfig::default(), primary, fallback);

        pipeline.submit(chunk(0, 100));
        pipeline.submit(chunk(1, 200));
        pipeline.submit(chunk(2, 300));

        let transcript = pipeline.finish(Duration::from_secs(5));
        let seqs: Vec<u64> = transcript.iter().map(|s| s.seq).collect();
        let texts: Vec<&str> = transcript.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(texts, vec!["Hello.", "World.", "Test."]);
        assert!(transcript
            .iter()
            .all(|s| s.origin == SegmentOrigin::Primary));
    }

    #[test]
    fn unreachable_primary_fails_over_to_fallback_once() {
        let primary = ScriptedBackend::new("primary", &[(100, Reply::Unreachable)]);
        let fallback = ScriptedBackend::new(
            "fallback",
            &[(100, Reply::Text("offline copy", Duration::ZERO))],
        );
        let (pipeline, _rx) = spawn_pipeline(PipelineConfig::default(), primary, fallback);
        let diagnostics = Arc::clone(pipeline.diagnostics());

        pipeline.submit(chunk(0, 100));
        let transcript = pipeline.finish(Duration::from_secs(5));

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].text, "Offline copy.");
        assert_eq!(transcript[0].origin, SegmentOrigin::Fallback);
        let snap = diagnostics.snapshot();
        assert_eq!(snap.recognition_calls, 1);
        assert_eq!(snap.fallback_calls, 1);
        assert_eq!(snap.recognition_failures, 0);
    }

    #[test]
    fn unrecognized_chunks_are_suppressed_without_blocking_later_ones() {
        let primary = ScriptedBackend::new(
            "primary",
            &[
                (100, Reply::Silence),
                (200, Reply::Text("after the pause", Duration::ZERO)),
            ],
        );
        let fallback = ScriptedBackend::new("fallback", &[]);
        let (pipeline, _rx) = spawn_pipeline(PipelineConfig::default(), primary, fallback);
        let diagnostics = Arc::clone(pipeline.diagnostics());

        pipeline.submit(chunk(0, 100));
        pipeline.submit(chunk(1, 200));
        let transcript = pipeline.finish(Duration::from_secs(5));

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].seq, 1);
        assert_eq!(transcript[0].text, "After the pause.");
        assert_eq!(diagnostics.snapshot().segments_suppressed, 1);
    }

    #[test]
    fn both_backends_unreachable_is_absorbed_not_fatal() {
        let primary = ScriptedBackend::new("primary", &[]);
        let fallback = ScriptedBackend::new("fallback", &[]);
        let (pipeline, _rx) = spawn_pipeline(PipelineConfig::default(), primary, fallback);
        let diagnostics = Arc::clone(pipeline.diagnostics());

        pipeline.submit(chunk(0, 100));
        let transcript = pipeline.finish(Duration::from_secs(5));

        assert!(transcript.is_empty());
        let snap = diagnostics.snapshot();
        assert_eq!(snap.recognition_failures, 1);
        assert_eq!(snap.segments_suppressed, 1);
    }

    #[test]
    fn timed_out_chunk_releases_its_slot() {
        let primary = ScriptedBackend::new(
            "primary",
            &[
                (100, Reply::Text("slow", Duration::from_millis(400))),
                (200, Reply::Text("fast", Duration::ZERO)),
            ],
        );
        let fallback = ScriptedBackend::new("fallback", &[]);
        let config = PipelineConfig {
            workers: 2,
            chunk_timeout: Duration::from_millis(60),
        };
        let (pipeline, _rx) = spawn_pipeline(config, primary, fallback);
        let diagnostics = Arc::clone(pipeline.diagnostics());

        pipeline.submit(chunk(0, 100));
        pipeline.submit(chunk(1, 200));
        let transcript = pipeline.finish(Duration::from_secs(5));

        // Sequence 0 was abandoned at its deadline; sequence 1 still commits.
        let texts: Vec<&str> = transcript.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Fast."]);
        assert_eq!(diagnostics.snapshot().chunks_timed_out, 1);
    }

    #[test]
    fn committed_segments_are_broadcast_live() {
        let primary = ScriptedBackend::new(
            "primary",
            &[(100, Reply::Text("broadcast me", Duration::ZERO))],
        );
        let fallback = ScriptedBackend::new("fallback", &[]);
        let (pipeline, mut rx) = spawn_pipeline(PipelineConfig::default(), primary, fallback);

        pipeline.submit(chunk(0, 100));
        pipeline.finish(Duration::from_secs(5));

        let segment = rx.try_recv().expect("segment broadcast");
        assert_eq!(segment.seq, 0);
        assert_eq!(segment.text, "Broadcast me.");
    }

    #[test]
    fn diagnostics_account_for_submissions_and_samples() {
        let primary = ScriptedBackend::new(
            "primary",
            &[
                (100, Reply::Text("one", Duration::ZERO)),
                (200, Reply::Text("two", Duration::ZERO)),
            ],
        );
        let fallback = ScriptedBackend::new("fallback", &[]);
        let (pipeline, _rx) = spawn_pipeline(PipelineConfig::default(), primary, fallback);
        let diagnostics = Arc::clone(pipeline.diagnostics());

        pipeline.submit(chunk(0, 100));
        pipeline.submit(chunk(1, 200));
        pipeline.finish(Duration::from_secs(5));

        let snap = diagnostics.snapshot();
        assert_eq!(snap.chunks_submitted, 2);
        assert_eq!(snap.samples_windowed, 300);
        assert_eq!(snap.recognition_calls, 2);
        assert_eq!(snap.segments_committed, 2);
    }
}
