//! Session lifecycle and component wiring.
//!
//! ## Lifecycle
//!
//! ```text
//! SessionController::start(mode)
//!     └─► resolve device → spawn pipeline → spawn capture thread
//!         (stream opened there, confirmed over a channel) → Recording
//!             └─► stop(handle) → shutdown signal → final chunk flushed
//!                 → recognition drained within the grace period → Finalized
//! ```
//!
//! ## Threading
//!
//! The capture stream is `!Send` on most platforms, so it is created and
//! dropped on the dedicated capture thread, which also runs the scheduler
//! drive loop. Recognition runs on the pipeline's worker pool. The
//! collector thread is the sole writer of the transcript; session state
//! transitions belong to the controller, except the failure transition,
//! which the capture thread takes when the driver reports a stream error.

pub mod events;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::audio::catalog::DeviceCatalog;
use crate::audio::resolver::{self, DeviceSelection, SourceMode};
use crate::audio::{default_opener, CaptureOpener, FrameSink};
use crate::buffering::scheduler::{ChunkScheduler, SchedulerConfig};
use crate::buffering::{FrameBuffer, LevelMeter};
use crate::error::{ConfabError, Result};
use crate::pipeline::{
    DiagnosticsSnapshot, PipelineConfig, TranscriptSegment, TranscriptionPipeline,
};
use crate::recognition::RecognitionBackend;
use self::events::{SessionState, SessionStatusEvent};

/// Broadcast capacity for the transcript and status event surfaces.
const BROADCAST_CAP: usize = 256;

/// How long `start` waits for the capture thread to confirm the stream
/// opened before giving up.
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub scheduler: SchedulerConfig,
    pub pipeline: PipelineConfig,
    /// Samples per channel per capture frame.
    pub frame_len: usize,
    /// Hand-off buffer capacity in frames.
    pub buffer_frames: usize,
    /// Frames covered by the live level readout.
    pub level_window: usize,
    /// Drain-loop wait on the shutdown signal. Only bounds how promptly
    /// frames move out of the hand-off buffer; windowing itself is driven
    /// by buffered-duration accounting.
    pub drain_tick: Duration,
    /// How long stop waits for in-flight recognition before abandoning it.
    pub stop_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            pipeline: PipelineConfig::default(),
            frame_len: 1024,
            buffer_frames: 256,
            level_window: 5,
            drain_tick: Duration::from_millis(20),
            stop_grace: Duration::from_secs(20),
        }
    }
}

/// The reconciled output of one finished session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalTranscript {
    /// Committed segments in ascending sequence order.
    pub segments: Vec<TranscriptSegment>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Frames evicted from the hand-off buffer under backpressure.
    pub dropped_frames: u64,
}

impl FinalTranscript {
    /// Segment texts joined into one string.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn word_count(&self) -> usize {
        self.text().split_whitespace().count()
    }

    pub fn char_count(&self) -> usize {
        self.text().chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// State shared between the controller, the capture thread and handles.
struct SessionShared {
    selection: DeviceSelection,
    state: Mutex<SessionState>,
    started_at: DateTime<Utc>,
    started: Instant,
    buffer: Arc<FrameBuffer>,
    meter: Arc<LevelMeter>,
    transcript: Arc<Mutex<Vec<TranscriptSegment>>>,
    diagnostics: Arc<crate::pipeline::PipelineDiagnostics>,
    last_error: Mutex<Option<String>>,
}

/// Cheap cloneable view of the active session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    pub fn device_selection(&self) -> &DeviceSelection {
        &self.shared.selection
    }

    /// Snapshot of the segments committed so far, safe during recording.
    pub fn live_transcript(&self) -> Vec<TranscriptSegment> {
        self.shared.transcript.lock().clone()
    }

    /// Instantaneous input level on a 0–100 scale, recomputed per poll
    /// over the most recently drained frames.
    pub fn audio_level(&self) -> f32 {
        self.shared.meter.level()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.shared.buffer.dropped()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }
}

struct ActiveSession {
    shared: Arc<SessionShared>,
    shutdown_tx: Sender<()>,
    done_rx: Receiver<()>,
}

/// Top-level orchestrator: one recording session at a time.
///
/// `SessionController` is `Send + Sync`; wrap it in an `Arc` to share
/// between a front end's command handlers and event forwarders.
pub struct SessionController {
    config: SessionConfig,
    catalog: Box<dyn DeviceCatalog>,
    opener: Arc<CaptureOpener>,
    primary: Arc<dyn RecognitionBackend>,
    fallback: Arc<dyn RecognitionBackend>,
    active: Mutex<Option<ActiveSession>>,
    transcript_tx: broadcast::Sender<TranscriptSegment>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        catalog: Box<dyn DeviceCatalog>,
        primary: Arc<dyn RecognitionBackend>,
        fallback: Arc<dyn RecognitionBackend>,
    ) -> Self {
        let (transcript_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            config,
            catalog,
            opener: Arc::new(default_opener()),
            primary,
            fallback,
            active: Mutex::new(None),
            transcript_tx,
            status_tx,
        }
    }

    /// Substitute the capture opener (scripted frame sources in tests,
    /// platform-specific loopback engines).
    pub fn with_opener(mut self, opener: CaptureOpener) -> Self {
        self.opener = Arc::new(opener);
        self
    }

    /// Subscribe to segments as they are committed to the transcript.
    pub fn subscribe_transcript(&self) -> broadcast::Receiver<TranscriptSegment> {
        self.transcript_tx.subscribe()
    }

    /// Subscribe to session state changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Resolve a device for `mode`, open capture and start recognizing.
    ///
    /// Blocks until the capture stream is confirmed open, then returns a
    /// handle to the recording session.
    ///
    /// # Errors
    /// - `ConfabError::AlreadyRecording` when a session is active.
    /// - `ConfabError::NoInputDeviceAvailable` from device resolution.
    /// - `ConfabError::Capture` when the stream cannot be opened.
    pub fn start(&self, mode: SourceMode) -> Result<SessionHandle> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(ConfabError::AlreadyRecording);
        }

        self.broadcast_state(SessionState::Resolving, None);
        let selection = match resolver::resolve(self.catalog.as_ref(), mode) {
            Ok(selection) => selection,
            Err(e) => {
                self.broadcast_state(SessionState::Failed, Some(e.to_string()));
                return Err(e);
            }
        };
        if let Some(warning) = selection.degradation {
            warn!(?warning, "session starting on a degraded capture route");
        }

        let buffer = Arc::new(FrameBuffer::new(self.config.buffer_frames));
        let meter = Arc::new(LevelMeter::new(self.config.level_window));
        let transcript = Arc::new(Mutex::new(Vec::new()));
        let pipeline = TranscriptionPipeline::spawn(
            self.config.pipeline.clone(),
            Arc::clone(&self.primary),
            Arc::clone(&self.fallback),
            Arc::clone(&transcript),
            self.transcript_tx.clone(),
        )?;

        let shared = Arc::new(SessionShared {
            selection,
            state: Mutex::new(SessionState::Resolving),
            started_at: Utc::now(),
            started: Instant::now(),
            buffer,
            meter,
            transcript,
            diagnostics: Arc::clone(pipeline.diagnostics()),
            last_error: Mutex::new(None),
        });

        let (shutdown_tx, shutdown_rx) = bounded(1);
        let (open_tx, open_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);

        let ctx = CaptureContext {
            opener: Arc::clone(&self.opener),
            config: self.config.clone(),
            shared: Arc::clone(&shared),
            pipeline,
            open_tx,
            shutdown_rx,
            done_tx,
            status_tx: self.status_tx.clone(),
        };
        thread::Builder::new()
            .name("confab-capture".into())
            .spawn(move || capture_loop(ctx))?;

        match open_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                *shared.state.lock() = SessionState::Recording;
                self.broadcast_state(SessionState::Recording, None);
                info!(
                    device = %shared.selection.device_name,
                    channels = shared.selection.channel_count,
                    "session recording"
                );
                *active = Some(ActiveSession {
                    shared: Arc::clone(&shared),
                    shutdown_tx,
                    done_rx,
                });
                Ok(SessionHandle { shared })
            }
            Ok(Err(e)) => {
                self.broadcast_state(SessionState::Failed, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                self.broadcast_state(
                    SessionState::Failed,
                    Some("capture thread did not confirm the stream open".into()),
                );
                Err(ConfabError::Capture(
                    "capture thread did not confirm the stream open".into(),
                ))
            }
        }
    }

    /// Stop the session `handle` belongs to and return the final ordered
    /// transcript.
    ///
    /// # Errors
    /// - `ConfabError::NotRecording` when no session is active.
    /// - `ConfabError::UnknownSession` when `handle` is stale.
    /// - `ConfabError::SessionFailed` when capture already failed.
    pub fn stop(&self, handle: &SessionHandle) -> Result<FinalTranscript> {
        let session = {
            let mut active = self.active.lock();
            match active.take() {
                None => return Err(ConfabError::NotRecording),
                Some(session) => {
                    if !Arc::ptr_eq(&session.shared, &handle.shared) {
                        *active = Some(session);
                        return Err(ConfabError::UnknownSession);
                    }
                    session
                }
            }
        };
        let shared = &session.shared;

        if *shared.state.lock() == SessionState::Failed {
            // The capture thread tore everything down already.
            let _ = session.done_rx.recv_timeout(self.config.stop_grace);
            return Err(self.session_failure(shared));
        }

        *shared.state.lock() = SessionState::Stopping;
        self.broadcast_state(SessionState::Stopping, None);
        info!("session stop requested");
        let _ = session.shutdown_tx.send(());

        // The capture thread itself waits up to stop_grace for recognition,
        // so allow it that plus a margin before abandoning it.
        let wait = self.config.stop_grace + Duration::from_secs(1);
        if session.done_rx.recv_timeout(wait).is_err() {
            warn!("capture thread exceeded the stop grace period, abandoning it");
        }

        if *shared.state.lock() == SessionState::Failed {
            return Err(self.session_failure(shared));
        }

        *shared.state.lock() = SessionState::Finalized;
        self.broadcast_state(SessionState::Finalized, None);

        let segments = shared.transcript.lock().clone();
        info!(
            segments = segments.len(),
            dropped_frames = shared.buffer.dropped(),
            "session finalized"
        );
        Ok(FinalTranscript {
            segments,
            started_at: shared.started_at,
            duration: shared.started.elapsed(),
            dropped_frames: shared.buffer.dropped(),
        })
    }

    fn session_failure(&self, shared: &SessionShared) -> ConfabError {
        let reason = shared
            .last_error
            .lock()
            .clone()
            .unwrap_or_else(|| "capture failed".into());
        ConfabError::SessionFailed(reason)
    }

    fn broadcast_state(&self, state: SessionState, detail: Option<String>) {
        let _ = self.status_tx.send(SessionStatusEvent { state, detail });
    }
}

struct CaptureContext {
    opener: Arc<CaptureOpener>,
    config: SessionConfig,
    shared: Arc<SessionShared>,
    pipeline: TranscriptionPipeline,
    open_tx: Sender<Result<()>>,
    shutdown_rx: Receiver<()>,
    done_tx: Sender<()>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
}

/// Body of the capture thread: open the stream, drive the scheduler until
/// shutdown or stream failure, then flush and drain recognition.
fn capture_loop(ctx: CaptureContext) {
    let CaptureContext {
        opener,
        config,
        shared,
        pipeline,
        open_tx,
        shutdown_rx,
        done_tx,
        status_tx,
    } = ctx;

    let sink = FrameSink::new(
        Arc::clone(&shared.buffer),
        shared.selection.channel_count,
        config.frame_len,
    );
    let (stream_err_tx, stream_err_rx) = unbounded::<String>();

    // The stream lives and dies on this thread (capture handles are !Send).
    let open = opener.as_ref();
    let mut stream = match open(&shared.selection, sink, stream_err_tx) {
        Ok(stream) => {
            let _ = open_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = open_tx.send(Err(e));
            pipeline.finish(Duration::from_secs(1));
            let _ = done_tx.send(());
            return;
        }
    };

    let mut scheduler = ChunkScheduler::new(
        config.scheduler.clone(),
        shared.selection.sample_rate,
        shared.selection.channel_count,
    );
    let mut scratch = Vec::new();
    let mut failure: Option<String> = None;

    loop {
        match shutdown_rx.recv_timeout(config.drain_tick) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        if let Ok(reason) = stream_err_rx.try_recv() {
            failure = Some(reason);
            break;
        }
        drain_and_submit(&shared, &mut scheduler, &mut scratch, &pipeline);
    }

    stream.close();

    if let Some(reason) = failure {
        error!(%reason, "capture stream failed, aborting session");
        *shared.state.lock() = SessionState::Failed;
        *shared.last_error.lock() = Some(reason.clone());
        let _ = status_tx.send(SessionStatusEvent {
            state: SessionState::Failed,
            detail: Some(reason),
        });
        pipeline.finish(config.stop_grace);
        let _ = done_tx.send(());
        return;
    }

    // Whatever the callback delivered before the stream closed still gets
    // windowed; the remainder becomes one final short chunk.
    drain_and_submit(&shared, &mut scheduler, &mut scratch, &pipeline);
    if let Some(last) = scheduler.flush() {
        debug!(
            seq = last.seq,
            samples = last.samples.len(),
            "flushing final short chunk"
        );
        pipeline.submit(last);
    }
    pipeline.finish(config.stop_grace);
    let _ = done_tx.send(());
}

fn drain_and_submit(
    shared: &SessionShared,
    scheduler: &mut ChunkScheduler,
    scratch: &mut Vec<crate::buffering::AudioFrame>,
    pipeline: &TranscriptionPipeline,
) {
    scratch.clear();
    shared.buffer.drain_into(scratch);
    for frame in scratch.drain(..) {
        shared.meter.record(frame.mean_abs());
        for chunk in scheduler.ingest(frame) {
            pipeline.submit(chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::catalog::{AudioDevice, StaticCatalog};
    use crate::pipeline::SegmentOrigin;
    use crate::recognition::stub::StubBackend;

    fn segment(seq: u64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            seq,
            text: text.to_string(),
            origin: SegmentOrigin::Primary,
            timestamp: Utc::now(),
        }
    }

    fn transcript(segments: Vec<TranscriptSegment>) -> FinalTranscript {
        FinalTranscript {
            segments,
            started_at: Utc::now(),
            duration: Duration::from_secs(3),
            dropped_frames: 0,
        }
    }

    fn mic_catalog() -> Box<StaticCatalog> {
        Box::new(StaticCatalog {
            devices: vec![AudioDevice {
                id: 0,
                name: "Microphone (USB PnP Audio Device)".into(),
                max_input_channels: 1,
                max_output_channels: 0,
                default_sample_rate: 44_100,
                host_api_id: 0,
            }],
            default_input: Some(0),
            default_output: None,
            loopback_capture: None,
        })
    }

    #[test]
    fn final_transcript_joins_text_and_counts() {
        let t = transcript(vec![segment(0, "Hello world."), segment(2, "Again.")]);
        assert_eq!(t.text(), "Hello world. Again.");
        assert_eq!(t.word_count(), 3);
        assert_eq!(t.char_count(), 19);
        assert!(!t.is_empty());
    }

    #[test]
    fn empty_transcript_counts_are_zero() {
        let t = transcript(Vec::new());
        assert_eq!(t.text(), "");
        assert_eq!(t.word_count(), 0);
        assert_eq!(t.char_count(), 0);
        assert!(t.is_empty());
    }

    #[test]
    fn failing_open_surfaces_capture_error_and_frees_the_slot() {
        let controller = SessionController::new(
            SessionConfig::default(),
            mic_catalog(),
            Arc::new(StubBackend::new()),
            Arc::new(StubBackend::new()),
        )
        .with_opener(Box::new(|_, _, _| {
            Err(ConfabError::Capture("no audio host".into()))
        }));

        for _ in 0..2 {
            // Open failure must not leave a half-started session behind.
            let err = controller.start(SourceMode::Microphone).unwrap_err();
            assert!(matches!(err, ConfabError::Capture(_)));
        }
    }
}
