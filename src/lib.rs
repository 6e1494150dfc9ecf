//! # confab
//!
//! Live meeting capture and incremental transcription engine.
//!
//! ## Architecture
//!
//! ```text
//! resolve(mode) → capture callback → FrameBuffer (bounded, drop-oldest)
//!                                          │
//!                                   ChunkScheduler (1 s windows, seq-numbered)
//!                                          │
//!                              worker pool (primary ⇢ fallback backend)
//!                                          │
//!                          reorder stage → ordered transcript + broadcasts
//! ```
//!
//! The audio callback never blocks: it slices driver buffers into frames
//! and hands them off with a non-blocking push. Everything else — windowing,
//! recognition, reassembly — happens on background threads, and the
//! transcript is only ever appended in ascending sequence order.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod error;
pub mod pipeline;
pub mod recognition;
pub mod session;
pub mod storage;

// Convenience re-exports for downstream crates
pub use audio::catalog::{AudioDevice, DeviceCatalog, StaticCatalog};
pub use audio::resolver::{DegradationWarning, DeviceSelection, SourceMode};
pub use error::{ConfabError, Result};
pub use pipeline::{PipelineConfig, SegmentOrigin, TranscriptSegment};
pub use session::events::{SessionState, SessionStatusEvent};
pub use session::{FinalTranscript, SessionConfig, SessionController, SessionHandle};
pub use storage::TranscriptStore;

#[cfg(feature = "audio-cpal")]
pub use audio::catalog::CpalCatalog;
