//! Session state and status events for front ends.
//!
//! Front ends (dashboard, desktop window) consume two broadcast channels:
//! committed [`TranscriptSegment`](crate::pipeline::TranscriptSegment)s and
//! [`SessionStatusEvent`]s. Both serialize to camelCase/lowercase JSON so
//! web consumers can use them directly.

use serde::{Deserialize, Serialize};

/// Lifecycle of one recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session active.
    Idle,
    /// Choosing a capture device for the requested source mode.
    Resolving,
    /// Stream open, scheduler and recognition workers running.
    Recording,
    /// Stop requested; flushing the final chunk and draining recognition.
    Stopping,
    /// Transcript complete and returned.
    Finalized,
    /// Unrecoverable capture failure — the session must be restarted.
    Failed,
}

/// Emitted whenever the session changes state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub state: SessionState,
    /// Optional human-readable detail (e.g. the capture error).
    pub detail: Option<String>,
}
