//! Speech recognition backends.
//!
//! The [`RecognitionBackend`] trait decouples the pipeline from any
//! specific recognizer (HTTP service, local transcriber process, stub).
//! Backends are synchronous and blocking; the pipeline runs them on its
//! worker pool, never on the capture thread.
//!
//! The two-variant error enumeration is the whole fallback contract: the
//! pipeline retries a chunk against the fallback backend on `Unreachable`
//! only, and treats `Unrecognized` as legitimate silence.

pub mod command;
pub mod http;
pub mod stub;

use thiserror::Error;

/// Why a backend call produced no text.
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// The backend ran but found no intelligible speech. Not a failure:
    /// the chunk becomes an empty-text segment.
    #[error("no speech recognized")]
    Unrecognized,

    /// The backend could not be used at all (network down, quota, process
    /// missing). Triggers the one-shot retry against the fallback backend.
    #[error("backend unreachable: {0}")]
    Unreachable(String),
}

/// Contract for recognition backends.
///
/// `recognize` receives the chunk serialized as a canonical WAV body plus
/// its sample rate, and returns raw (un-normalized) text.
pub trait RecognitionBackend: Send + Sync {
    fn recognize(&self, wav: &[u8], sample_rate: u32) -> Result<String, RecognitionError>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}

/// Clean up raw backend text for the transcript: trim, uppercase the first
/// letter, and close with terminal punctuation. Returns `None` when the
/// text trims to nothing, which the pipeline suppresses.
pub fn normalize_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    let first = chars.next()?;
    let mut text: String = first.to_uppercase().collect();
    text.push_str(chars.as_str());
    if !text.ends_with(['.', '!', '?']) {
        text.push('.');
    }
    Some(text)
}
