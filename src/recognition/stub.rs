//! Stub backend that echoes chunk metadata without real recognition.
//!
//! Lets the full capture → windowing → reorder path be exercised
//! end-to-end before a real backend is configured (also the default for
//! the demo binary).

use tracing::debug;

use super::{RecognitionBackend, RecognitionError};
use crate::audio::wav;

/// Echo-style stub backend.
///
/// Produces a deterministic `"heard N samples at R hz"` line per chunk,
/// or `Unrecognized` for near-silent audio so the empty-text suppression
/// path gets exercised too.
pub struct StubBackend {
    /// Mean-absolute-amplitude floor below which a chunk counts as silence.
    silence_floor: f32,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            silence_floor: 0.005,
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognitionBackend for StubBackend {
    fn recognize(&self, wav: &[u8], sample_rate: u32) -> Result<String, RecognitionError> {
        let pcm = wav::decode(wav).map_err(|e| RecognitionError::Unreachable(e.to_string()))?;
        if pcm.samples.is_empty() {
            return Err(RecognitionError::Unrecognized);
        }

        let mean_abs = pcm
            .samples
            .iter()
            .map(|&s| (s as f32 / 32_767.0).abs())
            .sum::<f32>()
            / pcm.samples.len() as f32;

        if mean_abs < self.silence_floor {
            debug!(mean_abs, "stub backend classified chunk as silence");
            return Err(RecognitionError::Unrecognized);
        }

        Ok(format!(
            "heard {} samples at {} hz",
            pcm.samples.len(),
            sample_rate
        ))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
