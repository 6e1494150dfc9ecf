//! Sequence-numbered audio window handed to the recognition pipeline.

/// A bounded window over the captured frame stream.
///
/// Chunks are the unit of recognition: each one is serialized to the
/// canonical WAV container and submitted as a single backend call. The
/// sequence number orders the final transcript regardless of recognition
/// completion order.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Monotonic per-session window number, assigned by the scheduler.
    pub seq: u64,
    /// Interleaved f32 samples in [-1.0, 1.0], concatenated from the
    /// consumed frames.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    pub channels: u16,
    /// Cumulative sample index (interleaved) of the first sample in the
    /// consumed stream.
    pub start_offset: u64,
    /// One past the last sample's cumulative index.
    pub end_offset: u64,
}

impl AudioChunk {
    /// Duration of this window in seconds.
    pub fn duration_secs(&self) -> f64 {
        let frames = self.samples.len() as f64 / self.channels.max(1) as f64;
        frames / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_accounts_for_interleaved_channels() {
        let chunk = AudioChunk {
            seq: 0,
            samples: vec![0.0; 88_200],
            sample_rate: 44_100,
            channels: 2,
            start_offset: 0,
            end_offset: 88_200,
        };
        assert!((chunk.duration_secs() - 1.0).abs() < 1e-9);
    }
}
