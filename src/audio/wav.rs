//! Canonical PCM container for recognition hand-off and debugging.
//!
//! Chunks travel to recognition backends as RIFF/WAVE, 16-bit signed
//! integer samples, mono or stereo, at the chunk's own sample rate.
//! Normalized f32 samples are clamp-scaled to i16 on encode; decoding
//! yields the identical i16 sequence.

use std::io::Cursor;

use crate::buffering::chunk::AudioChunk;
use crate::error::{ConfabError, Result};

/// Decoded contents of a canonical WAV body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavPcm {
    /// Interleaved 16-bit samples.
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Serialize a chunk into an in-memory WAV file.
pub fn encode_chunk(chunk: &AudioChunk) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: chunk.channels.max(1),
        sample_rate: chunk.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut buf = Vec::with_capacity(44 + chunk.samples.len() * 2);
    {
        let cursor = Cursor::new(&mut buf);
        let mut writer = hound::WavWriter::new(cursor, spec)
            .map_err(|e| ConfabError::Capture(format!("wav encode: {e}")))?;
        for &sample in &chunk.samples {
            writer
                .write_sample(f32_to_i16(sample))
                .map_err(|e| ConfabError::Capture(format!("wav encode: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| ConfabError::Capture(format!("wav encode: {e}")))?;
    }
    Ok(buf)
}

/// Parse an in-memory WAV file back into its sample sequence.
pub fn decode(bytes: &[u8]) -> Result<WavPcm> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| ConfabError::Capture(format!("wav decode: {e}")))?;
    let spec = reader.spec();
    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<i16>, _>>()
        .map_err(|e| ConfabError::Capture(format!("wav decode: {e}")))?;
    Ok(WavPcm {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Clamp-scale one normalized sample to 16-bit, matching the scaling the
/// container promises (±1.0 maps onto ±32767).
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32_767.0).clamp(-32_767.0, 32_767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(samples: Vec<f32>, sample_rate: u32, channels: u16) -> AudioChunk {
        let len = samples.len() as u64;
        AudioChunk {
            seq: 0,
            samples,
            sample_rate,
            channels,
            start_offset: 0,
            end_offset: len,
        }
    }

    #[test]
    fn round_trip_preserves_samples_rate_and_channels() {
        // Values chosen as exact multiples of 1/32767 so the f32→i16
        // scaling is lossless.
        let source: Vec<i16> = vec![0, 100, -100, 16_000, -16_000, 32_767, -32_767];
        let samples: Vec<f32> = source.iter().map(|&s| s as f32 / 32_767.0).collect();

        let bytes = encode_chunk(&chunk(samples, 44_100, 1)).unwrap();
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.samples, source);
        assert_eq!(decoded.sample_rate, 44_100);
        assert_eq!(decoded.channels, 1);
    }

    #[test]
    fn stereo_round_trip_keeps_interleaving() {
        let source: Vec<i16> = vec![1000, -1000, 2000, -2000, 3000, -3000];
        let samples: Vec<f32> = source.iter().map(|&s| s as f32 / 32_767.0).collect();

        let bytes = encode_chunk(&chunk(samples, 22_050, 2)).unwrap();
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.samples, source);
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.sample_rate, 22_050);
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        assert_eq!(f32_to_i16(2.0), 32_767);
        assert_eq!(f32_to_i16(-2.0), -32_767);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(decode(&[0u8; 16]).is_err());
    }
}
