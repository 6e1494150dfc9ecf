//! Live audio capture.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! Its only job here is to slice the incoming sample block into fixed-size
//! frames and hand them to the bounded [`FrameBuffer`](crate::buffering::FrameBuffer)
//! via a non-blocking push. It must not block, perform I/O, or wait on the
//! scheduler in any way; overflow is handled by the buffer's drop-oldest
//! policy, never by stalling the driver.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). The engine is therefore created and dropped on the session's
//! capture thread; the [`CaptureStream`] handle never crosses threads.

pub mod catalog;
pub mod resolver;
pub mod wav;

use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::buffering::{AudioFrame, FrameBuffer};
use crate::error::Result;
use crate::audio::resolver::DeviceSelection;

#[cfg(feature = "audio-cpal")]
use crate::error::ConfabError;

/// Lifecycle of one capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Opening,
    Streaming,
    Stopping,
    Closed,
    /// Stream-level failure; fatal for the owning session.
    Failed,
}

/// Handle to an open capture stream, owned by the capture thread.
///
/// Implementations are not required to be `Send`; the session creates,
/// uses and drops the handle on a single thread.
pub trait CaptureStream {
    /// Stop delivering frames and release the device. Idempotent, and safe
    /// to call after a failure.
    fn close(&mut self);
}

/// Factory that opens a capture stream for a resolved device, delivering
/// frames through `sink` and stream-level errors through `errors`.
///
/// The production opener wraps [`CaptureEngine::open`]; tests substitute a
/// scripted source that feeds synthetic frames.
pub type CaptureOpener = Box<
    dyn Fn(&DeviceSelection, FrameSink, Sender<String>) -> Result<Box<dyn CaptureStream>>
        + Send
        + Sync,
>;

/// Accumulates driver sample blocks into fixed-size frames and pushes them
/// into the hand-off buffer.
///
/// Owned by the capture callback; all methods are allocation-light and
/// never block (the underlying push is `try_lock`-based).
pub struct FrameSink {
    buffer: Arc<FrameBuffer>,
    channels: u16,
    /// Interleaved samples per frame (`frame_len × channels`).
    frame_samples: usize,
    pending: Vec<f32>,
    next_seq: u64,
}

impl FrameSink {
    /// `frame_len` is samples per channel per frame.
    pub fn new(buffer: Arc<FrameBuffer>, channels: u16, frame_len: usize) -> Self {
        let channels = channels.max(1);
        let frame_samples = frame_len.max(1) * channels as usize;
        Self {
            buffer,
            channels,
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
            next_seq: 0,
        }
    }

    /// Append normalized f32 samples.
    pub fn push_samples(&mut self, data: &[f32]) {
        self.pending.extend_from_slice(data);
        self.emit_full_frames();
    }

    /// Append 16-bit samples, converting to normalized f32.
    pub fn push_samples_i16(&mut self, data: &[i16]) {
        self.pending.extend(data.iter().map(|&s| s as f32 / 32_768.0));
        self.emit_full_frames();
    }

    /// Append unsigned 8-bit samples, converting to normalized f32.
    pub fn push_samples_u8(&mut self, data: &[u8]) {
        self.pending
            .extend(data.iter().map(|&s| (s as f32 - 128.0) / 128.0));
        self.emit_full_frames();
    }

    fn emit_full_frames(&mut self) {
        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            let samples = std::mem::replace(&mut self.pending, rest);
            let frame = AudioFrame {
                samples,
                channels: self.channels,
                seq: self.next_seq,
            };
            self.next_seq += 1;
            self.buffer.push(frame);
        }
    }
}

/// cpal-backed capture engine.
#[cfg(feature = "audio-cpal")]
pub struct CaptureEngine {
    /// Kept alive so the stream is not dropped prematurely.
    stream: Option<cpal::Stream>,
    state: Arc<parking_lot::Mutex<CaptureState>>,
}

#[cfg(feature = "audio-cpal")]
impl CaptureEngine {
    /// Open the selected device and start delivering frames into `sink`.
    ///
    /// Must be called from the thread that will also drop the returned
    /// engine. Stream-level errors reported by the driver after open are
    /// forwarded over `errors` and mark the engine `Failed`.
    ///
    /// # Errors
    /// `ConfabError::Capture` if the device cannot be found or the stream
    /// cannot be built or started.
    pub fn open(
        selection: &DeviceSelection,
        mut sink: FrameSink,
        errors: Sender<String>,
    ) -> Result<Self> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
        use cpal::{SampleFormat, SampleRate, StreamConfig};
        use tracing::{error, info, warn};

        let state = Arc::new(parking_lot::Mutex::new(CaptureState::Opening));

        let host = cpal::default_host();
        let device = host
            .input_devices()
            .map_err(|e| ConfabError::Capture(e.to_string()))?
            .find(|d| {
                d.name()
                    .map(|n| n == selection.device_name)
                    .unwrap_or(false)
            })
            .or_else(|| {
                warn!(
                    device = %selection.device_name,
                    "selected input device no longer enumerable, using default input"
                );
                host.default_input_device()
            })
            .ok_or_else(|| {
                ConfabError::Capture(format!(
                    "input device '{}' unavailable",
                    selection.device_name
                ))
            })?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            channels = selection.channel_count,
            sample_rate = selection.sample_rate,
            "opening capture stream"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| ConfabError::Capture(e.to_string()))?;

        let config = StreamConfig {
            channels: selection.channel_count,
            sample_rate: SampleRate(selection.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_state = Arc::clone(&state);
        let err_cb = move |err: cpal::StreamError| {
            *err_state.lock() = CaptureState::Failed;
            error!("audio stream error: {err}");
            let _ = errors.send(err.to_string());
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _info| sink.push_samples(data),
                err_cb,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _info| sink.push_samples_i16(data),
                err_cb,
                None,
            ),
            SampleFormat::U8 => device.build_input_stream(
                &config,
                move |data: &[u8], _info| sink.push_samples_u8(data),
                err_cb,
                None,
            ),
            fmt => {
                return Err(ConfabError::Capture(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| ConfabError::Capture(e.to_string()))?;

        stream
            .play()
            .map_err(|e| ConfabError::Capture(e.to_string()))?;

        *state.lock() = CaptureState::Streaming;
        Ok(Self {
            stream: Some(stream),
            state,
        })
    }

    /// Current stream state (snapshot).
    pub fn state(&self) -> CaptureState {
        *self.state.lock()
    }
}

#[cfg(feature = "audio-cpal")]
impl CaptureStream for CaptureEngine {
    fn close(&mut self) {
        let mut state = self.state.lock();
        match *state {
            CaptureState::Closed => return,
            CaptureState::Failed => {}
            _ => *state = CaptureState::Stopping,
        }
        drop(state);
        // Dropping the stream stops the callbacks and releases the device.
        self.stream.take();
        *self.state.lock() = CaptureState::Closed;
    }
}

/// Opener wired into [`SessionController`](crate::session::SessionController)
/// by default.
#[cfg(feature = "audio-cpal")]
pub fn default_opener() -> CaptureOpener {
    Box::new(|selection, sink, errors| {
        CaptureEngine::open(selection, sink, errors).map(|e| Box::new(e) as Box<dyn CaptureStream>)
    })
}

/// Stub when the `audio-cpal` feature is disabled: opening always fails.
#[cfg(not(feature = "audio-cpal"))]
pub fn default_opener() -> CaptureOpener {
    Box::new(|_selection, _sink, _errors| {
        Err(crate::error::ConfabError::Capture(
            "compiled without audio-cpal feature".into(),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_slices_blocks_into_fixed_frames() {
        let buffer = Arc::new(FrameBuffer::new(16));
        let mut sink = FrameSink::new(Arc::clone(&buffer), 1, 4);

        sink.push_samples(&[0.1; 10]);
        assert_eq!(buffer.len(), 2); // 8 samples framed, 2 pending
        sink.push_samples(&[0.1; 2]);
        assert_eq!(buffer.len(), 3);

        let mut out = Vec::new();
        buffer.drain_into(&mut out);
        assert!(out.iter().all(|f| f.samples.len() == 4));
        assert_eq!(out.iter().map(|f| f.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn sink_accounts_for_interleaved_channels() {
        let buffer = Arc::new(FrameBuffer::new(16));
        let mut sink = FrameSink::new(Arc::clone(&buffer), 2, 4);

        // One stereo frame = 8 interleaved samples.
        sink.push_samples(&[0.2; 8]);
        assert_eq!(buffer.len(), 1);
        let mut out = Vec::new();
        buffer.drain_into(&mut out);
        assert_eq!(out[0].samples.len(), 8);
        assert_eq!(out[0].channels, 2);
    }

    #[test]
    fn sink_converts_integer_formats_to_normalized_f32() {
        let buffer = Arc::new(FrameBuffer::new(4));
        let mut sink = FrameSink::new(Arc::clone(&buffer), 1, 2);

        sink.push_samples_i16(&[16_384, -16_384]);
        sink.push_samples_u8(&[192, 64]);

        let mut out = Vec::new();
        buffer.drain_into(&mut out);
        assert_eq!(out.len(), 2);
        assert!((out[0].samples[0] - 0.5).abs() < 1e-3);
        assert!((out[0].samples[1] + 0.5).abs() < 1e-3);
        assert!((out[1].samples[0] - 0.5).abs() < 1e-3);
        assert!((out[1].samples[1] + 0.5).abs() < 1e-3);
    }
}
