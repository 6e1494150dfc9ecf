//! Bounded hand-off buffer between the audio callback and the scheduler.
//!
//! # Design constraints
//!
//! The driver callback runs on an OS audio thread at elevated priority and
//! **must never block**. The hand-off buffer therefore exposes a `try_lock`
//! push: the callback either enqueues immediately or counts the frame as
//! dropped. The consumer (scheduler thread) holds the lock only for O(drain)
//! moves, so contention is rare in practice.
//!
//! # Overflow policy
//!
//! Drop-oldest: when the queue is full the least-recently-captured frame is
//! evicted to make room and `dropped()` is incremented by exactly one. Under
//! sustained backpressure this bounds both memory and end-to-end latency at
//! the cost of losing the stalest audio first.

pub mod chunk;
pub mod scheduler;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// A fixed-size block of captured PCM, owned by the hand-off buffer until
/// the scheduler drains it.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Normalized f32 samples in [-1.0, 1.0], interleaved.
    pub samples: Vec<f32>,
    pub channels: u16,
    /// Monotonic per-capture counter assigned at the callback.
    pub seq: u64,
}

impl AudioFrame {
    /// Mean absolute amplitude of this frame.
    pub fn mean_abs(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.abs()).sum::<f32>() / self.samples.len() as f32
    }
}

/// Bounded frame queue shared between the capture callback and the
/// scheduler thread.
pub struct FrameBuffer {
    queue: Mutex<VecDeque<AudioFrame>>,
    capacity: usize,
    captured: AtomicU64,
    dropped: AtomicU64,
}

impl FrameBuffer {
    /// `capacity` is in frames; at the default 1024-sample frame and
    /// 44.1 kHz, 256 frames buffer ≈ 5.9 s of mono audio.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            captured: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Non-blocking enqueue, called from the driver callback.
    ///
    /// Returns `false` when the frame was counted but not stored (queue
    /// lock held elsewhere at this instant). On a full queue the oldest
    /// frame is evicted first.
    pub fn push(&self, frame: AudioFrame) -> bool {
        self.captured.fetch_add(1, Ordering::Relaxed);
        match self.queue.try_lock() {
            Some(mut queue) => {
                if queue.len() >= self.capacity {
                    queue.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                queue.push_back(frame);
                true
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Move every buffered frame into `out`, preserving capture order.
    pub fn drain_into(&self, out: &mut Vec<AudioFrame>) {
        let mut queue = self.queue.lock();
        out.extend(queue.drain(..));
    }

    /// Frames currently buffered.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames the callback delivered, including dropped ones.
    pub fn captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    /// Frames evicted or rejected under the overflow policy.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Rolling window of per-frame magnitudes backing the live level readout.
///
/// The scheduler records a magnitude per drained frame; polling computes
/// the mean over whatever is currently in the window, so the reading is
/// recomputed on every call rather than cached.
pub struct LevelMeter {
    window: Mutex<VecDeque<f32>>,
    capacity: usize,
}

impl LevelMeter {
    pub fn new(window_frames: usize) -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(window_frames)),
            capacity: window_frames.max(1),
        }
    }

    pub fn record(&self, magnitude: f32) {
        let mut window = self.window.lock();
        if window.len() >= self.capacity {
            window.pop_front();
        }
        window.push_back(magnitude);
    }

    /// Instantaneous level on a 0–100 scale (mean absolute amplitude of the
    /// most recent frames × 100). Zero before any audio has been seen.
    pub fn level(&self) -> f32 {
        let window = self.window.lock();
        if window.is_empty() {
            return 0.0;
        }
        let mean = window.iter().sum::<f32>() / window.len() as f32;
        (mean * 100.0).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn frame(seq: u64, len: usize) -> AudioFrame {
        AudioFrame {
            samples: vec![0.1; len],
            channels: 1,
            seq,
        }
    }

    #[test]
    fn holds_frames_in_capture_order() {
        let buffer = FrameBuffer::new(8);
        for seq in 0..4 {
            assert!(buffer.push(frame(seq, 16)));
        }
        let mut out = Vec::new();
        buffer.drain_into(&mut out);
        let seqs: Vec<u64> = out.iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn overflow_evicts_oldest_and_counts_each_eviction() {
        let buffer = FrameBuffer::new(20);
        for seq in 0..25 {
            buffer.push(frame(seq, 16));
        }
        assert_eq!(buffer.dropped(), 5);
        assert_eq!(buffer.len(), 20);

        let mut out = Vec::new();
        buffer.drain_into(&mut out);
        let seqs: Vec<u64> = out.iter().map(|f| f.seq).collect();
        assert_eq!(seqs, (5..25).collect::<Vec<u64>>());
    }

    #[test]
    fn captured_accounts_for_stored_plus_dropped() {
        let buffer = FrameBuffer::new(3);
        for seq in 0..10 {
            buffer.push(frame(seq, 4));
        }
        assert_eq!(buffer.captured(), 10);
        assert_eq!(buffer.dropped() + buffer.len() as u64, 10);
    }

    #[test]
    fn frame_mean_abs_over_mixed_signs() {
        let frame = AudioFrame {
            samples: vec![0.5, -0.5, 0.25, -0.25],
            channels: 1,
            seq: 0,
        };
        assert_relative_eq!(frame.mean_abs(), 0.375, epsilon = 1e-6);
    }

    #[test]
    fn level_meter_keeps_only_the_recent_window() {
        let meter = LevelMeter::new(2);
        meter.record(0.9);
        meter.record(0.1);
        meter.record(0.3);
        // 0.9 has rolled out; mean of (0.1, 0.3) × 100.
        assert_relative_eq!(meter.level(), 20.0, epsilon = 1e-4);
    }

    #[test]
    fn level_meter_is_zero_before_audio() {
        let meter = LevelMeter::new(5);
        assert_eq!(meter.level(), 0.0);
    }
}
