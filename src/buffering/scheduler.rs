//! Windowing of the drained frame stream into recognition chunks.
//!
//! The scheduler is a pure accumulator: the session's capture thread feeds
//! it every frame it drains from the hand-off buffer, and the scheduler
//! decides emission purely from buffered-duration (or frame-count)
//! accounting. Wall-clock time plays no part, which keeps the windowing
//! independent of drain-tick granularity and directly testable.
//!
//! Whole frames are consumed: a duration window closes on the first frame
//! boundary at or past the configured length, so a chunk may run a few
//! milliseconds long but never splits a frame. On session stop, whatever
//! remains — even a fraction of a window — is flushed as one final short
//! chunk so no captured audio is silently discarded.

use std::collections::VecDeque;
use std::time::Duration;

use super::{chunk::AudioChunk, AudioFrame};

/// When a window closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// Close once the buffered frames cover at least this much audio.
    Duration(Duration),
    /// Close once this many frames are buffered (fixed-size batching
    /// compatibility mode).
    FrameCount(usize),
}

impl Default for WindowPolicy {
    fn default() -> Self {
        WindowPolicy::Duration(Duration::from_secs(1))
    }
}

/// Windowing configuration for one session.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub policy: WindowPolicy,
    /// Audio re-included at the start of the next window. Must be shorter
    /// than the window itself; zero (the default) disables overlap.
    pub overlap: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: WindowPolicy::default(),
            overlap: Duration::ZERO,
        }
    }
}

/// Accumulates drained frames and emits sequence-numbered windows.
pub struct ChunkScheduler {
    config: SchedulerConfig,
    sample_rate: u32,
    channels: u16,
    /// Buffered frames with the cumulative (interleaved) stream offset of
    /// their first sample.
    queue: VecDeque<(u64, AudioFrame)>,
    queued_samples: usize,
    /// Cumulative interleaved samples ingested so far.
    stream_pos: u64,
    next_seq: u64,
}

impl ChunkScheduler {
    pub fn new(config: SchedulerConfig, sample_rate: u32, channels: u16) -> Self {
        Self {
            config,
            sample_rate,
            channels: channels.max(1),
            queue: VecDeque::new(),
            queued_samples: 0,
            stream_pos: 0,
            next_seq: 0,
        }
    }

    /// Feed one drained frame; returns every window that became ready.
    pub fn ingest(&mut self, frame: AudioFrame) -> Vec<AudioChunk> {
        let offset = self.stream_pos;
        self.stream_pos += frame.samples.len() as u64;
        self.queued_samples += frame.samples.len();
        self.queue.push_back((offset, frame));
        self.emit_ready()
    }

    /// Flush everything still buffered as one final, possibly short, chunk.
    pub fn flush(&mut self) -> Option<AudioChunk> {
        if self.queue.is_empty() {
            return None;
        }
        let count = self.queue.len();
        Some(self.emit(count, false))
    }

    /// Next sequence number to be assigned (== chunks emitted so far).
    pub fn chunks_emitted(&self) -> u64 {
        self.next_seq
    }

    fn emit_ready(&mut self) -> Vec<AudioChunk> {
        let mut ready = Vec::new();
        loop {
            let take = match self.config.policy {
                WindowPolicy::Duration(window) => {
                    let window_samples = self.duration_samples(window).max(1);
                    if self.queued_samples < window_samples {
                        break;
                    }
                    // Whole frames up to the first boundary covering the window.
                    let mut covered = 0usize;
                    let mut frames = 0usize;
                    for (_, frame) in self.queue.iter() {
                        covered += frame.samples.len();
                        frames += 1;
                        if covered >= window_samples {
                            break;
                        }
                    }
                    frames
                }
                WindowPolicy::FrameCount(count) => {
                    let count = count.max(1);
                    if self.queue.len() < count {
                        break;
                    }
                    count
                }
            };
            ready.push(self.emit(take, true));
        }
        ready
    }

    fn emit(&mut self, frame_count: usize, carry_overlap: bool) -> AudioChunk {
        let mut samples = Vec::with_capacity(self.queued_samples.min(frame_count * 1024));
        let mut consumed: Vec<(u64, AudioFrame)> = Vec::with_capacity(frame_count);
        let start_offset = self.queue.front().map(|(off, _)| *off).unwrap_or(self.stream_pos);

        for _ in 0..frame_count {
            if let Some((off, frame)) = self.queue.pop_front() {
                self.queued_samples -= frame.samples.len();
                samples.extend_from_slice(&frame.samples);
                consumed.push((off, frame));
            }
        }
        let end_offset = start_offset + samples.len() as u64;

        if carry_overlap {
            self.requeue_overlap(&consumed);
        }

        let chunk = AudioChunk {
            seq: self.next_seq,
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
            start_offset,
            end_offset,
        };
        self.next_seq += 1;
        chunk
    }

    /// Re-queue the trailing frames covering the configured overlap so the
    /// next window starts with them. At least the first consumed frame is
    /// never carried back, so emission always makes forward progress.
    fn requeue_overlap(&mut self, consumed: &[(u64, AudioFrame)]) {
        let overlap_samples = self.duration_samples(self.config.overlap);
        if overlap_samples == 0 {
            return;
        }
        let mut carried = 0usize;
        let mut start = consumed.len();
        while start > 1 && carried < overlap_samples {
            start -= 1;
            carried += consumed[start].1.samples.len();
        }
        for (off, frame) in consumed[start..].iter().rev() {
            self.queued_samples += frame.samples.len();
            self.queue.push_front((*off, frame.clone()));
        }
    }

    fn duration_samples(&self, d: Duration) -> usize {
        (self.sample_rate as f64 * d.as_secs_f64()) as usize * self.channels as usize
    }
}
