//! Playback scheduler
//!
//! Places an ordered stream of buffers on the output timeline back to back,
//! tracks every source still in flight so they can be cut off at once, and
//! derives the "speaking" signal from what is in flight.
//!
//! The scheduler is owned by a single task and is never shared; every
//! method runs to completion before the next event is handled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::buffer::PlayableBuffer;
use crate::audio::decode::to_playable_buffer;
use crate::audio::graph::{OutputGraph, SourceId};
use crate::codec::pcm;
use crate::constants::{PLAYBACK_CHANNELS, PLAYBACK_SAMPLE_RATE, SPEAKING_DEBOUNCE_MS};
use crate::error::AudioError;

/// Scheduler configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    /// How long `speaking` stays up after the last source finishes
    pub speaking_debounce: Duration,
    /// Format of raw chunks handed to [`PlaybackScheduler::accept_chunk`]
    pub chunk_sample_rate: u32,
    pub chunk_channels: u16,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            speaking_debounce: Duration::from_millis(SPEAKING_DEBOUNCE_MS),
            chunk_sample_rate: PLAYBACK_SAMPLE_RATE,
            chunk_channels: PLAYBACK_CHANNELS,
        }
    }
}

/// A scheduled source that has neither finished nor been stopped
#[derive(Debug, Clone)]
pub struct PendingSource {
    pub id: SourceId,
    pub buffer: Arc<PlayableBuffer>,
    pub start_time: f64,
}

/// Scheduler counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackStats {
    pub chunks_scheduled: u64,
    pub chunks_dropped: u64,
    pub interruptions: u64,
}

/// Gapless, interruptible playback on an [`OutputGraph`]
pub struct PlaybackScheduler<G: OutputGraph> {
    graph: G,
    config: SchedulerConfig,
    /// Timeline instant at which the next buffer starts
    next_start_time: f64,
    pending: HashMap<SourceId, PendingSource>,
    speaking: bool,
    /// Set when `pending` drained while speaking
    quiet_since: Option<Instant>,
    stats: PlaybackStats,
}

impl<G: OutputGraph> PlaybackScheduler<G> {
    pub fn new(graph: G, config: SchedulerConfig) -> Self {
        Self {
            graph,
            config,
            next_start_time: 0.0,
            pending: HashMap::new(),
            speaking: false,
            quiet_since: None,
            stats: PlaybackStats::default(),
        }
    }

    /// Schedule `buffer` right after everything already queued, or now if
    /// the queue has drained. Returns the start instant.
    ///
    /// On failure the buffer is discarded and the timeline is untouched.
    pub fn enqueue(&mut self, buffer: PlayableBuffer) -> Result<f64, AudioError> {
        let buffer = Arc::new(buffer);
        // Read the clock now, not when the chunk was decoded
        let start_time = self.next_start_time.max(self.graph.now());

        let id = match self.graph.start_source(Arc::clone(&buffer), start_time) {
            Ok(id) => id,
            Err(e) => {
                self.stats.chunks_dropped += 1;
                tracing::warn!(error = %e, "discarding source the output graph refused");
                return Err(e);
            }
        };

        self.next_start_time = start_time + buffer.duration();
        tracing::trace!(
            source_id = id,
            start_time,
            duration = buffer.duration(),
            "scheduled source"
        );

        self.pending.insert(
            id,
            PendingSource {
                id,
                buffer,
                start_time,
            },
        );
        self.speaking = true;
        self.quiet_since = None;
        self.stats.chunks_scheduled += 1;

        Ok(start_time)
    }

    /// Decode one raw PCM chunk and schedule it.
    ///
    /// Malformed or unplayable chunks are logged and dropped here; they
    /// never reach the caller.
    pub fn accept_chunk(&mut self, bytes: &[u8]) -> Option<f64> {
        let frame = match pcm::decode_to_frame(bytes, self.config.chunk_sample_rate, self.config.chunk_channels) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.chunks_dropped += 1;
                tracing::warn!(error = %e, "dropping audio chunk");
                return None;
            }
        };
        if frame.is_empty() {
            tracing::trace!("ignoring empty audio chunk");
            return None;
        }

        let buffer = match to_playable_buffer(&frame) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.stats.chunks_dropped += 1;
                tracing::warn!(error = %e, "dropping audio chunk");
                return None;
            }
        };

        self.enqueue(buffer).ok()
    }

    /// A source played to its end.
    ///
    /// Ids that are no longer pending (stopped by an interruption) are
    /// ignored.
    pub fn on_source_ended(&mut self, id: SourceId, at: Instant) {
        if self.pending.remove(&id).is_none() {
            return;
        }
        if self.pending.is_empty() && self.speaking {
            self.quiet_since = Some(at);
        }
    }

    /// When `speaking` should drop, if a drop is due
    pub fn speaking_deadline(&self) -> Option<Instant> {
        self.quiet_since.map(|t| t + self.config.speaking_debounce)
    }

    /// Apply the debounce. Returns true if `speaking` changed.
    pub fn poll_speaking(&mut self, now: Instant) -> bool {
        match self.speaking_deadline() {
            Some(deadline) if now >= deadline => {
                self.quiet_since = None;
                let changed = self.speaking;
                self.speaking = false;
                changed
            }
            _ => false,
        }
    }

    /// Cut off everything in flight and rewind the timeline.
    ///
    /// Returns how many sources were stopped.
    pub fn interrupt(&mut self) -> usize {
        self.stats.interruptions += 1;
        let stopped = self.cut_off();
        tracing::debug!(stopped, "playback interrupted");
        stopped
    }

    /// Same effect as [`interrupt`](Self::interrupt), for session end.
    /// Idempotent.
    pub fn teardown(&mut self) {
        let stopped = self.cut_off();
        if stopped > 0 {
            tracing::debug!(stopped, "playback torn down");
        }
    }

    fn cut_off(&mut self) -> usize {
        let stopped = self.pending.len();
        // Stopping a source that already finished is a no-op on the graph
        for (id, _) in self.pending.drain() {
            self.graph.stop_source(id);
        }
        self.next_start_time = 0.0;
        self.speaking = false;
        self.quiet_since = None;
        stopped
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingSource> {
        self.pending.values()
    }

    pub fn stats(&self) -> &PlaybackStats {
        &self.stats
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut G {
        &mut self.graph
    }
}
