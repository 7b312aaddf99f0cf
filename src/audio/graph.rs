//! Output graph capability
//!
//! The playback scheduler only needs a handful of operations from the host
//! audio API: read the output clock, start a buffer at a timeline instant,
//! stop it again and learn when it finished. [`OutputGraph`] names exactly
//! those so the scheduler runs the same against speakers or a test clock.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::audio::buffer::PlayableBuffer;
use crate::audio::visualizer::SampleTap;
use crate::error::AudioError;

/// Handle of one started source on an output graph
pub type SourceId = u64;

/// Abstract playback graph with a single shared output clock
pub trait OutputGraph {
    /// Current instant of the output clock, in seconds
    fn now(&self) -> f64;

    /// Rate the graph renders at
    fn sample_rate(&self) -> u32;

    /// Start `buffer` at timeline instant `at`.
    ///
    /// An instant already in the past starts the buffer immediately.
    fn start_source(&mut self, buffer: Arc<PlayableBuffer>, at: f64) -> Result<SourceId, AudioError>;

    /// Stop a source. Unknown or already finished ids are ignored.
    fn stop_source(&mut self, id: SourceId);

    /// Where to report sources that played to the end. Stopped sources are
    /// not reported.
    fn set_ended_sink(&mut self, sink: mpsc::UnboundedSender<SourceId>);

    /// Tap carrying the mixed output, for visualization
    fn tap(&self) -> SampleTap;
}
