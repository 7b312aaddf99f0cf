//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod decode;
pub mod device;
pub mod graph;
pub mod output;
pub mod playback;
pub mod resample;
pub mod visualizer;

pub use buffer::{AudioFrame, PlayableBuffer};
pub use capture::{CaptureConfig, CaptureDevice, FrameCallback, MicrophoneCapture};
pub use decode::to_playable_buffer;
pub use device::{list_devices, AudioDeviceInfo};
pub use graph::{OutputGraph, SourceId};
pub use output::SpeakerOutput;
pub use playback::{PlaybackScheduler, SchedulerConfig};
pub use visualizer::{Analyser, AnalyserSettings, SampleTap};
