//! Audio buffers
//!
//! [`AudioFrame`] is what the wire carries: interleaved 16-bit samples.
//! [`PlayableBuffer`] is what the output graph plays: planar float channels.

use std::time::Duration;

use crate::codec::pcm::dequantize;

/// Interleaved 16-bit audio, immutable once produced
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Playback length of the frame
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples_per_channel() as f64 / f64::from(self.sample_rate))
    }

    /// Interleaved samples rescaled to float
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| dequantize(s)).collect()
    }
}

/// Planar float audio ready for the output graph
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl PlayableBuffer {
    /// Build from planar channel data.
    ///
    /// Callers guarantee at least one channel, equal channel lengths and a
    /// non-zero sample rate; `audio::decode` is the checked entry point.
    pub(crate) fn from_planar(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        debug_assert!(!channels.is_empty());
        debug_assert!(sample_rate > 0);
        Self {
            channels,
            sample_rate,
        }
    }

    /// Mono buffer of `frames` silent samples
    pub fn silence(frames: usize, sample_rate: u32) -> Self {
        Self::from_planar(vec![vec![0.0; frames]], sample_rate.max(1))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn planar(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Length on the output timeline, in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0; 48000], 24000, 2);
        assert_eq!(frame.samples_per_channel(), 24000);
        assert_eq!(frame.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_frame_degenerate_format() {
        let frame = AudioFrame::new(vec![0; 10], 0, 0);
        assert_eq!(frame.samples_per_channel(), 0);
        assert_eq!(frame.duration(), Duration::ZERO);
    }

    #[test]
    fn test_playable_duration() {
        let buffer = PlayableBuffer::silence(12000, 24000);
        assert_eq!(buffer.frames(), 12000);
        assert_eq!(buffer.channel_count(), 1);
        assert!((buffer.duration() - 0.5).abs() < 1e-9);
    }
}
