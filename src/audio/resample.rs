//! Streaming sample-rate conversion between device and wire rates

use rubato::{FftFixedIn, Resampler};

use crate::error::AudioError;

/// Input frames consumed per resampler pass
const CHUNK_FRAMES: usize = 1024;

/// Stateful planar resampler fed with arbitrary-length input
pub struct StreamResampler {
    inner: FftFixedIn<f32>,
    /// Input not yet processed, per channel
    pending: Vec<Vec<f32>>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: usize) -> Result<Self, AudioError> {
        let inner = FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_FRAMES, 2, channels)
            .map_err(|e| AudioError::Resample(format!("resampler init failed: {e}")))?;
        Ok(Self {
            inner,
            pending: vec![Vec::with_capacity(CHUNK_FRAMES * 2); channels],
        })
    }

    /// Input frames needed to produce the next block of output
    pub fn input_frames_next(&self) -> usize {
        self.inner.input_frames_next()
    }

    /// Feed planar input; returns all output that became ready
    pub fn push(&mut self, input: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, AudioError> {
        for (pending, channel) in self.pending.iter_mut().zip(input) {
            pending.extend_from_slice(channel);
        }

        let mut output: Vec<Vec<f32>> = vec![Vec::new(); self.pending.len()];
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.first().map_or(0, Vec::len) < needed {
                break;
            }
            let block: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();
            let resampled = self
                .inner
                .process(&block, None)
                .map_err(|e| AudioError::Resample(e.to_string()))?;
            for (out, chunk) in output.iter_mut().zip(resampled) {
                out.extend(chunk);
            }
        }
        Ok(output)
    }
}
