//! Decode adapter: wire frames to playable buffers

use crate::audio::buffer::{AudioFrame, PlayableBuffer};
use crate::codec::pcm::dequantize;
use crate::error::AudioError;

/// Deinterleave an [`AudioFrame`] into a [`PlayableBuffer`] at the frame's
/// own sample rate.
pub fn to_playable_buffer(frame: &AudioFrame) -> Result<PlayableBuffer, AudioError> {
    let channels = frame.channels() as usize;
    if channels == 0 {
        return Err(AudioError::UnsupportedFormat("zero channels".to_string()));
    }
    if frame.sample_rate() == 0 {
        return Err(AudioError::UnsupportedFormat(
            "sample rate must be positive".to_string(),
        ));
    }

    let frames = frame.samples_per_channel();
    let mut planar: Vec<Vec<f32>> = (0..channels).map(|_| Vec::with_capacity(frames)).collect();

    for chunk in frame.samples().chunks_exact(channels) {
        for (channel, &sample) in planar.iter_mut().zip(chunk) {
            channel.push(dequantize(sample));
        }
    }

    Ok(PlayableBuffer::from_planar(planar, frame.sample_rate()))
}
