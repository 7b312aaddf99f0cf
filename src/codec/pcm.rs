//! 16-bit PCM codec
//!
//! Outbound audio is float samples from the capture graph; the wire carries
//! signed 16-bit little-endian integers. Inbound chunks go the other way.

use bytes::{BufMut, Bytes, BytesMut};

use crate::audio::buffer::AudioFrame;
use crate::error::CodecError;

/// Bytes per encoded sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Scale between float [-1, 1] and the signed 16-bit range
const I16_SCALE: f32 = 32768.0;

/// Quantize one float sample to 16 bits.
///
/// Out-of-range input is clamped to [-1, 1]; NaN and infinities become 0.
#[inline]
pub fn quantize(sample: f32) -> i16 {
    if !sample.is_finite() {
        return 0;
    }
    // `as` saturates, so +1.0 lands on i16::MAX
    (sample.clamp(-1.0, 1.0) * I16_SCALE) as i16
}

/// Rescale a 16-bit sample to float [-1, 1)
#[inline]
pub fn dequantize(sample: i16) -> f32 {
    f32::from(sample) / I16_SCALE
}

/// Encode float samples into little-endian 16-bit PCM
pub fn encode(samples: &[f32]) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        out.put_i16_le(quantize(sample));
    }
    out.freeze()
}

/// Interpret a PCM byte buffer as an [`AudioFrame`].
///
/// The length must be a whole number of `channels`-wide frames of 16-bit
/// samples, otherwise the chunk is rejected as malformed.
pub fn decode_to_frame(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioFrame, CodecError> {
    let frame_bytes = BYTES_PER_SAMPLE * channels as usize;
    if frame_bytes == 0 || bytes.len() % frame_bytes != 0 {
        return Err(CodecError::MalformedAudio {
            len: bytes.len(),
            channels,
        });
    }

    let samples = bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(AudioFrame::new(samples, sample_rate, channels))
}
