//! Wire codecs
//!
//! 16-bit little-endian PCM for audio payloads and base64 for carrying
//! those payloads over text-only protocols.

pub mod pcm;
pub mod transport;

pub use pcm::{decode_to_frame, encode};
pub use transport::{decode_text, encode_text};
