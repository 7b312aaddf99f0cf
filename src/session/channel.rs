//! Remote speech channel boundary
//!
//! The controller opens a channel with the host's voice and instructions and
//! then only sees [`ChannelEvent`]s arriving on the queue it handed over.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::AudioConfig;
use crate::error::SessionError;
use crate::profile::Profile;

/// Something the remote side did
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Connection is up and ready for audio
    Opened,
    /// One chunk of synthesized PCM
    Chunk(Bytes),
    /// The user started talking over the host
    Interrupted,
    /// The host finished its turn
    TurnComplete,
    /// Remote closed the connection
    Closed,
    /// Transport failure
    Error(String),
}

/// What the remote side needs to know when the channel opens
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSetup {
    pub voice: String,
    pub system_instruction: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    /// Tag sent with every outbound audio frame
    pub mime_type: String,
}

impl ChannelSetup {
    pub fn for_profile(profile: &Profile, audio: &AudioConfig) -> Self {
        Self {
            voice: profile.voice.clone(),
            system_instruction: profile.system_instruction.clone(),
            input_sample_rate: audio.capture_sample_rate,
            output_sample_rate: audio.playback_sample_rate,
            mime_type: audio.capture_mime_type(),
        }
    }
}

/// Bidirectional streaming connection to a speech service
pub trait SpeechChannel {
    /// Begin connecting. Progress and failures after this returns are
    /// reported on `events`.
    fn open(
        &mut self,
        setup: &ChannelSetup,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<(), SessionError>;

    /// Queue one frame of outbound PCM. Never waits for the network.
    fn send(&mut self, pcm: Bytes) -> Result<(), SessionError>;

    /// Release the connection. Idempotent.
    fn close(&mut self);
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CAPTURE_MIME_TYPE;
    use crate::profile::ProfileCatalog;

    #[test]
    fn test_setup_takes_rates_and_tag_from_audio_config() {
        let profile = ProfileCatalog::builtin().lookup("Storyteller").unwrap().clone();

        let setup = ChannelSetup::for_profile(&profile, &AudioConfig::default());
        assert_eq!(setup.voice, profile.voice);
        assert_eq!(setup.mime_type, CAPTURE_MIME_TYPE);

        let audio = AudioConfig {
            capture_sample_rate: 48000,
            ..AudioConfig::default()
        };
        let setup = ChannelSetup::for_profile(&profile, &audio);
        assert_eq!(setup.input_sample_rate, 48000);
        assert_eq!(setup.mime_type, "audio/pcm;rate=48000");
    }
}
