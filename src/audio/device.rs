//! Audio device enumeration and stream configuration

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig, SupportedStreamConfig, SupportedStreamConfigRange};
use serde::Serialize;

use crate::error::AudioError;

/// Description of an audio device for listings
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Which side of the device a stream uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = device_capabilities(&device, Direction::Input);
                devices.push(AudioDeviceInfo {
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);

                // Duplex devices show up once
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                    continue;
                }

                let (sample_rates, channels) = device_capabilities(&device, Direction::Output);
                devices.push(AudioDeviceInfo {
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

fn supported_ranges(device: &cpal::Device, direction: Direction) -> Vec<SupportedStreamConfigRange> {
    let ranges = match direction {
        Direction::Input => device.supported_input_configs().map(|it| it.collect::<Vec<_>>()),
        Direction::Output => device.supported_output_configs().map(|it| it.collect::<Vec<_>>()),
    };
    ranges.unwrap_or_default()
}

fn device_capabilities(device: &cpal::Device, direction: Direction) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    for range in supported_ranges(device, direction) {
        for rate in [16_000u32, 24_000, 44_100, 48_000, 96_000] {
            let in_range = SampleRate(rate) >= range.min_sample_rate()
                && SampleRate(rate) <= range.max_sample_rate();
            if in_range && !sample_rates.contains(&rate) {
                sample_rates.push(rate);
            }
        }
        if !channels.contains(&range.channels()) {
            channels.push(range.channels());
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Get default input device
pub fn default_input_device() -> Result<cpal::Device, AudioError> {
    cpal::default_host()
        .default_input_device()
        .ok_or_else(|| AudioError::DeviceUnavailable("no default input device".to_string()))
}

/// Get default output device
pub fn default_output_device() -> Result<cpal::Device, AudioError> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceUnavailable("no default output device".to_string()))
}

/// Pick a stream config for `device`.
///
/// Streams are always built with `f32` callbacks, so only `f32` configs are
/// considered. Prefers one that runs at `sample_rate` with the fewest
/// channels; otherwise the device default or the nearest `f32` rate, leaving
/// rate conversion to the caller.
pub fn stream_config(
    device: &cpal::Device,
    direction: Direction,
    sample_rate: u32,
) -> Result<StreamConfig, AudioError> {
    let default = match direction {
        Direction::Input => device.default_input_config(),
        Direction::Output => device.default_output_config(),
    };
    choose_config(&supported_ranges(device, direction), default.ok(), sample_rate)
}

fn choose_config(
    ranges: &[SupportedStreamConfigRange],
    default: Option<SupportedStreamConfig>,
    sample_rate: u32,
) -> Result<StreamConfig, AudioError> {
    let wanted = SampleRate(sample_rate);
    let float_ranges = || ranges.iter().filter(|r| r.sample_format() == SampleFormat::F32);

    let exact = float_ranges()
        .filter(|r| r.min_sample_rate() <= wanted && r.max_sample_rate() >= wanted)
        .min_by_key(|r| r.channels());
    if let Some(range) = exact {
        return Ok(range.clone().with_sample_rate(wanted).config());
    }

    let fallback = match &default {
        Some(config) if config.sample_format() == SampleFormat::F32 => config.config(),
        _ => {
            let range = float_ranges().min_by_key(|r| r.channels()).ok_or_else(|| {
                let format = default.as_ref().map(|c| c.sample_format().to_string());
                AudioError::UnsupportedFormat(format!(
                    "device offers no 32-bit float stream (default format {})",
                    format.as_deref().unwrap_or("unknown")
                ))
            })?;
            let rate = wanted.clamp(range.min_sample_rate(), range.max_sample_rate());
            range.clone().with_sample_rate(rate).config()
        }
    };

    tracing::debug!(
        requested = sample_rate,
        device_rate = fallback.sample_rate.0,
        "device does not run at the requested rate; resampling"
    );
    Ok(fallback)
}
