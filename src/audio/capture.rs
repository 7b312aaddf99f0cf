//! Audio capture from the microphone
//!
//! The device stream lives on a dedicated thread for the lifetime of one
//! session. Device-sized buffers are downmixed to mono, converted to the
//! capture rate if the device cannot run at it, and cut into fixed-size
//! frames handed to the registered callback.
//!
//! Opening the device happens on that thread too: `start` returns at once
//! and the outcome arrives through a [`ReadyCallback`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver};

use crate::audio::device::{default_input_device, stream_config, Direction};
use crate::audio::resample::StreamResampler;
use crate::audio::visualizer::SampleTap;
use crate::constants::{CAPTURE_FRAME_SIZE, CAPTURE_SAMPLE_RATE, FFT_SIZE};
use crate::error::AudioError;

/// Receives each captured frame of mono float samples
pub type FrameCallback = Box<dyn FnMut(Vec<f32>) + Send + 'static>;

/// Told once whether the device could be acquired
pub type ReadyCallback = Box<dyn FnOnce(Result<(), AudioError>) + Send + 'static>;

/// A microphone-like source of fixed-size frames
pub trait CaptureDevice {
    /// Begin acquiring the device. Must not wait for it: the outcome is
    /// reported once through `on_ready`, after which frames go to
    /// `on_frame`. An `Err` here means nothing was started and `on_ready`
    /// is never called.
    fn start(&mut self, on_frame: FrameCallback, on_ready: ReadyCallback) -> Result<(), AudioError>;

    /// Release the device without waiting. Calling this when not started is
    /// a no-op.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Tap carrying the captured signal, for visualization
    fn tap(&self) -> SampleTap;
}

/// Capture settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    /// Samples per frame handed to the callback
    pub frame_size: usize,
    /// Samples kept for the analyser; match its FFT size
    pub tap_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            frame_size: CAPTURE_FRAME_SIZE,
            tap_size: FFT_SIZE,
        }
    }
}

/// Cuts an arbitrary-length sample stream into fixed-size frames
pub struct FrameChunker {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameChunker {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples; `emit` is called once per completed frame
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(Vec<f32>)) {
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_size {
                let frame = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                emit(frame);
            }
        }
    }

    /// Samples held back waiting for a full frame
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

/// Average interleaved channels down to one
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}


/// [`CaptureDevice`] backed by the default input device
pub struct MicrophoneCapture {
    config: CaptureConfig,
    /// Fresh per start so a lingering device thread never sees a later
    /// session's flag
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
    frames_captured: Arc<AtomicU64>,
    tap: SampleTap,
}

impl MicrophoneCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
            frames_captured: Arc::new(AtomicU64::new(0)),
            tap: SampleTap::new(config.tap_size),
        }
    }

    /// Frames handed to the callback since the last start
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    /// Check for errors reported by the device callback
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }
}

impl CaptureDevice for MicrophoneCapture {
    fn start(&mut self, mut on_frame: FrameCallback, on_ready: ReadyCallback) -> Result<(), AudioError> {
        if self.is_running() {
            return Err(AudioError::StreamError("capture already running".to_string()));
        }

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        self.running = Arc::new(AtomicBool::new(true));
        let running = Arc::clone(&self.running);
        let running_for_loop = Arc::clone(&self.running);
        let frames_captured = Arc::clone(&self.frames_captured);
        let tap = self.tap.clone();
        let target_rate = self.config.sample_rate;
        let mut chunker = FrameChunker::new(self.config.frame_size);

        self.frames_captured.store(0, Ordering::SeqCst);
        self.tap.clear();

        let spawned = thread::Builder::new()
            .name("microphone-capture".to_string())
            .spawn(move || {
                let stream = (|| {
                    let device = default_input_device()?;
                    let config = stream_config(&device, Direction::Input, target_rate)?;
                    let channels = config.channels as usize;
                    let mut resampler = if config.sample_rate.0 == target_rate {
                        None
                    } else {
                        Some(StreamResampler::new(config.sample_rate.0, target_rate, 1)?)
                    };

                    tracing::debug!(
                        device = device.name().unwrap_or_default(),
                        sample_rate = config.sample_rate.0,
                        channels,
                        "microphone capture initialized"
                    );

                    let stream = device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            if !running.load(Ordering::Relaxed) {
                                return;
                            }

                            let mono = downmix(data, channels);
                            let mono = match resampler.as_mut() {
                                None => mono,
                                Some(resampler) => match resampler.push(&[mono]) {
                                    Ok(mut out) => out.swap_remove(0),
                                    Err(e) => {
                                        tracing::error!(error = %e, "capture resampling failed");
                                        return;
                                    }
                                },
                            };

                            tap.write(&mono);
                            chunker.push(&mono, |frame| {
                                frames_captured.fetch_add(1, Ordering::Relaxed);
                                on_frame(frame);
                            });
                        },
                        move |err| {
                            let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                        },
                        None,
                    )?;
                    stream.play()?;
                    Ok::<_, AudioError>(stream)
                })();

                match stream {
                    Ok(stream) => {
                        tracing::info!(sample_rate = target_rate, "microphone capture started");
                        on_ready(Ok(()));
                        // Keep thread alive while running
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                        // Stream is dropped here, releasing the device
                        drop(stream);
                        tracing::debug!("microphone released");
                    }
                    Err(e) => {
                        running_for_loop.store(false, Ordering::SeqCst);
                        on_ready(Err(e));
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                self.thread_handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(AudioError::StreamError(e.to_string()))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        // Detached: the device thread sees the flag within one poll and
        // drops the stream itself
        if self.thread_handle.take().is_some() {
            tracing::debug!(frames = self.frames_captured(), "microphone capture stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn tap(&self) -> SampleTap {
        self.tap.clone()
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
