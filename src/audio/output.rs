//! Speaker output graph
//!
//! A cpal output stream runs continuously on its own thread and pulls from
//! a [`Mixer`]. The number of frames the mixer has rendered is the output
//! clock, so silence advances time exactly like audio does.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::audio::buffer::PlayableBuffer;
use crate::audio::device::{default_output_device, stream_config, Direction};
use crate::audio::graph::{OutputGraph, SourceId};
use crate::audio::resample::StreamResampler;
use crate::audio::visualizer::SampleTap;
use crate::error::AudioError;

/// How long to wait for the device thread to report the stream is up
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

struct Voice {
    id: SourceId,
    buffer: Arc<PlayableBuffer>,
    start_frame: u64,
    position: usize,
}

/// Sums every started source into the output timeline
pub(crate) struct Mixer {
    voices: Vec<Voice>,
    ended_sink: Option<mpsc::UnboundedSender<SourceId>>,
}

impl Mixer {
    fn new() -> Self {
        Self {
            voices: Vec::new(),
            ended_sink: None,
        }
    }

    fn add(&mut self, id: SourceId, buffer: Arc<PlayableBuffer>, start_frame: u64) {
        self.voices.push(Voice {
            id,
            buffer,
            start_frame,
            position: 0,
        });
    }

    fn remove(&mut self, id: SourceId) {
        self.voices.retain(|v| v.id != id);
    }

    /// Render `out[c].len()` frames beginning at timeline frame `base`.
    ///
    /// A voice whose start frame already passed begins at `base`. Finished
    /// voices are dropped and reported.
    fn render(&mut self, base: u64, out: &mut [Vec<f32>]) {
        for channel in out.iter_mut() {
            channel.fill(0.0);
        }
        let frames = out.first().map_or(0, Vec::len);

        for voice in &mut self.voices {
            let len = voice.buffer.frames();
            let voice_channels = voice.buffer.channel_count();
            let offset = voice.start_frame.saturating_sub(base);
            if offset >= frames as u64 {
                continue;
            }

            for i in offset as usize..frames {
                if voice.position >= len {
                    break;
                }
                for (c, channel) in out.iter_mut().enumerate() {
                    // Mono buffers feed every output channel
                    let source = voice.buffer.planar()[c.min(voice_channels - 1)][voice.position];
                    channel[i] += source;
                }
                voice.position += 1;
            }
        }

        for channel in out.iter_mut() {
            for sample in channel.iter_mut() {
                *sample = sample.clamp(-1.0, 1.0);
            }
        }

        let sink = &self.ended_sink;
        self.voices.retain(|voice| {
            let done = voice.position >= voice.buffer.frames();
            if done {
                if let Some(sink) = sink {
                    let _ = sink.send(voice.id);
                }
            }
            !done
        });
    }
}

/// Device-side state owned by the cpal callback
struct RenderState {
    mixer: Arc<Mutex<Mixer>>,
    clock: Arc<AtomicU64>,
    tap: SampleTap,
    channels: usize,
    resampler: Option<StreamResampler>,
    /// Resampled frames waiting for the device, per channel
    fifo: Vec<VecDeque<f32>>,
    scratch: Vec<Vec<f32>>,
}

impl RenderState {
    fn fill(&mut self, data: &mut [f32]) {
        let frames = data.len() / self.channels;

        match self.resampler.as_mut() {
            None => {
                for channel in &mut self.scratch {
                    channel.resize(frames, 0.0);
                }
                let base = self.clock.load(Ordering::Acquire);
                self.mixer.lock().render(base, &mut self.scratch);
                self.clock.fetch_add(frames as u64, Ordering::AcqRel);
                for (channel, samples) in self.fifo.iter_mut().zip(&self.scratch) {
                    channel.extend(samples.iter().copied());
                }
            }
            Some(resampler) => {
                while self.fifo[0].len() < frames {
                    let block = resampler.input_frames_next();
                    for channel in &mut self.scratch {
                        channel.resize(block, 0.0);
                    }
                    let base = self.clock.load(Ordering::Acquire);
                    self.mixer.lock().render(base, &mut self.scratch);
                    self.clock.fetch_add(block as u64, Ordering::AcqRel);

                    match resampler.push(&self.scratch) {
                        Ok(resampled) => {
                            for (channel, samples) in self.fifo.iter_mut().zip(resampled) {
                                channel.extend(samples);
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "output resampling failed");
                            break;
                        }
                    }
                }
            }
        }

        let mut mono = Vec::with_capacity(frames);
        for frame in data.chunks_mut(self.channels) {
            for (c, out) in frame.iter_mut().enumerate() {
                *out = self.fifo[c].pop_front().unwrap_or(0.0);
            }
            mono.push(frame[0]);
        }
        self.tap.write(&mono);
    }
}

/// [`OutputGraph`] backed by the default output device
pub struct SpeakerOutput {
    mixer: Arc<Mutex<Mixer>>,
    /// Frames rendered at `sample_rate`
    clock: Arc<AtomicU64>,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
    tap: SampleTap,
    next_id: SourceId,
}

impl SpeakerOutput {
    /// Open the default output device with a timeline running at
    /// `sample_rate`. Blocks until the device thread reports in, so async
    /// callers should go through `spawn_blocking`.
    ///
    /// `tap_size` is the number of rendered samples kept for the analyser.
    pub fn open(sample_rate: u32, tap_size: usize) -> Result<Self, AudioError> {
        let mixer = Arc::new(Mutex::new(Mixer::new()));
        let clock = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let tap = SampleTap::new(tap_size);

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (error_tx, error_rx) = bounded::<AudioError>(16);

        let mixer_for_thread = Arc::clone(&mixer);
        let clock_for_thread = Arc::clone(&clock);
        let running_for_loop = Arc::clone(&running);
        let tap_for_thread = tap.clone();

        let handle = thread::Builder::new()
            .name("speaker-output".to_string())
            .spawn(move || {
                let stream = (|| {
                    let device = default_output_device()?;
                    let config = stream_config(&device, Direction::Output, sample_rate)?;
                    let channels = config.channels as usize;
                    let resampler = if config.sample_rate.0 == sample_rate {
                        None
                    } else {
                        Some(StreamResampler::new(sample_rate, config.sample_rate.0, channels)?)
                    };

                    let mut state = RenderState {
                        mixer: mixer_for_thread,
                        clock: clock_for_thread,
                        tap: tap_for_thread,
                        channels,
                        resampler,
                        fifo: vec![VecDeque::new(); channels],
                        scratch: vec![Vec::new(); channels],
                    };

                    tracing::debug!(
                        device = device.name().unwrap_or_default(),
                        sample_rate = config.sample_rate.0,
                        channels,
                        "speaker output initialized"
                    );

                    let stream = device.build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| state.fill(data),
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
                        let _ = ready_tx.send(Ok(()));
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                        drop(stream);
                    }
                    Err(e) => {
                        running_for_loop.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv_timeout(OPEN_TIMEOUT)
            .unwrap_or_else(|_| Err(AudioError::DeviceUnavailable("output device did not start".to_string())));

        let mut output = Self {
            mixer,
            clock,
            sample_rate,
            running,
            thread_handle: Some(handle),
            error_rx,
            tap,
            next_id: 0,
        };
        match ready {
            Ok(()) => Ok(output),
            Err(e) => {
                output.close();
                Err(e)
            }
        }
    }

    /// Stop the device stream. Idempotent.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Check for errors reported by the device callback
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

impl OutputGraph for SpeakerOutput {
    fn now(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / f64::from(self.sample_rate)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start_source(&mut self, buffer: Arc<PlayableBuffer>, at: f64) -> Result<SourceId, AudioError> {
        if !self.is_running() {
            return Err(AudioError::SchedulingFailed("output stream is not running".to_string()));
        }
        if let Some(err) = self.check_errors() {
            tracing::warn!(error = %err, "output stream reported an error");
        }
        if buffer.sample_rate() != self.sample_rate {
            return Err(AudioError::SchedulingFailed(format!(
                "buffer at {} Hz on a {} Hz timeline",
                buffer.sample_rate(),
                self.sample_rate
            )));
        }

        self.next_id += 1;
        let id = self.next_id;
        let start_frame = (at.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        self.mixer.lock().add(id, buffer, start_frame);
        Ok(id)
    }

    fn stop_source(&mut self, id: SourceId) {
        self.mixer.lock().remove(id);
    }

    fn set_ended_sink(&mut self, sink: mpsc::UnboundedSender<SourceId>) {
        self.mixer.lock().ended_sink = Some(sink);
    }

    fn tap(&self) -> SampleTap {
        self.tap.clone()
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        self.close();
    }
}
