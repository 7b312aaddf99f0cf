//! Visualization feed
//!
//! A [`SampleTap`] keeps the most recent samples flowing through a graph
//! node; audio threads write into it and never read. An [`Analyser`] turns
//! the tap's current contents into byte magnitudes for a render loop, the
//! way a browser analyser node reports frequency data.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use parking_lot::Mutex;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::constants::{FFT_SIZE, MAX_DECIBELS, MIN_DECIBELS, SMOOTHING_TIME_CONSTANT};

/// Shared window of the latest samples through a node
#[derive(Clone)]
pub struct SampleTap {
    inner: Arc<Mutex<VecDeque<f32>>>,
    capacity: usize,
}

impl SampleTap {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append samples, discarding the oldest beyond capacity
    pub fn write(&self, samples: &[f32]) {
        let mut history = self.inner.lock();
        let skip = samples.len().saturating_sub(self.capacity);
        for &sample in &samples[skip..] {
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(sample);
        }
    }

    /// Copy of the window, oldest first, zero-padded to capacity
    pub fn window(&self) -> Vec<f32> {
        let history = self.inner.lock();
        let mut out = vec![0.0; self.capacity - history.len()];
        out.extend(history.iter().copied());
        out
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Analyser tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyserSettings {
    /// Power of two; the analyser reports `fft_size / 2` bins
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
}

impl Default for AnalyserSettings {
    fn default() -> Self {
        Self {
            fft_size: FFT_SIZE,
            smoothing: SMOOTHING_TIME_CONSTANT,
            min_db: MIN_DECIBELS,
            max_db: MAX_DECIBELS,
        }
    }
}

/// Frequency-domain view over a [`SampleTap`]
pub struct Analyser {
    tap: SampleTap,
    settings: AnalyserSettings,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl Analyser {
    pub fn new(tap: SampleTap, settings: AnalyserSettings) -> Self {
        let n = settings.fft_size;
        let fft = FftPlanner::<f32>::new().plan_fft_forward(n);
        Self {
            tap,
            settings,
            fft,
            window: blackman(n),
            smoothed: vec![0.0; n / 2],
            scratch: vec![Complex::new(0.0, 0.0); n],
        }
    }

    pub fn bin_count(&self) -> usize {
        self.settings.fft_size / 2
    }

    /// Current magnitudes, one byte per bin.
    ///
    /// Lossy and smoothed across calls; for display only.
    pub fn frequency_snapshot(&mut self) -> Vec<u8> {
        let n = self.settings.fft_size;
        let samples = self.tap.window();
        // The tap may be larger than the FFT; analyse the newest samples
        let newest = &samples[samples.len().saturating_sub(n)..];
        let pad = n - newest.len();

        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { newest[i - pad] };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let tau = self.settings.smoothing;
        let range = self.settings.max_db - self.settings.min_db;
        let scale = 1.0 / n as f32;

        self.smoothed
            .iter_mut()
            .zip(&self.scratch)
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() * scale;
                *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
                let db = 20.0 * smoothed.log10();
                let level = (255.0 / range) * (db - self.settings.min_db);
                // log10(0) is -inf and clamps to 0; NaN input must too
                if level.is_nan() {
                    0
                } else {
                    level.clamp(0.0, 255.0) as u8
                }
            })
            .collect()
    }
}

fn blackman(n: usize) -> Vec<f32> {
    const A0: f32 = 0.42;
    const A1: f32 = 0.5;
    const A2: f32 = 0.08;
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            A0 - A1 * (2.0 * PI * x).cos() + A2 * (4.0 * PI * x).cos()
        })
        .collect()
}
