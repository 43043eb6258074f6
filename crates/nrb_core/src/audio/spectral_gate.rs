//! Stationary spectral gating noise reduction.
//!
//! The noise profile is analysed once per call into a per-bin magnitude
//! threshold (mean + `n_std` standard deviations). Each STFT frame of the
//! chunk is then gated bin by bin and resynthesized with 50% overlap-add.

use std::f32::consts::PI;
use std::sync::Arc;

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::transform::{NoiseTransform, TransformError};

/// Spectral gate parameters.
#[derive(Debug, Clone)]
pub struct SpectralGateConfig {
    /// FFT frame length (power of two).
    pub fft_size: usize,
    /// Threshold in standard deviations above the mean noise magnitude.
    pub n_std: f32,
    /// How much gated bins are attenuated (1.0 = silenced).
    pub prop_decrease: f32,
}

impl Default for SpectralGateConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            n_std: 1.5,
            prop_decrease: 1.0,
        }
    }
}

/// Spectral gate noise reducer.
pub struct SpectralGate {
    config: SpectralGateConfig,
    window: Vec<f32>,
    /// Cached FFT planner shared by all workers.
    planner: Mutex<FftPlanner<f32>>,
}

impl SpectralGate {
    /// Create a gate with the given configuration.
    pub fn new(config: SpectralGateConfig) -> Self {
        let fft_size = config.fft_size.max(4).next_power_of_two();
        let config = SpectralGateConfig { fft_size, ..config };
        Self {
            window: hann(fft_size),
            config,
            planner: Mutex::new(FftPlanner::new()),
        }
    }

    fn plans(&self) -> (Arc<dyn Fft<f32>>, Arc<dyn Fft<f32>>) {
        let mut planner = self.planner.lock();
        let forward = planner.plan_fft_forward(self.config.fft_size);
        let inverse = planner.plan_fft_inverse(self.config.fft_size);
        (forward, inverse)
    }

    fn hop(&self) -> usize {
        self.config.fft_size / 2
    }

    /// Per-bin magnitude threshold derived from the noise profile.
    fn noise_threshold(&self, noise: &[f32], forward: &dyn Fft<f32>) -> Vec<f32> {
        let n = self.config.fft_size;
        let mut sum = vec![0.0f64; n];
        let mut sum_sq = vec![0.0f64; n];
        let mut frames = 0usize;

        for frame in self.frames(noise) {
            let spectrum = self.analyse(&frame, forward);
            for (bin, value) in spectrum.iter().enumerate() {
                let mag = f64::from(value.norm());
                sum[bin] += mag;
                sum_sq[bin] += mag * mag;
            }
            frames += 1;
        }

        let count = frames.max(1) as f64;
        sum.iter()
            .zip(sum_sq.iter())
            .map(|(&s, &sq)| {
                let mean = s / count;
                let var = (sq / count - mean * mean).max(0.0);
                (mean + f64::from(self.config.n_std) * var.sqrt()) as f32
            })
            .collect()
    }

    /// Frames of `samples` with a half-frame of zero padding on each side.
    fn frames(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let n = self.config.fft_size;
        let hop = self.hop();
        let padded = pad(samples, hop);
        let mut frames = Vec::new();
        let mut start = 0;
        while start + n <= padded.len() {
            frames.push(padded[start..start + n].to_vec());
            start += hop;
        }
        frames
    }

    fn analyse(&self, frame: &[f32], forward: &dyn Fft<f32>) -> Vec<Complex<f32>> {
        let mut buffer: Vec<Complex<f32>> = frame
            .iter()
            .zip(self.window.iter())
            .map(|(&x, &w)| Complex::new(x * w, 0.0))
            .collect();
        forward.process(&mut buffer);
        buffer
    }
}

impl Default for SpectralGate {
    fn default() -> Self {
        Self::new(SpectralGateConfig::default())
    }
}

impl NoiseTransform for SpectralGate {
    fn name(&self) -> &str {
        "spectral-gate"
    }

    fn apply(
        &self,
        chunk: &[f32],
        sample_rate: u32,
        noise_profile: &[f32],
    ) -> Result<Vec<f32>, TransformError> {
        if sample_rate == 0 {
            return Err(TransformError::UnsupportedSampleRate(sample_rate));
        }
        if noise_profile.is_empty() {
            return Err(TransformError::EmptyNoiseProfile);
        }
        if chunk.is_empty() {
            return Ok(Vec::new());
        }

        let (forward, inverse) = self.plans();
        let threshold = self.noise_threshold(noise_profile, forward.as_ref());

        let n = self.config.fft_size;
        let hop = self.hop();
        let gain_floor = (1.0 - self.config.prop_decrease).clamp(0.0, 1.0);
        let frames = self.frames(chunk);
        let total_len = (frames.len().saturating_sub(1)) * hop + n;
        let mut output = vec![0.0f32; total_len];
        let mut weight = vec![0.0f32; total_len];
        let scale = 1.0 / n as f32;

        for (index, frame) in frames.iter().enumerate() {
            let mut spectrum = self.analyse(frame, forward.as_ref());
            for (bin, value) in spectrum.iter_mut().enumerate() {
                if value.norm() < threshold[bin] {
                    *value *= gain_floor;
                }
            }
            inverse.process(&mut spectrum);

            let offset = index * hop;
            for (i, value) in spectrum.iter().enumerate() {
                output[offset + i] += value.re * scale;
                weight[offset + i] += self.window[i];
            }
        }

        // Drop the padding and undo the analysis window gain.
        let result = output
            .iter()
            .zip(weight.iter())
            .skip(hop)
            .take(chunk.len())
            .map(|(&y, &w)| if w > 1e-6 { y / w } else { 0.0 })
            .collect();
        Ok(result)
    }
}

/// Periodic Hann window.
fn hann(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos())
        .collect()
}

/// Zero-pad `lead` samples in front and enough at the end to fill the last frame.
fn pad(samples: &[f32], lead: usize) -> Vec<f32> {
    let frame = lead * 2;
    let body = samples.len() + 2 * lead;
    let padded_len = if body <= frame {
        frame
    } else {
        frame + (body - frame).div_ceil(lead) * lead
    };
    let mut padded = vec![0.0; padded_len];
    padded[lead..lead + samples.len()].copy_from_slice(samples);
    padded
}
