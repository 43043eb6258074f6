//! Post-reduction low-pass filtering.
//!
//! Butterworth response built from cascaded biquad sections.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F64};

/// Default filter order for the post filter.
pub const DEFAULT_ORDER: usize = 4;

/// Apply a Butterworth low-pass filter to mono samples.
///
/// Returns the input unchanged when the cutoff is not below Nyquist
/// or not positive.
pub fn low_pass(samples: &[f32], sample_rate: u32, cutoff_hz: f64, order: usize) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let nyquist = f64::from(sample_rate) / 2.0;
    if cutoff_hz <= 0.0 || cutoff_hz >= nyquist {
        return samples.to_vec();
    }

    let coeffs = match Coefficients::<f64>::from_params(
        Type::LowPass,
        sample_rate.hz(),
        cutoff_hz.hz(),
        Q_BUTTERWORTH_F64,
    ) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Low-pass design failed at {} Hz: {:?}", cutoff_hz, e);
            return samples.to_vec();
        }
    };

    let mut result: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    apply_cascaded(&mut result, &coeffs, order);
    result.into_iter().map(|s| s as f32).collect()
}

/// Run `order / 2` (at least one) biquad sections in series.
fn apply_cascaded(samples: &mut [f64], coeffs: &Coefficients<f64>, order: usize) {
    let sections = order.div_ceil(2).max(1);
    for _ in 0..sections {
        let mut filter = DirectForm2Transposed::<f64>::new(*coeffs);
        for sample in samples.iter_mut() {
            *sample = filter.run(*sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn energy(samples: &[f32]) -> f32 {
        samples.iter().map(|x| x * x).sum()
    }

    #[test]
    fn lowpass_attenuates_high_freq() {
        let sample_rate = 48_000;
        let n = 4_800;
        let high: Vec<f32> = (0..n)
            .map(|i| (2.0 * PI * 12_000.0 * i as f32 / sample_rate as f32).sin())
            .collect();

        let filtered = low_pass(&high, sample_rate, 2_000.0, DEFAULT_ORDER);

        assert_eq!(filtered.len(), n);
        let start = n / 2;
        assert!(energy(&filtered[start..]) < energy(&high[start..]) * 0.01);
    }

    #[test]
    fn passband_is_kept() {
        let sample_rate = 48_000;
        let n = 4_800;
        let low: Vec<f32> = (0..n)
            .map(|i| (2.0 * PI * 100.0 * i as f32 / sample_rate as f32).sin())
            .collect();

        let filtered = low_pass(&low, sample_rate, 18_000.0, DEFAULT_ORDER);

        let start = n / 2;
        let ratio = energy(&filtered[start..]) / energy(&low[start..]);
        assert!(ratio > 0.9 && ratio < 1.1, "ratio {}", ratio);
    }

    #[test]
    fn cutoff_above_nyquist_is_passthrough() {
        let samples = vec![0.1, -0.4, 0.9, 0.0];
        assert_eq!(low_pass(&samples, 22_050, 18_000.0, DEFAULT_ORDER), samples);
        assert_eq!(low_pass(&samples, 44_100, 0.0, DEFAULT_ORDER), samples);
    }

    #[test]
    fn empty_samples_handled() {
        assert!(low_pass(&[], 44_100, 1_000.0, DEFAULT_ORDER).is_empty());
    }
}
