//! Per-chunk noise reduction contract.

use thiserror::Error;

/// Failure of a single chunk transform. Never fatal to a job.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    /// No noise profile samples were supplied.
    #[error("noise profile is empty")]
    EmptyNoiseProfile,

    /// The transform produced a different number of samples.
    #[error("transform returned {actual} samples for a {expected}-sample chunk")]
    LengthMismatch { expected: usize, actual: usize },

    /// The sample rate cannot be processed.
    #[error("unsupported sample rate {0} Hz")]
    UnsupportedSampleRate(u32),

    /// Generic failure with message.
    #[error("{0}")]
    Other(String),
}

impl TransformError {
    /// Create a generic error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Noise reduction applied to one chunk at a time.
///
/// Implementations receive the same `noise_profile` for every chunk of a
/// job so the noise estimate stays consistent across chunk boundaries.
/// The returned buffer must have exactly `chunk.len()` samples.
pub trait NoiseTransform: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Transform one chunk.
    fn apply(
        &self,
        chunk: &[f32],
        sample_rate: u32,
        noise_profile: &[f32],
    ) -> Result<Vec<f32>, TransformError>;
}

/// Transform that returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl NoiseTransform for IdentityTransform {
    fn name(&self) -> &str {
        "identity"
    }

    fn apply(
        &self,
        chunk: &[f32],
        _sample_rate: u32,
        _noise_profile: &[f32],
    ) -> Result<Vec<f32>, TransformError> {
        Ok(chunk.to_vec())
    }
}

/// Run a transform and enforce the length contract.
///
/// Returns the transformed chunk, or the error that made the caller fall
/// back to the untransformed chunk.
pub fn apply_checked(
    transform: &dyn NoiseTransform,
    chunk: &[f32],
    sample_rate: u32,
    noise_profile: &[f32],
) -> Result<Vec<f32>, TransformError> {
    let out = transform.apply(chunk, sample_rate, noise_profile)?;
    if out.len() != chunk.len() {
        return Err(TransformError::LengthMismatch {
            expected: chunk.len(),
            actual: out.len(),
        });
    }
    Ok(out)
}
