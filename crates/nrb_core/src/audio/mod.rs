//! Audio collaborators used by job workers.
//!
//! - `io`: load/write of mono sample buffers (`WavIo` via `hound`)
//! - `transform`: the per-chunk `NoiseTransform` contract
//! - `spectral_gate`: FFT-based stationary noise gate
//! - `filtering`: optional Butterworth low-pass post filter

pub mod filtering;
mod io;
mod spectral_gate;
mod transform;

pub use io::{AudioBuffer, AudioIo, AudioIoError, AudioIoResult, WavIo};
pub use spectral_gate::{SpectralGate, SpectralGateConfig};
pub use transform::{apply_checked, IdentityTransform, NoiseTransform, TransformError};
