//! Audio file loading and writing.
//!
//! The orchestrator only needs `load` and `write`; `WavIo` implements them
//! with `hound`. Multi-channel input is down-mixed to mono and output is
//! always 32-bit float mono.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use thiserror::Error;

/// Errors from decoding or encoding audio files.
#[derive(Error, Debug)]
pub enum AudioIoError {
    /// The file could not be opened or created.
    #[error("Failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not a readable WAV or a sample could not be decoded.
    #[error("Failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    /// Writing or finalizing the output failed.
    #[error("Failed to encode {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    /// The format cannot be represented as samples.
    #[error("Unsupported audio format in {}: {message}", path.display())]
    Unsupported { path: PathBuf, message: String },
}

/// Result type for audio I/O.
pub type AudioIoResult<T> = Result<T, AudioIoError>;

/// Decoded mono audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Mono samples in [-1, 1].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// File load/write collaborator used by job workers.
pub trait AudioIo: Send + Sync {
    /// Load a file into mono samples.
    fn load(&self, path: &Path) -> AudioIoResult<AudioBuffer>;

    /// Write mono samples to `path`, replacing any existing file.
    fn write(&self, path: &Path, samples: &[f32], sample_rate: u32) -> AudioIoResult<()>;
}

/// WAV reader/writer backed by `hound`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavIo;

impl AudioIo for WavIo {
    fn load(&self, path: &Path) -> AudioIoResult<AudioBuffer> {
        let file = File::open(path).map_err(|source| AudioIoError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = WavReader::new(BufReader::with_capacity(1024 * 1024, file))
            .map_err(|source| decode_error(path, source))?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(AudioIoError::Unsupported {
                path: path.to_path_buf(),
                message: "zero channels".to_string(),
            });
        }

        let interleaved = read_interleaved(reader, spec, path)?;
        Ok(AudioBuffer {
            samples: downmix(&interleaved, spec.channels as usize),
            sample_rate: spec.sample_rate,
        })
    }

    fn write(&self, path: &Path, samples: &[f32], sample_rate: u32) -> AudioIoResult<()> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let file = File::create(path).map_err(|source| AudioIoError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = WavWriter::new(BufWriter::with_capacity(1024 * 1024, file), spec)
            .map_err(|source| encode_error(path, source))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|source| encode_error(path, source))?;
        }
        writer.finalize().map_err(|source| encode_error(path, source))
    }
}

fn read_interleaved(
    mut reader: WavReader<BufReader<File>>,
    spec: WavSpec,
    path: &Path,
) -> AudioIoResult<Vec<f32>> {
    match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(|source| decode_error(path, source)))
            .collect(),
        SampleFormat::Int => {
            let scale = (1i64 << spec.bits_per_sample.saturating_sub(1)).max(1) as f32;
            reader
                .samples::<i32>()
                .map(|s| {
                    s.map(|value| value as f32 / scale)
                        .map_err(|source| decode_error(path, source))
                })
                .collect()
        }
    }
}

/// Average interleaved frames down to one channel.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

fn decode_error(path: &Path, source: hound::Error) -> AudioIoError {
    AudioIoError::Decode {
        path: path.to_path_buf(),
        source,
    }
}

fn encode_error(path: &Path, source: hound::Error) -> AudioIoError {
    AudioIoError::Encode {
        path: path.to_path_buf(),
        source,
    }
}
