//! Snapshot export
//!
//! Writes the most recent stretch of rendered audio to a mono PCM WAV file.

use hound::{SampleFormat, WavSpec, WavWriter};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::audio::history::HistoryRing;
use crate::config::SUPPORTED_BIT_DEPTHS;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to create {}: {source}", .path.display())]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("unsupported bit depth {0} (expected one of 16, 24, 32)")]
    UnsupportedBitDepth(u16),

    #[error("failed to encode {}: {source}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("failed to move snapshot into place at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub frames: usize,
    pub sample_rate: u32,
    pub bit_depth: u16,
    /// Largest absolute sample in the snapshot
    pub peak: f32,
}

pub struct SnapshotEncoder {
    history: Arc<HistoryRing>,
    sample_rate: u32,
    bit_depth: u16,
}

impl SnapshotEncoder {
    pub fn new(history: Arc<HistoryRing>, sample_rate: u32, bit_depth: u16) -> Self {
        Self {
            history,
            sample_rate,
            bit_depth,
        }
    }

    /// Snapshot the history ring and write it to `path`.
    ///
    /// The file appears at `path` only once it is complete; a failed export
    /// leaves nothing behind.
    pub fn export(&self, path: &Path) -> Result<ExportSummary, ExportError> {
        if !SUPPORTED_BIT_DEPTHS.contains(&self.bit_depth) {
            return Err(ExportError::UnsupportedBitDepth(self.bit_depth));
        }

        let samples = self.history.snapshot();
        let partial = partial_path(path);

        let result = write_wav(&partial, &samples, self.sample_rate, self.bit_depth)
            .and_then(|()| {
                std::fs::rename(&partial, path).map_err(|source| ExportError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            });

        if let Err(e) = result {
            let _ = std::fs::remove_file(&partial);
            log::error!("Snapshot export failed: {}", e);
            return Err(e);
        }

        let peak = samples.iter().fold(0.0f32, |p, s| p.max(s.abs()));
        log::info!(
            "Exported {} frames ({} Hz, {}-bit) to {:?}",
            samples.len(),
            self.sample_rate,
            self.bit_depth,
            path
        );

        Ok(ExportSummary {
            path: path.to_path_buf(),
            frames: samples.len(),
            sample_rate: self.sample_rate,
            bit_depth: self.bit_depth,
            peak,
        })
    }
}

/// `<path>.partial`, next to the destination so the final rename stays on
/// one filesystem
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

/// Full-scale integer for `sample`, clamped to [-1, 1]
pub fn quantize(sample: f32, bit_depth: u16) -> i32 {
    let max_val = ((1u64 << (bit_depth - 1)) - 1) as f64;
    let clamped = if sample.is_finite() {
        sample.clamp(-1.0, 1.0) as f64
    } else {
        0.0
    };
    (clamped * max_val).round() as i32
}

fn write_wav(path: &Path, samples: &[f32], sample_rate: u32, bit_depth: u16) -> Result<(), ExportError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: bit_depth,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec).map_err(|source| ExportError::OpenFailed {
        path: path.to_path_buf(),
        source,
    })?;

    let encode = |source| ExportError::Encode {
        path: path.to_path_buf(),
        source,
    };

    for &sample in samples {
        writer.write_sample(quantize(sample, bit_depth)).map_err(encode)?;
    }

    // Back-patches the RIFF and data chunk sizes
    writer.finalize().map_err(encode)?;
    Ok(())
}
