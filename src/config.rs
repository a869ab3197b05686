//! Host configuration
//!
//! Loaded from JSON. Every section and field has a default, so a config
//! file only needs the values it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::audio::params::ParamDefaults;

/// Bit depths the snapshot encoder can write.
///
/// 16-bit files use the plain PCM format tag (1). hound writes 24 and 32-bit
/// integer files with the `WAVE_FORMAT_EXTENSIBLE` tag (0xFFFE, PCM subformat),
/// which some older readers reject; 16 is the default for that reason.
pub const SUPPORTED_BIT_DEPTHS: [u16; 3] = [16, 24, 32];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub audio: AudioConfig,
    pub recording: RecordingConfig,
    pub module: ModuleConfig,
    pub params: ParamDefaults,
    /// Write log lines here instead of stderr
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name; `None` picks the system default
    pub device: Option<String>,
    pub sample_rate: u32,
    /// Frames per render block, also the history headroom
    pub buffer_frames: u32,
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 48_000,
            buffer_frames: 256,
            channels: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Length of the history kept for snapshots
    pub seconds: u32,
    pub bit_depth: u16,
    /// Default snapshot destination
    pub path: PathBuf,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            seconds: 3,
            bit_depth: 16,
            path: PathBuf::from("recording.wav"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Compiled module binary that gets loaded
    pub binary_path: PathBuf,
    /// Source file watched for edits
    pub source_path: PathBuf,
    pub poll_interval_ms: u64,
    /// Load from a private copy of the binary on every reload
    pub shadow_copy: bool,
    /// Command that rebuilds the binary before each reload
    pub build: Option<BuildConfig>,
    /// Run the build once before the first load
    pub build_on_start: bool,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            binary_path: default_binary_path(),
            source_path: PathBuf::from("modules/sine/src/lib.rs"),
            poll_interval_ms: 100,
            shadow_copy: true,
            build: Some(BuildConfig::default()),
            build_on_start: true,
        }
    }
}

impl ModuleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// `None` waits for the build forever
    pub timeout_secs: Option<u64>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            program: "cargo".to_string(),
            args: ["build", "--release", "-p", "sine-plugin"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            working_dir: None,
            timeout_secs: Some(300),
        }
    }
}

/// `target/release/<prefix>plugin<suffix>` for the current platform
fn default_binary_path() -> PathBuf {
    PathBuf::from("target").join("release").join(format!(
        "{}plugin{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_SUFFIX
    ))
}

/// `<config dir>/hotdsp/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("hotdsp").join("config.json"))
}

impl HostConfig {
    /// Read and validate a config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// The config file to read: `explicit` if given, else the per-user
    /// config if it exists
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().filter(|path| path.is_file()),
        }
    }

    /// Load the located config file, or the defaults if there is none.
    /// Returns the path that was read alongside the config.
    ///
    /// Nothing is logged here: this runs before logging is set up.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        match Self::locate(explicit) {
            Some(path) => Ok((Self::from_file(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.sample_rate == 0 {
            return Err(ConfigError::Invalid("audio.sample_rate must be > 0".into()));
        }
        if self.audio.buffer_frames == 0 {
            return Err(ConfigError::Invalid("audio.buffer_frames must be > 0".into()));
        }
        if self.audio.channels == 0 {
            return Err(ConfigError::Invalid("audio.channels must be > 0".into()));
        }
        if self.recording.seconds == 0 {
            return Err(ConfigError::Invalid("recording.seconds must be > 0".into()));
        }
        if !SUPPORTED_BIT_DEPTHS.contains(&self.recording.bit_depth) {
            return Err(ConfigError::Invalid(format!(
                "recording.bit_depth {} is not one of {:?}",
                self.recording.bit_depth, SUPPORTED_BIT_DEPTHS
            )));
        }
        if self.module.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("module.poll_interval_ms must be > 0".into()));
        }
        if let Some(build) = &self.module.build {
            if build.program.trim().is_empty() {
                return Err(ConfigError::Invalid("module.build.program is empty".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = HostConfig::default();
        config.validate().unwrap();
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.audio.buffer_frames, 256);
        assert_eq!(config.recording.seconds, 3);
        assert_eq!(config.recording.bit_depth, 16);
        assert_eq!(config.module.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.params.frequency, 220.0);
        assert_eq!(config.params.gain, 0.1);

        let name = config.module.binary_path.file_name().unwrap().to_string_lossy();
        assert!(name.contains("plugin"));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: HostConfig = serde_json::from_str(
            r#"{
                "recording": { "seconds": 5 },
                "params": { "frequency": 440.0 },
                "module": { "build": null }
            }"#,
        )
        .unwrap();

        assert_eq!(config.recording.seconds, 5);
        assert_eq!(config.recording.bit_depth, 16);
        assert_eq!(config.params.frequency, 440.0);
        assert_eq!(config.params.gain, 0.1);
        assert!(config.module.build.is_none());
        assert!(config.module.shadow_copy);
        assert_eq!(config.audio.sample_rate, 48_000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = HostConfig::default();
        config.recording.bit_depth = 12;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = HostConfig::default();
        config.recording.seconds = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = HostConfig::default();
        config.audio.buffer_frames = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            HostConfig::from_file(&missing),
            Err(ConfigError::Read { .. })
        ));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            HostConfig::from_file(&broken),
            Err(ConfigError::Parse { .. })
        ));

        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"{ "audio": { "buffer_frames": 128 } }"#).unwrap();
        assert_eq!(HostConfig::from_file(&good).unwrap().audio.buffer_frames, 128);
    }

    #[test]
    fn test_load_reports_path_read() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("hotdsp.json");
        std::fs::write(&good, r#"{ "recording": { "seconds": 7 } }"#).unwrap();

        assert_eq!(HostConfig::locate(Some(&good)), Some(good.clone()));
        let (config, path) = HostConfig::load(Some(&good)).unwrap();
        assert_eq!(config.recording.seconds, 7);
        assert_eq!(path, Some(good));

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            HostConfig::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }
}
