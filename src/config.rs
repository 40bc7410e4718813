//! Configuration management for stream engine tuning
//!
//! This module provides runtime configuration loading from JSON files, so
//! fade lengths, stop timeouts and meter ballistics can be adjusted without
//! recompilation.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub stream: StreamSettings,
    pub meter: MeterSettings,
}

/// Stream lifecycle parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Block size used when the caller leaves `frames_per_buffer` at zero
    pub default_frames_per_buffer: u32,
    /// Fade-in length applied by `start()`
    pub fade_in_secs: f64,
    /// Fade-out length applied by `stop()`
    pub fade_out_secs: f64,
    /// Fade-out length applied when `close()` has to stop a running stream
    pub close_fade_out_secs: f64,
    /// Upper bound on how long `stop()` waits for the fade-out to settle
    pub stop_timeout_ms: u64,
    /// Poll period while waiting for the fade-out
    pub stop_poll_interval_ms: u64,
    /// Poll period of `run_until_complete()`
    pub run_poll_interval_ms: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            default_frames_per_buffer: 512,
            fade_in_secs: 0.1,
            fade_out_secs: 0.25,
            close_fade_out_secs: 0.5,
            stop_timeout_ms: 5000,
            stop_poll_interval_ms: 10,
            run_poll_interval_ms: 50,
        }
    }
}

impl StreamSettings {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms.max(1))
    }

    pub fn run_poll_interval(&self) -> Duration {
        Duration::from_millis(self.run_poll_interval_ms.max(1))
    }
}

/// Envelope follower ballistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterSettings {
    pub attack_ms: f64,
    pub release_ms: f64,
}

impl Default for MeterSettings {
    fn default() -> Self {
        Self {
            attack_ms: 20.0,
            release_ms: 500.0,
        }
    }
}

impl EngineConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or the defaults if the file is missing or
    /// its JSON is invalid. Missing fields take their default values.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the working directory's assets folder
    pub fn load() -> Self {
        Self::load_from_file("assets/paudio_config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.stream.default_frames_per_buffer, 512);
        assert_eq!(config.stream.fade_in_secs, 0.1);
        assert_eq!(config.stream.fade_out_secs, 0.25);
        assert_eq!(config.stream.close_fade_out_secs, 0.5);
        assert_eq!(config.stream.stop_timeout(), Duration::from_secs(5));
        assert_eq!(config.stream.stop_poll_interval(), Duration::from_millis(10));
        assert_eq!(config.meter.attack_ms, 20.0);
        assert_eq!(config.meter.release_ms, 500.0);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "stream": {{ "stop_timeout_ms": 250 }} }}"#).unwrap();

        let config = EngineConfig::load_from_file(file.path());
        assert_eq!(config.stream.stop_timeout_ms, 250);
        assert_eq!(config.stream.fade_out_secs, 0.25);
        assert_eq!(config.meter, MeterSettings::default());
    }

    #[test]
    fn test_invalid_json_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let config = EngineConfig::load_from_file(file.path());
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_from_file(dir.path().join("absent.json"));
        assert_eq!(config, EngineConfig::default());
    }
}
