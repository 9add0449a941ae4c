use crate::timeline::quarter_ms;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_BPM: u32 = 120;
/// Slowest tempo whose quarter note still fits a 24-bit tempo event.
pub const MIN_BPM: u32 = 4;
pub const DEFAULT_NAME: &str = "Track1";
pub const FILE_EXTENSION: &str = "mid";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("tempo must be at least {min} bpm, got {0}", min = MIN_BPM)]
    TempoTooSlow(u32),
    #[error("output name must not be empty")]
    EmptyName,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub bpm: u32,
    /// Base name of the event file, also used as the track name.
    pub name: String,
    pub output_dir: PathBuf,
    /// Identify the device by Bluetooth address rather than platform UUID.
    pub use_bdaddr: bool,
    /// Where to keep the raw notifications of this session, if anywhere.
    pub capture: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            name: DEFAULT_NAME.to_string(),
            output_dir: PathBuf::from("."),
            use_bdaddr: false,
            capture: None,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bpm < MIN_BPM {
            return Err(ConfigError::TempoTooSlow(self.bpm));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        Ok(())
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.name, FILE_EXTENSION))
    }

    pub fn quarter_ms(&self) -> f64 {
        quarter_ms(self.bpm)
    }
}
