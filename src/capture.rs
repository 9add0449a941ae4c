use crate::events::RawPacket;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture encode: {0}")]
    Encode(#[from] ron::Error),
    #[error("capture decode: {0}")]
    Decode(#[from] ron::error::SpannedError),
    #[error("packet {index} has no usable arrival time ({arrival_ms})")]
    BadArrival { index: usize, arrival_ms: f64 },
}

/// Raw notifications of one session, kept so a take can be replayed offline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub device: String,
    pub packets: Vec<RawPacket>,
}

impl Capture {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            packets: Vec::new(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), CaptureError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, CaptureError> {
        let ron_string = fs::read_to_string(path)?;
        let capture: Capture = ron::from_str(&ron_string)?;
        if let Some((index, packet)) = capture
            .packets
            .iter()
            .enumerate()
            .find(|(_, p)| !p.arrival_ms.is_finite())
        {
            return Err(CaptureError::BadArrival {
                index,
                arrival_ms: packet.arrival_ms,
            });
        }
        Ok(capture)
    }
}
