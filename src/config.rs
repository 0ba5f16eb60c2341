// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::{CaptureBackendType, DetectionType};
use crate::constants::{TORCH_POLL_INTERVAL, VIRTUAL_FRAME_INTERVAL, decoder, layout};
use crate::errors::ScannerResult;
use crate::session::VideoGravity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "scanner";
const CONFIG_FILE: &str = "config.json";

/// Persistent scanner settings
///
/// Missing fields take their default, so files written by older versions
/// keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capture backend (V4L2 or virtual)
    pub backend: CaptureBackendType,
    /// Device path to prefer over enumeration order
    pub preferred_device: Option<String>,
    /// Symbologies to scan for
    pub detection_types: Vec<DetectionType>,
    /// Side of the interest square as a fraction of the content width
    pub interest_fraction: f32,
    /// Height reserved for controls below the viewfinder
    pub bottom_inset: f32,
    /// How the preview fills its container
    pub video_gravity: VideoGravity,
    /// Longest side of the region handed to the decoder
    pub max_dimension: u32,
    /// Torch state polling period
    pub torch_poll_interval_ms: u64,
    /// Frame period of the virtual camera
    pub frame_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: CaptureBackendType::default(),
            preferred_device: None,
            detection_types: vec![DetectionType::Qr],
            interest_fraction: layout::INTEREST_FRACTION,
            bottom_inset: layout::BOTTOM_CONTROL_HEIGHT,
            video_gravity: VideoGravity::default(),
            max_dimension: decoder::MAX_DIMENSION,
            torch_poll_interval_ms: TORCH_POLL_INTERVAL.as_millis() as u64,
            frame_interval_ms: VIRTUAL_FRAME_INTERVAL.as_millis() as u64,
        }
    }
}

impl Config {
    /// `~/.config/scanner/config.json`, if the platform has a config dir
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            warn!("No config directory, using default settings");
            return Self::default();
        };
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using default settings");
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> ScannerResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        info!(path = %path.display(), "Loaded config");
        Ok(config.sanitized())
    }

    pub fn save(&self) -> ScannerResult<()> {
        match Self::path() {
            Some(path) => self.save_to(&path),
            None => Err(crate::errors::ScannerError::Config(
                "no config directory".into(),
            )),
        }
    }

    pub fn save_to(&self, path: &Path) -> ScannerResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    pub fn torch_poll_interval(&self) -> Duration {
        Duration::from_millis(self.torch_poll_interval_ms.max(1))
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    /// Clamp values a hand-edited file could get wrong
    fn sanitized(mut self) -> Self {
        if !(self.interest_fraction > 0.0 && self.interest_fraction <= 1.0) {
            warn!(
                value = self.interest_fraction,
                "interest_fraction out of range, using default"
            );
            self.interest_fraction = layout::INTEREST_FRACTION;
        }
        if !self.bottom_inset.is_finite() || self.bottom_inset < 0.0 {
            self.bottom_inset = layout::BOTTOM_CONTROL_HEIGHT;
        }
        self.max_dimension = self.max_dimension.max(decoder::MIN_DIMENSION);
        self
    }
}
