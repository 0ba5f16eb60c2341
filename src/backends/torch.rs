// SPDX-License-Identifier: GPL-3.0-only

//! Torch hardware access
//!
//! [`TorchDevice`] is the narrow interface the torch controller drives. The
//! Linux implementation discovers LEDs exposed at `/sys/class/leds/*:flash`
//! or `*:torch` and uses the plain `brightness` file, which is group-writable
//! by `feedbackd`, rather than the root-only strobe interface.

use super::types::{BackendError, BackendResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LEDS_DIR: &str = "/sys/class/leds";

/// Torch operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TorchMode {
    #[default]
    Off,
    On,
}

impl TorchMode {
    pub fn toggled(self) -> Self {
        match self {
            TorchMode::Off => TorchMode::On,
            TorchMode::On => TorchMode::Off,
        }
    }
}

/// A controllable illumination source next to the camera
pub trait TorchDevice: Send {
    /// Human-readable name
    fn name(&self) -> &str;

    /// Whether the torch can currently be switched (false while overheated,
    /// or when the user lacks write access)
    fn is_available(&self) -> bool;

    /// Whether the torch is currently lit, as reported by the hardware
    fn is_active(&self) -> bool;

    /// Whether switching to `mode` is possible at all
    fn supports(&self, mode: TorchMode) -> bool {
        let _ = mode;
        self.is_available()
    }

    fn set_mode(&mut self, mode: TorchMode) -> BackendResult<()>;
}

/// An LED discovered via sysfs
#[derive(Debug, Clone)]
pub struct SysfsTorch {
    /// Sysfs path, e.g. `/sys/class/leds/white:flash`
    path: PathBuf,
    /// Maximum brightness value (from `max_brightness` file)
    max_brightness: u32,
    /// Directory basename
    name: String,
}

impl SysfsTorch {
    /// Scan `/sys/class/leds/` for flash or torch LEDs, writable ones first
    pub fn discover() -> Vec<SysfsTorch> {
        Self::discover_in(Path::new(LEDS_DIR))
    }

    /// Scan an arbitrary LED class directory
    pub fn discover_in(leds_dir: &Path) -> Vec<SysfsTorch> {
        let Ok(entries) = std::fs::read_dir(leds_dir) else {
            debug!(path = %leds_dir.display(), "Cannot read LED class directory, no torch");
            return Vec::new();
        };

        let mut devices = Vec::new();

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name_str) = name.to_str() else {
                continue;
            };

            // Match entries like "white:flash", "white:torch"
            if !name_str.ends_with(":flash") && !name_str.ends_with(":torch") {
                continue;
            }

            let led_path = entry.path();
            let max_brightness_path = led_path.join("max_brightness");
            let max_brightness = match std::fs::read_to_string(&max_brightness_path) {
                Ok(s) => match s.trim().parse::<u32>() {
                    Ok(v) if v > 0 => v,
                    _ => {
                        warn!(
                            path = %max_brightness_path.display(),
                            "Invalid max_brightness value"
                        );
                        continue;
                    }
                },
                Err(e) => {
                    warn!(
                        path = %max_brightness_path.display(),
                        error = %e,
                        "Cannot read max_brightness"
                    );
                    continue;
                }
            };

            info!(name = name_str, max_brightness, "Discovered torch LED");
            devices.push(SysfsTorch {
                path: led_path,
                max_brightness,
                name: name_str.to_string(),
            });
        }

        // Writable LEDs first, then by name for deterministic ordering
        devices.sort_by(|a, b| {
            b.is_writable()
                .cmp(&a.is_writable())
                .then_with(|| a.name.cmp(&b.name))
        });
        devices
    }

    fn brightness_path(&self) -> PathBuf {
        self.path.join("brightness")
    }

    fn is_writable(&self) -> bool {
        std::fs::OpenOptions::new()
            .write(true)
            .open(self.brightness_path())
            .is_ok()
    }

    fn brightness(&self) -> Option<u32> {
        std::fs::read_to_string(self.brightness_path())
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Set raw brightness value (0 = off, max_brightness = full)
    fn set_brightness(&self, value: u32) -> BackendResult<()> {
        let clamped = value.min(self.max_brightness);
        std::fs::write(self.brightness_path(), clamped.to_string()).map_err(BackendError::from)
    }
}

impl TorchDevice for SysfsTorch {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.is_writable()
    }

    fn is_active(&self) -> bool {
        self.brightness().is_some_and(|b| b > 0)
    }

    fn set_mode(&mut self, mode: TorchMode) -> BackendResult<()> {
        match mode {
            TorchMode::Off => self.set_brightness(0),
            TorchMode::On => self.set_brightness(self.max_brightness),
        }
    }
}
