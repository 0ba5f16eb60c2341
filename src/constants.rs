// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Viewfinder layout defaults
pub mod layout {
    /// Side of the square region of interest as a fraction of the content width
    pub const INTEREST_FRACTION: f32 = 0.7;

    /// Height reserved below the content area for the torch control
    pub const BOTTOM_CONTROL_HEIGHT: f32 = 49.0;
}

/// Symbol decoder tuning
pub mod decoder {
    /// Frames are downscaled so neither side exceeds this before decoding.
    /// QR codes are typically large enough to be detected at this resolution.
    pub const MAX_DIMENSION: u32 = 640;

    /// Smallest accepted `max_dimension`; anything lower makes codes unreadable
    pub const MIN_DIMENSION: u32 = 64;
}

/// Thread names for the three execution contexts
pub mod threads {
    pub const MAIN: &str = "scanner-main";
    pub const SESSION: &str = "scanner-session";
    pub const METADATA: &str = "scanner-metadata";
    pub const TORCH_MONITOR: &str = "scanner-torch";
}

/// How often the torch state is polled for hardware-driven changes
pub const TORCH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Frame interval of the virtual camera (about 15 fps)
pub const VIRTUAL_FRAME_INTERVAL: Duration = Duration::from_millis(66);

/// Timeout for a single V4L2 buffer dequeue so stop requests are noticed
pub const V4L2_DEQUEUE_TIMEOUT: Duration = Duration::from_millis(250);

/// Number of memory-mapped V4L2 capture buffers
pub const V4L2_BUFFER_COUNT: u32 = 4;

/// Image file extensions accepted by the virtual camera
pub mod file_formats {
    pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "webp"];

    pub fn is_image_extension(extension: &str) -> bool {
        IMAGE_EXTENSIONS.contains(&extension.to_lowercase().as_str())
    }
}
