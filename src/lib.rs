// SPDX-License-Identifier: GPL-3.0-only

//! Scanner - live camera capture sessions for real-time QR code detection
//!
//! The crate is organized into several modules:
//!
//! - [`session`]: Session lifecycle, region-of-interest mapping, torch and
//!   detection delivery
//! - [`backends`]: Capture backends (V4L2 and image-file virtual camera),
//!   the capture pipeline and the symbol decoder
//! - [`permission`]: Camera authorization gates
//! - [`config`]: User configuration handling
//! - [`queue`]: Serial execution contexts
//!
//! # Example
//!
//! ```no_run
//! use scanner::backends::v4l2::V4l2Backend;
//! use scanner::{DetectionBatch, ScannerDelegate, SessionController, SessionOptions};
//! use scanner::errors::{ConfigurationError, PermissionError};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl ScannerDelegate for Printer {
//!     fn on_authorization_failure(&self, error: PermissionError) {
//!         eprintln!("{}", error);
//!     }
//!     fn on_configuration_failure(&self, error: ConfigurationError) {
//!         eprintln!("{}", error);
//!     }
//!     fn on_detection(&self, batch: &DetectionBatch) {
//!         for record in batch.iter() {
//!             println!("{:?}", record.payload);
//!         }
//!     }
//! }
//!
//! let session = SessionController::new(
//!     Arc::new(V4l2Backend::new()),
//!     scanner::permission::default_gate(),
//!     Arc::new(Printer),
//!     SessionOptions::default(),
//! )?;
//! session.activate();
//! # Ok::<(), scanner::errors::ScannerError>(())
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod geometry;
pub mod permission;
pub mod queue;
pub mod session;

// Re-export commonly used types
pub use backends::{DetectionBatch, DetectionRecord, DetectionType};
pub use config::Config;
pub use errors::{ScannerError, ScannerResult};
pub use geometry::{NormalizedRect, Rect, Size};
pub use session::{
    DisplayOrientation, ScannerDelegate, SessionController, SessionOptions, SessionState,
    VideoGravity,
};
