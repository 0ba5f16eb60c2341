// SPDX-License-Identifier: GPL-3.0-only

//! Image files as a frame source

use crate::backends::types::{BackendError, BackendResult};
use crate::constants::file_formats;
use image::GrayImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Expand the given paths into the image files they name
///
/// Directories contribute their image files in name order; files are kept
/// only if their extension is a known image format.
pub fn collect_image_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .into_iter()
                .flatten()
                .flatten()
                .map(|e| e.path())
                .filter(|p| is_image_file(p))
                .collect();
            entries.sort();
            debug!(dir = %path.display(), count = entries.len(), "Collected images from directory");
            files.extend(entries);
        } else if is_image_file(path) {
            files.push(path.clone());
        } else {
            debug!(path = %path.display(), "Skipping non-image file");
        }
    }
    files
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| file_formats::is_image_extension(&e.to_lowercase()))
}

/// Load an image file as an 8-bit luma plane
pub fn load_luma_image(path: &Path) -> BackendResult<GrayImage> {
    info!(path = %path.display(), "Loading image file");

    let img = image::open(path).map_err(|e| {
        BackendError::Other(format!("Failed to load image '{}': {}", path.display(), e))
    })?;
    let luma = img.to_luma8();

    info!(width = luma.width(), height = luma.height(), "Image loaded successfully");
    Ok(luma)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_filters_by_extension() {
        let dir = std::env::temp_dir().join(format!("scanner-files-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["b.png", "a.JPG", "notes.txt"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }

        let files = collect_image_files(std::slice::from_ref(&dir));
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.png"]);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_load_roundtrips_pixels() {
        let path = std::env::temp_dir().join(format!("scanner-{}.png", uuid::Uuid::new_v4()));
        GrayImage::from_raw(2, 1, vec![0, 255]).unwrap().save(&path).unwrap();

        let luma = load_luma_image(&path).unwrap();
        assert_eq!(luma.as_raw(), &vec![0, 255]);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(load_luma_image(Path::new("/nonexistent/frame.png")).is_err());
    }
}
