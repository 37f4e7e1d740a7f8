//! Directory listing for image folders.

use std::path::{Path, PathBuf};

use image::ImageFormat;
use walkdir::WalkDir;

use crate::image::{ImageError, ImageResult};

/// Whether the file extension names an image format this build can decode.
pub fn is_supported_image_format<P: AsRef<Path>>(path: P) -> bool {
    ImageFormat::from_path(path)
        .map(|format| format.reading_enabled())
        .unwrap_or(false)
}

/// List decodable image files directly inside `dir`, sorted by file name.
pub fn list_image_files<P: AsRef<Path>>(dir: P) -> ImageResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| ImageError::DirectoryReadFailed {
            path: dir.to_path_buf(),
            source,
        })?;

        if entry.file_type().is_file() && is_supported_image_format(entry.path()) {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}
