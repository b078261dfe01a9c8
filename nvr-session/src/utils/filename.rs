//! Recording file naming.
//!
//! Camera identifiers come from the catalog and can contain anything, so
//! they are sanitized before being used as part of a file name.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Extension of recording containers.
pub const RECORDING_EXTENSION: &str = "mp4";

/// Sanitize a string for use inside a file name.
///
/// Control and Windows-invalid characters become `_` (runs collapse to one),
/// leading/trailing spaces and dots are trimmed and an empty result becomes
/// `unnamed`.
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `recording_<camera-id>_<yyyyMMdd_HHmmss>.mp4`
pub fn recording_file_name(camera_id: &str, at: DateTime<Local>) -> String {
    format!(
        "recording_{}_{}.{}",
        sanitize_filename(camera_id),
        at.format("%Y%m%d_%H%M%S"),
        RECORDING_EXTENSION
    )
}

/// Full path of a new recording for a camera inside `dir`.
pub fn recording_file_path(dir: &Path, camera_id: &str, at: DateTime<Local>) -> PathBuf {
    dir.join(recording_file_name(camera_id, at))
}
