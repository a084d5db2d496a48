//! Payload pre-checks: the cheap rejections that must happen before any
//! staging I/O or engine work.

use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::error::{PalimpsestError, Result};

/// Hard ceiling for a single image payload. Anything larger is rejected
/// before it touches the scratch directory.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Raster formats the recognition engines accept.
static ACCEPTED_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    let mut set = HashSet::new();
    set.insert("png");
    set.insert("jpg");
    set.insert("jpeg");
    set.insert("bmp");
    set.insert("gif");
    set.insert("tif");
    set.insert("tiff");
    set.insert("webp");
    set
});

/// Extract the lowercased extension from a logical file name.
pub fn extension_of(file_name: &str) -> Option<String> {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Best-effort MIME type for a file name, used for diagnostics only.
pub fn guessed_mime(file_name: &str) -> Option<String> {
    mime_guess::from_path(file_name).first().map(|mime| mime.to_string())
}

/// Validate a payload before any expensive work happens.
///
/// Pure and synchronous. Returns the normalized extension on success so the
/// staging step does not have to re-derive it.
///
/// # Errors
///
/// - [`PalimpsestError::EmptyPayload`] for a zero-byte payload
/// - [`PalimpsestError::PayloadTooLarge`] above `max_bytes`
/// - [`PalimpsestError::UnsupportedFormat`] when the extension is missing or
///   not in the accepted raster set
pub fn validate_task(payload: &[u8], file_name: &str, max_bytes: usize) -> Result<String> {
    if payload.is_empty() {
        return Err(PalimpsestError::EmptyPayload);
    }

    if payload.len() > max_bytes {
        return Err(PalimpsestError::PayloadTooLarge {
            size: payload.len(),
            limit: max_bytes,
        });
    }

    let Some(extension) = extension_of(file_name) else {
        return Err(PalimpsestError::UnsupportedFormat(format!(
            "'{file_name}' has no file extension"
        )));
    };

    if !ACCEPTED_EXTENSIONS.contains(extension.as_str()) {
        let detail = match guessed_mime(file_name) {
            Some(mime) => format!(".{extension} ({mime})"),
            None => format!(".{extension}"),
        };
        return Err(PalimpsestError::UnsupportedFormat(detail));
    }

    Ok(extension)
}
