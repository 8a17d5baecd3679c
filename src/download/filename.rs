//! Destination filename derivation from the request URL.

use tracing::debug;
use url::Url;

use super::constants::FALLBACK_FILENAME;

/// Returns the final path segment of `url`, percent-decoded and sanitized for
/// the local file system, or [`FALLBACK_FILENAME`] when the path ends in `/`.
pub(crate) fn filename_from_url(url: &Url) -> String {
    if let Some(mut segments) = url.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        let decoded = urlencoding::decode(last).unwrap_or_else(|e| {
            debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
            last.into()
        });
        return sanitize_filename(&decoded);
    }
    FALLBACK_FILENAME.to_string()
}

/// Replaces path separators and characters that are invalid on common file
/// systems. `.` and `..` are never returned.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match sanitized.as_str() {
        "" => FALLBACK_FILENAME.to_string(),
        "." | ".." => sanitized.replace('.', "_"),
        _ => sanitized,
    }
}
