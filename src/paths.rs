//! Blob key helpers.
//!
//! Blob keys live in a flat namespace; "folders" are nothing more than the
//! `/`-delimited prefixes of those keys.  Every key handled by the service is
//! the plain, slash-joined, non-URL-encoded form produced here.

use percent_encoding::percent_decode_str;

/// Canonicalize a user-supplied prefix.
///
/// Leading and trailing slashes are stripped and exactly one trailing slash
/// is re-appended when anything remains.  `None` and `""` both mean the
/// container root and yield `""`.
pub fn normalize_prefix(prefix: Option<&str>) -> String {
    let trimmed = prefix
        .unwrap_or("")
        .trim_start_matches('/')
        .trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Percent-decode a single path segment (lossy on invalid UTF-8).
pub fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

/// Decode each segment on its own, then rejoin with `/`.
///
/// An encoded slash inside a segment (`folder%2Fsub`) therefore becomes a
/// real key separator, matching how the portal UI encodes whole keys.
pub fn join_decoded_path<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(|s| decode_segment(s.as_ref()))
        .collect::<Vec<_>>()
        .join("/")
}

/// Split the raw (still encoded) path of a request URI after `mount` and
/// decode it into a blob key.
pub fn blob_key_from_uri_path(uri_path: &str, mount: &str) -> String {
    let raw = uri_path.strip_prefix(mount).unwrap_or("");
    let raw = raw.trim_start_matches('/');
    if raw.is_empty() {
        return String::new();
    }
    let segments: Vec<&str> = raw.split('/').collect();
    join_decoded_path(&segments)
}

/// Resolve the exact blob key whose versions are requested.
///
/// Leading slashes are dropped, and so is anything from the first `?`
/// (some clients append their own query to the `path` parameter).
pub fn version_target(path: &str) -> &str {
    let path = path.trim_start_matches('/');
    match path.find('?') {
        Some(idx) => &path[..idx],
        None => path,
    }
}
