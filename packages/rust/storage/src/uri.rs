//! URI-like storage path helpers.
//!
//! Storage paths are plain strings, optionally prefixed with a scheme
//! (`file://...`). Object roots may carry a cluster host in `bucket@cluster`
//! notation, which planning must detect and reject.

use url::Url;

/// Extract the scheme of a path, if it has one (`file://x` → `file`).
pub fn scheme(path: &str) -> Option<&str> {
    path.split_once("://").map(|(s, _)| s)
}

/// Strip a `file://` prefix, mapping the path onto the local filesystem.
/// Bare paths are returned unchanged.
pub fn local_path(path: &str) -> &str {
    path.strip_prefix("file://").unwrap_or(path)
}

/// Detect a cluster host embedded in an object root (`s3://bucket@cluster/...`).
///
/// Returns `None` for file paths, bare paths, and object paths without the
/// `@` notation.
pub fn cluster(path: &str) -> Option<String> {
    let url = Url::parse(path).ok()?;
    if url.scheme() == "file" || url.username().is_empty() {
        return None;
    }
    url.host_str().map(str::to_string)
}

/// Split a path into (tray, basename) at the last separator.
/// A path with no separator has an empty tray.
pub fn split_tray(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((tray, base)) => (tray, base),
        None => ("", path),
    }
}

/// Join a root and a relative path with exactly one separator.
pub fn join(root: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        root.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}
