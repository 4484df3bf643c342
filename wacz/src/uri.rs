use std::path::PathBuf;

/// Whether a target URI names a directory to drop generated files into,
/// rather than an explicit output file. Heuristic shared with the original
/// export path: trailing slash, or a last segment without an extension dot.
pub fn is_uri_directory(uri: &str) -> bool {
    if uri.ends_with('/') {
        return true;
    }

    let last = uri.rsplit('/').next().unwrap_or(uri);
    !last.contains('.')
}

pub fn file_uri_to_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

/// Absolute paths normalize to `file://` URIs so every selected archive is
/// addressed the same way downstream.
pub fn normalize_file_uri(uri: &str) -> String {
    if uri.starts_with('/') {
        format!("file://{uri}")
    } else {
        uri.to_owned()
    }
}
