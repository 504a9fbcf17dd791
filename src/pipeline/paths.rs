use std::path::{Path, PathBuf};

/// Resolve `path` against `base` unless it is already absolute.
pub(crate) fn resolve_relative(base: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}
