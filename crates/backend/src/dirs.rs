//! Directory browsing for the new-session card.

use std::path::Path;

use larkin_protocol::rpc::BrowseDirsResponse;

/// List immediate subdirectories of an absolute path.
///
/// Symlinks are resolved first; dot-directories are skipped; results are
/// sorted full paths. The parent of `/` is the empty string.
pub fn browse(path: &str) -> Result<BrowseDirsResponse, String> {
    if !path.starts_with('/') {
        return Err(format!("path must be absolute: {path}"));
    }

    let canonical = Path::new(path)
        .canonicalize()
        .map_err(|_| format!("directory not found: {path}"))?;
    if !canonical.is_dir() {
        return Err(format!("not a directory: {path}"));
    }

    let entries =
        std::fs::read_dir(&canonical).map_err(|e| format!("cannot read directory: {e}"))?;
    let mut dirs: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                return None;
            }
            Some(canonical.join(name).to_string_lossy().to_string())
        })
        .collect();
    dirs.sort();

    let current = canonical.to_string_lossy().to_string();
    let parent = canonical
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(BrowseDirsResponse {
        success: true,
        dirs,
        parent,
        current,
    })
}
