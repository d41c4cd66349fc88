//! Chromium binary discovery on Linux.
//!
//! The bridge driver needs a real browser binary. Deployments usually set
//! `CHROME_PATH`; otherwise the distro install locations are probed in a
//! fixed order.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Known Chromium/Chrome install locations, in search priority order.
const KNOWN_PATHS: &[&str] = &[
    "/usr/bin/chromium-browser",
    "/usr/bin/chromium",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/google-chrome",
    "/snap/bin/chromium",
    "/usr/local/bin/chromium",
];

/// Find a Chromium or Chrome binary on the system.
///
/// Search order:
/// 1. `CHROME_PATH` environment variable
/// 2. Known distro install paths
///
/// Returns `None` if no valid executable is found.
pub fn find_chromium() -> Option<PathBuf> {
    resolve(std::env::var("CHROME_PATH").ok().as_deref())
}

/// Resolution core, with the env override passed in explicitly.
fn resolve(override_path: Option<&str>) -> Option<PathBuf> {
    if let Some(env_path) = override_path {
        let path = PathBuf::from(env_path);
        if is_executable(&path) {
            return Some(path);
        }
        tracing::debug!(path = %env_path, "CHROME_PATH set but not executable, falling through");
    }

    for candidate in KNOWN_PATHS {
        let path = PathBuf::from(candidate);
        if is_executable(&path) {
            tracing::debug!(path = %candidate, "found browser binary");
            return Some(path);
        }
    }

    None
}

/// Return the ordered list of candidate paths (excluding env var).
pub fn search_paths() -> Vec<PathBuf> {
    KNOWN_PATHS.iter().map(PathBuf::from).collect()
}

/// Check if a path exists and is executable.
fn is_executable(path: &Path) -> bool {
    path.is_file()
        && path
            .metadata()
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}
