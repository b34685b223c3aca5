//! Centralized path configuration for vpool.
//!
//! All data paths should go through this module so the object store, the
//! scanner and the pool descriptors agree on where things live.

use std::path::PathBuf;

/// Prefix of every deep-scan staging directory.
pub const SCAN_DIR_PREFIX: &str = "vpool-scan-";

/// Get the vpool data directory.
///
/// Resolution order:
/// 1. `VPOOL_DATA_DIR` environment variable
/// 2. `/var/lib/vpool` if it exists (system install)
/// 3. `~/.vpool` for user-only installs
pub fn data_dir() -> PathBuf {
    resolve_data_dir(std::env::var_os("VPOOL_DATA_DIR").map(PathBuf::from))
}

fn resolve_data_dir(override_dir: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir;
    }

    let system_dir = PathBuf::from("/var/lib/vpool");
    if system_dir.exists() {
        return system_dir;
    }

    dirs::home_dir().map(|h| h.join(".vpool")).unwrap_or(system_dir)
}

/// Get the configuration directory (`~/.config/vpool` or the data dir).
pub fn config_dir() -> PathBuf {
    dirs::config_dir().map(|c| c.join("vpool")).unwrap_or_else(data_dir)
}

/// Get the object store database path.
pub fn db_path() -> PathBuf {
    data_dir().join("objectstore.db")
}

/// Get the directory that holds deep-scan staging directories.
///
/// `VPOOL_STAGING_DIR` overrides `<data_dir>/scans`. The root is swept on
/// startup, so it must not be shared with another deployment.
pub fn staging_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("VPOOL_STAGING_DIR") {
        return PathBuf::from(dir);
    }
    data_dir().join("scans")
}

/// Get the mount point root for network filesystem pools.
pub fn nfs_mount_dir() -> PathBuf {
    data_dir().join("nfs_mount")
}
