//! Configuration, log and socket paths
//!
//! Config and log locations come from the directories crate; the Wayland
//! socket follows the usual `$XDG_RUNTIME_DIR/$WAYLAND_DISPLAY` lookup.

use std::path::PathBuf;

/// Name used for config and data directories
const APP_NAME: &str = "capability-tests";

/// Socket name used when `WAYLAND_DISPLAY` is unset
const DEFAULT_DISPLAY: &str = "wayland-0";

/// Get the configuration directory path
///
/// - Linux: `~/.config/capability-tests/`
/// - macOS: `~/Library/Application Support/capability-tests/`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

/// Runtime directory holding compositor sockets
///
/// Falls back to `/run/user/<uid>` when `XDG_RUNTIME_DIR` is not set.
#[cfg(unix)]
pub fn runtime_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(dir);
    }
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/run/user/{}", uid))
}

/// Resolve the compositor's wire socket
///
/// An explicit path wins. Otherwise `WAYLAND_DISPLAY` is used, which may
/// itself be an absolute path.
#[cfg(unix)]
pub fn wire_socket_path(explicit: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path.clone();
    }
    let display = std::env::var("WAYLAND_DISPLAY").unwrap_or_else(|_| DEFAULT_DISPLAY.to_string());
    resolve_display(&display)
}

#[cfg(unix)]
fn resolve_display(display: &str) -> PathBuf {
    let path = PathBuf::from(display);
    if path.is_absolute() {
        path
    } else {
        runtime_dir().join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_is_valid() {
        let dir = config_dir();
        assert!(dir.is_some());
    }

    #[test]
    fn test_absolute_display_is_kept() {
        assert_eq!(
            resolve_display("/tmp/sock/wayland-1"),
            PathBuf::from("/tmp/sock/wayland-1")
        );
    }

    #[test]
    fn test_relative_display_joins_runtime_dir() {
        let path = resolve_display("wayland-3");
        assert!(path.ends_with("wayland-3"));
        assert!(path.is_absolute());
    }

    #[test]
    fn test_explicit_socket_wins() {
        let explicit = PathBuf::from("/srv/compositor.sock");
        assert_eq!(wire_socket_path(Some(&explicit)), explicit);
    }
}
