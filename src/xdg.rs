//! XDG Base Directory support for scriptbin
//!
//! Follows the XDG Base Directory Specification:
//! - https://specifications.freedesktop.org/basedir-spec/basedir-spec-latest.html
//!
//! Directory structure:
//! - `$XDG_CACHE_HOME/scriptbin/` (default: `~/.cache/scriptbin/`) - Build cache
//! - `$XDG_CONFIG_HOME/scriptbin/` (default: `~/.config/scriptbin/`) - Configuration files

use std::path::PathBuf;

const APP_DIR: &str = "scriptbin";

/// Get the scriptbin cache directory (committed builds, staging, locks)
///
/// Respects XDG_CACHE_HOME environment variable.
/// Falls back to the platform cache directory, then `$HOME/.cache/scriptbin`.
pub fn cache_dir() -> PathBuf {
    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg_cache).join(APP_DIR)
    } else if let Some(cache) = dirs::cache_dir() {
        cache.join(APP_DIR)
    } else if let Some(home) = dirs::home_dir() {
        home.join(".cache").join(APP_DIR)
    } else {
        std::env::temp_dir().join("scriptbin-cache")
    }
}

/// Get the scriptbin configuration directory
///
/// Respects XDG_CONFIG_HOME environment variable.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join(APP_DIR)
    } else if let Some(config) = dirs::config_dir() {
        config.join(APP_DIR)
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config").join(APP_DIR)
    } else {
        PathBuf::from(".scriptbin")
    }
}

/// Default location of the configuration file
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}
