//! Where EchoMail keeps its files
//!
//! The worker reads `settings.json` from ~/.config/echomail/ and keeps its
//! SQLite mailbox database in the platform data directory. Call [`init`]
//! at process startup so the config directory exists.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Name of the config directory under the platform config root
const APP_DIR: &str = "echomail";

/// Initialize the EchoMail config directory.
///
/// Creates ~/.config/echomail/ if it doesn't exist.
pub fn init() -> Result<PathBuf> {
    ensure_config_dir()
}

/// Get the EchoMail config directory (~/.config/echomail/)
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR))
}

/// Get the EchoMail data directory (~/.local/share/echomail/ on Linux)
///
/// Falls back to the config directory on platforms without a data dir.
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir()
        .map(|p| p.join(APP_DIR))
        .or_else(config_dir)
}

/// Get the path to a config file within the EchoMail config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Load and parse a JSON config file from the EchoMail config directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Check if a config file exists in the EchoMail config directory
pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.exists())
}

/// Ensure the EchoMail config directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir)
}
