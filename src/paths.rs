// ABOUTME: XDG Base Directory paths for the switchboard config file
// ABOUTME: Falls back to the current directory when no home directory is available

use directories::ProjectDirs;
use std::path::PathBuf;

const QUALIFIER: &str = "com";
const ORGANIZATION: &str = "switchboard";
const APPLICATION: &str = "switchboard";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// Config directory (e.g., ~/.config/switchboard/)
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Default config file path, e.g. ~/.config/switchboard/config.toml
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}
