use anyhow::Context;
use std::path::{Path, PathBuf};

/// Platform config directory for swapd, e.g. `~/.config/swapd/` on Linux.
fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "swapd")
        .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    config_dir()
        .map(|dir| Path::join(&dir, "config.toml"))
        .context("could not determine default configuration path")
}

/// Platform data directory for swapd, holds the database. E.g.
/// `~/.local/share/swapd/` on Linux.
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "swapd")
        .map(|proj_dirs| proj_dirs.data_dir().to_path_buf())
}

/// Creates the parent directory of the given file path if it is missing.
pub fn ensure_directory_exists(file: &Path) -> Result<(), std::io::Error> {
    if let Some(path) = file.parent() {
        if !path.exists() {
            tracing::info!("creating directory {}", path.display());
            return std::fs::create_dir_all(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a").join("b").join("database");

        ensure_directory_exists(&file).unwrap();

        assert!(file.parent().unwrap().exists());
        assert!(!file.exists());
    }
}
