use directories::BaseDirs;
use std::path::{Path, PathBuf};

use crate::error::FileError;

/// Fixed layout of the engine's own storage, all rooted under one data
/// directory. Backups, staging and game configs never leave this tree.
#[derive(Debug, Clone)]
pub struct AppPaths {
    data_root: PathBuf,
    storage_root: PathBuf,
}

impl AppPaths {
    pub fn new(data_root: impl Into<PathBuf>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            storage_root: storage_root.into(),
        }
    }

    /// Default layout for the current user, with the shared storage root
    /// assumed to be the parent of the data dir. Callers on-device pass the
    /// real roots through `new`.
    pub fn resolve_default() -> Result<Self, FileError> {
        let base = BaseDirs::new()
            .ok_or_else(|| FileError::Unknown("cannot resolve home directory".to_string()))?;
        let data_root = base.data_local_dir().join("modvault");
        let storage_root = base.data_local_dir().to_path_buf();
        Ok(Self {
            data_root,
            storage_root,
        })
    }

    /// Root of the shared external storage the games live under.
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// The engine's own data directory.
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn backup_root(&self) -> PathBuf {
        self.data_root.join("backup")
    }

    /// Backup slot directory for one game file, mirroring the file's
    /// position below the game's data dir so slots never collide.
    pub fn backup_dir_for(&self, package: &str, game_file_path: &Path) -> PathBuf {
        let marker = format!("/Android/data/{package}/");
        let lossy = game_file_path.to_string_lossy();
        let relative = lossy
            .find(&marker)
            .map(|idx| &lossy[idx + marker.len()..])
            .and_then(|tail| Path::new(tail).parent().map(Path::to_path_buf))
            .unwrap_or_default();
        self.backup_root().join(package).join(relative)
    }

    pub fn unzip_root(&self) -> PathBuf {
        self.data_root.join("temp").join("unzip")
    }

    /// Staging directory for one mod source's extracted payload.
    pub fn unzip_dir_for(&self, package: &str, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "mod".to_string());
        self.unzip_root().join(package).join(stem)
    }

    pub fn temp_root(&self) -> PathBuf {
        self.data_root.join("temp")
    }

    pub fn game_config_root(&self) -> PathBuf {
        self.data_root.join("GameConfig")
    }

    /// Working copies of per-game integrity manifests kept by the special
    /// game handlers.
    pub fn check_file_root(&self) -> PathBuf {
        self.data_root.join("checkfile")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_dir_mirrors_game_layout() {
        let paths = AppPaths::new("/data/modvault", "/storage");
        let dir = paths.backup_dir_for(
            "com.example.game",
            Path::new("/storage/Android/data/com.example.game/files/assets/tex.png"),
        );
        assert_eq!(
            dir,
            PathBuf::from("/data/modvault/backup/com.example.game/files/assets")
        );
    }

    #[test]
    fn backup_dir_outside_data_tree_falls_back_to_package_root() {
        let paths = AppPaths::new("/data/modvault", "/storage");
        let dir = paths.backup_dir_for("com.example.game", Path::new("/somewhere/else/file.bin"));
        assert_eq!(dir, PathBuf::from("/data/modvault/backup/com.example.game"));
    }
}
