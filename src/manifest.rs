use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::GameConfigError;

/// Description of one game's installed layout: where its data lives, which
/// directories hold replaceable files, and (optionally) the integrity file
/// the anti-tamper toggle rewrites. Ships as JSON dropped into the game
/// config directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameManifest {
    pub game_name: String,
    pub package_name: String,
    pub game_path: String,
    pub game_file_path: Vec<String>,
    pub mod_type: Vec<String>,
    pub service_name: String,
    #[serde(default)]
    pub mod_save_path: String,
    #[serde(default)]
    pub anti_harmony_file: String,
    #[serde(default)]
    pub anti_harmony_content: String,
    #[serde(default)]
    pub version: String,
    /// Whether replaceable file names repeat across the declared
    /// directories; when true, passive matching also compares parent
    /// directory names.
    #[serde(default = "default_true")]
    pub is_game_file_repeat: bool,
    #[serde(default = "default_true")]
    pub enable_backup: bool,
    #[serde(default)]
    pub tips: String,
}

fn default_true() -> bool {
    true
}

impl GameManifest {
    pub fn load(path: &Path) -> Result<Self, GameConfigError> {
        let raw = fs::read_to_string(path)
            .map_err(|err| GameConfigError::InvalidConfig(format!("{}: {err}", path.display())))?;
        let manifest: GameManifest = serde_json::from_str(&raw)
            .map_err(|err| GameConfigError::InvalidConfig(format!("{}: {err}", path.display())))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf, GameConfigError> {
        fs::create_dir_all(dir).map_err(|err| GameConfigError::SaveFailed(err.to_string()))?;
        let path = dir.join(format!("{}.json", self.package_name));
        let raw = serde_json::to_string_pretty(self)
            .map_err(|err| GameConfigError::SaveFailed(err.to_string()))?;
        fs::write(&path, raw).map_err(|err| GameConfigError::SaveFailed(err.to_string()))?;
        Ok(path)
    }

    /// Field checks applied to every loaded config before the engine trusts
    /// it. The paired arrays are the contract passive matching runs on.
    pub fn validate(&self) -> Result<(), GameConfigError> {
        if self.game_name.is_empty() {
            return Err(GameConfigError::InvalidConfig(
                "gameName must not be empty".to_string(),
            ));
        }
        if self.package_name.is_empty() {
            return Err(GameConfigError::InvalidConfig(
                "packageName must not be empty".to_string(),
            ));
        }
        if !valid_package_name(&self.package_name) {
            return Err(GameConfigError::InvalidConfig(format!(
                "packageName is not a valid package id: {}",
                self.package_name
            )));
        }
        if self.game_path.is_empty() {
            return Err(GameConfigError::InvalidConfig(
                "gamePath must not be empty".to_string(),
            ));
        }
        if self.service_name.is_empty() {
            return Err(GameConfigError::InvalidConfig(
                "serviceName must not be empty".to_string(),
            ));
        }
        if self.game_file_path.is_empty() {
            return Err(GameConfigError::InvalidConfig(
                "gameFilePath must not be empty".to_string(),
            ));
        }
        if self.mod_type.is_empty() {
            return Err(GameConfigError::InvalidConfig(
                "modType must not be empty".to_string(),
            ));
        }
        if self.game_file_path.len() != self.mod_type.len() {
            return Err(GameConfigError::InvalidConfig(format!(
                "gameFilePath ({}) and modType ({}) must pair up",
                self.game_file_path.len(),
                self.mod_type.len()
            )));
        }
        Ok(())
    }

    /// Anchors the declared relative paths under the device storage root.
    pub fn normalized(&self, storage_root: &Path) -> GameManifest {
        let mut result = self.clone();
        result.game_path = join_rooted(storage_root, &format!("Android/data/{}", self.package_name));
        result.game_file_path = self
            .game_file_path
            .iter()
            .map(|dir| join_rooted(storage_root, dir))
            .collect();
        if !self.anti_harmony_file.is_empty() {
            result.anti_harmony_file = join_rooted(storage_root, &self.anti_harmony_file);
        }
        result
    }

    /// The (target directory, mod type) pairs passive matching iterates.
    pub fn target_dirs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.game_file_path
            .iter()
            .map(String::as_str)
            .zip(self.mod_type.iter().map(String::as_str))
    }
}

fn join_rooted(root: &Path, relative: &str) -> String {
    let trimmed = relative.trim_start_matches('/');
    root.join(trimmed).to_string_lossy().replace("//", "/")
}

fn valid_package_name(name: &str) -> bool {
    name.split('.').count() >= 2
        && name.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
                && !segment.chars().next().is_some_and(|ch| ch.is_ascii_digit())
        })
}

/// Loads every `*.json` manifest below `dir`, skipping unparsable ones.
pub fn load_all(dir: &Path) -> Vec<GameManifest> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut manifests = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        if let Ok(manifest) = GameManifest::load(&path) {
            manifests.push(manifest);
        }
    }
    manifests.sort_by(|a, b| a.game_name.cmp(&b.game_name));
    manifests
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GameManifest {
        GameManifest {
            game_name: "Sample".to_string(),
            package_name: "com.example.game".to_string(),
            game_path: "Android/data/com.example.game".to_string(),
            game_file_path: vec!["Android/data/com.example.game/files/assets".to_string()],
            mod_type: vec!["assets".to_string()],
            service_name: "sample".to_string(),
            mod_save_path: String::new(),
            anti_harmony_file: String::new(),
            anti_harmony_content: String::new(),
            version: "1.0".to_string(),
            is_game_file_repeat: false,
            enable_backup: true,
            tips: String::new(),
        }
    }

    #[test]
    fn unpaired_arrays_are_rejected() {
        let mut manifest = sample();
        manifest.mod_type.push("extra".to_string());
        assert!(matches!(
            manifest.validate(),
            Err(GameConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn bad_package_name_is_rejected() {
        let mut manifest = sample();
        manifest.package_name = "nodots".to_string();
        assert!(manifest.validate().is_err());
        manifest.package_name = "com.9lives".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn tolerant_parse_fills_defaults() {
        let raw = r#"{
            "gameName": "Sample",
            "packageName": "com.example.game",
            "gamePath": "Android/data/com.example.game",
            "gameFilePath": ["Android/data/com.example.game/files"],
            "modType": ["files"],
            "serviceName": "sample"
        }"#;
        let manifest: GameManifest = serde_json::from_str(raw).expect("parse");
        assert!(manifest.is_game_file_repeat);
        assert!(manifest.enable_backup);
        assert!(manifest.anti_harmony_file.is_empty());
    }

    #[test]
    fn normalized_paths_are_rooted() {
        let manifest = sample().normalized(Path::new("/storage"));
        assert_eq!(manifest.game_path, "/storage/Android/data/com.example.game");
        assert_eq!(
            manifest.game_file_path[0],
            "/storage/Android/data/com.example.game/files/assets"
        );
    }
}
