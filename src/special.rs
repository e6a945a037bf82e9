use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ModError;
use crate::fileops::{FileBackend, FileOps};
use crate::manifest::GameManifest;
use crate::paths::AppPaths;
use crate::records::{BackupRecord, ModRecord};

/// Per-game post-processing around activation: after files are swapped,
/// the game's own integrity manifests must agree with the new bytes or the
/// client redownloads everything. Handlers rewrite only the entries for
/// touched files and leave the rest of the manifest untouched.
pub trait SpecialGameHandler: Send + Sync {
    fn on_enable(&self, record: &ModRecord, package: &str) -> Result<(), ModError>;
    fn on_disable(
        &self,
        backups: &[BackupRecord],
        package: &str,
        record: &ModRecord,
    ) -> Result<(), ModError>;
    fn on_game_start(&self, game: &GameManifest) -> Result<(), ModError>;
    fn on_game_select(&self, game: &GameManifest) -> Result<(), ModError>;
}

/// Substring-matched registry. Packages without a handler are no-ops.
pub struct SpecialGameRegistry {
    handlers: Vec<(Vec<&'static str>, Box<dyn SpecialGameHandler>)>,
}

impl SpecialGameRegistry {
    pub fn new(ops: Arc<FileOps>, paths: AppPaths) -> Self {
        let handlers: Vec<(Vec<&'static str>, Box<dyn SpecialGameHandler>)> = vec![
            (
                vec!["hypergryph.arknights", "com.mrfz"],
                Box::new(ArknightsHandler::new(Arc::clone(&ops), paths.clone())),
            ),
            (
                vec!["dragonli.projectsnow"],
                Box::new(ProjectSnowHandler::new(ops, paths)),
            ),
        ];
        Self { handlers }
    }

    pub fn empty() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn for_package(&self, package: &str) -> Option<&dyn SpecialGameHandler> {
        self.handlers
            .iter()
            .find(|(patterns, _)| patterns.iter().any(|pattern| package.contains(pattern)))
            .map(|(_, handler)| handler.as_ref())
    }

    pub fn on_enable(&self, record: &ModRecord, package: &str) -> Result<(), ModError> {
        match self.for_package(package) {
            Some(handler) => handler.on_enable(record, package),
            None => Ok(()),
        }
    }

    pub fn on_disable(
        &self,
        backups: &[BackupRecord],
        package: &str,
        record: &ModRecord,
    ) -> Result<(), ModError> {
        match self.for_package(package) {
            Some(handler) => handler.on_disable(backups, package, record),
            None => Ok(()),
        }
    }

    pub fn on_game_start(&self, game: &GameManifest) -> Result<(), ModError> {
        match self.for_package(&game.package_name) {
            Some(handler) => handler.on_game_start(game),
            None => Ok(()),
        }
    }

    pub fn on_game_select(&self, game: &GameManifest) -> Result<(), ModError> {
        match self.for_package(&game.package_name) {
            Some(handler) => handler.on_game_select(game),
            None => Ok(()),
        }
    }
}

/// One integrity-manifest row for a bundle file. Unknown fields ride along
/// untouched so a rewrite never strips what the game put there.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AbInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ab_size: Option<u64>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct HotUpdateList {
    #[serde(default)]
    version_id: String,
    #[serde(default)]
    ab_infos: Vec<AbInfo>,
    #[serde(default)]
    manifest_name: String,
    #[serde(default)]
    manifest_version: String,
    #[serde(default)]
    pack_infos: Vec<AbInfo>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PersistentResList {
    #[serde(default)]
    manifest_name: String,
    #[serde(default)]
    manifest_version: String,
    #[serde(default)]
    ab_infos: Vec<AbInfo>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

const HOT_UPDATE_LIST: &str = "hot_update_list.json";
const PERSISTENT_RES_LIST: &str = "persistent_res_list.json";

/// Patches the bundle hash lists the client verifies on boot. Touched
/// bundles get their md5 and sizes rewritten under the
/// `<parent-dir>/<file>` key the lists use.
struct ArknightsHandler {
    ops: Arc<FileOps>,
    paths: AppPaths,
}

impl ArknightsHandler {
    fn new(ops: Arc<FileOps>, paths: AppPaths) -> Self {
        Self { ops, paths }
    }

    fn bundles_dir(&self, package: &str) -> PathBuf {
        self.paths
            .storage_root()
            .join("Android")
            .join("data")
            .join(package)
            .join("files")
            .join("Bundles")
    }

    fn work_dir(&self, package: &str) -> PathBuf {
        self.paths.check_file_root().join(package)
    }

    fn fetch_lists(
        &self,
        package: &str,
    ) -> Result<(HotUpdateList, PersistentResList), ModError> {
        let bundles = self.bundles_dir(package);
        let work = self.work_dir(package);
        for name in [HOT_UPDATE_LIST, PERSISTENT_RES_LIST] {
            let src = bundles.join(name);
            let backend = self
                .ops
                .backend_for(&src)
                .map_err(|err| ModError::Unknown(err.to_string()))?;
            backend
                .copy_file(&src, &work.join(name))
                .map_err(|err| ModError::Unknown(format!("fetch {name}: {err}")))?;
        }
        let hot: HotUpdateList = read_json(&work.join(HOT_UPDATE_LIST))?;
        let persistent: PersistentResList = read_json(&work.join(PERSISTENT_RES_LIST))?;
        Ok((hot, persistent))
    }

    fn push_lists(
        &self,
        package: &str,
        hot: &HotUpdateList,
        persistent: &PersistentResList,
    ) -> Result<(), ModError> {
        let work = self.work_dir(package);
        write_json(&work.join(HOT_UPDATE_LIST), hot)?;
        write_json(&work.join(PERSISTENT_RES_LIST), persistent)?;
        let bundles = self.bundles_dir(package);
        for name in [HOT_UPDATE_LIST, PERSISTENT_RES_LIST] {
            let dest = bundles.join(name);
            let backend = self
                .ops
                .backend_for(&dest)
                .map_err(|err| ModError::Unknown(err.to_string()))?;
            backend
                .copy_file(&work.join(name), &dest)
                .map_err(|err| ModError::Unknown(format!("push {name}: {err}")))?;
        }
        Ok(())
    }

    fn patch_entry(
        hot: &mut HotUpdateList,
        persistent: &mut PersistentResList,
        key: &str,
        md5: &str,
        size: u64,
    ) {
        let mut rewrite = |infos: &mut Vec<AbInfo>| {
            for info in infos.iter_mut() {
                if info.name.as_deref() == Some(key) {
                    info.md5 = Some(md5.to_string());
                    info.total_size = Some(size);
                    info.ab_size = Some(size);
                }
            }
        };
        rewrite(&mut hot.ab_infos);
        rewrite(&mut persistent.ab_infos);
    }
}

impl SpecialGameHandler for ArknightsHandler {
    fn on_enable(&self, record: &ModRecord, package: &str) -> Result<(), ModError> {
        let (mut hot, mut persistent) = self.fetch_lists(package)?;
        for game_file in &record.game_files_path {
            let path = Path::new(game_file);
            let backend = self
                .ops
                .backend_for(path)
                .map_err(|err| ModError::Unknown(err.to_string()))?;
            let md5 = backend
                .md5(path)
                .map_err(|err| ModError::Md5Failed(err.to_string()))?;
            let size = backend.file_size(path).map_err(ModError::from)?;
            Self::patch_entry(&mut hot, &mut persistent, &check_key(path), &md5, size);
        }
        self.push_lists(package, &hot, &persistent)
    }

    fn on_disable(
        &self,
        backups: &[BackupRecord],
        package: &str,
        _record: &ModRecord,
    ) -> Result<(), ModError> {
        let (mut hot, mut persistent) = self.fetch_lists(package)?;
        for backup in backups {
            if backup.was_absent() {
                continue;
            }
            let slot = Path::new(&backup.backup_path);
            if !slot.exists() {
                continue;
            }
            let md5 = if backup.original_md5.is_empty() {
                let backend = self
                    .ops
                    .backend_for(slot)
                    .map_err(|err| ModError::Unknown(err.to_string()))?;
                backend
                    .md5(slot)
                    .map_err(|err| ModError::Md5Failed(err.to_string()))?
            } else {
                backup.original_md5.clone()
            };
            let size = std::fs::metadata(slot)
                .map(|meta| meta.len())
                .unwrap_or(0);
            Self::patch_entry(
                &mut hot,
                &mut persistent,
                &check_key(Path::new(&backup.game_file_path)),
                &md5,
                size,
            );
        }
        self.push_lists(package, &hot, &persistent)
    }

    fn on_game_start(&self, _game: &GameManifest) -> Result<(), ModError> {
        Ok(())
    }

    fn on_game_select(&self, _game: &GameManifest) -> Result<(), ModError> {
        Ok(())
    }
}

/// `<parent dir>/<file name>`, the key shape both lists index bundles by.
fn check_key(game_file: &Path) -> String {
    let parent = game_file
        .parent()
        .and_then(|parent| parent.file_name())
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = game_file
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("{parent}/{name}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PakEntry {
    name: String,
    hash: String,
    size_in_bytes: u64,
    b_primary: bool,
    #[serde(default)]
    base: String,
    #[serde(default)]
    diff: String,
    #[serde(default)]
    diff_size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PakManifest {
    #[serde(default)]
    version: String,
    #[serde(default)]
    project_version: String,
    #[serde(default)]
    path_offset: String,
    #[serde(default)]
    b_user_cache: bool,
    #[serde(default)]
    paks: Vec<PakEntry>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Default for PakManifest {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            project_version: "1.0".to_string(),
            path_offset: String::new(),
            b_user_cache: true,
            paks: Vec::new(),
            extra: Map::new(),
        }
    }
}

const PAK_MANIFEST: &str = "manifest.json";

/// Maintains a side copy of the pak manifest listing the mod paks; at game
/// start the side copy merges into the live manifest so the loader accepts
/// the swapped paks.
struct ProjectSnowHandler {
    ops: Arc<FileOps>,
    paths: AppPaths,
}

impl ProjectSnowHandler {
    fn new(ops: Arc<FileOps>, paths: AppPaths) -> Self {
        Self { ops, paths }
    }

    fn work_manifest(&self, package: &str) -> PathBuf {
        self.paths.check_file_root().join(package).join(PAK_MANIFEST)
    }

    fn game_manifest(&self, package: &str) -> PathBuf {
        self.paths
            .storage_root()
            .join("Android")
            .join("data")
            .join(package)
            .join("files")
            .join(PAK_MANIFEST)
    }

    fn load_work(&self, package: &str) -> PakManifest {
        read_json(&self.work_manifest(package)).unwrap_or_default()
    }

    fn save_work(&self, package: &str, manifest: &PakManifest) -> Result<(), ModError> {
        write_json(&self.work_manifest(package), manifest)
    }
}

impl SpecialGameHandler for ProjectSnowHandler {
    fn on_enable(&self, record: &ModRecord, package: &str) -> Result<(), ModError> {
        let mut manifest = self.load_work(package);
        for game_file in &record.game_files_path {
            let path = Path::new(game_file);
            let backend = self
                .ops
                .backend_for(path)
                .map_err(|err| ModError::Unknown(err.to_string()))?;
            let md5 = backend
                .md5(path)
                .map_err(|err| ModError::Md5Failed(err.to_string()))?;
            let size = backend.file_size(path).map_err(ModError::from)?;
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            manifest.paks.retain(|pak| pak.name != name);
            manifest.paks.push(PakEntry {
                name,
                hash: md5,
                size_in_bytes: size,
                b_primary: false,
                base: String::new(),
                diff: String::new(),
                diff_size_bytes: 0,
            });
        }
        self.save_work(package, &manifest)
    }

    fn on_disable(
        &self,
        _backups: &[BackupRecord],
        package: &str,
        record: &ModRecord,
    ) -> Result<(), ModError> {
        let mut manifest = self.load_work(package);
        let names: Vec<String> = record
            .game_files_path
            .iter()
            .filter_map(|game_file| {
                Path::new(game_file)
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
            })
            .collect();
        manifest.paks.retain(|pak| !names.contains(&pak.name));
        self.save_work(package, &manifest)
    }

    /// Merges the side manifest's paks to the front of the live one so the
    /// loader sees the mod bundles before its own.
    fn on_game_start(&self, game: &GameManifest) -> Result<(), ModError> {
        let work = self.load_work(&game.package_name);
        if work.paks.is_empty() {
            return Ok(());
        }
        let live_path = self.game_manifest(&game.package_name);
        let backend = self
            .ops
            .backend_for(&live_path)
            .map_err(|err| ModError::Unknown(err.to_string()))?;
        let raw = backend.read_to_string(&live_path).map_err(ModError::from)?;
        let mut live: PakManifest =
            serde_json::from_str(&raw).map_err(|err| ModError::ParseFailed(err.to_string()))?;
        for pak in work.paks.iter().rev() {
            if !live.paks.iter().any(|existing| existing.name == pak.name) {
                live.paks.insert(0, pak.clone());
            }
        }
        let patched = serde_json::to_string(&live)
            .map_err(|err| ModError::Unknown(err.to_string()))?;
        let dir = live_path
            .parent()
            .ok_or_else(|| ModError::Unknown("pak manifest has no parent".to_string()))?;
        backend
            .write_text(dir, PAK_MANIFEST, &patched)
            .map_err(ModError::from)
    }

    /// Probes whether the versioned bundle directory is in place before a
    /// session; a missing tree means the game updated out from under us.
    fn on_game_select(&self, game: &GameManifest) -> Result<(), ModError> {
        for (dir, _) in game.target_dirs() {
            let path = Path::new(dir);
            let backend = self
                .ops
                .backend_for(path)
                .map_err(|err| ModError::Unknown(err.to_string()))?;
            if !backend.exists(path).map_err(ModError::from)? {
                backend.create_dir(path).map_err(ModError::from)?;
            }
        }
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ModError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| ModError::Unknown(format!("{}: {err}", path.display())))?;
    serde_json::from_str(&raw).map_err(|err| ModError::ParseFailed(err.to_string()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ModError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| ModError::Unknown(format!("{}: {err}", parent.display())))?;
    }
    let raw = serde_json::to_string(value).map_err(|err| ModError::Unknown(err.to_string()))?;
    std::fs::write(path, raw).map_err(|err| ModError::Unknown(format!("{}: {err}", path.display())))
}
