use blake3::Hasher;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

use crate::archive::ArchiveService;
use crate::error::{ArchiveError, ModError};
use crate::fileops::{FileBackend, FileOps};
use crate::manifest::GameManifest;
use crate::records::{ModForm, ModRecord, Repository};

const ACTIVE_DESCRIPTOR: &str = "mod.json";
const PACKAGED_DESCRIPTOR: &str = "package.json";

/// Self-describing descriptor embedded in Active/Packaged sources. Tolerant
/// schema: everything beyond the declared files is optional.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModDescriptor {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    author: Option<String>,
    /// Install sub-path below the game's data root.
    #[serde(default)]
    target_path: String,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    mod_type: Option<String>,
}

/// Recognizes mods inside a candidate archive or directory. Scans of
/// independent sources may run concurrently; the per-game directory
/// listing cache is behind a read/write lock because a miss lazily
/// populates it.
pub struct ScanEngine {
    ops: Arc<FileOps>,
    archive: Arc<ArchiveService>,
    listings: RwLock<HashMap<String, Arc<HashSet<String>>>>,
}

impl ScanEngine {
    pub fn new(ops: Arc<FileOps>, archive: Arc<ArchiveService>) -> Self {
        Self {
            ops,
            archive,
            listings: RwLock::new(HashMap::new()),
        }
    }

    /// Drops cached game-directory listings, e.g. after an activation
    /// changed the game tree.
    pub fn invalidate_listings(&self) {
        self.listings
            .write()
            .expect("listing cache poisoned")
            .clear();
    }

    /// Produces zero or more records for one candidate source. No match is
    /// an empty result, not an error; an unreadable encrypted archive
    /// yields a partial record flagged needs-password.
    pub fn scan(
        &self,
        path: &Path,
        game: &GameManifest,
        preloaded: Option<&HashMap<String, HashSet<String>>>,
    ) -> Result<Vec<ModRecord>, ModError> {
        if path.is_dir() {
            return self.scan_directory(path, game, preloaded);
        }
        if !self.archive.is_archive(path) {
            return Ok(Vec::new());
        }
        self.scan_archive(path, game, preloaded)
    }

    fn scan_archive(
        &self,
        path: &Path,
        game: &GameManifest,
        preloaded: Option<&HashMap<String, HashSet<String>>>,
    ) -> Result<Vec<ModRecord>, ModError> {
        let entries = match self.archive.list_entries(path) {
            Ok(entries) => entries,
            // Headers sealed behind a password: an expected, recoverable
            // state. The record carries what little is known.
            Err(ArchiveError::EncryptedNeedsPassword) => {
                return Ok(vec![self.locked_record(path, game)])
            }
            Err(ArchiveError::Empty) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let encrypted = self.archive.is_encrypted(path).unwrap_or(false);

        if let Some(form) = detect_form(&entries) {
            if encrypted {
                let mut record = self.locked_record(path, game);
                record.form = form;
                return Ok(vec![record]);
            }
            let descriptor_name = descriptor_entry(&entries, form)
                .ok_or_else(|| ModError::InvalidStructure("descriptor entry vanished".into()))?;
            let mut raw = String::new();
            self.archive
                .stream_entry(path, &descriptor_name, None)
                .map_err(ModError::from)?
                .read_to_string(&mut raw)
                .map_err(|err| ModError::ParseFailed(err.to_string()))?;
            return self
                .descriptor_record(path, game, &raw, form, true)
                .map(|record| vec![record]);
        }

        Ok(self.passive_match(path, &entries, game, preloaded, true, encrypted))
    }

    fn scan_directory(
        &self,
        path: &Path,
        game: &GameManifest,
        preloaded: Option<&HashMap<String, HashSet<String>>>,
    ) -> Result<Vec<ModRecord>, ModError> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(path).follow_links(false) {
            let entry = entry.map_err(|err| ModError::Unknown(err.to_string()))?;
            if !entry.file_type().is_file() || is_ignored_path(entry.path()) {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(path) {
                entries.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(form) = detect_form(&entries) {
            let descriptor_name = descriptor_entry(&entries, form)
                .ok_or_else(|| ModError::InvalidStructure("descriptor entry vanished".into()))?;
            let raw = std::fs::read_to_string(path.join(&descriptor_name))
                .map_err(|err| ModError::ParseFailed(err.to_string()))?;
            return self
                .descriptor_record(path, game, &raw, form, false)
                .map(|record| vec![record]);
        }

        Ok(self.passive_match(path, &entries, game, preloaded, false, false))
    }

    /// Traditional detection: every entry whose file name appears in one of
    /// the manifest's per-directory file sets becomes a mod file; entries
    /// group into one record per parent directory inside the source.
    fn passive_match(
        &self,
        source: &Path,
        entries: &[String],
        game: &GameManifest,
        preloaded: Option<&HashMap<String, HashSet<String>>>,
        is_archive: bool,
        encrypted: bool,
    ) -> Vec<ModRecord> {
        let source_label = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| source.display().to_string());

        struct Group {
            mod_files: Vec<String>,
            game_files: Vec<String>,
            mod_type: String,
            game_mod_path: String,
            readme: Option<String>,
        }
        let mut groups: BTreeMap<String, Group> = BTreeMap::new();

        for entry in entries {
            let entry_path = Path::new(entry);
            let Some(file_name) = entry_path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let parent_name = entry_path
                .parent()
                .and_then(|parent| parent.file_name())
                .map(|name| name.to_string_lossy().to_string());

            for (game_dir, mod_type) in game.target_dirs() {
                if game.is_game_file_repeat {
                    // Repeating file names: the entry's parent directory must
                    // name the target directory.
                    let dir_name = Path::new(game_dir)
                        .file_name()
                        .map(|name| name.to_string_lossy().to_string());
                    if parent_name != dir_name {
                        continue;
                    }
                }
                let listing = self.game_dir_listing(game_dir, preloaded);
                if !listing.contains(file_name) {
                    continue;
                }
                let key = entry_path
                    .parent()
                    .filter(|parent| !parent.as_os_str().is_empty())
                    .map(|parent| parent.to_string_lossy().to_string())
                    .unwrap_or_else(|| source_label.clone());
                let target = format!("{}/{}", game_dir.trim_end_matches('/'), file_name);
                let group = groups.entry(key).or_insert_with(|| Group {
                    mod_files: Vec::new(),
                    game_files: Vec::new(),
                    mod_type: mod_type.to_string(),
                    game_mod_path: game_dir.to_string(),
                    readme: None,
                });
                group.mod_files.push(entry.clone());
                group.game_files.push(target);
                break;
            }
        }

        // A readme travelling with the matched files feeds the record
        // description.
        for entry in entries {
            let entry_path = Path::new(entry);
            let is_readme = entry_path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.eq_ignore_ascii_case("readme.txt"));
            if !is_readme {
                continue;
            }
            let key = entry_path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(|parent| parent.to_string_lossy().to_string())
                .unwrap_or_else(|| source_label.clone());
            if let Some(group) = groups.get_mut(&key) {
                group.readme = Some(entry.clone());
            }
        }

        let now = now_timestamp();
        groups
            .into_iter()
            .map(|(key, group)| {
                let name = if key == source_label {
                    source_label.clone()
                } else {
                    format!("{source_label}({})", key.replace('/', "|"))
                };
                let mut record = ModRecord {
                    id: record_id(source, &key),
                    name,
                    description: String::new(),
                    path: source.to_string_lossy().to_string(),
                    mod_files: group.mod_files,
                    game_files_path: group.game_files,
                    form: ModForm::Traditional,
                    is_encrypted: encrypted,
                    password: None,
                    game_package_name: game.package_name.clone(),
                    game_mod_path: group.game_mod_path,
                    mod_type: group.mod_type,
                    enabled: false,
                    is_archive,
                    version: None,
                    author: None,
                    mod_config: None,
                    updated_at: now,
                };
                if encrypted {
                    record.description = "encrypted archive, details unavailable".to_string();
                } else if let Some(readme) = group.readme {
                    self.apply_readme(source, &readme, is_archive, &mut record);
                }
                record
            })
            .collect()
    }

    fn descriptor_record(
        &self,
        source: &Path,
        game: &GameManifest,
        raw: &str,
        form: ModForm,
        is_archive: bool,
    ) -> Result<ModRecord, ModError> {
        let descriptor: ModDescriptor =
            serde_json::from_str(raw).map_err(|err| ModError::ParseFailed(err.to_string()))?;
        if descriptor.files.is_empty() {
            return Err(ModError::InvalidStructure(
                "descriptor declares no files".to_string(),
            ));
        }
        let target_root = format!(
            "{}/{}",
            game.game_path.trim_end_matches('/'),
            descriptor.target_path.trim_matches('/')
        );
        let game_files = descriptor
            .files
            .iter()
            .filter_map(|file| {
                Path::new(file)
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| format!("{}/{name}", target_root.trim_end_matches('/')))
            })
            .collect();
        let source_label = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| source.display().to_string());
        Ok(ModRecord {
            id: record_id(source, "descriptor"),
            name: if descriptor.name.is_empty() {
                source_label
            } else {
                descriptor.name
            },
            description: descriptor.description,
            path: source.to_string_lossy().to_string(),
            mod_files: descriptor.files,
            game_files_path: game_files,
            form,
            is_encrypted: false,
            password: None,
            game_package_name: game.package_name.clone(),
            game_mod_path: target_root,
            mod_type: descriptor.mod_type.unwrap_or_default(),
            enabled: false,
            is_archive,
            version: descriptor.version,
            author: descriptor.author,
            mod_config: Some(raw.to_string()),
            updated_at: now_timestamp(),
        })
    }

    /// Partial record for a source whose contents cannot be inspected yet.
    /// File-level metadata stays deferred until a password arrives.
    fn locked_record(&self, source: &Path, game: &GameManifest) -> ModRecord {
        let source_label = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| source.display().to_string());
        ModRecord {
            id: record_id(source, "locked"),
            name: source_label,
            description: "encrypted archive, details unavailable".to_string(),
            path: source.to_string_lossy().to_string(),
            mod_files: Vec::new(),
            game_files_path: Vec::new(),
            form: ModForm::Traditional,
            is_encrypted: true,
            password: None,
            game_package_name: game.package_name.clone(),
            game_mod_path: String::new(),
            mod_type: String::new(),
            enabled: false,
            is_archive: true,
            version: None,
            author: None,
            mod_config: None,
            updated_at: now_timestamp(),
        }
    }

    fn apply_readme(&self, source: &Path, readme: &str, is_archive: bool, record: &mut ModRecord) {
        let content = if is_archive {
            let mut raw = String::new();
            match self.archive.stream_entry(source, readme, None) {
                Ok(mut reader) => {
                    if reader.read_to_string(&mut raw).is_err() {
                        return;
                    }
                    raw
                }
                Err(_) => return,
            }
        } else {
            match std::fs::read_to_string(source.join(readme)) {
                Ok(raw) => raw,
                Err(_) => return,
            }
        };
        for line in content.lines() {
            let Some((key, value)) = line.split_once(':').or_else(|| line.split_once('：')) else {
                continue;
            };
            let value = value.trim().to_string();
            if value.is_empty() {
                continue;
            }
            match key.trim().to_ascii_lowercase().as_str() {
                "name" => record.name = value,
                "description" => record.description = value,
                "version" => record.version = Some(value),
                "author" => record.author = Some(value),
                _ => {}
            }
        }
    }

    /// Reconciles stored records against the sources still on disk. A
    /// record whose source vanished is deleted, unless it is still
    /// enabled; those are returned so the caller can disable them first
    /// (their backups are the only way back).
    pub fn sweep_missing(&self, repo: &dyn Repository, package: &str) -> Vec<ModRecord> {
        let mut orphaned_enabled = Vec::new();
        for record in repo.mods_for_game(package) {
            if Path::new(&record.path).exists() {
                continue;
            }
            if record.enabled {
                orphaned_enabled.push(record);
            } else {
                repo.delete_mod(&record.id);
            }
        }
        orphaned_enabled
    }

    /// Declared file set for one game directory: the preloaded batch map if
    /// the caller has one, otherwise the shared lazy cache.
    fn game_dir_listing(
        &self,
        game_dir: &str,
        preloaded: Option<&HashMap<String, HashSet<String>>>,
    ) -> Arc<HashSet<String>> {
        let key = game_dir.trim_end_matches('/').to_string();
        if let Some(preloaded) = preloaded {
            if let Some(names) = preloaded.get(&key).or_else(|| preloaded.get(game_dir)) {
                return Arc::new(names.clone());
            }
        }
        if let Some(cached) = self
            .listings
            .read()
            .expect("listing cache poisoned")
            .get(&key)
        {
            return Arc::clone(cached);
        }
        // Unreachable or empty directories scan as empty sets, not errors.
        let names: HashSet<String> = self
            .ops
            .backend_for(Path::new(game_dir))
            .ok()
            .and_then(|backend| backend.list_names(Path::new(game_dir)).ok())
            .map(|names| names.into_iter().collect())
            .unwrap_or_default();
        let names = Arc::new(names);
        self.listings
            .write()
            .expect("listing cache poisoned")
            .insert(key, Arc::clone(&names));
        names
    }
}

fn detect_form(entries: &[String]) -> Option<ModForm> {
    let has_packaged = entries
        .iter()
        .any(|entry| entry_is(entry, PACKAGED_DESCRIPTOR));
    if has_packaged {
        return Some(ModForm::Packaged);
    }
    let has_active = entries
        .iter()
        .any(|entry| entry_is(entry, ACTIVE_DESCRIPTOR));
    if has_active {
        return Some(ModForm::Active);
    }
    None
}

fn descriptor_entry(entries: &[String], form: ModForm) -> Option<String> {
    let descriptor = match form {
        ModForm::Packaged => PACKAGED_DESCRIPTOR,
        ModForm::Active => ACTIVE_DESCRIPTOR,
        ModForm::Traditional => return None,
    };
    entries
        .iter()
        .find(|entry| entry_is(entry, descriptor))
        .cloned()
}

fn entry_is(entry: &str, descriptor: &str) -> bool {
    Path::new(entry)
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.eq_ignore_ascii_case(descriptor))
}

fn is_ignored_path(path: &Path) -> bool {
    path.components().any(|component| {
        let part = component.as_os_str().to_string_lossy();
        part.eq_ignore_ascii_case("__MACOSX")
            || part.eq_ignore_ascii_case(".ds_store")
            || part.eq_ignore_ascii_case("thumbs.db")
            || part == ".git"
    })
}

fn record_id(source: &Path, key: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(source.to_string_lossy().as_bytes());
    hasher.update(key.as_bytes());
    format!("mod-{}", hasher.finalize().to_hex())
}

fn now_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Preloads the dir→names map for a batch of scans against one game so
/// each source does not re-list the same directories.
pub fn load_game_files_map(
    ops: &FileOps,
    game: &GameManifest,
) -> HashMap<String, HashSet<String>> {
    let mut map = HashMap::new();
    for (game_dir, _) in game.target_dirs() {
        let names: HashSet<String> = ops
            .backend_for(Path::new(game_dir))
            .ok()
            .and_then(|backend| backend.list_names(Path::new(game_dir)).ok())
            .map(|names| names.into_iter().collect())
            .unwrap_or_default();
        map.insert(game_dir.trim_end_matches('/').to_string(), names);
    }
    map
}
