use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// How a mod source was recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModForm {
    /// Passive match of entry names against the game manifest.
    Traditional,
    /// Self-describing descriptor that declares its own target files.
    Active,
    /// Self-describing, but the payload needs a container-asset repack
    /// before it matches the game layout.
    Packaged,
}

/// One recognized overlay unit: replacement files plus metadata. Created
/// by the scan engine, mutated by activation (enabled flag, validated
/// password), deleted when its source disappears.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Discovery path: the archive file or the mod directory.
    pub path: String,
    /// Source-relative file entries inside the archive/folder.
    pub mod_files: Vec<String>,
    /// Absolute target game-file paths, positionally paired with
    /// `mod_files`.
    pub game_files_path: Vec<String>,
    pub form: ModForm,
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default)]
    pub password: Option<String>,
    pub game_package_name: String,
    /// Target install sub-path inside the game tree.
    pub game_mod_path: String,
    #[serde(default)]
    pub mod_type: String,
    #[serde(default)]
    pub enabled: bool,
    pub is_archive: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub mod_config: Option<String>,
    pub updated_at: i64,
}

impl ModRecord {
    /// Encrypted and not yet unlocked with a validated password.
    pub fn needs_password(&self) -> bool {
        self.is_encrypted && self.password.is_none()
    }
}

/// Snapshot of one original game file plus the hash of what replaced it.
/// An empty `original_md5` together with an empty `backup_path` is the
/// "target was absent" sentinel; restoring it deletes the live file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    #[serde(default)]
    pub id: i64,
    pub mod_id: String,
    pub filename: String,
    pub game_path: String,
    pub game_file_path: String,
    pub backup_path: String,
    pub game_package_name: String,
    pub backup_time: i64,
    pub copy_time: i64,
    #[serde(default)]
    pub original_md5: String,
    #[serde(default)]
    pub mod_file_md5: String,
}

impl BackupRecord {
    pub fn was_absent(&self) -> bool {
        self.backup_path.is_empty()
    }
}

/// Ownership ledger row: which mod is currently responsible for the live
/// content of a game file, and the hash it left there. One live owner per
/// path at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacedFile {
    #[serde(default)]
    pub id: i64,
    pub mod_id: String,
    pub filename: String,
    pub game_file_path: String,
    pub md5: String,
    pub game_package_name: String,
    pub replace_time: i64,
}

/// Narrow persistence interface the engine needs: the real catalog lives
/// outside this crate and adapts to this trait.
pub trait Repository: Send + Sync {
    fn upsert_mod(&self, record: &ModRecord);
    fn get_mod(&self, id: &str) -> Option<ModRecord>;
    fn mods_for_game(&self, package: &str) -> Vec<ModRecord>;
    fn delete_mod(&self, id: &str);

    fn insert_backups(&self, rows: &[BackupRecord]);
    fn backups_for_mod(&self, mod_id: &str) -> Vec<BackupRecord>;
    fn backups_for_game(&self, package: &str) -> Vec<BackupRecord>;
    fn delete_backups_for_mod(&self, mod_id: &str);

    fn upsert_replaced(&self, rows: &[ReplacedFile]);
    fn replaced_for_game(&self, package: &str) -> Vec<ReplacedFile>;
    fn replaced_for_mod(&self, mod_id: &str) -> Vec<ReplacedFile>;
    /// Removes the ledger rows for these paths only where `mod_id` is still
    /// the recorded owner.
    fn delete_replaced_owned_by(&self, mod_id: &str, game_file_paths: &[String]);
}

#[derive(Default)]
struct MemoryTables {
    mods: HashMap<String, ModRecord>,
    backups: Vec<BackupRecord>,
    replaced: Vec<ReplacedFile>,
    next_id: i64,
}

/// In-memory repository. Backs tests and callers that run without the
/// on-device catalog.
#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<MemoryTables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repository for MemoryRepository {
    fn upsert_mod(&self, record: &ModRecord) {
        let mut tables = self.tables.lock().expect("repository poisoned");
        tables.mods.insert(record.id.clone(), record.clone());
    }

    fn get_mod(&self, id: &str) -> Option<ModRecord> {
        let tables = self.tables.lock().expect("repository poisoned");
        tables.mods.get(id).cloned()
    }

    fn mods_for_game(&self, package: &str) -> Vec<ModRecord> {
        let tables = self.tables.lock().expect("repository poisoned");
        let mut mods: Vec<ModRecord> = tables
            .mods
            .values()
            .filter(|record| record.game_package_name == package)
            .cloned()
            .collect();
        mods.sort_by(|a, b| a.id.cmp(&b.id));
        mods
    }

    fn delete_mod(&self, id: &str) {
        let mut tables = self.tables.lock().expect("repository poisoned");
        tables.mods.remove(id);
    }

    fn insert_backups(&self, rows: &[BackupRecord]) {
        let mut tables = self.tables.lock().expect("repository poisoned");
        for row in rows {
            let mut row = row.clone();
            tables.next_id += 1;
            row.id = tables.next_id;
            tables.backups.push(row);
        }
    }

    fn backups_for_mod(&self, mod_id: &str) -> Vec<BackupRecord> {
        let tables = self.tables.lock().expect("repository poisoned");
        tables
            .backups
            .iter()
            .filter(|row| row.mod_id == mod_id)
            .cloned()
            .collect()
    }

    fn backups_for_game(&self, package: &str) -> Vec<BackupRecord> {
        let tables = self.tables.lock().expect("repository poisoned");
        tables
            .backups
            .iter()
            .filter(|row| row.game_package_name == package)
            .cloned()
            .collect()
    }

    fn delete_backups_for_mod(&self, mod_id: &str) {
        let mut tables = self.tables.lock().expect("repository poisoned");
        tables.backups.retain(|row| row.mod_id != mod_id);
    }

    fn upsert_replaced(&self, rows: &[ReplacedFile]) {
        let mut tables = self.tables.lock().expect("repository poisoned");
        for row in rows {
            let mut row = row.clone();
            tables
                .replaced
                .retain(|existing| existing.game_file_path != row.game_file_path);
            tables.next_id += 1;
            row.id = tables.next_id;
            tables.replaced.push(row);
        }
    }

    fn replaced_for_game(&self, package: &str) -> Vec<ReplacedFile> {
        let tables = self.tables.lock().expect("repository poisoned");
        tables
            .replaced
            .iter()
            .filter(|row| row.game_package_name == package)
            .cloned()
            .collect()
    }

    fn replaced_for_mod(&self, mod_id: &str) -> Vec<ReplacedFile> {
        let tables = self.tables.lock().expect("repository poisoned");
        tables
            .replaced
            .iter()
            .filter(|row| row.mod_id == mod_id)
            .cloned()
            .collect()
    }

    fn delete_replaced_owned_by(&self, mod_id: &str, game_file_paths: &[String]) {
        let mut tables = self.tables.lock().expect("repository poisoned");
        tables.replaced.retain(|row| {
            !(row.mod_id == mod_id && game_file_paths.contains(&row.game_file_path))
        });
    }
}

/// The ownership map keyed the way the ledger is queried during
/// backup/restore.
pub fn replaced_by_path(rows: Vec<ReplacedFile>) -> HashMap<String, ReplacedFile> {
    rows.into_iter()
        .map(|row| (row.game_file_path.clone(), row))
        .collect()
}
