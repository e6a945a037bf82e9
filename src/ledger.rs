use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ModError;
use crate::fileops::{FileBackend, FileOps};
use crate::manifest::GameManifest;
use crate::paths::AppPaths;
use crate::records::{BackupRecord, ModRecord, ReplacedFile};
use crate::task::CancelToken;

/// Content-addressed snapshot/restore of game files. The ownership map
/// (`ReplacedFile` rows keyed by game path) decides when a snapshot can be
/// reused and whose restore is honored; that guard is what keeps
/// overlapping mods from clobbering each other.
pub struct BackupLedger {
    ops: std::sync::Arc<FileOps>,
    paths: AppPaths,
}

impl BackupLedger {
    pub fn new(ops: std::sync::Arc<FileOps>, paths: AppPaths) -> Self {
        Self { ops, paths }
    }

    /// Snapshots every target path of `record` that needs it. Any failure
    /// is fatal for the whole activation: the caller must not have written
    /// a single game file yet.
    pub fn backup(
        &self,
        record: &ModRecord,
        game: &GameManifest,
        replaced: &HashMap<String, ReplacedFile>,
        cancel: &CancelToken,
        mut progress: impl FnMut(&str, usize, usize),
    ) -> Result<Vec<BackupRecord>, ModError> {
        let total = record.game_files_path.len();
        let mut backups = Vec::with_capacity(total);
        let backup_time = now_millis();

        for (index, game_file) in record.game_files_path.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ModError::BackupFailed("cancelled".to_string()));
            }
            let game_path = Path::new(game_file);
            let filename = file_name_of(game_path);
            progress(&filename, index + 1, total);

            let backend = self
                .ops
                .backend_for(game_path)
                .map_err(|err| ModError::BackupFailed(err.to_string()))?;

            if !backend.exists(game_path).map_err(ModError::from)? {
                // Target not there yet: a sentinel row records that disable
                // must delete, not restore.
                backups.push(BackupRecord {
                    id: 0,
                    mod_id: record.id.clone(),
                    filename,
                    game_path: game.game_path.clone(),
                    game_file_path: game_file.clone(),
                    backup_path: String::new(),
                    game_package_name: game.package_name.clone(),
                    backup_time,
                    copy_time: now_millis(),
                    original_md5: String::new(),
                    mod_file_md5: String::new(),
                });
                continue;
            }

            let current_md5 = backend
                .md5(game_path)
                .map_err(|err| ModError::Md5Failed(err.to_string()))?;
            let backup_dir = self.paths.backup_dir_for(&game.package_name, game_path);
            let backup_path = backup_dir.join(&filename);

            if let Some(owner) = replaced.get(game_file) {
                if owner.md5 == current_md5 && backup_path.exists() {
                    // The live file is still the ledger owner's write and the
                    // pristine snapshot is on disk: no second physical copy.
                    let slot_backend = self
                        .ops
                        .backend_for(&backup_path)
                        .map_err(|err| ModError::BackupFailed(err.to_string()))?;
                    let original_md5 = slot_backend
                        .md5(&backup_path)
                        .map_err(|err| ModError::Md5Failed(err.to_string()))?;
                    backups.push(BackupRecord {
                        id: 0,
                        mod_id: record.id.clone(),
                        filename,
                        game_path: game.game_path.clone(),
                        game_file_path: game_file.clone(),
                        backup_path: backup_path.to_string_lossy().to_string(),
                        game_package_name: game.package_name.clone(),
                        backup_time,
                        copy_time: now_millis(),
                        original_md5,
                        mod_file_md5: String::new(),
                    });
                    continue;
                }
                // Ledger says owned but the bytes changed underneath (game
                // update) or the slot is gone: fall through to a fresh
                // snapshot of what is live now.
            }

            backend
                .copy_file(game_path, &backup_path)
                .map_err(|err| ModError::BackupFailed(err.to_string()))?;
            backups.push(BackupRecord {
                id: 0,
                mod_id: record.id.clone(),
                filename,
                game_path: game.game_path.clone(),
                game_file_path: game_file.clone(),
                backup_path: backup_path.to_string_lossy().to_string(),
                game_package_name: game.package_name.clone(),
                backup_time,
                copy_time: now_millis(),
                original_md5: current_md5,
                mod_file_md5: String::new(),
            });
        }

        Ok(backups)
    }

    /// Restores `record`'s backups. The physical write happens only when
    /// the ownership ledger still attributes the path to `record` and the
    /// live bytes are the ones the ledger recorded; in every other case the
    /// restore is suppressed (a later owner's content, or an external
    /// change, must not be clobbered) while the caller still clears the
    /// bookkeeping.
    pub fn restore(
        &self,
        backups: &[BackupRecord],
        replaced: &HashMap<String, ReplacedFile>,
        record: &ModRecord,
        cancel: &CancelToken,
        mut progress: impl FnMut(&str, usize, usize),
    ) -> Result<(), ModError> {
        let total = backups.len();
        for (index, backup) in backups.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ModError::RestoreFailed("cancelled".to_string()));
            }
            progress(&backup.filename, index + 1, total);

            let game_path = Path::new(&backup.game_file_path);
            let backend = self
                .ops
                .backend_for(game_path)
                .map_err(|err| ModError::RestoreFailed(err.to_string()))?;

            match replaced.get(&backup.game_file_path) {
                Some(owner) if owner.mod_id != record.id => continue,
                Some(owner) => {
                    let live_md5 = backend.md5(game_path).unwrap_or_default();
                    if live_md5 != owner.md5 {
                        continue;
                    }
                }
                // No ledger row: a record from before ownership tracking.
                // Honor the backup as-is.
                None => {}
            }

            if backup.was_absent() {
                if backend.exists(game_path).map_err(ModError::from)? {
                    backend
                        .delete(game_path)
                        .map_err(|err| ModError::RestoreFailed(err.to_string()))?;
                }
                continue;
            }

            let backup_path = Path::new(&backup.backup_path);
            if !backup_path.exists() {
                // Snapshot vanished from our own storage; nothing to copy
                // back. Treated as restored so disable can complete.
                continue;
            }
            backend
                .copy_file(backup_path, game_path)
                .map_err(|err| ModError::RestoreFailed(err.to_string()))?;
        }
        Ok(())
    }

    /// Drops the physical snapshot slots that back `rows`, keeping any slot
    /// another mod's bookkeeping still references.
    pub fn discard_slots(&self, rows: &[BackupRecord], still_referenced: &[BackupRecord]) {
        for row in rows {
            if row.backup_path.is_empty() {
                continue;
            }
            if still_referenced
                .iter()
                .any(|other| other.backup_path == row.backup_path)
            {
                continue;
            }
            let path = Path::new(&row.backup_path);
            if let Ok(backend) = self.ops.backend_for(path) {
                if backend.exists(path).unwrap_or(false) {
                    let _ = backend.delete(path);
                }
            }
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
