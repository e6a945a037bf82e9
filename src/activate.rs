use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::archive::ArchiveService;
use crate::error::ModError;
use crate::fileops::{FileBackend, FileOps};
use crate::ledger::BackupLedger;
use crate::manifest::GameManifest;
use crate::paths::AppPaths;
use crate::records::{replaced_by_path, ModForm, ModRecord, ReplacedFile, Repository};
use crate::special::SpecialGameRegistry;
use crate::task::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationStep {
    Validating,
    BackingUp,
    Writing,
    Restoring,
    SpecialPatch,
    Persisting,
}

impl ActivationStep {
    pub fn label(self) -> &'static str {
        match self {
            ActivationStep::Validating => "Validating",
            ActivationStep::BackingUp => "Backing up",
            ActivationStep::Writing => "Writing",
            ActivationStep::Restoring => "Restoring",
            ActivationStep::SpecialPatch => "Patching integrity manifest",
            ActivationStep::Persisting => "Persisting",
        }
    }
}

/// One file that could not be written/restored, with the reason the caller
/// shows the user.
#[derive(Debug)]
pub struct FailedFile {
    pub game_file_path: String,
    pub reason: ModError,
}

/// Terminal summary of one activation request. Exactly one of these ends
/// every enable/disable stream.
#[derive(Debug)]
pub struct ActivationReport {
    pub mod_id: String,
    pub enabled: bool,
    pub success: bool,
    pub needs_password: bool,
    pub failed_files: Vec<FailedFile>,
    pub warnings: Vec<String>,
    pub error: Option<ModError>,
}

impl ActivationReport {
    fn halted(mod_id: &str, enabled: bool, error: ModError) -> Self {
        Self {
            mod_id: mod_id.to_string(),
            enabled,
            success: false,
            needs_password: false,
            failed_files: Vec::new(),
            warnings: Vec::new(),
            error: Some(error),
        }
    }
}

#[derive(Debug)]
pub enum ActivationEvent {
    Progress {
        step: ActivationStep,
        file: String,
        current: usize,
        total: usize,
    },
    NeedPassword {
        mod_id: String,
    },
    Complete(ActivationReport),
}

/// Caller's handle on a running activation: the event stream and the
/// cancellation switch.
pub struct ActivationHandle {
    pub events: Receiver<ActivationEvent>,
    pub cancel: CancelToken,
}

struct ActivatorInner {
    ops: Arc<FileOps>,
    archive: Arc<ArchiveService>,
    ledger: BackupLedger,
    special: SpecialGameRegistry,
    repo: Arc<dyn Repository>,
    paths: AppPaths,
    in_flight: Mutex<HashSet<String>>,
    /// Serializes every mutation of the ownership ledger and backup table;
    /// concurrent activations interleave file I/O but never ledger state.
    ledger_lock: Mutex<()>,
}

/// Orchestrates enable/disable per mod. Long-running work leaves the
/// calling thread immediately; progress and the terminal report stream
/// back over the returned channel.
#[derive(Clone)]
pub struct Activator {
    inner: Arc<ActivatorInner>,
}

impl Activator {
    pub fn new(
        ops: Arc<FileOps>,
        archive: Arc<ArchiveService>,
        special: SpecialGameRegistry,
        repo: Arc<dyn Repository>,
        paths: AppPaths,
    ) -> Self {
        let ledger = BackupLedger::new(Arc::clone(&ops), paths.clone());
        Self {
            inner: Arc::new(ActivatorInner {
                ops,
                archive,
                ledger,
                special,
                repo,
                paths,
                in_flight: Mutex::new(HashSet::new()),
                ledger_lock: Mutex::new(()),
            }),
        }
    }

    pub fn enable(&self, record: ModRecord, game: GameManifest) -> ActivationHandle {
        let (tx, rx) = channel();
        let cancel = CancelToken::new();
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        thread::spawn(move || {
            let report = run_enable(&inner, record, &game, &tx, &token);
            let _ = tx.send(ActivationEvent::Complete(report));
        });
        ActivationHandle { events: rx, cancel }
    }

    pub fn disable(&self, record: ModRecord, game: GameManifest) -> ActivationHandle {
        let (tx, rx) = channel();
        let cancel = CancelToken::new();
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        thread::spawn(move || {
            let report = run_disable(&inner, record, &game, &tx, &token);
            let _ = tx.send(ActivationEvent::Complete(report));
        });
        ActivationHandle { events: rx, cancel }
    }

    /// Checks a password against the record's archive and, on success,
    /// persists it; the record permanently leaves its pending state.
    pub fn supply_password(&self, mod_id: &str, password: &str) -> Result<ModRecord, ModError> {
        let mut record = self
            .inner
            .repo
            .get_mod(mod_id)
            .ok_or_else(|| ModError::FileMissing(mod_id.to_string()))?;
        if !record.is_encrypted {
            return Ok(record);
        }
        self.inner
            .archive
            .validate_password(Path::new(&record.path), password)
            .map_err(ModError::from)?;
        record.password = Some(password.to_string());
        record.updated_at = now_secs();
        self.inner.repo.upsert_mod(&record);
        Ok(record)
    }

    /// Anti-tamper toggle: on first enable the declared file is snapshotted
    /// into the backup tree, then overwritten with the declared content;
    /// disabling copies the snapshot back.
    pub fn set_anti_tamper(&self, game: &GameManifest, enable: bool) -> Result<(), ModError> {
        if game.anti_harmony_file.is_empty() {
            return Ok(());
        }
        let target = PathBuf::from(&game.anti_harmony_file);
        let filename = target
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ModError::InvalidStructure("antiHarmonyFile has no name".into()))?;
        let slot = self
            .inner
            .paths
            .backup_root()
            .join(&game.package_name)
            .join(filename);
        let backend = self
            .inner
            .ops
            .backend_for(&target)
            .map_err(|err| ModError::Unknown(err.to_string()))?;
        if enable {
            if !slot.exists() && backend.exists(&target).map_err(ModError::from)? {
                backend.copy_file(&target, &slot).map_err(ModError::from)?;
            }
            let dir = target
                .parent()
                .ok_or_else(|| ModError::InvalidStructure("antiHarmonyFile has no parent".into()))?;
            backend
                .write_text(dir, filename, &game.anti_harmony_content)
                .map_err(ModError::from)
        } else {
            if !slot.exists() {
                return Ok(());
            }
            backend.copy_file(&slot, &target).map_err(ModError::from)
        }
    }

    /// Forwards the per-game hooks outside the enable/disable flow.
    pub fn on_game_start(&self, game: &GameManifest) -> Result<(), ModError> {
        self.inner.special.on_game_start(game)
    }

    pub fn on_game_select(&self, game: &GameManifest) -> Result<(), ModError> {
        self.inner.special.on_game_select(game)
    }
}

/// Removes the mod id from the in-flight set when the worker finishes,
/// whatever path it exits through.
struct FlightGuard<'a> {
    inner: &'a ActivatorInner,
    id: String,
}

impl<'a> FlightGuard<'a> {
    fn acquire(inner: &'a ActivatorInner, id: &str) -> Option<Self> {
        let mut set = inner.in_flight.lock().expect("in-flight set poisoned");
        if !set.insert(id.to_string()) {
            return None;
        }
        Some(Self {
            inner,
            id: id.to_string(),
        })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .expect("in-flight set poisoned")
            .remove(&self.id);
    }
}

fn send_progress(
    tx: &Sender<ActivationEvent>,
    step: ActivationStep,
    file: &str,
    current: usize,
    total: usize,
) {
    let _ = tx.send(ActivationEvent::Progress {
        step,
        file: file.to_string(),
        current,
        total: total.max(1),
    });
}

fn run_enable(
    inner: &ActivatorInner,
    record: ModRecord,
    game: &GameManifest,
    tx: &Sender<ActivationEvent>,
    cancel: &CancelToken,
) -> ActivationReport {
    let Some(_flight) = FlightGuard::acquire(inner, &record.id) else {
        return ActivationReport::halted(
            &record.id,
            record.enabled,
            ModError::EnableFailed("activation already in flight".to_string()),
        );
    };

    // The stored row is the source of truth for enabled state and password.
    let mut record = inner.repo.get_mod(&record.id).unwrap_or(record);
    if record.enabled {
        // Second enable of an enabled mod: nothing to redo, no duplicate
        // backup rows.
        return ActivationReport {
            mod_id: record.id.clone(),
            enabled: true,
            success: true,
            needs_password: false,
            failed_files: Vec::new(),
            warnings: Vec::new(),
            error: None,
        };
    }

    send_progress(tx, ActivationStep::Validating, "", 0, 1);
    if record.form == ModForm::Packaged {
        return ActivationReport::halted(
            &record.id,
            false,
            ModError::UnsupportedForm("packaged mods need a container repack".to_string()),
        );
    }
    if record.needs_password() {
        let _ = tx.send(ActivationEvent::NeedPassword {
            mod_id: record.id.clone(),
        });
        return ActivationReport {
            mod_id: record.id.clone(),
            enabled: false,
            success: false,
            needs_password: true,
            failed_files: Vec::new(),
            warnings: Vec::new(),
            error: None,
        };
    }
    let source = PathBuf::from(&record.path);
    if !source.exists() {
        return ActivationReport::halted(
            &record.id,
            false,
            ModError::FileMissing(record.path.clone()),
        );
    }
    if record.mod_files.len() != record.game_files_path.len() {
        return ActivationReport::halted(
            &record.id,
            false,
            ModError::InvalidStructure("mod files and target paths do not pair up".to_string()),
        );
    }

    // Every ledger/backup mutation below runs under the engine-wide lock;
    // overlapping activations cannot interleave ownership state.
    let _ledger = inner.ledger_lock.lock().expect("ledger lock poisoned");

    send_progress(tx, ActivationStep::BackingUp, "", 0, 1);
    let replaced = replaced_by_path(inner.repo.replaced_for_game(&game.package_name));
    let mut backups = match inner.ledger.backup(&record, game, &replaced, cancel, |file, current, total| {
        send_progress(tx, ActivationStep::BackingUp, file, current, total);
    }) {
        Ok(backups) => backups,
        // Fatal before the first write: the game tree is untouched.
        Err(err) => return ActivationReport::halted(&record.id, false, err),
    };

    let password = record.password.as_deref();
    let staging = if record.is_archive {
        let staging = inner
            .paths
            .unzip_dir_for(&game.package_name, &source);
        // Subset extraction is zip-only; 7z sources take the whole-archive
        // path instead.
        let bulk = inner
            .archive
            .extract_subset(&source, &record.mod_files, &staging, password, None)
            .or_else(|_| {
                inner
                    .archive
                    .extract_all(&source, &staging, password, true, None)
            });
        match bulk {
            Ok(()) => Some(staging),
            // Per-file streaming below is the last resort.
            Err(_) => None,
        }
    } else {
        None
    };

    let total = record.mod_files.len();
    let mut written: Vec<(String, String)> = Vec::new();
    let mut failed: Vec<FailedFile> = Vec::new();

    for (index, (mod_file, game_file)) in record
        .mod_files
        .iter()
        .zip(record.game_files_path.iter())
        .enumerate()
    {
        if cancel.is_cancelled() {
            // Treated as a mid-Writing failure: files already written keep
            // their ledger entries, the rest are reported back.
            failed.push(FailedFile {
                game_file_path: game_file.clone(),
                reason: ModError::EnableFailed("cancelled".to_string()),
            });
            continue;
        }
        let game_path = Path::new(game_file);
        let filename = match game_path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name.to_string(),
            None => {
                failed.push(FailedFile {
                    game_file_path: game_file.clone(),
                    reason: ModError::InvalidStructure("target has no file name".to_string()),
                });
                continue;
            }
        };
        send_progress(tx, ActivationStep::Writing, &filename, index + 1, total);

        let result = write_one(
            inner,
            &record,
            &source,
            staging.as_deref(),
            mod_file,
            game_path,
            &filename,
            password,
        );
        match result {
            Ok(md5) => written.push((game_file.clone(), md5)),
            Err(err) => failed.push(FailedFile {
                game_file_path: game_file.clone(),
                reason: err,
            }),
        }
    }

    if let Some(staging) = staging {
        let _ = std::fs::remove_dir_all(staging);
    }

    let mut warnings = Vec::new();
    if !written.is_empty() {
        send_progress(tx, ActivationStep::SpecialPatch, "", 0, 1);
        if let Err(err) = inner.special.on_enable(&record, &game.package_name) {
            // The files themselves are live; a stale integrity manifest is
            // surfaced, not rolled back.
            warnings.push(format!("integrity manifest patch failed: {err}"));
        }
    }

    send_progress(tx, ActivationStep::Persisting, "", 0, 1);
    let written_paths: HashSet<&str> = written.iter().map(|(path, _)| path.as_str()).collect();
    for backup in &mut backups {
        if let Some((_, md5)) = written
            .iter()
            .find(|(path, _)| path == &backup.game_file_path)
        {
            backup.mod_file_md5 = md5.clone();
        }
    }
    // Ledger entries commit only for files actually written; failures were
    // reported and stay rolled back.
    backups.retain(|backup| written_paths.contains(backup.game_file_path.as_str()));
    let replace_time = now_millis();
    let replaced_rows: Vec<ReplacedFile> = written
        .iter()
        .map(|(game_file, md5)| ReplacedFile {
            id: 0,
            mod_id: record.id.clone(),
            filename: Path::new(game_file)
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            game_file_path: game_file.clone(),
            md5: md5.clone(),
            game_package_name: game.package_name.clone(),
            replace_time,
        })
        .collect();

    let enabled = !written.is_empty();
    if enabled {
        inner.repo.insert_backups(&backups);
        inner.repo.upsert_replaced(&replaced_rows);
        record.enabled = true;
        record.updated_at = now_secs();
        inner.repo.upsert_mod(&record);
    }

    ActivationReport {
        mod_id: record.id.clone(),
        enabled,
        success: failed.is_empty(),
        needs_password: false,
        failed_files: failed,
        warnings,
        error: None,
    }
}

/// Writes one target file: from the staged bulk extraction when available,
/// otherwise streamed entry by entry out of the archive.
#[allow(clippy::too_many_arguments)]
fn write_one(
    inner: &ActivatorInner,
    record: &ModRecord,
    source: &Path,
    staging: Option<&Path>,
    mod_file: &str,
    game_path: &Path,
    filename: &str,
    password: Option<&str>,
) -> Result<String, ModError> {
    let backend = inner
        .ops
        .backend_for(game_path)
        .map_err(|err| ModError::EnableFailed(err.to_string()))?;
    let dir = game_path
        .parent()
        .ok_or_else(|| ModError::InvalidStructure("target has no parent".to_string()))?;

    let staged = match staging {
        Some(staging) => {
            let staged = staging.join(mod_file);
            staged.exists().then_some(staged)
        }
        None if !record.is_archive => {
            let staged = source.join(mod_file);
            staged.exists().then_some(staged)
        }
        None => None,
    };

    match staged {
        Some(staged) => backend
            .copy_file(&staged, game_path)
            .map_err(|err| ModError::EnableFailed(err.to_string()))?,
        None if record.is_archive => {
            let reader = inner
                .archive
                .stream_entry(source, mod_file, password)
                .map_err(ModError::from)?;
            backend
                .create_from_stream(dir, filename, reader)
                .map_err(|err| ModError::EnableFailed(err.to_string()))?;
        }
        None => return Err(ModError::FileMissing(mod_file.to_string())),
    }

    backend
        .md5(game_path)
        .map_err(|err| ModError::Md5Failed(err.to_string()))
}

fn run_disable(
    inner: &ActivatorInner,
    record: ModRecord,
    game: &GameManifest,
    tx: &Sender<ActivationEvent>,
    cancel: &CancelToken,
) -> ActivationReport {
    let Some(_flight) = FlightGuard::acquire(inner, &record.id) else {
        return ActivationReport::halted(
            &record.id,
            record.enabled,
            ModError::DisableFailed("activation already in flight".to_string()),
        );
    };

    let mut record = inner.repo.get_mod(&record.id).unwrap_or(record);
    if !record.enabled {
        return ActivationReport {
            mod_id: record.id.clone(),
            enabled: false,
            success: true,
            needs_password: false,
            failed_files: Vec::new(),
            warnings: Vec::new(),
            error: None,
        };
    }

    send_progress(tx, ActivationStep::Validating, "", 0, 1);
    let _ledger = inner.ledger_lock.lock().expect("ledger lock poisoned");

    let backups = inner.repo.backups_for_mod(&record.id);
    let replaced = replaced_by_path(inner.repo.replaced_for_game(&game.package_name));

    send_progress(tx, ActivationStep::Restoring, "", 0, 1);
    if let Err(err) = inner.ledger.restore(&backups, &replaced, &record, cancel, |file, current, total| {
        send_progress(tx, ActivationStep::Restoring, file, current, total);
    }) {
        // The mod stays enabled; its backups are still the way back.
        return ActivationReport::halted(&record.id, true, err);
    }

    let mut warnings = Vec::new();
    send_progress(tx, ActivationStep::SpecialPatch, "", 0, 1);
    if let Err(err) = inner.special.on_disable(&backups, &game.package_name, &record) {
        warnings.push(format!("integrity manifest patch failed: {err}"));
    }

    send_progress(tx, ActivationStep::Persisting, "", 0, 1);
    let owned_paths: Vec<String> = backups
        .iter()
        .map(|backup| backup.game_file_path.clone())
        .collect();
    inner.repo.delete_replaced_owned_by(&record.id, &owned_paths);
    inner.repo.delete_backups_for_mod(&record.id);
    let remaining = inner.repo.backups_for_game(&game.package_name);
    inner.ledger.discard_slots(&backups, &remaining);

    record.enabled = false;
    record.updated_at = now_secs();
    inner.repo.upsert_mod(&record);

    ActivationReport {
        mod_id: record.id.clone(),
        enabled: false,
        success: true,
        needs_password: false,
        failed_files: Vec::new(),
        warnings,
        error: None,
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
