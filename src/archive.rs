use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use time::{Date, Month, PrimitiveDateTime, Time as TimeOfDay};
use walkdir::WalkDir;

use crate::error::ArchiveError;

/// Percentage callback; values only ever increase across one extraction.
pub type ArchiveProgress = Arc<dyn Fn(u8) + Send + Sync>;

/// Archive capabilities over the staging area. Extractions land in a
/// staging directory first and relocate into place once complete, so a
/// failed extraction never leaves a half-written destination.
pub struct ArchiveService {
    temp_root: PathBuf,
}

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

impl ArchiveService {
    pub fn new(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
        }
    }

    pub fn is_archive(&self, path: &Path) -> bool {
        matches!(
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.to_ascii_lowercase())
                .as_deref(),
            Some("zip") | Some("7z")
        )
    }

    /// Entry names, in archive order. ZIP names are readable without the
    /// password; a 7z with encrypted headers fails with
    /// `EncryptedNeedsPassword`, which the scanner treats as an expected
    /// state rather than a fault.
    pub fn list_entries(&self, path: &Path) -> Result<Vec<String>, ArchiveError> {
        match extension_of(path).as_deref() {
            Some("zip") => {
                let mut archive = open_zip(path)?;
                let mut names = Vec::with_capacity(archive.len());
                for index in 0..archive.len() {
                    let entry = archive
                        .by_index_raw(index)
                        .map_err(|err| ArchiveError::Corrupted(err.to_string()))?;
                    if !entry.is_dir() {
                        names.push(entry.name().to_string());
                    }
                }
                if names.is_empty() {
                    return Err(ArchiveError::Empty);
                }
                Ok(names)
            }
            Some("7z") => {
                let reader = sevenz_rust::SevenZReader::open(path, sevenz_rust::Password::empty())
                    .map_err(map_sevenz_error)?;
                let names: Vec<String> = reader
                    .archive()
                    .files
                    .iter()
                    .filter(|entry| !entry.is_directory())
                    .map(|entry| entry.name().to_string())
                    .collect();
                if names.is_empty() {
                    return Err(ArchiveError::Empty);
                }
                Ok(names)
            }
            other => Err(ArchiveError::UnsupportedFormat(
                other.unwrap_or("none").to_string(),
            )),
        }
    }

    pub fn is_encrypted(&self, path: &Path) -> Result<bool, ArchiveError> {
        match extension_of(path).as_deref() {
            Some("zip") => {
                let mut archive = open_zip(path)?;
                for index in 0..archive.len() {
                    let entry = archive
                        .by_index_raw(index)
                        .map_err(|err| ArchiveError::Corrupted(err.to_string()))?;
                    if entry.encrypted() {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Some("7z") => {
                match sevenz_rust::SevenZReader::open(path, sevenz_rust::Password::empty()) {
                    Ok(_) => Ok(false),
                    Err(err) => match map_sevenz_error(err) {
                        ArchiveError::EncryptedNeedsPassword => Ok(true),
                        other => Err(other),
                    },
                }
            }
            other => Err(ArchiveError::UnsupportedFormat(
                other.unwrap_or("none").to_string(),
            )),
        }
    }

    /// Decrypts and fully reads the first encrypted entry; the checksum at
    /// end-of-stream is what actually proves the password.
    pub fn validate_password(&self, path: &Path, password: &str) -> Result<(), ArchiveError> {
        match extension_of(path).as_deref() {
            Some("zip") => {
                let mut archive = open_zip(path)?;
                let mut target = None;
                for index in 0..archive.len() {
                    let entry = archive
                        .by_index_raw(index)
                        .map_err(|err| ArchiveError::Corrupted(err.to_string()))?;
                    if entry.encrypted() && !entry.is_dir() {
                        target = Some(index);
                        break;
                    }
                }
                let Some(index) = target else {
                    return Ok(());
                };
                let mut entry = match archive.by_index_decrypt(index, password.as_bytes()) {
                    Ok(entry) => entry,
                    Err(zip::result::ZipError::InvalidPassword) => {
                        return Err(ArchiveError::WrongPassword)
                    }
                    Err(err) => return Err(ArchiveError::Corrupted(err.to_string())),
                };
                match io::copy(&mut entry, &mut io::sink()) {
                    Ok(_) => Ok(()),
                    Err(_) => Err(ArchiveError::WrongPassword),
                }
            }
            Some("7z") => {
                let stage = self.make_stage_dir("pwcheck")?;
                let result = sevenz_rust::decompress_file_with_password(
                    path,
                    &stage,
                    sevenz_rust::Password::from(password),
                );
                let _ = fs::remove_dir_all(&stage);
                result.map_err(|err| match map_sevenz_error(err) {
                    ArchiveError::EncryptedNeedsPassword => ArchiveError::WrongPassword,
                    other => other,
                })
            }
            other => Err(ArchiveError::UnsupportedFormat(
                other.unwrap_or("none").to_string(),
            )),
        }
    }

    pub fn extract_all(
        &self,
        path: &Path,
        dest: &Path,
        password: Option<&str>,
        overwrite: bool,
        progress: Option<ArchiveProgress>,
    ) -> Result<(), ArchiveError> {
        if dest.exists() && !overwrite {
            return Ok(());
        }
        let stage = self.make_stage_dir("extract")?;
        let result = match extension_of(path).as_deref() {
            Some("zip") => extract_zip_entries(path, &stage, None, password, progress.as_ref()),
            Some("7z") => {
                let outcome = match password {
                    Some(password) => sevenz_rust::decompress_file_with_password(
                        path,
                        &stage,
                        sevenz_rust::Password::from(password),
                    ),
                    None => sevenz_rust::decompress_file(path, &stage),
                };
                outcome.map_err(map_sevenz_error).map(|()| {
                    if let Some(progress) = progress.as_ref() {
                        progress(100);
                    }
                })
            }
            other => Err(ArchiveError::UnsupportedFormat(
                other.unwrap_or("none").to_string(),
            )),
        };
        if let Err(err) = result {
            let _ = fs::remove_dir_all(&stage);
            return Err(err);
        }
        relocate(&stage, dest)
    }

    /// Extracts only the named entries, preserving their archive-relative
    /// paths below `dest`.
    pub fn extract_subset(
        &self,
        path: &Path,
        names: &[String],
        dest: &Path,
        password: Option<&str>,
        progress: Option<ArchiveProgress>,
    ) -> Result<(), ArchiveError> {
        if names.is_empty() {
            return Ok(());
        }
        match extension_of(path).as_deref() {
            Some("zip") => {}
            other => {
                return Err(ArchiveError::UnsupportedFormat(
                    other.unwrap_or("none").to_string(),
                ))
            }
        }
        let stage = self.make_stage_dir("subset")?;
        if let Err(err) = extract_zip_entries(path, &stage, Some(names), password, progress.as_ref())
        {
            let _ = fs::remove_dir_all(&stage);
            return Err(err);
        }
        relocate(&stage, dest)
    }

    /// Decompresses one entry into the staging area and hands back a reader
    /// over it. The per-file fallback path when a bulk extract fails.
    pub fn stream_entry(
        &self,
        path: &Path,
        name: &str,
        password: Option<&str>,
    ) -> Result<Box<dyn Read + Send>, ArchiveError> {
        let stage = self.make_stage_dir("stream")?;
        let target = [name.to_string()];
        extract_zip_entries(path, &stage, Some(&target), password, None)?;
        let extracted = stage.join(name);
        let file = fs::File::open(&extracted)
            .map_err(|_| ArchiveError::ItemNotFound(name.to_string()))?;
        // The stage dir is unlinked immediately; the open handle keeps the
        // bytes readable until dropped.
        let reader = StagedEntry { file, stage };
        Ok(Box::new(reader))
    }

    fn make_stage_dir(&self, suffix: &str) -> Result<PathBuf, ArchiveError> {
        let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let stage = self
            .temp_root
            .join(format!("stage-{nanos}-{counter}-{suffix}"));
        fs::create_dir_all(&stage)
            .map_err(|err| ArchiveError::ExtractFailed(format!("create staging dir: {err}")))?;
        Ok(stage)
    }
}

struct StagedEntry {
    file: fs::File,
    stage: PathBuf,
}

impl Read for StagedEntry {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Drop for StagedEntry {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.stage);
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn open_zip(path: &Path) -> Result<zip::ZipArchive<fs::File>, ArchiveError> {
    let file = fs::File::open(path)
        .map_err(|err| ArchiveError::Unknown(format!("{}: {err}", path.display())))?;
    zip::ZipArchive::new(file).map_err(|err| ArchiveError::Corrupted(err.to_string()))
}

fn extract_zip_entries(
    path: &Path,
    dest: &Path,
    subset: Option<&[String]>,
    password: Option<&str>,
    progress: Option<&ArchiveProgress>,
) -> Result<(), ArchiveError> {
    let mut archive = open_zip(path)?;
    if archive.len() == 0 {
        return Err(ArchiveError::Empty);
    }
    let total = match subset {
        Some(names) => names.len(),
        None => archive.len(),
    }
    .max(1);
    let mut done = 0usize;
    let mut matched: Vec<String> = Vec::new();
    let mut last_percent = 0u8;

    for index in 0..archive.len() {
        let wanted = {
            let entry = archive
                .by_index_raw(index)
                .map_err(|err| ArchiveError::Corrupted(err.to_string()))?;
            let name = entry.name().to_string();
            match subset {
                Some(names) => {
                    if names.iter().any(|wanted| wanted == &name) {
                        matched.push(name);
                        true
                    } else {
                        false
                    }
                }
                None => true,
            }
        };
        if !wanted {
            continue;
        }

        let mut entry = match password {
            Some(password) => match archive.by_index_decrypt(index, password.as_bytes()) {
                Ok(entry) => entry,
                Err(zip::result::ZipError::InvalidPassword) => {
                    return Err(ArchiveError::WrongPassword)
                }
                Err(err) => return Err(ArchiveError::Corrupted(err.to_string())),
            },
            None => match archive.by_index(index) {
                Ok(entry) => entry,
                Err(zip::result::ZipError::UnsupportedArchive(detail))
                    if detail.contains("Password") =>
                {
                    return Err(ArchiveError::EncryptedNeedsPassword)
                }
                Err(err) => return Err(ArchiveError::Corrupted(err.to_string())),
            },
        };

        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let out_path = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|err| ArchiveError::ExtractFailed(err.to_string()))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| ArchiveError::ExtractFailed(err.to_string()))?;
        }
        let mut out_file = fs::File::create(&out_path)
            .map_err(|err| ArchiveError::ExtractFailed(err.to_string()))?;
        io::copy(&mut entry, &mut out_file).map_err(|err| {
            if password.is_some() {
                // A bad ZipCrypto password surfaces here as a checksum fault.
                ArchiveError::WrongPassword
            } else {
                ArchiveError::ExtractFailed(err.to_string())
            }
        })?;
        if let Some(dt) = entry.last_modified() {
            if let Some(mtime) = zip_time_to_unix(dt) {
                let _ = set_file_mtime(&out_path, FileTime::from_unix_time(mtime, 0));
            }
        }

        done += 1;
        if let Some(progress) = progress {
            let percent = ((done * 100) / total).min(100) as u8;
            if percent > last_percent {
                last_percent = percent;
                progress(percent);
            }
        }
    }

    if let Some(names) = subset {
        if let Some(missing) = names.iter().find(|name| !matched.contains(*name)) {
            return Err(ArchiveError::ItemNotFound(missing.clone()));
        }
    }

    if let Some(progress) = progress {
        if last_percent < 100 {
            progress(100);
        }
    }
    Ok(())
}

fn zip_time_to_unix(dt: zip::DateTime) -> Option<i64> {
    let month = Month::try_from(dt.month()).ok()?;
    let date = Date::from_calendar_date(dt.year() as i32, month, dt.day()).ok()?;
    let time = TimeOfDay::from_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp())
}

fn map_sevenz_error(err: sevenz_rust::Error) -> ArchiveError {
    let detail = err.to_string();
    if detail.to_lowercase().contains("password") {
        ArchiveError::EncryptedNeedsPassword
    } else {
        ArchiveError::Corrupted(detail)
    }
}

/// Moves the finished staging tree into place. Rename when possible, file
/// by file when the destination sits on another filesystem.
fn relocate(stage: &Path, dest: &Path) -> Result<(), ArchiveError> {
    if dest.exists() {
        // Merge into an existing destination entry by entry.
        let merged = merge_tree(stage, dest);
        let _ = fs::remove_dir_all(stage);
        return merged;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|err| ArchiveError::ExtractFailed(err.to_string()))?;
    }
    match fs::rename(stage, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            let merged = merge_tree(stage, dest);
            let _ = fs::remove_dir_all(stage);
            merged
        }
    }
}

fn merge_tree(stage: &Path, dest: &Path) -> Result<(), ArchiveError> {
    for entry in WalkDir::new(stage).follow_links(false) {
        let entry = entry.map_err(|err| ArchiveError::ExtractFailed(err.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(stage)
            .map_err(|err| ArchiveError::ExtractFailed(err.to_string()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(|err| ArchiveError::ExtractFailed(err.to_string()))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| ArchiveError::ExtractFailed(err.to_string()))?;
            }
            fs::rename(entry.path(), &target).or_else(|_| {
                fs::copy(entry.path(), &target).map(|_| ())
            })
            .map_err(|err| ArchiveError::ExtractFailed(err.to_string()))?;
        }
    }
    Ok(())
}
