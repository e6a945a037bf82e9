use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::access::AccessTier;
use crate::error::FileError;
use crate::fileops::{md5_of_reader, FileBackend, FileEntry};

/// Plain filesystem backend, usable wherever the OS hands out
/// unrestricted access.
pub struct DirectFs;

impl DirectFs {
    fn ensure_parent(dest: &Path) -> Result<(), FileError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| FileError::from_io(err, parent, FileError::CreateDirFailed))?;
        }
        Ok(())
    }
}

impl FileBackend for DirectFs {
    fn tier(&self) -> AccessTier {
        AccessTier::Direct
    }

    fn copy_file(&self, src: &Path, dest: &Path) -> Result<(), FileError> {
        if !src.exists() {
            return Err(FileError::NotFound(src.display().to_string()));
        }
        Self::ensure_parent(dest)?;
        fs::copy(src, dest).map_err(|err| FileError::from_io(err, src, FileError::CopyFailed))?;
        Ok(())
    }

    fn move_file(&self, src: &Path, dest: &Path) -> Result<(), FileError> {
        if !src.exists() {
            return Err(FileError::NotFound(src.display().to_string()));
        }
        Self::ensure_parent(dest)?;
        match fs::rename(src, dest) {
            Ok(()) => Ok(()),
            // Rename across mount points fails; fall back to copy + delete.
            Err(_) => {
                fs::copy(src, dest)
                    .map_err(|err| FileError::from_io(err, src, FileError::MoveFailed))?;
                fs::remove_file(src)
                    .map_err(|err| FileError::from_io(err, src, FileError::MoveFailed))?;
                Ok(())
            }
        }
    }

    fn delete(&self, path: &Path) -> Result<(), FileError> {
        if !path.exists() {
            return Err(FileError::NotFound(path.display().to_string()));
        }
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        result.map_err(|err| FileError::from_io(err, path, FileError::DeleteFailed))
    }

    fn write_text(&self, dir: &Path, filename: &str, content: &str) -> Result<(), FileError> {
        fs::create_dir_all(dir)
            .map_err(|err| FileError::from_io(err, dir, FileError::CreateDirFailed))?;
        let dest = dir.join(filename);
        fs::write(&dest, content)
            .map_err(|err| FileError::from_io(err, &dest, FileError::WriteFailed))
    }

    fn read_to_string(&self, path: &Path) -> Result<String, FileError> {
        fs::read_to_string(path).map_err(|err| FileError::from_io(err, path, FileError::ReadFailed))
    }

    fn list_names(&self, dir: &Path) -> Result<Vec<String>, FileError> {
        let entries =
            fs::read_dir(dir).map_err(|err| FileError::from_io(err, dir, FileError::ReadFailed))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|err| FileError::from_io(err, dir, FileError::ReadFailed))?;
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        Ok(names)
    }

    fn list_entries(&self, dir: &Path) -> Result<Vec<FileEntry>, FileError> {
        let entries =
            fs::read_dir(dir).map_err(|err| FileError::from_io(err, dir, FileError::ReadFailed))?;
        let mut rows = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|err| FileError::from_io(err, dir, FileError::ReadFailed))?;
            let meta = entry
                .metadata()
                .map_err(|err| FileError::from_io(err, &entry.path(), FileError::ReadFailed))?;
            rows.push(FileEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: entry.path(),
                is_dir: meta.is_dir(),
                len: meta.len(),
                modified: system_time_secs(meta.modified().ok()),
            });
        }
        Ok(rows)
    }

    fn create_dir(&self, path: &Path) -> Result<(), FileError> {
        fs::create_dir_all(path)
            .map_err(|err| FileError::from_io(err, path, FileError::CreateDirFailed))
    }

    fn rename(&self, path: &Path, new_name: &str) -> Result<(), FileError> {
        let dest = path
            .parent()
            .map(|parent| parent.join(new_name))
            .ok_or_else(|| FileError::MoveFailed(format!("no parent: {}", path.display())))?;
        fs::rename(path, &dest).map_err(|err| FileError::from_io(err, path, FileError::MoveFailed))
    }

    fn md5(&self, path: &Path) -> Result<String, FileError> {
        let mut file = fs::File::open(path)
            .map_err(|err| FileError::from_io(err, path, FileError::ReadFailed))?;
        md5_of_reader(&mut file).map_err(|err| FileError::from_io(err, path, FileError::ReadFailed))
    }

    fn exists(&self, path: &Path) -> Result<bool, FileError> {
        Ok(path.exists())
    }

    fn is_file(&self, path: &Path) -> Result<bool, FileError> {
        Ok(path.is_file())
    }

    fn last_modified(&self, path: &Path) -> Result<i64, FileError> {
        let meta = fs::metadata(path)
            .map_err(|err| FileError::from_io(err, path, FileError::ReadFailed))?;
        Ok(system_time_secs(meta.modified().ok()))
    }

    fn file_size(&self, path: &Path) -> Result<u64, FileError> {
        let meta = fs::metadata(path)
            .map_err(|err| FileError::from_io(err, path, FileError::ReadFailed))?;
        Ok(meta.len())
    }

    fn create_from_stream(
        &self,
        dir: &Path,
        filename: &str,
        mut reader: Box<dyn Read + Send>,
    ) -> Result<(), FileError> {
        fs::create_dir_all(dir)
            .map_err(|err| FileError::from_io(err, dir, FileError::CreateDirFailed))?;
        let dest = dir.join(filename);
        let mut file = fs::File::create(&dest)
            .map_err(|err| FileError::from_io(err, &dest, FileError::WriteFailed))?;
        io::copy(&mut reader, &mut file)
            .map_err(|err| FileError::from_io(err, &dest, FileError::WriteFailed))?;
        Ok(())
    }
}

pub(crate) fn system_time_secs(time: Option<std::time::SystemTime>) -> i64 {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
