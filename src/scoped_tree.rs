use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::access::{AccessClassifier, AccessTier};
use crate::direct_fs::system_time_secs;
use crate::error::FileError;
use crate::fileops::{md5_of_reader, FileBackend, FileEntry};

/// Document-tree backend. Operations on sealed paths resolve against the
/// set of granted tree roots; a sealed path outside every grant is denied.
/// The provider contract has no overwrite-in-place: replacing an entry is
/// delete-existing, create-new-entry, then stream into the fresh entry.
pub struct ScopedTree {
    classifier: Arc<RwLock<AccessClassifier>>,
}

impl ScopedTree {
    pub fn new(classifier: Arc<RwLock<AccessClassifier>>) -> Self {
        Self { classifier }
    }

    /// A sealed path must sit under a granted root; paths the classifier
    /// already rates as direct (the engine's own tree, shared storage) pass.
    fn resolve(&self, path: &Path) -> Result<(), FileError> {
        let classifier = self.classifier.read().expect("classifier poisoned");
        match classifier.classify(path) {
            AccessTier::ScopedTree | AccessTier::Direct => Ok(()),
            _ => Err(FileError::PermissionDenied(path.display().to_string())),
        }
    }

    fn open_output(&self, dir: &Path, filename: &str) -> Result<fs::File, FileError> {
        self.resolve(dir)?;
        fs::create_dir_all(dir)
            .map_err(|err| FileError::from_io(err, dir, FileError::CreateDirFailed))?;
        let dest = dir.join(filename);
        // Delete-then-create: the tree handle cannot truncate an existing
        // document in place.
        if dest.exists() {
            fs::remove_file(&dest)
                .map_err(|err| FileError::from_io(err, &dest, FileError::DeleteFailed))?;
        }
        fs::File::create(&dest)
            .map_err(|err| FileError::from_io(err, &dest, FileError::WriteFailed))
    }

    fn stream_into(
        &self,
        dir: &Path,
        filename: &str,
        mut reader: impl Read,
    ) -> Result<(), FileError> {
        let mut file = self.open_output(dir, filename)?;
        io::copy(&mut reader, &mut file)
            .map_err(|err| FileError::from_io(err, &dir.join(filename), FileError::WriteFailed))?;
        Ok(())
    }
}

impl FileBackend for ScopedTree {
    fn tier(&self) -> AccessTier {
        AccessTier::ScopedTree
    }

    fn copy_file(&self, src: &Path, dest: &Path) -> Result<(), FileError> {
        self.resolve(src)?;
        if !src.exists() {
            return Err(FileError::NotFound(src.display().to_string()));
        }
        let (dir, filename) = split_dest(dest)?;
        let file = fs::File::open(src)
            .map_err(|err| FileError::from_io(err, src, FileError::ReadFailed))?;
        self.stream_into(dir, filename, file)
            .map_err(|err| match err {
                FileError::WriteFailed(detail) => FileError::CopyFailed(detail),
                other => other,
            })
    }

    fn move_file(&self, src: &Path, dest: &Path) -> Result<(), FileError> {
        self.copy_file(src, dest)?;
        self.delete(src).map_err(|err| match err {
            FileError::DeleteFailed(detail) => FileError::MoveFailed(detail),
            other => other,
        })
    }

    fn delete(&self, path: &Path) -> Result<(), FileError> {
        self.resolve(path)?;
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
        let mut file = self.open_output(dir, filename)?;
        file.write_all(content.as_bytes())
            .map_err(|err| FileError::from_io(err, &dir.join(filename), FileError::WriteFailed))
    }

    fn read_to_string(&self, path: &Path) -> Result<String, FileError> {
        self.resolve(path)?;
        fs::read_to_string(path).map_err(|err| FileError::from_io(err, path, FileError::ReadFailed))
    }

    fn list_names(&self, dir: &Path) -> Result<Vec<String>, FileError> {
        Ok(self
            .list_entries(dir)?
            .into_iter()
            .map(|entry| entry.name)
            .collect())
    }

    fn list_entries(&self, dir: &Path) -> Result<Vec<FileEntry>, FileError> {
        self.resolve(dir)?;
        let entries =
            fs::read_dir(dir).map_err(|err| FileError::from_io(err, dir, FileError::ReadFailed))?;
        let mut rows = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| FileError::from_io(err, dir, FileError::ReadFailed))?;
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
        self.resolve(path)?;
        fs::create_dir_all(path)
            .map_err(|err| FileError::from_io(err, path, FileError::CreateDirFailed))
    }

    fn rename(&self, path: &Path, new_name: &str) -> Result<(), FileError> {
        self.resolve(path)?;
        let dest = path
            .parent()
            .map(|parent| parent.join(new_name))
            .ok_or_else(|| FileError::MoveFailed(format!("no parent: {}", path.display())))?;
        fs::rename(path, &dest).map_err(|err| FileError::from_io(err, path, FileError::MoveFailed))
    }

    fn md5(&self, path: &Path) -> Result<String, FileError> {
        self.resolve(path)?;
        let mut file = fs::File::open(path)
            .map_err(|err| FileError::from_io(err, path, FileError::ReadFailed))?;
        md5_of_reader(&mut file).map_err(|err| FileError::from_io(err, path, FileError::ReadFailed))
    }

    fn exists(&self, path: &Path) -> Result<bool, FileError> {
        self.resolve(path)?;
        Ok(path.exists())
    }

    fn is_file(&self, path: &Path) -> Result<bool, FileError> {
        self.resolve(path)?;
        Ok(path.is_file())
    }

    fn last_modified(&self, path: &Path) -> Result<i64, FileError> {
        self.resolve(path)?;
        let meta = fs::metadata(path)
            .map_err(|err| FileError::from_io(err, path, FileError::ReadFailed))?;
        Ok(system_time_secs(meta.modified().ok()))
    }

    fn file_size(&self, path: &Path) -> Result<u64, FileError> {
        self.resolve(path)?;
        let meta = fs::metadata(path)
            .map_err(|err| FileError::from_io(err, path, FileError::ReadFailed))?;
        Ok(meta.len())
    }

    fn create_from_stream(
        &self,
        dir: &Path,
        filename: &str,
        reader: Box<dyn Read + Send>,
    ) -> Result<(), FileError> {
        self.stream_into(dir, filename, reader)
    }
}

fn split_dest(dest: &Path) -> Result<(&Path, &str), FileError> {
    let dir = dest
        .parent()
        .ok_or_else(|| FileError::WriteFailed(format!("no parent: {}", dest.display())))?;
    let filename = dest
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| FileError::WriteFailed(format!("no filename: {}", dest.display())))?;
    Ok((dir, filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::OsVersion;
    use std::sync::{Arc, RwLock};

    fn tree_for(root: &Path, grant: &Path) -> ScopedTree {
        let mut classifier = AccessClassifier::new(
            OsVersion::Restricted,
            root,
            root.join("Android/data/com.modvault"),
        );
        classifier.grant_tree(grant);
        ScopedTree::new(Arc::new(RwLock::new(classifier)))
    }

    #[test]
    fn sealed_path_without_grant_is_denied() {
        let storage = tempfile::tempdir().expect("tempdir");
        let root = storage.path();
        let tree = tree_for(root, &root.join("Android/data/com.granted"));
        let err = tree
            .read_to_string(&root.join("Android/data/com.other/files/a.txt"))
            .unwrap_err();
        assert!(matches!(err, FileError::PermissionDenied(_)));
    }

    #[test]
    fn write_replaces_existing_entry() {
        let storage = tempfile::tempdir().expect("tempdir");
        let root = storage.path();
        let game_dir = root.join("Android/data/com.granted/files");
        fs::create_dir_all(&game_dir).expect("mkdir");
        fs::write(game_dir.join("a.txt"), "old").expect("seed");
        let tree = tree_for(root, &root.join("Android/data/com.granted"));
        tree.write_text(&game_dir, "a.txt", "new").expect("write");
        assert_eq!(fs::read_to_string(game_dir.join("a.txt")).expect("read"), "new");
    }
}
