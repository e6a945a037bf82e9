use md5::{Digest, Md5};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::access::{AccessClassifier, AccessTier, OsVersion};
use crate::direct_fs::DirectFs;
use crate::error::{FileError, PermissionError};
use crate::helper_client::HelperConnection;
use crate::helper_client::HelperFs;
use crate::scoped_tree::ScopedTree;

/// One directory listing row, shaped like what the privileged helper
/// reports so all three backends agree.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub len: u64,
    pub modified: i64,
}

/// The uniform capability set every storage tier implements. Callers above
/// the router never branch on which implementor they were handed.
pub trait FileBackend: Send + Sync {
    fn tier(&self) -> AccessTier;

    fn copy_file(&self, src: &Path, dest: &Path) -> Result<(), FileError>;
    fn move_file(&self, src: &Path, dest: &Path) -> Result<(), FileError>;
    /// Deletes a file or a whole directory tree.
    fn delete(&self, path: &Path) -> Result<(), FileError>;
    fn write_text(&self, dir: &Path, filename: &str, content: &str) -> Result<(), FileError>;
    fn read_to_string(&self, path: &Path) -> Result<String, FileError>;
    fn list_names(&self, dir: &Path) -> Result<Vec<String>, FileError>;
    fn list_entries(&self, dir: &Path) -> Result<Vec<FileEntry>, FileError>;
    fn create_dir(&self, path: &Path) -> Result<(), FileError>;
    fn rename(&self, path: &Path, new_name: &str) -> Result<(), FileError>;
    fn md5(&self, path: &Path) -> Result<String, FileError>;
    fn exists(&self, path: &Path) -> Result<bool, FileError>;
    fn is_file(&self, path: &Path) -> Result<bool, FileError>;
    fn last_modified(&self, path: &Path) -> Result<i64, FileError>;
    fn file_size(&self, path: &Path) -> Result<u64, FileError>;
    /// Creates `dir/filename` from a byte stream. The only write primitive
    /// the scoped tier supports for existing entries, and the one that
    /// crosses the helper pipe on the privileged tier.
    fn create_from_stream(
        &self,
        dir: &Path,
        filename: &str,
        reader: Box<dyn Read + Send>,
    ) -> Result<(), FileError>;
}

pub(crate) fn md5_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub(crate) fn md5_of_reader(reader: &mut dyn Read) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(md5_hex(&hasher.finalize()))
}

/// Routes each path to the backend its access tier demands. The classifier
/// is the single place backend identity is decided; everything above works
/// against `dyn FileBackend`.
pub struct FileOps {
    classifier: Arc<RwLock<AccessClassifier>>,
    direct: Arc<DirectFs>,
    scoped: Arc<ScopedTree>,
    helper: Mutex<Option<Arc<HelperFs>>>,
}

impl FileOps {
    pub fn new(classifier: AccessClassifier) -> Self {
        let classifier = Arc::new(RwLock::new(classifier));
        Self {
            direct: Arc::new(DirectFs),
            scoped: Arc::new(ScopedTree::new(Arc::clone(&classifier))),
            helper: Mutex::new(None),
            classifier,
        }
    }

    /// Hands the router a live helper connection. Classification starts
    /// returning the privileged tier for sealed paths from here on.
    pub fn attach_helper(&self, connection: HelperConnection) {
        *self.helper.lock().expect("helper slot poisoned") =
            Some(Arc::new(HelperFs::new(connection)));
        self.classifier
            .write()
            .expect("classifier poisoned")
            .set_helper_available(true);
    }

    pub fn detach_helper(&self) {
        *self.helper.lock().expect("helper slot poisoned") = None;
        self.classifier
            .write()
            .expect("classifier poisoned")
            .set_helper_available(false);
    }

    pub fn grant_tree(&self, root: impl Into<PathBuf>) {
        self.classifier
            .write()
            .expect("classifier poisoned")
            .grant_tree(root);
    }

    pub fn classify(&self, path: &Path) -> AccessTier {
        self.classifier
            .read()
            .expect("classifier poisoned")
            .classify(path)
    }

    pub fn request_target(&self, path: &Path) -> PathBuf {
        self.classifier
            .read()
            .expect("classifier poisoned")
            .request_target(path)
    }

    pub fn backend_for(&self, path: &Path) -> Result<Arc<dyn FileBackend>, PermissionError> {
        let (tier, os_version, target) = {
            let classifier = self.classifier.read().expect("classifier poisoned");
            (
                classifier.classify(path),
                classifier.os_version(),
                classifier.request_target(path),
            )
        };
        match tier {
            AccessTier::Direct => Ok(Arc::clone(&self.direct) as Arc<dyn FileBackend>),
            AccessTier::ScopedTree => Ok(Arc::clone(&self.scoped) as Arc<dyn FileBackend>),
            AccessTier::Privileged => self
                .helper
                .lock()
                .expect("helper slot poisoned")
                .as_ref()
                .map(|helper| Arc::clone(helper) as Arc<dyn FileBackend>)
                .ok_or(PermissionError::HelperUnavailable),
            AccessTier::None => match os_version {
                OsVersion::Legacy => {
                    Err(PermissionError::StorageDenied(path.display().to_string()))
                }
                OsVersion::Sealed => Err(PermissionError::HelperUnavailable),
                _ => Err(PermissionError::ScopedTreeNotGranted(
                    target.display().to_string(),
                )),
            },
        }
    }
}
