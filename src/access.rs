use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Platform generations that decide which storage authority is even
/// available. Newer generations progressively seal off the shared
/// `Android/data` tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsVersion {
    /// No runtime storage access at all.
    Legacy,
    /// Plain filesystem access everywhere.
    Modern,
    /// Shared storage readable, app-data trees need a scoped grant.
    Scoped,
    /// Per-app data trees each need their own scoped grant.
    Restricted,
    /// App-data trees unreachable without the privileged helper.
    Sealed,
}

/// Which authority a single path can be reached with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessTier {
    None,
    Direct,
    ScopedTree,
    Privileged,
}

/// Pure classifier over the current grant state. Deciding a tier never
/// performs I/O; the grant set and helper flag are snapshots owned by the
/// composition root.
#[derive(Debug, Clone)]
pub struct AccessClassifier {
    os_version: OsVersion,
    storage_root: PathBuf,
    own_data_root: PathBuf,
    granted_trees: BTreeSet<PathBuf>,
    helper_available: bool,
}

impl AccessClassifier {
    pub fn new(
        os_version: OsVersion,
        storage_root: impl Into<PathBuf>,
        own_data_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            os_version,
            storage_root: storage_root.into(),
            own_data_root: own_data_root.into(),
            granted_trees: BTreeSet::new(),
            helper_available: false,
        }
    }

    pub fn os_version(&self) -> OsVersion {
        self.os_version
    }

    pub fn set_helper_available(&mut self, available: bool) {
        self.helper_available = available;
    }

    pub fn helper_available(&self) -> bool {
        self.helper_available
    }

    /// Records a granted scoped tree. Grants are rooted at directories.
    pub fn grant_tree(&mut self, root: impl Into<PathBuf>) {
        self.granted_trees.insert(root.into());
    }

    pub fn revoke_tree(&mut self, root: &Path) {
        self.granted_trees.remove(root);
    }

    pub fn classify(&self, path: &Path) -> AccessTier {
        // The engine's own tree is always plain-file accessible once the
        // platform hands out app storage at all.
        if path.starts_with(&self.own_data_root) && self.os_version != OsVersion::Legacy {
            return AccessTier::Direct;
        }

        match self.os_version {
            OsVersion::Legacy => AccessTier::None,
            OsVersion::Modern => AccessTier::Direct,
            OsVersion::Scoped | OsVersion::Restricted => {
                if !self.is_sealed_path(path) {
                    return AccessTier::Direct;
                }
                if self.helper_available {
                    return AccessTier::Privileged;
                }
                if self.has_granted_tree(path) {
                    AccessTier::ScopedTree
                } else {
                    AccessTier::None
                }
            }
            OsVersion::Sealed => {
                if !self.is_sealed_path(path) {
                    return AccessTier::Direct;
                }
                if self.helper_available {
                    AccessTier::Privileged
                } else {
                    AccessTier::None
                }
            }
        }
    }

    /// The nearest ancestor a scoped grant must be requested for. Grants
    /// cover a directory tree, so files resolve to their sealing directory:
    /// the whole shared data root on `Scoped`, the per-app subtree on
    /// `Restricted` and later.
    pub fn request_target(&self, path: &Path) -> PathBuf {
        let data_root = self.storage_root.join("Android").join("data");
        let obb_root = self.storage_root.join("Android").join("obb");
        for root in [&data_root, &obb_root] {
            if let Ok(rest) = path.strip_prefix(root) {
                return match self.os_version {
                    OsVersion::Scoped => root.clone(),
                    _ => match rest.components().next() {
                        Some(package) => root.join(package),
                        None => root.clone(),
                    },
                };
            }
        }
        if path.is_dir() || path.extension().is_none() {
            path.to_path_buf()
        } else {
            path.parent().unwrap_or(path).to_path_buf()
        }
    }

    fn is_sealed_path(&self, path: &Path) -> bool {
        let android = self.storage_root.join("Android");
        path.strip_prefix(&android)
            .map(|rest| {
                rest.components()
                    .next()
                    .map(|c| {
                        let name = c.as_os_str().to_string_lossy();
                        name == "data" || name == "obb"
                    })
                    .unwrap_or(false)
                    && rest.components().count() > 1
            })
            .unwrap_or(false)
    }

    fn has_granted_tree(&self, path: &Path) -> bool {
        self.granted_trees.iter().any(|root| path.starts_with(root))
    }

    pub fn granted_trees(&self) -> impl Iterator<Item = &PathBuf> {
        self.granted_trees.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(version: OsVersion) -> AccessClassifier {
        AccessClassifier::new(version, "/storage", "/storage/Android/data/com.modvault")
    }

    #[test]
    fn modern_platform_is_direct_everywhere() {
        let access = classifier(OsVersion::Modern);
        assert_eq!(
            access.classify(Path::new("/storage/Android/data/com.game/files/a.pak")),
            AccessTier::Direct
        );
    }

    #[test]
    fn scoped_platform_requires_grant_for_app_data() {
        let mut access = classifier(OsVersion::Scoped);
        let target = Path::new("/storage/Android/data/com.game/files/a.pak");
        assert_eq!(access.classify(target), AccessTier::None);
        access.grant_tree("/storage/Android/data");
        assert_eq!(access.classify(target), AccessTier::ScopedTree);
    }

    #[test]
    fn helper_wins_over_scoped_grant() {
        let mut access = classifier(OsVersion::Restricted);
        access.grant_tree("/storage/Android/data/com.game");
        access.set_helper_available(true);
        assert_eq!(
            access.classify(Path::new("/storage/Android/data/com.game/files/a.pak")),
            AccessTier::Privileged
        );
    }

    #[test]
    fn sealed_platform_never_offers_scoped_trees() {
        let mut access = classifier(OsVersion::Sealed);
        access.grant_tree("/storage/Android/data/com.game");
        assert_eq!(
            access.classify(Path::new("/storage/Android/data/com.game/files/a.pak")),
            AccessTier::None
        );
    }

    #[test]
    fn shared_storage_outside_android_stays_direct() {
        let access = classifier(OsVersion::Sealed);
        assert_eq!(
            access.classify(Path::new("/storage/Download/Mods/skin.zip")),
            AccessTier::Direct
        );
    }

    #[test]
    fn own_data_tree_is_direct() {
        let access = classifier(OsVersion::Sealed);
        assert_eq!(
            access.classify(Path::new(
                "/storage/Android/data/com.modvault/backup/f.bak"
            )),
            AccessTier::Direct
        );
    }

    #[test]
    fn request_target_is_grant_root_not_file() {
        let access = classifier(OsVersion::Restricted);
        assert_eq!(
            access.request_target(Path::new("/storage/Android/data/com.game/files/a.pak")),
            PathBuf::from("/storage/Android/data/com.game")
        );
        let scoped = classifier(OsVersion::Scoped);
        assert_eq!(
            scoped.request_target(Path::new("/storage/Android/data/com.game/files/a.pak")),
            PathBuf::from("/storage/Android/data")
        );
    }
}
