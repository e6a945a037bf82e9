pub mod access;
pub mod activate;
pub mod archive;
pub mod direct_fs;
pub mod error;
pub mod fileops;
pub mod helper_client;
pub mod helper_proto;
pub mod helper_service;
pub mod ledger;
pub mod manifest;
pub mod paths;
pub mod records;
pub mod scan;
pub mod scoped_tree;
pub mod special;
pub mod task;

pub use access::{AccessClassifier, AccessTier, OsVersion};
pub use activate::{ActivationEvent, ActivationHandle, ActivationReport, ActivationStep, Activator};
pub use archive::ArchiveService;
pub use error::{ArchiveError, FileError, GameConfigError, ModError, PermissionError};
pub use fileops::{FileBackend, FileOps};
pub use helper_client::HelperConnection;
pub use ledger::BackupLedger;
pub use manifest::GameManifest;
pub use paths::AppPaths;
pub use records::{BackupRecord, MemoryRepository, ModForm, ModRecord, ReplacedFile, Repository};
pub use scan::ScanEngine;
pub use special::{SpecialGameHandler, SpecialGameRegistry};
pub use task::CancelToken;
