use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use modvault::{
    AccessClassifier, ActivationEvent, ActivationHandle, ActivationReport, Activator, AppPaths,
    ArchiveService, FileBackend, FileOps, GameManifest, MemoryRepository, OsVersion, ScanEngine,
    SpecialGameRegistry,
};

pub const GAME_PACKAGE: &str = "com.example.game";

pub struct Sandbox {
    pub ops: Arc<FileOps>,
    pub archive: Arc<ArchiveService>,
    pub repo: Arc<MemoryRepository>,
    pub activator: Activator,
    pub scanner: ScanEngine,
    pub game: GameManifest,
    pub storage: PathBuf,
    pub assets_dir: PathBuf,
}

/// One isolated device layout: a storage root with a game data tree and
/// the engine's own data dir, wired together the way the composition root
/// would.
pub fn sandbox(root: &Path) -> Sandbox {
    let storage = root.join("storage");
    let data_root = root.join("modvault-data");
    let assets_dir = storage
        .join("Android/data")
        .join(GAME_PACKAGE)
        .join("files/assets");
    fs::create_dir_all(&assets_dir).expect("create game assets dir");
    fs::create_dir_all(&data_root).expect("create engine data dir");

    let paths = AppPaths::new(&data_root, &storage);
    let classifier = AccessClassifier::new(OsVersion::Modern, &storage, &data_root);
    let ops = Arc::new(FileOps::new(classifier));
    let archive = Arc::new(ArchiveService::new(paths.temp_root()));
    let repo = Arc::new(MemoryRepository::new());
    let activator = Activator::new(
        Arc::clone(&ops),
        Arc::clone(&archive),
        SpecialGameRegistry::empty(),
        Arc::clone(&repo) as Arc<dyn modvault::Repository>,
        paths.clone(),
    );
    let scanner = ScanEngine::new(Arc::clone(&ops), Arc::clone(&archive));

    let game = GameManifest {
        game_name: "Example".to_string(),
        package_name: GAME_PACKAGE.to_string(),
        game_path: storage
            .join("Android/data")
            .join(GAME_PACKAGE)
            .to_string_lossy()
            .to_string(),
        game_file_path: vec![assets_dir.to_string_lossy().to_string()],
        mod_type: vec!["assets".to_string()],
        service_name: "example".to_string(),
        mod_save_path: String::new(),
        anti_harmony_file: String::new(),
        anti_harmony_content: String::new(),
        version: "1.0".to_string(),
        is_game_file_repeat: false,
        enable_backup: true,
        tips: String::new(),
    };

    Sandbox {
        ops,
        archive,
        repo,
        activator,
        scanner,
        game,
        storage,
        assets_dir,
    }
}

pub fn write_game_file(sandbox: &Sandbox, name: &str, content: &[u8]) -> PathBuf {
    let path = sandbox.assets_dir.join(name);
    fs::write(&path, content).expect("seed game file");
    path
}

pub fn md5_of(sandbox: &Sandbox, path: &Path) -> String {
    sandbox
        .ops
        .backend_for(path)
        .expect("backend")
        .md5(path)
        .expect("md5")
}

/// Drains an activation stream down to its terminal report.
pub fn wait(handle: ActivationHandle) -> ActivationReport {
    for event in handle.events.iter() {
        if let ActivationEvent::Complete(report) = event {
            return report;
        }
    }
    panic!("activation stream ended without a terminal event");
}

pub fn make_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = fs::File::create(path).expect("create zip");
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, bytes) in entries {
        writer.start_file(*name, options).expect("start entry");
        writer.write_all(bytes).expect("write entry");
    }
    writer.finish().expect("finish zip");
}

pub fn make_encrypted_zip(path: &Path, password: &str, entries: &[(&str, &[u8])]) {
    let file = fs::File::create(path).expect("create zip");
    let mut writer = zip::ZipWriter::new(file);
    use zip::unstable::write::FileOptionsExt;
    let options =
        zip::write::SimpleFileOptions::default().with_deprecated_encryption(password.as_bytes());
    for (name, bytes) in entries {
        writer.start_file(*name, options).expect("start entry");
        writer.write_all(bytes).expect("write entry");
    }
    writer.finish().expect("finish zip");
}
