mod common;

use common::*;
use modvault::Repository;
use std::fs;

fn scan_single(sandbox: &Sandbox, source: &std::path::Path) -> modvault::ModRecord {
    let records = sandbox
        .scanner
        .scan(source, &sandbox.game, None)
        .expect("scan");
    assert_eq!(records.len(), 1, "expected exactly one mod record");
    records.into_iter().next().expect("record")
}

fn dir_mod(root: &std::path::Path, name: &str, file: &str, content: &[u8]) -> std::path::PathBuf {
    let dir = root.join("sources").join(name);
    fs::create_dir_all(&dir).expect("create mod dir");
    fs::write(dir.join(file), content).expect("write mod file");
    dir
}

#[test]
fn enable_then_disable_round_trips_content() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let sandbox = sandbox(tmp.path());
    let target = write_game_file(&sandbox, "texture.png", b"ORIGINAL");
    let original_md5 = md5_of(&sandbox, &target);

    let source = dir_mod(tmp.path(), "modA", "texture.png", b"MODDED");
    let record = scan_single(&sandbox, &source);

    let report = wait(sandbox.activator.enable(record.clone(), sandbox.game.clone()));
    assert!(report.success, "enable failed: {:?}", report.error);
    assert!(report.enabled);
    assert_eq!(fs::read(&target).expect("read"), b"MODDED");

    let report = wait(sandbox.activator.disable(record, sandbox.game.clone()));
    assert!(report.success, "disable failed: {:?}", report.error);
    assert_eq!(fs::read(&target).expect("read"), b"ORIGINAL");
    assert_eq!(md5_of(&sandbox, &target), original_md5);
    assert!(sandbox.repo.backups_for_mod(&report.mod_id).is_empty());
}

#[test]
fn enable_records_backup_row_with_both_hashes() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let sandbox = sandbox(tmp.path());
    let target = write_game_file(&sandbox, "texture.png", b"ORIGINAL");
    let h0 = md5_of(&sandbox, &target);

    let source = dir_mod(tmp.path(), "modA", "texture.png", b"MODDED");
    let record = scan_single(&sandbox, &source);
    let report = wait(sandbox.activator.enable(record.clone(), sandbox.game.clone()));
    assert!(report.success);

    let h1 = md5_of(&sandbox, &target);
    assert_ne!(h0, h1);

    let backups = sandbox.repo.backups_for_mod(&record.id);
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].original_md5, h0);
    assert_eq!(backups[0].mod_file_md5, h1);
    assert!(std::path::Path::new(&backups[0].backup_path).exists());
}

#[test]
fn second_enable_is_idempotent() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let sandbox = sandbox(tmp.path());
    let target = write_game_file(&sandbox, "texture.png", b"ORIGINAL");

    let source = dir_mod(tmp.path(), "modA", "texture.png", b"MODDED");
    let record = scan_single(&sandbox, &source);

    let first = wait(sandbox.activator.enable(record.clone(), sandbox.game.clone()));
    assert!(first.success);
    let hash_after_first = md5_of(&sandbox, &target);
    let rows_after_first = sandbox.repo.backups_for_mod(&record.id).len();

    let second = wait(sandbox.activator.enable(record, sandbox.game.clone()));
    assert!(second.success);
    assert!(second.enabled);
    assert_eq!(md5_of(&sandbox, &target), hash_after_first);
    assert_eq!(
        sandbox.repo.backups_for_mod(&second.mod_id).len(),
        rows_after_first
    );
}

#[test]
fn ownership_transfer_suppresses_shadowed_restore() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let sandbox = sandbox(tmp.path());
    let target = write_game_file(&sandbox, "texture.png", b"ORIGINAL");
    let h0 = md5_of(&sandbox, &target);

    let source_a = dir_mod(tmp.path(), "modA", "texture.png", b"CONTENT-A");
    let source_b = dir_mod(tmp.path(), "modB", "texture.png", b"CONTENT-B");
    let record_a = scan_single(&sandbox, &source_a);
    let record_b = scan_single(&sandbox, &source_b);
    assert_ne!(record_a.id, record_b.id);

    assert!(wait(sandbox.activator.enable(record_a.clone(), sandbox.game.clone())).success);
    assert!(wait(sandbox.activator.enable(record_b.clone(), sandbox.game.clone())).success);
    let hb = md5_of(&sandbox, &target);
    assert_eq!(fs::read(&target).expect("read"), b"CONTENT-B");

    // A no longer owns the file; disabling it must not clobber B's write.
    let report = wait(sandbox.activator.disable(record_a, sandbox.game.clone()));
    assert!(report.success);
    assert_eq!(md5_of(&sandbox, &target), hb);

    // B is the live owner; disabling it restores the pristine original.
    let report = wait(sandbox.activator.disable(record_b, sandbox.game.clone()));
    assert!(report.success);
    assert_eq!(md5_of(&sandbox, &target), h0);
    assert_eq!(fs::read(&target).expect("read"), b"ORIGINAL");
}

#[test]
fn disjoint_mods_enable_concurrently() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let sandbox = sandbox(tmp.path());
    let target_one = write_game_file(&sandbox, "one.bin", b"ONE");
    let target_two = write_game_file(&sandbox, "two.bin", b"TWO");

    let source_a = dir_mod(tmp.path(), "modA", "one.bin", b"ONE-MOD");
    let source_b = dir_mod(tmp.path(), "modB", "two.bin", b"TWO-MOD");
    let record_a = scan_single(&sandbox, &source_a);
    let record_b = scan_single(&sandbox, &source_b);

    let handle_a = sandbox.activator.enable(record_a.clone(), sandbox.game.clone());
    let handle_b = sandbox.activator.enable(record_b.clone(), sandbox.game.clone());
    assert!(wait(handle_a).success);
    assert!(wait(handle_b).success);

    assert_eq!(fs::read(&target_one).expect("read"), b"ONE-MOD");
    assert_eq!(fs::read(&target_two).expect("read"), b"TWO-MOD");

    assert!(wait(sandbox.activator.disable(record_b, sandbox.game.clone())).success);
    assert!(wait(sandbox.activator.disable(record_a, sandbox.game.clone())).success);
    assert_eq!(fs::read(&target_one).expect("read"), b"ONE");
    assert_eq!(fs::read(&target_two).expect("read"), b"TWO");
}

#[test]
fn absent_target_uses_sentinel_backup_and_delete_on_disable() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let sandbox = sandbox(tmp.path());
    // The game knows the file name but has not downloaded it yet.
    write_game_file(&sandbox, "late.bin", b"STUB");
    let target = sandbox.assets_dir.join("late.bin");

    let source = dir_mod(tmp.path(), "modA", "late.bin", b"MODDED");
    let record = scan_single(&sandbox, &source);
    fs::remove_file(&target).expect("simulate missing game file");

    let report = wait(sandbox.activator.enable(record.clone(), sandbox.game.clone()));
    assert!(report.success, "enable failed: {:?}", report.error);
    assert_eq!(fs::read(&target).expect("read"), b"MODDED");
    let backups = sandbox.repo.backups_for_mod(&record.id);
    assert_eq!(backups.len(), 1);
    assert!(backups[0].backup_path.is_empty());
    assert!(backups[0].original_md5.is_empty());

    let report = wait(sandbox.activator.disable(record, sandbox.game.clone()));
    assert!(report.success);
    assert!(!target.exists(), "sentinel restore must delete the file");
}

#[test]
fn archive_mod_enables_from_zip() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let sandbox = sandbox(tmp.path());
    let target = write_game_file(&sandbox, "texture.png", b"ORIGINAL");

    let zip_path = tmp.path().join("sources").join("skin.zip");
    fs::create_dir_all(zip_path.parent().expect("parent")).expect("mkdir");
    make_zip(&zip_path, &[("texture.png", b"ZIPPED")]);

    let record = scan_single(&sandbox, &zip_path);
    assert!(record.is_archive);

    let report = wait(sandbox.activator.enable(record.clone(), sandbox.game.clone()));
    assert!(report.success, "enable failed: {:?}", report.error);
    assert_eq!(fs::read(&target).expect("read"), b"ZIPPED");

    let report = wait(sandbox.activator.disable(record, sandbox.game.clone()));
    assert!(report.success);
    assert_eq!(fs::read(&target).expect("read"), b"ORIGINAL");
}
