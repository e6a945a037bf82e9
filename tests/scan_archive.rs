mod common;

use common::*;
use modvault::{ModError, ModForm, Repository};
use std::fs;

#[test]
fn traditional_scan_maps_entry_to_manifest_target() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let sandbox = sandbox(tmp.path());
    write_game_file(&sandbox, "texture.png", b"ORIGINAL");

    let zip_path = tmp.path().join("skin.zip");
    make_zip(&zip_path, &[("texture.png", b"ZIPPED")]);

    let records = sandbox
        .scanner
        .scan(&zip_path, &sandbox.game, None)
        .expect("scan");
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.form, ModForm::Traditional);
    assert_eq!(record.mod_files, vec!["texture.png".to_string()]);
    assert_eq!(
        record.game_files_path,
        vec![sandbox
            .assets_dir
            .join("texture.png")
            .to_string_lossy()
            .to_string()]
    );
    assert_eq!(record.game_package_name, GAME_PACKAGE);
}

#[test]
fn unrelated_source_produces_no_records() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let sandbox = sandbox(tmp.path());
    write_game_file(&sandbox, "texture.png", b"ORIGINAL");

    let zip_path = tmp.path().join("random.zip");
    make_zip(&zip_path, &[("unrelated.bin", b"NOISE")]);

    let records = sandbox
        .scanner
        .scan(&zip_path, &sandbox.game, None)
        .expect("scan");
    assert!(records.is_empty());
}

#[test]
fn entries_group_by_parent_directory() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let sandbox = sandbox(tmp.path());
    write_game_file(&sandbox, "texture.png", b"ORIGINAL");
    write_game_file(&sandbox, "model.bin", b"ORIGINAL");

    let zip_path = tmp.path().join("pack.zip");
    make_zip(
        &zip_path,
        &[
            ("VariantA/texture.png", b"A-TEX"),
            ("VariantA/model.bin", b"A-MDL"),
            ("VariantB/texture.png", b"B-TEX"),
        ],
    );

    let mut records = sandbox
        .scanner
        .scan(&zip_path, &sandbox.game, None)
        .expect("scan");
    records.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].mod_files.len(), 2);
    assert_eq!(records[1].mod_files, vec!["VariantB/texture.png".to_string()]);
}

#[test]
fn encrypted_scan_flags_needs_password_without_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let sandbox = sandbox(tmp.path());
    write_game_file(&sandbox, "texture.png", b"ORIGINAL");

    let zip_path = tmp.path().join("locked.zip");
    make_encrypted_zip(&zip_path, "secret", &[("texture.png", b"SEALED")]);

    let records = sandbox
        .scanner
        .scan(&zip_path, &sandbox.game, None)
        .expect("encrypted scan must not error");
    assert_eq!(records.len(), 1);
    let record = records.into_iter().next().expect("record");
    assert!(record.is_encrypted);
    assert!(record.needs_password());
}

#[test]
fn password_validation_rejects_wrong_and_accepts_right() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let sandbox = sandbox(tmp.path());
    let target = write_game_file(&sandbox, "texture.png", b"ORIGINAL");

    let zip_path = tmp.path().join("locked.zip");
    make_encrypted_zip(&zip_path, "secret", &[("texture.png", b"SEALED")]);

    let record = sandbox
        .scanner
        .scan(&zip_path, &sandbox.game, None)
        .expect("scan")
        .into_iter()
        .next()
        .expect("record");
    sandbox.repo.upsert_mod(&record);

    // Enabling while locked halts with the need-password signal.
    let report = wait(sandbox.activator.enable(record.clone(), sandbox.game.clone()));
    assert!(!report.success);
    assert!(report.needs_password);
    assert_eq!(fs::read(&target).expect("read"), b"ORIGINAL");

    let err = sandbox
        .activator
        .supply_password(&record.id, "nope")
        .expect_err("wrong password must be rejected");
    assert!(matches!(err, ModError::WrongPassword));

    let unlocked = sandbox
        .activator
        .supply_password(&record.id, "secret")
        .expect("right password accepted");
    assert!(!unlocked.needs_password());

    let report = wait(sandbox.activator.enable(unlocked.clone(), sandbox.game.clone()));
    assert!(report.success, "enable failed: {:?}", report.error);
    assert_eq!(fs::read(&target).expect("read"), b"SEALED");

    let report = wait(sandbox.activator.disable(unlocked, sandbox.game.clone()));
    assert!(report.success);
    assert_eq!(fs::read(&target).expect("read"), b"ORIGINAL");
}

#[test]
fn descriptor_source_scans_as_active_form() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let sandbox = sandbox(tmp.path());
    let target = write_game_file(&sandbox, "texture.png", b"ORIGINAL");

    let descriptor = r#"{
        "name": "Neon Skin",
        "description": "Replaces the default texture",
        "version": "2.1",
        "author": "someone",
        "targetPath": "files/assets",
        "files": ["texture.png"]
    }"#;
    let zip_path = tmp.path().join("neon.zip");
    make_zip(
        &zip_path,
        &[
            ("mod.json", descriptor.as_bytes()),
            ("texture.png", b"NEON"),
        ],
    );

    let records = sandbox
        .scanner
        .scan(&zip_path, &sandbox.game, None)
        .expect("scan");
    assert_eq!(records.len(), 1);
    let record = records.into_iter().next().expect("record");
    assert_eq!(record.form, ModForm::Active);
    assert_eq!(record.name, "Neon Skin");
    assert_eq!(record.version.as_deref(), Some("2.1"));
    assert_eq!(record.mod_files, vec!["texture.png".to_string()]);
    assert_eq!(
        record.game_files_path,
        vec![sandbox
            .assets_dir
            .join("texture.png")
            .to_string_lossy()
            .to_string()]
    );

    let report = wait(sandbox.activator.enable(record.clone(), sandbox.game.clone()));
    assert!(report.success, "enable failed: {:?}", report.error);
    assert_eq!(fs::read(&target).expect("read"), b"NEON");
}

#[test]
fn packaged_form_is_detected_but_refused_at_activation() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let sandbox = sandbox(tmp.path());
    write_game_file(&sandbox, "texture.png", b"ORIGINAL");

    let descriptor = r#"{ "name": "Bundle", "targetPath": "files/assets", "files": ["texture.png"] }"#;
    let zip_path = tmp.path().join("bundle.zip");
    make_zip(
        &zip_path,
        &[
            ("package.json", descriptor.as_bytes()),
            ("texture.png", b"PACKED"),
        ],
    );

    let record = sandbox
        .scanner
        .scan(&zip_path, &sandbox.game, None)
        .expect("scan")
        .into_iter()
        .next()
        .expect("record");
    assert_eq!(record.form, ModForm::Packaged);

    let report = wait(sandbox.activator.enable(record, sandbox.game.clone()));
    assert!(!report.success);
    assert!(matches!(report.error, Some(ModError::UnsupportedForm(_))));
}

#[test]
fn sweep_drops_records_whose_source_vanished() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let sandbox = sandbox(tmp.path());
    write_game_file(&sandbox, "texture.png", b"ORIGINAL");

    let gone_zip = tmp.path().join("gone.zip");
    make_zip(&gone_zip, &[("texture.png", b"GONE")]);
    let kept_zip = tmp.path().join("kept.zip");
    make_zip(&kept_zip, &[("texture.png", b"KEPT")]);

    let gone = sandbox
        .scanner
        .scan(&gone_zip, &sandbox.game, None)
        .expect("scan")
        .into_iter()
        .next()
        .expect("record");
    let kept = sandbox
        .scanner
        .scan(&kept_zip, &sandbox.game, None)
        .expect("scan")
        .into_iter()
        .next()
        .expect("record");
    sandbox.repo.upsert_mod(&gone);
    sandbox.repo.upsert_mod(&kept);

    fs::remove_file(&gone_zip).expect("drop source");
    let orphaned = sandbox.scanner.sweep_missing(sandbox.repo.as_ref(), GAME_PACKAGE);
    assert!(orphaned.is_empty(), "disabled orphans are deleted outright");
    assert!(sandbox.repo.get_mod(&gone.id).is_none());
    assert!(sandbox.repo.get_mod(&kept.id).is_some());

    // An enabled orphan survives the sweep and is handed back instead.
    let report = wait(sandbox.activator.enable(kept.clone(), sandbox.game.clone()));
    assert!(report.success);
    fs::remove_file(&kept_zip).expect("drop source");
    let orphaned = sandbox.scanner.sweep_missing(sandbox.repo.as_ref(), GAME_PACKAGE);
    assert_eq!(orphaned.len(), 1);
    assert_eq!(orphaned[0].id, kept.id);
    assert!(sandbox.repo.get_mod(&kept.id).is_some());
}

#[test]
fn preloaded_listing_map_short_circuits_backend_calls() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let sandbox = sandbox(tmp.path());

    // Nothing on disk below assets; the preloaded map alone drives matching.
    let mut preloaded = std::collections::HashMap::new();
    preloaded.insert(
        sandbox.assets_dir.to_string_lossy().to_string(),
        ["texture.png".to_string()].into_iter().collect(),
    );

    let zip_path = tmp.path().join("skin.zip");
    make_zip(&zip_path, &[("texture.png", b"ZIPPED")]);

    let records = sandbox
        .scanner
        .scan(&zip_path, &sandbox.game, Some(&preloaded))
        .expect("scan");
    assert_eq!(records.len(), 1);
}
