mod common;

use common::{make_encrypted_zip, make_zip};
use modvault::{ArchiveError, ArchiveService};
use std::fs;
use std::io::Read;
use std::sync::{Arc, Mutex};

fn service(tmp: &std::path::Path) -> ArchiveService {
    ArchiveService::new(tmp.join("temp"))
}

#[test]
fn extract_all_reports_monotonic_progress() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let archive = service(tmp.path());
    let zip_path = tmp.path().join("multi.zip");
    make_zip(
        &zip_path,
        &[
            ("a.bin", b"alpha"),
            ("sub/b.bin", b"beta"),
            ("sub/deep/c.bin", b"gamma"),
        ],
    );

    let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let dest = tmp.path().join("out");
    archive
        .extract_all(
            &zip_path,
            &dest,
            None,
            true,
            Some(Arc::new(move |percent| {
                sink.lock().expect("progress sink").push(percent);
            })),
        )
        .expect("extract");

    assert_eq!(fs::read(dest.join("a.bin")).expect("read"), b"alpha");
    assert_eq!(fs::read(dest.join("sub/b.bin")).expect("read"), b"beta");
    assert_eq!(
        fs::read(dest.join("sub/deep/c.bin")).expect("read"),
        b"gamma"
    );

    let seen = seen.lock().expect("progress sink");
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(*seen.last().expect("final tick"), 100);
}

#[test]
fn extract_subset_only_touches_named_entries() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let archive = service(tmp.path());
    let zip_path = tmp.path().join("multi.zip");
    make_zip(&zip_path, &[("keep.bin", b"keep"), ("skip.bin", b"skip")]);

    let dest = tmp.path().join("out");
    archive
        .extract_subset(&zip_path, &["keep.bin".to_string()], &dest, None, None)
        .expect("extract subset");
    assert!(dest.join("keep.bin").exists());
    assert!(!dest.join("skip.bin").exists());
}

#[test]
fn extract_subset_missing_entry_is_item_not_found() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let archive = service(tmp.path());
    let zip_path = tmp.path().join("one.zip");
    make_zip(&zip_path, &[("present.bin", b"here")]);

    let err = archive
        .extract_subset(
            &zip_path,
            &["absent.bin".to_string()],
            &tmp.path().join("out"),
            None,
            None,
        )
        .expect_err("missing entry must fail");
    assert!(matches!(err, ArchiveError::ItemNotFound(name) if name == "absent.bin"));
}

#[test]
fn stream_entry_yields_entry_bytes() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let archive = service(tmp.path());
    let zip_path = tmp.path().join("one.zip");
    make_zip(&zip_path, &[("nested/file.bin", b"streamed bytes")]);

    let mut reader = archive
        .stream_entry(&zip_path, "nested/file.bin", None)
        .expect("stream entry");
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).expect("drain");
    assert_eq!(bytes, b"streamed bytes");
}

#[test]
fn password_checks_detect_encryption_state() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let archive = service(tmp.path());

    let plain = tmp.path().join("plain.zip");
    make_zip(&plain, &[("a.bin", b"plain")]);
    assert!(!archive.is_encrypted(&plain).expect("plain check"));
    archive
        .validate_password(&plain, "anything")
        .expect("no encrypted entries means any password validates");

    let locked = tmp.path().join("locked.zip");
    make_encrypted_zip(&locked, "secret", &[("a.bin", b"sealed")]);
    assert!(archive.is_encrypted(&locked).expect("locked check"));
    assert!(matches!(
        archive.validate_password(&locked, "wrong"),
        Err(ArchiveError::WrongPassword)
    ));
    archive
        .validate_password(&locked, "secret")
        .expect("correct password");
}

#[test]
fn non_archive_extension_is_rejected() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let archive = service(tmp.path());
    let path = tmp.path().join("notes.txt");
    fs::write(&path, "hello").expect("write");
    assert!(!archive.is_archive(&path));
    assert!(matches!(
        archive.list_entries(&path),
        Err(ArchiveError::UnsupportedFormat(_))
    ));
}
