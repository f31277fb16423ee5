//! End-to-end tests for extraction runs.
//!
//! Archives are synthesized with the zip crate; destinations are real
//! temporary directories.

use assert_fs::prelude::*;
use predicates::prelude::*;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use takeout_dedup::core::fingerprint::Strategy;
use takeout_dedup::core::manifest::{ManifestStore, RecordState, MANIFEST_FILE};
use takeout_dedup::core::pipeline::Pipeline;
use takeout_dedup::core::reconcile::{PendingReason, Proximity};
use takeout_dedup::TakeoutError;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Write a zip whose entries all carry the given modification date
fn write_zip(path: &Path, entries: &[(&str, &[u8])], date: (u16, u8, u8)) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    let (y, m, d) = date;
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::from_date_and_time(y, m, d, 9, 30, 0).unwrap());

    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

fn pipeline(input: &Path, dest: &Path) -> Pipeline {
    Pipeline::builder()
        .archives(input)
        .destination(dest)
        .strategy(Strategy::SizeCrc)
        .workers(2)
        .build()
}

fn record_state(dest: &Path, archive: &Path, entry: &str) -> Option<RecordState> {
    let manifest = ManifestStore::open(&dest.join(MANIFEST_FILE)).unwrap();
    let archive = fs::canonicalize(archive).unwrap();
    manifest.get(&archive, entry).map(|r| r.state)
}

#[test]
fn duplicate_inside_one_archive_is_extracted_once() {
    let temp = assert_fs::TempDir::new().unwrap();
    let input = temp.child("input");
    input.create_dir_all().unwrap();
    let archive = input.child("takeout-001.zip");
    write_zip(
        archive.path(),
        &[("Photos/img1.jpg", b"checksum X"), ("Photos/img2.jpg", b"checksum X")],
        (2023, 4, 12),
    );
    let dest = temp.child("dest");

    let report = pipeline(input.path(), dest.path()).run().unwrap();

    assert_eq!(report.analysis.duplicate_groups, 1);
    let summary = report.summary();
    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.skipped_duplicate, 1);
    dest.child("2023/04/img1.jpg").assert(predicate::path::is_file());
    dest.child("2023/04/img2.jpg").assert(predicate::path::missing());
    assert_eq!(
        record_state(dest.path(), archive.path(), "Photos/img2.jpg"),
        Some(RecordState::SkippedDuplicate)
    );
}

#[test]
fn destination_copy_turns_canonical_into_skipped_existing() {
    let temp = assert_fs::TempDir::new().unwrap();
    let input = temp.child("input");
    input.create_dir_all().unwrap();
    let archive = input.child("takeout-001.zip");
    write_zip(
        archive.path(),
        &[("Photos/img1.jpg", b"checksum X"), ("Photos/img2.jpg", b"checksum X")],
        (2023, 4, 12),
    );
    let dest = temp.child("dest");
    dest.child("2023/04/img1.jpg").write_binary(b"checksum X").unwrap();

    let report = pipeline(input.path(), dest.path()).run().unwrap();

    let summary = report.summary();
    assert_eq!(summary.extracted, 0);
    assert_eq!(summary.skipped_existing, 1);
    assert_eq!(summary.skipped_duplicate, 1);
    assert_eq!(
        record_state(dest.path(), archive.path(), "Photos/img1.jpg"),
        Some(RecordState::SkippedExisting)
    );
    assert_eq!(
        record_state(dest.path(), archive.path(), "Photos/img2.jpg"),
        Some(RecordState::SkippedDuplicate)
    );
    assert_eq!(report.cleanup_candidates().count(), 1);
}

#[test]
fn second_run_changes_nothing() {
    let temp = assert_fs::TempDir::new().unwrap();
    let input = temp.child("input");
    input.create_dir_all().unwrap();
    write_zip(
        input.child("takeout-001.zip").path(),
        &[
            ("Photos/a.jpg", b"alpha"),
            ("Photos/b.jpg", b"bravo"),
            ("Photos/copy-of-a.jpg", b"alpha"),
        ],
        (2021, 12, 24),
    );
    let dest = temp.child("dest");

    let first = pipeline(input.path(), dest.path()).run().unwrap();
    assert_eq!(first.summary().extracted, 2);
    let manifest_before = fs::read(dest.child(MANIFEST_FILE).path()).unwrap();

    let second = pipeline(input.path(), dest.path()).run().unwrap();

    let summary = second.summary();
    assert_eq!(summary.extracted, 0);
    assert_eq!(summary.bytes_written, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(
        fs::read(dest.child(MANIFEST_FILE).path()).unwrap(),
        manifest_before
    );
    dest.child("2021/12/a.jpg").assert(predicate::path::is_file());
    dest.child("2021/12/a-1.jpg").assert(predicate::path::missing());
}

#[test]
fn same_name_different_content_gets_suffix() {
    let temp = assert_fs::TempDir::new().unwrap();
    let input = temp.child("input");
    input.create_dir_all().unwrap();
    write_zip(
        input.child("takeout-001.zip").path(),
        &[("Photos/pic.jpg", b"first picture")],
        (2022, 7, 1),
    );
    write_zip(
        input.child("takeout-002.zip").path(),
        &[("Photos/pic.jpg", b"second picture")],
        (2022, 7, 1),
    );
    let dest = temp.child("dest");

    let report = pipeline(input.path(), dest.path()).run().unwrap();

    assert_eq!(report.summary().extracted, 2);
    dest.child("2022/07/pic.jpg").assert(predicate::path::eq_file(
        write_temp(&temp, "expected-first", b"first picture"),
    ));
    dest.child("2022/07/pic-1.jpg").assert(predicate::path::eq_file(
        write_temp(&temp, "expected-second", b"second picture"),
    ));
}

fn write_temp(temp: &assert_fs::TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = temp.path().join(name);
    fs::write(&path, data).unwrap();
    path
}

#[test]
fn existing_file_with_other_content_is_never_overwritten() {
    let temp = assert_fs::TempDir::new().unwrap();
    let input = temp.child("input");
    input.create_dir_all().unwrap();
    write_zip(
        input.child("takeout-001.zip").path(),
        &[("Photos/pic.jpg", b"from the archive")],
        (2022, 7, 1),
    );
    let dest = temp.child("dest");
    dest.child("2022/07/pic.jpg").write_binary(b"already mine").unwrap();

    pipeline(input.path(), dest.path()).run().unwrap();

    dest.child("2022/07/pic.jpg").assert("already mine");
    dest.child("2022/07/pic-1.jpg").assert("from the archive");
}

#[test]
fn corrupt_archive_is_skipped() {
    let temp = assert_fs::TempDir::new().unwrap();
    let input = temp.child("input");
    input.create_dir_all().unwrap();
    input
        .child("takeout-001.zip")
        .write_binary(b"this is not a zip file")
        .unwrap();
    write_zip(
        input.child("takeout-002.zip").path(),
        &[("Photos/ok.jpg", b"readable")],
        (2020, 1, 5),
    );
    let dest = temp.child("dest");

    let report = pipeline(input.path(), dest.path()).run().unwrap();

    assert_eq!(report.analysis.skipped_archives, 1);
    assert!(!report.errors.is_empty());
    assert_eq!(report.summary().extracted, 1);
    dest.child("2020/01/ok.jpg").assert(predicate::path::is_file());
}

#[test]
fn strategies_agree_on_what_to_extract() {
    let temp = assert_fs::TempDir::new().unwrap();
    let input = temp.child("input");
    input.create_dir_all().unwrap();
    write_zip(
        input.child("takeout-001.zip").path(),
        &[
            ("Photos/a.mp4", b"video payload"),
            ("Photos/b.mp4", b"video payload"),
            ("Photos/c.png", b"picture"),
        ],
        (2019, 3, 3),
    );

    for strategy in [Strategy::SizePartial, Strategy::SizeCrc, Strategy::Full] {
        let dest = temp.child(format!("dest-{}", strategy.as_str()));
        let analysis = Pipeline::builder()
            .archives(input.path())
            .destination(dest.path())
            .strategy(strategy)
            .build()
            .analyze()
            .unwrap();

        let summary = analysis.summary();
        assert_eq!(summary.to_extract, 2, "{}", strategy);
        assert_eq!(summary.duplicates, 1, "{}", strategy);
    }
}

#[test]
fn reconcile_finds_moved_and_missing_files() {
    let temp = assert_fs::TempDir::new().unwrap();
    let input = temp.child("input");
    input.create_dir_all().unwrap();
    write_zip(
        input.child("takeout-001.zip").path(),
        &[("Photos/beach.jpg", b"sand"), ("Photos/snow.jpg", b"ice")],
        (2018, 8, 15),
    );
    let dest = temp.child("dest");
    let pipeline = pipeline(input.path(), dest.path());
    pipeline.run().unwrap();

    dest.child("Holidays").create_dir_all().unwrap();
    fs::rename(
        dest.child("2018/08/beach.jpg").path(),
        dest.child("Holidays/beach.jpg").path(),
    )
    .unwrap();
    fs::remove_file(dest.child("2018/08/snow.jpg").path()).unwrap();

    let report = pipeline.reconcile().unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.confirmed.len(), 1);
    assert_eq!(report.confirmed[0].found_at, PathBuf::from("Holidays/beach.jpg"));
    assert_eq!(report.confirmed[0].proximity, Proximity::Elsewhere);
    assert_eq!(report.pending.len(), 1);
    assert_eq!(report.pending[0].reason, PendingReason::Missing);
    assert_eq!(report.pending_by_bucket()[0].bucket, "2018");
}

#[test]
fn compare_reports_overlap_without_writing() {
    let temp = assert_fs::TempDir::new().unwrap();
    let archive = temp.child("takeout-001.zip");
    write_zip(
        archive.path(),
        &[("Photos/old.jpg", b"kept"), ("Photos/new.jpg", b"fresh")],
        (2024, 2, 2),
    );
    let dest = temp.child("dest");
    dest.child("2024/02/old.jpg").write_binary(b"kept").unwrap();
    dest.child("2024/02/other.jpg").write_binary(b"elsewhere").unwrap();

    let report = Pipeline::builder()
        .destination(dest.path())
        .build()
        .compare_with_events(archive.path(), &takeout_dedup::events::null_sender())
        .unwrap();

    assert_eq!(report.already_present.len(), 1);
    assert_eq!(report.unique_in_archive, vec!["Photos/new.jpg".to_string()]);
    assert_eq!(report.unique_in_destination, vec![PathBuf::from("2024/02/other.jpg")]);
    dest.child(MANIFEST_FILE).assert(predicate::path::missing());
}

#[test]
fn unwritable_destination_stops_the_run() {
    let temp = assert_fs::TempDir::new().unwrap();
    let input = temp.child("input");
    input.create_dir_all().unwrap();
    write_zip(
        input.child("takeout-001.zip").path(),
        &[("Photos/a.jpg", b"alpha")],
        (2021, 1, 1),
    );
    let blocker = temp.child("blocker");
    blocker.write_binary(b"").unwrap();

    let err = pipeline(input.path(), &blocker.path().join("dest"))
        .run()
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, TakeoutError::DestinationUnwritable { .. }));
}

#[test]
fn hidden_entry_name_survives_a_rerun() {
    let temp = assert_fs::TempDir::new().unwrap();
    let input = temp.child("input");
    input.create_dir_all().unwrap();
    write_zip(
        input.child("takeout-001.zip").path(),
        &[("Photos/.trashed-img.jpg", b"dot-prefixed picture")],
        (2023, 4, 12),
    );
    let dest = temp.child("dest");

    let first = pipeline(input.path(), dest.path()).run().unwrap();
    assert_eq!(first.summary().extracted, 1);
    dest.child("2023/04/.trashed-img.jpg").assert("dot-prefixed picture");
    let manifest_before = fs::read(dest.child(MANIFEST_FILE).path()).unwrap();

    let second = pipeline(input.path(), dest.path()).run().unwrap();

    let summary = second.summary();
    assert_eq!(summary.extracted, 0);
    assert_eq!(summary.failed, 0);
    assert!(second.errors.is_empty(), "{:?}", second.errors);
    assert_eq!(second.cleanup_candidates().count(), 1);
    assert_eq!(
        fs::read(dest.child(MANIFEST_FILE).path()).unwrap(),
        manifest_before
    );
}

#[test]
fn repeated_entry_name_keeps_the_archive() {
    let temp = assert_fs::TempDir::new().unwrap();
    let input = temp.child("input");
    input.create_dir_all().unwrap();
    write_zip(
        input.child("takeout-001.zip").path(),
        &[
            ("Photos/img1.jpg", b"first copy"),
            ("Photos/img1.jpg", b"second, different copy"),
        ],
        (2023, 4, 12),
    );
    let dest = temp.child("dest");

    let report = pipeline(input.path(), dest.path()).run().unwrap();

    assert_eq!(report.summary().extracted, 1);
    assert_eq!(report.summary().failed, 0);
    dest.child("2023/04/img1.jpg").assert("first copy");
    assert!(report.errors.iter().any(|e| e.contains("Duplicate entry")));
    assert_eq!(report.archives[0].status.unindexed, 1);
    assert_eq!(report.cleanup_candidates().count(), 0);
}

#[test]
fn sampled_fingerprints_never_make_an_archive_deletable() {
    let temp = assert_fs::TempDir::new().unwrap();
    let input = temp.child("input");
    input.create_dir_all().unwrap();
    write_zip(
        input.child("takeout-001.zip").path(),
        &[("Photos/img1.jpg", b"same bytes"), ("Photos/img2.jpg", b"same bytes")],
        (2023, 4, 12),
    );
    let dest = temp.child("dest");

    let report = Pipeline::builder()
        .archives(input.path())
        .destination(dest.path())
        .strategy(Strategy::SizePartial)
        .build()
        .run()
        .unwrap();

    let summary = report.summary();
    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.skipped_duplicate, 1);
    assert_eq!(report.archives[0].status.unverified, 1);
    assert_eq!(report.cleanup_candidates().count(), 0);
}
