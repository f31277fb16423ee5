//! Persistent cache behavior across runs.

use assert_fs::prelude::*;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use takeout_dedup::core::cache::{CacheBackend, SqliteCache};
use takeout_dedup::core::fingerprint::Strategy;
use takeout_dedup::core::pipeline::{Analysis, Pipeline};
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(DateTime::from_date_and_time(2022, 5, 20, 8, 0, 0).unwrap());

    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

fn analyze(input: &Path, dest: &Path, cache_path: &Path) -> Analysis {
    Pipeline::builder()
        .archives(input)
        .destination(dest)
        .strategy(Strategy::Full)
        .cache(Box::new(SqliteCache::open(cache_path).unwrap()))
        .build()
        .analyze()
        .unwrap()
}

#[test]
fn unchanged_entries_are_served_from_disk_cache() {
    let temp = assert_fs::TempDir::new().unwrap();
    let input = temp.child("input");
    input.create_dir_all().unwrap();
    write_zip(
        input.child("takeout-001.zip").path(),
        &[("Photos/a.jpg", b"alpha"), ("Photos/b.jpg", b"bravo")],
    );
    let dest = temp.child("dest");
    let cache_path = temp.child("cache.db");

    let first = analyze(input.path(), dest.path(), cache_path.path());
    assert_eq!(first.cache_hits, 0);

    let second = analyze(input.path(), dest.path(), cache_path.path());
    assert_eq!(second.cache_hits, 2);
    assert_eq!(second.summary().to_extract, first.summary().to_extract);
}

#[test]
fn changed_entry_is_fingerprinted_again() {
    let temp = assert_fs::TempDir::new().unwrap();
    let input = temp.child("input");
    input.create_dir_all().unwrap();
    let archive = input.child("takeout-001.zip");
    write_zip(
        archive.path(),
        &[("Photos/a.jpg", b"alpha"), ("Photos/b.jpg", b"bravo")],
    );
    let dest = temp.child("dest");
    let cache_path = temp.child("cache.db");
    analyze(input.path(), dest.path(), cache_path.path());

    write_zip(
        archive.path(),
        &[("Photos/a.jpg", b"alpha"), ("Photos/b.jpg", b"bravo, edited")],
    );
    let analysis = analyze(input.path(), dest.path(), cache_path.path());

    assert_eq!(analysis.cache_hits, 1);
    assert_eq!(analysis.summary().to_extract, 2);
}

#[test]
fn clearing_the_cache_forgets_everything() {
    let temp = assert_fs::TempDir::new().unwrap();
    let input = temp.child("input");
    input.create_dir_all().unwrap();
    write_zip(input.child("takeout-001.zip").path(), &[("Photos/a.jpg", b"alpha")]);
    let dest = temp.child("dest");
    let cache_path = temp.child("cache.db");
    analyze(input.path(), dest.path(), cache_path.path());

    let cache = SqliteCache::open(cache_path.path()).unwrap();
    assert!(cache.stats().unwrap().fingerprints > 0);
    cache.clear().unwrap();
    assert_eq!(cache.stats().unwrap().fingerprints, 0);
    drop(cache);

    let analysis = analyze(input.path(), dest.path(), cache_path.path());
    assert_eq!(analysis.cache_hits, 0);
}

#[test]
fn damaged_cache_file_is_rebuilt() {
    let temp = assert_fs::TempDir::new().unwrap();
    let cache_path = temp.child("cache.db");
    cache_path.write_binary(b"definitely not sqlite").unwrap();

    let cache = SqliteCache::open_or_rebuild(cache_path.path()).unwrap();

    assert_eq!(cache.stats().unwrap().fingerprints, 0);
}
