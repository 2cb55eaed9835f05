mod common;

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use pretty_assertions::assert_eq;
use tempdir::TempDir;

use common::StubReader;
use rpmindex::{
    utils, Indexer, IndexOptions, MetadataError, RepomdData, RepomdXml,
};

fn touch_with(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    File::create(path).unwrap().write_all(contents).unwrap();
}

fn gunzip_to_string(path: &Path) -> String {
    let mut decoder = GzDecoder::new(File::open(path).unwrap());
    let mut contents = String::new();
    decoder.read_to_string(&mut contents).unwrap();
    contents
}

fn read_repomd(out_dir: &Path) -> RepomdData {
    let reader = utils::xml_reader_from_file(&out_dir.join("repodata/repomd.xml")).unwrap();
    RepomdXml::read_data(reader).unwrap()
}

fn single_worker_options() -> IndexOptions {
    IndexOptions {
        workers: 1,
        ..IndexOptions::default()
    }
}

#[test]
fn test_empty_directory() {
    let dir = TempDir::new("empty").unwrap();
    let root = dir.path();

    let reader = StubReader::new();
    let summary = Indexer::new(&reader, single_worker_options())
        .run(root)
        .unwrap();

    assert_eq!(summary.package_count, 0);
    assert_eq!(summary.packages_written, 0);
    assert_eq!(reader.call_count(), 0);

    let repodata = root.join("repodata");
    assert!(!root.join(".repodata").exists());
    for name in [
        "repomd.xml",
        "primary.xml.gz",
        "filelists.xml.gz",
        "other.xml.gz",
        "primary.sqlite.bz2",
        "filelists.sqlite.bz2",
        "other.sqlite.bz2",
    ] {
        assert!(repodata.join(name).exists(), "{} missing", name);
    }

    let primary = gunzip_to_string(&repodata.join("primary.xml.gz"));
    assert!(primary.contains("packages=\"0\""));
    assert!(primary.ends_with("</metadata>\n"));
    assert_eq!(primary.matches("<package ").count(), 0);

    let filelists = gunzip_to_string(&repodata.join("filelists.xml.gz"));
    assert!(filelists.contains("packages=\"0\""));
    assert!(filelists.ends_with("</filelists>\n"));

    let repomd = read_repomd(root);
    let record_names: Vec<&str> = repomd
        .records()
        .iter()
        .map(|r| r.metadata_name.as_str())
        .collect();
    assert_eq!(
        record_names,
        vec![
            "primary",
            "filelists",
            "other",
            "primary_db",
            "filelists_db",
            "other_db"
        ]
    );
}

#[test]
fn test_single_package() {
    let dir = TempDir::new("single").unwrap();
    let root = dir.path();
    touch_with(&root.join("pkgs/a-1.0.rpm"), b"not really an rpm");

    let reader = StubReader::new();
    let summary = Indexer::new(&reader, single_worker_options())
        .run(root)
        .unwrap();

    assert_eq!(summary.package_count, 1);
    assert_eq!(summary.packages_written, 1);
    assert_eq!(reader.call_count(), 1);

    let primary = gunzip_to_string(&root.join("repodata/primary.xml.gz"));
    assert!(primary.contains("packages=\"1\""));
    assert_eq!(primary.matches("<package ").count(), 1);
    assert!(primary.contains("<location href=\"pkgs/a-1.0.rpm\"/>"));
    assert!(primary.contains("<name>a-1.0</name>"));

    let other = gunzip_to_string(&root.join("repodata/other.xml.gz"));
    assert!(other.contains("author=\"Bojack Horseman\""));
}

/// The database embeds the published XML file's checksum before compression.
#[test]
fn test_database_checksum_pass() -> Result<(), MetadataError> {
    let dir = TempDir::new("dbpass").unwrap();
    let root = dir.path();
    touch_with(&root.join("a-1.0.rpm"), b"contents a");

    let reader = StubReader::new();
    Indexer::new(&reader, single_worker_options()).run(root)?;

    let repomd = read_repomd(root);
    let primary_record = repomd.get_record("primary").unwrap();
    let (_, primary_checksum) = primary_record.checksum.to_values()?;

    let primary_db_record = repomd.get_record("primary_db").unwrap();
    assert_eq!(primary_db_record.database_version, Some(10));
    assert!(primary_db_record.open_checksum.is_some());

    // decompress the database and inspect db_info
    let db_path = root.join("repodata/primary.sqlite.bz2");
    assert!(db_path.exists());
    let (mut db_reader, format) = niffler::from_path(&db_path)?;
    assert_ne!(format, niffler::Format::No);
    let mut db_bytes = Vec::new();
    db_reader.read_to_end(&mut db_bytes)?;
    let plain_db_path = dir.path().join("primary.sqlite");
    fs::write(&plain_db_path, db_bytes)?;

    let conn = rusqlite::Connection::open(&plain_db_path)?;
    let (dbversion, checksum): (u32, String) =
        conn.query_row("SELECT dbversion, checksum FROM db_info", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
    assert_eq!(dbversion, 10);
    assert_eq!(checksum, primary_checksum);

    let location: String = conn.query_row(
        "SELECT location_href FROM packages WHERE name = 'a-1.0'",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(location, "a-1.0.rpm");
    Ok(())
}

#[test]
fn test_exclusion() {
    let dir = TempDir::new("exclusion").unwrap();
    let root = dir.path();
    touch_with(&root.join("app-1.0.rpm"), b"app");
    touch_with(&root.join("app-debuginfo-1.0.rpm"), b"debuginfo");

    let mut options = single_worker_options();
    options.excludes = vec!["*-debuginfo-*.rpm".to_owned()];

    let reader = StubReader::new();
    let summary = Indexer::new(&reader, options).run(root).unwrap();

    assert_eq!(summary.package_count, 1);

    for name in ["primary.xml.gz", "filelists.xml.gz", "other.xml.gz"] {
        let contents = gunzip_to_string(&root.join("repodata").join(name));
        assert!(!contents.contains("debuginfo"), "{} mentions debuginfo", name);
    }
}

#[test]
fn test_staging_collision() {
    let dir = TempDir::new("collision").unwrap();
    let root = dir.path();
    touch_with(&root.join("a-1.0.rpm"), b"a");
    fs::create_dir(root.join(".repodata")).unwrap();

    let reader = StubReader::new();
    let err = Indexer::new(&reader, single_worker_options())
        .run(root)
        .unwrap_err();

    assert!(matches!(err, MetadataError::StagingCollisionError(_)));
    assert!(!root.join("repodata").exists());
    assert_eq!(reader.call_count(), 0);
}

#[test]
fn test_update_reuses_cached_metadata() {
    let dir = TempDir::new("update").unwrap();
    let root = dir.path();
    touch_with(&root.join("pkgs/a-1.0.rpm"), b"package a");
    touch_with(&root.join("pkgs/b-2.0.rpm"), b"package b");

    let first_reader = StubReader::new();
    let summary = Indexer::new(&first_reader, single_worker_options())
        .run(root)
        .unwrap();
    assert_eq!(summary.packages_written, 2);
    assert_eq!(first_reader.call_count(), 2);

    let read_streams = || {
        [
            fs::read(root.join("repodata/primary.xml.gz")).unwrap(),
            fs::read(root.join("repodata/filelists.xml.gz")).unwrap(),
            fs::read(root.join("repodata/other.xml.gz")).unwrap(),
        ]
    };
    let first_streams = read_streams();

    let mut options = single_worker_options();
    options.update = true;
    let second_reader = StubReader::new();
    let summary = Indexer::new(&second_reader, options).run(root).unwrap();

    assert_eq!(summary.packages_written, 2);
    // every package was served from the cache
    assert_eq!(second_reader.call_count(), 0);

    // single-worker runs are byte-identical
    assert_eq!(first_streams, read_streams());
    assert!(!root.join(".repodata").exists());
}

#[test]
fn test_update_reparses_modified_package() {
    let dir = TempDir::new("update").unwrap();
    let root = dir.path();
    touch_with(&root.join("a-1.0.rpm"), b"version one");

    let first_reader = StubReader::new();
    Indexer::new(&first_reader, single_worker_options())
        .run(root)
        .unwrap();

    // a size change invalidates the cache entry
    touch_with(&root.join("a-1.0.rpm"), b"version two, now longer");

    let mut options = single_worker_options();
    options.update = true;
    let second_reader = StubReader::new();
    Indexer::new(&second_reader, options).run(root).unwrap();

    assert_eq!(second_reader.call_count(), 1);
}

#[test]
fn test_no_database() {
    let dir = TempDir::new("nodb").unwrap();
    let root = dir.path();
    touch_with(&root.join("a-1.0.rpm"), b"a");

    let mut options = single_worker_options();
    options.no_database = true;

    let reader = StubReader::new();
    Indexer::new(&reader, options).run(root).unwrap();

    let repodata = root.join("repodata");
    assert!(!repodata.join("primary.sqlite.bz2").exists());

    let repomd = read_repomd(root);
    assert_eq!(repomd.records().len(), 3);
    assert!(repomd.get_record("primary_db").is_none());
}

#[test]
fn test_groupfile() {
    let dir = TempDir::new("groupfile").unwrap();
    let root = dir.path().join("repo");
    fs::create_dir(&root).unwrap();
    touch_with(&root.join("a-1.0.rpm"), b"a");

    let groupfile = dir.path().join("comps.xml");
    touch_with(&groupfile, b"<comps></comps>\n");

    let mut options = single_worker_options();
    options.groupfile = Some(groupfile);

    let reader = StubReader::new();
    Indexer::new(&reader, options).run(&root).unwrap();

    let repodata = root.join("repodata");
    assert!(repodata.join("comps.xml").exists());
    assert!(repodata.join("comps.xml.gz").exists());

    let repomd = read_repomd(&root);
    let group = repomd.get_record("group").unwrap();
    assert_eq!(group.location_href.to_str().unwrap(), "repodata/comps.xml");
    assert!(group.open_checksum.is_none());

    let group_gz = repomd.get_record("group_gz").unwrap();
    assert_eq!(
        group_gz.location_href.to_str().unwrap(),
        "repodata/comps.xml.gz"
    );
    assert!(group_gz.open_checksum.is_some());
}

#[test]
fn test_unique_md_filenames() {
    let dir = TempDir::new("unique").unwrap();
    let root = dir.path();
    touch_with(&root.join("a-1.0.rpm"), b"a");

    let mut options = single_worker_options();
    options.unique_md_filenames = true;

    let reader = StubReader::new();
    Indexer::new(&reader, options).run(root).unwrap();

    let repomd = read_repomd(root);
    assert_eq!(repomd.records().len(), 6);
    for record in repomd.records() {
        let href = record.location_href.to_str().unwrap();
        let filename = href.rsplit('/').next().unwrap();
        let (_, checksum_value) = record.checksum.to_values().unwrap();
        assert!(
            filename.starts_with(&format!("{}-", checksum_value)),
            "{} lacks checksum prefix",
            filename
        );
        assert!(root.join(href).exists(), "{} missing on disk", href);
    }
}

#[test]
fn test_outputdir() {
    let dir = TempDir::new("outputdir").unwrap();
    let root = dir.path().join("input");
    let out = dir.path().join("out");
    fs::create_dir_all(&root).unwrap();
    fs::create_dir_all(&out).unwrap();
    touch_with(&root.join("a-1.0.rpm"), b"a");

    let mut options = single_worker_options();
    options.outputdir = Some(out.clone());

    let reader = StubReader::new();
    Indexer::new(&reader, options).run(&root).unwrap();

    assert!(out.join("repodata/repomd.xml").exists());
    assert!(!root.join("repodata").exists());

    let primary = gunzip_to_string(&out.join("repodata/primary.xml.gz"));
    // locations stay relative to the input root
    assert!(primary.contains("<location href=\"a-1.0.rpm\"/>"));
}

#[test]
fn test_baseurl() {
    let dir = TempDir::new("baseurl").unwrap();
    let root = dir.path();
    touch_with(&root.join("a-1.0.rpm"), b"a");

    let mut options = single_worker_options();
    options.location_base = Some("http://example.com/repo".to_owned());

    let reader = StubReader::new();
    Indexer::new(&reader, options).run(root).unwrap();

    let primary = gunzip_to_string(&root.join("repodata/primary.xml.gz"));
    assert!(primary
        .contains("<location xml:base=\"http://example.com/repo\" href=\"a-1.0.rpm\"/>"));
}

/// A package that fails to parse is logged and dropped; the headers written
/// before the pool started keep the original count.
#[test]
fn test_parse_failure_drops_package() {
    let dir = TempDir::new("parsefail").unwrap();
    let root = dir.path();
    touch_with(&root.join("good-1.0.rpm"), b"good");
    touch_with(&root.join("unparseable-1.0.rpm"), b"bad");

    let reader = StubReader::new();
    let summary = Indexer::new(&reader, single_worker_options())
        .run(root)
        .unwrap();

    assert_eq!(summary.package_count, 2);
    assert_eq!(summary.packages_written, 1);

    let primary = gunzip_to_string(&root.join("repodata/primary.xml.gz"));
    assert!(primary.contains("packages=\"2\""));
    assert_eq!(primary.matches("<package ").count(), 1);
    assert!(!root.join(".repodata").exists());
}

#[test]
fn test_parallel_run_writes_all_packages() {
    let dir = TempDir::new("parallel").unwrap();
    let root = dir.path();
    for i in 0..24 {
        touch_with(
            &root.join(format!("pkg-{}-1.0.rpm", i)),
            format!("package number {}", i).as_bytes(),
        );
    }

    let mut options = IndexOptions::default();
    options.workers = 4;

    let reader = StubReader::new();
    let summary = Indexer::new(&reader, options).run(root).unwrap();

    assert_eq!(summary.package_count, 24);
    assert_eq!(summary.packages_written, 24);

    let primary = gunzip_to_string(&root.join("repodata/primary.xml.gz"));
    assert_eq!(primary.matches("<package ").count(), 24);
    for i in 0..24 {
        assert!(primary.contains(&format!("<name>pkg-{}-1.0</name>", i)));
    }

    let filelists = gunzip_to_string(&root.join("repodata/filelists.xml.gz"));
    assert_eq!(filelists.matches("<package ").count(), 24);
}
