// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The indexing pipeline.
//!
//! One invocation walks a directory tree of packages, fans the package files out
//! to a worker pool, writes three synchronized XML streams plus three database
//! snapshots into a staging directory, atomically publishes the staging
//! directory as `repodata/`, and finishes with the repomd manifest pass.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::os::unix::prelude::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use flate2::write::GzEncoder;
use flate2::Compression;
use glob::Pattern;
use log::{debug, error, info, warn};
use quick_xml::Writer;
use rayon::prelude::*;

use crate::metadata::{
    ChecksumType, CompressionType, MetadataError, Package, RepomdData, RepomdRecord, RepomdXml,
    XmlFragments, METADATA_FILELISTS, METADATA_FILELISTS_DB, METADATA_GROUP, METADATA_GROUP_GZ,
    METADATA_OTHER, METADATA_OTHER_DB, METADATA_PRIMARY, METADATA_PRIMARY_DB,
};
use crate::package::PackageReader;
use crate::sqlite::{self, FilelistsDb, OtherDb, PrimaryDb};
use crate::walk::PoolTask;
use crate::{cache::MetadataCache, filelist, other, primary, publish, utils, walk};

/// Configuration for one indexing run.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub workers: usize,
    pub checksum_type: ChecksumType,
    pub changelog_limit: Option<usize>,
    pub location_base: Option<String>,
    pub skip_symlinks: bool,
    pub skip_stat: bool,
    pub update: bool,
    pub update_md_paths: Vec<PathBuf>,
    pub no_database: bool,
    pub unique_md_filenames: bool,
    pub database_compression: CompressionType,
    pub groupfile_compression: CompressionType,
    pub outputdir: Option<PathBuf>,
    pub groupfile: Option<PathBuf>,
    pub pkglist: Option<Vec<String>>,
    pub excludes: Vec<String>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            checksum_type: ChecksumType::default(),
            changelog_limit: Some(10),
            location_base: None,
            skip_symlinks: false,
            skip_stat: false,
            update: false,
            update_md_paths: Vec::new(),
            no_database: false,
            unique_md_filenames: false,
            database_compression: CompressionType::Bz2,
            groupfile_compression: CompressionType::Gzip,
            outputdir: None,
            groupfile: None,
            pkglist: None,
            excludes: Vec::new(),
        }
    }
}

/// Totals reported by a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    /// Packages discovered, as declared in the stream headers.
    pub package_count: usize,
    /// Packages actually written - less than `package_count` if some failed to parse.
    pub packages_written: usize,
}

type XmlSink = GzEncoder<BufWriter<File>>;

struct StreamWriter<Db> {
    xml: XmlSink,
    db: Option<Db>,
}

impl<Db> StreamWriter<Db> {
    fn append_fragment(&mut self, fragment: &[u8]) -> Result<(), MetadataError> {
        self.xml.write_all(fragment)?;
        self.xml.write_all(b"\n")?;
        Ok(())
    }
}

/// The only mutable state shared by the worker pool: the three output streams,
/// each pairing a compressed XML sink with its optional database inserter under
/// one mutex. A worker holds at most one of the three locks at a time, so two
/// workers can commit different streams in parallel.
struct WriterSet {
    primary: Mutex<StreamWriter<PrimaryDb>>,
    filelists: Mutex<StreamWriter<FilelistsDb>>,
    other: Mutex<StreamWriter<OtherDb>>,
    packages_written: AtomicUsize,
}

fn xml_sink(staging: &Path, name: &str) -> Result<XmlSink, MetadataError> {
    let file = BufWriter::new(File::create(staging.join(name))?);
    Ok(GzEncoder::new(file, Compression::new(9)))
}

impl WriterSet {
    fn open(staging: &Path, no_database: bool) -> Result<Self, MetadataError> {
        debug!("Creating .xml.gz files");
        let primary_xml = xml_sink(staging, "primary.xml.gz")?;
        let filelists_xml = xml_sink(staging, "filelists.xml.gz")?;
        let other_xml = xml_sink(staging, "other.xml.gz")?;

        let (primary_db, filelists_db, other_db) = if no_database {
            (None, None, None)
        } else {
            debug!("Creating .sqlite files");
            (
                Some(PrimaryDb::new(&staging.join("primary.sqlite"))?),
                Some(FilelistsDb::new(&staging.join("filelists.sqlite"))?),
                Some(OtherDb::new(&staging.join("other.sqlite"))?),
            )
        };

        Ok(Self {
            primary: Mutex::new(StreamWriter {
                xml: primary_xml,
                db: primary_db,
            }),
            filelists: Mutex::new(StreamWriter {
                xml: filelists_xml,
                db: filelists_db,
            }),
            other: Mutex::new(StreamWriter {
                xml: other_xml,
                db: other_db,
            }),
            packages_written: AtomicUsize::new(0),
        })
    }

    /// Written by the main thread before the pool starts; the count is not
    /// revised afterwards even if packages fail to parse.
    fn write_headers(&self, package_count: usize) -> Result<(), MetadataError> {
        debug!("Writing xml headers");
        primary::write_header(&mut self.primary.lock().unwrap().xml, package_count)?;
        filelist::write_header(&mut self.filelists.lock().unwrap().xml, package_count)?;
        other::write_header(&mut self.other.lock().unwrap().xml, package_count)?;
        Ok(())
    }

    /// Commit one package to all three streams.
    ///
    /// Acquires one stream lock at a time, appending the XML fragment and
    /// inserting the database rows while it is held.
    fn write_package(
        &self,
        package: &Package,
        fragments: &XmlFragments,
    ) -> Result<(), MetadataError> {
        {
            let mut stream = self.primary.lock().unwrap();
            stream.append_fragment(&fragments.primary)?;
            if let Some(db) = stream.db.as_mut() {
                db.add_package(package)?;
            }
        }

        {
            let mut stream = self.filelists.lock().unwrap();
            stream.append_fragment(&fragments.filelists)?;
            if let Some(db) = stream.db.as_mut() {
                db.add_package(package)?;
            }
        }

        {
            let mut stream = self.other.lock().unwrap();
            stream.append_fragment(&fragments.other)?;
            if let Some(db) = stream.db.as_mut() {
                db.add_package(package)?;
            }
        }

        self.packages_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Write the stream footers, flush the compressed sinks and finalize the
    /// databases. Returns the number of packages committed.
    fn finish(self) -> Result<usize, MetadataError> {
        let packages_written = self.packages_written.load(Ordering::Relaxed);

        let primary = self.primary.into_inner().unwrap();
        let filelists = self.filelists.into_inner().unwrap();
        let other = self.other.into_inner().unwrap();

        let mut primary_xml = primary.xml;
        primary::write_footer(&mut primary_xml)?;
        primary_xml.finish()?.flush()?;

        let mut filelists_xml = filelists.xml;
        filelist::write_footer(&mut filelists_xml)?;
        filelists_xml.finish()?.flush()?;

        let mut other_xml = other.xml;
        other::write_footer(&mut other_xml)?;
        other_xml.finish()?.flush()?;

        if let Some(db) = primary.db {
            db.finish()?;
        }
        if let Some(db) = filelists.db {
            db.finish()?;
        }
        if let Some(db) = other.db {
            db.finish()?;
        }

        Ok(packages_written)
    }
}

/// Drives a full indexing run. The package parser is injected so callers can
/// substitute their own implementation.
pub struct Indexer<'a> {
    reader: &'a dyn PackageReader,
    options: IndexOptions,
}

impl<'a> Indexer<'a> {
    pub fn new(reader: &'a dyn PackageReader, options: IndexOptions) -> Self {
        Self { reader, options }
    }

    /// Index `input_dir` and publish the new `repodata/` snapshot.
    ///
    /// On failure after the staging directory was created, the staging
    /// directory is left behind for inspection; SIGINT removes it.
    pub fn run(&self, input_dir: &Path) -> Result<IndexSummary, MetadataError> {
        let options = &self.options;

        if !input_dir.is_dir() {
            return Err(MetadataError::MissingInputDirError(input_dir.to_owned()));
        }

        let excludes = options
            .excludes
            .iter()
            .map(|pattern| Pattern::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        let out_dir = options
            .outputdir
            .clone()
            .unwrap_or_else(|| input_dir.to_owned());
        let final_repodata = out_dir.join("repodata");
        let staging = out_dir.join(".repodata");

        publish::create_staging_dir(&staging)?;
        publish::arm_signal_handler(&staging);
        info!("Temporary output repo path: {}", staging.display());

        let groupfile_name = match &options.groupfile {
            Some(groupfile) => {
                let name = groupfile
                    .file_name()
                    .ok_or(MetadataError::MissingFieldError("groupfile"))?
                    .to_string_lossy()
                    .into_owned();
                let target = staging.join(&name);
                debug!(
                    "Copy groupfile {} -> {}",
                    groupfile.display(),
                    target.display()
                );
                utils::copy_file(groupfile, &target)?;
                Some(name)
            }
            None => None,
        };

        let cache = if options.update {
            Some(self.load_cache(input_dir, &out_dir))
        } else {
            None
        };

        info!("Directory walk started");
        let tasks = walk::discover_packages(
            input_dir,
            options.pkglist.as_deref(),
            &excludes,
            options.skip_symlinks,
        )?;
        let package_count = tasks.len();
        debug!("Package count: {}", package_count);
        info!("Directory walk done");

        let writers = WriterSet::open(&staging, options.no_database)?;
        writers.write_headers(package_count)?;

        info!("Pool started (with {} workers)", options.workers);
        let process = |task: PoolTask| -> Result<(), MetadataError> {
            self.process_task(task, cache.as_ref(), &writers)
        };
        if options.workers <= 1 {
            tasks.into_iter().try_for_each(process)?;
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.workers)
                .build()?;
            pool.install(|| tasks.into_par_iter().try_for_each(process))?;
        }
        info!("Pool finished");

        let packages_written = writers.finish()?;

        publish::swap_into_place(&final_repodata, &staging)?;

        self.assemble_repomd(&out_dir, groupfile_name.as_deref())?;

        publish::disarm_signal_handler();
        debug!("All done");

        Ok(IndexSummary {
            package_count,
            packages_written,
        })
    }

    /// Build the old-metadata index: the output directory's repodata (when an
    /// output directory was given), then the input directory's, then each
    /// additional update path. The first source to bind a filename wins.
    fn load_cache(&self, input_dir: &Path, out_dir: &Path) -> MetadataCache {
        let mut cache = MetadataCache::new();

        if self.options.outputdir.is_some() {
            match cache.load_from_directory(out_dir) {
                Ok(_) => debug!("Old metadata from: {} - loaded", out_dir.display()),
                Err(err) => debug!(
                    "Old metadata from {} - loading failed: {}",
                    out_dir.display(),
                    err
                ),
            }
        }

        match cache.load_from_directory(input_dir) {
            Ok(_) => debug!("Old metadata from: {} - loaded", input_dir.display()),
            Err(err) => debug!(
                "Old metadata from {} - loading failed: {}",
                input_dir.display(),
                err
            ),
        }

        for path in &self.options.update_md_paths {
            info!("Loading metadata from: {}", path.display());
            if let Err(err) = cache.load_from_directory(path) {
                warn!(
                    "Old metadata from md-path {} - loading failed: {}",
                    path.display(),
                    err
                );
            }
        }

        info!("Loaded information about {} packages", cache.len());
        cache
    }

    /// The per-package pipeline: decide cache reuse, parse, render, commit.
    ///
    /// A failure confined to this one package (stat or parse) is logged and the
    /// package is dropped from the output; only writer faults propagate.
    fn process_task(
        &self,
        task: PoolTask,
        cache: Option<&MetadataCache>,
        writers: &WriterSet,
    ) -> Result<(), MetadataError> {
        let options = &self.options;

        let mut stat_result = None;
        if cache.is_some() && !options.skip_stat {
            match fs::metadata(&task.full_path) {
                Ok(metadata) => stat_result = Some(metadata),
                Err(err) => {
                    error!("Stat() on {}: {}", task.full_path.display(), err);
                    return Ok(());
                }
            }
        }

        let mut package: Option<Package> = None;
        if let Some(cache) = cache {
            if let Some(cached) = cache.get(&task.filename) {
                let usable = options.skip_stat
                    || stat_result.as_ref().is_some_and(|metadata| {
                        metadata.mtime() == cached.time_file as i64
                            && metadata.size() == cached.size_package
                            && cached.checksum.checksum_type() == Some(options.checksum_type)
                    });

                if usable {
                    debug!("CACHE HIT {}", task.filename);
                    // reused entries only ever have their locations rewritten
                    let mut pkg = cached.clone();
                    pkg.set_location_href(&task.relative_path);
                    pkg.set_location_base(options.location_base.clone());
                    package = Some(pkg);
                } else {
                    debug!(
                        "{} metadata are obsolete -> generating new",
                        task.filename
                    );
                }
            }
        }

        let package = match package {
            Some(package) => package,
            None => {
                match self.reader.read_package(
                    &task.full_path,
                    options.checksum_type,
                    options.changelog_limit,
                ) {
                    Ok(mut package) => {
                        package.set_location_href(&task.relative_path);
                        package.set_location_base(options.location_base.clone());
                        package
                    }
                    Err(err) => {
                        warn!("Cannot read package: {}: {}", task.full_path.display(), err);
                        return Ok(());
                    }
                }
            }
        };

        let fragments = XmlFragments::render(&package)?;
        writers.write_package(&package, &fragments)
    }

    /// The repomd pass: measure every artifact in the published `repodata/`,
    /// embed the XML checksums into the databases before compressing them, and
    /// write the manifest.
    fn assemble_repomd(
        &self,
        out_dir: &Path,
        groupfile_name: Option<&str>,
    ) -> Result<(), MetadataError> {
        let options = &self.options;
        debug!("Generating repomd.xml");

        let checksum_type = options.checksum_type;
        let repodata = PathBuf::from("repodata");

        let pri_xml_rec = RepomdRecord::new(
            METADATA_PRIMARY,
            &repodata.join("primary.xml.gz"),
            out_dir,
            checksum_type,
        )?;
        let fil_xml_rec = RepomdRecord::new(
            METADATA_FILELISTS,
            &repodata.join("filelists.xml.gz"),
            out_dir,
            checksum_type,
        )?;
        let oth_xml_rec = RepomdRecord::new(
            METADATA_OTHER,
            &repodata.join("other.xml.gz"),
            out_dir,
            checksum_type,
        )?;

        // records are assigned before any unique-filename rename pass
        let mut records = vec![pri_xml_rec, fil_xml_rec, oth_xml_rec];

        if let Some(name) = groupfile_name {
            let group_path = repodata.join(name);
            let compressed_path =
                utils::compress_file(&out_dir.join(&group_path), options.groupfile_compression)?;
            let compressed_name = compressed_path
                .file_name()
                .ok_or(MetadataError::MissingFieldError("groupfile"))?;

            records.push(RepomdRecord::new(
                METADATA_GROUP,
                &group_path,
                out_dir,
                checksum_type,
            )?);
            records.push(RepomdRecord::new(
                METADATA_GROUP_GZ,
                &repodata.join(compressed_name),
                out_dir,
                checksum_type,
            )?);
        }

        if !options.no_database {
            // second pass: the database embeds its companion XML file's checksum,
            // so it can only be compressed and measured afterwards
            let db_files = [
                (METADATA_PRIMARY_DB, METADATA_PRIMARY, "primary.sqlite"),
                (METADATA_FILELISTS_DB, METADATA_FILELISTS, "filelists.sqlite"),
                (METADATA_OTHER_DB, METADATA_OTHER, "other.sqlite"),
            ];
            for (db_name, xml_name, db_file) in db_files {
                let xml_record = records
                    .iter()
                    .find(|r| r.metadata_name == xml_name)
                    .ok_or(MetadataError::MissingFieldError("xml record"))?;
                let (_, xml_checksum) = xml_record.checksum.to_values()?;

                let db_path = out_dir.join("repodata").join(db_file);
                sqlite::update_dbinfo(&db_path, xml_checksum)?;

                let compressed_path =
                    utils::compress_file(&db_path, options.database_compression)?;
                fs::remove_file(&db_path)?;
                let compressed_name = compressed_path
                    .file_name()
                    .ok_or(MetadataError::MissingFieldError("database"))?;

                let mut record = RepomdRecord::new(
                    db_name,
                    &repodata.join(compressed_name),
                    out_dir,
                    checksum_type,
                )?;
                record.database_version = Some(sqlite::DB_VERSION);
                records.push(record);
            }
        }

        if options.unique_md_filenames {
            for record in records.iter_mut() {
                record.rename_unique()?;
            }
        }

        let mut repomd_data = RepomdData::default();
        for record in records {
            repomd_data.add_record(record);
        }

        let repomd_path = out_dir.join("repodata").join("repomd.xml");
        let file = BufWriter::new(File::create(&repomd_path)?);
        let mut writer = Writer::new_with_indent(file, b' ', 2);
        RepomdXml::write_data(&repomd_data, &mut writer)?;
        writer.into_inner().flush()?;

        Ok(())
    }
}
