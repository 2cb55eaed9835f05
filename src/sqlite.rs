// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! SQLite snapshots of the three metadata streams.
//!
//! Each database is populated inside one transaction while the worker pool runs,
//! and carries a `db_info` table recording the schema version and (written in a
//! second pass, after the XML streams have been finalized and measured) the
//! checksum of the companion XML file.

use std::path::Path;

use indexmap::IndexMap;
use rusqlite::{params, Connection};

use crate::metadata::{FileType, MetadataError, Package};

/// Schema version expected by dnf/yum.
pub const DB_VERSION: u32 = 10;

const DB_PRAGMAS: &str = "PRAGMA synchronous = OFF; PRAGMA journal_mode = MEMORY;";

const PRIMARY_DB_SCHEMA: &str = "\
    CREATE TABLE db_info (dbversion INTEGER, checksum TEXT);
    CREATE TABLE packages (
        pkgKey INTEGER PRIMARY KEY,
        pkgId TEXT,
        name TEXT,
        arch TEXT,
        version TEXT,
        epoch TEXT,
        release TEXT,
        summary TEXT,
        description TEXT,
        url TEXT,
        time_file INTEGER,
        time_build INTEGER,
        rpm_license TEXT,
        rpm_vendor TEXT,
        rpm_group TEXT,
        rpm_buildhost TEXT,
        rpm_sourcerpm TEXT,
        rpm_header_start INTEGER,
        rpm_header_end INTEGER,
        rpm_packager TEXT,
        size_package INTEGER,
        size_installed INTEGER,
        size_archive INTEGER,
        location_href TEXT,
        location_base TEXT,
        checksum_type TEXT);
    CREATE TABLE files (name TEXT, type TEXT, pkgKey INTEGER);
    CREATE TABLE requires (
        name TEXT, flags TEXT, epoch TEXT, version TEXT, release TEXT,
        pkgKey INTEGER, pre BOOLEAN DEFAULT FALSE);
    CREATE TABLE provides (
        name TEXT, flags TEXT, epoch TEXT, version TEXT, release TEXT, pkgKey INTEGER);
    CREATE TABLE conflicts (
        name TEXT, flags TEXT, epoch TEXT, version TEXT, release TEXT, pkgKey INTEGER);
    CREATE TABLE obsoletes (
        name TEXT, flags TEXT, epoch TEXT, version TEXT, release TEXT, pkgKey INTEGER);";

const PRIMARY_DB_INDEXES: &str = "\
    CREATE INDEX packagename ON packages (name);
    CREATE INDEX packageId ON packages (pkgId);
    CREATE INDEX filenames ON files (name);
    CREATE INDEX pkgfiles ON files (pkgKey);
    CREATE INDEX pkgrequires ON requires (pkgKey);
    CREATE INDEX requiresname ON requires (name);
    CREATE INDEX pkgprovides ON provides (pkgKey);
    CREATE INDEX providesname ON provides (name);
    CREATE INDEX pkgconflicts ON conflicts (pkgKey);
    CREATE INDEX pkgobsoletes ON obsoletes (pkgKey);";

const FILELISTS_DB_SCHEMA: &str = "\
    CREATE TABLE db_info (dbversion INTEGER, checksum TEXT);
    CREATE TABLE packages (pkgKey INTEGER PRIMARY KEY, pkgId TEXT);
    CREATE TABLE filelist (pkgKey INTEGER, dirname TEXT, filenames TEXT, filetypes TEXT);";

const FILELISTS_DB_INDEXES: &str = "\
    CREATE INDEX keyfile ON filelist (pkgKey);
    CREATE INDEX pkgId ON packages (pkgId);
    CREATE INDEX dirnames ON filelist (dirname);";

const OTHER_DB_SCHEMA: &str = "\
    CREATE TABLE db_info (dbversion INTEGER, checksum TEXT);
    CREATE TABLE packages (pkgKey INTEGER PRIMARY KEY, pkgId TEXT);
    CREATE TABLE changelog (pkgKey INTEGER, author TEXT, date INTEGER, changelog TEXT);";

const OTHER_DB_INDEXES: &str = "\
    CREATE INDEX keychange ON changelog (pkgKey);
    CREATE INDEX pkgId ON packages (pkgId);";

fn open_db(path: &Path, schema: &str) -> Result<Connection, MetadataError> {
    let conn = Connection::open(path)?;
    conn.execute_batch(DB_PRAGMAS)?;
    conn.execute_batch(schema)?;
    conn.execute_batch("BEGIN;")?;
    Ok(conn)
}

fn finish_db(conn: Connection, indexes: &str) -> Result<(), MetadataError> {
    conn.execute_batch("COMMIT;")?;
    conn.execute_batch(indexes)?;
    Ok(())
}

pub struct PrimaryDb {
    conn: Connection,
}

impl PrimaryDb {
    pub fn new(path: &Path) -> Result<Self, MetadataError> {
        Ok(Self {
            conn: open_db(path, PRIMARY_DB_SCHEMA)?,
        })
    }

    pub fn add_package(&mut self, package: &Package) -> Result<(), MetadataError> {
        let (checksum_type, pkgid) = package.checksum.to_values()?;
        self.conn
            .prepare_cached(
                "INSERT INTO packages (
                    pkgId, name, arch, version, epoch, release, summary, description, url,
                    time_file, time_build, rpm_license, rpm_vendor, rpm_group, rpm_buildhost,
                    rpm_sourcerpm, rpm_header_start, rpm_header_end, rpm_packager,
                    size_package, size_installed, size_archive,
                    location_href, location_base, checksum_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
            )?
            .execute(params![
                pkgid,
                package.name,
                package.arch,
                package.evr.version,
                package.evr.epoch,
                package.evr.release,
                package.summary,
                package.description,
                package.url,
                package.time_file,
                package.time_build,
                package.rpm_license,
                package.rpm_vendor,
                package.rpm_group,
                package.rpm_buildhost,
                package.rpm_sourcerpm,
                package.rpm_header_range.start,
                package.rpm_header_range.end,
                package.packager,
                package.size_package,
                package.size_installed,
                package.size_archive,
                package.location_href,
                package.location_base,
                checksum_type,
            ])?;
        let pkg_key = self.conn.last_insert_rowid();

        {
            let mut stmt = self
                .conn
                .prepare_cached("INSERT INTO files (name, type, pkgKey) VALUES (?1, ?2, ?3)")?;
            for file in &package.rpm_files {
                let filetype = match file.filetype {
                    FileType::File => "file",
                    FileType::Dir => "dir",
                    FileType::Ghost => "ghost",
                };
                stmt.execute(params![file.path, filetype, pkg_key])?;
            }
        }

        {
            let mut stmt = self.conn.prepare_cached(
                "INSERT INTO requires (name, flags, epoch, version, release, pkgKey, pre)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for entry in &package.rpm_requires {
                stmt.execute(params![
                    entry.name,
                    entry.flags,
                    entry.epoch,
                    entry.version,
                    entry.release,
                    pkg_key,
                    entry.preinstall,
                ])?;
            }
        }

        for (table, entries) in [
            ("provides", &package.rpm_provides),
            ("conflicts", &package.rpm_conflicts),
            ("obsoletes", &package.rpm_obsoletes),
        ] {
            let mut stmt = self.conn.prepare_cached(&format!(
                "INSERT INTO {} (name, flags, epoch, version, release, pkgKey)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                table
            ))?;
            for entry in entries {
                stmt.execute(params![
                    entry.name,
                    entry.flags,
                    entry.epoch,
                    entry.version,
                    entry.release,
                    pkg_key,
                ])?;
            }
        }

        Ok(())
    }

    pub fn finish(self) -> Result<(), MetadataError> {
        finish_db(self.conn, PRIMARY_DB_INDEXES)
    }
}

pub struct FilelistsDb {
    conn: Connection,
}

impl FilelistsDb {
    pub fn new(path: &Path) -> Result<Self, MetadataError> {
        Ok(Self {
            conn: open_db(path, FILELISTS_DB_SCHEMA)?,
        })
    }

    pub fn add_package(&mut self, package: &Package) -> Result<(), MetadataError> {
        let (_, pkgid) = package.checksum.to_values()?;
        self.conn
            .prepare_cached("INSERT INTO packages (pkgId) VALUES (?1)")?
            .execute(params![pkgid])?;
        let pkg_key = self.conn.last_insert_rowid();

        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO filelist (pkgKey, dirname, filenames, filetypes)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (dirname, filenames, filetypes) in encode_filelist(package) {
            stmt.execute(params![pkg_key, dirname, filenames, filetypes])?;
        }

        Ok(())
    }

    pub fn finish(self) -> Result<(), MetadataError> {
        finish_db(self.conn, FILELISTS_DB_INDEXES)
    }
}

pub struct OtherDb {
    conn: Connection,
}

impl OtherDb {
    pub fn new(path: &Path) -> Result<Self, MetadataError> {
        Ok(Self {
            conn: open_db(path, OTHER_DB_SCHEMA)?,
        })
    }

    pub fn add_package(&mut self, package: &Package) -> Result<(), MetadataError> {
        let (_, pkgid) = package.checksum.to_values()?;
        self.conn
            .prepare_cached("INSERT INTO packages (pkgId) VALUES (?1)")?
            .execute(params![pkgid])?;
        let pkg_key = self.conn.last_insert_rowid();

        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO changelog (pkgKey, author, date, changelog) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for changelog in &package.rpm_changelogs {
            stmt.execute(params![
                pkg_key,
                changelog.author,
                changelog.timestamp,
                changelog.description,
            ])?;
        }

        Ok(())
    }

    pub fn finish(self) -> Result<(), MetadataError> {
        finish_db(self.conn, OTHER_DB_INDEXES)
    }
}

/// Collapse a package's file list into per-directory rows.
///
/// Filenames within a directory are joined with `/`, and the parallel
/// `filetypes` string holds one of `f`/`d`/`g` per filename.
fn encode_filelist(package: &Package) -> Vec<(String, String, String)> {
    let mut dirs: IndexMap<&str, (String, String)> = IndexMap::new();

    for file in &package.rpm_files {
        let (dirname, filename) = match file.path.rsplit_once('/') {
            Some(("", filename)) => ("/", filename),
            Some((dirname, filename)) => (dirname, filename),
            None => ("", file.path.as_str()),
        };
        let (filenames, filetypes) = dirs.entry(dirname).or_default();
        if !filenames.is_empty() {
            filenames.push('/');
        }
        filenames.push_str(filename);
        filetypes.push(match file.filetype {
            FileType::File => 'f',
            FileType::Dir => 'd',
            FileType::Ghost => 'g',
        });
    }

    dirs.into_iter()
        .map(|(dirname, (filenames, filetypes))| (dirname.to_owned(), filenames, filetypes))
        .collect()
}

/// Record the companion XML file's checksum (and the schema version) in `db_info`.
///
/// Must happen before the database is compressed, or consumers will reject the repo.
pub fn update_dbinfo(path: &Path, xml_checksum: &str) -> Result<(), MetadataError> {
    let conn = Connection::open(path)?;
    conn.execute("DELETE FROM db_info", [])?;
    conn.execute(
        "INSERT INTO db_info (dbversion, checksum) VALUES (?1, ?2)",
        params![DB_VERSION, xml_checksum],
    )?;
    Ok(())
}
