// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::os::unix::prelude::MetadataExt;
use std::path::{Path, PathBuf};

use quick_xml::Writer;
use thiserror::Error;

use crate::{filelist, other, primary, utils, EVR};

pub struct RepomdXml;

pub const METADATA_PRIMARY: &str = "primary";
pub const METADATA_FILELISTS: &str = "filelists";
pub const METADATA_OTHER: &str = "other";
pub const METADATA_PRIMARY_DB: &str = "primary_db";
pub const METADATA_FILELISTS_DB: &str = "filelists_db";
pub const METADATA_OTHER_DB: &str = "other_db";
pub const METADATA_GROUP: &str = "group";
pub const METADATA_GROUP_GZ: &str = "group_gz";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error(transparent)]
    RpmReadError(#[from] rpm::Error),
    #[error(transparent)]
    XmlParseError(#[from] quick_xml::Error),
    #[error(transparent)]
    XmlAttrError(#[from] quick_xml::events::attributes::AttrError),
    #[error(transparent)]
    Utf8Error(#[from] std::str::Utf8Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    IntFieldParseError(#[from] std::num::ParseIntError),
    #[error(transparent)]
    UnsupportedCompressionTypeError(#[from] niffler::Error),
    #[error(transparent)]
    DatabaseError(#[from] rusqlite::Error),
    #[error(transparent)]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    PatternError(#[from] glob::PatternError),
    #[error("Checksum type {0} is not supported")]
    UnsupportedChecksumTypeError(String),
    #[error("\"{0}\" is not a valid checksum of type \"{1:?}\"")]
    InvalidChecksumError(String, ChecksumType),
    #[error("Cannot take the value of an empty checksum")]
    EmptyChecksumError,
    #[error("Metadata files are inconsistent: {0}")]
    InconsistentMetadataError(String),
    #[error("Missing metadata field: {0}")]
    MissingFieldError(&'static str),
    #[error("Missing metadata attribute: {0}")]
    MissingAttributeError(&'static str),
    #[error("Missing metadata header")]
    MissingHeaderError,
    #[error("Directory {0:?} must exist")]
    MissingInputDirError(PathBuf),
    #[error("Temporary repodata directory {0:?} already exists (is another process running?)")]
    StagingCollisionError(PathBuf),
}

/// Default namespace for primary.xml
pub const XML_NS_COMMON: &str = "http://linux.duke.edu/metadata/common";
/// Default namespace for filelists.xml
pub const XML_NS_FILELISTS: &str = "http://linux.duke.edu/metadata/filelists";
/// Default namespace for other.xml
pub const XML_NS_OTHER: &str = "http://linux.duke.edu/metadata/other";
/// Default namespace for repomd.xml
pub const XML_NS_REPO: &str = "http://linux.duke.edu/metadata/repo";
/// Namespace for rpm (used in primary.xml and repomd.xml)
pub const XML_NS_RPM: &str = "http://linux.duke.edu/metadata/rpm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Gzip,
    Xz,
    Bz2,
}

impl CompressionType {
    pub fn to_file_extension(&self) -> &str {
        match self {
            CompressionType::None => "",
            CompressionType::Gzip => ".gz",
            CompressionType::Xz => ".xz",
            CompressionType::Bz2 => ".bz2",
        }
    }
}

/// The parsed metadata of a single RPM package.
///
/// Covers all three metadata dimensions - identity and dependency data (primary), the
/// list of files (filelists), changelogs (other). `location_href` and `location_base`
/// are not read from the package itself - the indexer assigns them before rendering.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Package {
    pub name: String,
    pub arch: String,
    pub evr: EVR,
    pub checksum: Checksum,
    pub location_href: String,
    pub location_base: Option<String>,
    pub summary: String,
    pub description: String,
    pub packager: String,
    pub url: String,
    pub time_file: u64,
    pub time_build: u64,
    pub size_package: u64,
    pub size_installed: u64,
    pub size_archive: u64,

    pub rpm_license: String,           // rpm:license
    pub rpm_vendor: String,            // rpm:vendor
    pub rpm_group: String,             // rpm:group
    pub rpm_buildhost: String,         // rpm:buildhost
    pub rpm_sourcerpm: String,         // rpm:sourcerpm
    pub rpm_header_range: HeaderRange, // rpm:header-range

    pub rpm_requires: Vec<Requirement>,    // rpm:requires
    pub rpm_provides: Vec<Requirement>,    // rpm:provides
    pub rpm_conflicts: Vec<Requirement>,   // rpm:conflicts
    pub rpm_obsoletes: Vec<Requirement>,   // rpm:obsoletes
    pub rpm_suggests: Vec<Requirement>,    // rpm:suggests
    pub rpm_enhances: Vec<Requirement>,    // rpm:enhances
    pub rpm_recommends: Vec<Requirement>,  // rpm:recommends
    pub rpm_supplements: Vec<Requirement>, // rpm:supplements

    pub rpm_changelogs: Vec<Changelog>,
    pub rpm_files: Vec<PackageFile>,
}

impl Package {
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_epoch(&mut self, epoch: u32) -> &mut Self {
        self.evr.epoch = epoch.to_string();
        self
    }

    pub fn set_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.evr.version = version.into();
        self
    }

    pub fn set_release(&mut self, release: impl Into<String>) -> &mut Self {
        self.evr.release = release.into();
        self
    }

    pub fn set_arch(&mut self, arch: impl Into<String>) -> &mut Self {
        self.arch = arch.into();
        self
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn evr(&self) -> &EVR {
        &self.evr
    }

    pub fn set_checksum(&mut self, checksum: Checksum) -> &mut Self {
        self.checksum = checksum;
        self
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    pub fn set_location_href(&mut self, location_href: impl Into<String>) -> &mut Self {
        self.location_href = location_href.into();
        self
    }

    pub fn location_href(&self) -> &str {
        &self.location_href
    }

    pub fn set_location_base(&mut self, location_base: Option<impl Into<String>>) -> &mut Self {
        self.location_base = location_base.map(|a| a.into());
        self
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) -> &mut Self {
        self.summary = summary.into();
        self
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = description.into();
        self
    }

    pub fn set_packager(&mut self, packager: impl Into<String>) -> &mut Self {
        self.packager = packager.into();
        self
    }

    pub fn set_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.url = url.into();
        self
    }

    pub fn set_time_file(&mut self, time_file: u64) -> &mut Self {
        self.time_file = time_file;
        self
    }

    pub fn set_time_build(&mut self, time_build: u64) -> &mut Self {
        self.time_build = time_build;
        self
    }

    pub fn set_size_package(&mut self, size_package: u64) -> &mut Self {
        self.size_package = size_package;
        self
    }

    pub fn set_size_installed(&mut self, size_installed: u64) -> &mut Self {
        self.size_installed = size_installed;
        self
    }

    pub fn set_size_archive(&mut self, size_archive: u64) -> &mut Self {
        self.size_archive = size_archive;
        self
    }

    pub fn set_rpm_license(&mut self, license: impl Into<String>) -> &mut Self {
        self.rpm_license = license.into();
        self
    }

    pub fn set_rpm_vendor(&mut self, vendor: impl Into<String>) -> &mut Self {
        self.rpm_vendor = vendor.into();
        self
    }

    pub fn set_rpm_group(&mut self, group: impl Into<String>) -> &mut Self {
        self.rpm_group = group.into();
        self
    }

    pub fn set_rpm_buildhost(&mut self, rpm_buildhost: impl Into<String>) -> &mut Self {
        self.rpm_buildhost = rpm_buildhost.into();
        self
    }

    pub fn set_rpm_sourcerpm(&mut self, rpm_sourcerpm: impl Into<String>) -> &mut Self {
        self.rpm_sourcerpm = rpm_sourcerpm.into();
        self
    }

    pub fn set_rpm_header_range(&mut self, start: u64, end: u64) -> &mut Self {
        self.rpm_header_range = HeaderRange { start, end };
        self
    }

    pub fn set_requires(&mut self, requires: Vec<Requirement>) -> &mut Self {
        self.rpm_requires = requires;
        self
    }

    pub fn set_provides(&mut self, provides: Vec<Requirement>) -> &mut Self {
        self.rpm_provides = provides;
        self
    }

    pub fn set_conflicts(&mut self, conflicts: Vec<Requirement>) -> &mut Self {
        self.rpm_conflicts = conflicts;
        self
    }

    pub fn set_obsoletes(&mut self, obsoletes: Vec<Requirement>) -> &mut Self {
        self.rpm_obsoletes = obsoletes;
        self
    }

    pub fn set_suggests(&mut self, suggests: Vec<Requirement>) -> &mut Self {
        self.rpm_suggests = suggests;
        self
    }

    pub fn set_enhances(&mut self, enhances: Vec<Requirement>) -> &mut Self {
        self.rpm_enhances = enhances;
        self
    }

    pub fn set_recommends(&mut self, recommends: Vec<Requirement>) -> &mut Self {
        self.rpm_recommends = recommends;
        self
    }

    pub fn set_supplements(&mut self, supplements: Vec<Requirement>) -> &mut Self {
        self.rpm_supplements = supplements;
        self
    }

    pub fn set_files(&mut self, files: Vec<PackageFile>) -> &mut Self {
        self.rpm_files = files;
        self
    }

    pub fn files(&self) -> &[PackageFile] {
        &self.rpm_files
    }

    pub fn set_changelogs(&mut self, changelogs: Vec<Changelog>) -> &mut Self {
        self.rpm_changelogs = changelogs;
        self
    }

    pub fn changelogs(&self) -> &[Changelog] {
        &self.rpm_changelogs
    }

    pub fn nevra(&self) -> String {
        format!(
            "{}-{}:{}-{}.{}",
            self.name, self.evr.epoch, self.evr.version, self.evr.release, self.arch
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl Default for ChecksumType {
    fn default() -> Self {
        ChecksumType::Sha256
    }
}

impl ChecksumType {
    pub fn to_name(&self) -> &'static str {
        match self {
            ChecksumType::Md5 => "md5",
            ChecksumType::Sha1 => "sha1",
            ChecksumType::Sha224 => "sha224",
            ChecksumType::Sha256 => "sha256",
            ChecksumType::Sha384 => "sha384",
            ChecksumType::Sha512 => "sha512",
        }
    }
}

impl TryFrom<&str> for ChecksumType {
    type Error = MetadataError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "md5" => Ok(ChecksumType::Md5),
            "sha" | "sha1" => Ok(ChecksumType::Sha1),
            "sha224" => Ok(ChecksumType::Sha224),
            "sha256" => Ok(ChecksumType::Sha256),
            "sha384" => Ok(ChecksumType::Sha384),
            "sha512" => Ok(ChecksumType::Sha512),
            _ => Err(MetadataError::UnsupportedChecksumTypeError(
                value.to_owned(),
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Checksum {
    Md5(String),
    Sha1(String),
    Sha224(String),
    Sha256(String),
    Sha384(String),
    Sha512(String),
    Unknown(String),
    Empty,
}

impl Default for Checksum {
    fn default() -> Self {
        Checksum::Empty
    }
}

impl Checksum {
    pub fn try_create<N: AsRef<[u8]> + Sized>(
        checksum_type: N,
        checksum: N,
    ) -> Result<Self, MetadataError> {
        let digest = std::str::from_utf8(checksum.as_ref())?.to_owned();

        let valid_len = |digest: String,
                         len: usize,
                         chk_type: ChecksumType|
         -> Result<String, MetadataError> {
            if digest.len() != len {
                Err(MetadataError::InvalidChecksumError(digest, chk_type))
            } else {
                Ok(digest)
            }
        };

        let checksum = match checksum_type.as_ref() {
            b"md5" => Checksum::Md5(valid_len(digest, 32, ChecksumType::Md5)?),
            b"sha" | b"sha1" => Checksum::Sha1(valid_len(digest, 40, ChecksumType::Sha1)?),
            b"sha224" => Checksum::Sha224(valid_len(digest, 56, ChecksumType::Sha224)?),
            b"sha256" => Checksum::Sha256(valid_len(digest, 64, ChecksumType::Sha256)?),
            b"sha384" => Checksum::Sha384(valid_len(digest, 96, ChecksumType::Sha384)?),
            b"sha512" => Checksum::Sha512(valid_len(digest, 128, ChecksumType::Sha512)?),
            _ => {
                return Err(MetadataError::UnsupportedChecksumTypeError(
                    std::str::from_utf8(checksum_type.as_ref())?.to_owned(),
                ))
            }
        };
        Ok(checksum)
    }

    pub fn to_values(&self) -> Result<(&str, &str), MetadataError> {
        let values = match self {
            Checksum::Md5(c) => ("md5", c.as_str()),
            Checksum::Sha1(c) => ("sha1", c.as_str()),
            Checksum::Sha224(c) => ("sha224", c.as_str()),
            Checksum::Sha256(c) => ("sha256", c.as_str()),
            Checksum::Sha384(c) => ("sha384", c.as_str()),
            Checksum::Sha512(c) => ("sha512", c.as_str()),
            Checksum::Unknown(c) => ("unknown", c.as_str()),
            Checksum::Empty => return Err(MetadataError::EmptyChecksumError),
        };
        Ok(values)
    }

    /// The algorithm half of the checksum, where it is known.
    pub fn checksum_type(&self) -> Option<ChecksumType> {
        match self {
            Checksum::Md5(_) => Some(ChecksumType::Md5),
            Checksum::Sha1(_) => Some(ChecksumType::Sha1),
            Checksum::Sha224(_) => Some(ChecksumType::Sha224),
            Checksum::Sha256(_) => Some(ChecksumType::Sha256),
            Checksum::Sha384(_) => Some(ChecksumType::Sha384),
            Checksum::Sha512(_) => Some(ChecksumType::Sha512),
            Checksum::Unknown(_) | Checksum::Empty => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Changelog {
    pub author: String,
    pub timestamp: u64,
    pub description: String,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct HeaderRange {
    pub start: u64,
    pub end: u64,
}

// Requirement (Provides, Conflicts, Obsoletes, Requires).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Requirement {
    pub name: String,
    pub flags: Option<String>,
    pub epoch: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
    pub preinstall: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileType {
    File,
    Dir,
    Ghost,
}

impl FileType {
    pub fn try_create<N: AsRef<[u8]> + Sized>(val: N) -> Result<Self, MetadataError> {
        let ftype = match val.as_ref() {
            b"dir" => FileType::Dir,
            b"ghost" => FileType::Ghost,
            _ => FileType::File,
        };
        Ok(ftype)
    }

    pub fn to_values(&self) -> &[u8] {
        match self {
            FileType::File => b"file",
            FileType::Dir => b"dir",
            FileType::Ghost => b"ghost",
        }
    }
}

impl Default for FileType {
    fn default() -> Self {
        FileType::File
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PackageFile {
    pub filetype: FileType,
    pub path: String,
}

/// The three text blobs rendered from one [`Package`], one per output stream.
///
/// Rendered outside of any lock - a worker only needs a stream mutex for the
/// final append.
#[derive(Debug)]
pub struct XmlFragments {
    pub primary: Vec<u8>,
    pub filelists: Vec<u8>,
    pub other: Vec<u8>,
}

impl XmlFragments {
    pub fn render(package: &Package) -> Result<Self, MetadataError> {
        let mut primary_buf = Vec::new();
        primary::write_package(&mut Writer::new(&mut primary_buf), package)?;

        let mut filelists_buf = Vec::new();
        filelist::write_package(&mut Writer::new(&mut filelists_buf), package)?;

        let mut other_buf = Vec::new();
        other::write_package(&mut Writer::new(&mut other_buf), package)?;

        Ok(Self {
            primary: primary_buf,
            filelists: filelists_buf,
            other: other_buf,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct RepomdData {
    revision: Option<String>,
    metadata_files: Vec<RepomdRecord>,
}

impl RepomdData {
    pub fn add_record(&mut self, record: RepomdRecord) {
        self.metadata_files.push(record);
    }

    pub fn get_record(&self, rectype: &str) -> Option<&RepomdRecord> {
        self.metadata_files
            .iter()
            .find(|r| r.metadata_name == rectype)
    }

    pub fn records(&self) -> &Vec<RepomdRecord> {
        &self.metadata_files
    }

    pub fn set_revision(&mut self, revision: &str) {
        self.revision = Some(revision.to_owned());
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RepomdRecord {
    base_path: Option<PathBuf>,

    /// Record type
    pub metadata_name: String,
    /// Relative location of the file in a repository
    pub location_href: PathBuf,
    /// URL at which the location_href is relative - if it is not the current one
    pub location_base: Option<String>,
    /// Mtime of the file
    pub timestamp: i64,
    /// Size of the file
    pub size: Option<u64>,
    /// Checksum of the file
    pub checksum: Checksum,

    /// Size of the archive content
    pub open_size: Option<u64>,
    /// Checksum of the archive content
    pub open_checksum: Option<Checksum>,

    /// Database version (used only for sqlite databases like primary.sqlite etc.)
    pub database_version: Option<u32>,
}

impl RepomdRecord {
    pub fn new(
        name: &str,
        href: &Path,
        base: &Path,
        checksum_type: ChecksumType,
    ) -> Result<Self, MetadataError> {
        let mut record = RepomdRecord::default();
        record.metadata_name = name.to_owned();
        record.location_href = {
            assert!(href.starts_with("repodata/"));
            href.to_owned()
        };
        record.base_path = Some(base.to_owned());
        record.fill(checksum_type)?;
        Ok(record)
    }

    pub fn fill(&mut self, checksum_type: ChecksumType) -> Result<(), MetadataError> {
        let file_path = self
            .base_path
            .as_ref()
            .ok_or(MetadataError::MissingFieldError("base_path"))?
            .join(&self.location_href);
        let file_metadata = file_path.metadata()?;
        self.timestamp = file_metadata.mtime();
        self.size = Some(file_metadata.size());
        self.checksum = utils::checksum_file(&file_path, checksum_type)?;
        self.open_checksum = utils::checksum_inner_file(&file_path, checksum_type)?;
        self.open_size = utils::size_inner_file(&file_path)?;

        Ok(())
    }

    /// Prefix the artifact's filename with its hex checksum, on disk and in the record.
    ///
    /// Run after all checksums have been computed - the rename does not change them.
    pub fn rename_unique(&mut self) -> Result<(), MetadataError> {
        let base = self
            .base_path
            .as_ref()
            .ok_or(MetadataError::MissingFieldError("base_path"))?;
        let (_, checksum_value) = self.checksum.to_values()?;
        let old_path = base.join(&self.location_href);
        let file_name = old_path
            .file_name()
            .ok_or(MetadataError::MissingFieldError("location_href"))?
            .to_string_lossy();
        let new_href = PathBuf::from("repodata").join(format!("{}-{}", checksum_value, file_name));
        std::fs::rename(&old_path, base.join(&new_href))?;
        self.location_href = new_href;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_try_create() {
        let checksum = Checksum::try_create(
            "sha256",
            "4e774685b17db9bb6c4c39f8ef638d3dd2a822b362452a0f1ba795c390b14911",
        )
        .unwrap();
        assert_eq!(
            checksum.to_values().unwrap(),
            (
                "sha256",
                "4e774685b17db9bb6c4c39f8ef638d3dd2a822b362452a0f1ba795c390b14911"
            )
        );
        assert_eq!(checksum.checksum_type(), Some(ChecksumType::Sha256));

        assert!(Checksum::try_create("sha256", "tooshort").is_err());
        assert!(Checksum::try_create("crc32", "0011223344").is_err());
    }

    #[test]
    fn test_checksum_type_parse() {
        assert_eq!(ChecksumType::try_from("sha1").unwrap(), ChecksumType::Sha1);
        assert_eq!(ChecksumType::try_from("sha").unwrap(), ChecksumType::Sha1);
        assert_eq!(
            ChecksumType::try_from("sha256").unwrap(),
            ChecksumType::Sha256
        );
        assert!(ChecksumType::try_from("crc32").is_err());
    }

    #[test]
    fn test_compression_extensions() {
        assert_eq!(CompressionType::Gzip.to_file_extension(), ".gz");
        assert_eq!(CompressionType::Bz2.to_file_extension(), ".bz2");
        assert_eq!(CompressionType::Xz.to_file_extension(), ".xz");
        assert_eq!(CompressionType::None.to_file_extension(), "");
    }
}
