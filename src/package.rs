// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::SystemTime;

use crate::filelist::FilelistsXmlReader;
use crate::metadata::{METADATA_FILELISTS, METADATA_OTHER, METADATA_PRIMARY};
use crate::other::OtherXmlReader;
use crate::primary::PrimaryXmlReader;
use crate::{
    utils, Changelog, ChecksumType, MetadataError, Package, PackageFile, RepomdData, Requirement,
    EVR,
};

/// Reads the metadata of one package file from disk.
///
/// The indexer only depends on this interface - the production implementation is
/// [`RpmPackageReader`], tests substitute their own.
pub trait PackageReader: Sync {
    fn read_package(
        &self,
        path: &Path,
        checksum_type: ChecksumType,
        changelog_limit: Option<usize>,
    ) -> Result<Package, MetadataError>;
}

/// Parses RPM package headers using the `rpm` crate.
pub struct RpmPackageReader;

impl PackageReader for RpmPackageReader {
    fn read_package(
        &self,
        path: &Path,
        checksum_type: ChecksumType,
        changelog_limit: Option<usize>,
    ) -> Result<Package, MetadataError> {
        load_rpm_package(path, checksum_type, changelog_limit)
    }
}

impl TryFrom<rpm::Dependency> for Requirement {
    type Error = MetadataError;

    fn try_from(d: rpm::Dependency) -> Result<Self, Self::Error> {
        let flags = if d.flags.contains(rpm::DependencyFlags::GE) {
            Some("GE".to_owned())
        } else if d.flags.contains(rpm::DependencyFlags::LE) {
            Some("LE".to_owned())
        } else if d.flags.contains(rpm::DependencyFlags::EQUAL) {
            Some("EQ".to_owned())
        } else if d.flags.contains(rpm::DependencyFlags::LESS) {
            Some("LT".to_owned())
        } else if d.flags.contains(rpm::DependencyFlags::GREATER) {
            Some("GT".to_owned())
        } else {
            None
        };

        let pre = d.flags
            & (rpm::DependencyFlags::SCRIPT_PRE
                | rpm::DependencyFlags::SCRIPT_POST
                | rpm::DependencyFlags::PREREQ);

        let evr = EVR::parse(&d.version);

        let epoch = if evr.epoch().is_empty() {
            if d.version.is_empty() {
                None
            } else {
                Some("0".to_string())
            }
        } else {
            Some(evr.epoch.to_string())
        };
        let version = if evr.version().is_empty() && d.version.is_empty() {
            None
        } else {
            Some(evr.version.to_string())
        };
        let release = if evr.release().is_empty() {
            None
        } else {
            Some(evr.release.to_string())
        };

        Ok(Requirement {
            name: d.name,
            flags,
            epoch,
            version,
            release,
            preinstall: !pre.is_empty(),
        })
    }
}

impl From<rpm::ChangelogEntry> for Changelog {
    fn from(value: rpm::ChangelogEntry) -> Self {
        Changelog {
            author: value.name,
            timestamp: value.timestamp,
            description: value.description,
        }
    }
}

impl From<rpm::FileEntry> for PackageFile {
    fn from(value: rpm::FileEntry) -> Self {
        let ft = if value.flags.contains(rpm::FileFlags::GHOST) {
            crate::FileType::Ghost
        } else {
            match value.mode.file_type() {
                rpm::FileType::Dir => crate::FileType::Dir,
                _ => crate::FileType::File,
            }
        };
        let path = value.path.to_string_lossy().into_owned();
        PackageFile { filetype: ft, path }
    }
}

/// Parse one `.rpm` file into a [`Package`].
///
/// The file checksum is computed with `checksum_type` and doubles as the pkgid.
/// `changelog_limit` keeps only the newest N changelog entries. The location
/// fields are left unset - the caller decides where the package lives relative
/// to the repository root.
pub fn load_rpm_package(
    path: &Path,
    checksum_type: ChecksumType,
    changelog_limit: Option<usize>,
) -> Result<Package, MetadataError> {
    let file = File::open(path)?;
    let file_metadata = file.metadata()?;

    let pkg = rpm::PackageMetadata::parse(&mut BufReader::new(&file))?;

    let mut pkg_metadata = Package::default();

    pkg_metadata.set_name(pkg.get_name()?);

    let arch = if pkg.is_source_package() {
        "src"
    } else {
        pkg.get_arch()?
    };

    pkg_metadata.set_arch(arch);
    pkg_metadata.set_epoch(pkg.get_epoch().unwrap_or(0));
    pkg_metadata.set_version(pkg.get_version()?);
    pkg_metadata.set_release(pkg.get_release()?);

    pkg_metadata.set_summary(pkg.get_summary()?);
    pkg_metadata.set_description(pkg.get_description()?);
    pkg_metadata.set_packager(pkg.get_packager()?);
    pkg_metadata.set_url(pkg.get_url()?);
    pkg_metadata.set_time_build(pkg.get_build_time()?);
    pkg_metadata.set_rpm_license(pkg.get_license()?);
    pkg_metadata.set_rpm_vendor(pkg.get_vendor()?);
    pkg_metadata.set_rpm_group(pkg.get_group()?);
    pkg_metadata.set_rpm_buildhost(pkg.get_build_host()?);
    pkg_metadata.set_rpm_sourcerpm(pkg.get_source_rpm()?);

    let archive_size = pkg
        .signature
        .get_entry_data_as_u64(rpm::IndexSignatureTag::RPMSIGTAG_LONGARCHIVESIZE)
        .unwrap_or_else(|_| {
            pkg.signature
                .get_entry_data_as_u32(rpm::IndexSignatureTag::RPMSIGTAG_PAYLOADSIZE)
                .unwrap_or(0) as u64
        });
    pkg_metadata.set_size_archive(archive_size);
    pkg_metadata.set_size_installed(pkg.get_installed_size()?);

    fn convert_deps(requirements: Vec<rpm::Dependency>) -> Result<Vec<Requirement>, MetadataError> {
        let mut out = Vec::new();
        for r in requirements.into_iter() {
            if r.name.starts_with("rpmlib(") {
                continue;
            }
            out.push(r.try_into()?)
        }
        Ok(out)
    }
    pkg_metadata.set_requires(convert_deps(pkg.get_requires()?)?);
    pkg_metadata.set_provides(convert_deps(pkg.get_provides()?)?);
    pkg_metadata.set_conflicts(convert_deps(pkg.get_conflicts()?)?);
    pkg_metadata.set_obsoletes(convert_deps(pkg.get_obsoletes()?)?);
    pkg_metadata.set_suggests(convert_deps(pkg.get_suggests()?)?);
    pkg_metadata.set_enhances(convert_deps(pkg.get_enhances()?)?);
    pkg_metadata.set_recommends(convert_deps(pkg.get_recommends()?)?);
    pkg_metadata.set_supplements(convert_deps(pkg.get_supplements()?)?);

    let mut changelogs: Vec<Changelog> = Vec::new();
    for f in pkg.get_changelog_entries()?.into_iter() {
        changelogs.push(f.into())
    }
    changelogs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    if let Some(limit) = changelog_limit {
        if changelogs.len() > limit {
            changelogs.drain(..changelogs.len() - limit);
        }
    }
    pkg_metadata.set_changelogs(changelogs);

    let mut files: Vec<PackageFile> = Vec::new();
    for f in pkg.get_file_entries()?.into_iter() {
        files.push(f.into())
    }
    pkg_metadata.set_files(files);

    pkg_metadata.set_checksum(utils::checksum_file(path, checksum_type)?);

    let file_size = file_metadata.len();
    let unix_timestamp = file_metadata
        .modified()?
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    pkg_metadata.set_size_package(file_size);
    pkg_metadata.set_time_file(unix_timestamp);

    let offsets = pkg.get_package_segment_offsets();
    pkg_metadata.set_rpm_header_range(offsets.header, offsets.payload);

    Ok(pkg_metadata)
}

/// Iterates over the packages of a repository by reading the three metadata
/// streams in lockstep and joining them into complete [`Package`] values.
pub struct PackageIterator {
    primary_xml: PrimaryXmlReader<BufReader<Box<dyn Read>>>,
    filelists_xml: FilelistsXmlReader<BufReader<Box<dyn Read>>>,
    other_xml: OtherXmlReader<BufReader<Box<dyn Read>>>,

    num_packages: usize,
    num_remaining: usize,
    in_progress_package: Option<Package>,
}

impl PackageIterator {
    pub fn from_repodata(base: &Path, repomd: &RepomdData) -> Result<Self, MetadataError> {
        let get_path = |name: &'static str| -> Result<_, MetadataError> {
            let record = repomd
                .get_record(name)
                .ok_or(MetadataError::MissingFieldError(name))?;
            Ok(base.join(&record.location_href))
        };
        Self::from_files(
            &get_path(METADATA_PRIMARY)?,
            &get_path(METADATA_FILELISTS)?,
            &get_path(METADATA_OTHER)?,
        )
    }

    pub fn from_files(
        primary_path: &Path,
        filelists_path: &Path,
        other_path: &Path,
    ) -> Result<Self, MetadataError> {
        let primary_xml = PrimaryXmlReader::new(utils::xml_reader_from_file(primary_path)?);
        let filelists_xml = FilelistsXmlReader::new(utils::xml_reader_from_file(filelists_path)?);
        let other_xml = OtherXmlReader::new(utils::xml_reader_from_file(other_path)?);

        let mut parser = Self {
            primary_xml,
            filelists_xml,
            other_xml,
            num_packages: 0,
            num_remaining: 0,
            in_progress_package: None,
        };
        parser.parse_headers()?;

        Ok(parser)
    }

    fn parse_headers(&mut self) -> Result<(), MetadataError> {
        let primary_pkg_count = self.primary_xml.read_header()?;
        let filelists_pkg_count = self.filelists_xml.read_header()?;
        let other_pkg_count = self.other_xml.read_header()?;

        if primary_pkg_count != filelists_pkg_count || primary_pkg_count != other_pkg_count {
            return Err(MetadataError::InconsistentMetadataError(
                "Metadata package counts don't match".to_owned(),
            ));
        }

        self.num_packages = primary_pkg_count;
        self.num_remaining = self.num_packages;

        Ok(())
    }

    pub fn parse_package(&mut self) -> Result<Option<Package>, MetadataError> {
        self.primary_xml
            .read_package(&mut self.in_progress_package)?;
        self.filelists_xml
            .read_package(&mut self.in_progress_package)?;
        self.other_xml.read_package(&mut self.in_progress_package)?;

        let package = self.in_progress_package.take();

        // some repos lie about the number of packages in the header, tolerate it
        if package.is_some() {
            self.num_remaining = self.num_remaining.saturating_sub(1);
        }

        Ok(package)
    }

    pub fn remaining_packages(&self) -> usize {
        self.num_remaining
    }

    pub fn total_packages(&self) -> usize {
        self.num_packages
    }
}

impl Iterator for PackageIterator {
    type Item = Result<Package, MetadataError>;
    fn next(&mut self) -> Option<Self::Item> {
        self.parse_package().transpose()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining_packages()))
    }
}
