#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;

use rpmindex::{
    utils, Changelog, Checksum, ChecksumType, FileType, HeaderRange, MetadataError, Package,
    PackageFile, PackageReader, Requirement, EVR,
};

pub static COMPLEX_PACKAGE: Lazy<Package> = Lazy::new(|| {
    Package {
        checksum: Checksum::Sha256(
            "6e46283a16954c9cecd3799246eb1a426d7d8a8b1bc8d57c55c3da4253e200e5".to_owned(),
        ),
        name: "complex-package".to_owned(),
        arch: "x86_64".to_owned(),
        evr: EVR::new("1", "2.3.4", "5.el8"),
        summary: "A package for exercising many different features of RPM metadata".to_owned(),
        description: "Complex package".to_owned(),
        packager: "Michael Bluth".to_owned(),
        url: "http://bobloblaw.com".to_owned(),
        location_href: "complex-package-2.3.4-5.el8.x86_64.rpm".to_owned(),
        time_file: 1624680154,
        time_build: 1624680153,
        size_package: 8641,
        size_installed: 117,
        size_archive: 932,
        rpm_license: "MPLv2".to_owned(),
        rpm_buildhost: "localhost".to_owned(),
        rpm_sourcerpm: "complex-package-2.3.4-5.el8.src.rpm".to_owned(),
        rpm_group: "Development/Tools".to_owned(),
        rpm_header_range: HeaderRange {
            start: 4504,
            end: 8377,
        },
        rpm_vendor: "Bluth Company".to_owned(),
        rpm_provides: vec![
            Requirement {
                name: "complex-package".to_owned(),
                flags: Some("EQ".to_owned()),
                epoch: Some("1".to_owned()),
                version: Some("2.3.4".to_owned()),
                release: Some("5.el8".to_owned()),
                ..Requirement::default()
            },
            Requirement {
                name: "laughter".to_owned(),
                flags: Some("EQ".to_owned()),
                epoch: Some("0".to_owned()),
                version: Some("33".to_owned()),
                ..Requirement::default()
            },
            Requirement {
                name: "narration(ronhoward)".to_owned(),
                ..Requirement::default()
            },
        ],
        rpm_requires: vec![
            Requirement {
                name: "/usr/sbin/useradd".to_owned(),
                preinstall: true,
                ..Requirement::default()
            },
            Requirement {
                name: "arson".to_owned(),
                flags: Some("GE".to_owned()),
                epoch: Some("0".to_owned()),
                version: Some("1.0.0".to_owned()),
                release: Some("1".to_owned()),
                ..Requirement::default()
            },
        ],
        rpm_conflicts: vec![Requirement {
            name: "foxnetwork".to_owned(),
            flags: Some("GT".to_owned()),
            epoch: Some("0".to_owned()),
            version: Some("5555".to_owned()),
            ..Requirement::default()
        }],
        rpm_obsoletes: vec![Requirement {
            name: "bluemangroup".to_owned(),
            flags: Some("LT".to_owned()),
            epoch: Some("0".to_owned()),
            version: Some("32.1".to_owned()),
            release: Some("0".to_owned()),
            ..Requirement::default()
        }],
        rpm_suggests: vec![Requirement {
            name: "(bobloblaw >= 1.1 if maritimelaw else anyone < 0.5.1-2)".to_owned(),
            ..Requirement::default()
        }],
        rpm_enhances: vec![Requirement {
            name: "(bananas or magic)".to_owned(),
            ..Requirement::default()
        }],
        rpm_recommends: vec![Requirement {
            name: "yacht".to_owned(),
            flags: Some("GT".to_owned()),
            epoch: Some("9".to_owned()),
            version: Some("11.0".to_owned()),
            release: Some("0".to_owned()),
            ..Requirement::default()
        }],
        rpm_supplements: vec![Requirement {
            name: "comedy".to_owned(),
            flags: Some("EQ".to_owned()),
            epoch: Some("0".to_owned()),
            version: Some("11.1".to_owned()),
            release: Some("4".to_owned()),
            ..Requirement::default()
        }],
        rpm_files: vec![
            PackageFile {
                filetype: FileType::File,
                path: "/etc/complex/pkg.cfg".to_owned(),
            },
            PackageFile {
                filetype: FileType::File,
                path: "/usr/bin/complex_a".to_owned(),
            },
            PackageFile {
                filetype: FileType::Dir,
                path: "/usr/share/doc/complex-package".to_owned(),
            },
            PackageFile {
                filetype: FileType::Ghost,
                path: "/var/log/complex.log".to_owned(),
            },
        ],
        rpm_changelogs: vec![
            Changelog {
                author: "Lucille Bluth <lucille@bluthcompany.com> - 1.1.1-1".to_owned(),
                timestamp: 1617192000,
                description: "- It's a banana, Michael. How much could it cost, $10?".to_owned(),
            },
            Changelog {
                author: "George Bluth <george@federalprison.gov> - 3.3.3-3".to_owned(),
                timestamp: 1623672000,
                description: "- There’s always money in the banana stand".to_owned(),
            },
        ],
        ..Package::default()
    }
});

pub static RPM_EMPTY: Lazy<Package> = Lazy::new(|| Package {
    checksum: Checksum::Sha256(
        "90fbba546300f507473547f33e229ee7bad94bbbe6e84b21d485e8e43b5f1132".to_owned(),
    ),
    name: "rpm-empty".to_owned(),
    arch: "x86_64".to_owned(),
    evr: EVR::new("0", "0", "0"),
    ..Package::default()
});

/// A stand-in for the RPM header parser.
///
/// Builds a deterministic [`Package`] out of the file's name and stat data, and
/// counts how many times it was invoked so cache-reuse behavior is observable.
pub struct StubReader {
    pub calls: AtomicUsize,
}

impl StubReader {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PackageReader for StubReader {
    fn read_package(
        &self,
        path: &Path,
        checksum_type: ChecksumType,
        _changelog_limit: Option<usize>,
    ) -> Result<Package, MetadataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let filename = path.file_name().unwrap().to_string_lossy();
        if filename.contains("unparseable") {
            return Err(MetadataError::MissingHeaderError);
        }

        use std::os::unix::prelude::MetadataExt;
        let metadata = std::fs::metadata(path)?;

        let name = filename.trim_end_matches(".rpm");
        let mut package = Package::default();
        package
            .set_name(name)
            .set_arch("noarch")
            .set_version("1.0")
            .set_release("1")
            .set_epoch(0)
            .set_summary(format!("the {} package", name))
            .set_rpm_license("MPLv2")
            .set_time_file(metadata.mtime() as u64)
            .set_time_build(1624680153)
            .set_size_package(metadata.size())
            .set_size_installed(42)
            .set_size_archive(296)
            .set_checksum(utils::checksum_file(path, checksum_type)?)
            .set_files(vec![PackageFile {
                filetype: FileType::File,
                path: format!("/usr/bin/{}", name),
            }])
            .set_changelogs(vec![Changelog {
                author: "Bojack Horseman".to_owned(),
                timestamp: 1331831374,
                description: "- Initial release".to_owned(),
            }]);
        Ok(package)
    }
}
