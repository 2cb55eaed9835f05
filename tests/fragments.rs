mod common;

use std::fs::File;
use std::io::Write;

use pretty_assertions::assert_eq;
use tempdir::TempDir;

use common::{COMPLEX_PACKAGE, RPM_EMPTY};
use rpmindex::{MetadataError, PackageIterator, XmlFragments};

/// Rendering a package and reading the three streams back must reproduce it
/// exactly - the update cache depends on this.
#[test]
fn test_fragments_roundtrip() -> Result<(), MetadataError> {
    let dir = TempDir::new("fragments").unwrap();

    let packages = [&*COMPLEX_PACKAGE, &*RPM_EMPTY];

    let mut primary = Vec::new();
    let mut filelists = Vec::new();
    let mut other = Vec::new();
    write!(
        primary,
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <metadata xmlns=\"http://linux.duke.edu/metadata/common\" \
         xmlns:rpm=\"http://linux.duke.edu/metadata/rpm\" packages=\"{}\">\n",
        packages.len()
    )?;
    write!(
        filelists,
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <filelists xmlns=\"http://linux.duke.edu/metadata/filelists\" packages=\"{}\">\n",
        packages.len()
    )?;
    write!(
        other,
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <otherdata xmlns=\"http://linux.duke.edu/metadata/other\" packages=\"{}\">\n",
        packages.len()
    )?;

    for package in packages {
        let fragments = XmlFragments::render(package)?;
        primary.write_all(&fragments.primary)?;
        primary.write_all(b"\n")?;
        filelists.write_all(&fragments.filelists)?;
        filelists.write_all(b"\n")?;
        other.write_all(&fragments.other)?;
        other.write_all(b"\n")?;
    }

    primary.write_all(b"</metadata>\n")?;
    filelists.write_all(b"</filelists>\n")?;
    other.write_all(b"</otherdata>\n")?;

    let primary_path = dir.path().join("primary.xml");
    let filelists_path = dir.path().join("filelists.xml");
    let other_path = dir.path().join("other.xml");
    File::create(&primary_path)?.write_all(&primary)?;
    File::create(&filelists_path)?.write_all(&filelists)?;
    File::create(&other_path)?.write_all(&other)?;

    let mut parser = PackageIterator::from_files(&primary_path, &filelists_path, &other_path)?;
    assert_eq!(parser.total_packages(), 2);

    let parsed = parser.parse_package()?.expect("first package");
    assert_eq!(&parsed, &*COMPLEX_PACKAGE);

    let parsed = parser.parse_package()?.expect("second package");
    assert_eq!(&parsed, &*RPM_EMPTY);

    assert!(parser.parse_package()?.is_none());
    Ok(())
}

#[test]
fn test_fragment_contents() -> Result<(), MetadataError> {
    let fragments = XmlFragments::render(&COMPLEX_PACKAGE)?;

    let primary = String::from_utf8(fragments.primary).unwrap();
    assert!(primary.starts_with("<package type=\"rpm\">"));
    assert!(primary.contains("<name>complex-package</name>"));
    assert!(primary.contains("<version epoch=\"1\" ver=\"2.3.4\" rel=\"5.el8\"/>"));
    assert!(primary.contains(
        "<checksum type=\"sha256\" pkgid=\"YES\">\
         6e46283a16954c9cecd3799246eb1a426d7d8a8b1bc8d57c55c3da4253e200e5</checksum>"
    ));
    assert!(primary.contains("<location href=\"complex-package-2.3.4-5.el8.x86_64.rpm\"/>"));
    assert!(primary.contains("<rpm:entry name=\"/usr/sbin/useradd\" pre=\"1\"/>"));
    assert!(primary.contains("<rpm:header-range start=\"4504\" end=\"8377\"/>"));

    let filelists = String::from_utf8(fragments.filelists).unwrap();
    assert!(filelists.contains("<file>/usr/bin/complex_a</file>"));
    assert!(filelists.contains("<file type=\"dir\">/usr/share/doc/complex-package</file>"));
    assert!(filelists.contains("<file type=\"ghost\">/var/log/complex.log</file>"));

    let other = String::from_utf8(fragments.other).unwrap();
    assert!(other.contains(
        "author=\"Lucille Bluth &lt;lucille@bluthcompany.com&gt; - 1.1.1-1\""
    ));
    assert!(other.contains("date=\"1617192000\""));
    Ok(())
}
