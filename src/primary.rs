// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::{BufRead, Write};

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::metadata::{
    Checksum, HeaderRange, MetadataError, Package, Requirement, XML_NS_COMMON, XML_NS_RPM,
};
use crate::utils;
use crate::EVR;

const TAG_METADATA: &[u8] = b"metadata";
const TAG_PACKAGE: &[u8] = b"package";
const TAG_NAME: &[u8] = b"name";
const TAG_VERSION: &[u8] = b"version";
const TAG_CHECKSUM: &[u8] = b"checksum";
const TAG_ARCH: &[u8] = b"arch";
const TAG_SUMMARY: &[u8] = b"summary";
const TAG_DESCRIPTION: &[u8] = b"description";
const TAG_PACKAGER: &[u8] = b"packager";
const TAG_URL: &[u8] = b"url";
const TAG_TIME: &[u8] = b"time";
const TAG_SIZE: &[u8] = b"size";
const TAG_LOCATION: &[u8] = b"location";
const TAG_FORMAT: &[u8] = b"format";

const TAG_RPM_LICENSE: &[u8] = b"rpm:license";
const TAG_RPM_VENDOR: &[u8] = b"rpm:vendor";
const TAG_RPM_GROUP: &[u8] = b"rpm:group";
const TAG_RPM_BUILDHOST: &[u8] = b"rpm:buildhost";
const TAG_RPM_SOURCERPM: &[u8] = b"rpm:sourcerpm";
const TAG_RPM_HEADER_RANGE: &[u8] = b"rpm:header-range";

const TAG_RPM_ENTRY: &[u8] = b"rpm:entry";
const TAG_RPM_PROVIDES: &[u8] = b"rpm:provides";
const TAG_RPM_REQUIRES: &[u8] = b"rpm:requires";
const TAG_RPM_CONFLICTS: &[u8] = b"rpm:conflicts";
const TAG_RPM_OBSOLETES: &[u8] = b"rpm:obsoletes";
const TAG_RPM_SUGGESTS: &[u8] = b"rpm:suggests";
const TAG_RPM_ENHANCES: &[u8] = b"rpm:enhances";
const TAG_RPM_RECOMMENDS: &[u8] = b"rpm:recommends";
const TAG_RPM_SUPPLEMENTS: &[u8] = b"rpm:supplements";
const TAG_FILE: &[u8] = b"file";

// <?xml version="1.0" encoding="UTF-8"?>
// <metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="210">
pub(crate) fn write_header<W: Write>(out: &mut W, num_pkgs: usize) -> Result<(), MetadataError> {
    write!(
        out,
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <metadata xmlns=\"{}\" xmlns:rpm=\"{}\" packages=\"{}\">\n",
        XML_NS_COMMON, XML_NS_RPM, num_pkgs
    )?;
    Ok(())
}

pub(crate) fn write_footer<W: Write>(out: &mut W) -> Result<(), MetadataError> {
    out.write_all(b"</metadata>\n")?;
    Ok(())
}

pub(crate) fn write_package<W: Write>(
    writer: &mut Writer<W>,
    package: &Package,
) -> Result<(), MetadataError> {
    // <package type="rpm">
    let mut package_tag = BytesStart::new("package");
    package_tag.push_attribute(("type", "rpm"));
    writer.write_event(Event::Start(package_tag))?;

    // <name>horse</name>
    writer
        .create_element("name")
        .write_text_content(BytesText::new(&package.name))?;

    // <arch>noarch</arch>
    writer
        .create_element("arch")
        .write_text_content(BytesText::new(&package.arch))?;

    // <version epoch="0" ver="4.1" rel="1"/>
    writer
        .create_element("version")
        .with_attribute(("epoch", package.evr.epoch.as_str()))
        .with_attribute(("ver", package.evr.version.as_str()))
        .with_attribute(("rel", package.evr.release.as_str()))
        .write_empty()?;

    // <checksum type="sha256" pkgid="YES">6d0fd7f08cef63677726973d327e0b99f819b1983f90c2b656bb27cd2112cb7f</checksum>
    let (checksum_type, checksum_value) = package.checksum.to_values()?;
    writer
        .create_element("checksum")
        .with_attribute(("type", checksum_type))
        .with_attribute(("pkgid", "YES"))
        .write_text_content(BytesText::new(checksum_value))?;

    // <summary>A dummy package of horse</summary>
    writer
        .create_element("summary")
        .write_text_content(BytesText::new(&package.summary))?;

    // <description>A dummy package of horse</description>
    writer
        .create_element("description")
        .write_text_content(BytesText::new(&package.description))?;

    // <packager>Bojack Horseman</packager>
    writer
        .create_element("packager")
        .write_text_content(BytesText::new(&package.packager))?;

    // <url>http://arandomaddress.com</url>
    writer
        .create_element("url")
        .write_text_content(BytesText::new(&package.url))?;

    // <time file="1615451135" build="1331831374"/>
    writer
        .create_element("time")
        .with_attribute(("file", package.time_file.to_string().as_str()))
        .with_attribute(("build", package.time_build.to_string().as_str()))
        .write_empty()?;

    // <size package="1846" installed="42" archive="296"/>
    writer
        .create_element("size")
        .with_attribute(("package", package.size_package.to_string().as_str()))
        .with_attribute(("installed", package.size_installed.to_string().as_str()))
        .with_attribute(("archive", package.size_archive.to_string().as_str()))
        .write_empty()?;

    // <location href="pkgs/horse-4.1-1.noarch.rpm"/>
    let mut location_tag = BytesStart::new("location");
    if let Some(location_base) = &package.location_base {
        location_tag.push_attribute(("xml:base", location_base.as_str()));
    }
    location_tag.push_attribute(("href", package.location_href.as_str()));
    writer.write_event(Event::Empty(location_tag))?;

    // <format>
    writer.write_event(Event::Start(BytesStart::new("format")))?;

    // <rpm:license>GPLv2</rpm:license>
    writer
        .create_element("rpm:license")
        .write_text_content(BytesText::new(&package.rpm_license))?;

    // <rpm:vendor></rpm:vendor>
    writer
        .create_element("rpm:vendor")
        .write_text_content(BytesText::new(&package.rpm_vendor))?;

    // <rpm:group>Internet/Applications</rpm:group>
    writer
        .create_element("rpm:group")
        .write_text_content(BytesText::new(&package.rpm_group))?;

    // <rpm:buildhost>smqe-ws15</rpm:buildhost>
    writer
        .create_element("rpm:buildhost")
        .write_text_content(BytesText::new(&package.rpm_buildhost))?;

    // <rpm:sourcerpm>horse-4.1-1.src.rpm</rpm:sourcerpm>
    writer
        .create_element("rpm:sourcerpm")
        .write_text_content(BytesText::new(&package.rpm_sourcerpm))?;

    // <rpm:header-range start="280" end="1697"/>
    writer
        .create_element("rpm:header-range")
        .with_attribute(("start", package.rpm_header_range.start.to_string().as_str()))
        .with_attribute(("end", package.rpm_header_range.end.to_string().as_str()))
        .write_empty()?;

    write_requirement_section(writer, "rpm:provides", &package.rpm_provides)?;
    write_requirement_section(writer, "rpm:requires", &package.rpm_requires)?;
    write_requirement_section(writer, "rpm:conflicts", &package.rpm_conflicts)?;
    write_requirement_section(writer, "rpm:obsoletes", &package.rpm_obsoletes)?;
    write_requirement_section(writer, "rpm:suggests", &package.rpm_suggests)?;
    write_requirement_section(writer, "rpm:enhances", &package.rpm_enhances)?;
    write_requirement_section(writer, "rpm:recommends", &package.rpm_recommends)?;
    write_requirement_section(writer, "rpm:supplements", &package.rpm_supplements)?;

    // <file type="dir">/etc/fonts/conf.avail</file>
    for file in &package.rpm_files {
        crate::filelist::write_file_element(writer, file)?;
    }

    // </format>
    writer.write_event(Event::End(BytesEnd::new("format")))?;

    // </package>
    writer.write_event(Event::End(BytesEnd::new("package")))?;

    Ok(())
}

// <rpm:requires>
//   <rpm:entry name="horse" flags="EQ" epoch="0" ver="4.1" rel="1"/>
// </rpm:requires>
fn write_requirement_section<W: Write>(
    writer: &mut Writer<W>,
    section_name: &str,
    entry_list: &[Requirement],
) -> Result<(), MetadataError> {
    // skip writing empty sections
    if entry_list.is_empty() {
        return Ok(());
    }

    writer.write_event(Event::Start(BytesStart::new(section_name)))?;

    for entry in entry_list {
        let mut entry_tag = BytesStart::new("rpm:entry");
        entry_tag.push_attribute(("name", entry.name.as_str()));

        if let Some(flags) = &entry.flags {
            entry_tag.push_attribute(("flags", flags.as_str()));
        }

        if let Some(epoch) = &entry.epoch {
            entry_tag.push_attribute(("epoch", epoch.as_str()));
        }

        if let Some(version) = &entry.version {
            entry_tag.push_attribute(("ver", version.as_str()));
        }

        if let Some(release) = &entry.release {
            entry_tag.push_attribute(("rel", release.as_str()));
        }

        if entry.preinstall {
            entry_tag.push_attribute(("pre", "1"));
        }
        writer.write_event(Event::Empty(entry_tag))?;
    }

    writer.write_event(Event::End(BytesEnd::new(section_name)))?;

    Ok(())
}

pub struct PrimaryXmlReader<R: BufRead> {
    reader: Reader<R>,
}

impl<R: BufRead> PrimaryXmlReader<R> {
    pub fn new(reader: Reader<R>) -> Self {
        Self { reader }
    }

    pub fn read_header(&mut self) -> Result<usize, MetadataError> {
        parse_header(&mut self.reader)
    }

    pub fn read_package(&mut self, package: &mut Option<Package>) -> Result<(), MetadataError> {
        parse_package(&mut self.reader, package)
    }
}

// <?xml version="1.0" encoding="UTF-8"?>
// <metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="35">
fn parse_header<R: BufRead>(reader: &mut Reader<R>) -> Result<usize, MetadataError> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Decl(_) => (),
            Event::Start(e) if e.name().as_ref() == TAG_METADATA => {
                let count = utils::required_attr(&e, "packages")?;
                return Ok(count.parse()?);
            }
            _ => return Err(MetadataError::MissingHeaderError),
        }
        buf.clear();
    }
}

pub fn parse_package<R: BufRead>(
    reader: &mut Reader<R>,
    package: &mut Option<Package>,
) -> Result<(), MetadataError> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::End(e) if e.name().as_ref() == TAG_PACKAGE => break,
            Event::Start(e) => match e.name().as_ref() {
                TAG_PACKAGE => {
                    package.get_or_insert_with(Package::default);
                }
                TAG_NAME => {
                    let name = utils::read_element_text(reader, TAG_NAME)?;
                    pkg_mut(package)?.name = name;
                }
                TAG_ARCH => {
                    let arch = utils::read_element_text(reader, TAG_ARCH)?;
                    pkg_mut(package)?.arch = arch;
                }
                TAG_VERSION => {
                    let epoch = utils::required_attr(&e, "epoch")?;
                    let version = utils::required_attr(&e, "ver")?;
                    let release = utils::required_attr(&e, "rel")?;
                    pkg_mut(package)?.evr = EVR::new(epoch, version, release);
                }
                TAG_CHECKSUM => {
                    let checksum_type = utils::required_attr(&e, "type")?;
                    let checksum_value = utils::read_element_text(reader, TAG_CHECKSUM)?;
                    pkg_mut(package)?.checksum =
                        Checksum::try_create(checksum_type.as_str(), checksum_value.as_str())?;
                }
                TAG_SUMMARY => {
                    let summary = utils::read_element_text(reader, TAG_SUMMARY)?;
                    pkg_mut(package)?.summary = summary;
                }
                TAG_DESCRIPTION => {
                    let description = utils::read_element_text(reader, TAG_DESCRIPTION)?;
                    pkg_mut(package)?.description = description;
                }
                TAG_PACKAGER => {
                    let packager = utils::read_element_text(reader, TAG_PACKAGER)?;
                    pkg_mut(package)?.packager = packager;
                }
                TAG_URL => {
                    let url = utils::read_element_text(reader, TAG_URL)?;
                    pkg_mut(package)?.url = url;
                }
                TAG_TIME => {
                    let time_file = utils::required_attr(&e, "file")?.parse()?;
                    let time_build = utils::required_attr(&e, "build")?.parse()?;
                    let pkg = pkg_mut(package)?;
                    pkg.time_file = time_file;
                    pkg.time_build = time_build;
                }
                TAG_SIZE => {
                    let size_package = utils::required_attr(&e, "package")?.parse()?;
                    let size_installed = utils::required_attr(&e, "installed")?.parse()?;
                    let size_archive = utils::required_attr(&e, "archive")?.parse()?;
                    let pkg = pkg_mut(package)?;
                    pkg.size_package = size_package;
                    pkg.size_installed = size_installed;
                    pkg.size_archive = size_archive;
                }
                TAG_LOCATION => {
                    let href = utils::required_attr(&e, "href")?;
                    let base = utils::attr_string(&e, "xml:base")?;
                    let pkg = pkg_mut(package)?;
                    pkg.location_href = href;
                    pkg.location_base = base;
                }
                TAG_FORMAT => parse_format(reader, pkg_mut(package)?)?,
                _ => (),
            },
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

fn pkg_mut<'a>(package: &'a mut Option<Package>) -> Result<&'a mut Package, MetadataError> {
    package.as_mut().ok_or_else(|| {
        MetadataError::InconsistentMetadataError(
            "package metadata outside of a <package> element".to_owned(),
        )
    })
}

fn parse_format<R: BufRead>(
    reader: &mut Reader<R>,
    package: &mut Package,
) -> Result<(), MetadataError> {
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::End(e) if e.name().as_ref() == TAG_FORMAT => break,
            Event::Start(e) => match e.name().as_ref() {
                TAG_RPM_LICENSE => {
                    package.rpm_license = utils::read_element_text(reader, TAG_RPM_LICENSE)?;
                }
                TAG_RPM_VENDOR => {
                    package.rpm_vendor = utils::read_element_text(reader, TAG_RPM_VENDOR)?;
                }
                TAG_RPM_GROUP => {
                    package.rpm_group = utils::read_element_text(reader, TAG_RPM_GROUP)?;
                }
                TAG_RPM_BUILDHOST => {
                    package.rpm_buildhost = utils::read_element_text(reader, TAG_RPM_BUILDHOST)?;
                }
                TAG_RPM_SOURCERPM => {
                    package.rpm_sourcerpm = utils::read_element_text(reader, TAG_RPM_SOURCERPM)?;
                }
                TAG_RPM_HEADER_RANGE => {
                    let start = utils::required_attr(&e, "start")?.parse()?;
                    let end = utils::required_attr(&e, "end")?.parse()?;
                    package.rpm_header_range = HeaderRange { start, end };
                }
                TAG_RPM_PROVIDES => {
                    package.rpm_provides = parse_requirement_list(reader, TAG_RPM_PROVIDES)?;
                }
                TAG_RPM_REQUIRES => {
                    package.rpm_requires = parse_requirement_list(reader, TAG_RPM_REQUIRES)?;
                }
                TAG_RPM_CONFLICTS => {
                    package.rpm_conflicts = parse_requirement_list(reader, TAG_RPM_CONFLICTS)?;
                }
                TAG_RPM_OBSOLETES => {
                    package.rpm_obsoletes = parse_requirement_list(reader, TAG_RPM_OBSOLETES)?;
                }
                TAG_RPM_SUGGESTS => {
                    package.rpm_suggests = parse_requirement_list(reader, TAG_RPM_SUGGESTS)?;
                }
                TAG_RPM_ENHANCES => {
                    package.rpm_enhances = parse_requirement_list(reader, TAG_RPM_ENHANCES)?;
                }
                TAG_RPM_RECOMMENDS => {
                    package.rpm_recommends = parse_requirement_list(reader, TAG_RPM_RECOMMENDS)?;
                }
                TAG_RPM_SUPPLEMENTS => {
                    package.rpm_supplements = parse_requirement_list(reader, TAG_RPM_SUPPLEMENTS)?;
                }
                // file entries are authoritative in filelists.xml, don't parse them twice
                TAG_FILE => (),
                _ => (),
            },
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }
    Ok(())
}

fn parse_requirement_list<R: BufRead>(
    reader: &mut Reader<R>,
    section_tag: &[u8],
) -> Result<Vec<Requirement>, MetadataError> {
    let mut list = vec![];
    let mut buf = vec![];

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == TAG_RPM_ENTRY => {
                let name = utils::required_attr(&e, "name")?;
                let flags = utils::attr_string(&e, "flags")?;
                let epoch = utils::attr_string(&e, "epoch")?;
                let version = utils::attr_string(&e, "ver")?;
                let release = utils::attr_string(&e, "rel")?;
                let preinstall = utils::attr_string(&e, "pre")?
                    .map(|val| val == "1" || val.eq_ignore_ascii_case("true"))
                    .unwrap_or(false);

                list.push(Requirement {
                    name,
                    flags,
                    epoch,
                    version,
                    release,
                    preinstall,
                });
            }
            Event::End(e) if e.name().as_ref() == section_tag => break,
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }

    Ok(list)
}
