// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::{BufRead, Write};

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::metadata::{Changelog, Checksum, MetadataError, Package, XML_NS_OTHER};
use crate::utils;
use crate::EVR;

const TAG_OTHERDATA: &[u8] = b"otherdata";
const TAG_PACKAGE: &[u8] = b"package";
const TAG_VERSION: &[u8] = b"version";
const TAG_CHANGELOG: &[u8] = b"changelog";

// <?xml version="1.0" encoding="UTF-8"?>
// <otherdata xmlns="http://linux.duke.edu/metadata/other" packages="200">
pub(crate) fn write_header<W: Write>(out: &mut W, num_pkgs: usize) -> Result<(), MetadataError> {
    write!(
        out,
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <otherdata xmlns=\"{}\" packages=\"{}\">\n",
        XML_NS_OTHER, num_pkgs
    )?;
    Ok(())
}

pub(crate) fn write_footer<W: Write>(out: &mut W) -> Result<(), MetadataError> {
    out.write_all(b"</otherdata>\n")?;
    Ok(())
}

pub(crate) fn write_package<W: Write>(
    writer: &mut Writer<W>,
    package: &Package,
) -> Result<(), MetadataError> {
    // <package pkgid="a2d3bce512f79b0bc840ca7912a86bbc0016cf06d5c363ffbb6fd5e1ef03de1b" name="fontconfig" arch="x86_64">
    let (_, pkgid) = package.checksum().to_values()?;
    let mut package_tag = BytesStart::new("package");
    package_tag.push_attribute(("pkgid", pkgid));
    package_tag.push_attribute(("name", package.name()));
    package_tag.push_attribute(("arch", package.arch()));
    writer.write_event(Event::Start(package_tag))?;

    // <version epoch="0" ver="2.8.0" rel="5.el6"/>
    let (epoch, version, release) = package.evr().values();
    writer
        .create_element("version")
        .with_attribute(("epoch", epoch))
        .with_attribute(("ver", version))
        .with_attribute(("rel", release))
        .write_empty()?;

    for changelog in package.changelogs() {
        //  <changelog author="Bojack Horseman &lt;bojack@horsinaround.com&gt; - 2.7.2-1" date="1251720000">- Update to 2.7.2</changelog>
        writer
            .create_element("changelog")
            .with_attribute(("author", changelog.author.as_str()))
            .with_attribute(("date", changelog.timestamp.to_string().as_str()))
            .write_text_content(BytesText::new(&changelog.description))?;
    }

    // </package>
    writer.write_event(Event::End(BytesEnd::new("package")))?;

    Ok(())
}

pub struct OtherXmlReader<R: BufRead> {
    reader: Reader<R>,
}

impl<R: BufRead> OtherXmlReader<R> {
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

fn parse_header<R: BufRead>(reader: &mut Reader<R>) -> Result<usize, MetadataError> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Decl(_) => (),
            Event::Start(e) if e.name().as_ref() == TAG_OTHERDATA => {
                let count = utils::required_attr(&e, "packages")?;
                return Ok(count.parse()?);
            }
            _ => return Err(MetadataError::MissingHeaderError),
        }
        buf.clear();
    }
}

//   <package pkgid="6d0fd7f08cef63677726973d327e0b99f819b1983f90c2b656bb27cd2112cb7f" name="horse" arch="noarch">
//     <version epoch="0" ver="4.1" rel="1"/>
//     <changelog author="Lucille Bluth - 4.1-1" date="1617192000">- It's a banana, Michael</changelog>
//   </package>
fn parse_package<R: BufRead>(
    reader: &mut Reader<R>,
    package: &mut Option<Package>,
) -> Result<(), MetadataError> {
    let mut buf = Vec::new();
    let mut changelogs = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::End(e) if e.name().as_ref() == TAG_PACKAGE => break,

            Event::Start(e) => match e.name().as_ref() {
                TAG_PACKAGE => {
                    let pkgid = utils::required_attr(&e, "pkgid")?;
                    let name = utils::required_attr(&e, "name")?;
                    let arch = utils::required_attr(&e, "arch")?;

                    if let Some(pkg) = package {
                        let (_, existing_pkgid) = pkg.checksum.to_values()?;
                        if existing_pkgid != pkgid {
                            return Err(MetadataError::InconsistentMetadataError(format!(
                                "pkgid {} in other metadata does not match {}",
                                pkgid, existing_pkgid
                            )));
                        }
                    } else {
                        let mut pkg = Package::default();
                        pkg.set_name(name)
                            .set_arch(arch)
                            .set_checksum(Checksum::Unknown(pkgid));
                        *package = Some(pkg);
                    }
                }
                TAG_VERSION => {
                    let epoch = utils::required_attr(&e, "epoch")?;
                    let version = utils::required_attr(&e, "ver")?;
                    let release = utils::required_attr(&e, "rel")?;
                    if let Some(pkg) = package {
                        pkg.evr = EVR::new(epoch, version, release);
                    }
                }
                TAG_CHANGELOG => {
                    let author = utils::required_attr(&e, "author")?;
                    let timestamp = utils::required_attr(&e, "date")?.parse()?;
                    let description = utils::read_element_text(reader, TAG_CHANGELOG)?;
                    changelogs.push(Changelog {
                        author,
                        timestamp,
                        description,
                    });
                }
                _ => (),
            },
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }

    if let Some(pkg) = package {
        pkg.rpm_changelogs = changelogs;
    }

    Ok(())
}
