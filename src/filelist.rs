// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::{BufRead, Write};

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::metadata::{
    Checksum, FileType, MetadataError, Package, PackageFile, XML_NS_FILELISTS,
};
use crate::utils;
use crate::EVR;

const TAG_FILELISTS: &[u8] = b"filelists";
const TAG_PACKAGE: &[u8] = b"package";
const TAG_VERSION: &[u8] = b"version";
const TAG_FILE: &[u8] = b"file";

// <?xml version="1.0" encoding="UTF-8"?>
// <filelists xmlns="http://linux.duke.edu/metadata/filelists" packages="210">
pub(crate) fn write_header<W: Write>(out: &mut W, num_pkgs: usize) -> Result<(), MetadataError> {
    write!(
        out,
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <filelists xmlns=\"{}\" packages=\"{}\">\n",
        XML_NS_FILELISTS, num_pkgs
    )?;
    Ok(())
}

pub(crate) fn write_footer<W: Write>(out: &mut W) -> Result<(), MetadataError> {
    out.write_all(b"</filelists>\n")?;
    Ok(())
}

pub(crate) fn write_package<W: Write>(
    writer: &mut Writer<W>,
    package: &Package,
) -> Result<(), MetadataError> {
    // <package pkgid="a2d3bce512f79b0bc840ca7912a86bbc0016cf06d5c363ffbb6fd5e1ef03de1b" name="fontconfig" arch="x86_64">
    let (_, pkgid) = package.checksum.to_values()?;
    let mut package_tag = BytesStart::new("package");
    package_tag.push_attribute(("pkgid", pkgid));
    package_tag.push_attribute(("name", package.name()));
    package_tag.push_attribute(("arch", package.arch()));
    writer.write_event(Event::Start(package_tag))?;

    // <version epoch="0" ver="2.8.0" rel="5.fc33"/>
    let (epoch, version, release) = package.evr().values();
    writer
        .create_element("version")
        .with_attribute(("epoch", epoch))
        .with_attribute(("ver", version))
        .with_attribute(("rel", release))
        .write_empty()?;

    // <file type="dir">/etc/fonts/conf.avail</file>
    for file in package.files() {
        write_file_element(writer, file)?;
    }

    // </package>
    writer.write_event(Event::End(BytesEnd::new("package")))?;

    Ok(())
}

pub(crate) fn write_file_element<W: Write>(
    writer: &mut Writer<W>,
    file: &PackageFile,
) -> Result<(), MetadataError> {
    let mut file_tag = BytesStart::new("file");
    if file.filetype != FileType::File {
        file_tag.push_attribute(("type".as_bytes(), file.filetype.to_values()));
    }
    writer.write_event(Event::Start(file_tag))?;
    writer.write_event(Event::Text(BytesText::new(&file.path)))?;
    writer.write_event(Event::End(BytesEnd::new("file")))?;
    Ok(())
}

pub struct FilelistsXmlReader<R: BufRead> {
    reader: Reader<R>,
}

impl<R: BufRead> FilelistsXmlReader<R> {
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
            Event::Start(e) if e.name().as_ref() == TAG_FILELISTS => {
                let count = utils::required_attr(&e, "packages")?;
                return Ok(count.parse()?);
            }
            _ => return Err(MetadataError::MissingHeaderError),
        }
        buf.clear();
    }
}

//   <package pkgid="a2d3bce512f79b0bc840ca7912a86bbc0016cf06d5c363ffbb6fd5e1ef03de1b" name="fontconfig" arch="x86_64">
//     <version epoch="0" ver="2.8.0" rel="5.fc33"/>
//     <file type="dir">/etc/fonts/conf.avail</file>
//     ...
//   </package>
fn parse_package<R: BufRead>(
    reader: &mut Reader<R>,
    package: &mut Option<Package>,
) -> Result<(), MetadataError> {
    let mut buf = Vec::new();
    let mut files = Vec::new();

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
                                "pkgid {} in filelists does not match {}",
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
                TAG_FILE => {
                    let filetype = e
                        .try_get_attribute("type")?
                        .map(|attr| FileType::try_create(attr.value.as_ref()))
                        .transpose()?
                        .unwrap_or_default();
                    let path = utils::read_element_text(reader, TAG_FILE)?;
                    files.push(PackageFile { filetype, path });
                }
                _ => (),
            },
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }

    if let Some(pkg) = package {
        pkg.rpm_files = files;
    }

    Ok(())
}
