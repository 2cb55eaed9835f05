// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::{BufRead, Write};
use std::time::SystemTime;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::metadata::{
    Checksum, MetadataError, RepomdData, RepomdRecord, RepomdXml, XML_NS_REPO, XML_NS_RPM,
};
use crate::utils;

const TAG_REPOMD: &[u8] = b"repomd";
const TAG_REVISION: &[u8] = b"revision";
const TAG_DATA: &[u8] = b"data";
const TAG_LOCATION: &[u8] = b"location";
const TAG_CHECKSUM: &[u8] = b"checksum";
const TAG_OPEN_CHECKSUM: &[u8] = b"open-checksum";
const TAG_TIMESTAMP: &[u8] = b"timestamp";
const TAG_SIZE: &[u8] = b"size";
const TAG_OPEN_SIZE: &[u8] = b"open-size";
const TAG_DATABASE_VERSION: &[u8] = b"database_version";

impl RepomdXml {
    pub fn write_data<W: Write>(
        repomd_data: &RepomdData,
        writer: &mut Writer<W>,
    ) -> Result<(), MetadataError> {
        write_repomd_xml(repomd_data, writer)
    }

    pub fn read_data<R: BufRead>(reader: Reader<R>) -> Result<RepomdData, MetadataError> {
        let mut repomd = RepomdData::default();
        read_repomd_xml(&mut repomd, reader)?;
        Ok(repomd)
    }
}

fn write_repomd_xml<W: Write>(
    repomd_data: &RepomdData,
    writer: &mut Writer<W>,
) -> Result<(), MetadataError> {
    // <?xml version="1.0" encoding="UTF-8"?>
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    // <repomd xmlns="http://linux.duke.edu/metadata/repo" xmlns:rpm="http://linux.duke.edu/metadata/rpm">
    let mut repomd_tag = BytesStart::new("repomd");
    repomd_tag.push_attribute(("xmlns", XML_NS_REPO));
    repomd_tag.push_attribute(("xmlns:rpm", XML_NS_RPM));
    writer.write_event(Event::Start(repomd_tag))?;

    // <revision>1615686706</revision>
    let revision = match repomd_data.revision() {
        Some(revision) => revision.to_owned(),
        None => SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("system clock failure")
            .as_secs()
            .to_string(),
    };
    writer
        .create_element("revision")
        .write_text_content(BytesText::new(&revision))?;

    for record in repomd_data.records() {
        write_data(record, writer)?;
    }

    // </repomd>
    writer.write_event(Event::End(BytesEnd::new("repomd")))?;

    // trailing newline
    writer.write_event(Event::Text(BytesText::new("\n")))?;
    Ok(())
}

///  <data type="primary">
///    <checksum type="sha256">afdc..c4b</checksum>
///    <open-checksum type="sha256">afdc..c4b</open-checksum>
///    <location href="repodata/primary.xml.gz"/>
///    <timestamp>1614969700</timestamp>
///    <size>5830735</size>
///    <open-size>53965949</open-size>
///  </data>
fn write_data<W: Write>(data: &RepomdRecord, writer: &mut Writer<W>) -> Result<(), MetadataError> {
    // <data>
    let mut data_tag = BytesStart::new("data");
    data_tag.push_attribute(("type", data.metadata_name.as_str()));
    writer.write_event(Event::Start(data_tag))?;

    // <checksum type="sha256">afdc6dc379e58d097ed0b350536812bc6a604bbce50c5c109d8d98e28301dc4b</checksum>
    let (checksum_type, checksum_value) = data.checksum.to_values()?;
    writer
        .create_element("checksum")
        .with_attribute(("type", checksum_type))
        .write_text_content(BytesText::new(checksum_value))?;

    // <open-checksum type="sha256">afdc6dc379e58d097ed0b350536812bc6a604bbce50c5c109d8d98e28301dc4b</open-checksum> (maybe)
    if let Some(open_checksum) = &data.open_checksum {
        let (checksum_type, checksum_value) = open_checksum.to_values()?;
        writer
            .create_element("open-checksum")
            .with_attribute(("type", checksum_type))
            .write_text_content(BytesText::new(checksum_value))?;
    }

    // <location href="repodata/primary.xml.gz">
    writer
        .create_element("location")
        .with_attribute(("href", data.location_href.to_string_lossy().as_ref()))
        .write_empty()?;

    // <timestamp>1602869947</timestamp>
    writer
        .create_element("timestamp")
        .write_text_content(BytesText::new(&data.timestamp.to_string()))?;

    // <size>123987</size> (maybe)
    if let Some(size) = data.size {
        writer
            .create_element("size")
            .write_text_content(BytesText::new(&size.to_string()))?;
    }

    // <open-size>68652</open-size> (maybe)
    if let Some(open_size) = data.open_size {
        writer
            .create_element("open-size")
            .write_text_content(BytesText::new(&open_size.to_string()))?;
    }

    // <database_version>10</database_version> (maybe)
    if let Some(database_version) = data.database_version {
        writer
            .create_element("database_version")
            .write_text_content(BytesText::new(&database_version.to_string()))?;
    }

    // </data>
    writer.write_event(Event::End(BytesEnd::new("data")))?;

    Ok(())
}

fn read_repomd_xml<R: BufRead>(
    repomd_data: &mut RepomdData,
    reader: Reader<R>,
) -> Result<(), MetadataError> {
    let mut reader = reader;
    let mut event_buf = Vec::new();

    loop {
        match reader.read_event_into(&mut event_buf)? {
            Event::Start(e) => match e.name().as_ref() {
                TAG_REVISION => {
                    let revision = utils::read_element_text(&mut reader, TAG_REVISION)?;
                    repomd_data.set_revision(&revision);
                }
                TAG_DATA => {
                    let data = parse_repomdrecord(&mut reader, &e)?;
                    repomd_data.add_record(data);
                }
                _ => (),
            },
            Event::Eof => break,
            _ => (),
        }
        event_buf.clear();
    }
    Ok(())
}

// <data type="other_db">
//     <checksum type="sha256">fd2ff685b13d5b18b7c16d1316f7ccf299283cdf5db27ab780cb6b855b022000</checksum>
//     <open-checksum type="sha256">fd0619cc82de1a6475c98bd11cdd09e38b359c57a3ef1ab8411e5cc6076cbab8</open-checksum>
//     <location href="repodata/fd2ff685-other.sqlite.bz2"/>
//     <timestamp>1602869947</timestamp>
//     <database_version>10</database_version>
//     <size>78112</size>
//     <open-size>651264</open-size>
// </data>
fn parse_repomdrecord<R: BufRead>(
    reader: &mut Reader<R>,
    open_tag: &BytesStart,
) -> Result<RepomdRecord, MetadataError> {
    let mut record = RepomdRecord::default();
    record.metadata_name = utils::required_attr(open_tag, "type")?;

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                TAG_CHECKSUM => {
                    let checksum_type = utils::required_attr(&e, "type")?;
                    let checksum_value = utils::read_element_text(reader, TAG_CHECKSUM)?;
                    record.checksum =
                        Checksum::try_create(checksum_type.as_str(), checksum_value.as_str())?;
                }
                TAG_OPEN_CHECKSUM => {
                    let checksum_type = utils::required_attr(&e, "type")?;
                    let checksum_value = utils::read_element_text(reader, TAG_OPEN_CHECKSUM)?;
                    record.open_checksum = Some(Checksum::try_create(
                        checksum_type.as_str(),
                        checksum_value.as_str(),
                    )?);
                }
                TAG_LOCATION => {
                    record.location_href = utils::required_attr(&e, "href")?.into();
                }
                TAG_TIMESTAMP => {
                    record.timestamp = utils::read_element_text(reader, TAG_TIMESTAMP)?.parse()?;
                }
                TAG_SIZE => {
                    record.size = Some(utils::read_element_text(reader, TAG_SIZE)?.parse()?);
                }
                TAG_OPEN_SIZE => {
                    record.open_size =
                        Some(utils::read_element_text(reader, TAG_OPEN_SIZE)?.parse()?);
                }
                TAG_DATABASE_VERSION => {
                    record.database_version =
                        Some(utils::read_element_text(reader, TAG_DATABASE_VERSION)?.parse()?);
                }
                _ => (),
            },
            Event::End(e) if e.name().as_ref() == TAG_DATA => break,
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ChecksumType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_repomd_roundtrip() -> Result<(), MetadataError> {
        let mut repomd = RepomdData::default();
        repomd.set_revision("1615686706");

        let mut record = RepomdRecord::default();
        record.metadata_name = "primary".to_owned();
        record.location_href = "repodata/primary.xml.gz".into();
        record.timestamp = 1602869947;
        record.size = Some(123987);
        record.open_size = Some(651264);
        record.checksum = Checksum::Sha256(
            "fd2ff685b13d5b18b7c16d1316f7ccf299283cdf5db27ab780cb6b855b022000".to_owned(),
        );
        record.open_checksum = Some(Checksum::Sha256(
            "fd0619cc82de1a6475c98bd11cdd09e38b359c57a3ef1ab8411e5cc6076cbab8".to_owned(),
        ));
        repomd.add_record(record);

        let mut buf = Vec::new();
        RepomdXml::write_data(&repomd, &mut Writer::new(&mut buf))?;

        let xml = String::from_utf8(buf.clone()).unwrap();
        assert!(xml.contains("<data type=\"primary\">"));
        assert!(xml.contains("<location href=\"repodata/primary.xml.gz\"/>"));
        assert!(xml.contains("<revision>1615686706</revision>"));

        let mut reader = Reader::from_reader(&buf[..]);
        utils::configure_xml_reader(&mut reader);
        let parsed = RepomdXml::read_data(reader)?;

        assert_eq!(parsed.revision(), Some("1615686706"));
        let parsed_record = parsed.get_record("primary").unwrap();
        assert_eq!(
            parsed_record.checksum.checksum_type(),
            Some(ChecksumType::Sha256)
        );
        assert_eq!(
            parsed_record.location_href.to_str().unwrap(),
            "repodata/primary.xml.gz"
        );
        assert_eq!(parsed_record.size, Some(123987));
        assert_eq!(parsed_record.open_size, Some(651264));
        Ok(())
    }
}
