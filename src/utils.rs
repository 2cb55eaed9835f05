// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use digest::Digest;
use md5::Md5;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};

use crate::{Checksum, ChecksumType, CompressionType, MetadataError};

fn hash_reader<D: Digest>(reader: &mut impl Read) -> Result<String, MetadataError> {
    let mut hasher = D::new();
    let mut buffer = [0u8; 8192];

    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn hash_with_type(
    reader: &mut impl Read,
    checksum_type: ChecksumType,
) -> Result<Checksum, MetadataError> {
    let checksum = match checksum_type {
        ChecksumType::Md5 => Checksum::Md5(hash_reader::<Md5>(reader)?),
        ChecksumType::Sha1 => Checksum::Sha1(hash_reader::<Sha1>(reader)?),
        ChecksumType::Sha224 => Checksum::Sha224(hash_reader::<Sha224>(reader)?),
        ChecksumType::Sha256 => Checksum::Sha256(hash_reader::<Sha256>(reader)?),
        ChecksumType::Sha384 => Checksum::Sha384(hash_reader::<Sha384>(reader)?),
        ChecksumType::Sha512 => Checksum::Sha512(hash_reader::<Sha512>(reader)?),
    };
    Ok(checksum)
}

/// Checksum of a file's bytes as stored on disk.
pub fn checksum_file(path: &Path, checksum_type: ChecksumType) -> Result<Checksum, MetadataError> {
    let mut reader = BufReader::new(File::open(path)?);
    hash_with_type(&mut reader, checksum_type)
}

/// Checksum of a compressed file's uncompressed contents.
///
/// Returns `None` if the file is not compressed with a recognized format.
pub fn checksum_inner_file(
    path: &Path,
    checksum_type: ChecksumType,
) -> Result<Option<Checksum>, MetadataError> {
    let (mut reader, format) = match niffler::from_path(path) {
        // too small to hold any compression magic
        Err(niffler::Error::FileTooShort) => return Ok(None),
        result => result?,
    };

    if format == niffler::Format::No {
        return Ok(None);
    }

    Ok(Some(hash_with_type(&mut reader, checksum_type)?))
}

/// Uncompressed size of a compressed file, `None` if the file is not compressed.
pub fn size_inner_file(path: &Path) -> Result<Option<u64>, MetadataError> {
    let (reader, format) = match niffler::from_path(path) {
        Err(niffler::Error::FileTooShort) => return Ok(None),
        result => result?,
    };

    let inner_size = match format {
        niffler::Format::No => None,
        _ => Some(reader.bytes().count() as u64),
    };

    Ok(inner_size)
}

/// Compress `path` next to itself with the given compression, e.g. `primary.sqlite`
/// to `primary.sqlite.bz2`. The original file is left in place.
pub fn compress_file(
    path: &Path,
    compression: CompressionType,
) -> Result<PathBuf, MetadataError> {
    // with no compression the destination would be the source itself
    if compression == CompressionType::None {
        return Ok(path.to_owned());
    }

    let mut filename = path.as_os_str().to_owned();
    filename.push(compression.to_file_extension());
    let compressed_path = PathBuf::from(&filename);

    let mut reader = BufReader::new(File::open(path)?);
    let file = BufWriter::new(File::create(&compressed_path)?);

    let format = match compression {
        CompressionType::Gzip => niffler::compression::Format::Gzip,
        CompressionType::Bz2 => niffler::compression::Format::Bzip,
        CompressionType::Xz => niffler::compression::Format::Lzma,
        CompressionType::None => unreachable!(),
    };

    {
        let mut writer = niffler::get_writer(Box::new(file), format, niffler::Level::Nine)?;
        io::copy(&mut reader, &mut writer)?;
    }

    Ok(compressed_path)
}

/// Copy a file, creating or truncating the destination.
pub fn copy_file(src: &Path, dst: &Path) -> Result<(), MetadataError> {
    std::fs::copy(src, dst)?;
    Ok(())
}

/// Collect the text content of the element whose `Start` event was just read.
pub(crate) fn read_element_text<R: BufRead>(
    reader: &mut Reader<R>,
    end: &[u8],
) -> Result<String, MetadataError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => text.push_str(&e.unescape()?),
            Event::End(e) if e.name().as_ref() == end => break,
            Event::Eof => {
                return Err(MetadataError::InconsistentMetadataError(
                    "document ended mid-element".to_owned(),
                ))
            }
            _ => (),
        }
        buf.clear();
    }
    Ok(text)
}

pub(crate) fn attr_string(
    tag: &BytesStart,
    name: &str,
) -> Result<Option<String>, MetadataError> {
    Ok(tag
        .try_get_attribute(name)?
        .map(|a| a.unescape_value())
        .transpose()?
        .map(|v| v.into_owned()))
}

pub(crate) fn required_attr(
    tag: &BytesStart,
    name: &'static str,
) -> Result<String, MetadataError> {
    attr_string(tag, name)?.ok_or(MetadataError::MissingAttributeError(name))
}

pub(crate) fn configure_xml_reader<R: BufRead>(reader: &mut Reader<R>) {
    let config = reader.config_mut();
    config.expand_empty_elements = true;
    config.trim_text_start = true;
    config.trim_text_end = true;
}

/// An XML reader over a (possibly compressed) file, with compression sniffed
/// from the file's magic bytes.
pub fn xml_reader_from_file(
    path: &Path,
) -> Result<Reader<BufReader<Box<dyn Read>>>, MetadataError> {
    let file = File::open(path)?;
    let (compression_wrapper_reader, _compression) = niffler::get_reader(Box::new(file))?;
    let mut xml_reader = Reader::from_reader(BufReader::new(compression_wrapper_reader));
    configure_xml_reader(&mut xml_reader);
    Ok(xml_reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempdir::TempDir;

    #[test]
    fn test_checksum_file() -> Result<(), MetadataError> {
        let dir = TempDir::new("checksums").unwrap();
        let path = dir.path().join("data");
        File::create(&path)?.write_all(b"hello world\n")?;

        assert_eq!(
            checksum_file(&path, ChecksumType::Sha256)?,
            Checksum::Sha256(
                "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447".to_owned()
            )
        );
        assert_eq!(
            checksum_file(&path, ChecksumType::Sha1)?,
            Checksum::Sha1("22596363b3de40b06f981fb85d82312e8c0ed511".to_owned())
        );
        assert_eq!(
            checksum_file(&path, ChecksumType::Md5)?,
            Checksum::Md5("6f5902ac237024bdd0c176cb93063dc4".to_owned())
        );
        Ok(())
    }

    #[test]
    fn test_compress_file_roundtrip() -> Result<(), MetadataError> {
        let dir = TempDir::new("compress").unwrap();
        let path = dir.path().join("data");
        File::create(&path)?.write_all(b"some file contents")?;

        for compression in [
            CompressionType::Gzip,
            CompressionType::Bz2,
            CompressionType::Xz,
        ] {
            let compressed = compress_file(&path, compression)?;
            assert_eq!(
                compressed.extension().unwrap().to_str().unwrap(),
                compression.to_file_extension().trim_start_matches('.')
            );

            let (mut reader, format) = niffler::from_path(&compressed)?;
            assert_ne!(format, niffler::Format::No);
            let mut contents = Vec::new();
            reader.read_to_end(&mut contents)?;
            assert_eq!(contents, b"some file contents");

            // the uncompressed view matches the original
            assert_eq!(size_inner_file(&compressed)?, Some(18));
            assert_eq!(
                checksum_inner_file(&compressed, ChecksumType::Sha256)?,
                Some(checksum_file(&path, ChecksumType::Sha256)?)
            );
        }

        assert_eq!(size_inner_file(&path)?, None);
        assert_eq!(checksum_inner_file(&path, ChecksumType::Sha256)?, None);
        Ok(())
    }
}
