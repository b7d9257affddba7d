// SPDX-FileCopyrightText: 2024-2026 apticket contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Ranged reads of single entries from a remote zip archive.
//!
//! Firmware archives are multi-gigabyte files, but the build manifest needed
//! for a signing request is a few hundred kilobytes. This reader fetches the
//! end-of-central-directory record and central directory with HTTP range
//! requests, then reads just the matching entry. Zip64 archives are
//! supported because firmware archives routinely exceed 4 GiB.

use std::io::{self, Read};

use flate2::read::DeflateDecoder;
use memchr::memmem;
use reqwest::{blocking::Client, header::RANGE, StatusCode};
use thiserror::Error;
use tracing::debug;

pub const EOCD_MAGIC: &[u8; 4] = b"PK\x05\x06";
pub const EOCD64_MAGIC: &[u8; 4] = b"PK\x06\x06";
pub const EOCD64_LOCATOR_MAGIC: &[u8; 4] = b"PK\x06\x07";
pub const CD_ENTRY_MAGIC: &[u8; 4] = b"PK\x01\x02";

const EOCD_SIZE: usize = 22;
const EOCD64_SIZE: usize = 56;
const EOCD64_LOCATOR_SIZE: usize = 20;
const CD_ENTRY_SIZE: usize = 46;
const LOCAL_HEADER_SIZE: usize = 30;
const MAX_COMMENT_SIZE: usize = 65535;

const COMPRESSION_STORED: u16 = 0;
const COMPRESSION_DEFLATE: u16 = 8;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Archive request failed")]
    Http(#[from] reqwest::Error),
    #[error("Archive server returned HTTP {0}")]
    HttpStatus(u16),
    #[error("Archive server does not support range requests")]
    RangeNotSupported,
    #[error("Ranged read returned {actual} bytes, but expected {expected}")]
    TruncatedRead { expected: u64, actual: u64 },
    #[error("Cannot find EOCD magic")]
    EocdMagicNotFound,
    #[error("Cannot find zip64 EOCD locator")]
    Eocd64LocatorNotFound,
    #[error("Invalid central directory entry")]
    InvalidCentralDirectory,
    #[error("Entry not found in archive: {0}")]
    EntryNotFound(String),
    #[error("Unsupported compression method: {0}")]
    UnsupportedCompression(u16),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

fn le_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn le_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn le_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset + 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Some(u64::from_le_bytes(raw))
}

/// Location and size of the central directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CentralDirectory {
    offset: u64,
    size: u64,
}

/// Find the EOCD record in the archive tail and return the central directory
/// location. `tail_offset` is the file offset of `tail[0]`, needed to
/// resolve the zip64 EOCD record that large archives use.
fn find_central_directory(tail: &[u8], tail_offset: u64) -> Result<CentralDirectory> {
    let eocd_pos = memmem::rfind(tail, EOCD_MAGIC).ok_or(Error::EocdMagicNotFound)?;
    let eocd = &tail[eocd_pos..];
    if eocd.len() < EOCD_SIZE {
        return Err(Error::EocdMagicNotFound);
    }

    let cd_size = le_u32(eocd, 12).ok_or(Error::EocdMagicNotFound)?;
    let cd_offset = le_u32(eocd, 16).ok_or(Error::EocdMagicNotFound)?;

    if cd_offset != u32::MAX && cd_size != u32::MAX {
        return Ok(CentralDirectory {
            offset: cd_offset.into(),
            size: cd_size.into(),
        });
    }

    // Zip64: the locator sits immediately before the EOCD and points at the
    // zip64 EOCD record, which should also be inside the fetched tail.
    let locator_pos = eocd_pos
        .checked_sub(EOCD64_LOCATOR_SIZE)
        .ok_or(Error::Eocd64LocatorNotFound)?;
    let locator = &tail[locator_pos..eocd_pos];
    if &locator[..4] != EOCD64_LOCATOR_MAGIC {
        return Err(Error::Eocd64LocatorNotFound);
    }

    let eocd64_offset = le_u64(locator, 8).ok_or(Error::Eocd64LocatorNotFound)?;
    let eocd64_pos = eocd64_offset
        .checked_sub(tail_offset)
        .and_then(|p| usize::try_from(p).ok())
        .ok_or(Error::Eocd64LocatorNotFound)?;
    let eocd64 = tail
        .get(eocd64_pos..eocd64_pos + EOCD64_SIZE)
        .ok_or(Error::Eocd64LocatorNotFound)?;
    if &eocd64[..4] != EOCD64_MAGIC {
        return Err(Error::Eocd64LocatorNotFound);
    }

    Ok(CentralDirectory {
        offset: le_u64(eocd64, 48).ok_or(Error::Eocd64LocatorNotFound)?,
        size: le_u64(eocd64, 40).ok_or(Error::Eocd64LocatorNotFound)?,
    })
}

/// One entry's location as recorded in the central directory.
#[derive(Clone, Debug, PartialEq, Eq)]
struct EntryLocation {
    name: String,
    method: u16,
    compressed_size: u64,
    local_header_offset: u64,
}

/// Scan the central directory for a case-insensitive name match.
fn find_entry(cd: &[u8], name: &str) -> Result<EntryLocation> {
    let mut pos = 0;

    while pos < cd.len() {
        let entry = &cd[pos..];
        if entry.len() < CD_ENTRY_SIZE || &entry[..4] != CD_ENTRY_MAGIC {
            return Err(Error::InvalidCentralDirectory);
        }

        let method = le_u16(entry, 10).ok_or(Error::InvalidCentralDirectory)?;
        let mut compressed_size =
            u64::from(le_u32(entry, 20).ok_or(Error::InvalidCentralDirectory)?);
        let uncompressed_size = le_u32(entry, 24).ok_or(Error::InvalidCentralDirectory)?;
        let name_len = usize::from(le_u16(entry, 28).ok_or(Error::InvalidCentralDirectory)?);
        let extra_len = usize::from(le_u16(entry, 30).ok_or(Error::InvalidCentralDirectory)?);
        let comment_len = usize::from(le_u16(entry, 32).ok_or(Error::InvalidCentralDirectory)?);
        let mut local_header_offset =
            u64::from(le_u32(entry, 42).ok_or(Error::InvalidCentralDirectory)?);

        let entry_name = entry
            .get(CD_ENTRY_SIZE..CD_ENTRY_SIZE + name_len)
            .ok_or(Error::InvalidCentralDirectory)?;
        let extra = entry
            .get(CD_ENTRY_SIZE + name_len..CD_ENTRY_SIZE + name_len + extra_len)
            .ok_or(Error::InvalidCentralDirectory)?;

        // Oversized values live in the zip64 extra field, appearing in a
        // fixed order with only the overflowed fields present.
        if compressed_size == u64::from(u32::MAX) || local_header_offset == u64::from(u32::MAX) {
            let mut extra_pos = 0;
            while extra_pos + 4 <= extra.len() {
                let id = le_u16(extra, extra_pos).ok_or(Error::InvalidCentralDirectory)?;
                let size =
                    usize::from(le_u16(extra, extra_pos + 2).ok_or(Error::InvalidCentralDirectory)?);
                let field = extra
                    .get(extra_pos + 4..extra_pos + 4 + size)
                    .ok_or(Error::InvalidCentralDirectory)?;

                if id == 0x0001 {
                    let mut field_pos = 0;
                    if uncompressed_size == u32::MAX {
                        field_pos += 8;
                    }
                    if compressed_size == u64::from(u32::MAX) {
                        compressed_size =
                            le_u64(field, field_pos).ok_or(Error::InvalidCentralDirectory)?;
                        field_pos += 8;
                    }
                    if local_header_offset == u64::from(u32::MAX) {
                        local_header_offset =
                            le_u64(field, field_pos).ok_or(Error::InvalidCentralDirectory)?;
                    }
                    break;
                }

                extra_pos += 4 + size;
            }
        }

        if let Ok(entry_name) = std::str::from_utf8(entry_name) {
            if entry_name.eq_ignore_ascii_case(name) {
                return Ok(EntryLocation {
                    name: entry_name.to_owned(),
                    method,
                    compressed_size,
                    local_header_offset,
                });
            }
        }

        pos += CD_ENTRY_SIZE + name_len + extra_len + comment_len;
    }

    Err(Error::EntryNotFound(name.to_owned()))
}

fn decompress(method: u16, data: Vec<u8>) -> Result<Vec<u8>> {
    match method {
        COMPRESSION_STORED => Ok(data),
        COMPRESSION_DEFLATE => {
            let mut decoded = Vec::new();
            DeflateDecoder::new(data.as_slice()).read_to_end(&mut decoded)?;
            Ok(decoded)
        }
        m => Err(Error::UnsupportedCompression(m)),
    }
}

/// A remote zip archive reachable over HTTP range requests.
pub struct RemoteZip {
    client: Client,
    url: String,
    len: u64,
}

impl RemoteZip {
    /// Probe the archive size. The server must answer range requests; a
    /// plain 200 means it ignored the range header.
    pub fn open(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let client = Client::builder().build()?;

        let response = client.get(&url).header(RANGE, "bytes=0-0").send()?;
        let status = response.status();
        if status == StatusCode::OK {
            return Err(Error::RangeNotSupported);
        } else if status != StatusCode::PARTIAL_CONTENT {
            return Err(Error::HttpStatus(status.as_u16()));
        }

        // Content-Range: bytes 0-0/<total>
        let len = response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit_once('/'))
            .and_then(|(_, total)| total.parse::<u64>().ok())
            .ok_or(Error::RangeNotSupported)?;

        debug!("Opened remote archive of {len} bytes: {url}");

        Ok(Self { client, url, len })
    }

    fn ranged_get(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={}-{}", offset, offset + len - 1))
            .send()?;
        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(Error::HttpStatus(status.as_u16()));
        }

        let data = response.bytes()?.to_vec();
        if data.len() as u64 != len {
            return Err(Error::TruncatedRead {
                expected: len,
                actual: data.len() as u64,
            });
        }

        Ok(data)
    }

    /// Read and decompress one named entry without downloading the archive.
    pub fn read_entry(&self, name: &str) -> Result<Vec<u8>> {
        let tail_len = self
            .len
            .min((EOCD_SIZE + EOCD64_LOCATOR_SIZE + EOCD64_SIZE + MAX_COMMENT_SIZE) as u64);
        let tail_offset = self.len - tail_len;
        let tail = self.ranged_get(tail_offset, tail_len)?;

        let cd = find_central_directory(&tail, tail_offset)?;
        let cd_data = self.ranged_get(cd.offset, cd.size)?;
        let entry = find_entry(&cd_data, name)?;

        debug!(
            "Reading entry {:?}: method {}, {} bytes compressed",
            entry.name, entry.method, entry.compressed_size,
        );

        // The local header repeats the name and extra field with its own
        // lengths, so it has to be read to find where the data starts.
        let header = self.ranged_get(entry.local_header_offset, LOCAL_HEADER_SIZE as u64)?;
        let name_len = le_u16(&header, 26).ok_or(Error::InvalidCentralDirectory)?;
        let extra_len = le_u16(&header, 28).ok_or(Error::InvalidCentralDirectory)?;

        let data_offset = entry.local_header_offset
            + LOCAL_HEADER_SIZE as u64
            + u64::from(name_len)
            + u64::from(extra_len);
        let compressed = self.ranged_get(data_offset, entry.compressed_size)?;

        decompress(entry.method, compressed)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use flate2::{read::DeflateEncoder, Compression};

    use super::*;

    fn stored_entry(name: &str, data: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut local = Vec::new();
        local.extend_from_slice(b"PK\x03\x04");
        local.extend_from_slice(&[0u8; 10]); // version, flags, method, time, date
        local.extend_from_slice(&[0u8; 4]); // crc32 (unchecked)
        local.extend_from_slice(&(data.len() as u32).to_le_bytes());
        local.extend_from_slice(&(data.len() as u32).to_le_bytes());
        local.extend_from_slice(&(name.len() as u16).to_le_bytes());
        local.extend_from_slice(&0u16.to_le_bytes());
        local.extend_from_slice(name.as_bytes());
        local.extend_from_slice(data);

        (local, data.to_vec())
    }

    fn central_entry(name: &str, data_len: usize, local_offset: u32) -> Vec<u8> {
        let mut entry = Vec::new();
        entry.extend_from_slice(b"PK\x01\x02");
        entry.extend_from_slice(&[0u8; 6]); // versions, flags
        entry.extend_from_slice(&0u16.to_le_bytes()); // stored
        entry.extend_from_slice(&[0u8; 8]); // time, date, crc32
        entry.extend_from_slice(&(data_len as u32).to_le_bytes());
        entry.extend_from_slice(&(data_len as u32).to_le_bytes());
        entry.extend_from_slice(&(name.len() as u16).to_le_bytes());
        entry.extend_from_slice(&[0u8; 12]); // extra/comment lens, disk, attrs
        entry.extend_from_slice(&local_offset.to_le_bytes());
        entry.extend_from_slice(name.as_bytes());
        entry
    }

    fn eocd(entries: u16, cd_size: u32, cd_offset: u32) -> Vec<u8> {
        let mut eocd = Vec::new();
        eocd.extend_from_slice(b"PK\x05\x06");
        eocd.extend_from_slice(&[0u8; 4]); // disk numbers
        eocd.extend_from_slice(&entries.to_le_bytes());
        eocd.extend_from_slice(&entries.to_le_bytes());
        eocd.extend_from_slice(&cd_size.to_le_bytes());
        eocd.extend_from_slice(&cd_offset.to_le_bytes());
        eocd.extend_from_slice(&0u16.to_le_bytes()); // comment len
        eocd
    }

    #[test]
    fn central_directory_location_from_eocd() {
        let (local, data) = stored_entry("BuildManifest.plist", b"manifest data");
        let cd_entry = central_entry("BuildManifest.plist", data.len(), 0);
        let mut archive = local;
        let cd_offset = archive.len() as u32;
        archive.extend_from_slice(&cd_entry);
        archive.extend_from_slice(&eocd(1, cd_entry.len() as u32, cd_offset));

        let cd = find_central_directory(&archive, 0).unwrap();
        assert_eq!(
            cd,
            CentralDirectory {
                offset: cd_offset.into(),
                size: cd_entry.len() as u64,
            }
        );
    }

    #[test]
    fn missing_eocd_magic() {
        assert_matches!(
            find_central_directory(b"not a zip file at all", 0),
            Err(Error::EocdMagicNotFound)
        );
    }

    #[test]
    fn entry_lookup_is_case_insensitive() {
        let cd_entry = central_entry("BuildManifest.plist", 13, 7);

        let entry = find_entry(&cd_entry, "buildmanifest.plist").unwrap();
        assert_eq!(entry.name, "BuildManifest.plist");
        assert_eq!(entry.method, COMPRESSION_STORED);
        assert_eq!(entry.compressed_size, 13);
        assert_eq!(entry.local_header_offset, 7);

        assert_matches!(
            find_entry(&cd_entry, "Restore.plist"),
            Err(Error::EntryNotFound(_))
        );
    }

    #[test]
    fn corrupt_central_directory() {
        assert_matches!(
            find_entry(b"PK\x09\x09garbage", "x"),
            Err(Error::InvalidCentralDirectory)
        );
    }

    #[test]
    fn decompression_methods() {
        assert_eq!(decompress(COMPRESSION_STORED, b"raw".to_vec()).unwrap(), b"raw");

        let mut deflated = Vec::new();
        DeflateEncoder::new(&b"manifest data"[..], Compression::default())
            .read_to_end(&mut deflated)
            .unwrap();
        assert_eq!(
            decompress(COMPRESSION_DEFLATE, deflated).unwrap(),
            b"manifest data"
        );

        assert_matches!(
            decompress(14, Vec::new()),
            Err(Error::UnsupportedCompression(14))
        );
    }
}
