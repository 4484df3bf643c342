//! Hand-parsed ZIP structures for the ranged reader. The `zip` crate needs a
//! seekable stream, which a ranged remote cannot offer, so the central
//! directory plumbing is decoded from fetched byte slices instead.

use std::collections::BTreeMap;

use webarchive_common::{Error, Result};

pub const EOCD_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];
pub const CD_HEADER_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x01, 0x02];
pub const LOCAL_HEADER_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
pub const ZIP64_EOCD_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x06, 0x06];
pub const ZIP64_EOCD_LOCATOR_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x06, 0x07];

pub const EOCD_RECORD_SIZE: usize = 22;
pub const ZIP64_EOCD_RECORD_SIZE: usize = 56;
pub const ZIP64_EOCD_LOCATOR_SIZE: usize = 20;
pub const LOCAL_HEADER_PREFIX_SIZE: usize = 30;

const ZIP64_EXTRA_FIELD_TAG: u16 = 0x0001;

/// One central-directory entry the ranged reader keeps around.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CdEntry {
    pub header_offset: u64,
    pub compressed_size: u64,
}

/// Finds the last EOCD signature within the fetched tail of the file.
pub fn find_eocd(search_range: &[u8]) -> Result<usize> {
    search_range
        .windows(4)
        .rposition(|window| window == EOCD_SIGNATURE)
        .ok_or_else(|| Error::ZipCorruption("end of central directory not found".to_owned()))
}

/// Whether the EOCD carries any of the ZIP64 overflow markers.
pub fn is_zip64(eocd: &[u8]) -> Result<bool> {
    if !eocd.starts_with(&EOCD_SIGNATURE) {
        return Err(Error::ZipCorruption("EOCD signature not found".to_owned()));
    }

    let total_entries = le_u16(eocd, 8)?;
    let total_entries_on_disk = le_u16(eocd, 10)?;
    let cd_size = le_u32(eocd, 12)?;
    let cd_offset = le_u32(eocd, 16)?;

    Ok(total_entries == 0xFFFF
        || total_entries_on_disk == 0xFFFF
        || cd_size == 0xFFFF_FFFF
        || cd_offset == 0xFFFF_FFFF)
}

/// Returns `(cd_start, cd_size)` from a classic EOCD record.
pub fn parse_eocd(eocd: &[u8]) -> Result<(u64, u64)> {
    let cd_size = le_u32(eocd, 12)? as u64;
    let cd_start = le_u32(eocd, 16)? as u64;
    Ok((cd_start, cd_size))
}

/// Extracts the ZIP64 EOCD offset out of the 20-byte locator.
pub fn parse_zip64_locator(locator: &[u8]) -> Result<u64> {
    if !locator.starts_with(&ZIP64_EOCD_LOCATOR_SIGNATURE) {
        return Err(Error::ZipCorruption(
            "ZIP64 EOCD locator not found".to_owned(),
        ));
    }
    le_u64(locator, 8)
}

/// Returns `(cd_start, cd_size)` from a ZIP64 EOCD record.
pub fn parse_zip64_eocd(eocd: &[u8]) -> Result<(u64, u64)> {
    if !eocd.starts_with(&ZIP64_EOCD_SIGNATURE) {
        return Err(Error::ZipCorruption(
            "ZIP64 EOCD signature not found".to_owned(),
        ));
    }
    let cd_size = le_u64(eocd, 40)?;
    let cd_start = le_u64(eocd, 48)?;
    Ok((cd_start, cd_size))
}

/// Walks central-directory headers, resolving ZIP64 extra fields where the
/// 32-bit size or offset columns overflow.
pub fn parse_central_directory(cd: &[u8]) -> Result<BTreeMap<String, CdEntry>> {
    let mut entries = BTreeMap::new();
    let mut offset = 0usize;

    while offset + 46 <= cd.len() {
        if cd[offset..offset + 4] != CD_HEADER_SIGNATURE {
            break;
        }

        let compressed_size = le_u32(cd, offset + 20)?;
        let uncompressed_size = le_u32(cd, offset + 24)?;
        let name_len = le_u16(cd, offset + 28)? as usize;
        let extra_len = le_u16(cd, offset + 30)? as usize;
        let comment_len = le_u16(cd, offset + 32)? as usize;
        let header_offset = le_u32(cd, offset + 42)?;

        let name_start = offset + 46;
        let extra_start = name_start + name_len;
        let entry_end = extra_start + extra_len + comment_len;
        if entry_end > cd.len() {
            return Err(Error::ZipCorruption(
                "truncated central directory entry".to_owned(),
            ));
        }

        let name = String::from_utf8_lossy(&cd[name_start..extra_start]).into_owned();
        let extra = &cd[extra_start..extra_start + extra_len];

        let (compressed_size, header_offset) = if compressed_size == 0xFFFF_FFFF
            || header_offset == 0xFFFF_FFFF
        {
            resolve_zip64_extra(extra, uncompressed_size, compressed_size, header_offset)?
        } else {
            (compressed_size as u64, header_offset as u64)
        };

        entries.insert(
            name,
            CdEntry {
                header_offset,
                compressed_size,
            },
        );

        offset = entry_end;
    }

    Ok(entries)
}

/// Resolves 64-bit sizes/offsets from the ZIP64 extra field (tag 0x0001).
/// The field only carries the columns that actually overflowed, in the fixed
/// uncompressed/compressed/offset order.
fn resolve_zip64_extra(
    extra: &[u8],
    uncompressed_size: u32,
    compressed_size: u32,
    header_offset: u32,
) -> Result<(u64, u64)> {
    let mut at = 0usize;

    while at + 4 <= extra.len() {
        let tag = le_u16(extra, at)?;
        let size = le_u16(extra, at + 2)? as usize;
        let data_start = at + 4;

        if tag == ZIP64_EXTRA_FIELD_TAG {
            let data = extra
                .get(data_start..data_start + size)
                .ok_or_else(|| Error::ZipCorruption("truncated ZIP64 extra field".to_owned()))?;
            let mut cursor = 0usize;

            if uncompressed_size == 0xFFFF_FFFF {
                cursor += 8;
            }

            let compressed = if compressed_size == 0xFFFF_FFFF {
                let value = le_u64(data, cursor)?;
                cursor += 8;
                value
            } else {
                compressed_size as u64
            };

            let offset = if header_offset == 0xFFFF_FFFF {
                le_u64(data, cursor)?
            } else {
                header_offset as u64
            };

            return Ok((compressed, offset));
        }

        at = data_start + size;
    }

    Err(Error::ZipCorruption(
        "ZIP64 extra field not found for oversized entry".to_owned(),
    ))
}

/// Computes where member data starts, given the 30-byte local header prefix.
pub fn local_header_data_offset(header: &[u8]) -> Result<u64> {
    if !header.starts_with(&LOCAL_HEADER_SIGNATURE) {
        return Err(Error::ZipCorruption(
            "invalid local file header signature".to_owned(),
        ));
    }

    let name_len = le_u16(header, 26)? as u64;
    let extra_len = le_u16(header, 28)? as u64;

    Ok(LOCAL_HEADER_PREFIX_SIZE as u64 + name_len + extra_len)
}

fn le_u16(bytes: &[u8], at: usize) -> Result<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| Error::ZipCorruption("short read in ZIP structure".to_owned()))
}

fn le_u32(bytes: &[u8], at: usize) -> Result<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::ZipCorruption("short read in ZIP structure".to_owned()))
}

fn le_u64(bytes: &[u8], at: usize) -> Result<u64> {
    bytes
        .get(at..at + 8)
        .map(|b| u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .ok_or_else(|| Error::ZipCorruption("short read in ZIP structure".to_owned()))
}
