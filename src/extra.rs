//! Extra-field region decoding.
//!
//! The extra field is a sequence of `(u16 tag, u16 size, bytes[size])`
//! records. Real-world archives routinely carry malformed tails, so the
//! walk is tolerant: a truncated record ends parsing without failing the
//! entry, and when a tag repeats only the first occurrence is kept.
//!
//! Three tags get decoded views: ZIP64 (0x0001), Info-ZIP Unicode Path
//! (0x7075) and the WinZip AES descriptor (0x9901).

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::collections::BTreeMap;
use std::io::Cursor;

use crate::error::{Result, ZipReadError};

/// ZIP64 extended information tag
pub const TAG_ZIP64: u16 = 0x0001;
/// Info-ZIP Unicode Path tag
pub const TAG_UNICODE_PATH: u16 = 0x7075;
/// WinZip AES extra-field tag
pub const TAG_AES: u16 = 0x9901;

/// AES strength code for AES-256, the only supported strength
pub const AES_STRENGTH_256: u8 = 3;
/// Compression method value signalling AES wrapping
pub const AES_SENTINEL_METHOD: u16 = 99;

/// Walk the TLV region into a tag -> payload map, first occurrence winning
pub fn parse_extra_fields(raw: &[u8]) -> BTreeMap<u16, Vec<u8>> {
    let mut fields = BTreeMap::new();
    let mut rest = raw;

    while rest.len() >= 4 {
        let tag = u16::from_le_bytes([rest[0], rest[1]]);
        let size = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        rest = &rest[4..];
        if size > rest.len() {
            // Malformed tail; keep what was decoded so far
            break;
        }
        fields.entry(tag).or_insert_with(|| rest[..size].to_vec());
        rest = &rest[size..];
    }

    fields
}

/// Which 32-bit directory fields carried the sentinel and need promotion
#[derive(Debug, Clone, Copy, Default)]
pub struct Zip64Needs {
    pub uncompressed_size: bool,
    pub compressed_size: bool,
    pub offset: bool,
}

impl Zip64Needs {
    pub fn any(&self) -> bool {
        self.uncompressed_size || self.compressed_size || self.offset
    }
}

/// Decoded ZIP64 extended information.
///
/// The payload is a sequence of u64 values consumed in the fixed order
/// uncompressed size, compressed size, local header offset — one value per
/// field whose 32-bit counterpart is the sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zip64Extra {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub offset: Option<u64>,
}

impl Zip64Extra {
    /// Consume the u64 values demanded by `needs` from the tag payload.
    ///
    /// `data` is `None` when the tag is absent; a sentinel with no value to
    /// promote it is a hard error.
    pub fn resolve(data: Option<&[u8]>, needs: Zip64Needs) -> Result<Self> {
        let mut extra = Zip64Extra::default();
        if !needs.any() {
            return Ok(extra);
        }

        let data = data.ok_or(ZipReadError::ExtraFieldZip64NotFound)?;
        let mut cursor = Cursor::new(data);
        let mut take = |wanted: bool| -> Result<Option<u64>> {
            if !wanted {
                return Ok(None);
            }
            cursor
                .read_u64::<LittleEndian>()
                .map(Some)
                .map_err(|_| ZipReadError::ExtraFieldZip64NotFound)
        };

        extra.uncompressed_size = take(needs.uncompressed_size)?;
        extra.compressed_size = take(needs.compressed_size)?;
        extra.offset = take(needs.offset)?;
        Ok(extra)
    }
}

/// Decoded Info-ZIP Unicode Path field.
///
/// The embedded CRC is stored big-endian and covers the raw filename bytes
/// as they appear in the central directory; the UTF-8 path only overrides
/// the decoded filename when the CRC matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnicodePathExtra {
    pub version: u8,
    pub name_crc32: u32,
    pub filename: String,
    pub valid: bool,
}

impl UnicodePathExtra {
    pub fn decode(data: &[u8], raw_filename: &[u8]) -> Option<Self> {
        if data.len() < 5 {
            return None;
        }
        let mut cursor = Cursor::new(data);
        let version = cursor.read_u8().ok()?;
        let name_crc32 = cursor.read_u32::<BigEndian>().ok()?;
        let filename = String::from_utf8(data[5..].to_vec()).ok()?;
        let valid = crc32fast::hash(raw_filename) == name_crc32;

        Some(Self {
            version,
            name_crc32,
            filename,
            valid,
        })
    }
}

/// Decoded WinZip AES descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AesExtra {
    pub vendor_version: u16,
    pub vendor_id: u16,
    pub strength: u8,
    /// The real compression method wrapped inside the AES envelope
    pub compression_method: u16,
}

impl AesExtra {
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 7 {
            return None;
        }
        let mut cursor = Cursor::new(data);
        Some(Self {
            vendor_version: cursor.read_u16::<LittleEndian>().ok()?,
            vendor_id: cursor.read_u16::<LittleEndian>().ok()?,
            strength: cursor.read_u8().ok()?,
            compression_method: cursor.read_u16::<LittleEndian>().ok()?,
        })
    }
}
