//! Normalized entry records.
//!
//! [`Entry`] is the immutable view of one central-directory record after
//! ZIP64 promotion, AES unwrapping, text decoding and extra-field
//! decoding. [`LocalHeader`] is the transient counterpart parsed from the
//! local file header when an entry is opened for extraction; the two are
//! cross-validated before any data is read.

use chrono::NaiveDateTime;
use codepage_437::{BorrowFromCp437, CP437_CONTROL};
use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::extra::{self, AesExtra, UnicodePathExtra, Zip64Extra};
use crate::format::CommonHeader;

/// Compression methods understood by the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// No compression (method 0)
    Store,
    /// Raw DEFLATE (method 8)
    Deflate,
    /// Anything else; extraction rejects it
    Unsupported(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Store,
            8 => CompressionMethod::Deflate,
            other => CompressionMethod::Unsupported(other),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Store => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unsupported(value) => *value,
        }
    }
}

/// Fallback charset for names and comments when the UTF-8 flag is unset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// IBM code page 437, the historical ZIP default
    #[default]
    Cp437,
    /// Treat the raw bytes as UTF-8 (lossy)
    Utf8,
}

/// Decode filename/comment bytes: UTF-8 when the language-encoding flag is
/// set, the caller's fallback charset otherwise.
pub fn decode_text(raw: &[u8], utf8_flag: bool, fallback: TextEncoding) -> String {
    if utf8_flag || fallback == TextEncoding::Utf8 {
        String::from_utf8_lossy(raw).into_owned()
    } else {
        let decoded: Cow<str> = Cow::borrow_from_cp437(raw, &CP437_CONTROL);
        decoded.into_owned()
    }
}

/// Decoded general-purpose bit flag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeneralPurposeFlags {
    /// Bit 0: entry payload is encrypted
    pub encrypted: bool,
    /// Bits 1-2: compression level hint
    pub level: u8,
    /// Bit 3: CRC and sizes live in a trailing data descriptor
    pub data_descriptor: bool,
    /// Bit 11: filename and comment are UTF-8
    pub language_encoding_flag: bool,
    /// Set for DEFLATE entries without the bit-4 marker
    pub enhanced_deflating: bool,
}

impl GeneralPurposeFlags {
    pub fn from_raw(raw: u16, compression_method: u16) -> Self {
        Self {
            encrypted: raw & 0x0001 != 0,
            level: ((raw >> 1) & 0x0003) as u8,
            data_descriptor: raw & 0x0008 != 0,
            language_encoding_flag: raw & 0x0800 != 0,
            enhanced_deflating: compression_method == 8 && raw & 0x0010 == 0,
        }
    }
}

/// One archived file, as recorded in the central directory.
///
/// Produced by `ZipReader::get_entries` and immutable thereafter. Sizes and
/// the header offset are already ZIP64-promoted, and `compression_method`
/// is the effective method after AES unwrapping.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Byte offset of the local file header inside the archive
    pub offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// Effective method after AES unwrap
    pub compression_method: CompressionMethod,
    /// Method as recorded in the directory (99 for AES envelopes)
    pub raw_compression_method: u16,
    /// Expected CRC-32 of the plaintext, 0 when not verified
    pub signature: u32,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub bit_flag: GeneralPurposeFlags,
    /// Mirrors `bit_flag.encrypted`
    pub encrypted: bool,
    pub last_mod_date: Option<NaiveDateTime>,
    pub raw_last_mod_time: u16,
    pub raw_last_mod_date: u16,
    pub filename: String,
    pub comment: String,
    pub raw_filename: Vec<u8>,
    pub raw_comment: Vec<u8>,
    pub raw_extra_field: Vec<u8>,
    /// External attributes directory bit, or a filename ending in `/`
    pub directory: bool,
    pub external_attributes: u32,
    /// Extra-field payloads by tag, first occurrence of each tag kept
    pub extra_field: BTreeMap<u16, Vec<u8>>,
    pub extra_field_zip64: Option<Zip64Extra>,
    pub extra_field_unicode_path: Option<UnicodePathExtra>,
    pub extra_field_aes: Option<AesExtra>,
}

impl Entry {
    /// True for entries storing actual file bytes
    pub fn is_file(&self) -> bool {
        !self.directory
    }
}

/// Transient record parsed from a local file header at extraction time
#[derive(Debug)]
pub struct LocalHeader {
    pub version_needed: u16,
    pub bit_flag: GeneralPurposeFlags,
    pub raw_compression_method: u16,
    pub raw_last_mod_time: u16,
    pub raw_last_mod_date: u16,
    pub filename_length: u16,
    pub extra_field_length: u16,
    pub extra_field: BTreeMap<u16, Vec<u8>>,
    pub aes: Option<AesExtra>,
}

impl LocalHeader {
    /// Assemble from the fixed header plus the raw extra-field region
    pub fn from_parts(common: CommonHeader, raw_extra: &[u8]) -> Self {
        let extra_field = extra::parse_extra_fields(raw_extra);
        let aes = extra_field
            .get(&extra::TAG_AES)
            .and_then(|data| AesExtra::decode(data));

        Self {
            version_needed: common.version_needed,
            bit_flag: GeneralPurposeFlags::from_raw(
                common.raw_bit_flag,
                common.raw_compression_method,
            ),
            raw_compression_method: common.raw_compression_method,
            raw_last_mod_time: common.raw_last_mod_time,
            raw_last_mod_date: common.raw_last_mod_date,
            filename_length: common.filename_length,
            extra_field_length: common.extra_field_length,
            extra_field,
            aes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cp437_fallback_decodes_high_bytes() {
        assert_eq!(decode_text(&[0x82], false, TextEncoding::Cp437), "é");
        assert_eq!(decode_text(&[0x82], false, TextEncoding::Utf8), "\u{FFFD}");
    }

    #[test]
    fn utf8_flag_overrides_fallback() {
        assert_eq!(
            decode_text("é".as_bytes(), true, TextEncoding::Cp437),
            "é"
        );
    }

    #[test]
    fn bit_flag_decoding() {
        let flags = GeneralPurposeFlags::from_raw(0x0809, 8);
        assert!(flags.encrypted);
        assert!(flags.data_descriptor);
        assert!(flags.language_encoding_flag);
        assert!(flags.enhanced_deflating);
        assert_eq!(flags.level, 0);

        let flags = GeneralPurposeFlags::from_raw(0x0016, 8);
        assert_eq!(flags.level, 3);
        assert!(!flags.enhanced_deflating);

        // Marker only applies to DEFLATE entries
        let flags = GeneralPurposeFlags::from_raw(0x0000, 0);
        assert!(!flags.enhanced_deflating);
    }
}
