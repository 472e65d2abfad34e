//! Central directory discovery and parsing.
//!
//! ZIP files are read from the end: find the EOCD in the tail, escalate to
//! the ZIP64 locator and record when the classic fields carry sentinels,
//! then fetch the whole central directory in one bounded read and walk it
//! into [`Entry`] records. The walk is strict about fixed headers and
//! tolerant inside extra fields.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};

use crate::entry::{decode_text, CompressionMethod, Entry, GeneralPurposeFlags};
use crate::error::{Result, ZipReadError};
use crate::extra::{self, AesExtra, UnicodePathExtra, Zip64Extra, Zip64Needs};
use crate::format::{
    self, CommonHeader, EndOfCentralDirectory, Zip64Eocd, Zip64EocdLocator,
};
use crate::options::ResolvedEntriesOptions;
use crate::scan;
use crate::source::RandomSource;

pub(crate) async fn read_directory<R: RandomSource + ?Sized>(
    source: &R,
    options: ResolvedEntriesOptions,
) -> Result<Vec<Entry>> {
    let hit = scan::seek_signature(
        source,
        format::EOCD_SIGNATURE,
        format::EOCD_SIZE as u64,
        format::MAX_COMMENT_SIZE,
    )
    .await?
    .ok_or(ZipReadError::EocdrNotFound)?;

    let eocd = EndOfCentralDirectory::from_bytes(&hit.buffer)?;
    trace!("EOCD at {:#x}: {:?}", hit.offset, eocd);

    let (total_entries, directory_size, directory_offset) = if eocd.needs_zip64() {
        resolve_zip64(source, hit.offset).await?
    } else {
        (
            u64::from(eocd.total_entries),
            u64::from(eocd.directory_size),
            u64::from(eocd.directory_offset),
        )
    };

    if directory_offset
        .checked_add(directory_size)
        .map_or(true, |end| end > source.size())
    {
        return Err(ZipReadError::BadFormat("central directory out of bounds"));
    }
    let minimum_size = total_entries
        .checked_mul(format::CENTRAL_FILE_HEADER_SIZE as u64)
        .ok_or(ZipReadError::BadFormat("central directory out of bounds"))?;
    if directory_size < minimum_size {
        return Err(ZipReadError::BadFormat(
            "central directory too small for its entry count",
        ));
    }

    debug!(
        "central directory: {} entries, {} bytes at {:#x}",
        total_entries, directory_size, directory_offset
    );

    let directory = source.read(directory_offset, directory_size).await?;
    walk_directory(&directory, total_entries, options)
}

/// Fetch just the archive comment trailing the EOCD record
pub(crate) async fn read_eocd_comment<R: RandomSource + ?Sized>(source: &R) -> Result<Vec<u8>> {
    let hit = scan::seek_signature(
        source,
        format::EOCD_SIGNATURE,
        format::EOCD_SIZE as u64,
        format::MAX_COMMENT_SIZE,
    )
    .await?
    .ok_or(ZipReadError::EocdrNotFound)?;

    let eocd = EndOfCentralDirectory::from_bytes(&hit.buffer)?;
    Ok(slice_comment(&hit.buffer, eocd.comment_length))
}

/// The comment occupies whatever follows the 22 fixed EOCD bytes, bounded
/// by its declared length and the end of the scan window
fn slice_comment(buffer: &[u8], comment_length: u16) -> Vec<u8> {
    let start = format::EOCD_SIZE.min(buffer.len());
    let end = (format::EOCD_SIZE + comment_length as usize).min(buffer.len());
    buffer[start..end].to_vec()
}

/// Follow the ZIP64 locator and record to 64-bit directory geometry.
///
/// Only the 56-byte fixed portion of the ZIP64 EOCD is consulted, and the
/// directory start is derived as record offset minus directory size rather
/// than trusting the record's own offset field.
async fn resolve_zip64<R: RandomSource + ?Sized>(
    source: &R,
    eocd_offset: u64,
) -> Result<(u64, u64, u64)> {
    let locator_offset = eocd_offset
        .checked_sub(format::ZIP64_EOCD_LOCATOR_SIZE as u64)
        .ok_or(ZipReadError::EocdrLocatorZip64NotFound)?;
    let locator_bytes = source
        .read(locator_offset, format::ZIP64_EOCD_LOCATOR_SIZE as u64)
        .await?;
    let locator = Zip64EocdLocator::from_bytes(&locator_bytes)?;
    trace!("ZIP64 locator at {:#x}: {:?}", locator_offset, locator);

    if locator
        .eocd_offset
        .checked_add(format::ZIP64_EOCD_SIZE as u64)
        .filter(|end| *end <= source.size())
        .is_none()
    {
        return Err(ZipReadError::EocdrZip64NotFound);
    }

    let record_bytes = source
        .read(locator.eocd_offset, format::ZIP64_EOCD_SIZE as u64)
        .await?;
    let record = Zip64Eocd::from_bytes(&record_bytes)?;
    trace!("ZIP64 EOCD: {:?}", record);

    let directory_offset = locator
        .eocd_offset
        .checked_sub(record.directory_size)
        .ok_or(ZipReadError::BadFormat("central directory out of bounds"))?;

    Ok((record.total_entries, record.directory_size, directory_offset))
}

fn walk_directory(
    directory: &[u8],
    total_entries: u64,
    options: ResolvedEntriesOptions,
) -> Result<Vec<Entry>> {
    let mut entries = Vec::with_capacity(total_entries.min(1 << 16) as usize);
    let mut position = 0usize;

    for _ in 0..total_entries {
        let header = directory
            .get(position..position + format::CENTRAL_FILE_HEADER_SIZE)
            .ok_or(ZipReadError::CentralDirectoryNotFound)?;
        if header[0..4] != format::CENTRAL_FILE_HEADER_SIGNATURE {
            return Err(ZipReadError::CentralDirectoryNotFound);
        }

        let version_made_by = LittleEndian::read_u16(&header[4..6]);
        let common = CommonHeader::from_bytes(&header[6..32])?;
        let comment_length = LittleEndian::read_u16(&header[32..34]) as usize;
        let external_attributes = LittleEndian::read_u32(&header[38..42]);
        let local_offset = LittleEndian::read_u32(&header[42..46]);

        let filename_length = common.filename_length as usize;
        let extra_length = common.extra_field_length as usize;
        let variable_start = position + format::CENTRAL_FILE_HEADER_SIZE;
        let variable_end = variable_start + filename_length + extra_length + comment_length;
        let variable = directory
            .get(variable_start..variable_end)
            .ok_or(ZipReadError::BadFormat("truncated central directory"))?;

        let raw_filename = &variable[..filename_length];
        let raw_extra_field = &variable[filename_length..filename_length + extra_length];
        let raw_comment = &variable[filename_length + extra_length..];

        let entry = build_entry(
            common,
            version_made_by,
            external_attributes,
            local_offset,
            raw_filename,
            raw_extra_field,
            raw_comment,
            options,
        )?;
        trace!("entry {:?} at {:#x}", entry.filename, entry.offset);
        entries.push(entry);

        position = variable_end;
    }

    Ok(entries)
}

#[allow(clippy::too_many_arguments)]
fn build_entry(
    common: CommonHeader,
    version_made_by: u16,
    external_attributes: u32,
    local_offset: u32,
    raw_filename: &[u8],
    raw_extra_field: &[u8],
    raw_comment: &[u8],
    options: ResolvedEntriesOptions,
) -> Result<Entry> {
    let bit_flag = GeneralPurposeFlags::from_raw(common.raw_bit_flag, common.raw_compression_method);

    let extra_field = extra::parse_extra_fields(raw_extra_field);

    let needs = Zip64Needs {
        uncompressed_size: common.uncompressed_size == format::SENTINEL_32,
        compressed_size: common.compressed_size == format::SENTINEL_32,
        offset: local_offset == format::SENTINEL_32,
    };
    let zip64 = Zip64Extra::resolve(extra_field.get(&extra::TAG_ZIP64).map(Vec::as_slice), needs)?;
    let extra_field_zip64 = needs.any().then(|| zip64.clone());

    let uncompressed_size = zip64
        .uncompressed_size
        .unwrap_or(u64::from(common.uncompressed_size));
    let compressed_size = zip64
        .compressed_size
        .unwrap_or(u64::from(common.compressed_size));
    let offset = zip64.offset.unwrap_or(u64::from(local_offset));

    let mut filename = decode_text(
        raw_filename,
        bit_flag.language_encoding_flag,
        options.filename_encoding,
    );

    let extra_field_unicode_path = extra_field
        .get(&extra::TAG_UNICODE_PATH)
        .and_then(|data| UnicodePathExtra::decode(data, raw_filename));
    if let Some(unicode_path) = extra_field_unicode_path.as_ref().filter(|path| path.valid) {
        filename = unicode_path.filename.clone();
    }

    let extra_field_aes = extra_field
        .get(&extra::TAG_AES)
        .and_then(|data| AesExtra::decode(data));
    let effective_method = extra_field_aes
        .as_ref()
        .map(|aes| aes.compression_method)
        .unwrap_or(common.raw_compression_method);

    let directory = external_attributes & 0x10 != 0 || filename.ends_with('/');

    let comment = decode_text(
        raw_comment,
        bit_flag.language_encoding_flag,
        options.comment_encoding,
    );

    Ok(Entry {
        offset,
        compressed_size,
        uncompressed_size,
        compression_method: CompressionMethod::from_u16(effective_method),
        raw_compression_method: common.raw_compression_method,
        signature: common.signature,
        version_made_by,
        version_needed: common.version_needed,
        encrypted: bit_flag.encrypted,
        bit_flag,
        last_mod_date: format::decode_dos_datetime(
            common.raw_last_mod_date,
            common.raw_last_mod_time,
        ),
        raw_last_mod_time: common.raw_last_mod_time,
        raw_last_mod_date: common.raw_last_mod_date,
        filename,
        comment,
        raw_filename: raw_filename.to_vec(),
        raw_comment: raw_comment.to_vec(),
        raw_extra_field: raw_extra_field.to_vec(),
        directory,
        external_attributes,
        extra_field,
        extra_field_zip64,
        extra_field_unicode_path,
        extra_field_aes,
    })
}
