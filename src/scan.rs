//! Bounded tail scan for ZIP signatures.
//!
//! The EOCD record sits at the very end of an archive, optionally followed
//! by a comment of up to 65535 bytes. The scanner reads the smallest
//! possible tail first and only extends the window when the signature is
//! not there, always taking the LAST occurrence so a comment containing
//! signature-shaped bytes cannot shadow the real record.

use memchr::memmem;

use crate::error::{Result, ZipReadError};
use crate::source::RandomSource;

/// A located signature: its absolute offset and the window bytes from the
/// signature to the end of the archive.
#[derive(Debug)]
pub struct ScanHit {
    pub offset: u64,
    pub buffer: Vec<u8>,
}

/// Find the last occurrence of `signature` within the final
/// `minimum_bytes + maximum_length` bytes of the source.
///
/// Returns `Ok(None)` when the signature is absent from the widest window;
/// callers map that to their own not-found error. A source smaller than
/// `minimum_bytes` cannot contain the record at all and is `BadFormat`.
pub async fn seek_signature<R: RandomSource + ?Sized>(
    source: &R,
    signature: [u8; 4],
    minimum_bytes: u64,
    maximum_length: u64,
) -> Result<Option<ScanHit>> {
    let size = source.size();
    if size < minimum_bytes {
        return Err(ZipReadError::BadFormat("archive smaller than record"));
    }

    if let Some(hit) = scan_window(source, signature, size, minimum_bytes).await? {
        return Ok(Some(hit));
    }

    let widened = (minimum_bytes + maximum_length).min(size);
    if widened > minimum_bytes {
        if let Some(hit) = scan_window(source, signature, size, widened).await? {
            return Ok(Some(hit));
        }
    }

    Ok(None)
}

async fn scan_window<R: RandomSource + ?Sized>(
    source: &R,
    signature: [u8; 4],
    size: u64,
    window: u64,
) -> Result<Option<ScanHit>> {
    let start = size - window;
    let buffer = source.read(start, window).await?;

    Ok(memmem::rfind(&buffer, &signature).map(|position| ScanHit {
        offset: start + position as u64,
        buffer: buffer[position..].to_vec(),
    }))
}
