//! Error types for stream-unzip

use thiserror::Error;

/// Result type for reader operations
pub type Result<T> = std::result::Result<T, ZipReadError>;

/// Errors surfaced while parsing an archive or extracting an entry
#[derive(Debug, Error)]
pub enum ZipReadError {
    /// I/O error from the underlying source or sink
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive too small, or a parsed region is inconsistent with the archive bounds
    #[error("bad archive format: {0}")]
    BadFormat(&'static str),

    /// End of central directory signature absent from the tail scan
    #[error("end of central directory record not found")]
    EocdrNotFound,

    /// ZIP64 end of central directory signature absent at the locator target
    #[error("ZIP64 end of central directory record not found")]
    EocdrZip64NotFound,

    /// ZIP64 locator signature absent immediately before the EOCD
    #[error("ZIP64 end of central directory locator not found")]
    EocdrLocatorZip64NotFound,

    /// Central file header signature absent at the expected offset
    #[error("central directory header not found")]
    CentralDirectoryNotFound,

    /// Local file header signature absent at the entry offset
    #[error("local file header not found")]
    LocalFileHeaderNotFound,

    /// A 32-bit sentinel field had no 64-bit value in the ZIP64 extra field
    #[error("ZIP64 extra field missing a required value")]
    ExtraFieldZip64NotFound,

    /// Entry is encrypted but no password was supplied
    #[error("entry is encrypted and no password was supplied")]
    Encrypted,

    /// AES strength other than AES-256
    #[error("unsupported encryption strength: {0}")]
    UnsupportedEncryption(u8),

    /// Compression method outside {STORE, DEFLATE}, or AES wrapping violated
    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    /// CRC-32 of the decompressed data did not match the recorded value
    #[error("CRC-32 mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    InvalidSignature { expected: u32, computed: u32 },

    /// Password verification failed (AES authenticity or legacy preamble)
    #[error("invalid password")]
    InvalidPassword,
}
