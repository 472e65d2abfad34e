//! # stream-unzip: Streaming ZIP Archive Reader
//!
//! `stream-unzip` reads ZIP archives through a random-access source
//! abstraction and streams decompressed entry data to arbitrary sinks.
//! Works equally well over an in-memory buffer, a local file, or anything
//! else that can serve bounded reads at absolute offsets.
//!
//! ## Features
//!
//! - **Random-access sources**: only the archive tail and the requested
//!   entries are ever read
//! - **Streaming extraction**: bounded-size chunks from source to sink,
//!   constant memory regardless of entry size
//! - **ZIP64**: archives over 4 GiB and past the classic entry limits
//! - **Encryption**: AES-256 (WinZip AE-2) and legacy password protection
//! - **Integrity**: optional CRC-32 verification, progress reporting
//!
//! ## Quick Start
//!
//! ```no_run
//! use stream_unzip::{DataOptions, FileSource, VecSink, ZipReader};
//!
//! # async fn example() -> Result<(), stream_unzip::ZipReadError> {
//! let reader = ZipReader::new(FileSource::open("archive.zip")?);
//!
//! // List all entries
//! for entry in reader.get_entries().await? {
//!     println!("{}: {} bytes", entry.filename, entry.uncompressed_size);
//! }
//!
//! // Extract a specific file
//! if let Some(entry) = reader.find_entry("file.txt").await? {
//!     let mut sink = VecSink::new();
//!     let data = reader.get_data(&entry, &mut sink, DataOptions::new()).await?;
//!     println!("{} bytes extracted", data.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
mod crypto;
mod directory;
pub mod entry;
pub mod error;
mod extra;
mod format;
pub mod options;
mod reader;
mod scan;
pub mod sink;
pub mod source;

pub use codec::{Codec, CodecConfig, CodecFactory, CodecFlush, EncryptionMode};
pub use entry::{CompressionMethod, Entry, GeneralPurposeFlags, TextEncoding};
pub use error::{Result, ZipReadError};
pub use extra::{AesExtra, UnicodePathExtra, Zip64Extra};
pub use options::{DataOptions, EntriesOptions, ProgressCallback, ReaderOptions};
pub use reader::ZipReader;
pub use sink::{FileSink, Sink, VecSink};
pub use source::{FileSource, MemorySource, RandomSource};
