//! The archive reader.
//!
//! [`ZipReader`] ties the pieces together: it owns a shared
//! [`RandomSource`], enumerates entries through the directory parser, and
//! streams any entry's plaintext into a caller-supplied [`Sink`] through a
//! per-extraction [`Codec`]. The reader holds no mutable state, so one
//! reader may serve concurrent extractions of any entries.

use log::debug;
use std::sync::Arc;

use crate::codec::{self, Codec, CodecConfig, EncryptionMode};
use crate::directory;
use crate::entry::{decode_text, CompressionMethod, Entry, LocalHeader};
use crate::error::{Result, ZipReadError};
use crate::extra::{AES_SENTINEL_METHOD, AES_STRENGTH_256};
use crate::format::{self, CommonHeader};
use crate::options::{
    DataOptions, EntriesOptions, ProgressCallback, ReaderOptions, ResolvedDataOptions,
};
use crate::sink::Sink;
use crate::source::RandomSource;

/// Streaming ZIP reader over a random-access source
pub struct ZipReader<R: RandomSource> {
    source: Arc<R>,
    options: ReaderOptions,
}

impl<R: RandomSource> ZipReader<R> {
    /// Wrap a source with default options
    pub fn new(source: R) -> Self {
        Self::with_options(source, ReaderOptions::default())
    }

    pub fn with_options(source: R, options: ReaderOptions) -> Self {
        Self {
            source: Arc::new(source),
            options,
        }
    }

    /// Share an existing source, e.g. across several readers
    pub fn from_shared(source: Arc<R>, options: ReaderOptions) -> Self {
        Self { source, options }
    }

    /// The underlying source
    pub fn source(&self) -> &Arc<R> {
        &self.source
    }

    /// Enumerate the central directory with the reader's default options.
    ///
    /// Idempotent: the source is re-read on every call and the returned
    /// entries preserve central-directory order.
    pub async fn get_entries(&self) -> Result<Vec<Entry>> {
        self.get_entries_with(EntriesOptions::default()).await
    }

    pub async fn get_entries_with(&self, options: EntriesOptions) -> Result<Vec<Entry>> {
        self.source.init().await?;
        let resolved = self.options.resolve_entries(options);
        directory::read_directory(self.source.as_ref(), resolved).await
    }

    /// Look up one entry by its decoded filename
    pub async fn find_entry(&self, filename: &str) -> Result<Option<Entry>> {
        let entries = self.get_entries().await?;
        Ok(entries.into_iter().find(|entry| entry.filename == filename))
    }

    /// The archive comment from the EOCD record, decoded with the
    /// reader's fallback charset
    pub async fn get_comment(&self) -> Result<String> {
        self.source.init().await?;
        let raw = directory::read_eocd_comment(self.source.as_ref()).await?;
        let resolved = self.options.resolve_entries(EntriesOptions::default());
        Ok(decode_text(&raw, false, resolved.comment_encoding))
    }

    /// Extract one entry, streaming its plaintext into `sink`.
    ///
    /// Chunks reach the sink in ascending source-offset order and the
    /// progress callback sees monotonically non-decreasing byte counts.
    /// The sink's own result is returned on success; on error, partial
    /// sink output is invalid.
    pub async fn get_data<S: Sink>(
        &self,
        entry: &Entry,
        sink: &mut S,
        options: DataOptions,
    ) -> Result<S::Output> {
        self.source.init().await?;
        let resolved = self.options.resolve_data(options);

        let local = self.read_local_header(entry).await?;
        cross_validate(entry, &local)?;

        let input_encrypted = entry.bit_flag.encrypted && local.bit_flag.encrypted;

        if let Some(aes) = &entry.extra_field_aes {
            if aes.strength != AES_STRENGTH_256 {
                return Err(ZipReadError::UnsupportedEncryption(aes.strength));
            }
            if entry.raw_compression_method != AES_SENTINEL_METHOD {
                return Err(ZipReadError::UnsupportedCompression(
                    entry.raw_compression_method,
                ));
            }
        }

        let compressed = match entry.compression_method {
            CompressionMethod::Store => false,
            CompressionMethod::Deflate => true,
            CompressionMethod::Unsupported(method) => {
                return Err(ZipReadError::UnsupportedCompression(method));
            }
        };

        if input_encrypted && resolved.password.is_none() {
            return Err(ZipReadError::Encrypted);
        }

        let data_offset = entry.offset
            + format::LOCAL_FILE_HEADER_SIZE as u64
            + u64::from(local.filename_length)
            + u64::from(local.extra_field_length);
        if data_offset
            .checked_add(entry.compressed_size)
            .map_or(true, |end| end > self.source.size())
        {
            return Err(ZipReadError::BadFormat("entry data out of bounds"));
        }

        let config = self.codec_config(entry, input_encrypted, compressed, &resolved);
        let mut codec = match &self.options.codec_factory {
            Some(factory) => factory.as_ref()(&config),
            None => codec::create_codec(&config),
        };

        debug!(
            "extracting {:?}: {} compressed bytes at {:#x}",
            entry.filename, entry.compressed_size, data_offset
        );

        codec.init().await?;
        sink.init().await?;
        run_pipeline(
            self.source.as_ref(),
            sink,
            codec.as_mut(),
            data_offset,
            entry.compressed_size,
            resolved.chunk_size,
            resolved.on_progress.as_ref(),
        )
        .await?;

        sink.finalize().await
    }

    async fn read_local_header(&self, entry: &Entry) -> Result<LocalHeader> {
        let fixed = self
            .source
            .read(entry.offset, format::LOCAL_FILE_HEADER_SIZE as u64)
            .await
            .map_err(|_| ZipReadError::LocalFileHeaderNotFound)?;
        if fixed[0..4] != format::LOCAL_FILE_HEADER_SIGNATURE {
            return Err(ZipReadError::LocalFileHeaderNotFound);
        }

        let common = CommonHeader::from_bytes(&fixed[4..])?;
        let filename_length = u64::from(common.filename_length);
        let extra_length = u64::from(common.extra_field_length);

        let variable = self
            .source
            .read(
                entry.offset + format::LOCAL_FILE_HEADER_SIZE as u64,
                filename_length + extra_length,
            )
            .await?;
        let raw_extra = &variable[filename_length as usize..];

        Ok(LocalHeader::from_parts(common, raw_extra))
    }

    fn codec_config(
        &self,
        entry: &Entry,
        input_encrypted: bool,
        compressed: bool,
        resolved: &ResolvedDataOptions,
    ) -> CodecConfig {
        let encryption = if !input_encrypted {
            EncryptionMode::None
        } else if entry.extra_field_aes.is_some() {
            EncryptionMode::Aes
        } else {
            EncryptionMode::ZipCrypto
        };

        // AE-2 records no CRC; the authentication code stands in for it
        let signed = resolved.check_signature
            && !(entry.extra_field_aes.is_some() && entry.signature == 0);

        // Without a CRC in the local header (data descriptor in use), the
        // legacy preamble is checked against the DOS time instead
        let check_byte = if entry.bit_flag.data_descriptor {
            (entry.raw_last_mod_time >> 8) as u8
        } else {
            (entry.signature >> 24) as u8
        };

        CodecConfig {
            password: resolved.password.clone(),
            signed,
            signature: entry.signature,
            compressed,
            encryption,
            check_byte,
        }
    }
}

/// Reject a local header that tells a different story than the directory
fn cross_validate(entry: &Entry, local: &LocalHeader) -> Result<()> {
    if local.aes.is_some() != entry.extra_field_aes.is_some() {
        return Err(ZipReadError::BadFormat(
            "local header disagrees with central directory on AES",
        ));
    }
    if local.raw_compression_method != entry.raw_compression_method {
        return Err(ZipReadError::BadFormat(
            "local header disagrees with central directory on compression method",
        ));
    }
    Ok(())
}

/// Chunked read -> codec -> sink loop with progress reporting
async fn run_pipeline<R: RandomSource + ?Sized, S: Sink>(
    source: &R,
    sink: &mut S,
    codec: &mut dyn Codec,
    start: u64,
    length: u64,
    chunk_size: usize,
    on_progress: Option<&ProgressCallback>,
) -> Result<()> {
    let mut consumed = 0u64;

    while consumed < length {
        let take = (length - consumed).min(chunk_size as u64);
        let chunk = source.read(start + consumed, take).await?;
        let output = codec.append(&chunk).await?;
        if !output.is_empty() {
            sink.write(output).await?;
        }
        consumed += take;
        if let Some(callback) = on_progress {
            callback.as_ref()(consumed, length);
        }
    }

    let flush = codec.flush().await?;
    if !flush.data.is_empty() {
        sink.write(flush.data).await?;
    }

    Ok(())
}
