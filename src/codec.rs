//! Chunk transformation pipeline.
//!
//! A [`Codec`] turns the raw bytes of one entry's compressed stream into
//! plaintext: optional decryption, optional DEFLATE decompression, and
//! CRC-32 accumulation over whatever comes out. The pipeline driver pushes
//! input in bounded chunks and calls `flush` exactly once; any trailing
//! output and the verdict on the recorded CRC arrive there.
//!
//! The default [`EntryCodec`] runs in place, but the factory indirection
//! lets callers substitute a codec that ships the same work to a worker
//! thread. One codec instance serves exactly one extraction.

use async_trait::async_trait;
use flate2::{Decompress, FlushDecompress, Status};
use std::sync::Arc;

use crate::crypto::{AesCtrDecryptor, ZipCryptoDecryptor};
use crate::error::{Result, ZipReadError};

/// How the payload is encrypted, after local/central agreement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    None,
    Aes,
    ZipCrypto,
}

/// Everything a codec needs to know about the stream it will receive
#[derive(Clone)]
pub struct CodecConfig {
    pub password: Option<String>,
    /// Verify the accumulated CRC against `signature` at flush
    pub signed: bool,
    /// Expected CRC-32 of the plaintext
    pub signature: u32,
    /// False for STORE entries
    pub compressed: bool,
    pub encryption: EncryptionMode,
    /// Legacy preamble verification byte
    pub check_byte: u8,
}

/// Final codec output: trailing data plus the computed CRC-32
#[derive(Debug)]
pub struct CodecFlush {
    pub data: Vec<u8>,
    pub signature: u32,
}

/// Push-style transformer from compressed stream bytes to plaintext
#[async_trait]
pub trait Codec: Send {
    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Feed the next input chunk; the returned plaintext may be empty
    async fn append(&mut self, chunk: &[u8]) -> Result<Vec<u8>>;

    /// Drain remaining output and verify signatures
    async fn flush(&mut self) -> Result<CodecFlush>;
}

/// Codec constructor, overridable through reader options
pub type CodecFactory = Arc<dyn Fn(&CodecConfig) -> Box<dyn Codec> + Send + Sync>;

/// Build the default in-place codec
pub fn create_codec(config: &CodecConfig) -> Box<dyn Codec> {
    Box::new(EntryCodec::new(config))
}

enum Decryptor {
    None,
    Aes(AesCtrDecryptor),
    ZipCrypto(ZipCryptoDecryptor),
}

/// Streaming raw-DEFLATE wrapper around `flate2::Decompress`
struct Inflater {
    stream: Decompress,
    finished: bool,
}

impl Inflater {
    fn new() -> Self {
        Self {
            stream: Decompress::new(false),
            finished: false,
        }
    }

    fn push(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(input.len().saturating_mul(2).max(4096));
        let mut consumed = 0usize;

        while !self.finished && consumed < input.len() {
            if output.len() == output.capacity() {
                output.reserve(64 * 1024);
            }
            let before_in = self.stream.total_in();
            let before_out = output.len();
            let status = self
                .stream
                .decompress_vec(&input[consumed..], &mut output, FlushDecompress::None)
                .map_err(|_| ZipReadError::BadFormat("invalid deflate stream"))?;
            consumed += (self.stream.total_in() - before_in) as usize;

            match status {
                Status::StreamEnd => self.finished = true,
                Status::Ok => {}
                Status::BufError => {
                    if self.stream.total_in() == before_in && output.len() == before_out {
                        return Err(ZipReadError::BadFormat("invalid deflate stream"));
                    }
                }
            }
        }

        Ok(output)
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let mut output = Vec::new();

        while !self.finished {
            if output.len() == output.capacity() {
                output.reserve(32 * 1024);
            }
            let before_out = self.stream.total_out();
            let status = self
                .stream
                .decompress_vec(&[], &mut output, FlushDecompress::Finish)
                .map_err(|_| ZipReadError::BadFormat("invalid deflate stream"))?;

            match status {
                Status::StreamEnd => self.finished = true,
                _ if self.stream.total_out() == before_out => {
                    return Err(ZipReadError::BadFormat("truncated deflate stream"));
                }
                _ => {}
            }
        }

        Ok(output)
    }
}

/// Default codec: decrypt, inflate, accumulate CRC
pub struct EntryCodec {
    decryptor: Decryptor,
    inflater: Option<Inflater>,
    hasher: crc32fast::Hasher,
    signed: bool,
    expected_signature: u32,
}

impl EntryCodec {
    pub fn new(config: &CodecConfig) -> Self {
        let password = config.password.as_deref().unwrap_or_default();
        let decryptor = match config.encryption {
            EncryptionMode::None => Decryptor::None,
            EncryptionMode::Aes => Decryptor::Aes(AesCtrDecryptor::new(password)),
            EncryptionMode::ZipCrypto => Decryptor::ZipCrypto(ZipCryptoDecryptor::new(
                password.as_bytes(),
                config.check_byte,
            )),
        };

        Self {
            decryptor,
            inflater: config.compressed.then(Inflater::new),
            hasher: crc32fast::Hasher::new(),
            signed: config.signed,
            expected_signature: config.signature,
        }
    }
}

#[async_trait]
impl Codec for EntryCodec {
    async fn append(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let decrypted = match &mut self.decryptor {
            Decryptor::None => chunk.to_vec(),
            Decryptor::Aes(aes) => aes.update(chunk)?,
            Decryptor::ZipCrypto(legacy) => legacy.update(chunk)?,
        };

        let output = match &mut self.inflater {
            Some(inflater) => inflater.push(&decrypted)?,
            None => decrypted,
        };

        self.hasher.update(&output);
        Ok(output)
    }

    async fn flush(&mut self) -> Result<CodecFlush> {
        match &mut self.decryptor {
            Decryptor::None => {}
            Decryptor::Aes(aes) => aes.finalize()?,
            Decryptor::ZipCrypto(legacy) => legacy.finalize()?,
        }

        let data = match &mut self.inflater {
            Some(inflater) => inflater.finish()?,
            None => Vec::new(),
        };
        self.hasher.update(&data);

        let signature = self.hasher.clone().finalize();
        if self.signed && signature != self.expected_signature {
            return Err(ZipReadError::InvalidSignature {
                expected: self.expected_signature,
                computed: signature,
            });
        }

        Ok(CodecFlush { data, signature })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn plain_config(signed: bool, signature: u32, compressed: bool) -> CodecConfig {
        CodecConfig {
            password: None,
            signed,
            signature,
            compressed,
            encryption: EncryptionMode::None,
            check_byte: 0,
        }
    }

    #[tokio::test]
    async fn store_passthrough_reports_crc() {
        let mut codec = EntryCodec::new(&plain_config(false, 0, false));
        assert_eq!(codec.append(b"hi\n").await.unwrap(), b"hi\n");
        let flush = codec.flush().await.unwrap();
        assert!(flush.data.is_empty());
        assert_eq!(flush.signature, crc32fast::hash(b"hi\n"));
    }

    #[tokio::test]
    async fn deflate_across_chunk_boundaries() {
        let plaintext: Vec<u8> = (0..50_000u32).map(|value| value as u8).collect();
        let compressed = deflate(&plaintext);

        let mut codec = EntryCodec::new(&plain_config(
            true,
            crc32fast::hash(&plaintext),
            true,
        ));
        let mut recovered = Vec::new();
        for chunk in compressed.chunks(113) {
            recovered.extend_from_slice(&codec.append(chunk).await.unwrap());
        }
        recovered.extend_from_slice(&codec.flush().await.unwrap().data);
        assert_eq!(recovered, plaintext);
    }

    #[tokio::test]
    async fn crc_mismatch_is_invalid_signature() {
        let mut codec = EntryCodec::new(&plain_config(true, 0xDEADBEEF, false));
        codec.append(b"payload").await.unwrap();
        assert!(matches!(
            codec.flush().await,
            Err(ZipReadError::InvalidSignature { .. })
        ));
    }

    #[tokio::test]
    async fn garbage_deflate_stream_is_rejected() {
        let mut codec = EntryCodec::new(&plain_config(false, 0, true));
        let result = async {
            codec.append(&[0xFF; 64]).await?;
            codec.flush().await
        }
        .await;
        assert!(matches!(result, Err(ZipReadError::BadFormat(_))));
    }
}
