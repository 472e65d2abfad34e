//! Destinations for extracted entry data.
//!
//! A [`Sink`] receives decompressed chunks in source order and produces an
//! arbitrary result when finalized (a buffer, a path, a handle). Sinks are
//! single-use: after an extraction fails or completes, the sink must be
//! re-initialized before reuse, and partial output from a failed extraction
//! is invalid.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::Result;

/// Ordered consumer of extracted bytes
#[async_trait]
pub trait Sink: Send {
    /// Value produced once all chunks are written
    type Output: Send;

    /// True once `init` has completed
    fn initialized(&self) -> bool {
        true
    }

    /// Deferred one-time setup
    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Accept the next chunk; chunks arrive in strictly ascending offset order
    async fn write(&mut self, chunk: Vec<u8>) -> Result<()>;

    /// Flush and yield the sink's result
    async fn finalize(&mut self) -> Result<Self::Output>;
}

/// Collects extracted bytes into a `Vec<u8>`
#[derive(Default)]
pub struct VecSink {
    buffer: Vec<u8>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Sink for VecSink {
    type Output = Vec<u8>;

    async fn init(&mut self) -> Result<()> {
        self.buffer.clear();
        Ok(())
    }

    async fn write(&mut self, chunk: Vec<u8>) -> Result<()> {
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finalize(&mut self) -> Result<Vec<u8>> {
        Ok(std::mem::take(&mut self.buffer))
    }
}

/// Streams extracted bytes into a file, yielding the written path
pub struct FileSink {
    path: PathBuf,
    file: Option<tokio::fs::File>,
}

impl FileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
        }
    }
}

#[async_trait]
impl Sink for FileSink {
    type Output = PathBuf;

    fn initialized(&self) -> bool {
        self.file.is_some()
    }

    async fn init(&mut self) -> Result<()> {
        if self.file.is_none() {
            self.file = Some(tokio::fs::File::create(&self.path).await?);
        }
        Ok(())
    }

    async fn write(&mut self, chunk: Vec<u8>) -> Result<()> {
        self.init().await?;
        if let Some(file) = self.file.as_mut() {
            file.write_all(&chunk).await?;
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<PathBuf> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(self.path.clone())
    }
}
