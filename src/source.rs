//! Random-access byte sources.
//!
//! The reader never consumes a stream front to back; the ZIP metadata sits
//! at the tail of the file, so everything is expressed as bounded reads at
//! absolute offsets through the [`RandomSource`] trait. A source may be
//! shared by any number of concurrent extractions; reads are non-mutating
//! and independently addressable.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, ZipReadError};

/// Random access reads over archive bytes.
///
/// `read` must return exactly `length` bytes; a short read is an error.
/// `init` is idempotent and deferred: the reader calls it before the first
/// read of every operation, and implementations that need no setup keep the
/// default no-op.
#[async_trait]
pub trait RandomSource: Send + Sync {
    /// Total archive length in bytes
    fn size(&self) -> u64;

    /// True once `init` has completed
    fn initialized(&self) -> bool {
        true
    }

    /// Deferred one-time setup (opening handles, HEAD requests, ...)
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Read exactly `length` bytes starting at `offset`
    async fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>>;
}

/// In-memory archive source
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl From<Vec<u8>> for MemorySource {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

#[async_trait]
impl RandomSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= self.data.len() as u64)
            .ok_or(ZipReadError::BadFormat("read past end of archive"))?;
        Ok(self.data[offset as usize..end as usize].to_vec())
    }
}

/// Local file source using positioned reads.
///
/// On Unix each read is a `pread(2)`, so a single handle serves concurrent
/// extractions without a shared cursor. Elsewhere the handle is seeked
/// under the exclusive reference `spawn_blocking` provides.
pub struct FileSource {
    file: Arc<std::fs::File>,
    size: u64,
    initialized: AtomicBool,
}

impl FileSource {
    /// Open `path` read-only and capture its length
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            size,
            initialized: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl RandomSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    async fn init(&self) -> Result<()> {
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let file = Arc::clone(&self.file);
        let buf = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut buf = vec![0u8; length as usize];

            #[cfg(unix)]
            {
                use std::os::unix::fs::FileExt;
                file.read_exact_at(&mut buf, offset)?;
            }

            #[cfg(not(unix))]
            {
                use std::io::{Read, Seek, SeekFrom};
                let mut handle = &*file;
                handle.seek(SeekFrom::Start(offset))?;
                handle.read_exact(&mut buf)?;
            }

            Ok(buf)
        })
        .await
        .map_err(|join| std::io::Error::other(join))??;

        Ok(buf)
    }
}
