//! Reader configuration.
//!
//! Options exist at two levels: on the reader itself and per call. At the
//! start of each operation the two records merge field-wise, the call-level
//! value winning wherever it is set. All fields are optional; the resolved
//! defaults live here.

use std::sync::Arc;

use crate::codec::CodecFactory;
use crate::entry::TextEncoding;

/// Default pipeline chunk size (512 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

/// Progress observer: `(bytes_consumed, total_bytes)` after each input chunk
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Reader-level defaults applied to every operation
#[derive(Clone, Default)]
pub struct ReaderOptions {
    pub filename_encoding: Option<TextEncoding>,
    pub comment_encoding: Option<TextEncoding>,
    pub password: Option<String>,
    pub check_signature: Option<bool>,
    pub chunk_size: Option<usize>,
    /// Replace the built-in codec, e.g. to offload onto a worker
    pub codec_factory: Option<CodecFactory>,
}

impl ReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_check_signature(mut self, check: bool) -> Self {
        self.check_signature = Some(check);
        self
    }
}

/// Per-call options for `get_entries`
#[derive(Clone, Copy, Default)]
pub struct EntriesOptions {
    pub filename_encoding: Option<TextEncoding>,
    pub comment_encoding: Option<TextEncoding>,
}

/// Per-call options for `get_data`
#[derive(Clone, Default)]
pub struct DataOptions {
    pub password: Option<String>,
    pub check_signature: Option<bool>,
    pub chunk_size: Option<usize>,
    pub on_progress: Option<ProgressCallback>,
}

impl DataOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_check_signature(mut self, check: bool) -> Self {
        self.check_signature = Some(check);
        self
    }

    pub fn with_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = Some(on_progress);
        self
    }
}

/// `get_entries` options after the reader/call merge
#[derive(Clone, Copy)]
pub(crate) struct ResolvedEntriesOptions {
    pub filename_encoding: TextEncoding,
    pub comment_encoding: TextEncoding,
}

/// `get_data` options after the reader/call merge
pub(crate) struct ResolvedDataOptions {
    pub password: Option<String>,
    pub check_signature: bool,
    pub chunk_size: usize,
    pub on_progress: Option<ProgressCallback>,
}

impl ReaderOptions {
    pub(crate) fn resolve_entries(&self, call: EntriesOptions) -> ResolvedEntriesOptions {
        ResolvedEntriesOptions {
            filename_encoding: call
                .filename_encoding
                .or(self.filename_encoding)
                .unwrap_or_default(),
            comment_encoding: call
                .comment_encoding
                .or(self.comment_encoding)
                .unwrap_or_default(),
        }
    }

    pub(crate) fn resolve_data(&self, call: DataOptions) -> ResolvedDataOptions {
        ResolvedDataOptions {
            password: call.password.or_else(|| self.password.clone()),
            check_signature: call
                .check_signature
                .or(self.check_signature)
                .unwrap_or(false),
            chunk_size: call
                .chunk_size
                .or(self.chunk_size)
                .unwrap_or(DEFAULT_CHUNK_SIZE)
                .max(1),
            on_progress: call.on_progress,
        }
    }
}
