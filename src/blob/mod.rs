//! Append-biased stores for self-describing variable-length blobs.
//!
//! Move lists, annotations and free text are stored back to back as
//! blobs addressed by byte offset. A blob's own header encodes its
//! length; no external length table exists, which is why the store
//! consults a [`BlobSizeRetriever`] on every read. Blobs are created by
//! appending, updated in place when the replacement fits, relocated by
//! appending when it doesn't, and never explicitly deleted — orphaned
//! space is reclaimed only by whole-store insertion math.

mod file;
mod memory;

pub use file::{FileBlobStorage, PREFETCH_SIZE};
pub use memory::InMemoryBlobStorage;

use crate::error::Result;
use bytes::Bytes;

/// Determines the encoded size of a blob from its first bytes.
///
/// Supplied per blob schema by the caller; the store itself never
/// interprets blob contents. `header` holds at least the blob's first
/// [`PREFETCH_SIZE`] bytes (or the whole store tail if shorter).
pub trait BlobSizeRetriever {
    /// Returns the total encoded length in bytes of the blob whose first
    /// bytes are in `header`.
    fn blob_size(&self, header: &[u8]) -> Result<usize>;
}

/// A store of self-describing variable-length blobs addressed by byte
/// offset.
///
/// An external index (e.g. game headers) keeps track of where blobs
/// start; the store only knows how to find a blob's end.
pub trait BlobStorage {
    /// Reads the blob starting at `offset`.
    ///
    /// Reading at or past the end of the store is an I/O error, never a
    /// silent truncation.
    fn get_blob(&mut self, offset: u32) -> Result<Bytes>;

    /// Appends a blob at the end of the store and returns its offset.
    fn add_blob(&mut self, blob: &[u8]) -> Result<u32>;

    /// Updates the blob at `old_offset`.
    ///
    /// If the new blob's self-declared size fits within the old blob's,
    /// it is overwritten in place and `old_offset` is returned; trailing
    /// bytes of the old blob become unreachable garbage. Otherwise the
    /// new blob is appended and the caller must update any external
    /// reference that pointed at the old offset.
    fn put_blob(&mut self, old_offset: u32, blob: &[u8]) -> Result<u32>;

    /// Shifts every byte at or after `offset` forward by `count`,
    /// leaving `count` uninitialized bytes at `offset`.
    ///
    /// The caller is responsible for adjusting externally held offsets
    /// past the insertion point.
    fn insert(&mut self, offset: u32, count: u32) -> Result<()>;

    /// The current size of the store in bytes.
    fn size(&self) -> u32;

    /// Releases the resources held by the store. Any further operation
    /// fails with `ClosedStorage`.
    fn close(&mut self) -> Result<()>;
}
