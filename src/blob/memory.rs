//! In-memory blob storage.
//!
//! Keeps the blobs in a single contiguous buffer that grows by doubling.
//! Used for tests, scratch stores, and staging a store before it is
//! written out in the file format. Unlike the file backend it carries no
//! metadata header, so the first blob lands at offset 0.

use crate::blob::{BlobSizeRetriever, BlobStorage};
use crate::error::{Error, Result};
use bytes::Bytes;
use std::io;

/// A blob storage backed by a growable in-memory buffer.
#[derive(Debug)]
pub struct InMemoryBlobStorage<R: BlobSizeRetriever> {
    data: Vec<u8>,
    retriever: R,
    closed: bool,
}

impl<R: BlobSizeRetriever> InMemoryBlobStorage<R> {
    /// Creates an empty in-memory blob storage.
    pub fn new(retriever: R) -> Self {
        Self { data: Vec::new(), retriever, closed: false }
    }

    /// Creates a storage over existing store contents, e.g. a store file
    /// body loaded into memory.
    pub fn from_bytes(data: Vec<u8>, retriever: R) -> Self {
        Self { data, retriever, closed: false }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::ClosedStorage);
        }
        Ok(())
    }

    /// Doubles the buffer capacity until `needed` bytes fit.
    fn grow(&mut self, needed: usize) {
        let mut capacity = self.data.capacity().max(32);
        while needed > capacity {
            capacity *= 2;
        }
        self.data.reserve_exact(capacity - self.data.len());
    }

    /// Writes `blob` at `offset` unconditionally, growing the store as
    /// needed. Meant for repair tooling that reconstructs a store from
    /// the outside; regular updates go through [`BlobStorage::put_blob`].
    pub fn force_put(&mut self, offset: u32, blob: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let offset = offset as usize;
        let end = offset + blob.len();
        if end > self.data.len() {
            self.grow(end);
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(blob);
        Ok(())
    }
}

impl<R: BlobSizeRetriever> BlobStorage for InMemoryBlobStorage<R> {
    fn get_blob(&mut self, offset: u32) -> Result<Bytes> {
        self.ensure_open()?;
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Blob offset {} is past the end of the store ({})", offset, self.data.len()),
            )
            .into());
        }

        let blob_size = self.retriever.blob_size(&self.data[offset..])?;
        if offset + blob_size > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Blob at offset {} declares {} bytes but only {} remain",
                    offset,
                    blob_size,
                    self.data.len() - offset
                ),
            )
            .into());
        }
        Ok(Bytes::copy_from_slice(&self.data[offset..offset + blob_size]))
    }

    fn add_blob(&mut self, blob: &[u8]) -> Result<u32> {
        self.ensure_open()?;
        let offset = self.data.len();
        self.grow(offset + blob.len());
        self.data.extend_from_slice(blob);
        Ok(offset as u32)
    }

    fn put_blob(&mut self, old_offset: u32, blob: &[u8]) -> Result<u32> {
        self.ensure_open()?;
        let old_blob = self.get_blob(old_offset)?;
        let old_size = self.retriever.blob_size(&old_blob)?;
        let new_size = self.retriever.blob_size(blob)?;
        if new_size > old_size {
            return self.add_blob(blob);
        }

        let offset = old_offset as usize;
        self.data[offset..offset + blob.len()].copy_from_slice(blob);
        Ok(old_offset)
    }

    fn insert(&mut self, offset: u32, count: u32) -> Result<()> {
        self.ensure_open()?;
        let offset = offset as usize;
        let count = count as usize;
        if offset > self.data.len() {
            return Err(Error::invalid_argument(format!(
                "Can't insert at offset {} when the store size is {}",
                offset,
                self.data.len()
            )));
        }

        let old_len = self.data.len();
        self.grow(old_len + count);
        self.data.resize(old_len + count, 0);
        // Copy the highest addresses first so the source is never
        // overwritten before it has been read
        for i in (offset + count..old_len + count).rev() {
            self.data[i] = self.data[i - count];
        }
        Ok(())
    }

    fn size(&self) -> u32 {
        self.data.len() as u32
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
