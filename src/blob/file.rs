//! File-backed blob storage.
//!
//! The file starts with a small fixed header followed by back-to-back
//! blobs:
//!
//! ```text
//! header (26 bytes, big-endian):
//!   u16 header_size   size of the header according to the metadata
//!   u32 size          total file size in bytes, including the header
//!   u32 reserved
//!   u32 reserved
//!   u32 size          redundant copy, used only for a consistency check
//!   u32 reserved
//!   u32 reserved
//! ```
//!
//! Legacy files in the wild carry cosmetic metadata drift: the two size
//! fields may disagree, or the physical file may be longer than the
//! header claims. Such mismatches are logged as warnings on open but are
//! never errors; the first size field is authoritative and the store
//! keeps operating.

use crate::blob::{BlobSizeRetriever, BlobStorage};
use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Size of the initial read performed when fetching a blob, before its
/// true length is known.
pub const PREFETCH_SIZE: usize = 4096;

/// Size of the metadata header this implementation understands.
const HEADER_SIZE: usize = 26;

/// Chunk size of the backward copy performed by `insert`.
const SHIFT_CHUNK_SIZE: u64 = 8192;

/// A blob storage backed by a single flat file.
#[derive(Debug)]
pub struct FileBlobStorage<R: BlobSizeRetriever> {
    file: File,
    retriever: R,
    /// Total store size in bytes; kept in sync with the header.
    size: u32,
    /// Header size according to the metadata, which may differ from
    /// `HEADER_SIZE` in legacy files.
    header_size: u16,
    closed: bool,
}

impl<R: BlobSizeRetriever> FileBlobStorage<R> {
    /// Creates a new, empty blob storage file. Fails if the file already
    /// exists.
    pub fn create<P: AsRef<Path>>(path: P, retriever: R) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().create_new(true).read(true).write(true).open(path)?;

        let mut storage = Self {
            file,
            retriever,
            size: HEADER_SIZE as u32,
            header_size: HEADER_SIZE as u16,
            closed: false,
        };
        storage.save_metadata()?;

        log::info!("Created blob storage at {:?}", path);
        Ok(storage)
    }

    /// Opens an existing blob storage file.
    ///
    /// Metadata inconsistencies are tolerated: they are logged but the
    /// store opens and operates regardless.
    pub fn open<P: AsRef<Path>>(path: P, retriever: R) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut header = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;

        let mut buf = &header[..];
        let header_size = buf.get_u16();
        let size = buf.get_u32();
        let reserved1 = buf.get_u32();
        let reserved2 = buf.get_u32();
        let size2 = buf.get_u32();
        let reserved3 = buf.get_u32();
        let reserved4 = buf.get_u32();

        for (i, reserved) in [reserved1, reserved2, reserved3, reserved4].iter().enumerate() {
            if *reserved != 0 {
                log::warn!("Reserved header word {} is {:08X}", i + 1, reserved);
            }
        }
        if size != size2 {
            log::warn!("Second size field is not the same as the first ({:08X} != {:08X})", size, size2);
        }
        let file_size = file.metadata()?.len();
        if file_size != size as u64 {
            log::warn!("File size doesn't match size in header ({} != {})", file_size, size);
        }

        log::info!("Opened blob storage at {:?} ({} bytes)", path, size);
        Ok(Self { file, retriever, size, header_size, closed: false })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::ClosedStorage);
        }
        Ok(())
    }

    fn save_metadata(&mut self) -> Result<()> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        buf.put_u16(self.header_size);
        buf.put_u32(self.size);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(self.size);
        buf.put_u32(0);
        buf.put_u32(0);

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        Ok(())
    }
}

impl<R: BlobSizeRetriever> BlobStorage for FileBlobStorage<R> {
    fn get_blob(&mut self, offset: u32) -> Result<Bytes> {
        self.ensure_open()?;
        if offset >= self.size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Blob offset {} is past the end of the store ({})", offset, self.size),
            )
            .into());
        }

        let available = (self.size - offset) as usize;
        let prefetched = PREFETCH_SIZE.min(available);
        let mut buf = vec![0u8; prefetched];
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.read_exact(&mut buf)?;

        let blob_size = self.retriever.blob_size(&buf)?;
        if blob_size > available {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Blob at offset {} declares {} bytes but only {} remain",
                    offset, blob_size, available
                ),
            )
            .into());
        }

        if blob_size > prefetched {
            buf.resize(blob_size, 0);
            self.file.read_exact(&mut buf[prefetched..])?;
        } else {
            buf.truncate(blob_size);
        }
        Ok(Bytes::from(buf))
    }

    fn add_blob(&mut self, blob: &[u8]) -> Result<u32> {
        self.ensure_open()?;
        let offset = self.size;
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(blob)?;
        self.size += blob.len() as u32;
        self.save_metadata()?;
        Ok(offset)
    }

    fn put_blob(&mut self, old_offset: u32, blob: &[u8]) -> Result<u32> {
        self.ensure_open()?;
        let old_blob = self.get_blob(old_offset)?;
        let old_size = self.retriever.blob_size(&old_blob)?;
        let new_size = self.retriever.blob_size(blob)?;
        if new_size > old_size {
            return self.add_blob(blob);
        }

        self.file.seek(SeekFrom::Start(old_offset as u64))?;
        self.file.write_all(blob)?;
        self.file.sync_data()?;
        Ok(old_offset)
    }

    fn insert(&mut self, offset: u32, count: u32) -> Result<()> {
        self.ensure_open()?;
        if offset > self.size {
            return Err(Error::invalid_argument(format!(
                "Can't insert at offset {} when the store size is {}",
                offset, self.size
            )));
        }

        // Shift the tail forward, copying the highest chunk first so the
        // source is never overwritten before it has been read
        let mut remaining = (self.size - offset) as u64;
        let mut position = self.size as u64;
        let mut buf = vec![0u8; SHIFT_CHUNK_SIZE as usize];
        while remaining > 0 {
            let chunk = SHIFT_CHUNK_SIZE.min(remaining);
            position -= chunk;
            self.file.seek(SeekFrom::Start(position))?;
            self.file.read_exact(&mut buf[..chunk as usize])?;
            self.file.seek(SeekFrom::Start(position + count as u64))?;
            self.file.write_all(&buf[..chunk as usize])?;
            remaining -= chunk;
        }

        self.size += count;
        self.save_metadata()?;
        Ok(())
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.file.sync_all()?;
        self.closed = true;
        Ok(())
    }
}
