//! File-backed node storage backend.
//!
//! The on-disk layout is a small metadata header followed by
//! `capacity` fixed-size slots:
//!
//! ```text
//! header (32 bytes, little-endian):
//!   u32 header_size   always 32
//!   i32 capacity
//!   i32 root_id       -1 when the index is empty
//!   i32 first_deleted -1 when the free list is empty
//!   i32 num_entities
//!   u32 version
//!   u32 record_len    payload width produced by the codec
//!   u32 reserved
//! slot (9 + record_len bytes):
//!   i32 left_id       -999 marks a free slot
//!   i32 right_id      next free id for a free slot
//!   i8  height_dif
//!   payload[record_len]
//! ```
//!
//! The header is rewritten and flushed after every structural mutation,
//! so the metadata is durable before the mutating call returns. One
//! flush per mutation is acceptable for a document-style workload.

use crate::entity::node::{EntityNode, DELETED_MARKER};
use crate::entity::storage::{EntityNodeStorage, IndexMetadata};
use crate::entity::EntityCodec;
use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Size of the metadata header in bytes.
pub const HEADER_SIZE: usize = 32;

/// Structural bytes per slot, before the payload.
const SLOT_PREFIX: usize = 9;

/// A node storage backed by a flat file of fixed-size records.
#[derive(Debug)]
pub struct FileNodeStorage<C: EntityCodec> {
    file: File,
    codec: C,
    metadata: IndexMetadata,
    record_len: usize,
}

impl<C: EntityCodec> FileNodeStorage<C> {
    /// Creates a new, empty storage file. Fails if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P, codec: C) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().create_new(true).read(true).write(true).open(path)?;
        let record_len = codec.serialized_len();

        let mut storage = Self { file, codec, metadata: IndexMetadata::empty(), record_len };
        storage.put_metadata()?;

        log::info!("Created entity node storage at {:?}", path);
        Ok(storage)
    }

    /// Opens an existing storage file and reads its header.
    ///
    /// The header is trusted as read; structural consistency between the
    /// header counts and the tree is checked only by the index validator.
    pub fn open<P: AsRef<Path>>(path: P, codec: C) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut header = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;

        let mut buf = &header[..];
        let header_size = buf.get_u32_le();
        if header_size as usize != HEADER_SIZE {
            return Err(Error::corruption(format!(
                "Unsupported header size {} (expected {})",
                header_size, HEADER_SIZE
            )));
        }

        let metadata = IndexMetadata {
            capacity: buf.get_i32_le(),
            root_id: buf.get_i32_le(),
            first_deleted_id: buf.get_i32_le(),
            num_entities: buf.get_i32_le(),
            version: buf.get_u32_le(),
        };
        let record_len = buf.get_u32_le() as usize;

        if record_len != codec.serialized_len() {
            return Err(Error::corruption(format!(
                "Record length in header is {} but the codec serializes {} bytes",
                record_len,
                codec.serialized_len()
            )));
        }

        log::info!(
            "Opened entity node storage at {:?} ({} entities, capacity {})",
            path,
            metadata.num_entities,
            metadata.capacity
        );
        Ok(Self { file, codec, metadata, record_len })
    }

    fn slot_len(&self) -> usize {
        SLOT_PREFIX + self.record_len
    }

    fn slot_offset(&self, id: i32) -> u64 {
        HEADER_SIZE as u64 + id as u64 * self.slot_len() as u64
    }

    fn check_range(&self, id: i32) -> Result<()> {
        if id < 0 || id >= self.metadata.capacity {
            return Err(Error::invalid_argument(format!(
                "Can't read node {} when capacity is {}",
                id, self.metadata.capacity
            )));
        }
        Ok(())
    }

    /// Decodes one slot. `buf` holds exactly `slot_len()` bytes.
    fn parse_slot(&self, id: i32, mut buf: &[u8]) -> Result<EntityNode<C::Entity>> {
        let left_id = buf.get_i32_le();
        let right_id = buf.get_i32_le();
        let height_dif = buf.get_i8() as i32;

        let entity = if left_id == DELETED_MARKER {
            // Free slot; the payload bytes are stale
            None
        } else {
            Some(self.codec.decode(&buf[..self.record_len])?)
        };

        Ok(EntityNode { id, entity, left_id, right_id, height_dif })
    }

    fn encode_slot(&self, node: &EntityNode<C::Entity>) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.slot_len());
        buf.put_i32_le(node.left_id);
        buf.put_i32_le(node.right_id);
        buf.put_i8(node.height_dif as i8);

        match &node.entity {
            Some(entity) => {
                let payload_start = buf.len();
                self.codec.encode(entity, &mut buf)?;
                let written = buf.len() - payload_start;
                if written != self.record_len {
                    return Err(Error::invalid_argument(format!(
                        "Codec encoded {} bytes, expected {}",
                        written, self.record_len
                    )));
                }
            }
            None => buf.put_bytes(0, self.record_len),
        }

        Ok(buf)
    }
}

impl<C: EntityCodec> EntityNodeStorage<C::Entity> for FileNodeStorage<C> {
    fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut IndexMetadata {
        &mut self.metadata
    }

    fn get_node(&mut self, id: i32) -> Result<EntityNode<C::Entity>> {
        self.check_range(id)?;

        let mut buf = vec![0u8; self.slot_len()];
        self.file.seek(SeekFrom::Start(self.slot_offset(id)))?;
        self.file.read_exact(&mut buf)?;

        self.parse_slot(id, &buf)
    }

    fn put_node(&mut self, node: EntityNode<C::Entity>) -> Result<()> {
        // The first slot past the end is a capacity-extending append
        if node.id < 0 || node.id > self.metadata.capacity {
            return Err(Error::invalid_argument(format!(
                "Can't write node {} when capacity is {}",
                node.id, self.metadata.capacity
            )));
        }

        let buf = self.encode_slot(&node)?;
        self.file.seek(SeekFrom::Start(self.slot_offset(node.id)))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    fn get_node_range(&mut self, start_id: i32, end_id: i32) -> Result<Vec<EntityNode<C::Entity>>> {
        if start_id < 0 {
            return Err(Error::invalid_argument(format!("Invalid range start {}", start_id)));
        }
        let end_id = end_id.max(start_id).min(self.metadata.capacity);
        if start_id >= end_id {
            return Ok(Vec::new());
        }

        let count = (end_id - start_id) as usize;
        let mut buf = vec![0u8; count * self.slot_len()];
        self.file.seek(SeekFrom::Start(self.slot_offset(start_id)))?;
        self.file.read_exact(&mut buf)?;

        let mut nodes = Vec::with_capacity(count);
        for i in 0..count {
            let slot = &buf[i * self.slot_len()..(i + 1) * self.slot_len()];
            nodes.push(self.parse_slot(start_id + i as i32, slot)?);
        }
        Ok(nodes)
    }

    fn put_metadata(&mut self) -> Result<()> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        buf.put_u32_le(HEADER_SIZE as u32);
        buf.put_i32_le(self.metadata.capacity);
        buf.put_i32_le(self.metadata.root_id);
        buf.put_i32_le(self.metadata.first_deleted_id);
        buf.put_i32_le(self.metadata.num_entities);
        buf.put_u32_le(self.metadata.version);
        buf.put_u32_le(self.record_len as u32);
        buf.put_u32_le(0);

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
