//! Persistent, key-ordered entity indexes.
//!
//! An entity index stores fixed-schema records (players, tournaments,
//! annotators, sources, teams) in id-addressed slots and keeps them in
//! key order through a binary search tree encoded into the structural
//! fields of each slot.
//!
//! ## Architecture
//!
//! - **[`EntityCodec`]**: supplied per entity schema; serializes payloads
//!   to their fixed width and derives the comparison key
//! - **[`EntityNodeStorage`]**: slot-level access to tree nodes, with a
//!   file-backed and an in-memory backend
//! - **[`EntityIndex`]**: the tree engine — search, insert, delete with
//!   slot reuse, ordered traversal, and structural validation
//!
//! Deleted slots are chained into a LIFO free list and reused by later
//! inserts, so ids stay dense even under churn.

mod file;
mod index;
mod memory;
mod node;
mod storage;

pub use file::FileNodeStorage;
pub use index::{EntityIndex, EntityStream, FileEntityIndex, InMemoryEntityIndex, OrderedIter};
pub use memory::InMemoryNodeStorage;
pub use node::{EntityNode, DELETED_MARKER, NO_NODE};
pub use storage::{EntityNodeStorage, IndexMetadata};

use crate::error::Result;
use bytes::BytesMut;
use std::fmt;

/// Serializes entities of one schema to their fixed-width payload and
/// exposes the comparison key by which the index keeps them ordered.
///
/// The engine never inspects payload bytes itself; the codec is the only
/// component that understands the entity encoding. One codec instance is
/// created per entity schema and handed to the index at open time.
pub trait EntityCodec {
    /// The entity type produced and consumed by this codec.
    type Entity: Clone;

    /// The total-order key derived from an entity's payload, e.g. last
    /// name plus first name for players. At most one live entity per
    /// distinct key value exists in an index.
    type Key: Ord + Clone + fmt::Debug;

    /// The width in bytes of every encoded entity.
    fn serialized_len(&self) -> usize;

    /// Encodes `entity` into exactly [`serialized_len`](Self::serialized_len) bytes.
    fn encode(&self, entity: &Self::Entity, buf: &mut BytesMut) -> Result<()>;

    /// Decodes an entity from a [`serialized_len`](Self::serialized_len)-byte payload.
    fn decode(&self, buf: &[u8]) -> Result<Self::Entity>;

    /// Returns the comparison key of `entity`.
    fn key_of(&self, entity: &Self::Entity) -> Self::Key;
}
