//! The node-level storage contract shared by the file-backed and
//! in-memory entity index backends.

use crate::entity::node::{EntityNode, NO_NODE};
use crate::error::Result;

/// Metadata kept at the head of every entity index.
///
/// `num_entities` equals the number of live nodes reachable from
/// `root_id`; `capacity` is the exclusive upper bound of ever-allocated
/// ids; `version` increments once per committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    /// Exclusive upper bound of all allocated slot ids.
    pub capacity: i32,

    /// Id of the tree root, or `NO_NODE` if the index is empty.
    pub root_id: i32,

    /// Head of the free list, or `NO_NODE` if no slot is free.
    pub first_deleted_id: i32,

    /// Number of live entities in the index.
    pub num_entities: i32,

    /// Number of mutations committed since the index was created.
    pub version: u32,
}

impl IndexMetadata {
    /// Metadata of a freshly created, empty index.
    pub fn empty() -> Self {
        Self {
            capacity: 0,
            root_id: NO_NODE,
            first_deleted_id: NO_NODE,
            num_entities: 0,
            version: 0,
        }
    }
}

impl Default for IndexMetadata {
    fn default() -> Self {
        Self::empty()
    }
}

/// Slot-level access to the nodes of an entity index.
///
/// The tree engine is written against this trait; the backends decide how
/// slots are laid out (fixed-size records in a flat file, or a growable
/// vector in memory). Reading an out-of-range id is a programming error
/// and fails with `InvalidArgument`; torn or stale slot contents are the
/// caller's integrity problem, surfaced by the index validator.
pub trait EntityNodeStorage<T> {
    /// The current index metadata.
    fn metadata(&self) -> &IndexMetadata;

    /// Mutable access to the index metadata. Changes become durable only
    /// after [`put_metadata`](Self::put_metadata).
    fn metadata_mut(&mut self) -> &mut IndexMetadata;

    /// Reads the node in slot `id`.
    fn get_node(&mut self, id: i32) -> Result<EntityNode<T>>;

    /// Writes `node` into its slot. The slot may be the first one past the
    /// current end of the storage (a capacity-extending append).
    fn put_node(&mut self, node: EntityNode<T>) -> Result<()>;

    /// Reads the nodes in `[start_id, end_id)` in one batched read.
    /// `end_id` is clamped to the current capacity.
    fn get_node_range(&mut self, start_id: i32, end_id: i32) -> Result<Vec<EntityNode<T>>>;

    /// Persists the metadata. File-backed storages rewrite and flush the
    /// header synchronously; in-memory storages need not do anything.
    fn put_metadata(&mut self) -> Result<()>;

    /// Releases the resources held by the storage.
    fn close(&mut self) -> Result<()>;
}
