//! The entity index tree engine.
//!
//! Implements search, insertion, deletion with slot reuse, ordered
//! traversal and structural validation on top of a node storage. The
//! tree keeps no parent pointers; every operation that needs the path
//! from the root re-derives it by re-running the comparison search and
//! keeps it as an explicit stack of `(ordering, node)` pairs.
//!
//! A height-difference field is carried per node for compatibility with
//! the legacy slot format, but no rebalancing is performed after
//! insertion or deletion. Under adversarial insert order the tree can
//! degrade to a linked list.

use crate::entity::node::{EntityNode, NO_NODE};
use crate::entity::storage::EntityNodeStorage;
use crate::entity::{EntityCodec, FileNodeStorage, InMemoryNodeStorage};
use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::path::Path;

/// Batch size of the id-order stream, in slots per read.
const STREAM_BATCH_SIZE: i32 = 1000;

/// One step of a root-to-node search path: the node visited and how the
/// searched key compared against it.
#[derive(Debug, Clone)]
struct PathEntry<T> {
    cmp: Ordering,
    node: EntityNode<T>,
}

/// A persistent, id-addressable, key-ordered store of entities.
///
/// Entities are addressed two ways: by `id` (the stable storage slot
/// number, O(1) lookup) and by `key` (the total-order comparison key
/// derived by the codec, O(tree height) lookup). Deleted ids go onto a
/// LIFO free list and are reused by later inserts.
///
/// The index is single-threaded; mutating operations take `&mut self`
/// and synchronously flush the metadata header before returning.
///
/// # Example
///
/// ```no_run
/// use cbstore::{EntityIndex, InMemoryEntityIndex};
/// # use cbstore::{EntityCodec, Result};
/// # use bytes::{BufMut, BytesMut};
/// # #[derive(Clone)]
/// # struct NameCodec;
/// # impl EntityCodec for NameCodec {
/// #     type Entity = String;
/// #     type Key = String;
/// #     fn serialized_len(&self) -> usize { 32 }
/// #     fn encode(&self, e: &String, buf: &mut BytesMut) -> Result<()> {
/// #         let mut padded = [b' '; 32];
/// #         padded[..e.len()].copy_from_slice(e.as_bytes());
/// #         buf.put_slice(&padded);
/// #         Ok(())
/// #     }
/// #     fn decode(&self, buf: &[u8]) -> Result<String> {
/// #         Ok(String::from_utf8_lossy(buf).trim_end().to_string())
/// #     }
/// #     fn key_of(&self, e: &String) -> String { e.clone() }
/// # }
/// # fn main() -> cbstore::Result<()> {
/// let mut index = InMemoryEntityIndex::in_memory(NameCodec);
/// let id = index.add(&"Carlsen, Magnus".to_string())?;
/// assert_eq!(index.get_by_id(id)?, Some("Carlsen, Magnus".to_string()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct EntityIndex<C: EntityCodec, S: EntityNodeStorage<C::Entity>> {
    codec: C,
    storage: S,
    closed: bool,
}

/// An entity index backed by a flat file of fixed-size slots.
pub type FileEntityIndex<C> = EntityIndex<C, FileNodeStorage<C>>;

/// An entity index held entirely in memory.
pub type InMemoryEntityIndex<C> =
    EntityIndex<C, InMemoryNodeStorage<<C as EntityCodec>::Entity>>;

impl<C: EntityCodec + Clone> FileEntityIndex<C> {
    /// Creates a new index file. Fails if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P, codec: C) -> Result<Self> {
        let storage = FileNodeStorage::create(path, codec.clone())?;
        Ok(Self { codec, storage, closed: false })
    }

    /// Opens an existing index file.
    pub fn open<P: AsRef<Path>>(path: P, codec: C) -> Result<Self> {
        let storage = FileNodeStorage::open(path, codec.clone())?;
        Ok(Self { codec, storage, closed: false })
    }
}

impl<C: EntityCodec> InMemoryEntityIndex<C> {
    /// Creates an empty in-memory index.
    pub fn in_memory(codec: C) -> Self {
        Self { codec, storage: InMemoryNodeStorage::new(), closed: false }
    }
}

impl<C: EntityCodec, S: EntityNodeStorage<C::Entity>> EntityIndex<C, S> {
    /// Creates an index over an already-constructed node storage.
    pub fn with_storage(codec: C, storage: S) -> Self {
        Self { codec, storage, closed: false }
    }

    /// The number of live entities in the index.
    pub fn num_entities(&self) -> i32 {
        self.storage.metadata().num_entities
    }

    /// The exclusive upper bound of all allocated ids.
    pub fn capacity(&self) -> i32 {
        self.storage.metadata().capacity
    }

    /// The number of mutations committed since the index was created.
    pub fn version(&self) -> u32 {
        self.storage.metadata().version
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::ClosedStorage);
        }
        Ok(())
    }

    /// Bumps the version and flushes the metadata header.
    fn commit(&mut self) -> Result<()> {
        self.storage.metadata_mut().version += 1;
        self.storage.put_metadata()
    }

    /// Extends `path` with the search for `key` in the subtree rooted at
    /// `start_id`. The path ends at the node holding `key`, or at the
    /// node under which `key` would be inserted.
    fn tree_search_from(
        &mut self,
        start_id: i32,
        path: &mut Vec<PathEntry<C::Entity>>,
        key: &C::Key,
    ) -> Result<()> {
        let mut current_id = start_id;
        while current_id >= 0 {
            let node = self.storage.get_node(current_id)?;
            let entity = node.entity.as_ref().ok_or_else(|| {
                Error::corruption(format!("Tree references deleted node {}", current_id))
            })?;
            let cmp = key.cmp(&self.codec.key_of(entity));
            let (left_id, right_id) = (node.left_id, node.right_id);
            path.push(PathEntry { cmp, node });
            current_id = match cmp {
                Ordering::Equal => return Ok(()),
                Ordering::Less => left_id,
                Ordering::Greater => right_id,
            };
        }
        Ok(())
    }

    /// Searches for `key` from the root.
    fn tree_search(&mut self, key: &C::Key) -> Result<Vec<PathEntry<C::Entity>>> {
        let mut path = Vec::new();
        let root_id = self.storage.metadata().root_id;
        self.tree_search_from(root_id, &mut path, key)?;
        Ok(path)
    }

    /// Gets the entity with the given id.
    ///
    /// Returns `None` if the id is out of range or the slot is free.
    pub fn get_by_id(&mut self, entity_id: i32) -> Result<Option<C::Entity>> {
        self.ensure_open()?;
        if entity_id < 0 || entity_id >= self.storage.metadata().capacity {
            return Ok(None);
        }
        Ok(self.storage.get_node(entity_id)?.entity)
    }

    /// Gets the entity with the given key.
    pub fn get_by_key(&mut self, key: &C::Key) -> Result<Option<C::Entity>> {
        self.ensure_open()?;
        let path = self.tree_search(key)?;
        match path.last() {
            Some(entry) if entry.cmp == Ordering::Equal => Ok(entry.node.entity.clone()),
            _ => Ok(None),
        }
    }

    /// Adds a new entity and returns its assigned id.
    ///
    /// The id is the head of the free list if any slot is free, otherwise
    /// the next never-used slot.
    ///
    /// # Errors
    ///
    /// Fails with `DuplicateKey` if an entity with the same key already
    /// exists; the index is left unchanged.
    pub fn add(&mut self, entity: &C::Entity) -> Result<i32> {
        self.ensure_open()?;
        let key = self.codec.key_of(entity);

        let mut path = self.tree_search(&key)?;
        if matches!(path.last(), Some(entry) if entry.cmp == Ordering::Equal) {
            return Err(Error::duplicate_key(format!(
                "An entity with key {:?} already exists",
                key
            )));
        }

        let entity_id = if self.storage.metadata().first_deleted_id >= 0 {
            // Reuse the head of the free list
            let id = self.storage.metadata().first_deleted_id;
            let next_free = self.storage.get_node(id)?.right_id;
            self.storage.metadata_mut().first_deleted_id = next_free;
            id
        } else {
            let id = self.storage.metadata().capacity;
            self.storage.metadata_mut().capacity = id + 1;
            id
        };
        self.storage.metadata_mut().num_entities += 1;

        match path.pop() {
            None => self.storage.metadata_mut().root_id = entity_id,
            Some(parent) => {
                let mut node = parent.node;
                if parent.cmp == Ordering::Less {
                    node.left_id = entity_id;
                } else {
                    node.right_id = entity_id;
                }
                self.storage.put_node(node)?;
            }
        }

        self.storage.put_node(EntityNode::new(entity_id, Some(entity.clone())))?;
        self.commit()?;

        Ok(entity_id)
    }

    /// Replaces the entity in the given slot.
    ///
    /// If the new entity's key equals the stored one, the payload is
    /// overwritten in place and the tree linkage is untouched. Otherwise
    /// the operation is a delete followed by an add; the free list is
    /// LIFO and the two steps are adjacent, so the freed id is reused and
    /// the entity keeps its id.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` if the id is out of range or the slot
    /// is free, and with `DuplicateKey` if the new key collides with a
    /// different entity.
    pub fn put_by_id(&mut self, entity_id: i32, entity: &C::Entity) -> Result<()> {
        self.ensure_open()?;
        if entity_id < 0 || entity_id >= self.storage.metadata().capacity {
            return Err(Error::invalid_argument(format!(
                "Can't put an entity with id {} when capacity is {}",
                entity_id,
                self.storage.metadata().capacity
            )));
        }

        let old_node = self.storage.get_node(entity_id)?;
        if old_node.is_deleted() {
            return Err(Error::invalid_argument("Can't replace a deleted entity"));
        }
        let old_entity = old_node.entity.as_ref().ok_or_else(|| {
            Error::corruption(format!("Live node {} holds no entity", entity_id))
        })?;

        if self.codec.key_of(old_entity) == self.codec.key_of(entity) {
            self.storage.put_node(EntityNode { entity: Some(entity.clone()), ..old_node })?;
            self.commit()?;
        } else {
            self.delete_by_id(entity_id)?;
            let new_id = self.add(entity)?;
            if new_id != entity_id {
                return Err(Error::corruption(format!(
                    "Entity id changed from {} to {} during update",
                    entity_id, new_id
                )));
            }
        }
        Ok(())
    }

    /// Replaces the entity whose key equals the given entity's key, and
    /// returns its id. The tree linkage is untouched.
    ///
    /// # Errors
    ///
    /// Fails with `KeyNotFound` if no entity with a matching key exists.
    pub fn put_by_key(&mut self, entity: &C::Entity) -> Result<i32> {
        self.ensure_open()?;
        let key = self.codec.key_of(entity);
        let path = self.tree_search(&key)?;
        let old_node = match path.last() {
            Some(entry) if entry.cmp == Ordering::Equal => &entry.node,
            _ => {
                return Err(Error::key_not_found(format!(
                    "No entity with key {:?} exists",
                    key
                )))
            }
        };

        let entity_id = old_node.id;
        self.storage.put_node(EntityNode { entity: Some(entity.clone()), ..old_node.clone() })?;
        self.commit()?;
        Ok(entity_id)
    }

    /// Relinks the parent at the top of a search path to a new child.
    /// The parent is re-read from storage since earlier writes in the
    /// same operation may have changed its other fields.
    fn replace_child(
        &mut self,
        parent: Option<&PathEntry<C::Entity>>,
        new_child_id: i32,
    ) -> Result<()> {
        match parent {
            None => {
                // The root has no parent
                self.storage.metadata_mut().root_id = new_child_id;
                Ok(())
            }
            Some(entry) => {
                let mut node = self.storage.get_node(entry.node.id)?;
                if entry.cmp == Ordering::Less {
                    node.left_id = new_child_id;
                } else {
                    node.right_id = new_child_id;
                }
                self.storage.put_node(node)
            }
        }
    }

    /// Deletes the entity with the given id and returns its slot to the
    /// free list.
    ///
    /// Returns `false` without touching the index if the id is out of
    /// range or already free; deleting a missing entity is an expected,
    /// non-exceptional outcome.
    ///
    /// # Errors
    ///
    /// Fails with `Corruption` if the tree search cannot relocate the
    /// entity that the slot claims to hold.
    pub fn delete_by_id(&mut self, entity_id: i32) -> Result<bool> {
        self.ensure_open()?;
        if entity_id < 0 || entity_id >= self.storage.metadata().capacity {
            return Ok(false);
        }

        let target = self.storage.get_node(entity_id)?;
        if target.is_deleted() {
            log::debug!("Deleted entity with id {} that was already deleted", entity_id);
            return Ok(false);
        }
        let key = self.codec.key_of(target.entity.as_ref().ok_or_else(|| {
            Error::corruption(format!("Live node {} holds no entity", entity_id))
        })?);

        // The tree has no parent pointers, so the path to the node is
        // recomputed with a full search from the root
        let mut path = self.tree_search(&key)?;
        let mut node = match path.pop() {
            Some(entry) if entry.cmp == Ordering::Equal && entry.node.id == entity_id => entry.node,
            _ => {
                return Err(Error::corruption(
                    "Broken index structure; couldn't find the node to delete",
                ))
            }
        };
        let mut parent = path.pop();

        // Swap the node with its in-order successor until it has at most
        // one child. The successor is the leftmost node of the right
        // subtree, so after one swap the node's new left child is absent
        // and the loop exits.
        while node.left_id >= 0 && node.right_id >= 0 {
            let mut successor_path = Vec::new();
            self.tree_search_from(node.right_id, &mut successor_path, &key)?;
            let successor_entry = successor_path.pop().ok_or_else(|| {
                Error::corruption("Broken index structure; right subtree vanished during delete")
            })?;
            if successor_entry.cmp != Ordering::Less {
                return Err(Error::corruption(
                    "Broken index structure; successor search didn't end at a left child",
                ));
            }
            let successor = successor_entry.node;
            // May be empty when the successor is the node's right child
            let successor_parent = successor_path.pop();

            let new_node =
                node.with_links(successor.left_id, successor.right_id, successor.height_dif);
            let mut right_id = node.right_id;
            if right_id == successor.id {
                right_id = node.id;
            }
            let new_successor = successor.with_links(node.left_id, right_id, node.height_dif);

            self.replace_child(parent.as_ref(), successor.id)?;
            if let Some(entry) = successor_parent.as_ref() {
                self.replace_child(Some(entry), node.id)?;
            }
            self.storage.put_node(new_node.clone())?;
            self.storage.put_node(new_successor.clone())?;

            node = new_node;
            parent = match successor_parent {
                Some(entry) => Some(entry),
                None => Some(PathEntry { cmp: Ordering::Greater, node: new_successor }),
            };
        }

        // Splice the node out, re-linking its parent to the only child
        let only_child = if node.left_id >= 0 { node.left_id } else { node.right_id };
        self.replace_child(parent.as_ref(), only_child)?;

        // Nothing points at the slot any more; prepend it to the free list
        let first_deleted_id = self.storage.metadata().first_deleted_id;
        self.storage.put_node(EntityNode::free(entity_id, first_deleted_id))?;
        let metadata = self.storage.metadata_mut();
        metadata.first_deleted_id = entity_id;
        metadata.num_entities -= 1;
        self.commit()?;

        Ok(true)
    }

    /// Deletes the entity with the given key.
    ///
    /// Returns `false` if no entity with the key exists.
    pub fn delete_by_key(&mut self, key: &C::Key) -> Result<bool> {
        self.ensure_open()?;
        let path = self.tree_search(key)?;
        match path.last() {
            Some(entry) if entry.cmp == Ordering::Equal => self.delete_by_id(entry.node.id),
            _ => Ok(false),
        }
    }

    /// Validates the tree structure against the metadata.
    ///
    /// Checks the BST ordering property with strict bounds inherited from
    /// ancestors, that no reachable node is marked deleted, and that the
    /// number of reachable nodes equals the metadata entity count. Purely
    /// diagnostic; no repair is ever attempted.
    pub fn validate_structure(&mut self) -> Result<()> {
        self.ensure_open()?;
        let metadata = self.storage.metadata().clone();
        if metadata.root_id == NO_NODE {
            if metadata.num_entities == 0 {
                return Ok(());
            }
            return Err(Error::corruption(format!(
                "Header says there are {} entities in the storage but the root points to no entity",
                metadata.num_entities
            )));
        }

        let count = self.validate_subtree(metadata.root_id, None, None)?;
        if count != metadata.num_entities {
            return Err(Error::corruption(format!(
                "Found {} entities when traversing the index but the header says there should be {}",
                count, metadata.num_entities
            )));
        }
        Ok(())
    }

    fn validate_subtree(
        &mut self,
        entity_id: i32,
        min: Option<&C::Key>,
        max: Option<&C::Key>,
    ) -> Result<i32> {
        let node = self.storage.get_node(entity_id)?;
        let entity = match node.entity.as_ref() {
            Some(entity) if !node.is_deleted() => entity,
            _ => {
                return Err(Error::corruption(format!(
                    "Reached deleted node {} when validating the index structure",
                    entity_id
                )))
            }
        };
        let key = self.codec.key_of(entity);
        if min.is_some_and(|m| *m >= key) || max.is_some_and(|m| *m <= key) {
            return Err(Error::corruption(format!(
                "Entity {} out of order when validating the index structure",
                entity_id
            )));
        }

        // The bounds shrink strictly at every level, so a cycle in the
        // child links cannot recurse forever
        let mut count = 1;
        if node.left_id != NO_NODE {
            count += self.validate_subtree(node.left_id, min, Some(&key))?;
        }
        if node.right_id != NO_NODE {
            count += self.validate_subtree(node.right_id, Some(&key), max)?;
        }
        Ok(count)
    }

    /// Streams all entities in increasing id order using batched range
    /// reads, skipping free slots.
    ///
    /// The capacity is snapshotted when the stream is created, so slots
    /// appended afterwards are not visited.
    pub fn stream_all(&mut self) -> Result<EntityStream<'_, C, S>> {
        self.iterate_from(0)
    }

    /// Streams entities in increasing id order starting at `start_id`.
    pub fn iterate_from(&mut self, start_id: i32) -> Result<EntityStream<'_, C, S>> {
        self.ensure_open()?;
        let capacity = self.storage.metadata().capacity;
        Ok(EntityStream {
            index: self,
            next_id: start_id.max(0),
            capacity,
            batch: Vec::new().into_iter(),
        })
    }

    /// Collects all entities in increasing id order.
    pub fn get_all(&mut self) -> Result<Vec<C::Entity>> {
        self.stream_all()?.collect()
    }

    /// Iterates entities in ascending key order, starting at the first
    /// entity with key >= `start`, or at the minimum when `start` is `None`.
    ///
    /// The iterator holds the index exclusively for its lifetime; the
    /// tree cannot be mutated while a traversal is live.
    pub fn iter_ascending(&mut self, start: Option<&C::Key>) -> Result<OrderedIter<'_, C, S>> {
        self.ordered_iter(start, true)
    }

    /// Iterates entities in descending key order, starting at the last
    /// entity with key <= `start`, or at the maximum when `start` is `None`.
    pub fn iter_descending(&mut self, start: Option<&C::Key>) -> Result<OrderedIter<'_, C, S>> {
        self.ordered_iter(start, false)
    }

    fn ordered_iter(
        &mut self,
        start: Option<&C::Key>,
        ascending: bool,
    ) -> Result<OrderedIter<'_, C, S>> {
        self.ensure_open()?;
        let mut path: Vec<PathEntry<C::Entity>> = Vec::new();
        match start {
            None => {
                // Walk to the minimum (or maximum) entity
                let mut current_id = self.storage.metadata().root_id;
                while current_id >= 0 {
                    let node = self.storage.get_node(current_id)?;
                    let next_id = if ascending { node.left_id } else { node.right_id };
                    let cmp = if ascending { Ordering::Less } else { Ordering::Greater };
                    path.push(PathEntry { cmp, node });
                    current_id = next_id;
                }
            }
            Some(key) => {
                let root_id = self.storage.metadata().root_id;
                self.tree_search_from(root_id, &mut path, key)?;
                // Drop the tail of the path that the traversal has
                // already passed
                while matches!(path.last(), Some(entry) if overshot(entry.cmp, ascending)) {
                    path.pop();
                }
            }
        }
        Ok(OrderedIter { index: self, path, ascending })
    }

    /// Closes the index. Every subsequent operation fails with
    /// `ClosedStorage`. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.storage.close()?;
        self.closed = true;
        Ok(())
    }
}

/// Whether a path entry lies on the already-visited side of a traversal.
fn overshot(cmp: Ordering, ascending: bool) -> bool {
    if ascending {
        cmp == Ordering::Greater
    } else {
        cmp == Ordering::Less
    }
}

/// Iterator over all slot ids in batched range reads; see
/// [`EntityIndex::stream_all`].
pub struct EntityStream<'a, C: EntityCodec, S: EntityNodeStorage<C::Entity>> {
    index: &'a mut EntityIndex<C, S>,
    next_id: i32,
    capacity: i32,
    batch: std::vec::IntoIter<EntityNode<C::Entity>>,
}

impl<C: EntityCodec, S: EntityNodeStorage<C::Entity>> Iterator for EntityStream<'_, C, S> {
    type Item = Result<C::Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            for node in self.batch.by_ref() {
                if let Some(entity) = node.entity {
                    return Some(Ok(entity));
                }
            }
            if self.next_id >= self.capacity {
                return None;
            }
            let end_id = (self.next_id + STREAM_BATCH_SIZE).min(self.capacity);
            match self.index.storage.get_node_range(self.next_id, end_id) {
                Ok(nodes) => {
                    self.next_id = end_id;
                    self.batch = nodes.into_iter();
                }
                Err(e) => {
                    self.next_id = self.capacity;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// In-order tree traversal; see [`EntityIndex::iter_ascending`] and
/// [`EntityIndex::iter_descending`].
///
/// The iterator owns the root-to-node search path. On each step it
/// either descends into the appropriate child subtree, or pops ancestors
/// until it finds one the current node was reached from in the trailing
/// direction.
pub struct OrderedIter<'a, C: EntityCodec, S: EntityNodeStorage<C::Entity>> {
    index: &'a mut EntityIndex<C, S>,
    path: Vec<PathEntry<C::Entity>>,
    ascending: bool,
}

impl<C: EntityCodec, S: EntityNodeStorage<C::Entity>> OrderedIter<'_, C, S> {
    fn advance(&mut self, node: &EntityNode<C::Entity>, key: &C::Key) -> Result<()> {
        let descend_id = if self.ascending { node.right_id } else { node.left_id };
        if descend_id >= 0 {
            if let Some(top) = self.path.last_mut() {
                top.cmp = if self.ascending { Ordering::Greater } else { Ordering::Less };
            }
            self.index.tree_search_from(descend_id, &mut self.path, key)?;
        } else {
            self.path.pop();
            while matches!(self.path.last(), Some(entry) if overshot(entry.cmp, self.ascending)) {
                self.path.pop();
            }
        }
        Ok(())
    }
}

impl<C: EntityCodec, S: EntityNodeStorage<C::Entity>> Iterator for OrderedIter<'_, C, S> {
    type Item = Result<C::Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        // Invariant: the top of the path is the next node to yield
        let node = self.path.last()?.node.clone();
        let entity = match node.entity.clone() {
            Some(entity) => entity,
            None => {
                self.path.clear();
                return Some(Err(Error::corruption(format!(
                    "Reached deleted node {} when iterating the index",
                    node.id
                ))));
            }
        };

        let key = self.index.codec.key_of(&entity);
        if let Err(e) = self.advance(&node, &key) {
            self.path.clear();
            return Some(Err(e));
        }
        Some(Ok(entity))
    }
}
