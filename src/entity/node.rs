//! Tree node representation shared by both node storage backends.

/// Sentinel child id meaning "no child".
pub const NO_NODE: i32 = -1;

/// Marker stored in `left_id` of a node that is on the free list.
pub const DELETED_MARKER: i32 = -999;

/// One slot of an entity index: the stored entity plus the structural
/// fields of the search tree.
///
/// Every id in `[0, capacity)` maps to exactly one node, which is either
/// live (it participates in the tree) or free (it participates in the
/// free list). A free node has `left_id == DELETED_MARKER` and threads
/// the free list through `right_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityNode<T> {
    /// The slot id, equal to the slot index in the backing storage.
    pub id: i32,

    /// The stored entity, or `None` for free nodes.
    pub entity: Option<T>,

    /// Left child id, or `NO_NODE`. `DELETED_MARKER` if the node is free.
    pub left_id: i32,

    /// Right child id, or `NO_NODE`. For a free node this is the id of the
    /// next node on the free list, or `NO_NODE` at the end of the chain.
    pub right_id: i32,

    /// Height difference between the right and left subtrees. The field is
    /// carried in the slot format but never maintained; see the crate docs.
    pub height_dif: i32,
}

impl<T> EntityNode<T> {
    /// Creates a fresh leaf node with no children.
    pub fn new(id: i32, entity: Option<T>) -> Self {
        Self { id, entity, left_id: NO_NODE, right_id: NO_NODE, height_dif: 0 }
    }

    /// Creates a free-list node whose successor is `next_free_id`.
    pub fn free(id: i32, next_free_id: i32) -> Self {
        Self { id, entity: None, left_id: DELETED_MARKER, right_id: next_free_id, height_dif: 0 }
    }

    /// Whether this node is on the free list.
    pub fn is_deleted(&self) -> bool {
        self.left_id == DELETED_MARKER
    }

    /// Returns a copy of this node with new structural fields.
    pub fn with_links(&self, left_id: i32, right_id: i32, height_dif: i32) -> Self
    where
        T: Clone,
    {
        Self { id: self.id, entity: self.entity.clone(), left_id, right_id, height_dif }
    }
}
