//! In-memory node storage backend.
//!
//! Keeps the tree nodes in a growable vector with no persistence. Used
//! for tests, scratch computation, and staging an index before it is
//! written out in the file format.

use crate::entity::node::EntityNode;
use crate::entity::storage::{EntityNodeStorage, IndexMetadata};
use crate::error::{Error, Result};

/// A node storage backed by a vector of nodes.
#[derive(Debug)]
pub struct InMemoryNodeStorage<T> {
    nodes: Vec<EntityNode<T>>,
    metadata: IndexMetadata,
}

impl<T> InMemoryNodeStorage<T> {
    /// Creates an empty in-memory node storage.
    pub fn new() -> Self {
        Self { nodes: Vec::new(), metadata: IndexMetadata::empty() }
    }
}

impl<T> Default for InMemoryNodeStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> EntityNodeStorage<T> for InMemoryNodeStorage<T> {
    fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut IndexMetadata {
        &mut self.metadata
    }

    fn get_node(&mut self, id: i32) -> Result<EntityNode<T>> {
        if id < 0 || id as usize >= self.nodes.len() {
            return Err(Error::invalid_argument(format!(
                "Can't read node {} when capacity is {}",
                id,
                self.nodes.len()
            )));
        }
        Ok(self.nodes[id as usize].clone())
    }

    fn put_node(&mut self, node: EntityNode<T>) -> Result<()> {
        let id = node.id;
        if id < 0 || id as usize > self.nodes.len() {
            return Err(Error::invalid_argument(format!(
                "Can't write node {} when capacity is {}",
                id,
                self.nodes.len()
            )));
        }
        if id as usize == self.nodes.len() {
            self.nodes.push(node);
        } else {
            self.nodes[id as usize] = node;
        }
        Ok(())
    }

    fn get_node_range(&mut self, start_id: i32, end_id: i32) -> Result<Vec<EntityNode<T>>> {
        if start_id < 0 {
            return Err(Error::invalid_argument(format!("Invalid range start {}", start_id)));
        }
        let start = start_id as usize;
        let end = (end_id.max(start_id) as usize).min(self.nodes.len());
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(self.nodes[start..end].to_vec())
    }

    fn put_metadata(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
