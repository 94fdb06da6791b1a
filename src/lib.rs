//! # cbstore - A ChessBase-Format Storage Engine
//!
//! cbstore is the storage core for a proprietary chess-database file
//! format. Fixed-size entity records (players, tournaments, annotators,
//! sources, teams) are kept in sorted order through an on-disk binary
//! search tree, and variable-length records (move lists, annotations,
//! text) live in an append-biased blob store.
//!
//! ## Architecture
//!
//! The engine consists of two tightly coupled components:
//!
//! - **Entity Index**: a persistent, id-addressable, key-ordered store of
//!   entities with O(log n) key lookup, O(1) id lookup, insertion,
//!   deletion with slot reuse, and ordered traversal from an arbitrary
//!   start key
//! - **Blob Store**: an append/overwrite store for self-describing
//!   variable-length records addressed by byte offset, with
//!   grow-in-place updates, append-on-overflow relocation, and
//!   byte-region insertion
//!
//! Both come in a file-backed and an in-memory flavor. The surrounding
//! database layer supplies an [`EntityCodec`] per entity schema and a
//! [`BlobSizeRetriever`] per blob schema; the engine never interprets
//! payload bytes itself.
//!
//! ## Concurrency
//!
//! The engine is single-threaded with synchronous, blocking I/O. Every
//! structural mutation flushes the metadata header before returning,
//! trading per-call latency for crash-consistency — the right trade for
//! a desktop reference database, not a server workload.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use cbstore::{FileEntityIndex, EntityCodec, Result};
//! use bytes::{Buf, BufMut, BytesMut};
//!
//! /// A player entity keyed on its full name.
//! #[derive(Clone)]
//! struct Player {
//!     name: String,
//!     elo: u32,
//! }
//!
//! #[derive(Clone)]
//! struct PlayerCodec;
//!
//! impl EntityCodec for PlayerCodec {
//!     type Entity = Player;
//!     type Key = String;
//!
//!     fn serialized_len(&self) -> usize { 34 }
//!
//!     fn encode(&self, player: &Player, buf: &mut BytesMut) -> Result<()> {
//!         let mut name = [b' '; 30];
//!         name[..player.name.len()].copy_from_slice(player.name.as_bytes());
//!         buf.put_slice(&name);
//!         buf.put_u32_le(player.elo);
//!         Ok(())
//!     }
//!
//!     fn decode(&self, mut buf: &[u8]) -> Result<Player> {
//!         let name = String::from_utf8_lossy(&buf[..30]).trim_end().to_string();
//!         buf.advance(30);
//!         Ok(Player { name, elo: buf.get_u32_le() })
//!     }
//!
//!     fn key_of(&self, player: &Player) -> String { player.name.clone() }
//! }
//!
//! # fn main() -> cbstore::Result<()> {
//! let mut players = FileEntityIndex::create("./players.idx", PlayerCodec)?;
//!
//! let id = players.add(&Player { name: "Carlsen, Magnus".to_string(), elo: 2882 })?;
//! players.add(&Player { name: "Adams, Michael".to_string(), elo: 2761 })?;
//!
//! // O(1) lookup by id, O(log n) by key
//! assert!(players.get_by_id(id)?.is_some());
//! for player in players.iter_ascending(None)? {
//!     println!("{}", player?.name);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod blob;
pub mod entity;
pub mod error;

// Re-exports
pub use blob::{BlobSizeRetriever, BlobStorage, FileBlobStorage, InMemoryBlobStorage};
pub use entity::{
    EntityCodec, EntityIndex, EntityNode, FileEntityIndex, InMemoryEntityIndex,
};
pub use error::{Error, Result};
