//! Basic usage example for cbstore
//!
//! This example demonstrates the fundamental operations:
//! - Creating a file-backed entity index
//! - Adding entities
//! - Looking entities up by key and by id
//! - Iterating in key order
//! - Deleting entities

use bytes::{Buf, BufMut, BytesMut};
use cbstore::{EntityCodec, FileEntityIndex, Result};

/// A player entity keyed on "last name, first name".
#[derive(Clone)]
struct Player {
    name: String,
    elo: u32,
}

#[derive(Clone)]
struct PlayerCodec;

impl EntityCodec for PlayerCodec {
    type Entity = Player;
    type Key = String;

    fn serialized_len(&self) -> usize {
        34
    }

    fn encode(&self, player: &Player, buf: &mut BytesMut) -> Result<()> {
        let mut name = [b' '; 30];
        name[..player.name.len()].copy_from_slice(player.name.as_bytes());
        buf.put_slice(&name);
        buf.put_u32_le(player.elo);
        Ok(())
    }

    fn decode(&self, mut buf: &[u8]) -> Result<Player> {
        let name = String::from_utf8_lossy(&buf[..30]).trim_end().to_string();
        buf.advance(30);
        Ok(Player { name, elo: buf.get_u32_le() })
    }

    fn key_of(&self, player: &Player) -> String {
        player.name.clone()
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    // Create the index file (fails if it already exists)
    let dir = tempfile::TempDir::new()?;
    let mut players = FileEntityIndex::create(dir.path().join("players.idx"), PlayerCodec)?;

    println!("Index created");

    // Add some players
    println!("Adding players...");
    let carlsen = players.add(&Player { name: "Carlsen, Magnus".to_string(), elo: 2882 })?;
    players.add(&Player { name: "Caruana, Fabiano".to_string(), elo: 2844 })?;
    players.add(&Player { name: "Adams, Michael".to_string(), elo: 2761 })?;

    // O(log n) lookup by key
    if let Some(player) = players.get_by_key(&"Adams, Michael".to_string())? {
        println!("Found by key: {} ({})", player.name, player.elo);
    }

    // O(1) lookup by id
    if let Some(player) = players.get_by_id(carlsen)? {
        println!("Found by id {}: {}", carlsen, player.name);
    }

    // Iterate in key order
    println!("All players in key order:");
    for player in players.iter_ascending(None)? {
        let player = player?;
        println!("  {} ({})", player.name, player.elo);
    }

    // Delete a player; its slot is reused by the next add
    println!("Deleting Caruana...");
    players.delete_by_key(&"Caruana, Fabiano".to_string())?;
    println!("{} players remain", players.num_entities());

    players.close()?;
    println!("Index closed");

    Ok(())
}
