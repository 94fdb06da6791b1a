// End-to-end tests for the entity index engine.
// These cover add/get/delete flows, free-list reuse, ordered traversal,
// persistence across reopen, and structural validation under churn.

use bytes::{Buf, BufMut, BytesMut};
use cbstore::{EntityCodec, EntityIndex, Error, FileEntityIndex, InMemoryEntityIndex, Result};
use proptest::prelude::*;
use rand::prelude::*;
use std::collections::BTreeMap;
use tempfile::TempDir;

/// A player record keyed on "last, first", as in the reference databases.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Player {
    last_name: String,
    first_name: String,
    elo: u32,
}

impl Player {
    fn new(last_name: &str, first_name: &str) -> Self {
        Self { last_name: last_name.to_string(), first_name: first_name.to_string(), elo: 0 }
    }

    fn key(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone)]
struct PlayerCodec;

const NAME_WIDTH: usize = 30;

impl EntityCodec for PlayerCodec {
    type Entity = Player;
    type Key = String;

    fn serialized_len(&self) -> usize {
        2 * NAME_WIDTH + 4
    }

    fn encode(&self, player: &Player, buf: &mut BytesMut) -> Result<()> {
        for name in [&player.last_name, &player.first_name] {
            let mut padded = [b' '; NAME_WIDTH];
            let bytes = name.as_bytes();
            if bytes.len() > NAME_WIDTH {
                return Err(Error::invalid_argument("name too long"));
            }
            padded[..bytes.len()].copy_from_slice(bytes);
            buf.put_slice(&padded);
        }
        buf.put_u32_le(player.elo);
        Ok(())
    }

    fn decode(&self, mut buf: &[u8]) -> Result<Player> {
        let mut names = Vec::with_capacity(2);
        for _ in 0..2 {
            names.push(String::from_utf8_lossy(&buf[..NAME_WIDTH]).trim_end().to_string());
            buf.advance(NAME_WIDTH);
        }
        let first_name = names.pop().unwrap();
        let last_name = names.pop().unwrap();
        Ok(Player { last_name, first_name, elo: buf.get_u32_le() })
    }

    fn key_of(&self, player: &Player) -> String {
        player.key()
    }
}

fn in_memory() -> InMemoryEntityIndex<PlayerCodec> {
    EntityIndex::in_memory(PlayerCodec)
}

#[test]
fn test_e2e_add_iterate_delete() {
    let mut index = in_memory();
    index.add(&Player::new("Carlsen", "Magnus")).unwrap();
    index.add(&Player::new("Caruana", "Fabiano")).unwrap();
    index.add(&Player::new("Adams", "Michael")).unwrap();

    let last_names: Vec<String> =
        index.iter_ascending(None).unwrap().map(|p| p.unwrap().last_name).collect();
    assert_eq!(last_names, vec!["Adams", "Carlsen", "Caruana"]);

    assert!(index.delete_by_key(&"Carlsen, Magnus".to_string()).unwrap());
    assert!(index.get_by_key(&"Carlsen, Magnus".to_string()).unwrap().is_none());
    assert_eq!(index.num_entities(), 2);
    index.validate_structure().unwrap();
}

#[test]
fn test_add_then_get_by_key_returns_equal_entity() {
    let mut index = in_memory();
    let player = Player { last_name: "Kramnik".into(), first_name: "Vladimir".into(), elo: 2800 };
    index.add(&player).unwrap();

    let found = index.get_by_key(&player.key()).unwrap().unwrap();
    assert_eq!(found, player);
}

#[test]
fn test_free_list_reuses_most_recently_deleted() {
    let mut index = in_memory();
    let _first = index.add(&Player::new("Anand", "Viswanathan")).unwrap();
    let second = index.add(&Player::new("Topalov", "Veselin")).unwrap();
    let _third = index.add(&Player::new("Leko", "Peter")).unwrap();

    assert!(index.delete_by_id(second).unwrap());

    let fourth = index.add(&Player::new("Svidler", "Peter")).unwrap();
    assert_eq!(fourth, second, "most recently deleted id should be reused first");
    index.validate_structure().unwrap();
}

#[test]
fn test_ascending_starts_at_smallest_key_geq_start() {
    let mut index = in_memory();
    for last in ["Adams", "Carlsen", "Giri", "Nakamura"] {
        index.add(&Player::new(last, "X")).unwrap();
    }

    // "D" falls between Carlsen and Giri
    let last_names: Vec<String> = index
        .iter_ascending(Some(&"D".to_string()))
        .unwrap()
        .map(|p| p.unwrap().last_name)
        .collect();
    assert_eq!(last_names, vec!["Giri", "Nakamura"]);
}

#[test]
fn test_descending_is_exact_reverse() {
    let mut index = in_memory();
    let mut rng = rand::rng();
    let mut lasts: Vec<String> = (0..100).map(|i| format!("Player{:03}", i)).collect();
    lasts.shuffle(&mut rng);
    for last in &lasts {
        index.add(&Player::new(last, "A")).unwrap();
    }

    let ascending: Vec<String> =
        index.iter_ascending(None).unwrap().map(|p| p.unwrap().last_name).collect();
    let mut descending: Vec<String> =
        index.iter_descending(None).unwrap().map(|p| p.unwrap().last_name).collect();

    assert_eq!(ascending.len(), index.num_entities() as usize);
    assert!(ascending.windows(2).all(|w| w[0] < w[1]));
    descending.reverse();
    assert_eq!(ascending, descending);
}

#[test]
fn test_file_index_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("players.idx");

    {
        let mut index = FileEntityIndex::create(&path, PlayerCodec).unwrap();
        for last in ["Tal", "Botvinnik", "Petrosian", "Spassky", "Fischer"] {
            index.add(&Player::new(last, "X")).unwrap();
        }
        index.delete_by_key(&"Petrosian, X".to_string()).unwrap();
        index.close().unwrap();
    }

    let mut index = FileEntityIndex::open(&path, PlayerCodec).unwrap();
    assert_eq!(index.num_entities(), 4);
    assert_eq!(index.capacity(), 5);
    index.validate_structure().unwrap();

    let last_names: Vec<String> =
        index.iter_ascending(None).unwrap().map(|p| p.unwrap().last_name).collect();
    assert_eq!(last_names, vec!["Botvinnik", "Fischer", "Spassky", "Tal"]);

    // The freed slot is reused after reopen
    let id = index.add(&Player::new("Karpov", "Anatoly")).unwrap();
    assert_eq!(id, 2);
    assert_eq!(index.capacity(), 5);
}

#[test]
fn test_file_index_put_by_id_changed_key_keeps_id() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("players.idx");
    let mut index = FileEntityIndex::create(&path, PlayerCodec).unwrap();

    index.add(&Player::new("Short", "Nigel")).unwrap();
    let id = index.add(&Player::new("Timman", "Jan")).unwrap();

    index.put_by_id(id, &Player::new("Yusupov", "Artur")).unwrap();
    let player = index.get_by_id(id).unwrap().unwrap();
    assert_eq!(player.last_name, "Yusupov");
    assert!(index.get_by_key(&"Timman, Jan".to_string()).unwrap().is_none());
    index.validate_structure().unwrap();
}

#[test]
fn test_stream_all_visits_by_id_not_by_key() {
    let mut index = in_memory();
    index.add(&Player::new("Zukertort", "Johannes")).unwrap();
    index.add(&Player::new("Anderssen", "Adolf")).unwrap();
    index.add(&Player::new("Morphy", "Paul")).unwrap();

    let last_names: Vec<String> =
        index.stream_all().unwrap().map(|p| p.unwrap().last_name).collect();
    assert_eq!(last_names, vec!["Zukertort", "Anderssen", "Morphy"]);
}

#[test]
fn test_large_index_stays_consistent() {
    let mut index = in_memory();
    for i in 0..2500 {
        index.add(&Player::new(&format!("Player{:05}", i), "A")).unwrap();
    }
    assert_eq!(index.num_entities(), 2500);
    index.validate_structure().unwrap();

    // stream_all batches reads in ranges of 1000 slots
    assert_eq!(index.stream_all().unwrap().count(), 2500);
}

/// Random adds and deletes; after every batch the structure must
/// validate and the live count must match the tracked model.
#[test]
fn test_random_churn_validates() {
    let mut index = in_memory();
    let mut model: BTreeMap<String, Player> = BTreeMap::new();
    let mut rng = rand::rng();

    for round in 0..20 {
        for _ in 0..50 {
            let n: u32 = rng.random_range(0..500);
            let player = Player::new(&format!("P{:04}", n), "A");
            let key = player.key();
            if rng.random_bool(0.6) {
                match index.add(&player) {
                    Ok(_) => {
                        assert!(model.insert(key, player).is_none());
                    }
                    Err(Error::DuplicateKey(_)) => assert!(model.contains_key(&key)),
                    Err(e) => panic!("unexpected error in round {}: {}", round, e),
                }
            } else {
                let deleted = index.delete_by_key(&key).unwrap();
                assert_eq!(deleted, model.remove(&key).is_some());
            }
        }

        index.validate_structure().unwrap();
        assert_eq!(index.num_entities() as usize, model.len());

        let keys: Vec<String> =
            index.iter_ascending(None).unwrap().map(|p| p.unwrap().key()).collect();
        let expected: Vec<String> = model.keys().cloned().collect();
        assert_eq!(keys, expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// For any sequence of adds and deletes the tree validates and the
    /// ascending iteration matches a model kept in a BTreeMap.
    #[test]
    fn prop_add_delete_sequences_keep_structure(ops in prop::collection::vec((any::<bool>(), 0u16..100), 1..120)) {
        let mut index = EntityIndex::in_memory(PlayerCodec);
        let mut model: BTreeMap<String, ()> = BTreeMap::new();

        for (is_add, n) in ops {
            let player = Player::new(&format!("P{:03}", n), "A");
            let key = player.key();
            if is_add {
                match index.add(&player) {
                    Ok(_) => { model.insert(key, ()); }
                    Err(Error::DuplicateKey(_)) => prop_assert!(model.contains_key(&key)),
                    Err(e) => return Err(TestCaseError::fail(format!("unexpected error: {}", e))),
                }
            } else {
                let deleted = index.delete_by_key(&key).unwrap();
                prop_assert_eq!(deleted, model.remove(&key).is_some());
            }
        }

        index.validate_structure().unwrap();
        prop_assert_eq!(index.num_entities() as usize, model.len());

        let keys: Vec<String> = index.iter_ascending(None).unwrap().map(|p| p.unwrap().key()).collect();
        let expected: Vec<String> = model.keys().cloned().collect();
        prop_assert_eq!(keys, expected);
    }
}
