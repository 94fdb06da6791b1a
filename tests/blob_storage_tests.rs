// End-to-end tests for the blob store: prefetch-boundary reads,
// in-place vs relocated updates, byte-region insertion, and metadata
// drift tolerance on reopen.

use cbstore::{
    BlobSizeRetriever, BlobStorage, Error, FileBlobStorage, InMemoryBlobStorage, Result,
    blob::PREFETCH_SIZE,
};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use tempfile::TempDir;

/// Game-record-style blobs: the first two big-endian bytes hold the
/// blob's total length.
struct GameSize;

impl BlobSizeRetriever for GameSize {
    fn blob_size(&self, header: &[u8]) -> Result<usize> {
        if header.len() < 2 {
            return Err(Error::corruption("Blob header too short"));
        }
        Ok(u16::from_be_bytes([header[0], header[1]]) as usize)
    }
}

fn make_blob(len: usize, seed: u8) -> Vec<u8> {
    let mut blob = vec![0u8; len];
    blob[..2].copy_from_slice(&(len as u16).to_be_bytes());
    for (i, byte) in blob.iter_mut().enumerate().skip(2) {
        *byte = seed.wrapping_add((i % 251) as u8);
    }
    blob
}

fn file_storage(dir: &TempDir) -> FileBlobStorage<GameSize> {
    FileBlobStorage::create(dir.path().join("games.blob"), GameSize).unwrap()
}

#[test]
fn test_round_trip_at_prefetch_boundary() {
    let dir = TempDir::new().unwrap();
    let mut storage = file_storage(&dir);

    // One blob exactly as large as the initial read, one a byte larger
    // (forcing the follow-up read), one comfortably smaller
    for len in [PREFETCH_SIZE, PREFETCH_SIZE + 1, 100] {
        let blob = make_blob(len, len as u8);
        let offset = storage.add_blob(&blob).unwrap();
        assert_eq!(storage.get_blob(offset).unwrap(), blob);
    }
}

#[test]
fn test_blob_much_larger_than_prefetch() {
    let dir = TempDir::new().unwrap();
    let mut storage = file_storage(&dir);

    let blob = make_blob(5 * PREFETCH_SIZE, 7);
    let offset = storage.add_blob(&blob).unwrap();
    assert_eq!(storage.get_blob(offset).unwrap(), blob);
}

#[test]
fn test_put_blob_smaller_keeps_offset() {
    let dir = TempDir::new().unwrap();
    let mut storage = file_storage(&dir);

    let offset = storage.add_blob(&make_blob(200, 1)).unwrap();
    let tail = storage.add_blob(&make_blob(50, 2)).unwrap();
    let size_before = storage.size();

    let replacement = make_blob(150, 3);
    assert_eq!(storage.put_blob(offset, &replacement).unwrap(), offset);
    assert_eq!(storage.get_blob(offset).unwrap(), replacement);
    // No relocation, so the store doesn't grow and neighbors are intact
    assert_eq!(storage.size(), size_before);
    assert_eq!(storage.get_blob(tail).unwrap(), make_blob(50, 2));
}

#[test]
fn test_put_blob_larger_relocates_to_end() {
    let dir = TempDir::new().unwrap();
    let mut storage = file_storage(&dir);

    let offset = storage.add_blob(&make_blob(100, 1)).unwrap();
    storage.add_blob(&make_blob(100, 2)).unwrap();
    let size_before = storage.size();

    let replacement = make_blob(300, 3);
    let new_offset = storage.put_blob(offset, &replacement).unwrap();
    assert_eq!(new_offset, size_before);
    assert_eq!(storage.get_blob(new_offset).unwrap(), replacement);
}

#[test]
fn test_insert_shifts_trailing_blobs() {
    let dir = TempDir::new().unwrap();
    let mut storage = file_storage(&dir);

    let a = storage.add_blob(&make_blob(100, 1)).unwrap();
    let b = storage.add_blob(&make_blob(200, 2)).unwrap();
    let c = storage.add_blob(&make_blob(50, 3)).unwrap();

    let gap = 64;
    storage.insert(b, gap).unwrap();

    assert_eq!(storage.get_blob(a).unwrap(), make_blob(100, 1));
    assert_eq!(storage.get_blob(b + gap).unwrap(), make_blob(200, 2));
    assert_eq!(storage.get_blob(c + gap).unwrap(), make_blob(50, 3));
}

#[test]
fn test_insert_shift_larger_than_copy_chunk() {
    let dir = TempDir::new().unwrap();
    let mut storage = file_storage(&dir);

    // A tail well past the internal 8 KiB copy chunk, so the shift runs
    // over several chunks
    let a = storage.add_blob(&make_blob(100, 1)).unwrap();
    let mut offsets = Vec::new();
    for i in 0..10 {
        offsets.push(storage.add_blob(&make_blob(3000, i)).unwrap());
    }

    storage.insert(offsets[0], 17).unwrap();

    assert_eq!(storage.get_blob(a).unwrap(), make_blob(100, 1));
    for (i, offset) in offsets.iter().enumerate() {
        assert_eq!(storage.get_blob(offset + 17).unwrap(), make_blob(3000, i as u8));
    }
}

#[test]
fn test_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("games.blob");

    let (a, b);
    {
        let mut storage = FileBlobStorage::create(&path, GameSize).unwrap();
        a = storage.add_blob(&make_blob(500, 1)).unwrap();
        b = storage.add_blob(&make_blob(1000, 2)).unwrap();
        storage.close().unwrap();
    }

    let mut storage = FileBlobStorage::open(&path, GameSize).unwrap();
    assert_eq!(storage.get_blob(a).unwrap(), make_blob(500, 1));
    assert_eq!(storage.get_blob(b).unwrap(), make_blob(1000, 2));

    let c = storage.add_blob(&make_blob(100, 3)).unwrap();
    assert_eq!(storage.get_blob(c).unwrap(), make_blob(100, 3));
}

#[test]
fn test_header_drift_is_tolerated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("games.blob");

    let offset;
    {
        let mut storage = FileBlobStorage::create(&path, GameSize).unwrap();
        offset = storage.add_blob(&make_blob(128, 9)).unwrap();
    }

    // Scribble over the redundant size copy and a reserved word, the
    // kind of drift legacy tools leave behind
    {
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(6)).unwrap();
        file.write_all(&1u32.to_be_bytes()).unwrap();
        file.seek(SeekFrom::Start(14)).unwrap();
        file.write_all(&0xDEADBEEFu32.to_be_bytes()).unwrap();
    }

    let mut storage = FileBlobStorage::open(&path, GameSize).unwrap();
    assert_eq!(storage.get_blob(offset).unwrap(), make_blob(128, 9));
}

#[test]
fn test_trailing_junk_beyond_declared_size_is_tolerated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("games.blob");

    let offset;
    {
        let mut storage = FileBlobStorage::create(&path, GameSize).unwrap();
        offset = storage.add_blob(&make_blob(64, 4)).unwrap();
    }

    // Physical file longer than the header's size field
    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xFF; 100]).unwrap();
    }

    let mut storage = FileBlobStorage::open(&path, GameSize).unwrap();
    assert_eq!(storage.get_blob(offset).unwrap(), make_blob(64, 4));
}

#[test]
fn test_in_memory_matches_file_behavior() {
    let dir = TempDir::new().unwrap();
    let mut file_store = file_storage(&dir);
    let mut mem_store = InMemoryBlobStorage::new(GameSize);

    let blobs: Vec<Vec<u8>> = (0..5).map(|i| make_blob(100 + i * 37, i as u8)).collect();
    let file_offsets: Vec<u32> = blobs.iter().map(|b| file_store.add_blob(b).unwrap()).collect();
    let mem_offsets: Vec<u32> = blobs.iter().map(|b| mem_store.add_blob(b).unwrap()).collect();

    // Same layout modulo the file header
    for (f, m) in file_offsets.iter().zip(&mem_offsets) {
        assert_eq!(f - file_offsets[0], m - mem_offsets[0]);
    }
    for ((f, m), blob) in file_offsets.iter().zip(&mem_offsets).zip(&blobs) {
        assert_eq!(file_store.get_blob(*f).unwrap(), &blob[..]);
        assert_eq!(mem_store.get_blob(*m).unwrap(), &blob[..]);
    }
}
