//! Sized block pool (spec §4.3).
//!
//! Three fixed block sizes (4 KiB / 64 KiB / 1 MiB), each backed by its own
//! file. `slot_id = file_offset / block_size`. Disk I/O is dispatched to a
//! blocking thread via `tokio::task::spawn_blocking`, matching the
//! cooperative-scheduler discipline the source system used
//! `asyncio.to_thread` for.
//!
//! Free lists are not persisted (spec §9's open risk). This store is
//! opened with every slot marked allocated; the owning facade calls
//! [`SizedBlockStore::rebuild_free_list`] once the pointer table has
//! loaded and can report which slots are actually live.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{DocStoreError, Result};

/// Which of the three fixed block sizes a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockSizeClass {
    Small,
    Medium,
    Large,
}

/// A single fixed-size block file with its own slot allocator.
pub struct SizedBlockStore {
    block_size: usize,
    file: Arc<Mutex<File>>,
    free_list: Mutex<Vec<u64>>,
    next_slot: AtomicU64,
}

impl SizedBlockStore {
    pub async fn open(path: PathBuf, block_size: usize) -> Result<Self> {
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&path)
        })
        .await
        .map_err(|e| DocStoreError::Storage(e.to_string()))??;

        let len = file.metadata()?.len();
        let next_slot = len / block_size as u64;

        Ok(Self {
            block_size,
            file: Arc::new(Mutex::new(file)),
            free_list: Mutex::new(Vec::new()),
            next_slot: AtomicU64::new(next_slot),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Allocate a slot, reusing a freed one if available.
    pub async fn allocate(&self) -> Result<u64> {
        if let Some(slot) = self.free_list.lock().pop() {
            return Ok(slot);
        }
        let slot = self.next_slot.fetch_add(1, Ordering::SeqCst);
        let block_size = self.block_size;
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = file.lock();
            guard.seek(SeekFrom::Start(slot * block_size as u64))?;
            guard.write_all(&vec![0u8; block_size])?;
            guard.flush()?;
            Ok::<(), std::io::Error>(())
        })
        .await
        .map_err(|e| DocStoreError::Storage(e.to_string()))??;
        Ok(slot)
    }

    /// Write `data` into `slot`, zero-padded to the block size. Errors if
    /// `data` exceeds the block size.
    pub async fn write(&self, slot: u64, data: Vec<u8>) -> Result<()> {
        if data.len() > self.block_size {
            return Err(DocStoreError::BlockAllocation(format!(
                "payload of {} bytes exceeds block size {}",
                data.len(),
                self.block_size
            )));
        }
        let block_size = self.block_size;
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || {
            let mut buf = data;
            buf.resize(block_size, 0);
            let mut guard = file.lock();
            guard.seek(SeekFrom::Start(slot * block_size as u64))?;
            guard.write_all(&buf)?;
            Ok::<(), std::io::Error>(())
        })
        .await
        .map_err(|e| DocStoreError::Storage(e.to_string()))??;
        Ok(())
    }

    /// Read the raw block contents of `slot` (full block, zero-padded).
    pub async fn read(&self, slot: u64) -> Result<Vec<u8>> {
        let block_size = self.block_size;
        let file = self.file.clone();
        let data = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; block_size];
            let mut guard = file.lock();
            guard.seek(SeekFrom::Start(slot * block_size as u64))?;
            guard.read_exact(&mut buf)?;
            Ok::<Vec<u8>, std::io::Error>(buf)
        })
        .await
        .map_err(|e| DocStoreError::Storage(e.to_string()))??;
        Ok(data)
    }

    /// Return `slot` to the free list for reuse.
    pub fn free(&self, slot: u64) {
        self.free_list.lock().push(slot);
    }

    /// Rebuild the free list from scratch: every slot in `[0, next_slot)`
    /// not present in `allocated` is free.
    pub fn rebuild_free_list(&self, allocated: &HashSet<u64>) {
        let total = self.next_slot.load(Ordering::SeqCst);
        let mut free = Vec::new();
        for slot in 0..total {
            if !allocated.contains(&slot) {
                free.push(slot);
            }
        }
        *self.free_list.lock() = free;
    }

    pub fn free_slot_count(&self) -> usize {
        self.free_list.lock().len()
    }

    pub fn total_slots(&self) -> u64 {
        self.next_slot.load(Ordering::SeqCst)
    }
}

/// The three sized block stores, one file each.
pub struct BlockStore {
    pub small: SizedBlockStore,
    pub medium: SizedBlockStore,
    pub large: SizedBlockStore,
}

impl BlockStore {
    pub async fn open(
        dir: &Path,
        small_size: usize,
        medium_size: usize,
        large_size: usize,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let small = SizedBlockStore::open(dir.join("blocks_small.bin"), small_size).await?;
        let medium = SizedBlockStore::open(dir.join("blocks_medium.bin"), medium_size).await?;
        let large = SizedBlockStore::open(dir.join("blocks_large.bin"), large_size).await?;
        Ok(Self {
            small,
            medium,
            large,
        })
    }

    pub fn store_for(&self, class: BlockSizeClass) -> &SizedBlockStore {
        match class {
            BlockSizeClass::Small => &self.small,
            BlockSizeClass::Medium => &self.medium,
            BlockSizeClass::Large => &self.large,
        }
    }

    /// Pick the smallest size class that fits `len` bytes.
    pub fn class_for_size(&self, len: usize) -> Option<BlockSizeClass> {
        if len <= self.small.block_size() {
            Some(BlockSizeClass::Small)
        } else if len <= self.medium.block_size() {
            Some(BlockSizeClass::Medium)
        } else if len <= self.large.block_size() {
            Some(BlockSizeClass::Large)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn allocate_write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let store = SizedBlockStore::open(dir.path().join("b.bin"), 4096)
            .await
            .unwrap();
        let slot = store.allocate().await.unwrap();
        store.write(slot, b"hello world".to_vec()).await.unwrap();
        let data = store.read(slot).await.unwrap();
        assert_eq!(&data[..11], b"hello world");
        assert_eq!(data.len(), 4096);
    }

    #[tokio::test]
    async fn freed_slots_are_reused() {
        let dir = tempdir().unwrap();
        let store = SizedBlockStore::open(dir.path().join("b.bin"), 4096)
            .await
            .unwrap();
        let slot = store.allocate().await.unwrap();
        store.free(slot);
        let slot2 = store.allocate().await.unwrap();
        assert_eq!(slot, slot2);
    }

    #[tokio::test]
    async fn write_rejects_oversized_payload() {
        let dir = tempdir().unwrap();
        let store = SizedBlockStore::open(dir.path().join("b.bin"), 16)
            .await
            .unwrap();
        let slot = store.allocate().await.unwrap();
        let result = store.write(slot, vec![0u8; 17]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rebuild_free_list_frees_unreferenced_slots() {
        let dir = tempdir().unwrap();
        let store = SizedBlockStore::open(dir.path().join("b.bin"), 4096)
            .await
            .unwrap();
        for _ in 0..5 {
            store.allocate().await.unwrap();
        }
        let mut allocated = HashSet::new();
        allocated.insert(1u64);
        allocated.insert(3u64);
        store.rebuild_free_list(&allocated);
        assert_eq!(store.free_slot_count(), 3);
    }

    #[tokio::test]
    async fn class_for_size_picks_smallest_fit() {
        let dir = tempdir().unwrap();
        let bs = BlockStore::open(dir.path(), 4096, 65536, 1_048_576)
            .await
            .unwrap();
        assert_eq!(bs.class_for_size(100), Some(BlockSizeClass::Small));
        assert_eq!(bs.class_for_size(5000), Some(BlockSizeClass::Medium));
        assert_eq!(bs.class_for_size(100_000), Some(BlockSizeClass::Large));
        assert_eq!(bs.class_for_size(2_000_000), None);
    }
}
