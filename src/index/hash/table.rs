use std::marker::PhantomData;
use std::sync::Arc;
use log::{debug, warn};
use parking_lot::RwLock;

use crate::common::types::{PageId, PagePtr};
use crate::index::hash::bucket_page::HashBucketPage;
use crate::index::hash::codec::{FixedCodec, KeyComparator, KeyHasher};
use crate::index::hash::directory_page::{HashDirectoryPage, DIRECTORY_MAX_DEPTH};
use crate::index::hash::error::HashIndexError;
use crate::storage::buffer::BufferPoolManager;
use crate::transaction::Transaction;

/// Disk-resident extendible hash index. The directory and every bucket
/// live on buffer-pool pages; the index itself only remembers the
/// directory's page id.
///
/// Latching is two-level: lookups, non-splitting inserts and removes hold
/// the table latch shared and latch the one bucket page they touch;
/// structural changes (split, merge) hold the table latch exclusive and
/// need no bucket latches.
pub struct ExtendibleHashTable<K, V, C, H> {
    buffer_pool: Arc<BufferPoolManager>,
    directory_page_id: PageId,
    comparator: C,
    hash_fn: H,
    table_latch: RwLock<()>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, C, H> ExtendibleHashTable<K, V, C, H>
where
    K: FixedCodec,
    V: FixedCodec + PartialEq,
    C: KeyComparator<K>,
    H: KeyHasher<K>,
{
    /// Create an index with global depth 1 and two empty buckets of
    /// local depth 1.
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        comparator: C,
        hash_fn: H,
    ) -> Result<Self, HashIndexError> {
        let (dir_ptr, directory_page_id) = buffer_pool.new_page()?;
        let mut directory = HashDirectoryPage::new(directory_page_id);
        directory.incr_global_depth();

        for index in 0..2 {
            let (bucket_ptr, bucket_page_id) = match buffer_pool.new_page() {
                Ok(result) => result,
                Err(e) => {
                    let _ = buffer_pool.unpin_page(directory_page_id, false);
                    return Err(e.into());
                }
            };
            HashBucketPage::<K, V>::new().write_to(&mut bucket_ptr.write());
            buffer_pool.unpin_page(bucket_page_id, true)?;
            directory.set_bucket_page_id(index, bucket_page_id);
            directory.set_local_depth(index, 1);
        }

        directory.write_to(&mut dir_ptr.write());
        buffer_pool.unpin_page(directory_page_id, true)?;

        Ok(Self {
            buffer_pool,
            directory_page_id,
            comparator,
            hash_fn,
            table_latch: RwLock::new(()),
            _marker: PhantomData,
        })
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    fn hash(&self, key: &K) -> u32 {
        self.hash_fn.hash_key(key)
    }

    /// Fetch and decode the directory page
    fn fetch_directory(&self) -> Result<(PagePtr, HashDirectoryPage), HashIndexError> {
        let dir_ptr = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let directory = HashDirectoryPage::from_page(&dir_ptr.read());
        Ok((dir_ptr, directory))
    }

    /// Fetch a bucket page, unpinning the directory on failure
    fn fetch_bucket(&self, bucket_page_id: PageId) -> Result<PagePtr, HashIndexError> {
        match self.buffer_pool.fetch_page(bucket_page_id) {
            Ok(ptr) => Ok(ptr),
            Err(e) => {
                let _ = self.buffer_pool.unpin_page(self.directory_page_id, false);
                Err(e.into())
            }
        }
    }

    /// Collect every value stored under `key`
    pub fn get_value(&self, _txn: &Transaction, key: &K) -> Result<Vec<V>, HashIndexError> {
        let _guard = self.table_latch.read();

        let (_dir_ptr, directory) = self.fetch_directory()?;
        let index = directory.hash_to_index(self.hash(key));
        let bucket_page_id = directory.bucket_page_id(index);
        let bucket_ptr = self.fetch_bucket(bucket_page_id)?;

        let mut result = Vec::new();
        {
            let page_guard = bucket_ptr.read();
            let bucket = HashBucketPage::<K, V>::from_page(&page_guard);
            bucket.get_value(key, &self.comparator, &mut result);
        }

        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(result)
    }

    /// Insert a (key, value) pair. Returns false on an exact duplicate.
    /// A full bucket routes through the split path.
    pub fn insert(&self, txn: &Transaction, key: &K, value: &V) -> Result<bool, HashIndexError> {
        {
            let _guard = self.table_latch.read();

            let (_dir_ptr, directory) = self.fetch_directory()?;
            let index = directory.hash_to_index(self.hash(key));
            let bucket_page_id = directory.bucket_page_id(index);
            let bucket_ptr = self.fetch_bucket(bucket_page_id)?;

            let mut page_guard = bucket_ptr.write();
            let mut bucket = HashBucketPage::<K, V>::from_page(&page_guard);

            if bucket.insert(key, value, &self.comparator) {
                bucket.write_to(&mut page_guard);
                drop(page_guard);
                self.buffer_pool.unpin_page(bucket_page_id, true)?;
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                return Ok(true);
            }

            // A failed insert into a non-full bucket means the exact pair
            // is already present; a full bucket may still hide the pair.
            let duplicate = !bucket.is_full() || bucket.is_repeat(key, value, &self.comparator);
            drop(page_guard);
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;

            if duplicate {
                return Ok(false);
            }
        }

        self.split_insert(txn, key, value)
    }

    /// Split path: re-check under the exclusive table latch, then split
    /// the full bucket, redistribute, and retry until the insert lands or
    /// the bucket cannot split further.
    fn split_insert(&self, _txn: &Transaction, key: &K, value: &V) -> Result<bool, HashIndexError> {
        let _guard = self.table_latch.write();

        loop {
            let (dir_ptr, mut directory) = self.fetch_directory()?;
            let index = directory.hash_to_index(self.hash(key));
            let bucket_page_id = directory.bucket_page_id(index);
            let bucket_ptr = self.fetch_bucket(bucket_page_id)?;

            let mut bucket = HashBucketPage::<K, V>::from_page(&bucket_ptr.read());

            // Somebody may have made room (or inserted the pair) between
            // our shared-latch attempt and now.
            if bucket.insert(key, value, &self.comparator) {
                bucket.write_to(&mut bucket_ptr.write());
                self.buffer_pool.unpin_page(bucket_page_id, true)?;
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                return Ok(true);
            }
            if !bucket.is_full() || bucket.is_repeat(key, value, &self.comparator) {
                self.buffer_pool.unpin_page(bucket_page_id, false)?;
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                return Ok(false);
            }

            if directory.local_depth(index) >= DIRECTORY_MAX_DEPTH {
                warn!(
                    "bucket page {} full at max depth {}; insert rejected",
                    bucket_page_id, DIRECTORY_MAX_DEPTH
                );
                self.buffer_pool.unpin_page(bucket_page_id, false)?;
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                return Ok(false);
            }

            directory.incr_local_depth(index);
            if directory.local_depth(index) > directory.global_depth() {
                directory.incr_global_depth();
            }

            let split_index = directory.split_image_index(index);
            let new_depth = directory.local_depth(index);

            let (split_ptr, split_page_id) = match self.buffer_pool.new_page() {
                Ok(result) => result,
                Err(e) => {
                    let _ = self.buffer_pool.unpin_page(bucket_page_id, false);
                    let _ = self.buffer_pool.unpin_page(self.directory_page_id, false);
                    return Err(e.into());
                }
            };
            directory.set_local_depth(split_index, new_depth);
            directory.set_bucket_page_id(split_index, split_page_id);

            // Redistribute on the new distinguishing bit
            let mut split_bucket = HashBucketPage::<K, V>::new();
            let mask = directory.local_depth_mask(index);
            let split_pattern = split_index as u32 & mask;
            for (k, v) in bucket.copy_mappings_and_reset() {
                if self.hash(&k) & mask == split_pattern {
                    split_bucket.insert(&k, &v, &self.comparator);
                } else {
                    bucket.insert(&k, &v, &self.comparator);
                }
            }

            // Every directory slot congruent to the split image (on the
            // low new-depth bits) moves to the new bucket; every slot
            // congruent to the old bucket adopts the new depth. Walking
            // upward from the residue covers the whole directory.
            let step = 1usize << new_depth;
            let size = directory.size();
            let mut i = split_index & (step - 1);
            while i < size {
                directory.set_bucket_page_id(i, split_page_id);
                directory.set_local_depth(i, new_depth);
                i += step;
            }
            let mut i = index & (step - 1);
            while i < size {
                directory.set_bucket_page_id(i, bucket_page_id);
                directory.set_local_depth(i, new_depth);
                i += step;
            }

            bucket.write_to(&mut bucket_ptr.write());
            split_bucket.write_to(&mut split_ptr.write());
            directory.write_to(&mut dir_ptr.write());

            self.buffer_pool.unpin_page(bucket_page_id, true)?;
            self.buffer_pool.unpin_page(split_page_id, true)?;
            self.buffer_pool.unpin_page(self.directory_page_id, true)?;

            debug!(
                "split bucket page {} into {} at local depth {} (global depth {})",
                bucket_page_id,
                split_page_id,
                new_depth,
                directory.global_depth()
            );
            // Loop: the retried insert usually lands now; if every pair
            // followed one side of the split it may force another round.
        }
    }

    /// Remove an exact (key, value) pair; an emptied bucket triggers the
    /// merge path.
    pub fn remove(&self, txn: &Transaction, key: &K, value: &V) -> Result<bool, HashIndexError> {
        let removed = {
            let _guard = self.table_latch.read();

            let (_dir_ptr, directory) = self.fetch_directory()?;
            let index = directory.hash_to_index(self.hash(key));
            let bucket_page_id = directory.bucket_page_id(index);
            let bucket_ptr = self.fetch_bucket(bucket_page_id)?;

            let mut page_guard = bucket_ptr.write();
            let mut bucket = HashBucketPage::<K, V>::from_page(&page_guard);
            let removed = bucket.remove(key, value, &self.comparator);
            if removed {
                bucket.write_to(&mut page_guard);
            }
            drop(page_guard);

            self.buffer_pool.unpin_page(bucket_page_id, removed)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            removed
        };

        if removed {
            self.merge(txn, key)?;
        }
        Ok(removed)
    }

    /// Merge path: while the bucket addressed by `key` is empty, coalesce
    /// it with its equal-depth split image, repoint the directory, delete
    /// the drained page, and shrink the directory when no slot needs its
    /// full width any more.
    fn merge(&self, _txn: &Transaction, key: &K) -> Result<(), HashIndexError> {
        let _guard = self.table_latch.write();

        let (dir_ptr, mut directory) = self.fetch_directory()?;

        loop {
            let index = directory.hash_to_index(self.hash(key));
            let bucket_page_id = directory.bucket_page_id(index);
            // Earlier iterations may already have repointed slots and
            // deleted pages, so any bail-out below must persist the
            // directory first.
            let bucket_ptr = match self.buffer_pool.fetch_page(bucket_page_id) {
                Ok(ptr) => ptr,
                Err(e) => {
                    directory.write_to(&mut dir_ptr.write());
                    let _ = self.buffer_pool.unpin_page(self.directory_page_id, true);
                    return Err(e.into());
                }
            };
            let empty = HashBucketPage::<K, V>::from_page(&bucket_ptr.read()).is_empty();
            self.buffer_pool.unpin_page(bucket_page_id, false)?;

            if !empty {
                break;
            }

            let depth = directory.local_depth(index);
            if depth <= 1 {
                break;
            }
            let split_index = directory.split_image_index(index);
            if directory.local_depth(split_index) != depth {
                // Only equal-depth siblings coalesce
                break;
            }

            let sibling_page_id = directory.bucket_page_id(split_index);
            let new_depth = depth - 1;

            // Every slot that addressed either half now addresses the
            // sibling at the reduced depth.
            let step = 1usize << new_depth;
            let size = directory.size();
            let mut i = index & (step - 1);
            while i < size {
                directory.set_bucket_page_id(i, sibling_page_id);
                directory.set_local_depth(i, new_depth);
                i += step;
            }

            if let Err(e) = self.buffer_pool.delete_page(bucket_page_id) {
                directory.write_to(&mut dir_ptr.write());
                let _ = self.buffer_pool.unpin_page(self.directory_page_id, true);
                return Err(e.into());
            }

            if directory.can_shrink() {
                directory.decr_global_depth();
            }

            debug!(
                "merged bucket page {} into {} at local depth {} (global depth {})",
                bucket_page_id,
                sibling_page_id,
                new_depth,
                directory.global_depth()
            );
        }

        directory.write_to(&mut dir_ptr.write());
        self.buffer_pool.unpin_page(self.directory_page_id, true)?;
        Ok(())
    }

    pub fn get_global_depth(&self) -> Result<u32, HashIndexError> {
        let _guard = self.table_latch.read();
        let (_dir_ptr, directory) = self.fetch_directory()?;
        let global_depth = directory.global_depth();
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(global_depth)
    }

    /// Re-check the directory's structural invariants
    pub fn verify_integrity(&self) -> Result<(), HashIndexError> {
        let _guard = self.table_latch.read();
        let (_dir_ptr, directory) = self.fetch_directory()?;
        let result = directory.verify_integrity();
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        result
    }
}
