use std::path::Path;
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::instance::BufferPoolInstance;
use crate::storage::disk::DiskManager;

/// Buffer pool manager: `num_instances` independent shards over one disk
/// manager. A page id belongs to instance `page_id mod num_instances`;
/// the strided id allocator inside each instance guarantees ids it hands
/// out route back to it on fetch.
pub struct BufferPoolManager {
    instances: Vec<Arc<BufferPoolInstance>>,
    /// Round-robin cursor for spreading new-page allocations
    next_instance: Mutex<usize>,
}

impl BufferPoolManager {
    /// Create a pool of `num_instances` shards of `pool_size` frames each
    pub fn new(
        num_instances: usize,
        pool_size: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        assert!(num_instances > 0);
        let disk_manager = Arc::new(DiskManager::new(db_path)?);

        let instances = (0..num_instances)
            .map(|i| {
                Arc::new(BufferPoolInstance::new(
                    pool_size,
                    num_instances as u32,
                    i as u32,
                    disk_manager.clone(),
                ))
            })
            .collect();

        Ok(Self {
            instances,
            next_instance: Mutex::new(0),
        })
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// Total frames across all instances
    pub fn pool_size(&self) -> usize {
        self.instances.iter().map(|i| i.pool_size()).sum()
    }

    fn instance_for(&self, page_id: PageId) -> Result<&BufferPoolInstance, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        Ok(&self.instances[page_id as usize % self.instances.len()])
    }

    /// Allocate a new page, round-robin across instances: try each
    /// starting at the remembered cursor, return the first success, and
    /// advance the cursor by one on success. Fails only when every
    /// instance is out of evictable frames.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut next = self.next_instance.lock();

        for offset in 0..self.instances.len() {
            let index = (*next + offset) % self.instances.len();
            match self.instances[index].new_page() {
                Ok(result) => {
                    *next = (*next + 1) % self.instances.len();
                    return Ok(result);
                }
                Err(BufferPoolError::PoolExhausted) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(BufferPoolError::PoolExhausted)
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.instance_for(page_id)?.fetch_page(page_id)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.instance_for(page_id)?.unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id)?.flush_page(page_id)
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id)?.delete_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }
}
