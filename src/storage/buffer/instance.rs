use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{Frame, FrameId, FramePtr, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;

/// One buffer-pool shard: a fixed set of frames, a page table mapping
/// resident page ids to frames, and an LRU replacer for eviction.
///
/// All bookkeeping (page table, free list, replacer, page-id counter)
/// lives under a single mutex so that every operation observes and leaves
/// a consistent frame partition: each frame is either free, pinned, or in
/// the replacer, never two at once.
pub struct BufferPoolInstance {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    frames: Vec<FramePtr>,
    state: Mutex<InstanceState>,
    disk_manager: Arc<DiskManager>,
}

struct InstanceState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
    /// Strided counter: instance `k` of `N` hands out `k, k+N, k+2N, …`
    /// so every id routes back to this instance on fetch.
    next_page_id: PageId,
}

/// Where a reused frame was taken from, so a failed disk operation can
/// put it back without leaking it out of the three-way partition.
enum FrameSource {
    FreeList,
    Replacer,
}

impl BufferPoolInstance {
    pub fn new(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0);
        assert!(instance_index < num_instances);

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            let page = Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID)));
            frames.push(Arc::new(RwLock::new(Frame::new(frame_id, page))));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            frames,
            state: Mutex::new(InstanceState {
                page_table: HashMap::new(),
                free_list,
                replacer: LruReplacer::new(pool_size),
                next_page_id: instance_index as PageId,
            }),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn instance_index(&self) -> u32 {
        self.instance_index
    }

    /// Allocate a fresh page pinned into a frame. The empty page is
    /// written through to disk immediately so the identifier is durably
    /// allocated. Fails only when every frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();

        if state.free_list.is_empty() && state.replacer.size() == 0 {
            return Err(BufferPoolError::PoolExhausted);
        }

        let (frame_id, source) = self.take_frame(&mut state);
        if let Err(e) = self.evict_occupant(&mut state, frame_id) {
            self.restore_frame(&mut state, frame_id, source);
            return Err(e);
        }

        let page_id = state.next_page_id;
        state.next_page_id += self.num_instances as PageId;
        debug_assert_eq!(
            page_id.rem_euclid(self.num_instances as PageId),
            self.instance_index as PageId
        );

        let frame = &self.frames[frame_id];
        {
            let mut frame_guard = frame.write();
            {
                let mut page_guard = frame_guard.page.write();
                page_guard.reset();
                page_guard.page_id = page_id;
                // Write-through so the identifier is durably allocated
                if let Err(e) = self.disk_manager.write_page(page_id, &page_guard.data) {
                    page_guard.reset();
                    drop(page_guard);
                    drop(frame_guard);
                    state.free_list.push_back(frame_id);
                    return Err(e.into());
                }
            }
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
        }

        state.replacer.pin(frame_id);
        state.page_table.insert(page_id, frame_id);

        let frame_guard = frame.read();
        Ok((frame_guard.page.clone(), page_id))
    }

    /// Fetch a page, reading it from disk if it is not resident.
    /// Fails only when the page is absent and no frame is evictable.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id];
            let mut frame_guard = frame.write();
            frame_guard.pin_count += 1;
            state.replacer.pin(frame_id);
            return Ok(frame_guard.page.clone());
        }

        if state.free_list.is_empty() && state.replacer.size() == 0 {
            return Err(BufferPoolError::PoolExhausted);
        }

        let (frame_id, source) = self.take_frame(&mut state);
        if let Err(e) = self.evict_occupant(&mut state, frame_id) {
            self.restore_frame(&mut state, frame_id, source);
            return Err(e);
        }

        let frame = &self.frames[frame_id];
        {
            let mut frame_guard = frame.write();
            {
                let mut page_guard = frame_guard.page.write();
                if let Err(e) = self.disk_manager.read_page(page_id, &mut page_guard) {
                    // The frame is clean and unmapped at this point; hand
                    // it back to the free list before surfacing the error.
                    page_guard.reset();
                    drop(page_guard);
                    drop(frame_guard);
                    state.free_list.push_back(frame_id);
                    return Err(e.into());
                }
            }
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
        }

        state.replacer.pin(frame_id);
        state.page_table.insert(page_id, frame_id);

        let frame_guard = frame.read();
        Ok(frame_guard.page.clone())
    }

    /// Release one pin. The dirty flag only ever strengthens: unpinning
    /// clean after a dirty unpin keeps the page dirty until flushed.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotResident(page_id)),
        };

        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();

        if frame_guard.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        if is_dirty {
            frame_guard.is_dirty = true;
        }
        frame_guard.pin_count -= 1;

        if frame_guard.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page to disk and clear its dirty flag
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotResident(page_id)),
        };

        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();
        {
            let page_guard = frame_guard.page.read();
            self.disk_manager.write_page(page_id, &page_guard.data)?;
        }
        frame_guard.is_dirty = false;

        Ok(())
    }

    /// Flush every resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let state = self.state.lock();

        for (&page_id, &frame_id) in state.page_table.iter() {
            let frame = &self.frames[frame_id];
            let mut frame_guard = frame.write();
            {
                let page_guard = frame_guard.page.read();
                self.disk_manager.write_page(page_id, &page_guard.data)?;
            }
            frame_guard.is_dirty = false;
        }

        Ok(())
    }

    /// Drop a page from the pool. A non-resident page deletes trivially;
    /// a pinned page refuses. The identifier is never reissued.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(()),
        };

        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();

        if frame_guard.pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        state.page_table.remove(&page_id);
        state.replacer.pin(frame_id);
        frame_guard.page.write().reset();
        frame_guard.is_dirty = false;
        drop(frame_guard);
        state.free_list.push_back(frame_id);

        Ok(())
    }

    /// Pick a reusable frame, preferring the free list over eviction.
    /// Only called after the caller has checked one of the two is
    /// non-empty.
    fn take_frame(&self, state: &mut InstanceState) -> (FrameId, FrameSource) {
        if let Some(frame_id) = state.free_list.pop_front() {
            (frame_id, FrameSource::FreeList)
        } else {
            let frame_id = state.replacer.victim().expect("replacer checked non-empty");
            (frame_id, FrameSource::Replacer)
        }
    }

    /// Flush the frame's previous occupant if dirty and unmap it
    fn evict_occupant(
        &self,
        state: &mut InstanceState,
        frame_id: FrameId,
    ) -> Result<(), BufferPoolError> {
        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();

        let old_page_id = frame_guard.page.read().page_id;
        if frame_guard.is_dirty {
            let page_guard = frame_guard.page.read();
            self.disk_manager.write_page(old_page_id, &page_guard.data)?;
            drop(page_guard);
            frame_guard.is_dirty = false;
        }
        if old_page_id >= 0 {
            state.page_table.remove(&old_page_id);
        }

        Ok(())
    }

    fn restore_frame(&self, state: &mut InstanceState, frame_id: FrameId, source: FrameSource) {
        match source {
            FrameSource::FreeList => state.free_list.push_front(frame_id),
            FrameSource::Replacer => state.replacer.unpin(frame_id),
        }
    }
}
