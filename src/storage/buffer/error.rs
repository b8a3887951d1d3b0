use thiserror::Error;
use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    /// The page is not cached in any frame
    #[error("Page {0} is not resident")]
    PageNotResident(PageId),

    /// Deletion refused while somebody still holds the page
    #[error("Page {0} is pinned")]
    PagePinned(PageId),

    /// Unpin of a page nobody holds
    #[error("Page {0} is not pinned")]
    PageNotPinned(PageId),

    /// Every frame is pinned and the free list is empty
    #[error("No evictable frame available")]
    PoolExhausted,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),
}
