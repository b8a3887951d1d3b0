pub mod bucket_page;
pub mod codec;
pub mod directory_page;
pub mod error;
pub mod table;

pub use bucket_page::HashBucketPage;
pub use codec::{DefaultKeyHasher, FixedCodec, KeyComparator, KeyHasher, OrdComparator};
pub use directory_page::{HashDirectoryPage, DIRECTORY_MAX_DEPTH};
pub use error::HashIndexError;
pub use table::ExtendibleHashTable;
