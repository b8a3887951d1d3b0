use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use sirindb::index::hash::KeyHasher;
use sirindb::storage::buffer::BufferPoolManager;

// Route log output through the test harness
#[allow(dead_code)]
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    init_test_logging();
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a single-instance buffer pool backed by a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(1, pool_size, path)?);
    Ok((buffer_pool, file))
}

// Create a sharded buffer pool backed by a temporary database
#[allow(dead_code)]
pub fn create_parallel_buffer_pool(
    num_instances: usize,
    pool_size: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(num_instances, pool_size, path)?);
    Ok((buffer_pool, file))
}

/// Hashes an i32 key to itself, making bucket targeting predictable
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityHasher;

impl KeyHasher<i32> for IdentityHasher {
    fn hash_key(&self, key: &i32) -> u32 {
        *key as u32
    }
}

/// Hashes every key to zero, forcing all keys into one bucket chain
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantHasher;

impl KeyHasher<i32> for ConstantHasher {
    fn hash_key(&self, _key: &i32) -> u32 {
        0
    }
}
