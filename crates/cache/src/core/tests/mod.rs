//! Cache context tests against the in-memory backend

mod cull;
mod read;
mod write;

use crate::backend::{BackingFile, MemoryBackend};
use crate::config::{CacheConfig, CacheConfigBuilder};
use crate::core::Cache;
use crate::errors::Result;
use crate::key::KeyType;
use crate::object::CacheObject;
use crate::page::{Mapping, Page, PAGE_SIZE};
use crate::retrieval::{Completion, Retrieval};
use parking_lot::Mutex;
use std::sync::Arc;

/// Completions seen by a retrieval, in order
type Completed = Arc<Mutex<Vec<(u64, Result<()>)>>>;

fn test_config() -> CacheConfig {
    CacheConfigBuilder::new().with_culling(false).build().unwrap()
}

async fn memory_cache() -> (Cache, Arc<MemoryBackend>) {
    memory_cache_with(MemoryBackend::new(), test_config()).await
}

async fn memory_cache_with(backend: MemoryBackend, config: CacheConfig) -> (Cache, Arc<MemoryBackend>) {
    let backend = Arc::new(backend);
    let cache = Cache::builder(backend.clone())
        .config(config)
        .build()
        .await
        .unwrap();
    (cache, backend)
}

async fn data_object(cache: &Cache, key: &[u8]) -> Arc<CacheObject> {
    cache
        .lookup_object(&cache.root(), key, KeyType::DataFile, b"aux")
        .await
        .unwrap()
}

/// Write `fill` bytes straight into the backing file for page `index`
fn seed_backing_page(backend: &MemoryBackend, object: &CacheObject, index: u64, fill: u8) {
    let file = backend.file(object.path()).unwrap();
    let data = vec![fill; PAGE_SIZE];
    file.write_at(index * PAGE_SIZE as u64, &data).unwrap();
}

fn retrieval(cache: &Cache, object: &Arc<CacheObject>) -> (Arc<Retrieval>, Completed) {
    let completed: Completed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&completed);
    let completion: Completion = Arc::new(move |page: &Arc<Page>, result: Result<()>| {
        sink.lock().push((page.index(), result));
    });
    (cache.new_retrieval(object, Mapping::new(), completion), completed)
}
