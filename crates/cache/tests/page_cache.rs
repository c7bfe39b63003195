//! End-to-end use of a cache through the public API

use cachefiles::backend::MemoryBackend;
use cachefiles::{
    Cache, CacheConfigBuilder, CacheError, Completion, KeyType, Mapping, Page, ReadStatus,
    PAGE_SIZE,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_miss_store_then_hit() {
    let backend = Arc::new(MemoryBackend::new());
    let config = CacheConfigBuilder::new()
        .with_tag("scenario")
        .with_culling(false)
        .build()
        .unwrap();
    let cache = Cache::builder(backend.clone())
        .config(config)
        .build()
        .await
        .unwrap();

    let volume = cache
        .lookup_object(&cache.root(), b"afs,example.org", KeyType::Index, b"")
        .await
        .unwrap();
    let file = cache
        .lookup_object(&volume, &[0x01, 0x00, 0x00, 0x7f, 0xff, 0x10], KeyType::DataFile, b"rev-1")
        .await
        .unwrap();
    cache.attr_changed(&file, 2 * PAGE_SIZE as u64).await.unwrap();

    let completions = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&completions);
    let completion: Completion = Arc::new(move |_page: &Arc<Page>, result: cachefiles::Result<()>| {
        assert!(result.is_ok());
        seen.fetch_add(1, Ordering::SeqCst);
    });
    let op = cache.new_retrieval(&file, Mapping::new(), completion);

    // Nothing cached yet: fetch from the server and store it
    for index in 0..2 {
        let page = Page::new(index).unwrap();
        let err = cache.read_or_alloc_page(&op, &page).unwrap_err();
        assert!(matches!(err, CacheError::NoData { .. }));
        page.fill(&[index as u8 + 1; PAGE_SIZE]);
        cache.write_page(&file, &page).await.unwrap();
    }

    // Both pages now come from the cache
    for index in 0..2 {
        let page = Page::new(index).unwrap();
        let status = cache.read_or_alloc_page(&op, &page).unwrap();
        if status == ReadStatus::InProgress {
            tokio::time::timeout(Duration::from_secs(5), op.wait())
                .await
                .unwrap();
        }
        assert!(page.data().iter().all(|&b| b == index as u8 + 1));
    }
    assert_eq!(completions.load(Ordering::SeqCst), 2);

    let stats = cache.stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.writes, 2);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["creates"], 2);
}
