//! Page write-back tests

use super::*;
use crate::errors::CacheError;
use crate::retrieval::ReadStatus;

#[tokio::test]
async fn test_write_clamps_to_declared_size() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"short-tail").await;
    cache.attr_changed(&object, 5000).await.unwrap();

    let page = Page::new(1).unwrap();
    page.fill(&[0xab; PAGE_SIZE]);
    cache.write_page(&object, &page).await.unwrap();

    let contents = backend.file(object.path()).unwrap().contents();
    assert_eq!(contents.len(), 5000);
    assert!(contents[PAGE_SIZE..].iter().all(|&b| b == 0xab));
    assert_eq!(object.size(), 5000);
    assert_eq!(cache.stats().bytes_written, (5000 - PAGE_SIZE) as u64);
}

#[tokio::test]
async fn test_write_beyond_declared_size_is_refused() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"too-far").await;
    cache.attr_changed(&object, PAGE_SIZE as u64).await.unwrap();

    let err = cache
        .write_page(&object, &Page::new(1).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::NoBuffers { .. }));
    assert_eq!(backend.io_counts().writes, 0);
}

#[tokio::test]
async fn test_write_failure_becomes_no_buffers() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"failing").await;
    backend.set_fail_writes(true);

    let err = cache
        .write_page(&object, &Page::new(0).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::NoBuffers { .. }));

    let stats = cache.stats();
    assert_eq!(stats.io_errors, 1);
    assert_eq!(stats.write_failures, 1);
    assert!(!cache.is_dead());
}

#[tokio::test]
async fn test_short_write_becomes_no_buffers() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"short").await;
    backend.set_short_writes(true);

    let err = cache
        .write_page(&object, &Page::new(0).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::NoBuffers { .. }));
}

#[tokio::test]
async fn test_io_error_limit_withdraws_cache() {
    let config = CacheConfigBuilder::new()
        .with_culling(false)
        .with_io_error_limit(1)
        .build()
        .unwrap();
    let (cache, backend) = memory_cache_with(MemoryBackend::new(), config).await;
    let object = data_object(&cache, b"fatal").await;
    backend.set_fail_writes(true);

    assert!(cache.write_page(&object, &Page::new(0).unwrap()).await.is_err());
    assert!(cache.is_dead());

    backend.set_fail_writes(false);
    let err = cache
        .write_page(&object, &Page::new(1).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::NoBuffers { .. }));
    assert_eq!(backend.io_counts().writes, 1);
}

#[tokio::test]
async fn test_write_refreshes_cached_backing_page() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"rewrite").await;
    seed_backing_page(&backend, &object, 0, 1);
    let (op, _completed) = retrieval(&cache, &object);

    let first = Page::new(0).unwrap();
    cache.read_or_alloc_page(&op, &first).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), op.wait())
        .await
        .unwrap();

    let update = Page::new(0).unwrap();
    update.fill(&[2u8; PAGE_SIZE]);
    cache.write_page(&object, &update).await.unwrap();

    let second = Page::new(0).unwrap();
    assert_eq!(
        cache.read_or_alloc_page(&op, &second).unwrap(),
        ReadStatus::Completed
    );
    assert!(second.data().iter().all(|&b| b == 2));
}
