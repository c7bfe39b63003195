//! Culling tests

use super::*;
use crate::errors::CacheError;
use std::time::Duration;

/// Create `n` objects holding one page each, then release them
async fn unused_objects(cache: &Cache, n: usize) -> Vec<std::path::PathBuf> {
    let mut paths = Vec::new();
    for i in 0..n {
        let object = data_object(cache, format!("victim-{i}").as_bytes()).await;
        let page = Page::new(0).unwrap();
        page.fill(b"payload");
        cache.write_page(&object, &page).await.unwrap();
        paths.push(object.path().to_path_buf());
        cache.relinquish_object(object, false).await.unwrap();
    }
    paths
}

#[tokio::test]
async fn test_cull_pass_frees_space() {
    let backend = MemoryBackend::new();
    backend.set_capacity(1000, 1000);
    let (cache, backend) = memory_cache_with(backend, test_config()).await;

    let paths = unused_objects(&cache, 5).await;
    assert_eq!(cache.cull_candidates(), 5);

    // 47 free pages left, under the cull limit of 50
    backend.set_capacity(1000, 52);
    cache.has_space(0, 0).unwrap();
    assert!(cache.is_culling());

    let culled = cache.cull_pass().await.unwrap();
    assert_eq!(culled, 5);
    for path in &paths {
        assert!(backend.file(path).is_none());
    }
    assert_eq!(cache.stats().culled, 5);
    assert_eq!(cache.cull_candidates(), 0);
}

#[tokio::test]
async fn test_cull_spares_active_objects() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"in-use").await;

    let err = cache.cull(object.path()).await.unwrap_err();
    assert!(matches!(err, CacheError::Busy { .. }));
    assert!(backend.file(object.path()).is_some());

    let path = object.path().to_path_buf();
    cache.relinquish_object(object, false).await.unwrap();
    cache.cull(&path).await.unwrap();
    assert!(backend.file(&path).is_none());

    let err = cache.cull(&path).await.unwrap_err();
    assert!(matches!(err, CacheError::NotFound { .. }));
}

#[tokio::test]
async fn test_culler_wakes_on_pressure() {
    let backend = MemoryBackend::new();
    backend.set_capacity(1000, 1000);
    let config = CacheConfigBuilder::new()
        .with_cull_interval(Duration::from_secs(3600))
        .build()
        .unwrap();
    let (cache, backend) = memory_cache_with(backend, config).await;
    unused_objects(&cache, 3).await;

    // 9 free pages, under the stop limit of 10 once one more is asked for
    backend.set_capacity(1000, 12);
    assert!(cache.has_space(0, 1).is_err());

    tokio::time::timeout(Duration::from_secs(5), async {
        while cache.stats().culled < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("culler did not run");
}

#[tokio::test]
async fn test_existing_files_become_candidates() {
    let backend = Arc::new(MemoryBackend::new());
    {
        let cache = Cache::builder(backend.clone())
            .config(test_config())
            .build()
            .await
            .unwrap();
        let object = data_object(&cache, b"left-over").await;
        cache.relinquish_object(object, false).await.unwrap();
    }

    let config = CacheConfigBuilder::new()
        .with_cull_interval(Duration::from_secs(3600))
        .build()
        .unwrap();
    let cache = Cache::builder(backend.clone())
        .config(config)
        .build()
        .await
        .unwrap();
    assert_eq!(cache.cull_candidates(), 1);
}

#[tokio::test]
async fn test_index_with_active_children_is_not_culled() {
    let (cache, backend) = memory_cache().await;
    let index = cache
        .lookup_object(&cache.root(), b"volume", KeyType::Index, b"")
        .await
        .unwrap();
    let child = cache
        .lookup_object(&index, b"inode-1", KeyType::DataFile, b"")
        .await
        .unwrap();
    let index_path = index.path().to_path_buf();
    let child_path = child.path().to_path_buf();

    // The child keeps its index bound after the index's own user lets go
    cache.relinquish_object(index, false).await.unwrap();
    assert!(child.parent().unwrap().is_active());
    assert_eq!(cache.cull_candidates(), 0);

    let err = cache.cull(&index_path).await.unwrap_err();
    assert!(matches!(err, CacheError::Busy { .. }));
    assert!(child.is_active());
    assert!(backend.file(&child_path).is_some());

    // Releasing the last child releases the index too
    cache.relinquish_object(child, false).await.unwrap();
    assert_eq!(cache.active_objects(), 1);
    assert_eq!(cache.cull_candidates(), 2);

    cache.cull(&index_path).await.unwrap();
    assert!(backend.file(&child_path).is_none());
}

#[tokio::test]
async fn test_directory_holding_active_object_is_busy() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"in-use").await;
    let fan_out = object.path().parent().unwrap().to_path_buf();

    let err = cache.cull(&fan_out).await.unwrap_err();
    assert!(matches!(err, CacheError::Busy { .. }));
    assert!(backend.file(object.path()).is_some());
}

#[tokio::test]
async fn test_culler_without_timer_wakes_on_pressure() {
    let backend = MemoryBackend::new();
    backend.set_capacity(1000, 1000);
    let config = CacheConfigBuilder::new()
        .with_cull_interval(Duration::ZERO)
        .build()
        .unwrap();
    let (cache, backend) = memory_cache_with(backend, config).await;
    unused_objects(&cache, 2).await;

    backend.set_capacity(1000, 12);
    assert!(cache.has_space(0, 1).is_err());

    tokio::time::timeout(Duration::from_secs(5), async {
        while cache.stats().culled < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("culler did not run");
}
