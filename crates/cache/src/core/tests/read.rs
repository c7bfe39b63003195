//! Page retrieval tests

use super::*;
use crate::errors::CacheError;
use crate::retrieval::{PagesStatus, ReadStatus};
use std::time::Duration;

async fn wait(op: &Retrieval) {
    tokio::time::timeout(Duration::from_secs(5), op.wait())
        .await
        .expect("retrieval did not complete");
}

#[tokio::test]
async fn test_hole_returns_no_data_and_admits_page() {
    let (cache, _backend) = memory_cache().await;
    let object = data_object(&cache, b"holey").await;
    let (op, completed) = retrieval(&cache, &object);
    let page = Page::new(3).unwrap();

    let err = cache.read_or_alloc_page(&op, &page).unwrap_err();
    assert!(matches!(err, CacheError::NoData { index: 3, .. }));
    assert!(err.is_cache_miss());
    assert!(page.is_cached());
    assert!(completed.lock().is_empty());

    page.fill(b"fetched from the server");
    cache.write_page(&object, &page).await.unwrap();
    assert_eq!(cache.stats().misses, 1);
}

#[tokio::test]
async fn test_hole_without_space_is_no_buffers() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"holey").await;
    let (op, _completed) = retrieval(&cache, &object);
    backend.set_capacity(1 << 20, 1);

    let page = Page::new(0).unwrap();
    let err = cache.read_or_alloc_page(&op, &page).unwrap_err();
    assert!(matches!(err, CacheError::NoBuffers { .. }));
    assert!(!page.is_cached());
    assert_eq!(cache.stats().nobufs, 1);
}

#[tokio::test]
async fn test_mapped_page_is_read_then_served_synchronously() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"mapped").await;
    seed_backing_page(&backend, &object, 0, 0x5a);
    let (op, completed) = retrieval(&cache, &object);

    let first = Page::new(0).unwrap();
    assert_eq!(
        cache.read_or_alloc_page(&op, &first).unwrap(),
        ReadStatus::InProgress
    );
    wait(&op).await;
    {
        let completed = completed.lock();
        assert_eq!(completed.len(), 1);
        assert!(completed[0].1.is_ok());
    }
    assert!(first.is_uptodate());
    assert!(first.is_cached());
    assert!(first.data().iter().all(|&b| b == 0x5a));

    let second = Page::new(0).unwrap();
    assert_eq!(
        cache.read_or_alloc_page(&op, &second).unwrap(),
        ReadStatus::Completed
    );
    assert_eq!(&**second.data(), &**first.data());
    assert_eq!(completed.lock().len(), 2);
    assert_eq!(backend.io_counts().page_reads, 1);
    assert_eq!(cache.stats().hits, 2);
}

#[tokio::test]
async fn test_oversized_blocks_are_not_supported() {
    let (cache, backend) = memory_cache_with(MemoryBackend::with_block_size(8192), test_config()).await;
    let object = data_object(&cache, b"big-blocks").await;
    let (op, _completed) = retrieval(&cache, &object);

    let err = cache
        .read_or_alloc_page(&op, &Page::new(0).unwrap())
        .unwrap_err();
    assert!(matches!(err, CacheError::NotSupported { .. }));
    assert_eq!(backend.io_counts().total(), 0);
}

#[tokio::test]
async fn test_monitor_fires_when_backing_page_unlocks() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"monitored").await;
    seed_backing_page(&backend, &object, 0, 1);
    let (op, completed) = retrieval(&cache, &object);

    // A read of the backing page someone else started
    let back = Page::new_locked(0).unwrap();
    object.backing_mapping().unwrap().add(Arc::clone(&back)).unwrap();

    let page = Page::new(0).unwrap();
    assert_eq!(
        cache.read_or_alloc_page(&op, &page).unwrap(),
        ReadStatus::InProgress
    );
    assert!(!op.is_complete());

    back.fill(&[7u8; PAGE_SIZE]);
    back.set_uptodate();
    back.unlock();

    wait(&op).await;
    assert!(completed.lock()[0].1.is_ok());
    assert!(page.data().iter().all(|&b| b == 7));
    assert_eq!(backend.io_counts().page_reads, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_every_waiter_sees_completion() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"two-waiters").await;
    seed_backing_page(&backend, &object, 0, 1);
    let (op, completed) = retrieval(&cache, &object);

    let back = Page::new_locked(0).unwrap();
    object.backing_mapping().unwrap().add(Arc::clone(&back)).unwrap();
    let page = Page::new(0).unwrap();
    cache.read_or_alloc_page(&op, &page).unwrap();

    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let op = Arc::clone(&op);
            tokio::spawn(async move { op.wait().await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    back.set_uptodate();
    back.unlock();

    for waiter in waiters {
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter was not woken")
            .unwrap();
    }
    assert!(op.is_complete());
    assert!(completed.lock()[0].1.is_ok());
}

#[tokio::test]
async fn test_monitor_fails_once_copiers_are_gone() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"no-copier").await;
    seed_backing_page(&backend, &object, 0, 1);
    let (op, completed) = retrieval(&cache, &object);

    let workers: Vec<_> = cache.inner.worker_handles.write().drain(..).collect();
    for worker in workers {
        worker.abort();
        let _ = worker.await;
    }

    let back = Page::new_locked(0).unwrap();
    object.backing_mapping().unwrap().add(Arc::clone(&back)).unwrap();
    let page = Page::new(0).unwrap();
    assert_eq!(
        cache.read_or_alloc_page(&op, &page).unwrap(),
        ReadStatus::InProgress
    );

    back.set_uptodate();
    back.unlock();

    assert!(op.is_complete());
    let completed = completed.lock();
    assert_eq!(completed.len(), 1);
    assert!(matches!(completed[0].1, Err(CacheError::NoBuffers { .. })));
}

#[tokio::test]
async fn test_detached_backing_page_gives_no_data() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"truncated").await;
    seed_backing_page(&backend, &object, 0, 1);
    let (op, completed) = retrieval(&cache, &object);

    let back = Page::new_locked(0).unwrap();
    let mapping = object.backing_mapping().unwrap();
    mapping.add(Arc::clone(&back)).unwrap();

    let page = Page::new(0).unwrap();
    cache.read_or_alloc_page(&op, &page).unwrap();

    mapping.remove(0);
    back.unlock();

    wait(&op).await;
    let completed = completed.lock();
    assert!(matches!(completed[0].1, Err(CacheError::NoData { .. })));
}

#[tokio::test]
async fn test_unlock_without_data_reissues_read() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"reissued").await;
    seed_backing_page(&backend, &object, 0, 9);
    let (op, completed) = retrieval(&cache, &object);

    let back = Page::new_locked(0).unwrap();
    object.backing_mapping().unwrap().add(Arc::clone(&back)).unwrap();

    let page = Page::new(0).unwrap();
    cache.read_or_alloc_page(&op, &page).unwrap();
    back.unlock();

    wait(&op).await;
    assert!(completed.lock()[0].1.is_ok());
    assert!(page.data().iter().all(|&b| b == 9));
    assert_eq!(backend.io_counts().page_reads, 1);
}

#[tokio::test]
async fn test_read_error_is_reported() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"bad-disk").await;
    seed_backing_page(&backend, &object, 0, 1);
    backend.set_fail_reads(true);
    let (op, completed) = retrieval(&cache, &object);

    let page = Page::new(0).unwrap();
    assert_eq!(
        cache.read_or_alloc_page(&op, &page).unwrap(),
        ReadStatus::InProgress
    );
    wait(&op).await;
    assert!(matches!(completed.lock()[0].1, Err(CacheError::Io { .. })));
    assert_eq!(cache.stats().io_errors, 1);

    // The backing page stays in error for the next reader
    let again = Page::new(0).unwrap();
    let err = cache.read_or_alloc_page(&op, &again).unwrap_err();
    assert!(matches!(err, CacheError::Io { .. }));
}

#[tokio::test]
async fn test_block_map_error_is_io() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"bmap").await;
    backend.set_fail_map(true);
    let (op, _completed) = retrieval(&cache, &object);

    let err = cache
        .read_or_alloc_page(&op, &Page::new(0).unwrap())
        .unwrap_err();
    assert!(matches!(err, CacheError::Io { .. }));
}

#[tokio::test]
async fn test_withdrawn_cache_refuses_reads() {
    let (cache, _backend) = memory_cache().await;
    let object = data_object(&cache, b"late").await;
    let (op, _completed) = retrieval(&cache, &object);
    cache.withdraw();

    let err = cache
        .read_or_alloc_page(&op, &Page::new(0).unwrap())
        .unwrap_err();
    assert!(matches!(err, CacheError::NoBuffers { .. }));
}

#[tokio::test]
async fn test_read_many_pages() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"many").await;
    seed_backing_page(&backend, &object, 0, 10);
    seed_backing_page(&backend, &object, 2, 12);
    let (op, completed) = retrieval(&cache, &object);

    let mut pages: Vec<_> = (0..4).map(|i| Page::new(i).unwrap()).collect();
    let outcome = cache.read_or_alloc_pages(&op, &mut pages).unwrap();

    assert_eq!(outcome.status, PagesStatus::NoData);
    assert_eq!(outcome.remaining, 2);
    let left: Vec<u64> = pages.iter().map(|p| p.index()).collect();
    assert_eq!(left, vec![1, 3]);
    assert!(pages.iter().all(|p| p.is_cached()));

    wait(&op).await;
    let completed = completed.lock();
    assert_eq!(completed.len(), 2);
    assert!(completed.iter().all(|(_, r)| r.is_ok()));

    let netfs = op.netfs_mapping();
    assert_eq!(netfs.len(), 2);
    assert!(netfs.find(0).unwrap().data().iter().all(|&b| b == 10));
    assert!(netfs.find(2).unwrap().data().iter().all(|&b| b == 12));
}

#[tokio::test]
async fn test_read_many_mapped_pages_submits_all() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"all-mapped").await;
    for index in 0..20 {
        seed_backing_page(&backend, &object, index, index as u8);
    }
    let (op, completed) = retrieval(&cache, &object);

    let mut pages: Vec<_> = (0..20).map(|i| Page::new(i).unwrap()).collect();
    let outcome = cache.read_or_alloc_pages(&op, &mut pages).unwrap();
    assert_eq!(outcome.status, PagesStatus::Submitted);
    assert!(pages.is_empty());

    wait(&op).await;
    assert_eq!(completed.lock().len(), 20);
    for index in 0..20u64 {
        let page = op.netfs_mapping().find(index).unwrap();
        assert!(page.data().iter().all(|&b| b == index as u8));
    }
}

#[tokio::test]
async fn test_allocate_pages() {
    let (cache, backend) = memory_cache().await;
    let object = data_object(&cache, b"alloc").await;
    let (op, _completed) = retrieval(&cache, &object);

    let pages: Vec<_> = (0..4).map(|i| Page::new(i).unwrap()).collect();
    cache.allocate_pages(&op, &pages).unwrap();
    assert!(pages.iter().all(|p| p.is_cached()));

    cache.uncache_page(&object, &pages[0]);
    assert!(!pages[0].is_cached());

    backend.set_capacity(1 << 20, 1);
    let page = Page::new(9).unwrap();
    assert!(matches!(
        cache.allocate_page(&op, &page),
        Err(CacheError::NoBuffers { .. })
    ));
    assert!(!page.is_cached());
}
