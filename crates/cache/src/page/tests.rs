use super::*;
use std::sync::atomic::AtomicUsize;

#[test]
fn test_lock_and_flags() {
    let page = Page::new(3).unwrap();
    assert_eq!(page.offset(), 3 * PAGE_SIZE as u64);
    assert!(!page.is_locked());
    assert!(page.try_lock());
    assert!(!page.try_lock());
    page.set_uptodate();
    page.unlock();
    assert!(!page.is_locked());
    assert!(page.is_uptodate());
    assert!(!page.is_cached());
    page.mark_cached();
    assert!(page.is_cached());
    page.clear_cached();
    assert!(!page.is_cached());
}

#[test]
fn test_unlock_runs_waiters_once() {
    let page = Page::new_locked(0).unwrap();
    let fired = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let fired = Arc::clone(&fired);
        page.add_waiter(Box::new(move |p| {
            assert!(!p.is_locked());
            fired.fetch_add(1, Ordering::SeqCst);
        }));
    }

    page.unlock();
    assert_eq!(fired.load(Ordering::SeqCst), 3);

    assert!(page.try_lock());
    page.unlock();
    assert_eq!(fired.load(Ordering::SeqCst), 3);
}

#[test]
fn test_waiter_may_requeue_itself() {
    let page = Page::new_locked(0).unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let inner = Arc::clone(&fired);
    page.add_waiter(Box::new(move |p| {
        inner.fetch_add(1, Ordering::SeqCst);
        let again = Arc::clone(&inner);
        p.add_waiter(Box::new(move |_| {
            again.fetch_add(1, Ordering::SeqCst);
        }));
    }));

    page.unlock();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(page.try_lock());
    page.unlock();
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

#[test]
fn test_fill_and_copy() {
    let src = Page::new(0).unwrap();
    src.fill(b"abc");
    let dst = Page::new(0).unwrap();
    dst.fill(&[9u8; PAGE_SIZE]);
    dst.copy_from(&src);
    assert_eq!(&dst.data()[..3], b"abc");
    assert!(dst.data()[3..].iter().all(|&b| b == 0));
}

#[test]
fn test_mapping_add_find_remove() {
    let mapping = Mapping::new();
    let page = Page::new(7).unwrap();
    mapping.add(Arc::clone(&page)).unwrap();
    assert!(page.is_attached());
    assert!(mapping.contains(&page));

    let other = Page::new(7).unwrap();
    let existing = mapping.add(Arc::clone(&other)).unwrap_err();
    assert!(Arc::ptr_eq(&existing, &page));
    assert!(!other.is_attached());

    let removed = mapping.remove(7).unwrap();
    assert!(Arc::ptr_eq(&removed, &page));
    assert!(!page.is_attached());
    assert!(mapping.find(7).is_none());
}

#[test]
fn test_mapping_evicts_unlocked_lru_pages() {
    let mapping = Mapping::with_capacity(None, 2);
    let locked = Page::new_locked(0).unwrap();
    mapping.add(Arc::clone(&locked)).unwrap();
    let one = Page::new(1).unwrap();
    mapping.add(Arc::clone(&one)).unwrap();
    let two = Page::new(2).unwrap();
    mapping.add(Arc::clone(&two)).unwrap();

    // page 0 is the oldest but locked, so page 1 goes
    assert_eq!(mapping.len(), 2);
    assert!(locked.is_attached());
    assert!(!one.is_attached());
    assert!(mapping.find(2).is_some());
}

#[test]
fn test_mapping_truncate() {
    let mapping = Mapping::new();
    for index in 0..5 {
        mapping.add(Page::new(index).unwrap()).unwrap();
    }
    let tail = mapping.find(4).unwrap();
    assert_eq!(mapping.truncate(3), 2);
    assert_eq!(mapping.len(), 3);
    assert!(!tail.is_attached());
}
