//! Edge cases and larger multi-threaded integration scenarios.

use gcore::{SmartPtr, alloc, alloc_array, collect};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;

#[test_log::test]
fn zero_sized_type_survives_collection_while_reachable_and_collects_once_dropped() {
    #[derive(Debug, PartialEq)]
    struct ZeroSized;

    let ptr = alloc(|| ZeroSized).expect("alloc should succeed");
    collect();
    assert_eq!(*ptr, ZeroSized, "a reachable zero-sized object must survive a collection");
    drop(ptr);
    collect();
}

#[test_log::test]
fn large_object_survives_while_reachable() {
    let ptr = alloc(|| vec![7_u64; 10_000]).expect("alloc should succeed");
    collect();
    assert_eq!(ptr.len(), 10_000);
    assert_eq!(ptr[0], 7);
}

#[test_log::test]
fn array_allocation_constructs_every_element_and_is_reachable_as_a_whole() {
    let ptr = alloc_array(8, |i| i as u64).expect("alloc_array should succeed");
    let base: *const u64 = &*ptr;
    collect();
    for i in 0..8 {
        assert_eq!(unsafe { *base.add(i) }, i as u64);
    }
}

#[test_log::test]
fn aliased_handle_keeps_the_object_alive_after_the_original_drops() {
    struct Owner {
        dropped: Arc<AtomicBool>,
        values: [u64; 4],
    }
    impl Drop for Owner {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::Release);
        }
    }

    let dropped = Arc::new(AtomicBool::new(false));
    let alias: SmartPtr<Owner>;
    {
        let owner = alloc({
            let dropped = dropped.clone();
            move || Owner {
                dropped,
                values: [1, 2, 3, 4],
            }
        })
        .expect("alloc should succeed");

        alias = owner.clone();
        drop(owner);
    }

    collect();
    assert!(
        !dropped.load(Ordering::Acquire),
        "the aliased handle should keep the block alive"
    );

    drop(alias);
    collect();
    collect();
    assert!(dropped.load(Ordering::Acquire));
}

#[test_log::test]
fn empty_and_nested_containers_of_smart_pointers_are_traced() {
    struct Leaf {
        id: usize,
    }

    let empty: Vec<SmartPtr<Leaf>> = Vec::new();
    assert!(empty.is_empty());

    let leaf1 = alloc(|| Leaf { id: 1 }).expect("alloc should succeed");
    let leaf2 = alloc(|| Leaf { id: 2 }).expect("alloc should succeed");

    let mut map: HashMap<&str, SmartPtr<Leaf>> = HashMap::new();
    map.insert("one", leaf1.clone());
    map.insert("two", leaf2.clone());

    collect();

    assert_eq!(map.get("one").expect("present").id, 1);
    assert_eq!(map.get("two").expect("present").id, 2);
}

#[test_log::test]
fn concurrent_binary_tree_construction_across_threads() {
    struct Node {
        #[allow(dead_code)]
        left: Option<SmartPtr<Node>>,
        #[allow(dead_code)]
        right: Option<SmartPtr<Node>>,
        dropped: Arc<AtomicUsize>,
    }
    impl Drop for Node {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn build_tree(depth: u32, dropped: &Arc<AtomicUsize>) -> SmartPtr<Node> {
        let (left, right) = if depth == 0 {
            (None, None)
        } else {
            (
                Some(build_tree(depth - 1, dropped)),
                Some(build_tree(depth - 1, dropped)),
            )
        };
        alloc({
            let dropped = dropped.clone();
            move || Node {
                left,
                right,
                dropped,
            }
        })
        .expect("alloc should succeed")
    }

    let constructed = Arc::new(AtomicUsize::new(0));
    let dropped = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let dropped = dropped.clone();
            let constructed = constructed.clone();
            thread::spawn(move || {
                let root = build_tree(6, &dropped);
                constructed.fetch_add(count_nodes(6), Ordering::Relaxed);
                drop(root);
            })
        })
        .collect();

    fn count_nodes(depth: u32) -> usize {
        if depth == 0 {
            1
        } else {
            1 + 2 * count_nodes(depth - 1)
        }
    }

    for handle in handles {
        handle.join().expect("builder thread should not panic");
    }

    collect();
    collect();

    assert_eq!(dropped.load(Ordering::Relaxed), constructed.load(Ordering::Relaxed));
}

#[test_log::test]
fn producer_consumer_across_threads_reclaims_every_processed_item() {
    struct Item {
        dropped: Arc<AtomicUsize>,
    }
    impl Drop for Item {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    const ITEM_COUNT: usize = 200;
    let dropped = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel::<SmartPtr<Item>>();

    let producer = {
        let dropped = dropped.clone();
        thread::spawn(move || {
            for _ in 0..ITEM_COUNT {
                let item = alloc({
                    let dropped = dropped.clone();
                    move || Item { dropped }
                })
                .expect("alloc should succeed");
                tx.send(item).expect("consumer still listening");
            }
        })
    };

    let consumer = thread::spawn(move || {
        let mut processed = 0;
        while let Ok(item) = rx.recv() {
            processed += 1;
            drop(item);
            if processed == ITEM_COUNT {
                break;
            }
        }
        processed
    });

    producer.join().expect("producer thread should not panic");
    let processed = consumer.join().expect("consumer thread should not panic");
    assert_eq!(processed, ITEM_COUNT);

    collect();
    collect();

    assert_eq!(dropped.load(Ordering::Relaxed), ITEM_COUNT);
}
