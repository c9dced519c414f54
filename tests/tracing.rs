//! Reachability through ordinary Rust container shapes.
//!
//! There is no trait to implement and no explicit trace call to make: a `SmartPtr<T>` registers
//! itself wherever it is constructed, and stays registered regardless of what Rust structure
//! (`Vec`, `Option`, `HashMap`, a struct field, an enum variant) happens to hold it. These tests
//! exercise that precise tracing works the same no matter the shape.

use gcore::{SmartPtr, alloc, collect};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

struct Tracked {
    id: usize,
    dropped: Rc<Cell<bool>>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.dropped.set(true);
    }
}

fn tracked(id: usize) -> (SmartPtr<Tracked>, Rc<Cell<bool>>) {
    let dropped = Rc::new(Cell::new(false));
    let ptr = alloc({
        let dropped = dropped.clone();
        move || Tracked { id, dropped }
    })
    .expect("alloc should succeed");
    (ptr, dropped)
}

#[test_log::test]
fn pointer_inside_a_vec_is_traced() {
    let (item, dropped) = tracked(1);
    let holder = vec![item];

    collect();
    assert!(!dropped.get());
    assert_eq!(holder[0].id, 1);

    drop(holder);
    collect();
    collect();
    assert!(dropped.get());
}

#[test_log::test]
fn pointer_inside_an_option_is_traced() {
    let (item, dropped) = tracked(2);
    let mut holder: Option<SmartPtr<Tracked>> = Some(item);

    collect();
    assert!(!dropped.get());

    holder = None;
    collect();
    collect();
    assert!(dropped.get());
}

#[test_log::test]
fn pointer_inside_a_hashmap_value_is_traced() {
    let (item, dropped) = tracked(3);
    let mut map = HashMap::new();
    map.insert("k", item);

    collect();
    assert!(!dropped.get());

    map.clear();
    collect();
    collect();
    assert!(dropped.get());
}

#[test_log::test]
fn pointer_inside_an_enum_variant_is_traced() {
    enum Holder {
        Empty,
        One(SmartPtr<Tracked>),
    }

    let (item, dropped) = tracked(4);
    let mut holder = Holder::One(item);

    collect();
    assert!(!dropped.get());

    holder = Holder::Empty;
    collect();
    collect();
    assert!(dropped.get());
}

#[test_log::test]
fn mixed_nesting_of_several_pointers_is_fully_traced() {
    struct Container {
        number: SmartPtr<Tracked>,
        maybe: Option<SmartPtr<Tracked>>,
        list: Vec<SmartPtr<Tracked>>,
    }

    let (a, a_dropped) = tracked(10);
    let (b, b_dropped) = tracked(11);
    let (c, c_dropped) = tracked(12);

    let container = Container {
        number: a,
        maybe: Some(b),
        list: vec![c],
    };

    collect();
    assert!(!a_dropped.get());
    assert!(!b_dropped.get());
    assert!(!c_dropped.get());
    assert_eq!(container.number.id, 10);

    drop(container);
    collect();
    collect();
    assert!(a_dropped.get());
    assert!(b_dropped.get());
    assert!(c_dropped.get());
}

#[test_log::test]
fn deep_linear_chain_is_traced_end_to_end() {
    struct Link {
        #[allow(dead_code)]
        next: Option<SmartPtr<Link>>,
        dropped: Rc<Cell<bool>>,
    }
    impl Drop for Link {
        fn drop(&mut self) {
            self.dropped.set(true);
        }
    }

    let flags: Vec<_> = (0..20).map(|_| Rc::new(Cell::new(false))).collect();
    let mut current: Option<SmartPtr<Link>> = None;
    for flag in flags.iter().rev() {
        current = Some(
            alloc({
                let dropped = flag.clone();
                let next = current.take();
                move || Link { next, dropped }
            })
            .expect("alloc should succeed"),
        );
    }

    collect();
    for flag in &flags {
        assert!(!flag.get());
    }

    drop(current);
    collect();
    collect();
    for flag in &flags {
        assert!(flag.get());
    }
}

#[test_log::test]
fn pointer_inside_a_hashset_is_traced() {
    let (item, dropped) = tracked(5);
    let mut set = HashSet::new();
    // SmartPtr doesn't implement Hash/Eq; wrap with its identity address instead.
    struct ById(SmartPtr<Tracked>);
    impl PartialEq for ById {
        fn eq(&self, other: &Self) -> bool {
            std::ptr::eq(
                std::ptr::from_ref(self.0.get().expect("non-null")),
                std::ptr::from_ref(other.0.get().expect("non-null")),
            )
        }
    }
    impl Eq for ById {}
    impl std::hash::Hash for ById {
        fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
            std::ptr::from_ref(self.0.get().expect("non-null")).hash(state);
        }
    }

    set.insert(ById(item));
    collect();
    assert!(!dropped.get());
    assert_eq!(set.len(), 1);

    set.clear();
    collect();
    collect();
    assert!(dropped.get());
}
