//! Integration tests for the containers.

use std::rc::Rc;

use stratum::allocator::TrackedAllocator;
use stratum::arena::MemoryStack;
use stratum::containers::{StaticVec, Vector};

#[test]
fn static_vec_fills_to_capacity() {
    let mut v: StaticVec<u32, 8> = StaticVec::new();
    for i in 0..8 {
        v.push(i);
    }
    assert!(v.is_full());
    assert_eq!(v.try_push(99), Err(99));
    assert_eq!(v.as_slice(), &[0, 1, 2, 3, 4, 5, 6, 7]);
}

#[test]
#[should_panic(expected = "capacity overflow")]
fn static_vec_push_past_capacity_panics() {
    let mut v: StaticVec<u32, 2> = StaticVec::new();
    v.push(1);
    v.push(2);
    v.push(3);
}

#[test]
fn static_vec_destroys_elements_exactly_once() {
    let tracker = Rc::new(());
    {
        let mut v: StaticVec<Rc<()>, 16> = StaticVec::new();
        for _ in 0..10 {
            v.push(Rc::clone(&tracker));
        }
        v.remove(3);
        v.swap_remove(0);
        v.truncate(4);
        assert_eq!(Rc::strong_count(&tracker), 5);
    }
    assert_eq!(Rc::strong_count(&tracker), 1);
}

#[test]
fn static_vec_iteration_and_ordering() {
    let a: StaticVec<i32, 8> = [1, 2, 3].into_iter().collect();
    let b: StaticVec<i32, 8> = [1, 2, 4].into_iter().collect();
    assert!(a < b);

    let doubled: Vec<i32> = a.into_iter().map(|x| x * 2).collect();
    assert_eq!(doubled, [2, 4, 6]);
}

#[test]
fn vector_growth_preserves_contents() {
    let mut v: Vector<String> = Vector::new();
    for i in 0..500 {
        v.push(format!("item-{i}"));
    }
    assert_eq!(v.len(), 500);
    for (i, s) in v.iter().enumerate() {
        assert_eq!(s, &format!("item-{i}"));
    }
    v.shrink_to_fit();
    assert_eq!(v.capacity(), 500);
    assert_eq!(&v[499], "item-499");
}

#[test]
fn vector_balances_its_allocator() {
    let tracked = TrackedAllocator::new("vector", stratum::allocator::HeapAllocator);
    {
        let mut v = Vector::new_in(&tracked);
        for i in 0..100u64 {
            v.push(i);
        }
        assert!(tracked.live_bytes() > 0);
    }
    assert_eq!(tracked.live_bytes(), 0);
}

#[test]
fn vectors_share_an_arena() {
    let arena = MemoryStack::with_block_size(8192);
    let frame = arena.top();
    {
        let mut words = Vector::new_in(&arena);
        let mut counts = Vector::new_in(&arena);
        for i in 0..32u32 {
            words.push(i);
            counts.push(i * 2);
        }
        assert_eq!(words.len(), 32);
        assert_eq!(counts[31], 62);
    }
    arena.unwind(frame);
    assert_eq!(arena.top(), frame);
}

#[test]
fn vector_clone_from_reuses_capacity() {
    let mut source: Vector<u32> = Vector::new();
    source.extend_from_slice(&[1, 2, 3]);

    let mut target: Vector<u32> = Vector::with_capacity(64);
    target.extend_from_slice(&[9; 10]);
    target.clone_from(&source);
    assert_eq!(target.as_slice(), &[1, 2, 3]);
    // The stateless heap allocator compares equal, so the buffer stayed.
    assert!(target.capacity() >= 64);
}
