use allocator_api2::vec::Vec as ArenaVec;
use pretty_assertions::assert_eq;

use super::*;
use crate::host::sim::{SimHost, SimOptions};
use crate::options::SessionOptions;
use crate::test_utils::sim_session;

#[test]
fn test_activate_restores_previous_context() {
    let (_host, session) = sim_session();
    let top = session.current_context();
    let a = session.create_context("A");
    let b = session.create_context("B");
    {
        let outer = session.activate(a);
        assert_eq!(session.current_context(), a);
        assert_eq!(outer.previous(), top);
        {
            let _inner = session.activate(b);
            assert_eq!(session.current_context(), b);
        }
        assert_eq!(session.current_context(), a);
    }
    assert_eq!(session.current_context(), top);
}

#[test]
fn test_deep_nesting_unwinds_in_reverse() {
    let (_host, session) = sim_session();
    let contexts: Vec<_> = (0..16).map(|i| session.create_context(&format!("ctx{i}"))).collect();
    let mut scopes = Vec::new();
    for context in &contexts {
        scopes.push(session.activate(*context));
    }
    for expected in contexts.iter().rev().skip(1) {
        drop(scopes.pop());
        assert_eq!(session.current_context(), *expected);
    }
    drop(scopes.pop());
    assert_eq!(session.current_context(), session.top_context());
}

#[test]
fn test_scope_restored_on_panic() {
    let (_host, session) = sim_session();
    let a = session.create_context("A");
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _scope = session.activate(a);
        panic!("unwinding through a scope");
    }));
    assert!(result.is_err());
    assert_eq!(session.current_context(), session.top_context());
}

#[test]
fn test_create_context_nests_under_current() {
    let (_host, session) = sim_session();
    let a = session.create_context("A");
    let _scope = session.activate(a);
    let child = session.create_context("child");
    assert_eq!(session.parent_of(child), Some(a));
    assert_eq!(session.context_name(child), "child");
}

#[test]
fn test_allocate_uses_current_context() {
    let (_host, session) = sim_session();
    let a = session.create_context("A");
    let _scope = session.activate(a);
    let buffer = session.allocate(4, 8).unwrap();
    assert_eq!(buffer.len(), 32);
    assert!(buffer.to_vec().unwrap().iter().all(|b| *b == 0));
    assert_eq!(buffer.owner().context(), a);
    let ptr = buffer.as_ptr().unwrap().cast::<u8>();
    assert_eq!(session.context_for_pointer(ptr.as_ptr()).unwrap(), a);
}

#[test]
fn test_allocate_overflow_is_allocation_failure() {
    let (_host, session) = sim_session();
    let err = session.allocate(usize::MAX, 2).unwrap_err();
    assert!(matches!(err, Error::AllocationFailure { .. }), "{err}");
}

#[test]
fn test_allocation_limit() {
    let host = std::rc::Rc::new(SimHost::new(SimOptions {
        context_allocation_limit: Some(64),
    }));
    let session = Session::new(host, SessionOptions::default());
    let a = session.create_context("small");
    assert!(session.allocate_in(a, 8, 8).is_ok());
    let err = session.allocate_in(a, 1, 8).unwrap_err();
    assert!(matches!(err, Error::AllocationFailure { size: 8, .. }), "{err}");
    session.reset(a);
    assert!(session.allocate_in(a, 8, 8).is_ok());
}

#[test]
fn test_generation_increases_once_per_reset_or_delete() {
    let (_host, session) = sim_session();
    let a = session.create_context("A");
    assert_eq!(session.generation(a), 0);
    session.reset(a);
    assert_eq!(session.generation(a), 1);
    session.reset(a);
    assert_eq!(session.generation(a), 2);
    session.delete(a);
    assert_eq!(session.generation(a), 3);
}

#[test]
fn test_reset_detected_through_tracked_pointer() {
    let (_host, session) = sim_session();
    let a = session.create_context("A");
    let scope = session.activate(a);
    let mut buffer = session.allocate(16, 1).unwrap();
    buffer.with_mut(|bytes| bytes[0] = 7).unwrap();
    assert_eq!(buffer.with(|bytes| bytes[0]).unwrap(), 7);
    drop(scope);

    session.reset(a);
    let err = buffer.to_vec().unwrap_err();
    assert!(matches!(err, Error::PointerGone { context, .. } if context == a.id()), "{err}");
    assert!(matches!(buffer.with(|_| ()), Err(Error::PointerGone { .. })));
    assert!(buffer.owner().is_stale());
}

#[test]
fn test_parent_reset_invalidates_children() {
    let (_host, session) = sim_session();
    let parent = session.create_context("parent");
    let child = session.create_context_in(parent, "child");
    let value = {
        let _scope = session.activate(child);
        session.alloc_value(42_u64).unwrap()
    };
    assert_eq!(value.get().unwrap(), 42);
    session.reset(parent);
    assert!(matches!(value.get(), Err(Error::PointerGone { .. })));
}

#[test]
fn test_snapshot_has_independent_baseline() {
    let (_host, session) = sim_session();
    let a = session.create_context("A");
    let tracked = session.track(a);
    session.reset(a);
    assert_eq!(tracked.resets(), 1);
    let later = tracked.snapshot();
    assert_eq!(later.resets(), 0);
    assert!(later.check().is_ok());
    assert!(tracked.check().is_err());

    session.reset(a);
    assert!(later.is_stale());
    assert_eq!(later.resets(), 1);
    assert!(matches!(later.check(), Err(Error::PointerGone { .. })));

    let latest = later.snapshot();
    session.reset(a);
    session.reset(a);
    assert_eq!(latest.resets(), 1);
    assert!(latest.is_stale());
}

#[test]
fn test_handles_on_one_context_share_a_callback() {
    let (host, session) = sim_session();
    let a = session.create_context("A");
    let _scope = session.activate(a);
    let values: Vec<_> = (0..1000_u64).map(|i| session.alloc_value(i).unwrap()).collect();
    let _handles: Vec<_> = (0..100).map(|_| session.track(a)).collect();
    assert_eq!(host.reset_callback_count(a.id()), 1);
    assert_eq!(session.trackers().len(), 1);
    assert_eq!(values[999].get().unwrap(), 999);
}

#[test]
fn test_trackers_of_deleted_contexts_are_pruned() {
    let (_host, session) = sim_session();
    for i in 0..500 {
        let context = session.create_context(&format!("short{i}"));
        let _handle = session.track(context);
        session.delete(context);
    }
    assert!(session.trackers().len() <= 128, "{}", session.trackers().len());
}

#[test]
#[should_panic(expected = "cannot be released while a payload")]
fn test_reset_while_reading_panics() {
    let (_host, session) = sim_session();
    let a = session.create_context("A");
    let buffer = session.allocate_in(a, 8, 1).unwrap();
    let _ = buffer.with(|_bytes| session.reset(a));
}

#[test]
#[should_panic(expected = "cannot be released while a payload")]
fn test_parent_reset_while_reading_child_panics() {
    let (_host, session) = sim_session();
    let parent = session.create_context("parent");
    let child = session.create_context_in(parent, "child");
    let value = session.allocate_in(child, 1, 8).unwrap();
    let _ = value.with(|_bytes| session.delete(parent));
}

#[test]
fn test_borrow_ends_with_the_closure() {
    let (_host, session) = sim_session();
    let a = session.create_context("A");
    let buffer = session.allocate_in(a, 4, 1).unwrap();
    assert_eq!(buffer.with(<[u8]>::len).unwrap(), 4);
    session.reset(a);
    assert!(buffer.owner().is_stale());
}

#[test]
fn test_tracking_deleted_context_is_stale() {
    let (_host, session) = sim_session();
    let a = session.create_context("A");
    session.delete(a);
    assert!(session.track(a).is_stale());
}

#[test]
fn test_reset_callbacks_run_once_in_reverse_order() {
    let (_host, session) = sim_session();
    let a = session.create_context("A");
    let log = std::rc::Rc::new(core::cell::RefCell::new(Vec::new()));
    for name in ["first", "second"] {
        let log = log.clone();
        session.register_reset_callback(a, move || log.borrow_mut().push(name));
    }
    session.reset(a);
    session.reset(a);
    assert_eq!(*log.borrow(), vec!["second", "first"]);
}

#[test]
fn test_context_equality_is_identity() {
    let (_host, session) = sim_session();
    let a = session.create_context("same");
    let b = session.create_context("same");
    assert_ne!(a, b);
    assert_eq!(a, MemoryContext::from_id(a.id()));
}

#[test]
fn test_for_pointer_rejects_foreign_and_misaligned() {
    let (_host, session) = sim_session();
    let local = 0u64;
    let err = session.context_for_pointer(&local as *const u64 as *const u8).unwrap_err();
    assert!(matches!(err, Error::ForeignPointer { .. }), "{err}");

    let buffer = session.allocate(2, 8).unwrap();
    let start = buffer.as_ptr().unwrap().cast::<u8>().as_ptr();
    let err = session.context_for_pointer(start.wrapping_add(1)).unwrap_err();
    assert!(matches!(err, Error::ForeignPointer { .. }), "{err}");
}

#[test]
fn test_context_allocator_backs_collections() {
    let (host, session) = sim_session();
    let a = session.create_context("collections");
    let before = host.allocated_bytes(a.id());
    let mut numbers = ArenaVec::new_in(session.allocator(a).unwrap());
    numbers.extend(0..100_u32);
    assert_eq!(numbers.iter().sum::<u32>(), 4950);
    assert!(host.allocated_bytes(a.id()) > before);
    drop(numbers);
}

#[test]
#[should_panic(expected = "cannot be released while a payload")]
fn test_reset_under_live_collection_panics() {
    let (_host, session) = sim_session();
    let a = session.create_context("collections");
    let mut numbers = ArenaVec::new_in(session.allocator(a).unwrap());
    numbers.push(1_u32);
    session.reset(a);
}

#[test]
fn test_allocator_releases_context_when_dropped() {
    let (_host, session) = sim_session();
    let a = session.create_context("collections");
    let numbers: ArenaVec<u32, _> = ArenaVec::new_in(session.allocator(a).unwrap());
    drop(numbers);
    session.reset(a);
    assert!(session.allocator(a).is_ok());
}
