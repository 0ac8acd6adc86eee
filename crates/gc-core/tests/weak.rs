//! Weak-reference nulling: a weak reference to an object that turns out
//! to be unreachable must observe `None` after the next collection; a
//! weak reference to a rooted object must keep observing it.

use gc_core::{Runtime, TypeDescriptorSpec};

fn plain_spec() -> TypeDescriptorSpec {
    TypeDescriptorSpec {
        name_index: 0,
        object_size: 16,
        allocator_id: 0,
        base_types: vec![],
        property_layout: vec![],
        trace_fn: None,
        init_object_fn: None,
        init_fn: None,
        on_cleanup_fn: None,
        to_string_fn: None,
    }
}

#[test]
fn weak_reference_is_nulled_once_referent_is_collected() {
    let mut runtime = Runtime::new();
    runtime.configure_types(vec![plain_spec()]);

    let header = runtime.allocate_object(0).unwrap();
    let slot = runtime.register_weak(header);
    assert_eq!(unsafe { slot.as_ref() }.get(), Some(header));

    runtime.collect(true);
    assert!(unsafe { slot.as_ref() }.get().is_none());

    unsafe { runtime.unregister_weak(slot) };
}

#[test]
fn weak_reference_to_rooted_object_survives_collection() {
    let mut runtime = Runtime::new();
    runtime.configure_types(vec![plain_spec()]);

    let header = runtime.allocate_object(0).unwrap();
    runtime.register_global_root(header);
    let slot = runtime.register_weak(header);

    runtime.collect(true);
    assert_eq!(unsafe { slot.as_ref() }.get(), Some(header));

    runtime.unregister_global_root(header);
    runtime.collect(true);
    assert!(unsafe { slot.as_ref() }.get().is_none());

    unsafe { runtime.unregister_weak(slot) };
}

#[test]
fn multiple_weak_references_to_the_same_object_are_nulled_together() {
    let mut runtime = Runtime::new();
    runtime.configure_types(vec![plain_spec()]);

    let header = runtime.allocate_object(0).unwrap();
    let slots: Vec<_> = (0..8).map(|_| runtime.register_weak(header)).collect();

    runtime.collect(true);
    for slot in &slots {
        assert!(unsafe { slot.as_ref() }.get().is_none());
    }
    for slot in slots {
        unsafe { runtime.unregister_weak(slot) };
    }
}
