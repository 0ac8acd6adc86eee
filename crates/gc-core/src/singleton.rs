//! The singleton manager (C11, §4.9).
//!
//! Double-checked locking with "publish before construct" semantics: the
//! pointer is stored into the type's singleton slot before
//! `init_object_fn` runs, so a re-entrant call from within the constructor
//! observes the in-construction object instead of recursing forever.

use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use crate::lock_order::{LockGuard, LockOrder};
use crate::object::{Allocator, ObjectHeader};
use crate::types::TypeDescriptor;

/// `singleton(type)` (§4.9): returns the one-per-type instance, allocating
/// and constructing it on first call, no matter how many threads race to
/// be first.
///
/// # Errors
///
/// Propagates allocation failure from the backing allocator.
pub fn singleton(
    type_desc: &TypeDescriptor,
    allocator: &Allocator,
    type_desc_ptr: NonNull<TypeDescriptor>,
) -> std::io::Result<NonNull<ObjectHeader>> {
    // Step 1: acquire-load fast path.
    if let Some(existing) = type_desc.singleton() {
        return Ok(existing);
    }

    // Step 2: take the per-type singleton lock.
    let _guard = LockGuard::new(LockOrder::Singleton);
    let _lock = type_desc.singleton_lock.lock();

    // Step 3: re-check under lock.
    if let Some(existing) = type_desc.singleton() {
        return Ok(existing);
    }

    // Step 4: allocate, publish, then construct.
    let header = allocator.allocate_object(type_desc_ptr, type_desc.object_size)?;
    type_desc
        .singleton
        .store(header.as_ptr(), Ordering::Release);

    if let Some(init_object_fn) = type_desc.init_object_fn {
        init_object_fn(header);
    }
    if let Some(init_fn) = type_desc.init_fn {
        init_fn(header, std::ptr::null());
    }

    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TypeDescriptorSpec, TypeRegistry};
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    static INIT_CALLS: AtomicU32 = AtomicU32::new(0);

    fn counting_init(_h: NonNull<ObjectHeader>) {
        INIT_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn concurrent_singleton_calls_construct_exactly_once() {
        INIT_CALLS.store(0, Ordering::SeqCst);
        let mut registry = TypeRegistry::empty();
        registry.configure(vec![TypeDescriptorSpec {
            name_index: 0,
            object_size: 16,
            allocator_id: 0,
            base_types: vec![],
            property_layout: vec![],
            trace_fn: None,
            init_object_fn: Some(counting_init),
            init_fn: None,
            on_cleanup_fn: None,
            to_string_fn: None,
        }]);
        let registry = Arc::new(registry);
        let allocator = Arc::new(Allocator::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let allocator = Arc::clone(&allocator);
                std::thread::spawn(move || {
                    let type_desc = registry.get(0).unwrap();
                    let type_desc_ptr = NonNull::from(type_desc);
                    // `NonNull` is not `Send`; hand back the address instead.
                    singleton(type_desc, &allocator, type_desc_ptr)
                        .unwrap()
                        .as_ptr() as usize
                })
            })
            .collect();

        let results: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(INIT_CALLS.load(Ordering::SeqCst), 1);
    }
}
