//! The type registry (C3): an immutable table of type descriptors built
//! once from compiler-emitted tables (§4.3).
//!
//! The compiler and its packed integer table are out of scope (§1); this
//! crate's entry point takes the already-resolved function-pointer table a
//! compiler would have produced, as [`TypeDescriptorSpec`].

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use parking_lot::Mutex;

use crate::object::ObjectHeader;
use crate::trace::Tracer;

/// Marks an object reachable and recurses into its reference fields.
/// Implementations must call [`Tracer::mark`] on every `Gc`-shaped field,
/// directly or through a nested type's own `trace_fn`.
pub type TraceFn = fn(NonNull<ObjectHeader>, &mut Tracer);

/// Zero-argument constructor, run once right after an object's header is
/// published.
pub type InitObjectFn = fn(NonNull<ObjectHeader>);

/// One-argument constructor, run after `init_object_fn` when the caller
/// supplied an argument payload.
pub type InitFn = fn(NonNull<ObjectHeader>, *const ());

/// Finalizer. Presence of this function routes instances of the type onto
/// the cleanup-bearing object list (§3, §4.7).
pub type CleanupFn = fn(NonNull<ObjectHeader>);

/// Display conversion. Never consulted by the collector.
pub type ToStringFn = fn(NonNull<ObjectHeader>) -> String;

/// One named, typed field in a type's `property_layout` (§3). Consulted
/// only by introspection; the tracer never reads this.
#[derive(Debug, Clone, Copy)]
pub struct PropertyDescriptor {
    /// Index into an interned string table.
    pub name_index: u32,
    /// Type index of this field's declared type.
    pub type_index: u32,
}

/// Caller-supplied description of one type, as a compiler would emit it.
pub struct TypeDescriptorSpec {
    pub name_index: u32,
    pub object_size: u32,
    pub allocator_id: u32,
    pub base_types: Vec<u32>,
    /// Ordered field names and types, for introspection only (§3).
    pub property_layout: Vec<PropertyDescriptor>,
    pub trace_fn: Option<TraceFn>,
    pub init_object_fn: Option<InitObjectFn>,
    pub init_fn: Option<InitFn>,
    pub on_cleanup_fn: Option<CleanupFn>,
    pub to_string_fn: Option<ToStringFn>,
}

/// An immutable, one-per-type descriptor (§3). Never moves or mutates
/// after [`TypeRegistry::configure`] returns, save for the singleton slot,
/// which is published exactly once per type (C11, §4.9).
pub struct TypeDescriptor {
    pub index: u32,
    pub name_index: u32,
    pub object_size: u32,
    pub allocator_id: u32,
    pub base_types: Vec<u32>,
    pub property_layout: Vec<PropertyDescriptor>,
    pub trace_fn: Option<TraceFn>,
    pub init_object_fn: Option<InitObjectFn>,
    pub init_fn: Option<InitFn>,
    pub on_cleanup_fn: Option<CleanupFn>,
    pub to_string_fn: Option<ToStringFn>,
    pub(crate) singleton: AtomicPtr<ObjectHeader>,
    pub(crate) singleton_lock: Mutex<()>,
}

impl TypeDescriptor {
    /// This type's declared fields, for introspection. The tracer does not
    /// consult this; see `trace_fn` for actual reachability.
    #[must_use]
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.property_layout
    }

    /// True if this type's instances carry a finalizer and therefore
    /// belong on the cleanup-bearing list rather than the plain list.
    #[must_use]
    pub fn has_cleanup(&self) -> bool {
        self.on_cleanup_fn.is_some()
    }

    /// Loads the published singleton instance, if any, with acquire
    /// semantics (§4.9 step 1).
    #[must_use]
    pub fn singleton(&self) -> Option<NonNull<ObjectHeader>> {
        NonNull::new(self.singleton.load(Ordering::Acquire))
    }
}

/// The immutable table of type descriptors (C3). Built once by
/// [`configure`](Self::configure); read-only afterward.
pub struct TypeRegistry {
    types: Box<[TypeDescriptor]>,
    configured: AtomicBool,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

impl TypeRegistry {
    /// An empty, unconfigured registry. [`configure`](Self::configure) must
    /// run before any lookup succeeds.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            types: Box::new([]),
            configured: AtomicBool::new(false),
        }
    }

    /// Builds the descriptor array from compiler-emitted specs (§4.3).
    ///
    /// `index` is assigned by position: the Nth spec becomes type index N.
    ///
    /// # Panics
    ///
    /// Panics if called more than once on the same registry (type
    /// descriptors never move or mutate after configuration, per invariant
    /// 3) or if `base_types` references an out-of-range index.
    pub fn configure(&mut self, specs: Vec<TypeDescriptorSpec>) {
        assert!(
            !self.configured.load(Ordering::Acquire),
            "configure_types must be called exactly once"
        );
        let count = specs.len();
        let types: Vec<TypeDescriptor> = specs
            .into_iter()
            .enumerate()
            .map(|(i, spec)| {
                for &base in &spec.base_types {
                    assert!((base as usize) < count, "base_types entry out of range");
                }
                TypeDescriptor {
                    index: i as u32,
                    name_index: spec.name_index,
                    object_size: spec.object_size,
                    allocator_id: spec.allocator_id,
                    base_types: spec.base_types,
                    property_layout: spec.property_layout,
                    trace_fn: spec.trace_fn,
                    init_object_fn: spec.init_object_fn,
                    init_fn: spec.init_fn,
                    on_cleanup_fn: spec.on_cleanup_fn,
                    to_string_fn: spec.to_string_fn,
                    singleton: AtomicPtr::new(std::ptr::null_mut()),
                    singleton_lock: Mutex::new(()),
                }
            })
            .collect();
        self.types = types.into_boxed_slice();
        self.configured.store(true, Ordering::Release);
    }

    /// True once [`configure`](Self::configure) has run.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.configured.load(Ordering::Acquire)
    }

    /// Looks up a descriptor by its stable index.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<&TypeDescriptor> {
        self.types.get(index as usize)
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Highest `allocator_id` referenced by any registered type, or `None`
    /// if the registry is empty. Used by the runtime to size its allocator
    /// table.
    #[must_use]
    pub fn max_allocator_id(&self) -> Option<u32> {
        self.types.iter().map(|t| t.allocator_id).max()
    }

    /// `instance_of(obj, T)` (§4.2): true when `obj`'s type is `type_index`
    /// or `type_index` appears in its `base_types`. Linear scan is
    /// intentional; inheritance depths are small.
    #[must_use]
    pub fn instance_of(&self, obj_type_index: u32, type_index: u32) -> bool {
        if obj_type_index == type_index {
            return true;
        }
        self.get(obj_type_index)
            .is_some_and(|desc| desc.base_types.contains(&type_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(object_size: u32, base_types: Vec<u32>) -> TypeDescriptorSpec {
        TypeDescriptorSpec {
            name_index: 0,
            object_size,
            allocator_id: 0,
            base_types,
            property_layout: vec![],
            trace_fn: None,
            init_object_fn: None,
            init_fn: None,
            on_cleanup_fn: None,
            to_string_fn: None,
        }
    }

    #[test]
    fn instance_of_matches_self_and_base_types() {
        let mut registry = TypeRegistry::empty();
        registry.configure(vec![spec(16, vec![]), spec(32, vec![0])]);
        assert!(registry.instance_of(1, 1));
        assert!(registry.instance_of(1, 0));
        assert!(!registry.instance_of(0, 1));
    }

    #[test]
    #[should_panic(expected = "exactly once")]
    fn configure_twice_panics() {
        let mut registry = TypeRegistry::empty();
        registry.configure(vec![spec(16, vec![])]);
        registry.configure(vec![spec(16, vec![])]);
    }
}
