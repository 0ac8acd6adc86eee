//! A tracing, stop-the-world garbage collector runtime core.
//!
//! `gc-core` is the embeddable half of a managed-language runtime: given a
//! compiler-emitted table of type descriptors ([`TypeDescriptorSpec`]), it
//! provides a `BiBOP`-style slab allocator, a mark-sweep collector
//! coordinated across mutator threads via a safepoint handshake, weak
//! references, finalizers, and per-type singletons. It does not include a
//! compiler, a bytecode interpreter, or a `Gc<T>` smart-pointer surface —
//! those live in the host embedding this crate.
//!
//! # Quick start
//!
//! ```ignore
//! use gc_core::{Runtime, TypeDescriptorSpec};
//! use std::sync::Arc;
//!
//! let mut runtime = Runtime::new();
//! runtime.configure_types(vec![TypeDescriptorSpec {
//!     name_index: 0,
//!     object_size: 16,
//!     allocator_id: 0,
//!     base_types: vec![],
//!     property_layout: vec![],
//!     trace_fn: None,
//!     init_object_fn: None,
//!     init_fn: None,
//!     on_cleanup_fn: None,
//!     to_string_fn: None,
//! }]);
//! let runtime = Arc::new(runtime);
//! runtime.configure_gc().unwrap();
//!
//! let obj = runtime.allocate_object(0).unwrap();
//! let _root = runtime.def_local_ref(obj);
//! runtime.collect(true);
//! runtime.quit();
//! ```
//!
//! # Concurrency model
//!
//! Collection is stop-the-world: every registered mutator thread must call
//! [`Runtime::gc_check`] at its own back edges (or bracket blocking calls
//! with [`Runtime::exit`]/[`Runtime::enter`]) for a cycle to proceed. There
//! is no concurrent or incremental marking and no moving/compacting GC; see
//! `DESIGN.md` for the full list of non-goals and the redesign decisions
//! made against the reference design this crate grew out of.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]

mod config;
mod error;
mod finalize;
mod lock_order;
mod metrics;
mod object;
mod page;
mod roots;
mod runtime;
mod safepoint;
mod singleton;
mod slab;
mod sweep;
mod trace;
mod tracing_support;
mod trigger;
mod types;
mod weakref;

pub use config::GcConfig;
pub use error::{GcError, GcResult};
pub use metrics::{CollectionType, GcMetrics};
pub use object::{Allocator, ObjectHeader, ObjectList};
pub use roots::LocalRoot;
pub use runtime::{Callback, Runtime};
pub use trace::Tracer;
pub use types::{
    CleanupFn, InitFn, InitObjectFn, PropertyDescriptor, ToStringFn, TraceFn, TypeDescriptor,
    TypeDescriptorSpec,
};
pub use weakref::{WeakRefManager, WeakSlot};
