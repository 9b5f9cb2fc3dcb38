//! A stable binary contract for trait dispatch across independently compiled modules.
//!
//! A producing module moves a concrete value behind a uniform [`Erased`] header, hands the header
//! to the host as an opaque handle with [`wrap`], and forgets about it. Any module holding that
//! handle, including modules which have never seen the concrete type, can then ask whether the
//! object implements some interface and, if it does, get that interface's dispatch table back.
//!
//! ```
//! use std::{cell::Cell, ptr::NonNull};
//!
//! use crossdyn::{
//!     AbiImports, Erasable, Erased, ErasedBox, Heap, Interface as _, InterfacePtr, TypeTag,
//!     erasable, interface,
//! };
//!
//! // Shared between producer and consumer: the interface's tag and table shape.
//! pub struct IncrementableTable {
//!     pub increment: unsafe fn(NonNull<Erased>),
//!     pub value: unsafe fn(NonNull<Erased>) -> u32,
//! }
//!
//! interface! {
//!     pub Incrementable(IncrementableTable) = TypeTag::new(0x1, 0xa);
//! }
//!
//! // Producer side.
//! pub struct Counter {
//!     count: Cell<u32>,
//! }
//!
//! unsafe fn counter_increment(this: NonNull<Erased>) {
//!     let counter = unsafe { ErasedBox::<Counter>::value_ref(this) };
//!     counter.count.set(counter.count.get() + 1);
//! }
//!
//! unsafe fn counter_value(this: NonNull<Erased>) -> u32 {
//!     unsafe { ErasedBox::<Counter>::value_ref(this) }.count.get()
//! }
//!
//! static COUNTER_INCREMENTABLE: IncrementableTable = IncrementableTable {
//!     increment: counter_increment,
//!     value: counter_value,
//! };
//!
//! impl Erasable for Counter {
//!     const CONCRETE_TAG: TypeTag = TypeTag::new(0x2, 0xa);
//!
//!     fn query(&self, tag: TypeTag) -> Option<InterfacePtr> {
//!         Incrementable::answer(tag, &COUNTER_INCREMENTABLE)
//!     }
//! }
//!
//! erasable!(Counter);
//!
//! let mut w = Heap::new();
//! let w = &mut w;
//!
//! crossdyn::register("counters", w);
//!
//! let handle = crossdyn::wrap_value(Counter { count: Cell::new(0) }, w);
//!
//! // Consumer side.
//! let abi = AbiImports::load("counters", w).unwrap();
//! let view = abi.query_as::<Incrementable>(&handle, w).unwrap();
//!
//! unsafe { (view.increment)(view.object()) };
//! assert_eq!(unsafe { (view.value)(view.object()) }, 1);
//! ```
//!
//! # Lifecycle
//!
//! Once wrapped, an object belongs to the host. Its destructor runs exactly once, when the host
//! finds the handle unreachable ([`Heap::collect`]), when the handle is explicitly finalized
//! ([`lifecycle::finalize`]), or when the [`Heap`] is dropped. From then on, [`get`] and [`query`]
//! on that handle return `None` forever.
//!
//! # Threading
//!
//! Every operation runs on the thread owning the [`Heap`]. The heap is neither `Send` nor `Sync`
//! and every operation borrows it, so this is checked at compile time rather than at runtime.
//!
//! # Failure
//!
//! The boundary operations never panic on foreign input. Values of the wrong shape, values not
//! produced by [`wrap`], finalized handles, unimplemented interfaces, and objects with a null
//! vtable are all reported as `None`.

mod erased;
pub use self::erased::*;

mod host;
pub use self::host::*;

mod import;
pub use self::import::*;

mod interface;
pub use self::interface::*;

pub mod lifecycle;

mod registry;
pub use self::registry::*;

mod tag;
pub use self::tag::*;

#[cfg(test)]
mod tests;
