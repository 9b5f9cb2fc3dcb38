use std::{fmt, ptr::NonNull};

use crate::{
    Erasable, Erased, ErasedBox, ExternalRef, HasBaseVtable, HostValue, Interface, InterfacePtr,
    InterfaceRef, Symbol, TypeTag, W, Wr, downcast_ref, lifecycle,
};

// === Version === //

/// The trait ABI's version.
///
/// A different `major` means an incompatible layout. A greater `minor` means fields or exports
/// were appended and everything older is still where it was.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AbiVersion {
    pub major: u16,
    pub minor: u16,
}

impl fmt::Display for AbiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl AbiVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Whether an implementation of this version can serve a consumer built against `required`.
    pub const fn supports(self, required: Self) -> bool {
        self.major == required.major && self.minor >= required.minor
    }
}

pub const ABI_VERSION: AbiVersion = AbiVersion::new(0, 1);

/// The name of the symbol marking handles created by [`wrap`].
pub const MARKER_NAME: &str = "crossdyn::erased";

/// The name under which [`register`] publishes [`EXPORTS`].
pub const EXPORTS_NAME: &str = "crossdyn_abi";

// === Exports === //

/// The boundary operations as published to other modules.
///
/// Entries are only ever appended, and `version` stays first so that a consumer can check it before
/// touching anything else. The entries themselves use the Rust ABI over host types: producer and
/// consumer must agree on the compiler and on this crate's host model. Only the erased object
/// layout ([`Erased`], [`BaseVtable`](crate::BaseVtable)) is `extern "C"`.
#[repr(C)]
pub struct AbiExports {
    pub version: AbiVersion,
    pub wrap: unsafe fn(object: NonNull<Erased>, w: W) -> HostValue,
    pub get: fn(value: &HostValue, w: Wr) -> Option<NonNull<Erased>>,
    pub query: fn(value: &HostValue, tag: TypeTag, w: Wr) -> Option<InterfacePtr>,
}

impl fmt::Debug for AbiExports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbiExports")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

pub static EXPORTS: AbiExports = AbiExports {
    version: ABI_VERSION,
    wrap,
    get,
    query,
};

/// Makes the trait ABI discoverable under `package`.
///
/// Must run during the producing module's initialization, before any consumer calls
/// [`AbiImports::load`](crate::AbiImports::load). Calling it again is harmless.
pub fn register(package: &str, w: W) {
    let marker = ensure_marker(w);

    w.register_callable(package, EXPORTS_NAME, &EXPORTS);

    log::debug!("registered trait ABI {ABI_VERSION} under `{package}` (marker {marker:?})");
}

// === Marker === //

/// Creates the private marker on first use and returns it on every call.
pub fn ensure_marker(w: W) -> Symbol {
    w.intern(MARKER_NAME)
}

/// Returns the private marker, or `None` if nothing has been registered or wrapped yet (in which
/// case no value can carry it).
pub fn marker(w: Wr) -> Option<Symbol> {
    w.lookup_symbol(MARKER_NAME)
}

/// Returns the external reference behind `value` if it is a handle created by [`wrap`], live or
/// finalized.
pub fn as_handle<'v>(value: &'v HostValue, w: Wr) -> Option<&'v ExternalRef> {
    let handle = value.as_external()?;
    let marker = marker(w)?;

    (w.external(handle)?.marker() == Some(marker)).then_some(handle)
}

// === Boundary operations === //

/// Hands ownership of an erased object to the host, returning its handle.
///
/// The object's destructor runs exactly once: when the host finds the handle unreachable, when the
/// handle is explicitly [finalized](lifecycle::finalize), or when the heap is dropped.
///
/// ## Safety
///
/// `object` must be heap-allocated, start with a valid [`Erased`] header whose vtable's `drop`
/// releases it, and must not be released by anyone else afterwards.
///
pub unsafe fn wrap(object: NonNull<Erased>, w: W) -> HostValue {
    let marker = ensure_marker(w);
    let handle = w.make_external(object.as_ptr().cast(), Some(marker));

    w.register_finalizer(&handle, lifecycle::finalize_cell, true);

    log::trace!("wrapped erased object {object:p} as {handle:?}");

    HostValue::External(handle)
}

/// Moves `value` behind an erased header and [`wrap`]s it.
pub fn wrap_value<T: HasBaseVtable>(value: T, w: W) -> HostValue {
    // SAFETY: `into_raw` allocates a `Box` whose vtable's `drop` frees exactly that box.
    unsafe { wrap(ErasedBox::into_raw(value), w) }
}

/// Recovers the erased object behind `value`.
///
/// Returns `None` if `value` is not an external pointer, was not created by [`wrap`], or has been
/// finalized.
pub fn get(value: &HostValue, w: Wr) -> Option<NonNull<Erased>> {
    let handle = as_handle(value, w)?;

    NonNull::new(w.external(handle)?.addr().cast())
}

/// Asks the object behind `value` for the dispatch table of the interface named by `tag`.
///
/// Returns `None` whenever [`get`] would, if the object's vtable is null, or if the object does not
/// implement the interface.
pub fn query(value: &HostValue, tag: TypeTag, w: Wr) -> Option<InterfacePtr> {
    let object = get(value, w)?;

    // SAFETY: live handles point to live objects by `wrap`'s contract.
    let table = unsafe { Erased::query(object, tag) };

    log::trace!("queried {object:p} for {tag}: {table:?}");

    table
}

/// Typed [`query`].
pub fn query_as<I: Interface>(value: &HostValue, w: Wr) -> Option<InterfaceRef<I>> {
    let object = get(value, w)?;
    let table = query(value, I::TAG, w)?;

    // SAFETY: `table` answered a query for `I::TAG` on `object`.
    Some(unsafe { InterfaceRef::from_raw_parts(object, table) })
}

/// Recovers a reference to the concrete `T` behind `value` if that is its concrete type.
///
/// The reference borrows the heap, and finalization requires borrowing it mutably, so the object
/// cannot be destroyed while the reference is alive.
pub fn get_as<'a, T: Erasable>(value: &HostValue, w: Wr<'a>) -> Option<&'a T> {
    let object = get(value, w)?;

    // SAFETY: live handles point to live objects by `wrap`'s contract.
    unsafe { downcast_ref::<T>(object) }
}
