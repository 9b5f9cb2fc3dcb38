use std::{
    ffi::c_void,
    fmt,
    ptr::{self, NonNull},
};

use crate::TypeTag;

// === BaseVtable === //

/// Destructor entry of a [`BaseVtable`]. Receives the object's *header* pointer.
pub type DropFn = unsafe extern "C" fn(ptr: *mut Erased);

/// Interface lookup entry of a [`BaseVtable`]. Returns null for unimplemented interfaces.
pub type QueryFn = unsafe extern "C" fn(ptr: *mut Erased, tag: TypeTag) -> *const c_void;

/// The dispatch table shared by every instance of one concrete type.
///
/// Exactly one `static` instance exists per concrete type (see [`erasable!`]). It is never mutated
/// and never owned by the objects pointing to it.
///
/// The layout is frozen: fields are only ever appended.
#[repr(C)]
pub struct BaseVtable {
    pub drop: DropFn,
    pub concrete_tag: TypeTag,
    pub query: QueryFn,
}

impl fmt::Debug for BaseVtable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseVtable")
            .field("concrete_tag", &self.concrete_tag)
            .finish_non_exhaustive()
    }
}

impl BaseVtable {
    /// Builds the vtable of an [`ErasedBox<T>`]. Meant to initialize a `static`.
    pub const fn of<T: Erasable>() -> Self {
        Self {
            drop: drop_shim::<T>,
            concrete_tag: T::CONCRETE_TAG,
            query: query_shim::<T>,
        }
    }
}

unsafe extern "C" fn drop_shim<T: Erasable>(ptr: *mut Erased) {
    if ptr.is_null() {
        return;
    }

    // SAFETY: the vtable built by `BaseVtable::of::<T>` is only ever installed by
    // `ErasedBox::<T>::into_raw`, which allocated this header through a `Box<ErasedBox<T>>`.
    drop(unsafe { Box::from_raw(ptr.cast::<ErasedBox<T>>()) });
}

unsafe extern "C" fn query_shim<T: Erasable>(ptr: *mut Erased, tag: TypeTag) -> *const c_void {
    let Some(ptr) = NonNull::new(ptr) else {
        return ptr::null();
    };

    // SAFETY: see `drop_shim`.
    let value = unsafe { ErasedBox::<T>::value_ref(ptr) };

    value.query(tag).map_or(ptr::null(), InterfacePtr::as_ptr)
}

// === Erased === //

/// The uniform header every erased object starts with.
///
/// ```text
/// +-----------------+
/// | Erased          |
/// |   base ---------+---> static BaseVtable
/// +-----------------+
/// | type-specific   |
/// | data            |
/// +-----------------+
/// ```
#[repr(C)]
#[derive(Debug)]
pub struct Erased {
    pub base: *const BaseVtable,
}

impl Erased {
    pub const fn new(base: &'static BaseVtable) -> Self {
        Self { base }
    }

    /// Reads the header's vtable, returning `None` if the object is malformed (null vtable).
    ///
    /// ## Safety
    ///
    /// `ptr` must point to a live erased object.
    ///
    pub unsafe fn vtable(ptr: NonNull<Self>) -> Option<&'static BaseVtable> {
        unsafe { ptr.as_ref().base.as_ref() }
    }

    /// ## Safety
    ///
    /// `ptr` must point to a live erased object.
    ///
    pub unsafe fn concrete_tag(ptr: NonNull<Self>) -> Option<TypeTag> {
        unsafe { Self::vtable(ptr) }.map(|vtable| vtable.concrete_tag)
    }

    /// Asks the object's vtable for the dispatch table of the interface named by `tag`.
    ///
    /// ## Safety
    ///
    /// `ptr` must point to a live erased object.
    ///
    pub unsafe fn query(ptr: NonNull<Self>, tag: TypeTag) -> Option<InterfacePtr> {
        let vtable = unsafe { Self::vtable(ptr) }?;
        let table = unsafe { (vtable.query)(ptr.as_ptr(), tag) };

        NonNull::new(table.cast_mut()).map(InterfacePtr)
    }
}

// === InterfacePtr === //

/// An untyped pointer to an interface's `'static` dispatch table.
#[derive(Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
pub struct InterfacePtr(NonNull<c_void>);

impl fmt::Debug for InterfacePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InterfacePtr").field(&self.0).finish()
    }
}

impl InterfacePtr {
    pub fn of<V>(table: &'static V) -> Self {
        Self(NonNull::from(table).cast())
    }

    pub fn as_ptr(self) -> *const c_void {
        self.0.as_ptr()
    }

    /// Reinterprets the pointer as the interface's known table shape.
    ///
    /// ## Safety
    ///
    /// The pointer must have been produced from a `&'static V` (i.e. the queried tag must name an
    /// interface whose table type is `V`).
    ///
    pub unsafe fn cast<V>(self) -> &'static V {
        unsafe { self.0.cast::<V>().as_ref() }
    }
}

// === Erasable === //

/// A concrete type which can live behind an [`Erased`] header.
pub trait Erasable: 'static + Sized {
    /// The tag identifying this concrete type. Used for downcasts.
    const CONCRETE_TAG: TypeTag;

    /// Returns the dispatch table for the interface named by `tag`, or `None` if the type does not
    /// implement it.
    ///
    /// This must return the same answer for the same `tag` for as long as the object lives since
    /// callers are allowed to cache the result.
    fn query(&self, tag: TypeTag) -> Option<InterfacePtr>;
}

/// ## Safety
///
/// `base_vtable` must return the same `static` for every call and that vtable must have been
/// built with [`BaseVtable::of::<Self>`](BaseVtable::of). Use [`erasable!`] to implement this.
///
pub unsafe trait HasBaseVtable: Erasable {
    fn base_vtable() -> &'static BaseVtable;
}

#[doc(hidden)]
pub mod erasable_internals {
    pub use crate::{BaseVtable, HasBaseVtable};
}

/// Gives each listed [`Erasable`] type its unique static [`BaseVtable`].
#[macro_export]
macro_rules! erasable {
    ($($ty:ty),* $(,)?) => {$(
        unsafe impl $crate::erasable_internals::HasBaseVtable for $ty {
            fn base_vtable() -> &'static $crate::erasable_internals::BaseVtable {
                static VTABLE: $crate::erasable_internals::BaseVtable =
                    $crate::erasable_internals::BaseVtable::of::<$ty>();

                &VTABLE
            }
        }
    )*};
}

// === ErasedBox === //

/// The heap layout of an erased `T`: the header followed by the value.
#[repr(C)]
pub struct ErasedBox<T> {
    header: Erased,
    value: T,
}

impl<T: HasBaseVtable> ErasedBox<T> {
    /// Moves `value` onto the heap behind a header and returns the header pointer.
    ///
    /// The allocation is released by calling the vtable's `drop` entry, which is what wrapping the
    /// pointer into a handle arranges for.
    pub fn into_raw(value: T) -> NonNull<Erased> {
        let boxed = Box::new(Self {
            header: Erased::new(T::base_vtable()),
            value,
        });

        NonNull::from(Box::leak(boxed)).cast()
    }
}

impl<T> ErasedBox<T> {
    /// ## Safety
    ///
    /// `ptr` must have been returned by [`ErasedBox::<T>::into_raw`](ErasedBox::into_raw) and must
    /// still be live for `'a`.
    ///
    pub unsafe fn value_ref<'a>(ptr: NonNull<Erased>) -> &'a T {
        unsafe { &ptr.cast::<Self>().as_ref().value }
    }

    /// ## Safety
    ///
    /// Same as [`ErasedBox::value_ref`]. Additionally, no other reference to the value may be
    /// alive for `'a`.
    ///
    pub unsafe fn value_mut<'a>(ptr: NonNull<Erased>) -> &'a mut T {
        unsafe { &mut ptr.cast::<Self>().as_mut().value }
    }
}

/// Downcasts an erased object to `T` if its concrete tag is `T`'s.
///
/// ## Safety
///
/// `ptr` must point to a live erased object whose producer honored the tag contract (a concrete
/// tag of `T::CONCRETE_TAG` implies an [`ErasedBox<T>`] layout).
///
pub unsafe fn downcast_ref<'a, T: Erasable>(ptr: NonNull<Erased>) -> Option<&'a T> {
    let tag = unsafe { Erased::concrete_tag(ptr) }?;

    (tag == T::CONCRETE_TAG).then(|| unsafe { ErasedBox::<T>::value_ref(ptr) })
}

#[cfg(test)]
mod tests {
    use std::mem::{align_of, offset_of, size_of};

    use super::{BaseVtable, Erased};
    use crate::TypeTag;

    #[test]
    fn header_is_pointer_sized() {
        assert_eq!(size_of::<Erased>(), size_of::<*const ()>());
        assert_eq!(align_of::<Erased>(), align_of::<*const ()>());
    }

    #[test]
    fn vtable_offsets_are_frozen() {
        let ptr = size_of::<*const ()>();
        let tag = ptr.next_multiple_of(align_of::<TypeTag>());

        assert_eq!(offset_of!(BaseVtable, drop), 0);
        assert_eq!(offset_of!(BaseVtable, concrete_tag), tag);
        assert_eq!(
            offset_of!(BaseVtable, query),
            (tag + size_of::<TypeTag>()).next_multiple_of(align_of::<*const ()>())
        );
    }
}
