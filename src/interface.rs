use std::{fmt, ops::Deref, ptr::NonNull};

use derive_where::derive_where;

use crate::{Erased, HostValue, InterfacePtr, TypeTag, W};

// === Interface === //

/// A capability that erased objects may expose, identified by a tag and described by a dispatch
/// table whose shape is agreed upon by producers and consumers.
pub trait Interface: 'static {
    const TAG: TypeTag;

    type Table: 'static;

    /// Answers a query for `tag` with `table` if `tag` names this interface.
    ///
    /// Meant to be chained inside [`Erasable::query`](crate::Erasable::query) implementations:
    ///
    /// ```ignore
    /// fn query(&self, tag: TypeTag) -> Option<InterfacePtr> {
    ///     Incrementable::answer(tag, &COUNTER_INCREMENTABLE)
    ///         .or_else(|| Resettable::answer(tag, &COUNTER_RESETTABLE))
    /// }
    /// ```
    fn answer(tag: TypeTag, table: &'static Self::Table) -> Option<InterfacePtr> {
        (tag == Self::TAG).then(|| InterfacePtr::of(table))
    }
}

/// The uniform signature of a host-callable method shim.
///
/// The shim receives the object's header and the host's argument array untouched. Checking arity
/// and converting arguments is entirely the shim's business. Like the entries of
/// [`AbiExports`](crate::AbiExports), shims use the Rust ABI.
pub type Method = unsafe fn(this: NonNull<Erased>, args: &[HostValue], w: W) -> HostValue;

// === InterfaceRef === //

/// A typed view of an erased object through one of its interfaces.
///
/// The view does not keep the object alive. It is only valid while the handle it was queried from
/// has not been finalized.
#[derive_where(Copy, Clone)]
pub struct InterfaceRef<I: Interface> {
    object: NonNull<Erased>,
    table: &'static I::Table,
}

impl<I: Interface> fmt::Debug for InterfaceRef<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceRef")
            .field("interface", &I::TAG)
            .field("object", &self.object)
            .finish()
    }
}

impl<I: Interface> InterfaceRef<I> {
    /// ## Safety
    ///
    /// `table` must have been returned by a query for `I::TAG` on `object`.
    ///
    pub unsafe fn from_raw_parts(object: NonNull<Erased>, table: InterfacePtr) -> Self {
        Self {
            object,
            table: unsafe { table.cast::<I::Table>() },
        }
    }

    pub fn object(self) -> NonNull<Erased> {
        self.object
    }

    pub fn table(self) -> &'static I::Table {
        self.table
    }
}

impl<I: Interface> Deref for InterfaceRef<I> {
    type Target = I::Table;

    fn deref(&self) -> &Self::Target {
        self.table
    }
}

// === Macros === //

#[doc(hidden)]
pub mod interface_internals {
    pub use {
        crate::{Interface, InterfaceRef, TypeTag},
        paste::paste,
    };
}

/// Declares interface marker types.
///
/// ```ignore
/// interface! {
///     pub Incrementable(IncrementableTable) = TypeTag::new(0x1, 0x2);
/// }
/// ```
///
/// This defines the unit struct `Incrementable`, implements [`Interface`] for it, and defines the
/// alias `IncrementableView` for `InterfaceRef<Incrementable>`.
#[macro_export]
macro_rules! interface {
    ($($vis:vis $name:ident($table:ty) = $tag:expr;)*) => {$(
        #[derive(Debug, Copy, Clone)]
        $vis struct $name;

        impl $crate::interface_internals::Interface for $name {
            const TAG: $crate::interface_internals::TypeTag = $tag;

            type Table = $table;
        }

        $crate::interface_internals::paste! {
            #[allow(dead_code)]
            $vis type [<$name View>] = $crate::interface_internals::InterfaceRef<$name>;
        }
    )*};
}
