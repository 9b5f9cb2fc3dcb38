use std::{ffi::c_void, fmt, ptr, rc::Rc};

use super::KeepAlive;

// === Symbol === //

index_vec::define_index_type! {
    /// An interned name. Two symbols from the same heap are equal iff their names are.
    pub struct Symbol = u32;
}

// === HostValue === //

/// A value of the host runtime.
///
/// Only [`HostValue::External`] is meaningful to the trait ABI. The other variants exist so that
/// consumers can be handed values of the wrong shape.
#[derive(Debug, Clone)]
pub enum HostValue {
    Nil,
    Int(i64),
    Real(f64),
    Str(Rc<str>),
    Symbol(Symbol),
    External(ExternalRef),
}

impl HostValue {
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Self::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_external(&self) -> Option<&ExternalRef> {
        match self {
            Self::External(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<ExternalRef> for HostValue {
    fn from(value: ExternalRef) -> Self {
        Self::External(value)
    }
}

// === ExternalRef === //

/// A host reference to an external pointer cell.
///
/// Clones refer to the same cell. Dropping the last clone makes the cell unreachable; it is then
/// finalized and freed by the next [`Heap::collect`](crate::Heap::collect).
///
/// A reference only resolves in the heap which created it. Every other heap treats it as dangling.
#[derive(Clone, Eq, PartialEq)]
pub struct ExternalRef {
    pub(crate) keep_alive: KeepAlive,
}

impl fmt::Debug for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExternalRef")
            .field(&self.keep_alive.cell())
            .finish()
    }
}

// === ExternalCell === //

/// Called by the host when an external cell is finalized.
pub type Finalizer = fn(cell: &mut ExternalCell);

/// The host-side storage of an external pointer: an address, an optional marker, and an optional
/// finalizer.
pub struct ExternalCell {
    pub(crate) addr: *mut c_void,
    pub(crate) marker: Option<Symbol>,
    pub(crate) finalizer: Option<Finalizer>,
    pub(crate) on_exit: bool,
}

impl fmt::Debug for ExternalCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalCell")
            .field("addr", &self.addr)
            .field("marker", &self.marker)
            .field("has_finalizer", &self.finalizer.is_some())
            .finish()
    }
}

impl ExternalCell {
    pub(crate) fn new(addr: *mut c_void, marker: Option<Symbol>) -> Self {
        Self {
            addr,
            marker,
            finalizer: None,
            on_exit: false,
        }
    }

    pub fn addr(&self) -> *mut c_void {
        self.addr
    }

    pub fn marker(&self) -> Option<Symbol> {
        self.marker
    }

    /// Clears the address to null. Clearing an already-cleared cell does nothing.
    pub fn clear(&mut self) {
        self.addr = ptr::null_mut();
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizer.is_some()
    }

    /// Unregisters the finalizer without running it.
    pub fn take_finalizer(&mut self) -> Option<Finalizer> {
        self.finalizer.take()
    }

    /// Runs the registered finalizer, at most once over the cell's lifetime.
    pub(crate) fn run_finalizer(&mut self) -> bool {
        let Some(finalizer) = self.finalizer.take() else {
            return false;
        };

        finalizer(self);
        true
    }
}
