//! A minimal single-threaded host runtime.
//!
//! The trait ABI needs somewhere to put its handles: a heap of host values whose lifetime is
//! decided by reachability, with finalizers run when a value is reclaimed. This module provides
//! exactly that and nothing more. A real embedding replaces it with the foreign runtime's own
//! external pointers and collector.

use std::{any::Any, ffi::c_void, fmt, hash::BuildHasherDefault};

use hashbrown::HashMap;
use index_vec::IndexVec;
use rustc_hash::FxHasher;
use thunderdome::{Arena, Index};

mod keep_alive;
use self::keep_alive::*;

mod value;
pub use self::value::*;

pub(crate) type FxBuildHasher = BuildHasherDefault<FxHasher>;
pub(crate) type FxHashMap<K, V> = HashMap<K, V, FxBuildHasher>;

pub type W<'a> = &'a mut Heap;
pub type Wr<'a> = &'a Heap;

// === Heap === //

/// The host's object store.
///
/// A `Heap` is neither `Send` nor `Sync`. Every host operation takes it by reference, which pins
/// all of them to the thread that owns it.
#[derive(Default)]
pub struct Heap {
    symbols: IndexVec<Symbol, Box<str>>,
    symbol_lookup: FxHashMap<Box<str>, Symbol>,
    externals: Arena<ExternalCell>,
    keep_alive: KeepAliveQueue,
    callables: FxHashMap<Box<str>, FxHashMap<Box<str>, &'static dyn Any>>,
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("symbols", &self.symbols.len())
            .field("externals", &self.externals.len())
            .finish_non_exhaustive()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    // === Symbols === //

    /// Returns the symbol for `name`, creating it on first use.
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(&symbol) = self.symbol_lookup.get(name) {
            return symbol;
        }

        let symbol = self.symbols.push(name.into());
        self.symbol_lookup.insert(name.into(), symbol);
        symbol
    }

    /// Returns the symbol for `name` if it has ever been interned.
    pub fn lookup_symbol(&self, name: &str) -> Option<Symbol> {
        self.symbol_lookup.get(name).copied()
    }

    pub fn symbol_name(&self, symbol: Symbol) -> &str {
        &self.symbols[symbol]
    }

    // === External pointers === //

    pub fn make_external(&mut self, addr: *mut c_void, marker: Option<Symbol>) -> ExternalRef {
        let cell = self.externals.insert(ExternalCell::new(addr, marker));

        ExternalRef {
            keep_alive: self.keep_alive.allocate(cell),
        }
    }

    fn cell_of(&self, handle: &ExternalRef) -> Option<Index> {
        self.keep_alive
            .owns(&handle.keep_alive)
            .then(|| handle.keep_alive.cell())
    }

    /// Returns the cell behind `handle`, or `None` if `handle` was made by a different heap.
    pub fn external(&self, handle: &ExternalRef) -> Option<&ExternalCell> {
        self.externals.get(self.cell_of(handle)?)
    }

    pub fn external_mut(&mut self, handle: &ExternalRef) -> Option<&mut ExternalCell> {
        let cell = self.cell_of(handle)?;
        self.externals.get_mut(cell)
    }

    /// Registers `finalizer` to run once when `handle`'s cell is reclaimed. If `on_exit` is set,
    /// it also runs when the heap itself is dropped with the cell still alive.
    ///
    /// Registering again replaces the previous finalizer.
    pub fn register_finalizer(
        &mut self,
        handle: &ExternalRef,
        finalizer: Finalizer,
        on_exit: bool,
    ) {
        if let Some(cell) = self.external_mut(handle) {
            cell.finalizer = Some(finalizer);
            cell.on_exit = on_exit;
        }
    }

    /// Runs `handle`'s finalizer now rather than at collection. Returns whether a finalizer ran.
    pub fn run_finalizer(&mut self, handle: &ExternalRef) -> bool {
        self.external_mut(handle)
            .is_some_and(ExternalCell::run_finalizer)
    }

    /// Reclaims every external cell which became unreachable since the last collection, running
    /// its finalizer first. Returns the number of cells reclaimed.
    pub fn collect(&mut self) -> usize {
        let mut reclaimed = 0;

        // Finalizers may drop further references, which simply extends the queue we're draining.
        while let Some(index) = self.keep_alive.take_condemned() {
            let Some(mut cell) = self.externals.remove(index) else {
                continue;
            };

            cell.run_finalizer();
            reclaimed += 1;
        }

        if reclaimed > 0 {
            log::trace!("reclaimed {reclaimed} external cell(s)");
        }

        reclaimed
    }

    pub fn live_externals(&self) -> usize {
        self.externals.len()
    }

    // === Routine discovery === //

    /// Publishes `routine` under `package` so that other modules can discover it through
    /// [`Heap::callable`].
    pub fn register_callable(&mut self, package: &str, name: &str, routine: &'static dyn Any) {
        self.callables
            .entry(package.into())
            .or_default()
            .insert(name.into(), routine);
    }

    pub fn callable<T: Any>(&self, package: &str, name: &str) -> Option<&'static T> {
        let routine: &'static dyn Any = *self.callables.get(package)?.get(name)?;

        routine.downcast_ref::<T>()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        for (_, cell) in self.externals.iter_mut() {
            if cell.on_exit {
                cell.run_finalizer();
            }
        }
    }
}
