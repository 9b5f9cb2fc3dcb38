use std::ptr::NonNull;

use crate::{Erased, ExternalCell, HostValue, W, Wr, registry};

// === HandleState === //

/// The observable states of a handle.
///
/// A handle is briefly *finalizing* while its destructor runs but, since finalization happens on
/// the host thread and the destructor cannot observe the handle, that state is never visible.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HandleState {
    Live,
    Finalized,
}

pub fn handle_state(value: &HostValue, w: Wr) -> Option<HandleState> {
    let handle = registry::as_handle(value, w)?;
    let cell = w.external(handle)?;

    Some(if cell.addr().is_null() {
        HandleState::Finalized
    } else {
        HandleState::Live
    })
}

// === Finalization === //

/// The finalizer registered for every wrapped handle.
///
/// Destroys the erased object (if the cell still points to one and its vtable is present) and then
/// clears the cell's address, whether or not a destructor ran. A cleared cell is left alone.
pub fn finalize_cell(cell: &mut ExternalCell) {
    let cell = scopeguard::guard(cell, |cell: &mut ExternalCell| cell.clear());

    let Some(object) = NonNull::new(cell.addr().cast::<Erased>()) else {
        return;
    };

    // SAFETY: a non-cleared cell created by `wrap` points to a live object.
    match unsafe { Erased::vtable(object) } {
        Some(vtable) => {
            log::debug!("finalizing erased object {object:p} of type {}", vtable.concrete_tag);

            // SAFETY: the address is cleared right after, so `drop` cannot run twice.
            unsafe { (vtable.drop)(object.as_ptr()) };
        }
        None => {
            log::debug!("erased object {object:p} has no vtable; skipping its destructor");
        }
    }
}

/// Finalizes a handle now instead of waiting for the host to find it unreachable.
///
/// The destructor will not run again when the handle is later collected. Returns whether the
/// handle was live; finalizing a finalized handle, or passing a value which isn't a handle, does
/// nothing.
pub fn finalize(value: &HostValue, w: W) -> bool {
    let Some(handle) = registry::as_handle(value, w) else {
        return false;
    };

    let Some(cell) = w.external_mut(handle) else {
        return false;
    };

    let was_live = !cell.addr().is_null();

    cell.take_finalizer();
    finalize_cell(cell);

    was_live
}
