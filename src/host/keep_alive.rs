use std::{
    fmt, ptr,
    rc::{Rc, Weak},
    sync::mpsc,
};

use thunderdome::Index;

// === KeepAliveQueue === //

/// Tracks host-side reachability of external cells.
///
/// Every [`KeepAlive`] allocated from the queue names one cell. Once the last clone of a
/// `KeepAlive` is dropped, its cell is sent to the queue as condemned and is handed out by
/// [`KeepAliveQueue::take_condemned`] on the next collection.
pub(crate) struct KeepAliveQueue {
    condemned_sender: Rc<mpsc::Sender<Index>>,
    condemned_receiver: mpsc::Receiver<Index>,
}

impl fmt::Debug for KeepAliveQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAliveQueue").finish_non_exhaustive()
    }
}

impl Default for KeepAliveQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl KeepAliveQueue {
    pub fn new() -> Self {
        let (condemned_sender, condemned_receiver) = mpsc::channel();

        Self {
            condemned_sender: Rc::new(condemned_sender),
            condemned_receiver,
        }
    }

    pub fn allocate(&self, cell: Index) -> KeepAlive {
        KeepAlive(Rc::new(KeepAlivePointee {
            condemned_sender: Rc::downgrade(&self.condemned_sender),
            cell,
        }))
    }

    /// Whether `keep_alive` was allocated by this queue rather than by another heap's.
    pub fn owns(&self, keep_alive: &KeepAlive) -> bool {
        // The weak reference keeps the sender's allocation, and thus its address, reserved.
        ptr::eq(
            keep_alive.0.condemned_sender.as_ptr(),
            Rc::as_ptr(&self.condemned_sender),
        )
    }

    pub fn take_condemned(&mut self) -> Option<Index> {
        self.condemned_receiver.try_recv().ok()
    }
}

struct KeepAlivePointee {
    condemned_sender: Weak<mpsc::Sender<Index>>,
    cell: Index,
}

impl Drop for KeepAlivePointee {
    fn drop(&mut self) {
        // The heap may already be gone, in which case there is nobody left to finalize the cell.
        let Some(condemned_sender) = self.condemned_sender.upgrade() else {
            return;
        };

        _ = condemned_sender.send(self.cell);
    }
}

// === KeepAlive === //

#[derive(Clone)]
pub(crate) struct KeepAlive(Rc<KeepAlivePointee>);

impl fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeepAlive").field(&self.0.cell).finish()
    }
}

impl Eq for KeepAlive {}

impl PartialEq for KeepAlive {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl KeepAlive {
    pub fn cell(&self) -> Index {
        self.0.cell
    }
}
