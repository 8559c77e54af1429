//! FIFO queue of suspended acquisitions

use std::collections::VecDeque;

use tokio::sync::oneshot;

use super::handle::Handle;

/// What a queued caller is woken with
pub(crate) enum Grant<C> {
    /// An existing connection, already recorded as borrowed
    Handle(Handle<C>),
    /// A creation slot, already counted as reserved
    Slot,
    /// The pool started draining
    Closed,
}

struct Entry<C> {
    id: u64,
    tx: oneshot::Sender<Grant<C>>,
}

/// A caller's place in the queue
pub(crate) struct Ticket<C> {
    pub(crate) id: u64,
    pub(crate) rx: oneshot::Receiver<Grant<C>>,
}

/// Pending acquisitions in arrival order
///
/// Every entry is resolved by exactly one grant. Entries are only touched
/// under the owning pool's lock, so removal on cancellation and delivery of
/// a grant never interleave.
pub(crate) struct WaitQueue<C> {
    entries: VecDeque<Entry<C>>,
    next_id: u64,
}

impl<C> WaitQueue<C> {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_id: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a new waiter at the back of the queue
    pub(crate) fn enqueue(&mut self) -> Ticket<C> {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.entries.push_back(Entry { id, tx });
        Ticket { id, rx }
    }

    /// Remove a waiter that gave up; false if it was already served
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        match self.entries.iter().position(|entry| entry.id == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Deliver a grant to the longest waiter still listening
    ///
    /// Returns the grant if nobody took it.
    pub(crate) fn offer(&mut self, grant: Grant<C>) -> Option<Grant<C>> {
        let mut grant = grant;
        while let Some(entry) = self.entries.pop_front() {
            match entry.tx.send(grant) {
                Ok(()) => return None,
                Err(returned) => grant = returned,
            }
        }
        Some(grant)
    }

    /// Wake every waiter with [`Grant::Closed`]
    pub(crate) fn close_all(&mut self) -> usize {
        let count = self.entries.len();
        for entry in self.entries.drain(..) {
            let _ = entry.tx.send(Grant::Closed);
        }
        count
    }
}
