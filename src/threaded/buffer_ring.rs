//! Producer/consumer handoff for reshaped B blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Empty,
    Reshaping,
    Ready,
}

#[derive(Debug)]
struct Slot {
    workload: Option<usize>,
    state: SlotState,
    users_remaining: usize,
}

/// A ring of `num_buffers` reshaped-B slots shared by `num_users` threads.
///
/// Workload `i` lives in slot `i % num_buffers`. Every user calls
/// [`acquire`](Self::acquire) and then [`release`](Self::release) for every
/// workload, in increasing order. The first user to arrive reshapes the
/// block; the others wait until it is ready. A slot is refilled only after
/// all users released its previous workload.
///
/// A user that panics must [`poison`](Self::poison) the ring, otherwise the
/// others wait forever on a slot it will never fill or release. Waiters on a
/// poisoned ring panic too.
#[derive(Debug)]
pub struct BufferRing {
    slots: Mutex<Vec<Slot>>,
    changed: Condvar,
    num_users: usize,
    poisoned: AtomicBool,
}

/// Poisons its ring if dropped while the thread is panicking.
#[derive(Debug)]
pub struct PoisonOnPanic<'a> {
    ring: &'a BufferRing,
}

impl Drop for PoisonOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.ring.poison();
        }
    }
}

impl BufferRing {
    pub fn new(num_buffers: usize, num_users: usize) -> Self {
        assert!(num_buffers > 0, "a buffer ring needs at least one slot");
        let slots = (0..num_buffers)
            .map(|_| Slot {
                workload: None,
                state: SlotState::Empty,
                users_remaining: 0,
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
            changed: Condvar::new(),
            num_users: num_users.max(1),
            poisoned: AtomicBool::new(false),
        }
    }

    /// Wake every waiter and make them panic instead of waiting.
    pub fn poison(&self) {
        warn!("B ring poisoned by a panicking worker");
        // Store under the lock so a waiter can't miss the wakeup between its
        // check and its wait.
        let _slots = self.slots.lock();
        self.poisoned.store(true, Ordering::SeqCst);
        self.changed.notify_all();
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Guard that calls [`poison`](Self::poison) if the holder unwinds.
    pub fn poison_on_panic(&self) -> PoisonOnPanic<'_> {
        PoisonOnPanic { ring: self }
    }

    pub fn num_buffers(&self) -> usize {
        self.slots.lock().len()
    }

    /// Wait until workload `index` is in its slot, running `reshape` if this
    /// caller is the one that has to fill it.
    pub fn acquire<F: FnOnce()>(&self, index: usize, reshape: F) {
        let mut slots = self.slots.lock();
        let slot_id = index % slots.len();

        loop {
            if self.is_poisoned() {
                drop(slots);
                panic!("B ring poisoned: another worker panicked");
            }
            let slot = &mut slots[slot_id];
            match slot.workload {
                Some(current) if current == index => {
                    if slot.state == SlotState::Ready {
                        return;
                    }
                }
                previous => {
                    debug_assert!(previous.is_none_or(|p| p < index), "workloads acquired out of order");
                    if slot.users_remaining == 0 {
                        slot.workload = Some(index);
                        slot.state = SlotState::Reshaping;
                        slot.users_remaining = self.num_users;
                        trace!(index, slot_id, "reshaping B block");

                        MutexGuard::unlocked(&mut slots, reshape);

                        slots[slot_id].state = SlotState::Ready;
                        self.changed.notify_all();
                        return;
                    }
                }
            }
            self.changed.wait(&mut slots);
        }
    }

    /// Done reading workload `index`.
    pub fn release(&self, index: usize) {
        let mut slots = self.slots.lock();
        let slot_id = index % slots.len();
        let slot = &mut slots[slot_id];
        debug_assert_eq!(slot.workload, Some(index), "released a workload that is not in its slot");
        slot.users_remaining -= 1;
        if slot.users_remaining == 0 {
            self.changed.notify_all();
        }
    }
}
