//! Events File-Descriptor Table (EFDT) — spec.md §3/§4.B.
//!
//! A process-wide, fixed-size array mapping an integer fd to the mask and
//! user-data the multiplexer currently has registered for it. The
//! corresponding C structure (`examples/original_source/include/monkey/mk_event.h`)
//! indexes a flat array directly by fd, sized once at boot to the process
//! fd ceiling, with a lock-free read accessor (`mk_event_get_state`). We
//! keep that shape: one slot per possible fd, each independently guarded
//! so a cross-thread reader never contends with unrelated fds, and only
//! the owning worker ever writes its own connections' slots.

use std::sync::RwLock;

use crate::multiplex::EventMask;

/// A single EFDT entry: the registration state of one fd as last written
/// by `add`/`del`.
#[derive(Debug, Clone, Copy)]
pub struct FdEntry {
    /// The fd this entry describes.
    pub fd: i32,
    /// Interest mask currently registered with the multiplexer.
    pub mask: EventMask,
    /// Opaque token the owning worker associates with this fd (e.g. a
    /// slab index into its connection map).
    pub user_data: usize,
}

/// Process-wide fd -> registration-state table.
///
/// Sized at construction to the process fd ceiling (`RLIMIT_NOFILE`).
/// `get` may be called from any thread without blocking on another fd's
/// update; `set`/`clear` are called only by the multiplexer's `add`/`del`
/// on behalf of the fd's owning worker.
#[derive(Debug)]
pub struct Efdt {
    slots: Box<[RwLock<Option<FdEntry>>]>,
}

impl Efdt {
    /// Creates a table with `size` slots (typically the process fd
    /// ceiling; see [`crate::scheduler::server_capacity`]).
    pub fn new(size: usize) -> Self {
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || RwLock::new(None));
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    /// Reads the current entry for `fd`, if registered. Read-only callers
    /// (e.g. the scheduler inspecting a connection from another thread)
    /// use this; it never blocks behind a writer for long, as each fd has
    /// its own lock.
    pub fn get(&self, fd: i32) -> Option<FdEntry> {
        self.slots.get(fd as usize)?.read().ok()?.as_ref().copied()
    }

    /// Writes (creates or updates) the entry for `fd`. Called by the
    /// owning worker's multiplexer `add`.
    pub(crate) fn set(&self, fd: i32, mask: EventMask, user_data: usize) {
        if let Some(slot) = self.slots.get(fd as usize) {
            if let Ok(mut guard) = slot.write() {
                *guard = Some(FdEntry {
                    fd,
                    mask,
                    user_data,
                });
            }
        }
    }

    /// Clears the entry for `fd`. Idempotent: clearing an already-clear
    /// slot is a no-op, matching spec.md §8's `del` idempotence
    /// invariant.
    pub(crate) fn clear(&self, fd: i32) {
        if let Some(slot) = self.slots.get(fd as usize) {
            if let Ok(mut guard) = slot.write() {
                *guard = None;
            }
        }
    }

    /// Number of slots in the table.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn get_on_fresh_table_is_none() {
        let efdt = Efdt::new(16);
        assert!(efdt.get(3).is_none());
    }

    #[test]
    fn set_then_get_round_trips() {
        let efdt = Efdt::new(16);
        efdt.set(3, EventMask::READ, 42);
        let entry = efdt.get(3).expect("entry should exist");
        assert_eq!(entry.fd, 3);
        assert_eq!(entry.mask, EventMask::READ);
        assert_eq!(entry.user_data, 42);
    }

    #[test]
    fn clear_is_idempotent() {
        let efdt = Efdt::new(16);
        efdt.set(5, EventMask::READ, 1);
        efdt.clear(5);
        assert!(efdt.get(5).is_none());
        // second clear must not panic or error
        efdt.clear(5);
        assert!(efdt.get(5).is_none());
    }

    #[test]
    fn out_of_range_fd_is_none_not_panic() {
        let efdt = Efdt::new(4);
        assert!(efdt.get(1000).is_none());
    }
}
