//! The unicity façade: one owner binding cells, table, and handles.

use core::hash::Hash;
use core::mem::{size_of, MaybeUninit};
use core::ptr::{self, NonNull};
use core::slice;
use std::rc::{Rc, Weak};

use crate::handle::Handle;
use crate::unique_cell::{TailSlot, UniqueCell};
use crate::unique_table::{UniqueTable, UniqueTableStats, Unified};
use crate::variant::{Alternative, Variant};

/// Shared state behind a [`Unicity`] and every handle it made.
///
/// Each live cell holds one strong count on this allocation (taken with the
/// raw `Rc` counter API, the way the reference refcounted-map keeps its
/// inner state alive through outstanding entries). Handles therefore stay
/// valid after the `Unicity` value itself is dropped: the allocation goes
/// away only when the last cell is erased.
pub(crate) struct Inner<V: Eq + Hash> {
    table: std::cell::RefCell<UniqueTable<V>>,
    /// Raw self pointer for strong-count manipulation.
    self_ptr: *const Inner<V>,
    /// Weak self reference backing liveness debug checks.
    self_weak: Weak<Inner<V>>,
}

impl<V: Eq + Hash> Inner<V> {
    /// Take one keepalive count for a newly unified cell.
    fn retain_owner(&self) {
        debug_assert!(self.self_weak.strong_count() > 0);
        unsafe { Rc::increment_strong_count(self.self_ptr) };
    }

    /// Erase a cell whose refcount reached zero: unlink it, drop its value,
    /// free its block, and return the cell's keepalive count.
    ///
    /// # Safety
    ///
    /// `cell` must be unreferenced and unified in `this`'s table, and this
    /// must be the only erasure of it.
    pub(crate) unsafe fn erase_cell(this: NonNull<Inner<V>>, cell: NonNull<UniqueCell<V>>) {
        let (bytes, self_ptr) = {
            let inner = this.as_ref();
            let mut table = inner.table.borrow_mut();
            table.erase(cell.as_ref());
            (cell.as_ref().bytes() as usize, inner.self_ptr)
        };
        // The value is dropped outside the table borrow: releasing its
        // child handles may erase further cells through this same table.
        ptr::drop_in_place(UniqueCell::value_ptr(cell));
        UniqueTable::<V>::free_block(cell.cast(), bytes);
        // Return the keepalive count last; this may free the Inner.
        Rc::decrement_strong_count(self_ptr);
    }
}

/// The top-level hash-consing engine over a variant type `V`.
///
/// `make` unifies freshly built values: at most one cell per value-equal
/// term is ever alive, so handle equality is address equality and recursive
/// algorithms can memoize by handle. Storage comes back automatically when
/// the last handle to a cell is dropped.
///
/// Instances are independent; nothing is process-wide. Single-threaded by
/// construction (`!Send`, `!Sync`).
pub struct Unicity<V: Variant> {
    inner: Rc<Inner<V>>,
}

impl<V: Variant> Unicity<V> {
    /// Create an engine whose unicity set starts with at least
    /// `initial_size` buckets.
    pub fn new(initial_size: usize) -> Self {
        Self {
            inner: Rc::new_cyclic(|weak| Inner {
                table: std::cell::RefCell::new(UniqueTable::new(initial_size)),
                self_ptr: weak.as_ptr(),
                self_weak: weak.clone(),
            }),
        }
    }

    /// Unify `value` as alternative `T` and hand back a handle to its
    /// representative cell.
    pub fn make<T: Alternative<V>>(&self, value: T) -> Handle<V> {
        self.make_sized(0, move |_slot| value)
    }

    /// Like [`Self::make`], with `extra_bytes` of tail storage behind the
    /// cell. The zero-filled tail is handed to `build` as a [`TailSlot`];
    /// binding it yields a [`crate::Tail`] the value stores, through which
    /// derived `Hash`/`Eq` key unification on the tail content.
    pub fn make_sized<T: Alternative<V>>(
        &self,
        extra_bytes: usize,
        build: impl FnOnce(TailSlot<'_>) -> T,
    ) -> Handle<V> {
        let (block, bytes) = self.inner.table.borrow_mut().allocate(extra_bytes);
        let cell_ptr: NonNull<UniqueCell<V>> = block.cast();
        unsafe {
            let tail_base = block.as_ptr().add(size_of::<UniqueCell<V>>());
            let slack = bytes - size_of::<UniqueCell<V>>();
            // Zero the whole tail (a recycled block may also be larger than
            // requested) so every later tail read is defined, whether or not
            // the build closure writes it all.
            ptr::write_bytes(tail_base, 0, slack);
            let tail = slice::from_raw_parts_mut(tail_base.cast::<MaybeUninit<u8>>(), extra_bytes);
            let value = build(TailSlot::new(tail)).wrap();
            cell_ptr.as_ptr().write(UniqueCell::new(bytes as u32, value));
        }

        let owner = NonNull::from(&*self.inner);
        let unified = self.inner.table.borrow_mut().unify(cell_ptr);
        match unified {
            Unified::Inserted(cell) => {
                self.inner.retain_owner();
                unsafe { Handle::acquire(cell, owner) }
            }
            Unified::Duplicate { existing, rejected } => {
                // Secure the representative before tearing the reject down.
                let handle = unsafe { Handle::acquire(existing, owner) };
                unsafe {
                    let bytes = rejected.as_ref().bytes() as usize;
                    // Outside the borrow: dropping the value may release
                    // child handles and re-enter the table.
                    ptr::drop_in_place(UniqueCell::value_ptr(rejected));
                    self.inner.table.borrow_mut().reclaim(rejected.cast(), bytes);
                }
                handle
            }
        }
    }

    /// Statistics of the unicity set.
    pub fn unique_table_stats(&self) -> UniqueTableStats {
        self.inner.table.borrow().stats()
    }
}
