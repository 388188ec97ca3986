//! The unifier: at most one live cell per value-equivalence class.

use core::hash::Hash;
use core::mem::size_of;
use core::ptr::NonNull;
use std::alloc::{self, Layout};

use crate::hash_table::HashTable;
use crate::unique_cell::UniqueCell;

/// Statistics of a unique table, blended from its running counters and the
/// underlying hash set on each query.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UniqueTableStats {
    /// Number of unified cells currently alive.
    pub size: usize,
    /// Maximum number of cells ever alive at once.
    pub peak: usize,
    /// Load factor of the underlying hash set.
    pub load_factor: f64,
    /// Total number of unification requests.
    pub access: usize,
    /// Requests answered by an already unified cell.
    pub hits: usize,
    /// Requests that inserted a new cell.
    pub misses: usize,
    /// Times the underlying hash set has been rehashed.
    pub rehash: usize,
    /// Buckets chaining more than one cell.
    pub collisions: usize,
    /// Buckets chaining exactly one cell.
    pub alone: usize,
    /// Empty buckets.
    pub empty: usize,
    /// Bucket count of the underlying hash set.
    pub buckets: usize,
}

/// Outcome of offering a freshly written cell to the unifier.
pub(crate) enum Unified<V> {
    /// The cell is now the representative of its class.
    Inserted(NonNull<UniqueCell<V>>),
    /// A value-equal cell already exists. The caller owns the cleanup of
    /// `rejected`: its value must be dropped in place *outside* any borrow
    /// of this table (dropping it may release child handles that re-enter
    /// here), after which the block goes back through [`UniqueTable::reclaim`].
    Duplicate {
        existing: NonNull<UniqueCell<V>>,
        rejected: NonNull<UniqueCell<V>>,
    },
}

/// Unifies cells through a rehashing intrusive hash set and owns their
/// backing blocks' allocation strategy, including a single-slot recycle
/// cache fed by rejected duplicates.
pub(crate) struct UniqueTable<V: Eq + Hash> {
    set: HashTable<UniqueCell<V>, true>,
    /// Block kept from a rejected insertion, with its byte size.
    spare: Option<(NonNull<u8>, usize)>,
    access: usize,
    hits: usize,
    misses: usize,
    peak: usize,
}

impl<V: Eq + Hash> UniqueTable<V> {
    const MAX_LOAD_FACTOR: f64 = 0.75;

    pub(crate) fn new(initial_size: usize) -> Self {
        Self {
            set: HashTable::new(initial_size, Self::MAX_LOAD_FACTOR),
            spare: None,
            access: 0,
            hits: 0,
            misses: 0,
            peak: 0,
        }
    }

    fn layout(bytes: usize) -> Layout {
        Layout::from_size_align(bytes, core::mem::align_of::<UniqueCell<V>>())
            .expect("cell block layout")
    }

    /// Free a block previously returned by [`Self::allocate`].
    pub(crate) unsafe fn free_block(block: NonNull<u8>, bytes: usize) {
        alloc::dealloc(block.as_ptr(), Self::layout(bytes));
    }

    /// Obtain a raw block of at least `size_of::<UniqueCell<V>>() + extra`
    /// bytes, reusing the spare block when it is large enough. Returns the
    /// block and its actual size, which deallocation must be given back.
    pub(crate) fn allocate(&mut self, extra: usize) -> (NonNull<u8>, usize) {
        let wanted = size_of::<UniqueCell<V>>() + extra;
        assert!(wanted <= u32::MAX as usize, "cell block too large");
        if let Some((block, bytes)) = self.spare {
            if bytes >= wanted {
                self.spare = None;
                return (block, bytes);
            }
        }
        let layout = Self::layout(wanted);
        let block = unsafe { alloc::alloc(layout) };
        match NonNull::new(block) {
            Some(block) => (block, wanted),
            None => alloc::handle_alloc_error(layout),
        }
    }

    /// Offer a freshly written cell to the unifier.
    pub(crate) fn unify(&mut self, cell: NonNull<UniqueCell<V>>) -> Unified<V> {
        self.access += 1;
        let (existing, inserted) = self.set.insert(cell);
        if inserted {
            self.misses += 1;
            self.peak = self.peak.max(self.set.len());
            Unified::Inserted(cell)
        } else {
            self.hits += 1;
            Unified::Duplicate {
                existing,
                rejected: cell,
            }
        }
    }

    /// Take back the block of a rejected cell whose value has been dropped.
    /// A block larger than the current spare replaces it; anything else is
    /// freed.
    pub(crate) fn reclaim(&mut self, block: NonNull<u8>, bytes: usize) {
        match self.spare {
            Some((_, spare_bytes)) if spare_bytes >= bytes => unsafe {
                Self::free_block(block, bytes);
            },
            _ => {
                if let Some((old, old_bytes)) = self.spare.replace((block, bytes)) {
                    unsafe { Self::free_block(old, old_bytes) };
                }
            }
        }
    }

    /// Unlink an unreferenced cell from the set. The caller drops the value
    /// and frees the block outside the borrow of this table.
    pub(crate) fn erase(&mut self, cell: &UniqueCell<V>) {
        assert!(cell.is_not_referenced(), "erasing a referenced cell");
        self.set.erase(cell);
    }

    pub(crate) fn stats(&self) -> UniqueTableStats {
        let (collisions, alone, empty) = self.set.collisions();
        UniqueTableStats {
            size: self.set.len(),
            peak: self.peak,
            load_factor: self.set.load_factor(),
            access: self.access,
            hits: self.hits,
            misses: self.misses,
            rehash: self.set.nb_rehash(),
            collisions,
            alone,
            empty,
            buckets: self.set.bucket_count(),
        }
    }
}

impl<V: Eq + Hash> Drop for UniqueTable<V> {
    fn drop(&mut self) {
        debug_assert!(self.set.len() == 0, "unique table dropped with live cells");
        if let Some((block, bytes)) = self.spare.take() {
            unsafe { Self::free_block(block, bytes) };
        }
    }
}
