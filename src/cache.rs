//! Fixed-capacity LRU memoization of operations over handles.

use core::cell::{Cell, RefCell};
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::ptr;

use log::trace;

use crate::hash_table::HashTable;
use crate::intrusive::{Hooked, IntrusiveHook};
use crate::lru_list::{LruLinks, LruList, LruNode};
use crate::pool::Pool;

/// A memoizable operation evaluated against a context of type `C`.
///
/// The operation is the cache key: equal operations (by `Eq`, consistent
/// with `Hash`) must evaluate to results the cache may replay. Evaluation
/// may have side effects — typically unifying new nodes and recursing into
/// caches, including the very cache the operation came through.
pub trait Operation<C>: Eq + Hash {
    /// Results are cloned out of the cache on every hit, so they should be
    /// cheap to clone; handles are.
    type Result: Clone;

    fn eval(&self, cxt: &C) -> Self::Result;
}

/// Decides whether an operation is worth caching.
///
/// Filters must be pure functions of the operation value. A filter chain is
/// expressed as a tuple; an operation is cached iff every member accepts it.
pub trait CacheFilter<O> {
    fn accept(op: &O) -> bool;
}

/// The empty chain accepts everything.
impl<O> CacheFilter<O> for () {
    fn accept(_op: &O) -> bool {
        true
    }
}

macro_rules! conjoin_filters {
    ($($f:ident),+) => {
        impl<O, $($f: CacheFilter<O>),+> CacheFilter<O> for ($($f,)+) {
            fn accept(op: &O) -> bool {
                true $(&& $f::accept(op))+
            }
        }
    };
}

conjoin_filters!(F1);
conjoin_filters!(F1, F2);
conjoin_filters!(F1, F2, F3);
conjoin_filters!(F1, F2, F3, F4);

/// Statistics of a cache, blended from its counters and the underlying
/// fixed hash set on each query.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CacheStats {
    /// Number of live entries.
    pub size: usize,
    /// Lookups answered from the cache.
    pub hits: usize,
    /// Lookups that evaluated the operation.
    pub misses: usize,
    /// Operations rejected by the filter chain and evaluated uncached.
    pub filtered: usize,
    /// Entries evicted by the LRU policy.
    pub discarded: usize,
    /// Buckets chaining more than one entry.
    pub collisions: usize,
    /// Buckets chaining exactly one entry.
    pub alone: usize,
    /// Empty buckets.
    pub empty: usize,
    /// Bucket count of the underlying hash set.
    pub buckets: usize,
    /// Load factor of the underlying hash set.
    pub load_factor: f64,
}

/// One memoized operation and its result. Both are immutable once written;
/// the entry also carries its chain hook and its recency-list links.
struct CacheEntry<O, R> {
    hook: IntrusiveHook<Self>,
    links: LruLinks<Self>,
    operation: O,
    result: R,
}

impl<O, R> CacheEntry<O, R> {
    fn new(operation: O, result: R) -> Self {
        Self {
            hook: IntrusiveHook::new(),
            links: LruLinks::new(),
            operation,
            result,
        }
    }
}

impl<O, R> Hooked for CacheEntry<O, R> {
    fn hook(&self) -> &IntrusiveHook<Self> {
        &self.hook
    }
}

impl<O, R> LruNode for CacheEntry<O, R> {
    fn lru_links(&self) -> &LruLinks<Self> {
        &self.links
    }
}

// Entries compare and hash through their operation only. The hash must
// equal the operation's own hash, or lookups keyed by the operation and
// erasures keyed by the entry would disagree on the bucket.
impl<O: PartialEq, R> PartialEq for CacheEntry<O, R> {
    fn eq(&self, other: &Self) -> bool {
        self.operation == other.operation
    }
}
impl<O: Eq, R> Eq for CacheEntry<O, R> {}

impl<O: Hash, R> Hash for CacheEntry<O, R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.operation.hash(state);
    }
}

struct State<O, R> {
    set: HashTable<CacheEntry<O, R>, false>,
    lru: LruList<CacheEntry<O, R>>,
    pool: Pool<CacheEntry<O, R>>,
}

/// A fixed-size cache of operation results with LRU replacement.
///
/// All memory — bucket array and entry pool — is allocated at construction;
/// the underlying hash set never rehashes. When the cache is full, each new
/// entry evicts the least recently used one. A hit refreshes the entry to
/// most recently used.
///
/// The context is passed to [`Cache::apply`] on every call and forwarded to
/// the operation; re-entrant applications of the same cache from inside an
/// operation's evaluation are supported.
pub struct Cache<C, O: Operation<C>, F: CacheFilter<O> = ()> {
    state: RefCell<State<O, O::Result>>,
    max_size: usize,
    hits: Cell<usize>,
    misses: Cell<usize>,
    filtered: Cell<usize>,
    discarded: Cell<usize>,
    _marker: PhantomData<(fn(&C), F)>,
}

impl<C, O: Operation<C>, F: CacheFilter<O>> Cache<C, O, F> {
    const MAX_LOAD_FACTOR: f64 = 0.85;

    /// Create a cache with at least `size` buckets. The number of live
    /// entries is capped at `bucket_count × max_load_factor`, available as
    /// [`Self::max_size`].
    pub fn new(size: usize) -> Self {
        let set = HashTable::new(size, Self::MAX_LOAD_FACTOR);
        let max_size = (set.bucket_count() as f64 * Self::MAX_LOAD_FACTOR) as usize;
        assert!(max_size >= 1, "cache too small to hold a single entry");
        Self {
            state: RefCell::new(State {
                set,
                lru: LruList::new(),
                pool: Pool::new(max_size),
            }),
            max_size,
            hits: Cell::new(0),
            misses: Cell::new(0),
            filtered: Cell::new(0),
            discarded: Cell::new(0),
            _marker: PhantomData,
        }
    }

    /// Evaluate `op` through the cache.
    pub fn apply(&self, cxt: &C, op: O) -> O::Result {
        if !F::accept(&op) {
            self.filtered.set(self.filtered.get() + 1);
            return op.eval(cxt);
        }

        let slot = {
            let mut state = self.state.borrow_mut();
            match state
                .set
                .insert_check(&op, |op, entry| *op == entry.operation)
            {
                Ok(found) => {
                    self.hits.set(self.hits.get() + 1);
                    state.lru.move_to_back(found);
                    return unsafe { found.as_ref() }.result.clone();
                }
                Err(slot) => slot,
            }
        };

        self.misses.set(self.misses.get() + 1);
        // No borrow is held across evaluation: the operation may recurse
        // into this very cache. The slot stays valid because the fixed set
        // never rehashes. A panic propagates here, leaving the cache
        // untouched apart from the `misses` counter.
        let result = op.eval(cxt);

        let mut state = self.state.borrow_mut();
        if state.set.len() == self.max_size {
            let oldest = state.lru.pop_front().expect("lru tracks every entry");
            unsafe {
                state.set.erase(oldest.as_ref());
                ptr::drop_in_place(oldest.as_ptr());
            }
            state.pool.deallocate(oldest);
            self.discarded.set(self.discarded.get() + 1);
        }

        let entry = state.pool.allocate();
        unsafe {
            entry.as_ptr().write(CacheEntry::new(op, result.clone()));
        }
        state.lru.push_back(entry);
        state.set.insert_commit(entry, slot);
        result
    }

    /// Drop every entry, returning their slots to the pool. Counters are
    /// preserved.
    pub fn clear(&self) {
        let mut state = self.state.borrow_mut();
        let State { set, lru, pool } = &mut *state;
        set.clear_and_dispose(|entry| {
            unsafe { ptr::drop_in_place(entry.as_ptr()) };
            pool.deallocate(entry);
        });
        lru.clear();
        trace!("cache cleared");
    }

    /// Number of cached operations.
    pub fn len(&self) -> usize {
        self.state.borrow().set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of simultaneously live entries.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn statistics(&self) -> CacheStats {
        let state = self.state.borrow();
        let (collisions, alone, empty) = state.set.collisions();
        CacheStats {
            size: state.set.len(),
            hits: self.hits.get(),
            misses: self.misses.get(),
            filtered: self.filtered.get(),
            discarded: self.discarded.get(),
            collisions,
            alone,
            empty,
            buckets: state.set.bucket_count(),
            load_factor: state.set.load_factor(),
        }
    }
}

impl<C, O: Operation<C>, F: CacheFilter<O>> Drop for Cache<C, O, F> {
    fn drop(&mut self) {
        self.clear();
    }
}
