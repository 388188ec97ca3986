//! Intrusive chained hash table backing both the unicity set and the cache.

use core::hash::{BuildHasher, Hash};
use core::marker::PhantomData;
use core::ptr::NonNull;

use fxhash::FxBuildHasher;
use log::trace;

use crate::intrusive::Hooked;

/// Commit token returned by a failed [`HashTable::insert_check`] lookup.
///
/// Only a bucket position is recorded: the fixed flavor never rehashes, so
/// the position stays valid across arbitrary other insertions and erasures
/// performed before the matching [`HashTable::insert_commit`].
pub(crate) struct InsertSlot {
    bucket: usize,
}

/// An intrusive hash table with chained collision handling.
///
/// The bucket count is always a power of two; a bucket is selected by
/// masking the low bits of the hash. Elements carry their chain link in an
/// embedded [`crate::intrusive::IntrusiveHook`] and are referenced, never
/// owned: the caller keeps every element alive for as long as it is linked
/// here, and disposes of elements itself (`erase` and `clear_and_dispose`
/// only unlink).
///
/// `REHASH` selects the flavor at compile time. The growing flavor
/// (`true`, used by the unicity set) inserts with deduplication and doubles
/// the bucket array whenever the load factor reaches its maximum. The fixed
/// flavor (`false`, used by the cache) exposes two-phase
/// `insert_check`/`insert_commit` and never reallocates, so its memory and
/// bucket positions are stable for its whole lifetime.
pub(crate) struct HashTable<T, const REHASH: bool, S = FxBuildHasher> {
    buckets: Box<[Option<NonNull<T>>]>,
    len: usize,
    max_load_factor: f64,
    nb_rehash: usize,
    hasher: S,
    _marker: PhantomData<*const T>,
}

impl<T, const REHASH: bool, S> HashTable<T, REHASH, S>
where
    T: Hooked + Hash + Eq,
    S: BuildHasher + Default,
{
    /// Create a table with at least `size` buckets, rounded up to a power
    /// of two.
    pub(crate) fn new(size: usize, max_load_factor: f64) -> Self {
        let nb_buckets = size.next_power_of_two().max(2);
        Self {
            buckets: vec![None; nb_buckets].into_boxed_slice(),
            len: 0,
            max_load_factor,
            nb_rehash: 0,
            hasher: S::default(),
            _marker: PhantomData,
        }
    }

    #[inline]
    fn bucket_index(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn load_factor(&self) -> f64 {
        self.len as f64 / self.buckets.len() as f64
    }

    pub(crate) fn nb_rehash(&self) -> usize {
        self.nb_rehash
    }

    /// Bucket occupancy: `(buckets with > 1 element, buckets with exactly
    /// one, empty buckets)`.
    pub(crate) fn collisions(&self) -> (usize, usize, usize) {
        let (mut collisions, mut alone, mut empty) = (0, 0, 0);
        for head in self.buckets.iter() {
            let mut nb = 0usize;
            let mut current = *head;
            while let Some(p) = current {
                nb += 1;
                current = unsafe { p.as_ref() }.hook().next();
            }
            match nb {
                0 => empty += 1,
                1 => alone += 1,
                _ => collisions += 1,
            }
        }
        (collisions, alone, empty)
    }

    /// Unlink the element equal to `*x`, locating its bucket by hashing the
    /// sample. Panics if no such element is linked: erasing an absent
    /// element is a contract violation.
    pub(crate) fn erase(&mut self, x: &T) {
        let pos = self.bucket_index(self.hasher.hash_one(x));
        let mut previous: Option<NonNull<T>> = None;
        let mut current = self.buckets[pos];
        while let Some(p) = current {
            let elem = unsafe { p.as_ref() };
            if elem == x {
                let next = elem.hook().next();
                match previous {
                    None => self.buckets[pos] = next,
                    Some(prev) => unsafe { prev.as_ref() }.hook().set_next(next),
                }
                elem.hook().set_next(None);
                self.len -= 1;
                return;
            }
            previous = current;
            current = elem.hook().next();
        }
        panic!("element to erase not found in hash table");
    }

    /// Unlink every element, handing each to `disposer`.
    pub(crate) fn clear_and_dispose(&mut self, mut disposer: impl FnMut(NonNull<T>)) {
        for bucket in self.buckets.iter_mut() {
            let mut current = bucket.take();
            while let Some(p) = current {
                // Read the link before disposing: the disposer may free p.
                current = unsafe { p.as_ref() }.hook().next();
                disposer(p);
            }
        }
        self.len = 0;
    }
}

impl<T, S> HashTable<T, true, S>
where
    T: Hooked + Hash + Eq,
    S: BuildHasher + Default,
{
    /// Insert `x` unless a value-equal element is already chained.
    ///
    /// Returns the representative element and whether `x` was inserted.
    /// May grow and relink the whole table afterwards.
    pub(crate) fn insert(&mut self, x: NonNull<T>) -> (NonNull<T>, bool) {
        let res = self.insert_no_rehash(x);
        if self.load_factor() >= self.max_load_factor {
            self.rehash();
        }
        res
    }

    fn insert_no_rehash(&mut self, x: NonNull<T>) -> (NonNull<T>, bool) {
        let elem = unsafe { x.as_ref() };
        let pos = self.bucket_index(self.hasher.hash_one(elem));
        let mut current = self.buckets[pos];
        while let Some(p) = current {
            let candidate = unsafe { p.as_ref() };
            if candidate == elem {
                return (p, false);
            }
            current = candidate.hook().next();
        }
        // Push in front of the chain.
        elem.hook().set_next(self.buckets[pos]);
        self.buckets[pos] = Some(x);
        self.len += 1;
        (x, true)
    }

    fn rehash(&mut self) {
        let new_count = self.buckets.len() * 2;
        let mut new_buckets = vec![None; new_count].into_boxed_slice();
        let mask = new_count - 1;
        for bucket in self.buckets.iter_mut() {
            let mut current = bucket.take();
            while let Some(p) = current {
                let elem = unsafe { p.as_ref() };
                current = elem.hook().next();
                let pos = (self.hasher.hash_one(elem) as usize) & mask;
                elem.hook().set_next(new_buckets[pos]);
                new_buckets[pos] = Some(p);
            }
        }
        self.buckets = new_buckets;
        self.nb_rehash += 1;
        trace!(
            "rehash #{}: {} elements over {} buckets",
            self.nb_rehash,
            self.len,
            new_count
        );
    }
}

impl<T, S> HashTable<T, false, S>
where
    T: Hooked + Hash + Eq,
    S: BuildHasher + Default,
{
    /// First phase of a fixed-table insertion: look `key` up in its bucket.
    ///
    /// `eq` compares the lookup key against chained elements. On a hit the
    /// matching element is returned; on a miss the commit token for
    /// [`Self::insert_commit`] is. The key and the elements must hash
    /// identically for the phases to agree on the bucket.
    pub(crate) fn insert_check<K: Hash>(
        &self,
        key: &K,
        eq: impl Fn(&K, &T) -> bool,
    ) -> Result<NonNull<T>, InsertSlot> {
        let pos = self.bucket_index(self.hasher.hash_one(key));
        let mut current = self.buckets[pos];
        while let Some(p) = current {
            let elem = unsafe { p.as_ref() };
            if eq(key, elem) {
                return Ok(p);
            }
            current = elem.hook().next();
        }
        Err(InsertSlot { bucket: pos })
    }

    /// Second phase: append `x` at the tail of the bucket found by
    /// [`Self::insert_check`]. Tail append measures faster than head
    /// insertion for the cache workload.
    pub(crate) fn insert_commit(&mut self, x: NonNull<T>, slot: InsertSlot) {
        unsafe { x.as_ref() }.hook().set_next(None);
        let mut tail = self.buckets[slot.bucket];
        match tail {
            None => self.buckets[slot.bucket] = Some(x),
            Some(_) => {
                while let Some(p) = tail {
                    let elem = unsafe { p.as_ref() };
                    match elem.hook().next() {
                        None => {
                            elem.hook().set_next(Some(x));
                            break;
                        }
                        next => tail = next,
                    }
                }
            }
        }
        self.len += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intrusive::IntrusiveHook;
    use core::hash::Hasher;

    struct Elem {
        hook: IntrusiveHook<Elem>,
        key: u64,
    }

    impl Elem {
        fn boxed(key: u64) -> NonNull<Elem> {
            NonNull::from(Box::leak(Box::new(Elem {
                hook: IntrusiveHook::new(),
                key,
            })))
        }

        unsafe fn free(p: NonNull<Elem>) {
            drop(Box::from_raw(p.as_ptr()));
        }
    }

    impl Hooked for Elem {
        fn hook(&self) -> &IntrusiveHook<Elem> {
            &self.hook
        }
    }

    impl Hash for Elem {
        fn hash<H: Hasher>(&self, state: &mut H) {
            self.key.hash(state);
        }
    }

    impl PartialEq for Elem {
        fn eq(&self, other: &Self) -> bool {
            self.key == other.key
        }
    }
    impl Eq for Elem {}

    // Hasher sending everything to one bucket, to exercise chain probing.
    #[derive(Clone, Default)]
    struct ConstBuildHasher;
    struct ConstHasher;
    impl BuildHasher for ConstBuildHasher {
        type Hasher = ConstHasher;
        fn build_hasher(&self) -> Self::Hasher {
            ConstHasher
        }
    }
    impl Hasher for ConstHasher {
        fn write(&mut self, _bytes: &[u8]) {}
        fn finish(&self) -> u64 {
            0
        }
    }

    /// Invariant: after any insert/erase sequence, `len()` equals inserts
    /// minus erasures of present elements, and the load factor stays below
    /// the maximum after the post-insert rehash.
    #[test]
    fn size_accounting_and_load_factor_bound() {
        let mut t: HashTable<Elem, true> = HashTable::new(2, 0.75);
        let elems: Vec<_> = (0..257u64).map(Elem::boxed).collect();
        for (i, &e) in elems.iter().enumerate() {
            let (found, inserted) = t.insert(e);
            assert!(inserted);
            assert_eq!(found, e);
            assert_eq!(t.len(), i + 1);
            assert!(t.load_factor() < 0.75);
        }
        assert!(t.nb_rehash() > 0);
        assert!(t.bucket_count().is_power_of_two());

        let (collisions, alone, empty) = t.collisions();
        assert_eq!(collisions + alone + empty, t.bucket_count());

        for (i, &e) in elems.iter().enumerate() {
            t.erase(unsafe { e.as_ref() });
            assert_eq!(t.len(), elems.len() - i - 1);
        }
        for e in elems {
            unsafe { Elem::free(e) };
        }
    }

    /// Invariant: inserting a value-equal element is rejected and returns
    /// the already-chained representative.
    #[test]
    fn duplicate_insert_returns_representative() {
        let mut t: HashTable<Elem, true> = HashTable::new(8, 0.75);
        let a = Elem::boxed(42);
        let b = Elem::boxed(42);
        assert_eq!(t.insert(a), (a, true));
        assert_eq!(t.insert(b), (a, false));
        assert_eq!(t.len(), 1);
        t.clear_and_dispose(|p| unsafe { Elem::free(p) });
        unsafe { Elem::free(b) };
    }

    /// Invariant: chain removal under full-collision hashing preserves the
    /// other elements, wherever the erased one sits in the chain.
    #[test]
    fn erase_from_collision_chain() {
        let mut t: HashTable<Elem, true, ConstBuildHasher> = HashTable::new(4, 16.0);
        let elems: Vec<_> = (0..5u64).map(Elem::boxed).collect();
        for &e in &elems {
            t.insert(e);
        }
        // Middle, head, then tail of the chain.
        for &i in &[2usize, 4, 0] {
            t.erase(unsafe { elems[i].as_ref() });
        }
        assert_eq!(t.len(), 2);
        for k in [1u64, 3] {
            let probe = Elem {
                hook: IntrusiveHook::new(),
                key: k,
            };
            t.erase(&probe);
        }
        assert_eq!(t.len(), 0);
        for e in elems {
            unsafe { Elem::free(e) };
        }
    }

    /// Invariant: two-phase insertion finds a committed entry again, and a
    /// commit token stays usable across other commits to the same bucket.
    #[test]
    fn fixed_two_phase_insert() {
        let mut t: HashTable<Elem, false, ConstBuildHasher> = HashTable::new(4, 0.85);
        let eq = |k: &u64, e: &Elem| *k == e.key;

        let slot_a = t.insert_check(&1u64, eq).err().expect("empty table");
        let slot_b = t.insert_check(&2u64, eq).err().expect("empty table");

        let a = Elem::boxed(1);
        t.insert_commit(a, slot_a);
        assert_eq!(t.len(), 1);
        assert_eq!(t.insert_check(&1u64, eq).ok(), Some(a));

        // slot_b was taken before a's commit landed in the same bucket.
        let b = Elem::boxed(2);
        t.insert_commit(b, slot_b);
        assert_eq!(t.len(), 2);
        assert_eq!(t.insert_check(&2u64, eq).ok(), Some(b));
        assert_eq!(t.insert_check(&1u64, eq).ok(), Some(a));

        t.clear_and_dispose(|p| unsafe { Elem::free(p) });
        assert_eq!(t.len(), 0);
    }
}
