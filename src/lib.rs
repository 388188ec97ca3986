//! unicity: hash-consing with reference-counted handles and a fixed-size
//! LRU operation cache.
//!
//! The crate provides the memory and computation infrastructure for
//! decision-diagram style recursive structures. A [`Unicity`] engine
//! guarantees at most one live cell per value-equal term and hands out
//! [`Handle`]s that compare, order, and hash by address; storage is
//! reclaimed when the last handle goes away. A [`Cache`] memoizes pure
//! [`Operation`]s over handles with LRU replacement in fixed memory, with a
//! compile-time [`CacheFilter`] chain deciding what is worth caching.
//!
//! Everything is single-threaded: engines are `!Send`/`!Sync` and one
//! logical owner serializes access to each instance.

mod cache;
mod handle;
mod hash_table;
mod intrusive;
mod lru_list;
mod pool;
mod unicity;
mod unique_cell;
mod unique_table;
mod variant;
mod visit;

pub use cache::{Cache, CacheFilter, CacheStats, Operation};
pub use handle::Handle;
pub use unicity::Unicity;
pub use unique_cell::{Tail, TailSlot};
pub use unique_table::UniqueTableStats;
pub use variant::{Alternative, Variant};
pub use visit::{binary_visit, visit};
