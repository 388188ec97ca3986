//! The unified storage cell: a value wrapped with a reference counter.

use core::cell::Cell;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::mem::{size_of, MaybeUninit};
use core::ptr::NonNull;
use core::slice;

use crate::intrusive::{Hooked, IntrusiveHook};

/// A client value wrapped with a 32-bit reference counter, the chain hook of
/// the unicity set, and the size of its backing allocation.
///
/// Cells are placement-written into raw blocks obtained from the unique
/// table, never constructed on the stack. `value` must stay the last field
/// (`repr(C)` fixes the order): blocks may be allocated larger than
/// `size_of::<UniqueCell<V>>()`, and the surplus forms a byte tail starting
/// right after the cell that the value may use as a runtime-sized trailing
/// array.
#[repr(C)]
pub(crate) struct UniqueCell<V> {
    hook: IntrusiveHook<UniqueCell<V>>,
    ref_count: Cell<u32>,
    bytes: u32,
    value: V,
}

impl<V> UniqueCell<V> {
    /// `bytes` is the total size of the backing block, tail included.
    pub(crate) fn new(bytes: u32, value: V) -> Self {
        Self {
            hook: IntrusiveHook::new(),
            ref_count: Cell::new(0),
            bytes,
            value,
        }
    }

    #[inline]
    pub(crate) fn value(&self) -> &V {
        &self.value
    }

    /// Raw pointer to the value field, for dropping it in place without
    /// touching the rest of the cell.
    pub(crate) fn value_ptr(cell: NonNull<Self>) -> *mut V {
        unsafe { core::ptr::addr_of_mut!((*cell.as_ptr()).value) }
    }

    #[inline]
    pub(crate) fn bytes(&self) -> u32 {
        self.bytes
    }

    /// Number of tail bytes behind the cell in its backing block.
    #[inline]
    pub(crate) fn slack(&self) -> usize {
        self.bytes as usize - size_of::<Self>()
    }

    #[inline]
    pub(crate) fn is_not_referenced(&self) -> bool {
        self.ref_count.get() == 0
    }

    #[inline]
    pub(crate) fn ref_count(&self) -> u32 {
        self.ref_count.get()
    }

    /// A handle now references this cell.
    #[inline]
    pub(crate) fn retain(&self) {
        let count = self.ref_count.get();
        if count == u32::MAX {
            // Follow Rc semantics: abort on counter overflow.
            std::process::abort();
        }
        self.ref_count.set(count + 1);
    }

    /// A handle no longer references this cell. Returns true when the count
    /// reached zero and the cell must be erased.
    #[inline]
    pub(crate) fn release(&self) -> bool {
        let count = self.ref_count.get();
        assert!(count > 0, "handle refcount underflow");
        self.ref_count.set(count - 1);
        count == 1
    }

    /// The tail bytes of this cell's backing block.
    pub(crate) fn tail(&self) -> &[u8] {
        let base = (self as *const Self).cast::<u8>();
        unsafe { slice::from_raw_parts(base.add(size_of::<Self>()), self.slack()) }
    }
}

impl<V> Hooked for UniqueCell<V> {
    fn hook(&self) -> &IntrusiveHook<Self> {
        &self.hook
    }
}

// Cells compare and hash through their value only, so the unicity set sees
// exactly the client's equivalence classes.
impl<V: PartialEq> PartialEq for UniqueCell<V> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}
impl<V: Eq> Eq for UniqueCell<V> {}

impl<V: Hash> Hash for UniqueCell<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

/// The zero-filled tail of a cell under construction, handed to the build
/// closure of `Unicity::make_sized`.
pub struct TailSlot<'a> {
    bytes: &'a mut [MaybeUninit<u8>],
}

impl<'a> TailSlot<'a> {
    pub(crate) fn new(bytes: &'a mut [MaybeUninit<u8>]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Copy `bytes`, which must have exactly the slot's length, into the
    /// tail and bind it.
    pub fn fill(self, bytes: &[u8]) -> Tail {
        assert_eq!(self.bytes.len(), bytes.len(), "tail length mismatch");
        let ptr = self.bytes.as_mut_ptr().cast::<u8>();
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len()) };
        Tail {
            ptr: NonNull::new(ptr).expect("slice pointers are non-null"),
            len: bytes.len(),
        }
    }

    /// Initialize the tail in place and bind it. The slot arrives
    /// zero-filled; bytes `init` leaves untouched stay zero.
    pub fn fill_with(self, init: impl FnOnce(&mut [MaybeUninit<u8>])) -> Tail {
        let len = self.bytes.len();
        let ptr = self.bytes.as_mut_ptr().cast::<u8>();
        init(self.bytes);
        Tail {
            ptr: NonNull::new(ptr).expect("slice pointers are non-null"),
            len,
        }
    }
}

/// A view of a cell's trailing byte array, stored inside the cell's own
/// value.
///
/// Cells never move once placement-written, so the binding stays valid for
/// the value's whole life. Equality and hashing go through the *content*,
/// which is how the unicity table keys sized cells: two values are equal
/// only when their tails carry the same bytes.
pub struct Tail {
    ptr: NonNull<u8>,
    len: usize,
}

impl Tail {
    pub fn bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl PartialEq for Tail {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}
impl Eq for Tail {}

impl Hash for Tail {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes().hash(state);
    }
}

impl fmt::Debug for Tail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tail").field(&self.bytes()).finish()
    }
}
