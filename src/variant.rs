//! Closed sum types over client-defined alternatives.
//!
//! Unified values are variants: a discriminated choice among a fixed list of
//! alternative types. The [`variant!`] macro turns a list of client structs
//! into the corresponding enum, wires up the [`Alternative`] projections
//! used by `Handle::is`/`Handle::get`, and derives equality and hashing with
//! the required semantics — two variants are equal iff they hold the same
//! alternative and the payloads compare equal, and the hash mixes the
//! discriminant with the payload hash. Visitation is ordinary pattern
//! matching: the compiler builds the dispatch tables, and a `_` arm is the
//! fall-through for mismatched alternative pairs in binary visits.

use core::hash::Hash;

/// A closed sum type produced by [`variant!`].
pub trait Variant: Eq + Hash {
    /// Position of the held alternative in the declaration list.
    fn index(&self) -> u8;
}

/// One alternative of a variant `V`: injection and projection.
pub trait Alternative<V>: Sized {
    /// Wrap a value of this alternative into the variant.
    fn wrap(self) -> V;
    /// Borrow the payload when `v` holds this alternative.
    fn peek(v: &V) -> Option<&Self>;
}

/// Define a variant enum over previously declared alternative structs.
///
/// Each alternative must implement `Debug`, `Eq`, and `Hash`; those are the
/// client contracts the unicity table relies on. Variants are constructed
/// once and never mutated; there is deliberately no `Clone`. At most 255
/// alternatives are accepted, checked at compile time.
///
/// ```
/// use unicity::variant;
///
/// #[derive(Debug, PartialEq, Eq, Hash)]
/// pub struct Leaf;
/// #[derive(Debug, PartialEq, Eq, Hash)]
/// pub struct Pair(pub u32, pub u32);
///
/// variant! {
///     pub enum Tree { Leaf, Pair }
/// }
/// ```
#[macro_export]
macro_rules! variant {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident { $($alt:ident),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($alt($alt),)+
        }

        impl $crate::Variant for $name {
            #[allow(unused_assignments)]
            fn index(&self) -> u8 {
                let mut i: u8 = 0;
                $(
                    if let $name::$alt(..) = self {
                        return i;
                    }
                    i = i.wrapping_add(1);
                )+
                unreachable!()
            }
        }

        $(
            impl $crate::Alternative<$name> for $alt {
                fn wrap(self) -> $name {
                    $name::$alt(self)
                }

                #[allow(unreachable_patterns)]
                fn peek(v: &$name) -> Option<&Self> {
                    match v {
                        $name::$alt(x) => Some(x),
                        _ => None,
                    }
                }
            }
        )+

        const _: () = assert!(
            [$(stringify!($alt)),+].len() <= 255,
            "a variant cannot hold more than 255 alternatives"
        );
    };
}
