//! Visitor application over handles' contained variants.
//!
//! A visitor is any callable matching on the variant (and, for binary
//! visitation, on the pair of variants); extra arguments travel in the
//! closure's environment. Dispatch is the `match` inside the visitor, so
//! coverage of every alternative — and the fall-through arm for mismatched
//! pairs — is checked by the compiler.

use core::hash::Hash;

use crate::handle::Handle;

/// Apply `visitor` to the variant held by `x`.
pub fn visit<V: Eq + Hash, R>(visitor: impl FnOnce(&V) -> R, x: &Handle<V>) -> R {
    visitor(x.value())
}

/// Apply `visitor` to the variants held by `x` and `y`.
pub fn binary_visit<V: Eq + Hash, R>(
    visitor: impl FnOnce(&V, &V) -> R,
    x: &Handle<V>,
    y: &Handle<V>,
) -> R {
    visitor(x.value(), y.value())
}
