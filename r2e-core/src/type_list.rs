//! Compile-time type lists used to track which beans an [`AppBuilder`] has
//! been given (`P`rovided) and which it still owes (`R`equired).
//!
//! These are zero-sized marker types; nothing here exists at runtime. The
//! builder accumulates `TCons<Head, Tail>` chains as generic parameters so
//! that a missing dependency is a compile error rather than a panic at
//! `build_state()` time.
//!
//! [`AppBuilder`]: crate::builder::AppBuilder

use std::marker::PhantomData;

/// The empty type list.
pub struct TNil;

/// A non-empty type list: `Head` followed by `Tail`.
pub struct TCons<Head, Tail>(PhantomData<(Head, Tail)>);

/// Witness that a type is the first element of a list.
pub struct Here;

/// Witness that a type is found `Idx` positions into the tail of a list.
pub struct There<Idx>(PhantomData<Idx>);

/// `Self` contains `T` at position `Idx`.
pub trait Contains<T, Idx> {}

impl<T, Tail> Contains<T, Here> for TCons<T, Tail> {}

impl<T, Head, Tail, Idx> Contains<T, There<Idx>> for TCons<Head, Tail> where Tail: Contains<T, Idx> {}

/// Concatenate `Self` with `Other`, producing `Self::Output`.
pub trait TAppend<Other> {
    type Output;
}

impl<Other> TAppend<Other> for TNil {
    type Output = Other;
}

impl<Head, Tail, Other> TAppend<Other> for TCons<Head, Tail>
where
    Tail: TAppend<Other>,
{
    type Output = TCons<Head, <Tail as TAppend<Other>>::Output>;
}

/// Every element of `Self` is present somewhere in `P`, with `Idx` recording
/// the per-element witnesses. Used to check that an [`AppBuilder`]'s
/// provided beans (`P`) satisfy a required-dependency list (`Self`).
///
/// [`AppBuilder`]: crate::builder::AppBuilder
pub trait AllSatisfied<P, Idx> {}

impl<P> AllSatisfied<P, TNil> for TNil {}

impl<P, Head, Tail, HeadIdx, TailIdx> AllSatisfied<P, TCons<HeadIdx, TailIdx>> for TCons<Head, Tail>
where
    P: Contains<Head, HeadIdx>,
    Tail: AllSatisfied<P, TailIdx>,
{
}

/// `Self` can be constructed out of the provided-bean list `P`.
///
/// Implemented by the `#[derive(BeanState)]` macro for the application's
/// state struct: one field access per provided bean, indexed by `Idx`.
pub trait BuildableFrom<P, Idx> {}
