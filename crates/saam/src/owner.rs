//! Sole owning handle
//!
//! An [`Owner`] holds exactly one value in a heap cell. Borrows are minted from
//! `&Owner` and may not outlive it. Dropping the owner destroys the value,
//! subject to the enforcement level: at `tracked` a destruction with live
//! borrows is refused, reported and the cell is leaked.

use crate::borrow::{ExclusiveBorrow, SharedBorrow};
use crate::cell::ValueCell;
use crate::lifecycle::{pre_destroy_hook, Lifecycle};
use crate::policy::{ActivePolicy, Enforcement, Validating};
use crate::shared::Shared;
use crate::state::BorrowSnapshot;
use crate::violation::BorrowResult;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ptr::NonNull;

/// Exclusive owner of a heap value
///
/// # Example
/// ```
/// use saam::{Owner, Tracked, ViolationKind};
///
/// let owner: Owner<Vec<u8>, Tracked> = Owner::wrap(vec![1, 2]);
/// let first = owner.borrow_shared().unwrap();
/// let second = owner.borrow_shared().unwrap();
/// let err = owner.borrow_exclusive().unwrap_err();
/// assert_eq!(err.kind(), ViolationKind::AlreadyBorrowed);
///
/// drop((first, second));
/// owner.borrow_exclusive().unwrap().push(3);
/// assert_eq!(owner.borrow_shared().unwrap().len(), 3);
/// ```
///
/// Below the tracked level nothing stops a second exclusive borrow, so the
/// safe `borrow_exclusive` does not exist there:
/// ```compile_fail
/// use saam::{Counted, Owner};
///
/// let owner: Owner<u32, Counted> = Owner::wrap(1);
/// let first = owner.borrow_exclusive();
/// ```
pub struct Owner<T: ?Sized, P: Enforcement = ActivePolicy> {
    cell: NonNull<ValueCell<T, P>>,
    _owns: PhantomData<T>,
}

impl<T> Owner<T> {
    /// Own `value` at the build's enforcement level
    pub fn new(value: T) -> Self {
        Self::wrap(value)
    }

    /// Own `value` at the build's enforcement level, with lifecycle hooks
    pub fn with_lifecycle(value: T) -> Self
    where
        T: Lifecycle,
    {
        Self::wrap_with_lifecycle(value)
    }
}

impl<T, P: Enforcement> Owner<T, P> {
    /// Own `value` under the policy `P`
    pub fn wrap(value: T) -> Self {
        Self::from_cell(ValueCell::allocate(value, None))
    }

    /// Own `value` under the policy `P`, with lifecycle hooks
    pub fn wrap_with_lifecycle(value: T) -> Self
    where
        T: Lifecycle,
    {
        let owner = Self::from_cell(ValueCell::allocate(value, pre_destroy_hook::<T>()));
        // SAFETY: freshly allocated, no borrow exists yet
        unsafe { owner.cell().value_mut().post_construct() };
        owner
    }

    /// Swap in a new value under an exclusive borrow, returning the old one
    pub fn replace(&self, value: T) -> BorrowResult<T>
    where
        P: Validating,
    {
        let mut borrow = self.borrow_exclusive()?;
        Ok(mem::replace(borrow.get_mut(), value))
    }

    /// Move the value out, if nothing still borrows it
    ///
    /// The pre-destroy hook does not run; the value lives on.
    pub fn try_take(self) -> Result<T, Self> {
        if !self.can_destroy() {
            return Err(self);
        }
        let this = ManuallyDrop::new(self);
        let claimed = this.cell().claim_sole_owner();
        debug_assert!(claimed, "an owner is the only owner reference");
        // SAFETY: sole owner, no borrow outstanding, `this` is never dropped
        Ok(unsafe { ValueCell::take(this.cell) })
    }

    /// Re-type the owner after unsizing its value, as in `Owner<[u8; 4]>` to
    /// `Owner<[u8]>` or `Owner<Circle>` to `Owner<dyn Shape>`
    ///
    /// The [`unsize!`](crate::unsize) macro wraps this for the coercions the
    /// compiler can check.
    ///
    /// # Safety
    /// `cast` must return its argument with only pointer metadata added, the
    /// way an unsizing coercion does, and must not dereference it.
    pub unsafe fn unsize<U: ?Sized>(self, cast: impl FnOnce(*mut T) -> *mut U) -> Owner<U, P> {
        let this = ManuallyDrop::new(self);
        Owner::from_cell(ValueCell::unsize(this.cell, cast))
    }
}

impl<T: ?Sized, P: Enforcement> Owner<T, P> {
    pub(crate) fn from_cell(cell: NonNull<ValueCell<T, P>>) -> Self {
        Self {
            cell,
            _owns: PhantomData,
        }
    }

    fn cell(&self) -> &ValueCell<T, P> {
        // SAFETY: the cell lives as long as its owner reference
        unsafe { self.cell.as_ref() }
    }

    pub fn borrow_shared(&self) -> BorrowResult<SharedBorrow<'_, T, P>> {
        SharedBorrow::acquire(self.cell())
    }

    /// Acquire the exclusive borrow, refused while any other borrow is live
    ///
    /// Only levels that validate every acquire offer this safely; see
    /// [`Owner::borrow_exclusive_unchecked`] for the others.
    pub fn borrow_exclusive(&self) -> BorrowResult<ExclusiveBorrow<'_, T, P>>
    where
        P: Validating,
    {
        ExclusiveBorrow::acquire(self.cell())
    }

    /// Acquire the exclusive borrow at any level
    ///
    /// At the tracked level this behaves like
    /// [`borrow_exclusive`](Owner::borrow_exclusive). Below it the acquire is
    /// only counted, or not recorded at all.
    ///
    /// # Safety
    /// No other borrow of this value, on any thread, may be live while the
    /// returned guard is.
    pub unsafe fn borrow_exclusive_unchecked(&self) -> BorrowResult<ExclusiveBorrow<'_, T, P>> {
        ExclusiveBorrow::acquire(self.cell())
    }

    /// Mutable access through the statically unique handle
    ///
    /// No borrow guard can be alive while `&mut self` is held, so no run-time
    /// transition takes place.
    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: guards borrow `self`, `&mut self` excludes all of them
        unsafe { self.cell().value_mut() }
    }

    /// Turn this owner into the first of several shared owners
    pub fn to_shared(self) -> Shared<T, P> {
        let this = ManuallyDrop::new(self);
        Shared::from_cell(this.cell)
    }

    pub fn can_destroy(&self) -> bool {
        P::can_destroy(&self.cell().state)
    }

    /// Live borrows, when the level counts them
    pub fn outstanding_borrows(&self) -> Option<usize> {
        P::outstanding(&self.cell().state)
    }

    /// Exact borrow state, at the tracked level only
    pub fn borrow_state(&self) -> Option<BorrowSnapshot> {
        P::snapshot(&self.cell().state)
    }

    /// Record backtraces of the borrows taken from now on
    pub fn track_borrow_sites(&self, enabled: bool) {
        P::track_sites(&self.cell().state, enabled);
    }
}

impl<T: ?Sized, P: Enforcement> Drop for Owner<T, P> {
    fn drop(&mut self) {
        // SAFETY: this owner reference is given up here
        unsafe { ValueCell::release_owner(self.cell) }
    }
}

impl<T, P: Enforcement> From<T> for Owner<T, P> {
    fn from(value: T) -> Self {
        Self::wrap(value)
    }
}

impl<T: fmt::Debug + ?Sized, P: Enforcement> fmt::Debug for Owner<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Owner");
        match self.borrow_shared() {
            Ok(borrow) => out.field("value", &&*borrow),
            Err(_) => out.field("value", &format_args!("<exclusively borrowed>")),
        };
        out.field("level", &P::LEVEL).finish()
    }
}

// SAFETY: the owner moves its value like `Box<T>`; through `&Owner` other
// threads can reach `&T`, and `&mut T` only under a validating level or an
// unsafe acquire, like through `&RwLock<T>`
unsafe impl<T: Send + ?Sized, P: Enforcement> Send for Owner<T, P> {}
unsafe impl<T: Send + Sync + ?Sized, P: Enforcement> Sync for Owner<T, P> {}

/// Shorthand for [`Owner::new`]
pub fn make_owner<T>(value: T) -> Owner<T> {
    Owner::new(value)
}
