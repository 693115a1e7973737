//! Borrow guards
//!
//! A guard is a scoped, non-owning view minted from an owning handle. It
//! performs the acquire transition when created and the matching release when
//! dropped, so a borrow is released on every exit path, unwinding included.
//!
//! Guards carry the lifetime of the handle they were minted from, so a guard
//! outliving its owner is a compile error at every enforcement level. At the
//! tracked level each access additionally checks the cell's liveness flag.

use crate::cell::ValueCell;
use crate::policy::{ActivePolicy, Enforcement};
use crate::state::BorrowKind;
use crate::violation;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

/// Read-only borrow; any number may coexist
pub struct SharedBorrow<'a, T: ?Sized, P: Enforcement = ActivePolicy> {
    cell: &'a ValueCell<T, P>,
    token: P::Token,
}

impl<'a, T: ?Sized, P: Enforcement> SharedBorrow<'a, T, P> {
    pub(crate) fn acquire(cell: &'a ValueCell<T, P>) -> violation::BorrowResult<Self> {
        let token = P::acquire_shared(&cell.state)?;
        Ok(Self { cell, token })
    }

    /// Read access to the borrowed value
    #[inline]
    pub fn get(&self) -> &T {
        if let Err(violation) = P::check_live(&self.cell.state, BorrowKind::Shared) {
            violation::report(violation);
        }
        // SAFETY: a live shared borrow excludes exclusive ones. After a
        // reported use-after-release the value is still valid: a cell whose
        // destruction was refused is leaked, never freed.
        unsafe { self.cell.value() }
    }
}

impl<T: ?Sized, P: Enforcement> Clone for SharedBorrow<'_, T, P> {
    /// Acquire another shared borrow of the same value
    fn clone(&self) -> Self {
        match Self::acquire(self.cell) {
            Ok(borrow) => borrow,
            // holding a shared borrow rules out every acquire failure
            Err(violation) => crate::state::corrupted(&violation.to_string()),
        }
    }
}

impl<T: ?Sized, P: Enforcement> Deref for SharedBorrow<'_, T, P> {
    type Target = T;

    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T: ?Sized, P: Enforcement> Drop for SharedBorrow<'_, T, P> {
    fn drop(&mut self) {
        P::release_shared(&self.cell.state, &self.token);
    }
}

impl<T: fmt::Debug + ?Sized, P: Enforcement> fmt::Debug for SharedBorrow<'_, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.get(), f)
    }
}

impl<T: fmt::Display + ?Sized, P: Enforcement> fmt::Display for SharedBorrow<'_, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.get(), f)
    }
}

// SAFETY: a shared borrow behaves like `&T`
unsafe impl<T: Sync + ?Sized, P: Enforcement> Send for SharedBorrow<'_, T, P> {}
unsafe impl<T: Sync + ?Sized, P: Enforcement> Sync for SharedBorrow<'_, T, P> {}

/// Read-write borrow; move-only, never alongside any other borrow
pub struct ExclusiveBorrow<'a, T: ?Sized, P: Enforcement = ActivePolicy> {
    cell: &'a ValueCell<T, P>,
    token: P::Token,
    _unique: PhantomData<&'a mut T>,
}

impl<'a, T: ?Sized, P: Enforcement> ExclusiveBorrow<'a, T, P> {
    pub(crate) fn acquire(cell: &'a ValueCell<T, P>) -> violation::BorrowResult<Self> {
        let token = P::acquire_exclusive(&cell.state)?;
        Ok(Self {
            cell,
            token,
            _unique: PhantomData,
        })
    }

    #[inline]
    pub fn get(&self) -> &T {
        self.check_live();
        // SAFETY: this borrow is the only live one. A cell whose destruction
        // was refused is leaked, so the value outlives a reported
        // use-after-release.
        unsafe { self.cell.value() }
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.check_live();
        // SAFETY: this borrow is the only live one and `&mut self` is unique.
        // A cell whose destruction was refused is leaked, so the value
        // outlives a reported use-after-release.
        unsafe { self.cell.value_mut() }
    }

    #[inline]
    fn check_live(&self) {
        if let Err(violation) = P::check_live(&self.cell.state, BorrowKind::Exclusive) {
            violation::report(violation);
        }
    }
}

impl<T: ?Sized, P: Enforcement> Deref for ExclusiveBorrow<'_, T, P> {
    type Target = T;

    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T: ?Sized, P: Enforcement> DerefMut for ExclusiveBorrow<'_, T, P> {
    fn deref_mut(&mut self) -> &mut T {
        self.get_mut()
    }
}

impl<T: ?Sized, P: Enforcement> Drop for ExclusiveBorrow<'_, T, P> {
    fn drop(&mut self) {
        P::release_exclusive(&self.cell.state, &self.token);
    }
}

impl<T: fmt::Debug + ?Sized, P: Enforcement> fmt::Debug for ExclusiveBorrow<'_, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.get(), f)
    }
}

impl<T: fmt::Display + ?Sized, P: Enforcement> fmt::Display for ExclusiveBorrow<'_, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.get(), f)
    }
}

// SAFETY: an exclusive borrow behaves like `&mut T`
unsafe impl<T: Send + ?Sized, P: Enforcement> Send for ExclusiveBorrow<'_, T, P> {}
unsafe impl<T: Sync + ?Sized, P: Enforcement> Sync for ExclusiveBorrow<'_, T, P> {}
