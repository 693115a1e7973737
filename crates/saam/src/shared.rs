//! Reference-counted owning handle
//!
//! Every clone of a [`Shared`] is a full owner of the same cell. The value is
//! destroyed when the last clone goes away, with the same enforcement rules
//! as [`Owner`](crate::Owner). A [`WeakShared`] reaches the cell without
//! owning the value, which lets a value hold a reference back to its own cell.

use crate::borrow::{ExclusiveBorrow, SharedBorrow};
use crate::cell::ValueCell;
use crate::lifecycle::Lifecycle;
use crate::owner::Owner;
use crate::policy::{ActivePolicy, Enforcement, Validating};
use crate::state::BorrowSnapshot;
use crate::violation::BorrowResult;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ptr::NonNull;

/// Co-owner of a heap value
pub struct Shared<T: ?Sized, P: Enforcement = ActivePolicy> {
    cell: NonNull<ValueCell<T, P>>,
    _owns: PhantomData<T>,
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self::wrap(value)
    }

    pub fn with_lifecycle(value: T) -> Self
    where
        T: Lifecycle,
    {
        Self::wrap_with_lifecycle(value)
    }

    /// Build a value that holds a weak reference to its own cell
    pub fn new_cyclic(build: impl FnOnce(&WeakShared<T>) -> T) -> Self {
        Self::wrap_cyclic(build)
    }
}

impl<T, P: Enforcement> Shared<T, P> {
    pub fn wrap(value: T) -> Self {
        Self::from_cell(ValueCell::allocate(value, None))
    }

    pub fn wrap_with_lifecycle(value: T) -> Self
    where
        T: Lifecycle,
    {
        Owner::wrap_with_lifecycle(value).to_shared()
    }

    /// Build a value that holds a weak reference to its own cell
    ///
    /// `build` runs before the value exists, so upgrading the weak reference
    /// inside it returns `None`.
    ///
    /// # Example
    /// ```
    /// use saam::{Shared, Tracked, WeakShared};
    ///
    /// struct Node {
    ///     me: WeakShared<Node, Tracked>,
    /// }
    ///
    /// let node: Shared<Node, Tracked> = Shared::wrap_cyclic(|me| Node { me: me.clone() });
    /// let again = node.borrow_shared().unwrap().me.upgrade().unwrap();
    /// assert!(Shared::ptr_eq(&node, &again));
    /// ```
    pub fn wrap_cyclic(build: impl FnOnce(&WeakShared<T, P>) -> T) -> Self {
        let cell = ValueCell::allocate_cyclic(
            |cell| {
                // SAFETY: the allocation is alive and kept by its initial
                // weak reference
                unsafe { ValueCell::add_weak(cell) };
                let weak = WeakShared::from_cell(cell);
                build(&weak)
            },
            None,
        );
        Self::from_cell(cell)
    }

    pub fn replace(&self, value: T) -> BorrowResult<T>
    where
        P: Validating,
    {
        let mut borrow = self.borrow_exclusive()?;
        Ok(mem::replace(borrow.get_mut(), value))
    }

    /// Move the value out if this is the last owner and nothing borrows it
    ///
    /// Weak references can no longer upgrade once this succeeds.
    pub fn try_unwrap(self) -> Result<T, Self> {
        if !self.cell().claim_sole_owner() {
            return Err(self);
        }
        if !self.can_destroy() {
            self.cell().restore_owner();
            return Err(self);
        }
        let this = ManuallyDrop::new(self);
        // SAFETY: the owner count was claimed, no borrow outstanding
        Ok(unsafe { ValueCell::take(this.cell) })
    }

    /// Re-type the handle after unsizing its value; see [`Owner::unsize`]
    ///
    /// # Safety
    /// `cast` must return its argument with only pointer metadata added, the
    /// way an unsizing coercion does, and must not dereference it.
    pub unsafe fn unsize<U: ?Sized>(self, cast: impl FnOnce(*mut T) -> *mut U) -> Shared<U, P> {
        let this = ManuallyDrop::new(self);
        Shared::from_cell(ValueCell::unsize(this.cell, cast))
    }
}

impl<T: ?Sized, P: Enforcement> Shared<T, P> {
    pub(crate) fn from_cell(cell: NonNull<ValueCell<T, P>>) -> Self {
        Self {
            cell,
            _owns: PhantomData,
        }
    }

    fn cell(&self) -> &ValueCell<T, P> {
        // SAFETY: the cell lives as long as any owner reference
        unsafe { self.cell.as_ref() }
    }

    /// Number of handles owning the value
    pub fn owner_count(&self) -> usize {
        self.cell().owner_count()
    }

    /// Number of [`WeakShared`] handles to the cell
    pub fn weak_count(&self) -> usize {
        // SAFETY: this owner reference keeps the cell alive
        unsafe { ValueCell::weak_count(self.cell) }
    }

    /// Whether both handles own the same cell
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.cell == other.cell
    }

    /// A weak reference to this cell
    pub fn downgrade(this: &Self) -> WeakShared<T, P> {
        this.cell().downgrade();
        WeakShared::from_cell(this.cell)
    }

    pub fn borrow_shared(&self) -> BorrowResult<SharedBorrow<'_, T, P>> {
        SharedBorrow::acquire(self.cell())
    }

    /// Acquire the exclusive borrow, refused while any other borrow is live
    /// on any clone
    pub fn borrow_exclusive(&self) -> BorrowResult<ExclusiveBorrow<'_, T, P>>
    where
        P: Validating,
    {
        ExclusiveBorrow::acquire(self.cell())
    }

    /// Acquire the exclusive borrow at any level
    ///
    /// # Safety
    /// No other borrow of this value, through any clone and on any thread,
    /// may be live while the returned guard is.
    pub unsafe fn borrow_exclusive_unchecked(&self) -> BorrowResult<ExclusiveBorrow<'_, T, P>> {
        ExclusiveBorrow::acquire(self.cell())
    }

    /// Mutable access when this is the only handle to the cell
    ///
    /// Returns `None` while other owners or weak handles exist.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        if !self.cell().is_unique() {
            return None;
        }
        // SAFETY: no other handle exists and `&mut self` excludes this
        // handle's guards
        Some(unsafe { self.cell().value_mut() })
    }

    pub fn can_destroy(&self) -> bool {
        P::can_destroy(&self.cell().state)
    }

    pub fn outstanding_borrows(&self) -> Option<usize> {
        P::outstanding(&self.cell().state)
    }

    pub fn borrow_state(&self) -> Option<BorrowSnapshot> {
        P::snapshot(&self.cell().state)
    }

    pub fn track_borrow_sites(&self, enabled: bool) {
        P::track_sites(&self.cell().state, enabled);
    }
}

impl<T: ?Sized, P: Enforcement> Clone for Shared<T, P> {
    fn clone(&self) -> Self {
        self.cell().add_owner();
        Self::from_cell(self.cell)
    }
}

impl<T: ?Sized, P: Enforcement> Drop for Shared<T, P> {
    fn drop(&mut self) {
        // SAFETY: this owner reference is given up here
        unsafe { ValueCell::release_owner(self.cell) }
    }
}

impl<T, P: Enforcement> From<T> for Shared<T, P> {
    fn from(value: T) -> Self {
        Self::wrap(value)
    }
}

impl<T: ?Sized, P: Enforcement> From<Owner<T, P>> for Shared<T, P> {
    fn from(owner: Owner<T, P>) -> Self {
        owner.to_shared()
    }
}

impl<T: fmt::Debug + ?Sized, P: Enforcement> fmt::Debug for Shared<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Shared");
        match self.borrow_shared() {
            Ok(borrow) => out.field("value", &&*borrow),
            Err(_) => out.field("value", &format_args!("<exclusively borrowed>")),
        };
        out.field("owners", &self.owner_count())
            .field("level", &P::LEVEL)
            .finish()
    }
}

// SAFETY: clones on several threads reach the value like `Arc<RwLock<T>>`
unsafe impl<T: Send + Sync + ?Sized, P: Enforcement> Send for Shared<T, P> {}
unsafe impl<T: Send + Sync + ?Sized, P: Enforcement> Sync for Shared<T, P> {}

/// Non-owning reference to a [`Shared`] cell
///
/// Keeps the allocation, not the value, alive. [`upgrade`](WeakShared::upgrade)
/// yields a new owner while at least one owner still exists.
pub struct WeakShared<T: ?Sized, P: Enforcement = ActivePolicy> {
    cell: NonNull<ValueCell<T, P>>,
    _refers: PhantomData<T>,
}

impl<T: ?Sized, P: Enforcement> WeakShared<T, P> {
    fn from_cell(cell: NonNull<ValueCell<T, P>>) -> Self {
        Self {
            cell,
            _refers: PhantomData,
        }
    }

    pub fn upgrade(&self) -> Option<Shared<T, P>> {
        // SAFETY: this weak reference keeps the allocation alive
        unsafe { ValueCell::try_add_owner(self.cell) }.then(|| Shared::from_cell(self.cell))
    }

    /// Number of owners; zero once the value is gone
    pub fn owner_count(&self) -> usize {
        // SAFETY: this weak reference keeps the allocation alive
        unsafe { ValueCell::owner_count_of(self.cell) }
    }

    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.cell == other.cell
    }
}

impl<T: ?Sized, P: Enforcement> Clone for WeakShared<T, P> {
    fn clone(&self) -> Self {
        // SAFETY: this weak reference keeps the allocation alive
        unsafe { ValueCell::add_weak(self.cell) };
        Self::from_cell(self.cell)
    }
}

impl<T: ?Sized, P: Enforcement> Drop for WeakShared<T, P> {
    fn drop(&mut self) {
        // SAFETY: this weak reference is given up here
        unsafe { ValueCell::release_weak(self.cell) }
    }
}

impl<T: ?Sized, P: Enforcement> fmt::Debug for WeakShared<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakShared")
            .field("owners", &self.owner_count())
            .field("level", &P::LEVEL)
            .finish()
    }
}

// SAFETY: an upgraded handle is a `Shared`, so the same bounds apply
unsafe impl<T: Send + Sync + ?Sized, P: Enforcement> Send for WeakShared<T, P> {}
unsafe impl<T: Send + Sync + ?Sized, P: Enforcement> Sync for WeakShared<T, P> {}

/// Shorthand for [`Shared::new`]
pub fn make_shared<T>(value: T) -> Shared<T> {
    Shared::new(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{violation, Counted, Lifecycle, Tracked, Unchecked, ViolationKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_last_owner_destroys() {
        let drops = Arc::new(AtomicUsize::new(0));
        let s1: Shared<_, Tracked> = Shared::wrap(DropCounter(drops.clone()));
        let s2 = s1.clone();
        assert_eq!(s1.owner_count(), 2);
        assert!(Shared::ptr_eq(&s1, &s2));
        drop(s1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(s2.owner_count(), 1);
        drop(s2);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_borrows_span_clones() {
        let s1: Shared<i32, Tracked> = Shared::wrap(0);
        let s2 = s1.clone();
        let read = s1.borrow_shared().unwrap();
        assert_eq!(
            s2.borrow_exclusive().unwrap_err().kind(),
            ViolationKind::AlreadyBorrowed
        );
        drop(read);
        *s2.borrow_exclusive().unwrap() += 1;
        assert_eq!(*s1.borrow_shared().unwrap(), 1);
    }

    #[test]
    fn test_try_unwrap() {
        let s1: Shared<String, Tracked> = Shared::wrap("x".into());
        let s2 = s1.clone();
        let s1 = s1.try_unwrap().unwrap_err();
        drop(s2);
        mem::forget(s1.borrow_shared().unwrap());
        let s1 = s1.try_unwrap().unwrap_err();
        assert_eq!(s1.owner_count(), 1);
        let (_, violations) = violation::capture(|| drop(s1));
        assert_eq!(violations.len(), 1);

        let only: Shared<String, Counted> = Shared::wrap("y".into());
        assert_eq!(only.try_unwrap().unwrap(), "y");
    }

    #[test]
    fn test_lifecycle_hooks_run_once() {
        struct Hooked {
            constructed: usize,
            destroyed: Arc<AtomicUsize>,
        }

        impl Lifecycle for Hooked {
            fn post_construct(&mut self) {
                self.constructed += 1;
            }

            fn pre_destroy(&mut self) {
                self.destroyed.fetch_add(1, Ordering::SeqCst);
            }
        }

        let destroyed = Arc::new(AtomicUsize::new(0));
        let s1: Shared<_, Tracked> = Shared::wrap_with_lifecycle(Hooked {
            constructed: 0,
            destroyed: destroyed.clone(),
        });
        let s2 = s1.clone();
        assert_eq!(s2.borrow_shared().unwrap().constructed, 1);
        drop(s1);
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
        drop(s2);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_owner() {
        let owner: Owner<u8, Tracked> = Owner::wrap(1);
        let shared: Shared<u8, Tracked> = owner.into();
        assert_eq!(shared.owner_count(), 1);
        assert_eq!(
            format!("{:?}", shared),
            "Shared { value: 1, owners: 1, level: Tracked }"
        );
    }

    #[test]
    fn test_shared_across_threads() {
        let shared: Shared<Vec<usize>, Tracked> = Shared::wrap(Vec::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = shared.clone();
                std::thread::spawn(move || loop {
                    if let Ok(mut borrow) = shared.borrow_exclusive() {
                        borrow.push(i);
                        break;
                    }
                    std::thread::yield_now();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let mut seen = shared.try_unwrap().unwrap();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    struct Node {
        label: &'static str,
        me: WeakShared<Node, Tracked>,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Node {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_value_reaches_its_own_cell() {
        let drops = Arc::new(AtomicUsize::new(0));
        let node: Shared<Node, Tracked> = Shared::wrap_cyclic(|me| {
            assert!(me.upgrade().is_none());
            Node {
                label: "root",
                me: me.clone(),
                drops: drops.clone(),
            }
        });
        assert_eq!(node.owner_count(), 1);
        assert_eq!(node.weak_count(), 1);

        let me = node.borrow_shared().unwrap().me.clone();
        let again = me.upgrade().unwrap();
        assert!(Shared::ptr_eq(&node, &again));
        assert_eq!(again.borrow_shared().unwrap().label, "root");
        drop(again);

        drop(node);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(me.owner_count(), 0);
        assert!(me.upgrade().is_none());
    }

    #[test]
    fn test_downgrade_and_upgrade() {
        let shared: Shared<i32, Counted> = Shared::wrap(4);
        let weak = Shared::downgrade(&shared);
        assert_eq!(shared.weak_count(), 1);
        assert_eq!(*weak.upgrade().unwrap().borrow_shared().unwrap(), 4);
        assert_eq!(
            format!("{:?}", weak),
            "WeakShared { owners: 1, level: Counted }"
        );
        drop(shared);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_get_mut_requires_sole_handle() {
        let mut shared: Shared<Vec<u8>, Unchecked> = Shared::wrap(vec![1]);
        shared.get_mut().unwrap().push(2);

        let other = shared.clone();
        assert!(shared.get_mut().is_none());
        drop(other);

        let weak = Shared::downgrade(&shared);
        assert!(shared.get_mut().is_none());
        drop(weak);

        assert_eq!(shared.get_mut().map(|v| v.len()), Some(2));
    }

    #[test]
    fn test_unsize_shared_to_slice() {
        let array: Shared<[u32; 3], Tracked> = Shared::wrap([1, 2, 3]);
        let slice: Shared<[u32], Tracked> = crate::unsize!(array, [u32]);
        let clone = slice.clone();
        assert_eq!(clone.borrow_shared().unwrap().len(), 3);
        clone.borrow_exclusive().unwrap()[2] = 30;
        assert_eq!(slice.borrow_shared().unwrap()[2], 30);
    }
}
