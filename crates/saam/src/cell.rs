//! Heap value cell behind every owning handle
//!
//! One allocation holds the value, its borrow bookkeeping and two counts:
//! owners keep the value alive, weak references keep the allocation alive.
//! All owners together hold one weak reference, released after the value is
//! gone. The value is dropped when the owner count reaches zero and the policy
//! agrees; a refused destruction leaks the cell and reports the violation.

use crate::policy::Enforcement;
use crate::violation::{self, Violation};
use std::cell::UnsafeCell;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ptr::{self, NonNull};
use std::sync::atomic::{self, AtomicUsize, Ordering};

/// Type-erased pre-destroy hook, called with a pointer to the value
pub(crate) type PreDestroy = unsafe fn(*mut ());

// `repr(C)` keeps the header layout identical for `T` and any type `T`
// unsizes to, so a cell pointer can be re-typed after unsizing the value.
#[repr(C)]
pub(crate) struct ValueCell<T: ?Sized, P: Enforcement> {
    pub(crate) state: P::State,
    owners: AtomicUsize,
    weak: AtomicUsize,
    pre_destroy: Option<PreDestroy>,
    value: UnsafeCell<ManuallyDrop<T>>,
}

impl<T, P: Enforcement> ValueCell<T, P> {
    /// Allocate a cell with one owner
    pub(crate) fn allocate(value: T, pre_destroy: Option<PreDestroy>) -> NonNull<Self> {
        let cell = Box::new(ValueCell {
            state: P::State::default(),
            owners: AtomicUsize::new(1),
            weak: AtomicUsize::new(1),
            pre_destroy,
            value: UnsafeCell::new(ManuallyDrop::new(value)),
        });
        tracing::trace!(
            type_name = std::any::type_name::<T>(),
            level = %P::LEVEL,
            "value cell created"
        );
        NonNull::from(Box::leak(cell))
    }

    /// Allocate a cell with no owner yet, so that `build` can see a weak
    /// reference to it before the value exists
    pub(crate) fn allocate_cyclic(
        build: impl FnOnce(NonNull<Self>) -> T,
        pre_destroy: Option<PreDestroy>,
    ) -> NonNull<Self> {
        let uninit: NonNull<ValueCell<MaybeUninit<T>, P>> =
            NonNull::from(Box::leak(Box::new(ValueCell {
                state: P::State::default(),
                owners: AtomicUsize::new(0),
                weak: AtomicUsize::new(1),
                pre_destroy,
                value: UnsafeCell::new(ManuallyDrop::new(MaybeUninit::uninit())),
            })));
        // `MaybeUninit<T>` has the layout of `T`
        let cell = uninit.cast::<ValueCell<T, P>>();
        let value = build(cell);
        // SAFETY: no owner exists yet, so nothing reads the value concurrently
        unsafe {
            let slot = uninit.as_ref();
            (*slot.value.get()).write(value);
            slot.owners.store(1, Ordering::Release);
        }
        tracing::trace!(
            type_name = std::any::type_name::<T>(),
            level = %P::LEVEL,
            "value cell created with back-reference"
        );
        cell
    }

    /// Move the value out and free the cell without running `pre_destroy`
    ///
    /// # Safety
    /// The caller gave up the last owner reference (the count is zero) and
    /// [`Enforcement::can_destroy`] returned true.
    pub(crate) unsafe fn take(cell: NonNull<Self>) -> T {
        if let Err(refusal) = P::close(&cell.as_ref().state) {
            crate::state::corrupted(&format!(
                "borrow appeared on a sole-owned cell ({})",
                refusal.held
            ));
        }
        let value = ManuallyDrop::take(&mut *cell.as_ref().value.get());
        Self::release_weak(cell);
        value
    }

    /// Re-type a cell whose value pointer was unsized by `cast`
    ///
    /// # Safety
    /// `cast` must return its argument with only pointer metadata added, as an
    /// unsizing coercion does. It must not dereference the pointer.
    pub(crate) unsafe fn unsize<U: ?Sized>(
        cell: NonNull<Self>,
        cast: impl FnOnce(*mut T) -> *mut U,
    ) -> NonNull<ValueCell<U, P>> {
        let fat = cast(cell.as_ptr().cast::<T>());
        debug_assert_eq!(fat.cast::<u8>(), cell.as_ptr().cast::<u8>());
        NonNull::new_unchecked(fat as *mut ValueCell<U, P>)
    }
}

impl<T: ?Sized, P: Enforcement> ValueCell<T, P> {
    /// # Safety
    /// No exclusive borrow of the value may be live.
    pub(crate) unsafe fn value(&self) -> &T {
        &*self.value.get()
    }

    /// # Safety
    /// No other borrow of the value may be live.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn value_mut(&self) -> &mut T {
        &mut *self.value.get()
    }

    pub(crate) fn owner_count(&self) -> usize {
        self.owners.load(Ordering::Acquire)
    }

    /// Weak handles, not counting the one all owners share
    ///
    /// # Safety
    /// The caller holds an owner or weak reference to `cell`.
    pub(crate) unsafe fn weak_count(cell: NonNull<Self>) -> usize {
        let weak = (*ptr::addr_of!((*cell.as_ptr()).weak)).load(Ordering::Acquire);
        let owners = Self::owner_count_of(cell);
        match weak {
            // locked by `is_unique`, which only succeeds with no weak handle
            usize::MAX => 0,
            weak if owners > 0 => weak - 1,
            weak => weak,
        }
    }

    /// # Safety
    /// The caller holds an owner or weak reference to `cell`.
    pub(crate) unsafe fn owner_count_of(cell: NonNull<Self>) -> usize {
        (*ptr::addr_of!((*cell.as_ptr()).owners)).load(Ordering::Acquire)
    }

    /// Whether the calling owner is the only owner and no weak handle exists
    pub(crate) fn is_unique(&self) -> bool {
        // lock out `downgrade` while the owner count is read
        if self
            .weak
            .compare_exchange(1, usize::MAX, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        let unique = self.owners.load(Ordering::Acquire) == 1;
        self.weak.store(1, Ordering::Release);
        unique
    }

    /// Add a weak reference on behalf of an owner
    pub(crate) fn downgrade(&self) {
        let mut current = self.weak.load(Ordering::Relaxed);
        loop {
            if current == usize::MAX {
                std::hint::spin_loop();
                current = self.weak.load(Ordering::Relaxed);
                continue;
            }
            if current > isize::MAX as usize {
                std::process::abort();
            }
            match self.weak.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn add_owner(&self) {
        // same overflow policy as `Arc`
        if self.owners.fetch_add(1, Ordering::Relaxed) > isize::MAX as usize {
            std::process::abort();
        }
    }

    /// Add an owner unless the value is already gone
    ///
    /// Touches only the counts, so it is usable while the value is still
    /// being built by `allocate_cyclic`.
    ///
    /// # Safety
    /// The caller holds a weak reference to `cell`.
    pub(crate) unsafe fn try_add_owner(cell: NonNull<Self>) -> bool {
        let owners = &*ptr::addr_of!((*cell.as_ptr()).owners);
        let mut current = owners.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }
            if current > isize::MAX as usize {
                std::process::abort();
            }
            match owners.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// # Safety
    /// The caller holds an owner or weak reference to `cell`.
    pub(crate) unsafe fn add_weak(cell: NonNull<Self>) {
        let weak = &*ptr::addr_of!((*cell.as_ptr()).weak);
        if weak.fetch_add(1, Ordering::Relaxed) > isize::MAX as usize {
            std::process::abort();
        }
    }

    /// Drop one weak reference; the last one frees the allocation
    ///
    /// # Safety
    /// `cell` must come from `allocate` and the caller gives up a weak
    /// reference. The last weak reference goes after the value is dropped or
    /// moved out.
    pub(crate) unsafe fn release_weak(cell: NonNull<Self>) {
        let weak = &*ptr::addr_of!((*cell.as_ptr()).weak);
        if weak.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        atomic::fence(Ordering::Acquire);
        // the value lives in `ManuallyDrop` and is not dropped again here
        drop(Box::from_raw(cell.as_ptr()));
    }

    /// Drop one owner; the last one retires the cell
    ///
    /// # Safety
    /// `cell` must come from `allocate` and the caller gives up its owner
    /// reference.
    pub(crate) unsafe fn release_owner(cell: NonNull<Self>) {
        if cell.as_ref().owners.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        atomic::fence(Ordering::Acquire);
        Self::retire(cell);
    }

    /// Claim the single remaining owner reference, if it is the only one
    pub(crate) fn claim_sole_owner(&self) -> bool {
        self.owners
            .compare_exchange(1, 0, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn restore_owner(&self) {
        self.owners.store(1, Ordering::Release);
    }

    /// Destroy the value, unless the policy refuses
    ///
    /// # Safety
    /// The owner count has reached zero and `cell` is not used afterwards.
    unsafe fn retire(cell: NonNull<Self>) {
        let this = cell.as_ref();
        match P::close(&this.state) {
            Ok(()) => {
                let value = this.value.get();
                if let Some(pre_destroy) = this.pre_destroy {
                    pre_destroy((*value).cast_value());
                }
                ManuallyDrop::drop(&mut *value);
                tracing::trace!(
                    type_name = std::any::type_name::<T>(),
                    "value cell destroyed"
                );
                Self::release_weak(cell);
            }
            Err(refusal) => {
                tracing::debug!(
                    type_name = std::any::type_name::<T>(),
                    held = %refusal.held,
                    "value cell leaked: destruction refused"
                );
                // the owners' weak reference is kept, so the allocation stays
                violation::report(Violation::DestroyedWhileBorrowed {
                    type_name: std::any::type_name::<T>(),
                    held: refusal.held,
                    sites: refusal.sites,
                });
            }
        }
    }

}

trait CastValue {
    fn cast_value(&mut self) -> *mut ();
}

impl<T: ?Sized> CastValue for ManuallyDrop<T> {
    fn cast_value(&mut self) -> *mut () {
        (&mut **self as *mut T).cast::<()>()
    }
}

/// Monomorphized entry point stored as a [`PreDestroy`] hook
///
/// # Safety
/// `value` must point to a live `T`.
pub(crate) unsafe fn call_pre_destroy<T: crate::Lifecycle>(value: *mut ()) {
    (*value.cast::<T>()).pre_destroy();
}
