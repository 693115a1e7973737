//! Enforcement policies
//!
//! Handle types are generic over an [`Enforcement`] policy, so the level is
//! resolved by monomorphization and the hot acquire/release path carries no
//! run-time branch on the level:
//!
//! ```text
//! Owner<T, Unchecked>  acquire/release -> nothing
//! Owner<T, Counted>    acquire/release -> one atomic add/sub
//! Owner<T, Tracked>    acquire/release -> BorrowState compare-and-swap
//! ```
//!
//! [`ActivePolicy`] is the policy selected by the build's Cargo features.
//!
//! Only policies implementing [`Validating`] hand out exclusive borrows through
//! safe methods. The others offer `borrow_exclusive_unchecked`, an `unsafe fn`
//! whose caller vouches that no other borrow is live.

use crate::level::EnforcementLevel;
use crate::sites::{SiteId, SiteRegistry};
use crate::state::{BorrowKind, BorrowSnapshot, BorrowState};
use crate::violation::BorrowResult;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Borrow-state semantics at one enforcement level
pub trait Enforcement: Sized + Send + Sync + 'static {
    const LEVEL: EnforcementLevel;

    /// Per-cell borrow bookkeeping
    type State: Default + Send + Sync;

    /// Per-borrow bookkeeping, kept by the guard until release
    type Token: Send + Sync;

    fn acquire_shared(state: &Self::State) -> BorrowResult<Self::Token>;

    fn acquire_exclusive(state: &Self::State) -> BorrowResult<Self::Token>;

    fn release_shared(state: &Self::State, token: &Self::Token);

    fn release_exclusive(state: &Self::State, token: &Self::Token);

    /// Whether the cell may be destroyed now
    fn can_destroy(state: &Self::State) -> bool;

    /// Mark the cell released; `Err` refuses destruction
    fn close(state: &Self::State) -> Result<(), Refusal>;

    /// Liveness check performed on every access through a borrow
    fn check_live(state: &Self::State, kind: BorrowKind) -> BorrowResult<()>;

    /// Number of live borrows, if this level counts them
    fn outstanding(state: &Self::State) -> Option<usize>;

    /// Exact borrow state, if this level tracks it
    fn snapshot(state: &Self::State) -> Option<BorrowSnapshot>;

    /// Toggle borrow-site recording; ignored below the tracked level
    fn track_sites(_state: &Self::State, _enabled: bool) {}
}

mod private {
    pub trait Sealed {}
}

/// Policies that refuse every conflicting acquire
///
/// Handles expose safe `borrow_exclusive` and `replace` only for these
/// policies.
///
/// # Safety
///
/// [`Enforcement::acquire_exclusive`] must fail while any other borrow of the
/// same state is live, and [`Enforcement::acquire_shared`] must fail while an
/// exclusive borrow is live.
pub unsafe trait Validating: Enforcement + private::Sealed {}

/// Why a cell could not be destroyed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refusal {
    pub held: BorrowSnapshot,
    pub sites: Vec<String>,
}

/// No run-time checks at all
///
/// Every acquire succeeds and compiles to nothing; the value is destroyed as
/// soon as its last owner goes away. The program is trusted to follow the
/// shared/exclusive discipline.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unchecked;

impl Enforcement for Unchecked {
    const LEVEL: EnforcementLevel = EnforcementLevel::Unchecked;
    type State = ();
    type Token = ();

    #[inline(always)]
    fn acquire_shared(_: &()) -> BorrowResult<()> {
        Ok(())
    }

    #[inline(always)]
    fn acquire_exclusive(_: &()) -> BorrowResult<()> {
        Ok(())
    }

    #[inline(always)]
    fn release_shared(_: &(), _: &()) {}

    #[inline(always)]
    fn release_exclusive(_: &(), _: &()) {}

    #[inline(always)]
    fn can_destroy(_: &()) -> bool {
        true
    }

    #[inline(always)]
    fn close(_: &()) -> Result<(), Refusal> {
        Ok(())
    }

    #[inline(always)]
    fn check_live(_: &(), _: BorrowKind) -> BorrowResult<()> {
        Ok(())
    }

    fn outstanding(_: &()) -> Option<usize> {
        None
    }

    fn snapshot(_: &()) -> Option<BorrowSnapshot> {
        None
    }
}

/// Borrows are counted with a single atomic add/sub, never validated
///
/// Destruction still happens when the last owner goes away; the count is
/// available for diagnostics through `outstanding_borrows`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counted;

impl Enforcement for Counted {
    const LEVEL: EnforcementLevel = EnforcementLevel::Counted;
    type State = AtomicUsize;
    type Token = ();

    #[inline]
    fn acquire_shared(count: &AtomicUsize) -> BorrowResult<()> {
        count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    #[inline]
    fn acquire_exclusive(count: &AtomicUsize) -> BorrowResult<()> {
        count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    #[inline]
    fn release_shared(count: &AtomicUsize, _: &()) {
        count.fetch_sub(1, Ordering::Release);
    }

    #[inline]
    fn release_exclusive(count: &AtomicUsize, _: &()) {
        count.fetch_sub(1, Ordering::Release);
    }

    fn can_destroy(count: &AtomicUsize) -> bool {
        count.load(Ordering::Acquire) == 0
    }

    #[inline]
    fn close(_: &AtomicUsize) -> Result<(), Refusal> {
        Ok(())
    }

    #[inline(always)]
    fn check_live(_: &AtomicUsize, _: BorrowKind) -> BorrowResult<()> {
        Ok(())
    }

    fn outstanding(count: &AtomicUsize) -> Option<usize> {
        Some(count.load(Ordering::Acquire))
    }

    fn snapshot(_: &AtomicUsize) -> Option<BorrowSnapshot> {
        None
    }
}

/// Full borrow-state machine with violation reporting
#[derive(Debug, Clone, Copy, Default)]
pub struct Tracked;

/// Cell bookkeeping of the [`Tracked`] policy
#[derive(Default)]
pub struct TrackedState {
    borrows: BorrowState,
    sites: SiteRegistry,
}

impl TrackedState {
    pub fn borrows(&self) -> &BorrowState {
        &self.borrows
    }

    pub fn sites(&self) -> &SiteRegistry {
        &self.sites
    }
}

impl Enforcement for Tracked {
    const LEVEL: EnforcementLevel = EnforcementLevel::Tracked;
    type State = TrackedState;
    type Token = Option<SiteId>;

    fn acquire_shared(state: &TrackedState) -> BorrowResult<Option<SiteId>> {
        state.borrows.acquire_shared()?;
        Ok(state.sites.record())
    }

    fn acquire_exclusive(state: &TrackedState) -> BorrowResult<Option<SiteId>> {
        state.borrows.acquire_exclusive()?;
        Ok(state.sites.record())
    }

    fn release_shared(state: &TrackedState, site: &Option<SiteId>) {
        state.sites.forget(*site);
        state.borrows.release_shared();
    }

    fn release_exclusive(state: &TrackedState, site: &Option<SiteId>) {
        state.sites.forget(*site);
        state.borrows.release_exclusive();
    }

    fn can_destroy(state: &TrackedState) -> bool {
        state.borrows.can_destroy()
    }

    fn close(state: &TrackedState) -> Result<(), Refusal> {
        state.borrows.close().map_err(|held| Refusal {
            held,
            sites: state.sites.render(),
        })
    }

    fn check_live(state: &TrackedState, kind: BorrowKind) -> BorrowResult<()> {
        if state.borrows.is_live() {
            Ok(())
        } else {
            Err(crate::Violation::UseAfterRelease { requested: kind })
        }
    }

    fn outstanding(state: &TrackedState) -> Option<usize> {
        Some(state.borrows.snapshot().outstanding())
    }

    fn snapshot(state: &TrackedState) -> Option<BorrowSnapshot> {
        Some(state.borrows.snapshot())
    }

    fn track_sites(state: &TrackedState, enabled: bool) {
        state.sites.set_enabled(enabled);
    }
}

impl private::Sealed for Tracked {}

// SAFETY: both acquires go through the `BorrowState` compare-and-swap
unsafe impl Validating for Tracked {}

/// Policy selected by the build's enforcement-level feature
#[cfg(feature = "tracked")]
pub type ActivePolicy = Tracked;

/// Policy selected by the build's enforcement-level feature
#[cfg(all(feature = "counted", not(feature = "tracked")))]
pub type ActivePolicy = Counted;

/// Policy selected by the build's enforcement-level feature
#[cfg(not(any(feature = "counted", feature = "tracked")))]
pub type ActivePolicy = Unchecked;
