//! Per-cell borrow state machine
//!
//! A [`BorrowState`] is a single atomic word packing three fields:
//!
//! ```text
//! bit  N-1      liveness   (1 while the owning cell is alive)
//! bit  N-2      exclusive  (1 while an exclusive borrow is live)
//! bits 0..N-2   shared count
//! ```
//!
//! Every transition is one compare-and-swap (or one fetch-op for releases),
//! so transitions never block and are linearizable: concurrent callers observe
//! some serial order of their operations. A transition that cannot proceed
//! fails immediately instead of waiting.

use crate::violation::{BorrowResult, Violation};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

const LIVE: usize = 1 << (usize::BITS - 1);
const EXCLUSIVE: usize = 1 << (usize::BITS - 2);
const COUNT_MASK: usize = EXCLUSIVE - 1;

/// Kind of borrow requested from a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum BorrowKind {
    /// Read-only access, any number may coexist
    Shared,
    /// Read-write access, at most one and never alongside shared borrows
    Exclusive,
}

/// Observable borrow state of a cell
///
/// At any instant a cell is in exactly one of these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorrowSnapshot {
    /// No outstanding borrows
    Free,
    /// `n >= 1` live shared borrows
    Shared(usize),
    /// Exactly one live exclusive borrow
    Exclusive,
}

impl BorrowSnapshot {
    /// Number of live borrows of either kind
    pub fn outstanding(self) -> usize {
        match self {
            BorrowSnapshot::Free => 0,
            BorrowSnapshot::Shared(n) => n,
            BorrowSnapshot::Exclusive => 1,
        }
    }

    pub fn is_free(self) -> bool {
        matches!(self, BorrowSnapshot::Free)
    }

    fn decode(word: usize) -> Self {
        if word & EXCLUSIVE != 0 {
            BorrowSnapshot::Exclusive
        } else {
            match word & COUNT_MASK {
                0 => BorrowSnapshot::Free,
                n => BorrowSnapshot::Shared(n),
            }
        }
    }
}

impl fmt::Display for BorrowSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BorrowSnapshot::Free => write!(f, "not borrowed"),
            BorrowSnapshot::Shared(1) => write!(f, "borrowed by 1 shared borrow"),
            BorrowSnapshot::Shared(n) => write!(f, "borrowed by {} shared borrows", n),
            BorrowSnapshot::Exclusive => write!(f, "exclusively borrowed"),
        }
    }
}

/// Atomic borrow-state word of one value cell
///
/// Starts live and [`Free`](BorrowSnapshot::Free). [`close`](Self::close)
/// clears the liveness flag once the owning cell is released; afterwards every
/// acquire fails with [`Violation::UseAfterRelease`].
pub struct BorrowState {
    word: AtomicUsize,
}

impl BorrowState {
    pub const fn new() -> Self {
        Self {
            word: AtomicUsize::new(LIVE),
        }
    }

    /// `Free -> Shared(1)`, `Shared(n) -> Shared(n + 1)`; fails on `Exclusive`
    pub fn acquire_shared(&self) -> BorrowResult<()> {
        let mut current = self.word.load(Ordering::Relaxed);
        loop {
            if current & LIVE == 0 {
                return Err(Violation::UseAfterRelease {
                    requested: BorrowKind::Shared,
                });
            }
            if current & EXCLUSIVE != 0 {
                return Err(Violation::AlreadyBorrowed {
                    requested: BorrowKind::Shared,
                    held: BorrowSnapshot::Exclusive,
                });
            }
            if current & COUNT_MASK == COUNT_MASK {
                corrupted("shared borrow count overflow");
            }
            match self.word.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// `Free -> Exclusive`; fails on any outstanding borrow
    pub fn acquire_exclusive(&self) -> BorrowResult<()> {
        match self.word.compare_exchange(
            LIVE,
            LIVE | EXCLUSIVE,
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => Ok(()),
            Err(actual) if actual & LIVE == 0 => Err(Violation::UseAfterRelease {
                requested: BorrowKind::Exclusive,
            }),
            Err(actual) => Err(Violation::AlreadyBorrowed {
                requested: BorrowKind::Exclusive,
                held: BorrowSnapshot::decode(actual),
            }),
        }
    }

    /// `Shared(n) -> Shared(n - 1)`, `Shared(1) -> Free`
    ///
    /// # Panics
    /// Releasing from any other state means a double release.
    pub fn release_shared(&self) {
        let previous = self.word.fetch_sub(1, Ordering::Release);
        if previous & EXCLUSIVE != 0 || previous & COUNT_MASK == 0 {
            corrupted("shared borrow released twice");
        }
    }

    /// `Exclusive -> Free`
    ///
    /// # Panics
    /// Releasing from any other state means a double release.
    pub fn release_exclusive(&self) {
        let previous = self.word.fetch_and(!EXCLUSIVE, Ordering::Release);
        if previous & EXCLUSIVE == 0 || previous & COUNT_MASK != 0 {
            corrupted("exclusive borrow released twice");
        }
    }

    /// True iff no borrow is outstanding
    pub fn can_destroy(&self) -> bool {
        self.word.load(Ordering::Acquire) & (EXCLUSIVE | COUNT_MASK) == 0
    }

    /// Whether the owning cell is still alive
    pub fn is_live(&self) -> bool {
        self.word.load(Ordering::Acquire) & LIVE != 0
    }

    pub fn snapshot(&self) -> BorrowSnapshot {
        BorrowSnapshot::decode(self.word.load(Ordering::Acquire))
    }

    /// Clear the liveness flag
    ///
    /// Returns `Ok` when the cell was free and may be destroyed. Otherwise the
    /// cell is still marked dead (no further borrow can be acquired) and the
    /// outstanding borrows are returned.
    ///
    /// # Panics
    /// Closing an already closed state.
    pub fn close(&self) -> Result<(), BorrowSnapshot> {
        let mut current = self.word.load(Ordering::Relaxed);
        loop {
            if current & LIVE == 0 {
                corrupted("borrow state closed twice");
            }
            match self.word.compare_exchange_weak(
                current,
                current & !LIVE,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return match BorrowSnapshot::decode(current) {
                        BorrowSnapshot::Free => Ok(()),
                        held => Err(held),
                    }
                }
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for BorrowState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BorrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BorrowState")
            .field("live", &self.is_live())
            .field("borrows", &self.snapshot())
            .finish()
    }
}

#[cold]
#[inline(never)]
pub(crate) fn corrupted(what: &str) -> ! {
    panic!("saam: corrupted borrow state: {}", what)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_free_and_live() {
        let state = BorrowState::new();
        assert!(state.is_live());
        assert!(state.can_destroy());
        assert_eq!(state.snapshot(), BorrowSnapshot::Free);
    }

    #[test]
    fn test_shared_borrows_stack() {
        let state = BorrowState::new();
        state.acquire_shared().unwrap();
        state.acquire_shared().unwrap();
        assert_eq!(state.snapshot(), BorrowSnapshot::Shared(2));
        assert!(!state.can_destroy());

        state.release_shared();
        assert_eq!(state.snapshot(), BorrowSnapshot::Shared(1));
        state.release_shared();
        assert_eq!(state.snapshot(), BorrowSnapshot::Free);
    }

    #[test]
    fn test_exclusive_refused_while_shared() {
        let state = BorrowState::new();
        state.acquire_shared().unwrap();
        let err = state.acquire_exclusive().unwrap_err();
        assert_eq!(
            err,
            Violation::AlreadyBorrowed {
                requested: BorrowKind::Exclusive,
                held: BorrowSnapshot::Shared(1),
            }
        );
        // a failed acquire leaves the state untouched
        assert_eq!(state.snapshot(), BorrowSnapshot::Shared(1));
    }

    #[test]
    fn test_shared_refused_while_exclusive() {
        let state = BorrowState::new();
        state.acquire_exclusive().unwrap();
        let err = state.acquire_shared().unwrap_err();
        assert_eq!(
            err,
            Violation::AlreadyBorrowed {
                requested: BorrowKind::Shared,
                held: BorrowSnapshot::Exclusive,
            }
        );
        assert!(state.acquire_exclusive().is_err());

        state.release_exclusive();
        assert!(state.can_destroy());
        assert!(state.acquire_shared().is_ok());
    }

    #[test]
    fn test_close_free_state() {
        let state = BorrowState::new();
        assert_eq!(state.close(), Ok(()));
        assert!(!state.is_live());
        assert_eq!(
            state.acquire_shared(),
            Err(Violation::UseAfterRelease {
                requested: BorrowKind::Shared
            })
        );
        assert_eq!(
            state.acquire_exclusive(),
            Err(Violation::UseAfterRelease {
                requested: BorrowKind::Exclusive
            })
        );
    }

    #[test]
    fn test_close_refused_while_borrowed() {
        let state = BorrowState::new();
        state.acquire_shared().unwrap();
        state.acquire_shared().unwrap();
        assert_eq!(state.close(), Err(BorrowSnapshot::Shared(2)));
        // refused close still marks the cell dead
        assert!(!state.is_live());
        assert_eq!(state.snapshot(), BorrowSnapshot::Shared(2));
    }

    #[test]
    #[should_panic(expected = "shared borrow released twice")]
    fn test_double_shared_release_is_fatal() {
        let state = BorrowState::new();
        state.release_shared();
    }

    #[test]
    #[should_panic(expected = "exclusive borrow released twice")]
    fn test_double_exclusive_release_is_fatal() {
        let state = BorrowState::new();
        state.acquire_exclusive().unwrap();
        state.release_exclusive();
        state.release_exclusive();
    }

    #[test]
    #[should_panic(expected = "closed twice")]
    fn test_double_close_is_fatal() {
        let state = BorrowState::new();
        let _ = state.close();
        let _ = state.close();
    }

    #[test]
    fn test_snapshot_display() {
        assert_eq!(BorrowSnapshot::Free.to_string(), "not borrowed");
        assert_eq!(
            BorrowSnapshot::Shared(3).to_string(),
            "borrowed by 3 shared borrows"
        );
        assert_eq!(BorrowSnapshot::Exclusive.to_string(), "exclusively borrowed");
        assert_eq!(BorrowSnapshot::Shared(3).outstanding(), 3);
    }
}
