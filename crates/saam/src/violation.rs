//! Violations of the ownership and borrow discipline
//!
//! Acquire failures are returned to the caller as [`BorrowResult`] errors.
//! Violations that surface where no caller can receive a result (a handle
//! destroyed while borrowed, a borrow used after its cell was released) go
//! through [`report`], which logs them and hands them to the active handler:
//!
//! 1. a thread-local [`capture`] scope, if one is open on this thread
//! 2. the process-wide hook set with [`set_violation_hook`]
//! 3. otherwise a panic carrying the rendered violation

use crate::state::{BorrowKind, BorrowSnapshot};
use miette::Diagnostic;
use parking_lot::RwLock;
use std::cell::RefCell;
use std::sync::Arc;
use thiserror::Error;

/// Alias for the result of a borrow acquisition
pub type BorrowResult<T> = std::result::Result<T, Violation>;

/// A detected breach of the aliasing or lifetime discipline
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Exclusive acquire while any borrow is live, or shared acquire while an
    /// exclusive borrow is live
    #[error("cannot acquire {requested} borrow: value is {held}")]
    #[diagnostic(
        code(saam_borrow_E0001),
        help("release the conflicting borrows before acquiring a {requested} borrow")
    )]
    AlreadyBorrowed {
        requested: BorrowKind,
        held: BorrowSnapshot,
    },

    /// Last owning handle released while borrows were still outstanding
    #[error("value of type `{type_name}` destroyed while {held}")]
    #[diagnostic(
        code(saam_borrow_E0002),
        help("the value was kept alive; drop every borrow before the last owning handle")
    )]
    DestroyedWhileBorrowed {
        type_name: &'static str,
        held: BorrowSnapshot,
        /// Backtraces of the live borrows, when borrow-site tracking was on
        sites: Vec<String>,
    },

    /// Access through a borrow after the owning cell was released
    #[error("{requested} borrow used after its owning cell was released")]
    #[diagnostic(code(saam_borrow_E0003))]
    UseAfterRelease { requested: BorrowKind },
}

/// Fieldless kind of a [`Violation`], for branching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ViolationKind {
    AlreadyBorrowed,
    DestroyedWhileBorrowed,
    UseAfterRelease,
}

impl Violation {
    pub fn kind(&self) -> ViolationKind {
        match self {
            Violation::AlreadyBorrowed { .. } => ViolationKind::AlreadyBorrowed,
            Violation::DestroyedWhileBorrowed { .. } => ViolationKind::DestroyedWhileBorrowed,
            Violation::UseAfterRelease { .. } => ViolationKind::UseAfterRelease,
        }
    }
}

type Hook = Arc<dyn Fn(&Violation) + Send + Sync>;

static HOOK: RwLock<Option<Hook>> = parking_lot::const_rwlock(None);

thread_local! {
    static CAPTURED: RefCell<Option<Vec<Violation>>> = const { RefCell::new(None) };
}

/// Install the process-wide violation hook, replacing any previous one
pub fn set_violation_hook(hook: impl Fn(&Violation) + Send + Sync + 'static) {
    *HOOK.write() = Some(Arc::new(hook));
    tracing::debug!("violation hook installed");
}

/// Remove the process-wide hook, restoring the default panic
pub fn take_violation_hook() -> bool {
    let had_hook = HOOK.write().take().is_some();
    tracing::debug!(had_hook, "violation hook removed");
    had_hook
}

/// Run `f`, collecting every violation reported on this thread meanwhile
///
/// Captured violations are not forwarded to the hook. Scopes nest; an inner
/// scope hides its violations from the outer one.
///
/// # Example
/// ```
/// use saam::{violation, Owner, Tracked, ViolationKind};
///
/// let owner: Owner<i32, Tracked> = Owner::wrap(1);
/// let (_, violations) = violation::capture(|| {
///     std::mem::forget(owner.borrow_shared().unwrap());
///     drop(owner);
/// });
/// assert_eq!(violations[0].kind(), ViolationKind::DestroyedWhileBorrowed);
/// ```
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, Vec<Violation>) {
    let mut scope = CaptureScope::open();
    let result = f();
    (result, scope.close())
}

/// Restores the enclosing capture state when dropped, unwinding included
struct CaptureScope {
    outer: Option<Option<Vec<Violation>>>,
}

impl CaptureScope {
    fn open() -> Self {
        let outer = CAPTURED.with(|captured| captured.borrow_mut().replace(Vec::new()));
        Self { outer: Some(outer) }
    }

    fn close(&mut self) -> Vec<Violation> {
        let outer = self.outer.take().unwrap_or_default();
        CAPTURED
            .with(|captured| std::mem::replace(&mut *captured.borrow_mut(), outer))
            .unwrap_or_default()
    }
}

impl Drop for CaptureScope {
    fn drop(&mut self) {
        if self.outer.is_some() {
            self.close();
        }
    }
}

/// Deliver a violation that has no caller to return to
pub fn report(violation: Violation) {
    tracing::error!(kind = %violation.kind(), "{}", violation);

    let unclaimed = CAPTURED.with(|captured| match captured.borrow_mut().as_mut() {
        Some(list) => {
            list.push(violation);
            None
        }
        None => Some(violation),
    });
    let Some(violation) = unclaimed else {
        return;
    };

    let hook = HOOK.read().clone();
    match hook {
        Some(hook) => hook(&violation),
        None if std::thread::panicking() => {}
        None => panic!("saam: {}", violation),
    }
}
