//! Run-time ownership and borrow checking
//!
//! A value lives in an owning handle ([`Owner`] for a single owner, [`Shared`]
//! for several) and is reached only through scoped borrow guards:
//! [`SharedBorrow`] for reading, any number at a time, or [`ExclusiveBorrow`]
//! for writing, alone. How strictly this is checked is chosen per build with
//! the `unchecked`, `counted` and `tracked` Cargo features:
//!
//! - `unchecked`: acquire and release compile to nothing
//! - `counted` (default): a single atomic counter per value
//! - `tracked`: a full borrow-state machine; conflicting acquires fail with a
//!   [`Violation`], destroying a borrowed value is refused and reported
//!
//! Handles default to the build's level but can name one explicitly, as in
//! `Owner<T, Tracked>`.
//!
//! ```
//! use saam::{Owner, Tracked, ViolationKind};
//!
//! let owner: Owner<i32, Tracked> = Owner::wrap(1);
//! {
//!     let reader = owner.borrow_shared().unwrap();
//!     let err = owner.borrow_exclusive().unwrap_err();
//!     assert_eq!(err.kind(), ViolationKind::AlreadyBorrowed);
//!     assert_eq!(*reader, 1);
//! }
//! *owner.borrow_exclusive().unwrap() += 1;
//! assert_eq!(*owner.borrow_shared().unwrap(), 2);
//! ```

mod level;
pub use level::*;

mod state;
pub use state::*;

mod sites;
pub use sites::*;

mod policy;
pub use policy::*;

pub mod violation;
pub use violation::{set_violation_hook, take_violation_hook, BorrowResult, Violation, ViolationKind};

mod cell;

mod borrow;
pub use borrow::*;

mod owner;
pub use owner::*;

mod shared;
pub use shared::*;

mod lifecycle;
pub use lifecycle::*;

mod sync;
pub use sync::*;

/// Unsize the value of an [`Owner`] or [`Shared`], as in `[T; N]` to `[T]` or
/// a concrete type to `dyn Trait`
///
/// The conversion is checked by the compiler as an ordinary pointer
/// coercion, so only real unsizing coercions are accepted.
///
/// ```
/// use saam::{unsize, Owner, Tracked};
/// use std::fmt::Display;
///
/// let owner: Owner<u8, Tracked> = Owner::wrap(7);
/// let shown: Owner<dyn Display, Tracked> = unsize!(owner, dyn Display);
/// assert_eq!(shown.borrow_shared().unwrap().to_string(), "7");
/// ```
///
/// ```compile_fail
/// use saam::{unsize, Owner, Tracked};
///
/// let owner: Owner<u8, Tracked> = Owner::wrap(7);
/// let wrong: Owner<u64, Tracked> = unsize!(owner, u64);
/// ```
#[macro_export]
macro_rules! unsize {
    ($handle:expr, $target:ty) => {{
        // SAFETY: the closure is a plain pointer coercion
        unsafe { $handle.unsize(|ptr| -> *mut $target { ptr }) }
    }};
}
