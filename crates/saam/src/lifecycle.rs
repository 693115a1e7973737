//! Construction and destruction hooks
//!
//! Values placed into a handle with `with_lifecycle` get a callback once they
//! sit in their cell and another one right before they are dropped. The
//! destroy hook runs only when destruction really happens: not when it is
//! refused because of outstanding borrows, and not when the value is moved
//! back out with `try_take`/`try_unwrap`.

use crate::cell::PreDestroy;

/// Hooks around the life of a value inside an owning handle
///
/// # Example
/// ```
/// use saam::{Lifecycle, Owner};
///
/// struct Connection {
///     open: bool,
/// }
///
/// impl Lifecycle for Connection {
///     fn post_construct(&mut self) {
///         self.open = true;
///     }
///
///     fn pre_destroy(&mut self) {
///         self.open = false;
///     }
/// }
///
/// let conn = Owner::with_lifecycle(Connection { open: false });
/// assert!(conn.borrow_shared().unwrap().open);
/// ```
pub trait Lifecycle {
    /// Called once the value is owned by its handle
    fn post_construct(&mut self) {}

    /// Called with exclusive access right before the value is dropped
    fn pre_destroy(&mut self) {}
}

pub(crate) fn pre_destroy_hook<T: Lifecycle>() -> Option<PreDestroy> {
    Some(crate::cell::call_pre_destroy::<T>)
}
