//! Sequential model of one cell's borrow state, shared by the test binaries

#![allow(dead_code)]

use saam::{BorrowKind, BorrowSnapshot};

/// What a single-threaded cell would allow next
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Model {
    shared: usize,
    exclusive: bool,
}

impl Model {
    /// Apply an acquire and return whether the model grants it
    pub fn acquire(&mut self, kind: BorrowKind) -> bool {
        match kind {
            BorrowKind::Shared if !self.exclusive => {
                self.shared += 1;
                true
            }
            BorrowKind::Exclusive if !self.exclusive && self.shared == 0 => {
                self.exclusive = true;
                true
            }
            _ => false,
        }
    }

    pub fn release(&mut self, kind: BorrowKind) {
        match kind {
            BorrowKind::Shared => {
                assert!(self.shared > 0, "shared release without a borrow");
                self.shared -= 1;
            }
            BorrowKind::Exclusive => {
                assert!(self.exclusive, "exclusive release without a borrow");
                self.exclusive = false;
            }
        }
    }

    pub fn shared(&self) -> usize {
        self.shared
    }

    pub fn snapshot(&self) -> BorrowSnapshot {
        match (self.exclusive, self.shared) {
            (true, _) => BorrowSnapshot::Exclusive,
            (false, 0) => BorrowSnapshot::Free,
            (false, n) => BorrowSnapshot::Shared(n),
        }
    }
}
