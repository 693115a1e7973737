mod common;

use common::Model;
use proptest::prelude::*;
use saam::{violation, BorrowKind, BorrowSnapshot, BorrowState, Owner, Tracked, Violation};
use std::mem;

#[derive(Debug, Clone, Copy)]
enum Op {
    Shared,
    Exclusive,
    ReleaseShared,
    ReleaseExclusive,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Shared),
        2 => Just(Op::Exclusive),
        2 => Just(Op::ReleaseShared),
        1 => Just(Op::ReleaseExclusive),
    ]
}

proptest! {
    #[test]
    fn test_state_matches_sequential_model(ops in prop::collection::vec(op(), 0..64)) {
        let owner: Owner<u32, Tracked> = Owner::wrap(0);
        let mut model = Model::default();
        let mut shared = Vec::new();
        let mut exclusive = None;

        for op in ops {
            match op {
                Op::Shared => {
                    let result = owner.borrow_shared();
                    prop_assert_eq!(result.is_ok(), model.acquire(BorrowKind::Shared));
                    if let Ok(borrow) = result {
                        shared.push(borrow);
                    }
                }
                Op::Exclusive => {
                    let result = owner.borrow_exclusive();
                    prop_assert_eq!(result.is_ok(), model.acquire(BorrowKind::Exclusive));
                    if let Ok(borrow) = result {
                        exclusive = Some(borrow);
                    }
                }
                Op::ReleaseShared => {
                    if shared.pop().is_some() {
                        model.release(BorrowKind::Shared);
                    }
                }
                Op::ReleaseExclusive => {
                    if exclusive.take().is_some() {
                        model.release(BorrowKind::Exclusive);
                    }
                }
            }

            prop_assert_eq!(shared.len(), model.shared());
            let expected = model.snapshot();
            prop_assert_eq!(owner.borrow_state(), Some(expected));
            prop_assert_eq!(owner.can_destroy(), expected.is_free());
        }
    }

    #[test]
    fn test_shared_round_trip_returns_to_free(n in 0usize..256) {
        let state = BorrowState::new();
        for _ in 0..n {
            prop_assert!(state.acquire_shared().is_ok());
        }
        let expected = if n == 0 { BorrowSnapshot::Free } else { BorrowSnapshot::Shared(n) };
        prop_assert_eq!(state.snapshot(), expected);
        for _ in 0..n {
            state.release_shared();
        }
        prop_assert_eq!(state.snapshot(), BorrowSnapshot::Free);
        prop_assert!(state.acquire_exclusive().is_ok());
    }

    #[test]
    fn test_two_exclusive_acquires_never_both_succeed(readers in 0usize..4) {
        let state = BorrowState::new();
        for _ in 0..readers {
            state.acquire_shared().unwrap();
        }
        let first = state.acquire_exclusive().is_ok();
        let second = state.acquire_exclusive().is_ok();
        prop_assert!(!(first && second));
        prop_assert_eq!(first, readers == 0);
    }

    #[test]
    fn test_destroying_borrowed_owner_always_reports(leaked in 1usize..8, exclusive in any::<bool>()) {
        let owner: Owner<Vec<u8>, Tracked> = Owner::wrap(vec![0; 4]);
        let (_, violations) = violation::capture(|| {
            if exclusive {
                mem::forget(owner.borrow_exclusive().unwrap());
            } else {
                for _ in 0..leaked {
                    mem::forget(owner.borrow_shared().unwrap());
                }
            }
            drop(owner);
        });

        let expected = if exclusive {
            BorrowSnapshot::Exclusive
        } else {
            BorrowSnapshot::Shared(leaked)
        };
        prop_assert_eq!(violations.len(), 1);
        match &violations[0] {
            Violation::DestroyedWhileBorrowed { held, .. } => prop_assert_eq!(*held, expected),
            other => prop_assert!(false, "unexpected violation: {}", other),
        }
    }
}
