//! Borrow round-trip cost per enforcement level
//!
//! Each case takes a shared borrow, reads through it and releases it. The
//! `unchecked` case should be indistinguishable from the bare reference.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use saam::{Counted, Enforcement, Owner, Tracked, Unchecked};

fn shared_round_trip<P: Enforcement>(owner: &Owner<u64, P>) -> u64 {
    match owner.borrow_shared() {
        Ok(borrow) => *borrow,
        Err(_) => 0,
    }
}

fn exclusive_round_trip<P: Enforcement>(owner: &Owner<u64, P>) {
    // SAFETY: each round trip releases its borrow before the next one
    if let Ok(mut borrow) = unsafe { owner.borrow_exclusive_unchecked() } {
        *borrow += 1;
    }
}

fn bench_shared(c: &mut Criterion) {
    let mut group = c.benchmark_group("shared_borrow");

    let bare = 7u64;
    group.bench_function("bare_ref", |b| b.iter(|| *black_box(&bare)));

    let unchecked: Owner<u64, Unchecked> = Owner::wrap(7);
    group.bench_function("unchecked", |b| {
        b.iter(|| shared_round_trip(black_box(&unchecked)))
    });

    let counted: Owner<u64, Counted> = Owner::wrap(7);
    group.bench_function("counted", |b| {
        b.iter(|| shared_round_trip(black_box(&counted)))
    });

    let tracked: Owner<u64, Tracked> = Owner::wrap(7);
    group.bench_function("tracked", |b| {
        b.iter(|| shared_round_trip(black_box(&tracked)))
    });

    group.finish();
}

fn bench_exclusive(c: &mut Criterion) {
    let mut group = c.benchmark_group("exclusive_borrow");

    let mut bare = 0u64;
    group.bench_function("bare_ref", |b| b.iter(|| *black_box(&mut bare) += 1));

    let unchecked: Owner<u64, Unchecked> = Owner::wrap(0);
    group.bench_function("unchecked", |b| {
        b.iter(|| exclusive_round_trip(black_box(&unchecked)))
    });

    let counted: Owner<u64, Counted> = Owner::wrap(0);
    group.bench_function("counted", |b| {
        b.iter(|| exclusive_round_trip(black_box(&counted)))
    });

    let tracked: Owner<u64, Tracked> = Owner::wrap(0);
    group.bench_function("tracked", |b| {
        b.iter(|| exclusive_round_trip(black_box(&tracked)))
    });

    let tracing_sites: Owner<u64, Tracked> = Owner::wrap(0);
    tracing_sites.track_borrow_sites(true);
    group.bench_function("tracked_with_sites", |b| {
        b.iter(|| exclusive_round_trip(black_box(&tracing_sites)))
    });

    group.finish();
}

criterion_group!(benches, bench_shared, bench_exclusive);
criterion_main!(benches);
