#![feature(test)]
extern crate affinity_alloc;
extern crate test;
#[macro_use]
extern crate trackable;

use affinity_alloc::fallback::SystemFallback;
use affinity_alloc::slot::StrategyKind;
use affinity_alloc::{AffinityAllocator, AffinityAllocatorBuilder, Category};
use test::Bencher;

fn allocator(kind: StrategyKind) -> AffinityAllocator {
    track_try_unwrap!(AffinityAllocatorBuilder::new()
        .strategy(kind)
        .block_size(1024 * 1024)
        .build(SystemFallback::new()))
}

fn alloc_free_small(b: &mut Bencher, kind: StrategyKind) {
    let allocator = allocator(kind);
    b.iter(|| {
        let ptr = track_try_unwrap!(allocator.allocate(64, Category::DATA));
        assert!(unsafe { allocator.deallocate(ptr, 64) });
    });
}

fn alloc_free_mixed(b: &mut Bencher, kind: StrategyKind) {
    let allocator = allocator(kind);
    let sizes = [16, 200, 48, 1000, 8, 4000, 96, 512];
    b.iter(|| {
        let ptrs = sizes
            .iter()
            .map(|&size| track_try_unwrap!(allocator.allocate(size, Category::NODE)))
            .collect::<Vec<_>>();
        for (ptr, &size) in ptrs.into_iter().zip(sizes.iter()).rev() {
            assert!(unsafe { allocator.deallocate(ptr, size) });
        }
    });
}

#[bench]
fn boundary_table_alloc_free_small(b: &mut Bencher) {
    alloc_free_small(b, StrategyKind::BoundaryTable);
}

#[bench]
fn intrusive_list_alloc_free_small(b: &mut Bencher) {
    alloc_free_small(b, StrategyKind::IntrusiveList);
}

#[bench]
fn boundary_table_alloc_free_mixed(b: &mut Bencher) {
    alloc_free_mixed(b, StrategyKind::BoundaryTable);
}

#[bench]
fn intrusive_list_alloc_free_mixed(b: &mut Bencher) {
    alloc_free_mixed(b, StrategyKind::IntrusiveList);
}

#[bench]
fn system_alloc_free_small(b: &mut Bencher) {
    use std::alloc::{alloc, dealloc, Layout};
    let layout = Layout::from_size_align(64, 8).unwrap();
    b.iter(|| unsafe {
        let ptr = alloc(layout);
        assert!(!ptr.is_null());
        dealloc(ptr, layout);
    });
}
