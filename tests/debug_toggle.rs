extern crate affinity_alloc;
#[macro_use]
extern crate trackable;

use affinity_alloc::fallback::SystemFallback;
use affinity_alloc::report::PoolReport;
use affinity_alloc::slot::{BlockUsage, StrategyKind};
use affinity_alloc::{debug, AffinityAllocatorBuilder, Category, Result};
use std::ptr::NonNull;
use trackable::result::TestResult;

/// 割当結果を、ブロック番号とブロック内オフセットの組で表したもの.
type Placement = (usize, usize);

fn placement(reports: &[PoolReport], category: Category, ptr: NonNull<u8>) -> Option<Placement> {
    let address = ptr.as_ptr() as usize;
    let report = reports.iter().find(|r| r.category == category)?;
    report
        .blocks
        .iter()
        .position(|b| b.base <= address && address < b.base + b.size)
        .map(|i| (i, address - report.blocks[i].base))
}

fn usages(reports: &[PoolReport]) -> Vec<(Category, Vec<(usize, BlockUsage)>)> {
    reports
        .iter()
        .map(|r| {
            let blocks = r.blocks.iter().map(|b| (b.size, b.usage)).collect();
            (r.category, blocks)
        })
        .collect()
}

/// 決まった手順で割当と解放を繰り返し、各割当の位置と最終的な使用状況を返す.
fn replay(
    kind: StrategyKind,
) -> Result<(Vec<Option<Placement>>, Vec<(Category, Vec<(usize, BlockUsage)>)>)> {
    let allocator = track!(AffinityAllocatorBuilder::new()
        .strategy(kind)
        .block_size(4096)
        .build(SystemFallback::new()))?;

    let requests = [
        (100, Category::DATA),
        (200, Category::DATA),
        (50, Category::NODE),
        (10_000, Category::DATA),
        (8, Category::NODE),
        (600, Category::DATA),
        (4000, Category::NODE),
        (300, Category::DATA),
    ];
    let mut live = Vec::new();
    let mut placements = Vec::new();
    for (i, &(size, category)) in requests.iter().enumerate() {
        let ptr = track!(allocator.allocate(size, category))?;
        placements.push(placement(&track!(allocator.reports())?, category, ptr));
        live.push((ptr, size));
        if i % 3 == 2 {
            let (ptr, size) = live.remove(1);
            unsafe { track!(allocator.try_deallocate(ptr, size))? };
        }
    }
    for &(size, category) in &requests[..4] {
        let ptr = track!(allocator.allocate(size / 2 + 1, category))?;
        placements.push(placement(&track!(allocator.reports())?, category, ptr));
        live.push((ptr, size / 2 + 1));
    }
    for (ptr, size) in live.drain(..).rev().step_by(2) {
        unsafe { track!(allocator.try_deallocate(ptr, size))? };
    }
    track!(allocator.validate())?;
    Ok((placements, usages(&track!(allocator.reports())?)))
}

#[test]
fn debug_toggle_keeps_results() -> TestResult {
    for &kind in &[StrategyKind::BoundaryTable, StrategyKind::IntrusiveList] {
        debug::set_enabled(false);
        let (placements, usages) = track!(replay(kind))?;
        assert!(placements.iter().all(Option::is_some), "{:?}", kind);

        debug::set_enabled(true);
        let result = replay(kind);
        debug::set_enabled(false);
        let (checked_placements, checked_usages) = track!(result)?;

        assert_eq!(placements, checked_placements, "{:?}", kind);
        assert_eq!(usages, checked_usages, "{:?}", kind);
    }
    Ok(())
}
