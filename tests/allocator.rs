extern crate affinity_alloc;
extern crate rand;
#[macro_use]
extern crate trackable;

use affinity_alloc::block::Alignment;
use affinity_alloc::fallback::SystemFallback;
use affinity_alloc::slot::StrategyKind;
use affinity_alloc::{AffinityAllocator, AffinityAllocatorBuilder, Category, ErrorKind, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;
use trackable::result::TestResult;

const STRATEGIES: [StrategyKind; 2] = [StrategyKind::BoundaryTable, StrategyKind::IntrusiveList];

fn allocator(kind: StrategyKind, block_size: usize) -> Result<AffinityAllocator> {
    track!(AffinityAllocatorBuilder::new()
        .block_size(block_size)
        .strategy(kind)
        .build(SystemFallback::new()))
}

fn block_count(allocator: &AffinityAllocator, category: Category) -> Result<usize> {
    let report = track!(allocator.pool_report(category))?;
    Ok(report.map_or(0, |r| r.blocks.len()))
}

#[test]
fn concrete_scenario() -> TestResult {
    for &kind in &STRATEGIES {
        let allocator = track!(allocator(kind, 4096))?;
        let a = track!(allocator.allocate(100, Category::DATA))?;
        let b = track!(allocator.allocate(200, Category::DATA))?;
        let c = track!(allocator.allocate(50, Category::DATA))?;

        let (a, b, c) = (a.as_ptr() as usize, b.as_ptr() as usize, c.as_ptr() as usize);
        assert!(a + 100 <= b, "{:?}", kind);
        assert!(b + 200 <= c, "{:?}", kind);
        assert_eq!(track!(block_count(&allocator, Category::DATA))?, 1);

        unsafe { track!(allocator.try_deallocate(NonNull::new_unchecked(b as *mut u8), 200))? };
        let report = track!(allocator.pool_report(Category::DATA))?.unwrap();
        let usage = report.blocks[0].usage;
        assert_eq!(usage.free_runs, 2, "{:?}", kind);
        assert!(usage.largest_free_run >= 200);

        // 解放済みの200バイトの領域が再利用される
        let d = track!(allocator.allocate(180, Category::DATA))?;
        assert_eq!(d.as_ptr() as usize, b, "{:?}", kind);
        assert_eq!(track!(block_count(&allocator, Category::DATA))?, 1);
        track!(allocator.validate())?;
    }
    Ok(())
}

#[test]
fn round_trip() -> TestResult {
    for &kind in &STRATEGIES {
        let allocator = track!(allocator(kind, 8192))?;
        let sizes = [1, 7, 8, 9, 100, 1000, 4000, 8192, 20_000];
        let ptrs = sizes
            .iter()
            .map(|&size| allocator.allocate(size, Category::DEFAULT))
            .collect::<Result<Vec<_>>>()?;
        for (&ptr, &size) in ptrs.iter().zip(sizes.iter()) {
            assert!(unsafe { allocator.deallocate(ptr, size) });
        }
        assert_eq!(allocator.metrics().pooled_allocations(), sizes.len() as u64);
        assert_eq!(allocator.metrics().releases(), sizes.len() as u64);
        track!(allocator.validate())?;
    }
    Ok(())
}

#[test]
fn exact_fit_reuse() -> TestResult {
    for &kind in &STRATEGIES {
        let allocator = track!(allocator(kind, 4096))?;
        let _a = track!(allocator.allocate(100, Category::NODE))?;
        let b = track!(allocator.allocate(100, Category::NODE))?;
        let _c = track!(allocator.allocate(100, Category::NODE))?;

        unsafe { track!(allocator.try_deallocate(b, 100))? };
        assert_eq!(track!(allocator.allocate(100, Category::NODE))?, b, "{:?}", kind);
    }
    Ok(())
}

#[test]
fn category_isolation() -> TestResult {
    for &kind in &STRATEGIES {
        let allocator = track!(allocator(kind, 4096))?;
        let mut owned = Vec::new();
        for i in 0..200 {
            let category = if i % 2 == 0 {
                Category::DATA
            } else {
                Category::NODE
            };
            let ptr = track!(allocator.allocate(64 + i, category))?;
            owned.push((ptr.as_ptr() as usize, category));
        }

        let reports = track!(allocator.reports())?;
        assert_eq!(reports.len(), 2);
        for (address, category) in owned {
            let owners = reports
                .iter()
                .filter(|r| {
                    r.blocks
                        .iter()
                        .any(|b| b.base <= address && address < b.base + b.size)
                })
                .map(|r| r.category)
                .collect::<Vec<_>>();
            assert_eq!(owners, vec![category]);
        }
    }
    Ok(())
}

#[test]
fn alignment() -> TestResult {
    for &kind in &STRATEGIES {
        for &align in &[8, 16, 64, 256, 4096] {
            let alignment = track!(Alignment::new(align))?;
            let allocator = track!(AffinityAllocatorBuilder::new()
                .strategy(kind)
                .category_alignment(Category::SCRATCH, alignment)
                .build(SystemFallback::new()))?;
            for size in &[1, 3, 17, 100, 333, 5000, 100_000] {
                let ptr = track!(allocator.allocate(*size, Category::SCRATCH))?;
                assert_eq!(ptr.as_ptr() as usize % align, 0, "{:?} {}", kind, size);
            }
            track!(allocator.validate())?;
        }
    }
    Ok(())
}

#[test]
fn growth_by_exactly_one_block() -> TestResult {
    for &kind in &STRATEGIES {
        let allocator = track!(allocator(kind, 4096))?;
        track!(allocator.allocate(3000, Category::DATA))?;
        assert_eq!(track!(block_count(&allocator, Category::DATA))?, 1);

        track!(allocator.allocate(2000, Category::DATA))?;
        assert_eq!(track!(block_count(&allocator, Category::DATA))?, 2);
        assert_eq!(allocator.metrics().blocks_created(), 2);
        assert_eq!(allocator.metrics().block_bytes(), 8192);
    }
    Ok(())
}

#[test]
fn fallback_round_trip() -> TestResult {
    for &kind in &STRATEGIES {
        let allocator = track!(AffinityAllocatorBuilder::new()
            .strategy(kind)
            .block_size(4096)
            .build(SystemFallback::with_limit(4096)))?;
        let a = track!(allocator.allocate(4000, Category::DATA))?;
        let b = track!(allocator.allocate(4000, Category::DATA))?;
        assert_eq!(allocator.metrics().raw_allocations(), 1);
        assert_eq!(track!(block_count(&allocator, Category::DATA))?, 1);

        assert!(unsafe { allocator.deallocate(b, 4000) });
        assert!(unsafe { allocator.deallocate(a, 4000) });
        track!(allocator.validate())?;
    }
    Ok(())
}

#[test]
fn pool_exhausted() -> TestResult {
    let allocator = track!(AffinityAllocatorBuilder::new()
        .block_size(4096)
        .raw_fallback(false)
        .build(SystemFallback::with_limit(4096)))?;
    let a = track!(allocator.allocate(4000, Category::DATA))?;

    let e = allocator.allocate(4000, Category::DATA).err().unwrap();
    assert_eq!(*e.kind(), ErrorKind::PoolExhausted);
    assert_eq!(allocator.metrics().pool_exhausted(), 1);

    // 解放すれば、同じブロックから再び割り当てられる
    unsafe { track!(allocator.try_deallocate(a, 4000))? };
    assert_eq!(track!(allocator.allocate(4000, Category::DATA))?, a);
    Ok(())
}

#[test]
fn unknown_pointer() -> TestResult {
    let allocator = track!(allocator(StrategyKind::IntrusiveList, 4096))?;
    let a = track!(allocator.allocate(64, Category::DATA))?;

    let mut local = 0u64;
    let foreign = NonNull::new(&mut local as *mut u64 as *mut u8).unwrap();
    unsafe {
        let e = allocator.try_deallocate(foreign, 8).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::UnknownPointer);

        // ブロックの範囲内だが、割当済みの領域の先頭ではない
        let inner = NonNull::new_unchecked(a.as_ptr().add(8));
        let e = allocator.try_deallocate(inner, 8).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::UnknownPointer);

        track!(allocator.try_deallocate(a, 64))?;
    }
    assert_eq!(allocator.metrics().unknown_pointers(), 2);
    track!(allocator.validate())?;
    Ok(())
}

#[test]
fn boundary_table_does_not_merge() -> TestResult {
    let allocator = track!(allocator(StrategyKind::BoundaryTable, 1024))?;
    let ptrs = (0..4)
        .map(|_| allocator.allocate(256, Category::DATA))
        .collect::<Result<Vec<_>>>()?;
    for &ptr in &ptrs {
        unsafe { track!(allocator.try_deallocate(ptr, 256))? };
    }

    let report = track!(allocator.pool_report(Category::DATA))?.unwrap();
    assert_eq!(report.blocks.len(), 1);
    assert_eq!(report.blocks[0].usage.free_runs, 4);
    assert_eq!(report.blocks[0].usage.largest_free_run, 256);

    // 断片化しているので、新しいブロックが必要になる
    track!(allocator.allocate(512, Category::DATA))?;
    assert_eq!(track!(block_count(&allocator, Category::DATA))?, 2);
    Ok(())
}

#[test]
fn intrusive_list_merges() -> TestResult {
    let allocator = track!(allocator(StrategyKind::IntrusiveList, 4096))?;
    let ptrs = (0..8)
        .map(|i| allocator.allocate(100 + i * 10, Category::DATA))
        .collect::<Result<Vec<_>>>()?;
    for (i, &ptr) in ptrs.iter().enumerate().rev().filter(|(i, _)| i % 2 == 0) {
        unsafe { track!(allocator.try_deallocate(ptr, 100 + i * 10))? };
    }
    for (i, &ptr) in ptrs.iter().enumerate().filter(|(i, _)| i % 2 == 1) {
        unsafe { track!(allocator.try_deallocate(ptr, 100 + i * 10))? };
    }

    let report = track!(allocator.pool_report(Category::DATA))?.unwrap();
    let usage = report.blocks[0].usage;
    assert_eq!(usage.allocated_runs, 0);
    assert_eq!(usage.free_runs, 1);
    assert_eq!(usage.largest_free_run, 4096);
    track!(allocator.validate())?;
    Ok(())
}

#[test]
fn validate_detects_corrupted_header() -> TestResult {
    let allocator = track!(allocator(StrategyKind::IntrusiveList, 4096))?;
    let _a = track!(allocator.allocate(100, Category::DATA))?;
    let b = track!(allocator.allocate(100, Category::DATA))?;
    track!(allocator.validate())?;

    // ヘッダの状態ワード(利用者領域の直前)を壊す
    unsafe { (b.as_ptr().sub(8) as *mut u64).write_unaligned(0xDEAD_BEEF) };
    let e = allocator.validate().err().unwrap();
    assert_eq!(*e.kind(), ErrorKind::CorruptionDetected);
    Ok(())
}

#[test]
fn report_text() -> TestResult {
    let allocator = track!(allocator(StrategyKind::BoundaryTable, 4096))?;
    track!(allocator.allocate(100, Category::NODE))?;
    track!(allocator.allocate(100, Category::DATA))?;

    let mut buf = Vec::new();
    track!(allocator.report(&mut buf))?;
    let text = String::from_utf8(buf).unwrap();
    let lines = text.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("category=data block_size=4096 alignment=8"));
    assert!(lines[1].contains("allocated=104 "));
    assert!(lines[2].starts_with("category=node "));
    Ok(())
}

#[test]
fn huge_request_is_pool_exhausted() -> TestResult {
    for &kind in &STRATEGIES {
        let allocator = track!(allocator(kind, 4096))?;
        for &size in &[usize::MAX, usize::MAX - 3, usize::MAX / 2 + 1] {
            let e = allocator.allocate(size, Category::DATA).err();
            assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::PoolExhausted), "{:?}", kind);
        }
        assert_eq!(track!(block_count(&allocator, Category::DATA))?, 0);

        // ロックは健全なまま
        let a = track!(allocator.allocate(16, Category::DATA))?;
        assert_eq!(track!(block_count(&allocator, Category::DATA))?, 1);
        unsafe { track!(allocator.try_deallocate(a, 16))? };
        track!(allocator.validate())?;
    }
    Ok(())
}

/// 割当済みの範囲の集合.
#[derive(Debug, Default)]
struct Ranges(BTreeMap<usize, usize>);
impl Ranges {
    fn insert(&mut self, start: usize, len: usize) {
        let end = start + len;
        if let Some((&s, &e)) = self.0.range(..end).next_back() {
            assert!(e <= start, "overlap: [{:#x}, {:#x}) vs [{:#x}, {:#x})", s, e, start, end);
        }
        self.0.insert(start, end);
    }

    fn remove(&mut self, start: usize) {
        assert!(self.0.remove(&start).is_some());
    }
}

#[test]
fn randomized_replay() -> TestResult {
    let categories = [
        Category::DEFAULT,
        Category::DATA,
        Category::NODE,
        Category::SCRATCH,
    ];
    for &kind in &STRATEGIES {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        let allocator = track!(AffinityAllocatorBuilder::new()
            .strategy(kind)
            .block_size(4096)
            .max_pooled_size(16 * 1024)
            .build(SystemFallback::new()))?;
        let mut ranges = Ranges::default();
        let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

        for i in 0..5000 {
            if live.is_empty() || rng.gen_bool(0.55) {
                let size = if rng.gen_bool(0.02) {
                    rng.gen_range(4096..32 * 1024)
                } else {
                    rng.gen_range(1..=600)
                };
                let category = categories[rng.gen_range(0..categories.len())];
                let ptr = track!(allocator.allocate(size, category))?;
                ranges.insert(ptr.as_ptr() as usize, size);

                let tag = i as u8;
                unsafe { std::ptr::write_bytes(ptr.as_ptr(), tag, size) };
                live.push((ptr, size, tag));
            } else {
                let (ptr, size, tag) = live.swap_remove(rng.gen_range(0..live.len()));
                let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
                assert!(bytes.iter().all(|&b| b == tag), "{:?}", kind);
                ranges.remove(ptr.as_ptr() as usize);
                assert!(unsafe { allocator.deallocate(ptr, size) });
            }
            if i % 500 == 0 {
                track!(allocator.validate())?;
            }
        }
        for (ptr, size, _) in live {
            assert!(unsafe { allocator.deallocate(ptr, size) });
        }
        track!(allocator.validate())?;
    }
    Ok(())
}

#[test]
fn concurrent_use() -> TestResult {
    let allocator = Arc::new(track!(allocator(StrategyKind::IntrusiveList, 16 * 1024))?);
    let handles = (0..4)
        .map(|t| {
            let allocator = Arc::clone(&allocator);
            thread::spawn(move || {
                let category = Category::new(t);
                let mut live = Vec::new();
                for i in 0..500 {
                    let size = 16 + (i % 50) * 8;
                    let ptr = allocator.allocate(size, category).unwrap();
                    live.push((ptr, size));
                    if i % 3 == 0 {
                        let (ptr, size) = live.swap_remove(0);
                        assert!(unsafe { allocator.deallocate(ptr, size) });
                    }
                }
                for (ptr, size) in live {
                    assert!(unsafe { allocator.deallocate(ptr, size) });
                }
            })
        })
        .collect::<Vec<_>>();
    for h in handles {
        h.join().unwrap();
    }
    track!(allocator.validate())?;
    assert_eq!(track!(allocator.reports())?.len(), 4);
    Ok(())
}
