//! 利用者が直接触るアロケータ.
use slog::Logger;
use std::cmp;
use std::collections::{btree_map, BTreeMap};
use std::io::Write;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard};

pub use self::builder::{AffinityAllocatorBuilder, DEFAULT_BLOCK_SIZE};

use crate::debug;
use crate::fallback::{Fallback, RawAllocations, SystemFallback};
use crate::metrics::AllocatorMetrics;
use crate::pool::{BlockIndex, BlockPool};
use crate::report::PoolReport;
use crate::{Category, Error, ErrorKind, Result};

mod builder;

/// カテゴリ毎に分離されたプール群から、領域を割り当てるアロケータ.
///
/// # 割当経路
///
/// 割当要求は、以下の順番で処理される:
///
/// 1. 要求カテゴリのプール(サイズが`max_pooled_size`以下の場合のみ)
/// 2. フォールバックアロケータ
/// 3. 生のシステム割当(`raw_fallback`が有効な場合のみ)
///
/// どの経路で割り当てられた領域も、`deallocate`で解放可能.
///
/// # 排他制御
///
/// 全ての公開操作は、一つのロックを保持した状態で実行される.
///
/// # 破棄
///
/// インスタンスの破棄時には、全てのブロックがフォールバックアロケータに返却され、
/// 生のシステム割当の領域も全て解放される.
/// そのため、インスタンスより長生きする領域を保持してはならない.
///
/// # Examples
///
/// ```
/// use affinity_alloc::{AffinityAllocator, Category};
///
/// let allocator = AffinityAllocator::new().unwrap();
/// let ptr = allocator.allocate(100, Category::DATA).unwrap();
/// assert!(unsafe { allocator.deallocate(ptr, 100) });
/// ```
#[derive(Debug)]
pub struct AffinityAllocator<F: Fallback = SystemFallback> {
    state: Mutex<State<F>>,
    config: AffinityAllocatorBuilder,
    logger: Logger,
    metrics: AllocatorMetrics,
}
impl AffinityAllocator<SystemFallback> {
    /// デフォルト設定で`AffinityAllocator`を生成する.
    ///
    /// `AffinityAllocatorBuilder::new().build(SystemFallback::new())`と等価.
    pub fn new() -> Result<Self> {
        track!(AffinityAllocatorBuilder::new().build(SystemFallback::new()))
    }
}
impl<F: Fallback> AffinityAllocator<F> {
    /// `category`のプールから`size`バイト分の領域を割り当てる.
    ///
    /// 返されるポインタは、カテゴリのアライメント境界に揃っている.
    /// サイズ`0`の要求は、サイズ`1`の要求として扱われる.
    ///
    /// プールが要求に応じられない場合には、フォールバックアロケータ、生のシステム割当の順で試行される.
    ///
    /// # Errors
    ///
    /// 全ての経路で割当に失敗した場合には、種類が`ErrorKind::PoolExhausted`のエラーが返される.
    pub fn allocate(&self, size: usize, category: Category) -> Result<NonNull<u8>> {
        let size = cmp::max(size, 1);
        let mut guard = track!(self.lock())?;
        let state = &mut *guard;

        if self.config.is_pooled(size) {
            let blocks = state.index.len();
            let pool = match state.pools.entry(category) {
                btree_map::Entry::Occupied(e) => e.into_mut(),
                btree_map::Entry::Vacant(e) => e.insert(track!(self.new_pool(category))?),
            };
            match pool.allocate(size, &mut state.fallback, &mut state.index) {
                Ok(ptr) => {
                    self.metrics.pooled_allocations.increment();
                    if state.index.len() != blocks {
                        let total: usize = state.pools.values().map(BlockPool::total_bytes).sum();
                        self.metrics.block_bytes.set(total as f64);
                    }
                    if debug::is_enabled() {
                        debug!(self.logger, "Allocated";
                               "category" => %category, "size" => size,
                               "path" => "pooled", "ptr" => format!("{:p}", ptr));
                        track!(self.check_owner(state, ptr))?;
                    }
                    return Ok(ptr);
                }
                Err(e) => {
                    if *e.kind() != ErrorKind::PoolExhausted {
                        return Err(track!(e));
                    }
                }
            }
        }

        let alignment = self.config.alignment_of(category);
        if let Some(ptr) = state.fallback.allocate(size, alignment) {
            self.metrics.fallback_allocations.increment();
            if debug::is_enabled() {
                debug!(self.logger, "Allocated";
                       "category" => %category, "size" => size,
                       "path" => "fallback", "ptr" => format!("{:p}", ptr));
            }
            return Ok(ptr);
        }
        if self.config.raw_fallback {
            if let Some(ptr) = state.raw.allocate(size, alignment) {
                self.metrics.raw_allocations.increment();
                if debug::is_enabled() {
                    debug!(self.logger, "Allocated";
                           "category" => %category, "size" => size,
                           "path" => "raw", "ptr" => format!("{:p}", ptr));
                }
                return Ok(ptr);
            }
        }
        warn!(self.logger, "Cannot allocate memory"; "category" => %category, "size" => size);
        track_panic!(ErrorKind::PoolExhausted; category, size)
    }

    /// `ptr`が指す領域を解放する.
    ///
    /// 解放に失敗した場合には`false`が返される.
    /// 所有者不明のポインタは上位層のバグを示すので、デバッグビルドではパニックする.
    ///
    /// 失敗理由が必要な場合には`try_deallocate`を使用すること.
    ///
    /// # Safety
    ///
    /// - `ptr`と`size`が、このアロケータの`allocate`の呼び出し結果と、その際の要求サイズであること
    /// - 解放後に`ptr`が指す領域を参照しないこと
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) -> bool {
        match self.try_deallocate(ptr, size) {
            Ok(()) => true,
            Err(e) => {
                debug_assert_ne!(*e.kind(), ErrorKind::UnknownPointer, "{}", e);
                false
            }
        }
    }

    /// `ptr`が指す領域を解放する.
    ///
    /// `ptr`を範囲内に含むブロックが存在する場合には、そのブロックが解放を受け付ける必要がある.
    /// 含むブロックが存在しない場合には、フォールバックアロケータ、生のシステム割当の記録の順に解放が試行される.
    ///
    /// # Errors
    ///
    /// 以下の場合には、種類が`ErrorKind::UnknownPointer`のエラーが返される:
    ///
    /// - `ptr`を含むブロックが、割当済みの領域として認識できなかった(e.g., 二重解放、サイズの不一致)
    /// - どの経路の割当にも該当しなかった
    ///
    /// # Safety
    ///
    /// `deallocate`と同様.
    pub unsafe fn try_deallocate(&self, ptr: NonNull<u8>, size: usize) -> Result<()> {
        let size = cmp::max(size, 1);
        let mut guard = track!(self.lock())?;
        let state = &mut *guard;

        if let Some((_, entry)) = state.index.find(ptr.as_ptr() as usize) {
            let pool = track_assert_some!(
                state.pools.get_mut(&entry.category),
                ErrorKind::Other; entry.category
            );
            if !pool.deallocate(entry.block, ptr, size) {
                self.metrics.unknown_pointers.increment();
                warn!(self.logger, "Block rejected a pointer";
                      "category" => %entry.category, "block" => entry.block,
                      "ptr" => format!("{:p}", ptr), "size" => size);
                track_panic!(
                    ErrorKind::UnknownPointer,
                    "Not an allocated region: ptr={:p}, size={}",
                    ptr,
                    size
                );
            }
            self.metrics.pooled_releases.increment();
            if debug::is_enabled() {
                debug!(self.logger, "Deallocated";
                       "category" => %entry.category, "block" => entry.block,
                       "path" => "pooled", "ptr" => format!("{:p}", ptr), "size" => size);
                track!(self.check_block(state, entry.category, entry.block))?;
            }
            return Ok(());
        }

        if state.fallback.deallocate(ptr, size) {
            self.metrics.fallback_releases.increment();
            if debug::is_enabled() {
                debug!(self.logger, "Deallocated";
                       "path" => "fallback", "ptr" => format!("{:p}", ptr), "size" => size);
            }
            return Ok(());
        }
        if state.raw.release(ptr) {
            self.metrics.raw_releases.increment();
            if debug::is_enabled() {
                debug!(self.logger, "Deallocated";
                       "path" => "raw", "ptr" => format!("{:p}", ptr), "size" => size);
            }
            return Ok(());
        }

        self.metrics.unknown_pointers.increment();
        warn!(self.logger, "Unknown pointer"; "ptr" => format!("{:p}", ptr), "size" => size);
        track_panic!(
            ErrorKind::UnknownPointer,
            "Unknown pointer: ptr={:p}, size={}",
            ptr,
            size
        )
    }

    /// `category`の新規ブロックのサイズを変更する.
    ///
    /// 既存のブロックには影響しない.
    /// `category`のプールがまだ存在しない場合には、この時点で生成される.
    pub fn set_category_block_size(&self, category: Category, size: usize) -> Result<()> {
        track_assert_ne!(size, 0, ErrorKind::InvalidInput; category);
        let mut guard = track!(self.lock())?;
        let pool = match guard.pools.entry(category) {
            btree_map::Entry::Occupied(e) => e.into_mut(),
            btree_map::Entry::Vacant(e) => e.insert(track!(self.new_pool(category))?),
        };
        track!(pool.set_block_size(size))?;
        info!(self.logger, "Block size is changed"; "category" => %category, "size" => size);
        Ok(())
    }

    /// 全プールの使用状況を、テキスト形式で`sink`に書き込む.
    ///
    /// プールはカテゴリの昇順に出力される.
    pub fn report<W: Write>(&self, mut sink: W) -> Result<()> {
        let guard = track!(self.lock())?;
        for pool in guard.pools.values() {
            track!(pool.report_to(&mut sink))?;
        }
        Ok(())
    }

    /// `category`のプールの使用状況を返す.
    ///
    /// プールが存在しない場合には`None`が返される.
    pub fn pool_report(&self, category: Category) -> Result<Option<PoolReport>> {
        let guard = track!(self.lock())?;
        Ok(guard.pools.get(&category).map(BlockPool::report))
    }

    /// 全プールの使用状況を、カテゴリの昇順で返す.
    pub fn reports(&self) -> Result<Vec<PoolReport>> {
        let guard = track!(self.lock())?;
        Ok(guard.pools.values().map(BlockPool::report).collect())
    }

    /// 全ブロックの管理情報の整合性を検査する.
    ///
    /// # Errors
    ///
    /// 不整合が見つかった場合には、種類が`ErrorKind::CorruptionDetected`のエラーが返される.
    pub fn validate(&self) -> Result<()> {
        let guard = track!(self.lock())?;
        for pool in guard.pools.values() {
            track!(pool.validate())?;
        }
        Ok(())
    }

    /// アロケータのメトリクスを返す.
    pub fn metrics(&self) -> &AllocatorMetrics {
        &self.metrics
    }

    fn lock(&self) -> Result<MutexGuard<State<F>>> {
        self.state.lock().map_err(|e| track!(Error::from(e)))
    }

    fn new_pool(&self, category: Category) -> Result<BlockPool> {
        track!(BlockPool::new(
            category,
            self.config.block_size_of(category),
            self.config.alignment_of(category),
            self.config.slot.clone(),
            self.logger.clone(),
            self.metrics.clone(),
        ))
    }

    fn check_owner(&self, state: &State<F>, ptr: NonNull<u8>) -> Result<()> {
        let (_, entry) = track_assert_some!(
            state.index.find(ptr.as_ptr() as usize),
            ErrorKind::CorruptionDetected,
            "Pooled pointer has no owner: ptr={:p}",
            ptr
        );
        track!(self.check_block(state, entry.category, entry.block))
    }

    fn check_block(&self, state: &State<F>, category: Category, block: usize) -> Result<()> {
        let pool = track_assert_some!(state.pools.get(&category), ErrorKind::Other; category);
        if let Err(e) = pool.validate_block(block) {
            crit!(self.logger, "Corruption detected";
                  "category" => %category, "block" => block,
                  "error" => %e, "report" => %pool.report());
            if cfg!(debug_assertions) {
                panic!("Corruption detected: {}", e);
            }
            return Err(track!(e));
        }
        Ok(())
    }
}
impl<F: Fallback> Drop for AffinityAllocator<F> {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(e) => e.into_inner(),
        };
        state.index.clear();
        for pool in state.pools.values_mut() {
            for memory in pool.drain_blocks() {
                if !unsafe { state.fallback.deallocate(memory.as_ptr(), memory.len()) } {
                    warn!(self.logger, "Fallback rejected block memory";
                          "category" => %pool.category(),
                          "base" => format!("{:#x}", memory.base()));
                }
            }
        }
        if state.raw.len() > 0 {
            warn!(self.logger, "Raw allocations are released on drop";
                  "count" => state.raw.len());
        }
        self.metrics.block_bytes.set(0.0);
    }
}

#[derive(Debug)]
struct State<F> {
    pools: BTreeMap<Category, BlockPool>,
    index: BlockIndex,
    fallback: F,
    raw: RawAllocations,
}
