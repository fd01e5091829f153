//! カテゴリ毎のブロック群の管理.
use slog::Logger;
use std::cmp;
use std::io::Write;
use std::ptr::NonNull;

pub use self::index::{BlockEntry, BlockIndex};

use crate::block::{Alignment, BlockMemory, MemoryBlock};
use crate::fallback::Fallback;
use crate::metrics::AllocatorMetrics;
use crate::report::{BlockReport, PoolReport};
use crate::slot::SlotOptions;
use crate::{Category, ErrorKind, Result};

mod index;

/// 一つのカテゴリに属するブロック群.
///
/// ブロックは生成順に保持され、最後に割当に成功したブロックが「ヒント」として記憶される.
///
/// 割当要求は、以下の順番で処理される:
///
/// 1. ヒントのブロック
/// 2. 残りのブロック(生成順)
/// 3. フォールバックアロケータから確保した新規ブロック
///
/// ブロックが縮小されたり、個別に返却されることはない.
#[derive(Debug)]
pub struct BlockPool {
    category: Category,
    block_size: usize,
    alignment: Alignment,
    options: SlotOptions,
    blocks: Vec<MemoryBlock>,
    hint: Option<usize>,
    logger: Logger,
    metrics: AllocatorMetrics,
}
impl BlockPool {
    /// 新しい`BlockPool`インスタンスを生成する.
    ///
    /// この時点では、ブロックは一つも確保されない.
    pub fn new(
        category: Category,
        block_size: usize,
        alignment: Alignment,
        options: SlotOptions,
        logger: Logger,
        metrics: AllocatorMetrics,
    ) -> Result<Self> {
        track_assert_ne!(block_size, 0, ErrorKind::InvalidInput; category);
        let logger = logger.new(o!("category" => category.to_string()));
        Ok(BlockPool {
            category,
            block_size,
            alignment,
            options,
            blocks: Vec::new(),
            hint: None,
            logger,
            metrics,
        })
    }

    /// プールのカテゴリを返す.
    pub fn category(&self) -> Category {
        self.category
    }

    /// 新規ブロックの生成時に使われるサイズを返す.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// ブロックのアライメントを返す.
    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// 保持しているブロックの数を返す.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// 保持しているブロックの合計サイズを返す.
    pub fn total_bytes(&self) -> usize {
        self.blocks.iter().map(MemoryBlock::size).sum()
    }

    /// 新規ブロックの生成時に使われるサイズを変更する.
    ///
    /// 既存のブロックには影響しない.
    pub fn set_block_size(&mut self, block_size: usize) -> Result<()> {
        track_assert_ne!(block_size, 0, ErrorKind::InvalidInput; self.category);
        self.block_size = block_size;
        Ok(())
    }

    /// `size`バイト分の領域を割り当てる.
    ///
    /// 既存のブロックに空きがない場合には、`fallback`から新規ブロック用のバッファを確保し、
    /// `index`に登録する.
    ///
    /// # Errors
    ///
    /// 新規ブロック用のバッファが確保できなかった場合には、
    /// 種類が`ErrorKind::PoolExhausted`のエラーが返される.
    pub fn allocate<F>(
        &mut self,
        size: usize,
        fallback: &mut F,
        index: &mut BlockIndex,
    ) -> Result<NonNull<u8>>
    where
        F: Fallback + ?Sized,
    {
        if let Some(i) = self.hint {
            if let Some(ptr) = self.blocks[i].allocate(size) {
                return Ok(ptr);
            }
        }
        for i in 0..self.blocks.len() {
            if Some(i) == self.hint {
                continue;
            }
            if let Some(ptr) = self.blocks[i].allocate(size) {
                self.hint = Some(i);
                return Ok(ptr);
            }
        }

        let i = track!(self.grow(size, fallback, index))?;
        let ptr = track_assert_some!(
            self.blocks[i].allocate(size),
            ErrorKind::Other,
            "A new block cannot satisfy the request: size={}",
            size
        );
        Ok(ptr)
    }

    /// `block`番目のブロックに属する領域を解放する.
    ///
    /// ブロックが割当済みの領域として認識できない場合には`false`を返す.
    pub fn deallocate(&mut self, block: usize, ptr: NonNull<u8>, size: usize) -> bool {
        self.blocks
            .get_mut(block)
            .map_or(false, |b| b.deallocate(ptr, size))
    }

    /// `block`番目のブロックの整合性を検査する.
    pub fn validate_block(&self, block: usize) -> Result<()> {
        let b = track_assert_some!(self.blocks.get(block), ErrorKind::InvalidInput; block);
        track!(b.validate(); self.category, block)
    }

    /// 全てのブロックの整合性を検査する.
    pub fn validate(&self) -> Result<()> {
        for i in 0..self.blocks.len() {
            track!(self.validate_block(i))?;
        }
        Ok(())
    }

    /// プールの使用状況を返す.
    pub fn report(&self) -> PoolReport {
        PoolReport {
            category: self.category,
            block_size: self.block_size,
            alignment: self.alignment,
            strategy: self.options.kind,
            blocks: self
                .blocks
                .iter()
                .map(|b| BlockReport {
                    base: b.base(),
                    size: b.size(),
                    usage: b.usage(),
                })
                .collect(),
        }
    }

    /// プールの使用状況をテキスト形式で`sink`に書き込む.
    pub fn report_to<W: Write>(&self, sink: W) -> Result<()> {
        track!(self.report().write_to(sink))
    }

    /// 全てのブロックをプールから取り外して、それぞれの領域を返す.
    pub fn drain_blocks(&mut self) -> Vec<BlockMemory> {
        self.hint = None;
        self.blocks.drain(..).map(MemoryBlock::into_memory).collect()
    }

    fn grow<F>(&mut self, size: usize, fallback: &mut F, index: &mut BlockIndex) -> Result<usize>
    where
        F: Fallback + ?Sized,
    {
        let capacity = self
            .options
            .required_capacity(size, self.alignment)
            .and_then(|required| {
                self.alignment
                    .checked_ceil_align(cmp::max(required, self.block_size))
            });
        let capacity = match capacity {
            None => {
                self.metrics.pool_exhausted.increment();
                warn!(self.logger, "Requested size is too large for a block"; "size" => size);
                track_panic!(ErrorKind::PoolExhausted; self.category, size);
            }
            Some(capacity) => capacity,
        };
        let ptr = match fallback.allocate(capacity, self.alignment) {
            None => {
                self.metrics.pool_exhausted.increment();
                warn!(self.logger, "Cannot obtain memory for a new block";
                      "size" => size, "capacity" => capacity);
                track_panic!(ErrorKind::PoolExhausted; self.category, size, capacity);
            }
            Some(ptr) => ptr,
        };
        if !self.alignment.is_aligned(ptr.as_ptr() as usize) {
            unsafe { fallback.deallocate(ptr, capacity) };
            track_panic!(
                ErrorKind::Other,
                "Misaligned block memory: alignment={}",
                self.alignment.as_usize()
            );
        }

        let memory = unsafe { BlockMemory::from_raw_parts(ptr, capacity, self.alignment) };
        let block = match MemoryBlock::new(memory, &self.options) {
            Err(e) => {
                unsafe { fallback.deallocate(ptr, capacity) };
                return Err(track!(e));
            }
            Ok(block) => block,
        };

        let i = self.blocks.len();
        let entry = BlockEntry {
            end: block.base() + block.size(),
            category: self.category,
            block: i,
        };
        if !index.insert(block.base(), entry) {
            unsafe { fallback.deallocate(ptr, capacity) };
            track_panic!(
                ErrorKind::Other,
                "Overlapping block memory: base={:#x}, capacity={}",
                block.base(),
                capacity
            );
        }
        info!(self.logger, "New block is created";
              "block" => i, "base" => format!("{:#x}", block.base()), "size" => capacity);

        self.blocks.push(block);
        self.hint = Some(i);
        self.metrics.blocks_created.increment();
        Ok(i)
    }
}
