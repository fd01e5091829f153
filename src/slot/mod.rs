//! ブロック内の空き領域の管理方式(スロット戦略).
//!
//! 戦略は、一つのブロックのアドレス範囲を受け取り、
//! その中から要求サイズ分の部分領域(run)を割り当てる責務を負っている.
//!
//! 戦略が担当するのは領域の計算処理と管理情報の更新のみで、利用者のデータに触れることは無い.
//! ([`IntrusiveFreeList`]は、管理情報を空き領域自体の中に保持する点に注意)
//!
//! [`IntrusiveFreeList`]: ./struct.IntrusiveFreeList.html
use std::cmp;
use std::fmt;

pub use self::boundary_table::BoundarySlotTable;
pub use self::free_list::IntrusiveFreeList;

use crate::block::{Alignment, BlockMemory};
use crate::{ErrorKind, Result};

mod boundary_table;
mod free_list;
mod node;

/// ブロック内の空き領域の管理方式を表すトレイト.
///
/// オフセットは全てブロックの先頭からのバイト単位の値.
pub trait SlotStrategy: fmt::Debug + Send {
    /// `size`バイト分の部分領域を確保し、その開始オフセットを返す.
    ///
    /// 返されるオフセットは、ブロックのアライメント境界に揃っている.
    ///
    /// 十分な空き領域が存在しない場合には`None`が返される.
    fn reserve(&mut self, memory: &mut BlockMemory, size: usize) -> Option<usize>;

    /// `offset`から始まる確保済みの部分領域を解放する.
    ///
    /// `offset`が確保済みの部分領域として認識できない場合には、何も変更せずに`false`を返す.
    fn release(&mut self, memory: &mut BlockMemory, offset: usize, size: usize) -> bool;

    /// 管理情報の整合性を検査する.
    ///
    /// # Errors
    ///
    /// 不整合が見つかった場合には、種類が`ErrorKind::CorruptionDetected`のエラーが返される.
    fn validate(&self, memory: &BlockMemory) -> Result<()>;

    /// ブロックの使用状況を集計する.
    fn usage(&self, memory: &BlockMemory) -> BlockUsage;
}

/// 空き領域の管理方式の種別.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// [`BoundarySlotTable`]を使用する.
    ///
    /// [`BoundarySlotTable`]: ./struct.BoundarySlotTable.html
    BoundaryTable,

    /// [`IntrusiveFreeList`]を使用する.
    ///
    /// [`IntrusiveFreeList`]: ./struct.IntrusiveFreeList.html
    IntrusiveList,
}
impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::IntrusiveList
    }
}

/// サイズ階層.
///
/// `IntrusiveFreeList`において、長さ(ヘッダ込み)が`[min, max]`の範囲に収まる空きノード群を保持する.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeTier {
    /// 階層が扱うノード長の最小値.
    pub min: usize,

    /// 階層が扱うノード長の最大値(この値を含む).
    pub max: usize,
}
impl SizeTier {
    /// `len`がこの階層の範囲に含まれるかどうかを判定する.
    pub fn contains(&self, len: usize) -> bool {
        self.min <= len && len <= self.max
    }
}

/// 隙間なく並んだサイズ階層の列.
///
/// 最初の階層は`0`から始まり、最後の階層は`usize::MAX`で終わるため、
/// 全ての長さは、いずれか一つの階層に必ず属する.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeTiers(Vec<SizeTier>);
impl SizeTiers {
    /// 階層の境界値群から`SizeTiers`を生成する.
    ///
    /// 境界値が`[256, 4096]`の場合には`[0, 255]`, `[256, 4095]`, `[4096, usize::MAX]`の三階層になる.
    ///
    /// # Errors
    ///
    /// 境界値が狭義単調増加ではない、ないし`0`を含む場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    ///
    /// # Examples
    ///
    /// ```
    /// use affinity_alloc::slot::{SizeTier, SizeTiers};
    ///
    /// let tiers = SizeTiers::from_bounds(&[256]).unwrap();
    /// assert_eq!(tiers.as_slice(), &[
    ///     SizeTier { min: 0, max: 255 },
    ///     SizeTier { min: 256, max: usize::max_value() },
    /// ]);
    /// assert!(SizeTiers::from_bounds(&[256, 256]).is_err());
    /// ```
    pub fn from_bounds(bounds: &[usize]) -> Result<Self> {
        let mut tiers = Vec::with_capacity(bounds.len() + 1);
        let mut min = 0;
        for &bound in bounds {
            track_assert!(min < bound, ErrorKind::InvalidInput; min, bound);
            tiers.push(SizeTier {
                min,
                max: bound - 1,
            });
            min = bound;
        }
        tiers.push(SizeTier {
            min,
            max: usize::max_value(),
        });
        Ok(SizeTiers(tiers))
    }

    /// 階層群をスライスとして返す.
    pub fn as_slice(&self) -> &[SizeTier] {
        &self.0
    }
}
impl Default for SizeTiers {
    fn default() -> Self {
        SizeTiers(vec![
            SizeTier { min: 0, max: 255 },
            SizeTier {
                min: 256,
                max: 4095,
            },
            SizeTier {
                min: 4096,
                max: usize::max_value(),
            },
        ])
    }
}

/// スロット戦略の構築用オプション.
#[derive(Debug, Clone)]
pub struct SlotOptions {
    /// 使用する戦略の種別.
    pub kind: StrategyKind,

    /// `IntrusiveFreeList`用のサイズ階層.
    pub tiers: SizeTiers,

    /// `IntrusiveFreeList`で、空きノードを分割するために必要な余剰分の最小値(バイト単位).
    ///
    /// 余剰分がこの値に満たない場合には、ノード全体が割り当てられる.
    pub min_split_size: usize,
}
impl SlotOptions {
    /// `size`バイトの要求を、空のブロックで確実に満たすために必要な容量を返す.
    ///
    /// 必要な容量が`usize`で表現できない場合には`None`が返される.
    pub fn required_capacity(&self, size: usize, alignment: Alignment) -> Option<usize> {
        let size = alignment.checked_ceil_align(cmp::max(size, 1))?;
        match self.kind {
            StrategyKind::BoundaryTable => Some(size),
            StrategyKind::IntrusiveList => {
                let len = IntrusiveFreeList::header_size(alignment).checked_add(size)?;
                Some(cmp::max(len, IntrusiveFreeList::min_node_len(alignment)))
            }
        }
    }

    /// `memory`を管理するための戦略インスタンスを構築する.
    pub fn build(&self, memory: &mut BlockMemory) -> Result<Box<dyn SlotStrategy>> {
        match self.kind {
            StrategyKind::BoundaryTable => Ok(Box::new(BoundarySlotTable::new(
                memory.len(),
                memory.alignment(),
            ))),
            StrategyKind::IntrusiveList => {
                let list = track!(IntrusiveFreeList::new(
                    memory,
                    &self.tiers,
                    self.min_split_size
                ))?;
                Ok(Box::new(list))
            }
        }
    }
}
impl Default for SlotOptions {
    fn default() -> Self {
        SlotOptions {
            kind: StrategyKind::default(),
            tiers: SizeTiers::default(),
            min_split_size: 64,
        }
    }
}

/// ブロックの使用状況.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockUsage {
    /// 戦略が管理している領域のサイズ.
    pub capacity: usize,

    /// 割当済みの部分領域が占めるバイト数(管理用ヘッダを含む).
    pub allocated_bytes: usize,

    /// 割当済みの部分領域の数.
    pub allocated_runs: usize,

    /// 空き領域のバイト数.
    pub free_bytes: usize,

    /// 空き領域の数.
    pub free_runs: usize,

    /// 最大の空き領域のバイト数.
    pub largest_free_run: usize,
}
impl BlockUsage {
    /// 部分領域(割当済み・空きの両方)の総数を返す.
    pub fn run_count(&self) -> usize {
        self.allocated_runs + self.free_runs
    }

    /// 部分領域の平均サイズを返す.
    pub fn average_run_size(&self) -> usize {
        if self.run_count() == 0 {
            0
        } else {
            (self.allocated_bytes + self.free_bytes) / self.run_count()
        }
    }

    pub(crate) fn add_run(&mut self, len: usize, is_free: bool) {
        if is_free {
            self.free_runs += 1;
            self.free_bytes += len;
            self.largest_free_run = cmp::max(self.largest_free_run, len);
        } else {
            self.allocated_runs += 1;
            self.allocated_bytes += len;
        }
    }
}
