//! Boundary Slot Table.
use std::cmp;

use crate::block::{Alignment, BlockMemory};
use crate::slot::{BlockUsage, SlotStrategy};
use crate::{ErrorKind, Result};

/// 境界オフセットのテーブルを用いた空き領域管理.
///
/// ブロックの範囲`[0, capacity]`を、昇順に並んだ境界オフセット群で連続した部分領域(run)に分割し、
/// それとは別に、空いているrunの番号をソート済みの列として保持している.
///
/// 管理情報は全てブロックの外側に保持されるため、ブロック内のメモリに触れることは無い.
///
/// # 割当戦略
///
/// 空きrunの列を末尾から(i.e., スタックとして)走査する:
///
/// 1. 要求サイズ(アライメント境界に切り上げたもの)とちょうど同じ長さのrunがあれば、即座にそれを使う
/// 2. そうでなければ、要求を満たすrunの中で一番小さいもの(BestFit)を選ぶ
///    - 余剰分が残る場合には境界を一つ挿入して分割し、後半を空きrunとして残す
///    - 余剰分が残らない場合には、run全体を割り当てる
///
/// # 制限
///
/// 解放されたrunは、隣接する空きrunとは結合されない.
/// そのため、サイズの異なる割当・解放を繰り返すと、テーブルは次第に断片化していく.
#[derive(Debug, Clone)]
pub struct BoundarySlotTable {
    alignment: Alignment,
    boundaries: Vec<usize>,
    free: Vec<usize>,
}
impl BoundarySlotTable {
    /// 新しい`BoundarySlotTable`インスタンスを生成する.
    ///
    /// `capacity`はアライメント境界に切り下げられた上で使用される.
    pub fn new(capacity: usize, alignment: Alignment) -> Self {
        let capacity = alignment.floor_align(capacity);
        let free = if capacity > 0 { vec![0] } else { Vec::new() };
        BoundarySlotTable {
            alignment,
            boundaries: vec![0, capacity],
            free,
        }
    }

    /// 管理している領域のサイズを返す.
    pub fn capacity(&self) -> usize {
        self.boundaries[self.boundaries.len() - 1]
    }

    /// runの総数を返す.
    pub fn run_count(&self) -> usize {
        self.boundaries.len() - 1
    }

    /// 空きrunの数を返す.
    pub fn free_run_count(&self) -> usize {
        self.free.len()
    }

    /// `size`バイト分のrunを確保し、その開始オフセットを返す.
    ///
    /// 十分な空きrunが存在しない場合には`None`が返される.
    pub fn reserve(&mut self, size: usize) -> Option<usize> {
        let size = cmp::max(size, 1);
        let needed = self.alignment.checked_ceil_align(size)?;

        // (空き列内の位置, runの長さ)
        let mut best: Option<(usize, usize)> = None;
        for i in (0..self.free.len()).rev() {
            let run = self.free[i];
            let len = self.run_len(run);
            if len == needed {
                self.free.remove(i);
                return Some(self.boundaries[run]);
            }
            if len >= size && best.map_or(true, |(_, best_len)| len < best_len) {
                best = Some((i, len));
            }
        }

        let (i, len) = best?;
        let run = self.free[i];
        let start = self.boundaries[run];
        if len >= needed + self.alignment.as_usize() {
            // 分割: 前半を割り当て、後半(run + 1)を空きとして残す.
            // 後続のrunの番号は一つずつずれる.
            self.boundaries.insert(run + 1, start + needed);
            for r in &mut self.free[i..] {
                *r += 1;
            }
        } else {
            self.free.remove(i);
        }
        Some(start)
    }

    /// `offset`から始まる割当済みのrunを解放する.
    ///
    /// 以下の場合には、何も変更せずに`false`を返す:
    ///
    /// - `offset`がrunの境界ではない
    /// - 該当runが既に空いている
    /// - `size`がrunの長さを超えている
    pub fn release(&mut self, offset: usize, size: usize) -> bool {
        let run = match self.boundaries.binary_search(&offset) {
            Ok(run) if run < self.run_count() => run,
            _ => return false,
        };
        if size > self.run_len(run) {
            return false;
        }
        match self.free.binary_search(&run) {
            Ok(_) => false,
            Err(i) => {
                self.free.insert(i, run);
                true
            }
        }
    }

    /// テーブルの整合性を検査する.
    pub fn validate(&self) -> Result<()> {
        track_assert!(self.boundaries.len() >= 2, ErrorKind::CorruptionDetected);
        track_assert_eq!(self.boundaries[0], 0, ErrorKind::CorruptionDetected);
        for pair in self.boundaries.windows(2) {
            track_assert!(
                pair[0] < pair[1] || (pair[0] == 0 && self.capacity() == 0),
                ErrorKind::CorruptionDetected; pair[0], pair[1]
            );
            track_assert!(
                self.alignment.is_aligned(pair[1]),
                ErrorKind::CorruptionDetected; pair[1]
            );
        }
        for pair in self.free.windows(2) {
            track_assert!(pair[0] < pair[1], ErrorKind::CorruptionDetected; pair[0], pair[1]);
        }
        if let Some(&last) = self.free.last() {
            track_assert!(last < self.run_count(), ErrorKind::CorruptionDetected; last);
        }
        Ok(())
    }

    /// runの使用状況を集計する.
    pub fn usage(&self) -> BlockUsage {
        let mut usage = BlockUsage {
            capacity: self.capacity(),
            ..BlockUsage::default()
        };
        let mut free = self.free.iter().peekable();
        for run in 0..self.run_count() {
            let is_free = free.peek() == Some(&&run);
            if is_free {
                free.next();
            }
            usage.add_run(self.run_len(run), is_free);
        }
        usage
    }

    fn run_len(&self, run: usize) -> usize {
        self.boundaries[run + 1] - self.boundaries[run]
    }
}
impl SlotStrategy for BoundarySlotTable {
    fn reserve(&mut self, _memory: &mut BlockMemory, size: usize) -> Option<usize> {
        BoundarySlotTable::reserve(self, size)
    }

    fn release(&mut self, _memory: &mut BlockMemory, offset: usize, size: usize) -> bool {
        BoundarySlotTable::release(self, offset, size)
    }

    fn validate(&self, _memory: &BlockMemory) -> Result<()> {
        track!(BoundarySlotTable::validate(self))
    }

    fn usage(&self, _memory: &BlockMemory) -> BlockUsage {
        BoundarySlotTable::usage(self)
    }
}
