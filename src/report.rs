//! プールの使用状況の報告.
use std::fmt;
use std::io::Write;

use crate::block::Alignment;
use crate::slot::{BlockUsage, StrategyKind};
use crate::{Category, Result};

/// 一つのブロックの使用状況.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReport {
    /// ブロックの先頭アドレス.
    pub base: usize,

    /// ブロックのサイズ.
    pub size: usize,

    /// ブロック内の部分領域の集計結果.
    pub usage: BlockUsage,
}
impl BlockReport {
    /// ブロックの使用率(`0.0`から`1.0`の間の値)を返す.
    pub fn utilization(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            self.usage.allocated_bytes as f64 / self.size as f64
        }
    }
}
impl fmt::Display for BlockReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "base={:#x} size={} allocated={} ({:.2}%) runs={} avg_run={} free_runs={} largest_free={}",
            self.base,
            self.size,
            self.usage.allocated_bytes,
            self.utilization() * 100.0,
            self.usage.run_count(),
            self.usage.average_run_size(),
            self.usage.free_runs,
            self.usage.largest_free_run
        )
    }
}

/// 一つのカテゴリのプールの使用状況.
///
/// `Display`実装は、人間向けの複数行のテキストを出力する:
///
/// ```text
/// category=data block_size=65536 alignment=8 strategy=IntrusiveList blocks=1 allocated=1024/65536
///   #0 base=0x7f0c4c000000 size=65536 allocated=1024 (1.56%) runs=3 avg_run=21845 free_runs=1 largest_free=64512
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolReport {
    /// 対象カテゴリ.
    pub category: Category,

    /// 新規ブロックの生成時に使われるサイズ.
    pub block_size: usize,

    /// ブロックのアライメント.
    pub alignment: Alignment,

    /// 空き領域の管理方式.
    pub strategy: StrategyKind,

    /// 各ブロックの使用状況(生成順).
    pub blocks: Vec<BlockReport>,
}
impl PoolReport {
    /// 全ブロックの合計サイズを返す.
    pub fn total_bytes(&self) -> usize {
        self.blocks.iter().map(|b| b.size).sum()
    }

    /// 全ブロックの割当済みバイト数の合計を返す.
    pub fn allocated_bytes(&self) -> usize {
        self.blocks.iter().map(|b| b.usage.allocated_bytes).sum()
    }

    /// テキスト形式の報告を`sink`に書き込む.
    pub fn write_to<W: Write>(&self, mut sink: W) -> Result<()> {
        track_io!(write!(sink, "{}", self))?;
        Ok(())
    }
}
impl fmt::Display for PoolReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "category={} block_size={} alignment={} strategy={:?} blocks={} allocated={}/{}",
            self.category,
            self.block_size,
            self.alignment.as_usize(),
            self.strategy,
            self.blocks.len(),
            self.allocated_bytes(),
            self.total_bytes()
        )?;
        for (i, block) in self.blocks.iter().enumerate() {
            writeln!(f, "  #{} {}", i, block)?;
        }
        Ok(())
    }
}
