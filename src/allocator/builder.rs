use prometrics::metrics::MetricBuilder;
use slog::{Discard, Logger};
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{AffinityAllocator, State};
use crate::block::Alignment;
use crate::fallback::{Fallback, RawAllocations};
use crate::metrics::AllocatorMetrics;
use crate::pool::BlockIndex;
use crate::slot::{SizeTiers, SlotOptions, StrategyKind};
use crate::{Category, ErrorKind, Result};

/// ブロックサイズのデフォルト値(64KiB).
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// `AffinityAllocator`のビルダ.
#[derive(Debug, Clone)]
pub struct AffinityAllocatorBuilder {
    pub(crate) block_size: usize,
    pub(crate) category_block_sizes: BTreeMap<Category, usize>,
    pub(crate) alignment: Alignment,
    pub(crate) category_alignments: BTreeMap<Category, Alignment>,
    pub(crate) slot: SlotOptions,
    pub(crate) max_pooled_size: Option<usize>,
    pub(crate) raw_fallback: bool,
    pub(crate) logger: Logger,
    pub(crate) metrics: MetricBuilder,
}
impl AffinityAllocatorBuilder {
    /// デフォルト設定で`AffinityAllocatorBuilder`インスタンスを生成する.
    pub fn new() -> Self {
        AffinityAllocatorBuilder {
            block_size: DEFAULT_BLOCK_SIZE,
            category_block_sizes: BTreeMap::new(),
            alignment: Alignment::min(),
            category_alignments: BTreeMap::new(),
            slot: SlotOptions::default(),
            max_pooled_size: None,
            raw_fallback: true,
            logger: Logger::root(Discard, o!()),
            metrics: MetricBuilder::new(),
        }
    }

    /// 新規ブロックの生成時に使われるサイズ(バイト単位)を設定する.
    ///
    /// 個別に設定されていない全てのカテゴリに適用される.
    /// 要求サイズがこの値を上回る場合には、要求を満たせるだけの大きさのブロックが生成される.
    ///
    /// デフォルト値は`DEFAULT_BLOCK_SIZE`.
    pub fn block_size(&mut self, size: usize) -> &mut Self {
        self.block_size = size;
        self
    }

    /// 特定のカテゴリ用のブロックサイズを設定する.
    ///
    /// アロケータの生成後に変更したい場合には`AffinityAllocator::set_category_block_size`を使用する.
    pub fn category_block_size(&mut self, category: Category, size: usize) -> &mut Self {
        self.category_block_sizes.insert(category, size);
        self
    }

    /// ブロック(および、そこから割り当てられる領域)のアライメントを設定する.
    ///
    /// デフォルト値は`Alignment::min()`.
    pub fn alignment(&mut self, alignment: Alignment) -> &mut Self {
        self.alignment = alignment;
        self
    }

    /// 特定のカテゴリ用のアライメントを設定する.
    pub fn category_alignment(&mut self, category: Category, alignment: Alignment) -> &mut Self {
        self.category_alignments.insert(category, alignment);
        self
    }

    /// ブロック内の空き領域の管理方式を設定する.
    ///
    /// デフォルト値は`StrategyKind::IntrusiveList`.
    pub fn strategy(&mut self, kind: StrategyKind) -> &mut Self {
        self.slot.kind = kind;
        self
    }

    /// `StrategyKind::IntrusiveList`で使われるサイズ階層を設定する.
    ///
    /// デフォルト値は`SizeTiers::default()`.
    pub fn size_tiers(&mut self, tiers: SizeTiers) -> &mut Self {
        self.slot.tiers = tiers;
        self
    }

    /// `StrategyKind::IntrusiveList`で、空きノードを分割するために必要な余剰分の最小値を設定する.
    ///
    /// デフォルト値は`64`.
    pub fn min_split_size(&mut self, size: usize) -> &mut Self {
        self.slot.min_split_size = size;
        self
    }

    /// プールで扱う要求サイズの上限を設定する.
    ///
    /// この値を超える要求は、プールを経由せずに直接フォールバックアロケータに委譲される.
    ///
    /// デフォルトでは上限は無い.
    pub fn max_pooled_size(&mut self, size: usize) -> &mut Self {
        self.max_pooled_size = Some(size);
        self
    }

    /// フォールバックアロケータが失敗した場合に、生のシステム割当を使うかどうかを設定する.
    ///
    /// デフォルト値は`true`.
    pub fn raw_fallback(&mut self, enabled: bool) -> &mut Self {
        self.raw_fallback = enabled;
        self
    }

    /// ロガーを設定する.
    ///
    /// デフォルト値は`Logger::root(Discard, o!())`.
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// メトリクス用の共通設定を登録する.
    ///
    /// デフォルト値は`MetricBuilder::new()`.
    pub fn metrics(&mut self, metrics: MetricBuilder) -> &mut Self {
        self.metrics = metrics;
        self
    }

    /// 指定のフォールバックアロケータを用いて、新しい`AffinityAllocator`を生成する.
    ///
    /// # Errors
    ///
    /// ブロックサイズに`0`が設定されている場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    pub fn build<F: Fallback>(&self, fallback: F) -> Result<AffinityAllocator<F>> {
        track_assert_ne!(self.block_size, 0, ErrorKind::InvalidInput);
        for (category, &size) in &self.category_block_sizes {
            track_assert_ne!(size, 0, ErrorKind::InvalidInput; category);
        }

        let metrics = AllocatorMetrics::new(&self.metrics);
        info!(self.logger, "Allocator is created";
              "block_size" => self.block_size,
              "alignment" => self.alignment.as_usize(),
              "strategy" => format!("{:?}", self.slot.kind));
        let state = State {
            pools: BTreeMap::new(),
            index: BlockIndex::new(),
            fallback,
            raw: RawAllocations::new(),
        };
        Ok(AffinityAllocator {
            state: Mutex::new(state),
            config: self.clone(),
            logger: self.logger.clone(),
            metrics,
        })
    }

    pub(crate) fn block_size_of(&self, category: Category) -> usize {
        self.category_block_sizes
            .get(&category)
            .cloned()
            .unwrap_or(self.block_size)
    }

    pub(crate) fn alignment_of(&self, category: Category) -> Alignment {
        self.category_alignments
            .get(&category)
            .cloned()
            .unwrap_or(self.alignment)
    }

    pub(crate) fn is_pooled(&self, size: usize) -> bool {
        self.max_pooled_size.map_or(true, |max| size <= max)
    }
}
impl Default for AffinityAllocatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
