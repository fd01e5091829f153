//! Intrusive Free List.
use std::cmp;
use std::collections::BTreeSet;

use super::node::{FreeLinks, NodeHeader, NodeStatus, HEADER_SIZE, LINKS_SIZE};
use crate::block::{Alignment, BlockMemory};
use crate::slot::{BlockUsage, SizeTier, SizeTiers, SlotStrategy};
use crate::{ErrorKind, Result};

/// 空き領域自体の中に管理情報を埋め込む方式の空き領域管理.
///
/// ブロックは、物理的に隙間なく並んだノード群に分割される.
/// 各ノードの先頭には`{直前ノードまでの距離, 長さ, 状態}`から成るヘッダが書き込まれており、
/// 割当済みノードでは、ヘッダの直後が利用者に渡される.
///
/// 空きノードは、ヘッダの直後に前後の空きノードへのリンクを持ち、
/// 自身の長さに対応するサイズ階層の双方向リストに繋がれる.
///
/// # 割当戦略
///
/// 要求を満たし得る階層を小さい順に調べ、各階層のリストを先頭から辿って、
/// 最初に見つかった十分な長さのノードを使う(FirstFit).
/// 余剰分が`min_split_size`以上なら、ノードを分割して後半を空きノードとして残す.
///
/// # 解放
///
/// 解放されたノードは、物理的に隣接する空きノードと結合された上で、対応する階層のリストに戻される.
/// そのため「隣接する二つの空きノード」は存在しない.
#[derive(Debug)]
pub struct IntrusiveFreeList {
    capacity: usize,
    alignment: Alignment,
    header_size: usize,
    min_node_len: usize,
    min_split_size: usize,
    tiers: Vec<TierList>,
}
impl IntrusiveFreeList {
    /// `memory`全体を一つの空きノードとする`IntrusiveFreeList`を生成する.
    ///
    /// # Errors
    ///
    /// `memory`の長さが最小のノード長に満たない場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    pub fn new(memory: &mut BlockMemory, tiers: &SizeTiers, min_split_size: usize) -> Result<Self> {
        let alignment = memory.alignment();
        let capacity = alignment.floor_align(memory.len());
        let min_node_len = Self::min_node_len(alignment);
        track_assert!(capacity >= min_node_len, ErrorKind::InvalidInput; capacity, min_node_len);

        let mut list = IntrusiveFreeList {
            capacity,
            alignment,
            header_size: Self::header_size(alignment),
            min_node_len,
            min_split_size: alignment.ceil_align(cmp::max(min_split_size, min_node_len)),
            tiers: tiers
                .as_slice()
                .iter()
                .map(|&tier| TierList {
                    tier,
                    head: None,
                    count: 0,
                })
                .collect(),
        };
        let header = NodeHeader {
            prev_delta: 0,
            len: capacity,
            status: NodeStatus::Free,
        };
        header.write_to(memory, 0);
        list.push_free(memory, 0, capacity);
        Ok(list)
    }

    /// ヘッダ部のサイズを返す.
    ///
    /// 利用者に渡す位置がアライメント境界に揃うように、ヘッダ自体のサイズが切り上げられている.
    pub fn header_size(alignment: Alignment) -> usize {
        alignment.ceil_align(HEADER_SIZE)
    }

    /// ノード長の最小値を返す.
    ///
    /// 空きノードになった際に、リンク情報を格納できるだけの長さが必要となる.
    pub fn min_node_len(alignment: Alignment) -> usize {
        alignment.ceil_align(HEADER_SIZE + LINKS_SIZE)
    }

    /// 管理している領域のサイズを返す.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 各階層の`(階層, 空きノード数)`を返す.
    pub fn tier_counts(&self) -> Vec<(SizeTier, usize)> {
        self.tiers.iter().map(|t| (t.tier, t.count)).collect()
    }

    /// 空きノードの総数を返す.
    pub fn free_node_count(&self) -> usize {
        self.tiers.iter().map(|t| t.count).sum()
    }

    /// `size`バイト分の領域を確保し、その(利用者に渡す)開始オフセットを返す.
    pub fn reserve(&mut self, memory: &mut BlockMemory, size: usize) -> Option<usize> {
        let needed = self
            .alignment
            .checked_ceil_align(cmp::max(size, 1))
            .and_then(|size| size.checked_add(self.header_size))?;
        let needed = cmp::max(needed, self.min_node_len);
        for t in 0..self.tiers.len() {
            if self.tiers[t].tier.max < needed || self.tiers[t].count == 0 {
                continue;
            }
            let mut cursor = self.tiers[t].head;
            while let Some(offset) = cursor {
                let header = NodeHeader::read_from(memory, offset)?;
                if header.len >= needed {
                    let offset = self.take(memory, offset, header, needed);
                    return Some(offset + self.header_size);
                }
                cursor = FreeLinks::read_from(memory, offset).next;
            }
        }
        None
    }

    /// `offset`(`reserve()`が返した値)から始まる確保済みの領域を解放する.
    ///
    /// 物理的に隣接する空きノードが存在する場合には、それらと結合される.
    pub fn release(&mut self, memory: &mut BlockMemory, offset: usize, size: usize) -> bool {
        let offset = match self.allocated_node_at(memory, offset, size) {
            None => return false,
            Some(offset) => offset,
        };
        let header = match NodeHeader::read_from(memory, offset) {
            None => return false,
            Some(header) => header,
        };

        let mut start = offset;
        let mut len = header.len;
        let mut prev_delta = header.prev_delta;

        let next = offset + header.len;
        if next + self.min_node_len <= self.capacity {
            if let Some(next_header) = NodeHeader::read_from(memory, next) {
                if next_header.is_free() {
                    self.unlink(memory, next, next_header.len);
                    len += next_header.len;
                }
            }
        }
        if prev_delta > 0 {
            let prev = offset - prev_delta;
            if let Some(prev_header) = NodeHeader::read_from(memory, prev) {
                if prev_header.is_free() {
                    self.unlink(memory, prev, prev_header.len);
                    start = prev;
                    len += prev_header.len;
                    prev_delta = prev_header.prev_delta;
                }
            }
        }

        let merged = NodeHeader {
            prev_delta,
            len,
            status: NodeStatus::Free,
        };
        merged.write_to(memory, start);
        self.fix_successor(memory, start, len);
        self.push_free(memory, start, len);
        true
    }

    /// ノード群およびフリーリスト群の整合性を検査する.
    ///
    /// 全ノードを先頭から終端まで一度ずつ辿り、以下を確認する:
    ///
    /// - 各ノードの`prev_delta`が、物理的に直前のノードと一致している
    /// - ノードが領域外にはみ出していない、かつ領域の終端でちょうど終わる
    /// - 隣接する空きノードが存在しない
    /// - 各階層のリストが領域外を指しておらず、終端する
    /// - 各階層のリストに含まれるノードが、物理的な空きノードの先頭と一致し、重複していない
    pub fn validate(&self, memory: &BlockMemory) -> Result<()> {
        let mut offset = 0;
        let mut prev_len = 0;
        let mut prev_free = false;
        let mut free_nodes = BTreeSet::new();
        while offset < self.capacity {
            track_assert!(
                offset + self.min_node_len <= self.capacity,
                ErrorKind::CorruptionDetected; offset
            );
            let header = track_assert_some!(
                NodeHeader::read_from(memory, offset),
                ErrorKind::CorruptionDetected
            );
            track_assert_eq!(header.prev_delta, prev_len, ErrorKind::CorruptionDetected);
            track_assert!(
                header.len >= self.min_node_len && self.alignment.is_aligned(header.len),
                ErrorKind::CorruptionDetected; offset, header.len
            );
            track_assert!(
                header.len <= self.capacity - offset,
                ErrorKind::CorruptionDetected; offset, header.len
            );
            track_assert!(
                !(prev_free && header.is_free()),
                ErrorKind::CorruptionDetected; offset
            );
            if header.is_free() {
                free_nodes.insert(offset);
            }
            prev_len = header.len;
            prev_free = header.is_free();
            offset += header.len;
        }
        track_assert_eq!(offset, self.capacity, ErrorKind::CorruptionDetected);

        for tier in &self.tiers {
            let mut cursor = tier.head;
            let mut prev = None;
            let mut count = 0;
            while let Some(node) = cursor {
                track_assert!(count < tier.count, ErrorKind::CorruptionDetected; node);
                track_assert!(
                    self.alignment.is_aligned(node) && node + self.min_node_len <= self.capacity,
                    ErrorKind::CorruptionDetected; node
                );
                let header = track_assert_some!(
                    NodeHeader::read_from(memory, node),
                    ErrorKind::CorruptionDetected
                );
                track_assert!(header.is_free(), ErrorKind::CorruptionDetected; node);
                track_assert!(free_nodes.remove(&node), ErrorKind::CorruptionDetected; node);
                track_assert!(
                    tier.tier.contains(header.len),
                    ErrorKind::CorruptionDetected; node, header.len
                );
                let links = FreeLinks::read_from(memory, node);
                track_assert_eq!(links.prev, prev, ErrorKind::CorruptionDetected);
                prev = Some(node);
                cursor = links.next;
                count += 1;
            }
            track_assert_eq!(count, tier.count, ErrorKind::CorruptionDetected);
        }

        // どのリストにも繋がっていない空きノード
        track_assert!(free_nodes.is_empty(), ErrorKind::CorruptionDetected; free_nodes);
        Ok(())
    }

    /// ノードを先頭から辿って使用状況を集計する.
    pub fn usage(&self, memory: &BlockMemory) -> BlockUsage {
        let mut usage = BlockUsage {
            capacity: self.capacity,
            ..BlockUsage::default()
        };
        let mut offset = 0;
        while offset + self.min_node_len <= self.capacity {
            match NodeHeader::read_from(memory, offset) {
                Some(header) if header.len > 0 => {
                    usage.add_run(header.len, header.is_free());
                    offset += header.len;
                }
                _ => break,
            }
        }
        usage
    }

    // 空きノード`offset`をリストから外し、先頭`needed`バイトを割当済みにする.
    fn take(
        &mut self,
        memory: &mut BlockMemory,
        offset: usize,
        mut header: NodeHeader,
        needed: usize,
    ) -> usize {
        self.unlink(memory, offset, header.len);
        if header.len - needed >= self.min_split_size {
            let rest = offset + needed;
            let rest_len = header.len - needed;
            let rest_header = NodeHeader {
                prev_delta: needed,
                len: rest_len,
                status: NodeStatus::Free,
            };
            rest_header.write_to(memory, rest);
            self.fix_successor(memory, rest, rest_len);
            self.push_free(memory, rest, rest_len);
            header.len = needed;
        }
        header.status = NodeStatus::Allocated;
        header.write_to(memory, offset);
        offset
    }

    // 利用者に渡した位置`payload`に対応する、割当済みノードの位置を返す.
    //
    // 物理的に直前のノードとの整合性も確認する.
    fn allocated_node_at(&self, memory: &BlockMemory, payload: usize, size: usize) -> Option<usize> {
        if payload < self.header_size {
            return None;
        }
        let offset = payload - self.header_size;
        if !self.alignment.is_aligned(offset) || offset + self.min_node_len > self.capacity {
            return None;
        }
        let header = NodeHeader::read_from(memory, offset)?;
        if header.status != NodeStatus::Allocated
            || header.len < self.min_node_len
            || header.len > self.capacity - offset
            || header.len - self.header_size < size
        {
            return None;
        }
        if offset == 0 {
            if header.prev_delta != 0 {
                return None;
            }
        } else {
            if header.prev_delta == 0 || header.prev_delta > offset {
                return None;
            }
            let prev = NodeHeader::read_from(memory, offset - header.prev_delta)?;
            if prev.len != header.prev_delta {
                return None;
            }
        }
        Some(offset)
    }

    // 物理的に直後のノードの`prev_delta`を`len`に更新する.
    fn fix_successor(&self, memory: &mut BlockMemory, offset: usize, len: usize) {
        let next = offset + len;
        if next < self.capacity {
            NodeHeader::write_prev_delta(memory, next, len);
        }
    }

    fn tier_index(&self, len: usize) -> usize {
        self.tiers
            .iter()
            .position(|t| t.tier.contains(len))
            .unwrap_or(self.tiers.len() - 1)
    }

    fn push_free(&mut self, memory: &mut BlockMemory, offset: usize, len: usize) {
        let t = self.tier_index(len);
        let head = self.tiers[t].head;
        let links = FreeLinks {
            next: head,
            prev: None,
        };
        links.write_to(memory, offset);
        if let Some(head) = head {
            FreeLinks::write_prev(memory, head, Some(offset));
        }
        self.tiers[t].head = Some(offset);
        self.tiers[t].count += 1;
    }

    fn unlink(&mut self, memory: &mut BlockMemory, offset: usize, len: usize) {
        let t = self.tier_index(len);
        let links = FreeLinks::read_from(memory, offset);
        match links.prev {
            Some(prev) => FreeLinks::write_next(memory, prev, links.next),
            None => self.tiers[t].head = links.next,
        }
        if let Some(next) = links.next {
            FreeLinks::write_prev(memory, next, links.prev);
        }
        self.tiers[t].count -= 1;
    }
}
impl SlotStrategy for IntrusiveFreeList {
    fn reserve(&mut self, memory: &mut BlockMemory, size: usize) -> Option<usize> {
        IntrusiveFreeList::reserve(self, memory, size)
    }

    fn release(&mut self, memory: &mut BlockMemory, offset: usize, size: usize) -> bool {
        IntrusiveFreeList::release(self, memory, offset, size)
    }

    fn validate(&self, memory: &BlockMemory) -> Result<()> {
        track!(IntrusiveFreeList::validate(self, memory))
    }

    fn usage(&self, memory: &BlockMemory) -> BlockUsage {
        IntrusiveFreeList::usage(self, memory)
    }
}

/// 一つのサイズ階層のリスト.
#[derive(Debug, Clone)]
struct TierList {
    tier: SizeTier,
    head: Option<usize>,
    count: usize,
}
