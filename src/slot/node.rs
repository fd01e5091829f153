//! Intrusive Node Header
use crate::block::{BlockMemory, WORD_SIZE};

/// ノードヘッダのサイズ(バイト単位).
pub const HEADER_SIZE: usize = WORD_SIZE * 3;

/// 空きノードのリンク情報のサイズ(バイト単位).
pub const LINKS_SIZE: usize = WORD_SIZE * 2;

/// リンクが存在しないことを示す値.
const NIL: u64 = u64::MAX;

/// 状態ワードの上位ビットに埋め込まれる識別子.
///
/// 利用者のデータをヘッダとして誤認しないための目印.
const STATUS_MAGIC: u64 = 0xB10C_FEED_0000_0000;

/// 状態ワードの下位2bit.
const STATUS_MASK: u64 = 0b11;

/// ノードの状態.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Free = 1,
    Allocated = 2,
}

/// ブロック内の各ノードの先頭に書き込まれるヘッダ.
///
/// 以下の三ワードで構成される:
///
/// - `prev_delta`: 物理的に直前のノードの先頭までの距離(先頭ノードでは`0`)
/// - `len`: ヘッダを含むノード全体の長さ
/// - 状態: `STATUS_MAGIC`と2bitの状態値の論理和
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub prev_delta: usize,
    pub len: usize,
    pub status: NodeStatus,
}
impl NodeHeader {
    /// `offset`位置のヘッダを読み込む.
    ///
    /// 状態ワードが不正な場合には`None`が返される.
    pub fn read_from(memory: &BlockMemory, offset: usize) -> Option<Self> {
        let status = memory.read_word(offset + WORD_SIZE * 2);
        if status & !STATUS_MASK != STATUS_MAGIC {
            return None;
        }
        let status = match status & STATUS_MASK {
            1 => NodeStatus::Free,
            2 => NodeStatus::Allocated,
            _ => return None,
        };
        Some(NodeHeader {
            prev_delta: memory.read_word(offset) as usize,
            len: memory.read_word(offset + WORD_SIZE) as usize,
            status,
        })
    }

    /// `offset`位置にヘッダを書き込む.
    pub fn write_to(&self, memory: &mut BlockMemory, offset: usize) {
        memory.write_word(offset, self.prev_delta as u64);
        memory.write_word(offset + WORD_SIZE, self.len as u64);
        memory.write_word(offset + WORD_SIZE * 2, STATUS_MAGIC | self.status as u64);
    }

    /// `offset`位置のヘッダの`prev_delta`のみを書き換える.
    pub fn write_prev_delta(memory: &mut BlockMemory, offset: usize, prev_delta: usize) {
        memory.write_word(offset, prev_delta as u64);
    }

    pub fn is_free(&self) -> bool {
        self.status == NodeStatus::Free
    }
}

/// 空きノードのヘッダ直後に書き込まれる、フリーリスト用のリンク.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeLinks {
    pub next: Option<usize>,
    pub prev: Option<usize>,
}
impl FreeLinks {
    pub fn read_from(memory: &BlockMemory, offset: usize) -> Self {
        FreeLinks {
            next: decode_link(memory.read_word(offset + HEADER_SIZE)),
            prev: decode_link(memory.read_word(offset + HEADER_SIZE + WORD_SIZE)),
        }
    }

    pub fn write_to(&self, memory: &mut BlockMemory, offset: usize) {
        Self::write_next(memory, offset, self.next);
        Self::write_prev(memory, offset, self.prev);
    }

    pub fn write_next(memory: &mut BlockMemory, offset: usize, next: Option<usize>) {
        memory.write_word(offset + HEADER_SIZE, encode_link(next));
    }

    pub fn write_prev(memory: &mut BlockMemory, offset: usize, prev: Option<usize>) {
        memory.write_word(offset + HEADER_SIZE + WORD_SIZE, encode_link(prev));
    }
}

fn encode_link(link: Option<usize>) -> u64 {
    link.map_or(NIL, |o| o as u64)
}

fn decode_link(word: u64) -> Option<usize> {
    if word == NIL {
        None
    } else {
        Some(word as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Alignment, TestMemory};

    #[test]
    fn it_works() {
        let mut m = TestMemory::new(128, Alignment::min());
        let memory = m.get_mut();

        let header = NodeHeader {
            prev_delta: 48,
            len: 80,
            status: NodeStatus::Allocated,
        };
        header.write_to(memory, 48);
        assert_eq!(NodeHeader::read_from(memory, 48), Some(header));

        NodeHeader::write_prev_delta(memory, 48, 8);
        assert_eq!(NodeHeader::read_from(memory, 48).map(|h| h.prev_delta), Some(8));

        let links = FreeLinks {
            next: Some(96),
            prev: None,
        };
        links.write_to(memory, 0);
        assert_eq!(FreeLinks::read_from(memory, 0), links);
    }

    #[test]
    fn garbage_is_not_a_header() {
        let mut m = TestMemory::new(64, Alignment::min());
        let memory = m.get_mut();
        memory.write_word(16, 0x1234);
        assert_eq!(NodeHeader::read_from(memory, 0), None);

        memory.write_word(16, STATUS_MAGIC | 3);
        assert_eq!(NodeHeader::read_from(memory, 0), None);
    }
}
