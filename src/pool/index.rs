use std::collections::BTreeMap;

use crate::Category;

/// アドレスから所有ブロックを逆引きするためのインデックス.
///
/// 全カテゴリのブロック群を、先頭アドレスの昇順で保持している.
/// ブロック同士のアドレス範囲が重なることはないので、
/// あるアドレスを含み得るブロックは、先頭アドレスがそのアドレス以下のものの中で最大のものに限られる.
#[derive(Debug, Clone, Default)]
pub struct BlockIndex {
    map: BTreeMap<usize, BlockEntry>,
}
impl BlockIndex {
    /// 新しい`BlockIndex`インスタンスを生成する.
    pub fn new() -> Self {
        Self::default()
    }

    /// `address`を含むブロックを検索する.
    ///
    /// 結果は`(ブロックの先頭アドレス, エントリ)`のペア.
    pub fn find(&self, address: usize) -> Option<(usize, BlockEntry)> {
        let (&base, &entry) = self.map.range(..=address).next_back()?;
        if address < entry.end {
            Some((base, entry))
        } else {
            None
        }
    }

    /// 新規ブロックを登録する.
    ///
    /// 既存のブロックとアドレス範囲が重なる場合には、何もせずに`false`を返す.
    pub fn insert(&mut self, base: usize, entry: BlockEntry) -> bool {
        if base >= entry.end || self.find(base).is_some() {
            return false;
        }
        if let Some((&next, _)) = self.map.range(base..).next() {
            if next < entry.end {
                return false;
            }
        }
        self.map.insert(base, entry);
        true
    }

    /// 登録されているブロックの数を返す.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// インデックスが空かどうかを判定する.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// 全てのエントリを削除する.
    pub fn clear(&mut self) {
        self.map.clear();
    }
}

/// インデックスのエントリ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    /// ブロックの終端アドレス(この値を含まない).
    pub end: usize,

    /// ブロックを所有するプールのカテゴリ.
    pub category: Category,

    /// プール内でのブロックの番号.
    pub block: usize,
}
