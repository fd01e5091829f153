use std::fmt;
use std::str::FromStr;
use trackable::error::ErrorKindExt;

use crate::{Error, ErrorKind, Result};

/// 割当のカテゴリ(affinity).
///
/// 割当要求をどの[`BlockPool`]で処理するかを選択するための、振る舞いを持たない分類キー.
///
/// カテゴリの集合は開いており、未知のカテゴリは最初に使用された時点でプールが生成される.
///
/// [`BlockPool`]: ./pool/struct.BlockPool.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Category(u32);
impl Category {
    /// 特に指定がない割当用のカテゴリ.
    pub const DEFAULT: Category = Category(0);

    /// 配列やバッファ等のデータ用のカテゴリ.
    pub const DATA: Category = Category(1);

    /// グラフ構造のノード等、長寿命のオブジェクト用のカテゴリ.
    pub const NODE: Category = Category(2);

    /// 一時的な作業領域用のカテゴリ.
    pub const SCRATCH: Category = Category(3);

    /// 新しい`Category`インスタンスを生成する.
    ///
    /// # Examples
    ///
    /// ```
    /// use affinity_alloc::Category;
    ///
    /// assert_eq!(Category::new(1), Category::DATA);
    /// assert_eq!(Category::new(42).as_u32(), 42);
    /// ```
    pub const fn new(id: u32) -> Self {
        Category(id)
    }

    /// カテゴリの値を返す.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}
impl Default for Category {
    fn default() -> Self {
        Category::DEFAULT
    }
}
impl From<u32> for Category {
    fn from(f: u32) -> Self {
        Category(f)
    }
}
impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Category::DEFAULT => write!(f, "default"),
            Category::DATA => write!(f, "data"),
            Category::NODE => write!(f, "node"),
            Category::SCRATCH => write!(f, "scratch"),
            Category(id) => write!(f, "#{}", id),
        }
    }
}
impl FromStr for Category {
    type Err = Error;

    /// `Display`の出力形式、ないし10進数の値を受け付ける.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(Category::DEFAULT),
            "data" => Ok(Category::DATA),
            "node" => Ok(Category::NODE),
            "scratch" => Ok(Category::SCRATCH),
            _ => {
                let digits = s.trim_start_matches('#');
                let id = track!(digits
                    .parse::<u32>()
                    .map_err(|e| Error::from(ErrorKind::InvalidInput.cause(e))))?;
                Ok(Category(id))
            }
        }
    }
}
