//! アライメントおよびメモリブロック関連の構成要素.
use crate::{ErrorKind, Result};

pub use self::memory::BlockMemory;
pub use self::memory_block::MemoryBlock;

#[cfg(test)]
pub(crate) use self::memory::tests::TestMemory;
pub(crate) use self::memory::WORD_SIZE;

mod memory;
mod memory_block;

/// 割当結果のアライメントを表現するための構造体.
///
/// ブロックの先頭アドレス、およびブロック内の全ての部分領域の開始位置と長さは、
/// `Alignment`によって指定された境界に揃えられる.
///
/// 指定された境界にアライメントを行うための補助メソッド群も提供している.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Alignment(usize);
impl Alignment {
    /// 許容されるアライメントの最小値(一ワード).
    ///
    /// また`Alignment::default()`で使われる値でもある.
    pub const MIN: usize = 8;

    /// 許容されるアライメントの最大値.
    pub const MAX: usize = 4096;

    /// 許容可能な最小のアライメントを持つ`Alignment`インスタンスを返す.
    ///
    /// # Examples
    ///
    /// ```
    /// use affinity_alloc::block::Alignment;
    ///
    /// assert_eq!(Alignment::min().as_usize(), Alignment::MIN);
    /// ```
    pub fn min() -> Self {
        Alignment(Self::MIN)
    }

    /// 指定された値のアライメントを表現する`Alignment`インスタンスを生成する.
    ///
    /// # Errors
    ///
    /// 以下の場合には、種類が`ErrorKind::InvalidInput`のエラーが返される:
    ///
    /// - `alignment`が2の冪ではない
    /// - `alignment`が`Alignment::MIN`未満、ないし`Alignment::MAX`を超えている
    ///
    /// # Examples
    ///
    /// ```
    /// use affinity_alloc::ErrorKind;
    /// use affinity_alloc::block::Alignment;
    ///
    /// assert_eq!(Alignment::new(8).ok().map(|a| a.as_usize()), Some(8));
    /// assert_eq!(Alignment::new(64).ok().map(|a| a.as_usize()), Some(64));
    ///
    /// assert_eq!(Alignment::new(4).err().map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
    /// assert_eq!(Alignment::new(24).err().map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
    /// ```
    #[allow(clippy::new_ret_no_self)]
    pub fn new(alignment: usize) -> Result<Self> {
        track_assert!(alignment.is_power_of_two(), ErrorKind::InvalidInput; alignment);
        track_assert!(alignment >= Self::MIN, ErrorKind::InvalidInput; alignment);
        track_assert!(alignment <= Self::MAX, ErrorKind::InvalidInput; alignment);
        Ok(Alignment(alignment))
    }

    /// 指定位置より後方の最初の境界位置を返す.
    ///
    /// # Examples
    ///
    /// ```
    /// use affinity_alloc::block::Alignment;
    ///
    /// let alignment = Alignment::new(8).unwrap();
    /// assert_eq!(alignment.ceil_align(0), 0);
    /// assert_eq!(alignment.ceil_align(1), 8);
    /// assert_eq!(alignment.ceil_align(8), 8);
    /// ```
    pub fn ceil_align(self, position: usize) -> usize {
        (position + self.0 - 1) & !(self.0 - 1)
    }

    /// `ceil_align`と同様だが、結果が`usize`の範囲に収まらない場合には`None`を返す.
    ///
    /// # Examples
    ///
    /// ```
    /// use affinity_alloc::block::Alignment;
    ///
    /// let alignment = Alignment::new(8).unwrap();
    /// assert_eq!(alignment.checked_ceil_align(1), Some(8));
    /// assert_eq!(alignment.checked_ceil_align(usize::MAX - 7), Some(usize::MAX - 7));
    /// assert_eq!(alignment.checked_ceil_align(usize::MAX - 3), None);
    /// ```
    pub fn checked_ceil_align(self, position: usize) -> Option<usize> {
        position
            .checked_add(self.0 - 1)
            .map(|n| n & !(self.0 - 1))
    }

    /// 指定位置より前方の最初の境界位置を返す.
    ///
    /// # Examples
    ///
    /// ```
    /// use affinity_alloc::block::Alignment;
    ///
    /// let alignment = Alignment::new(8).unwrap();
    /// assert_eq!(alignment.floor_align(0), 0);
    /// assert_eq!(alignment.floor_align(7), 0);
    /// assert_eq!(alignment.floor_align(8), 8);
    /// ```
    pub fn floor_align(self, position: usize) -> usize {
        position & !(self.0 - 1)
    }

    /// アライメント値を`usize`に変換して返す.
    pub fn as_usize(self) -> usize {
        self.0
    }

    /// 指定位置が境界に沿っているかどうかを判定する.
    ///
    /// # Examples
    ///
    /// ```
    /// use affinity_alloc::block::Alignment;
    ///
    /// let alignment = Alignment::new(16).unwrap();
    /// assert!(alignment.is_aligned(0));
    /// assert!(alignment.is_aligned(32));
    ///
    /// assert!(!alignment.is_aligned(8));
    /// assert!(!alignment.is_aligned(17));
    /// ```
    pub fn is_aligned(self, position: usize) -> bool {
        position & (self.0 - 1) == 0
    }
}
impl Default for Alignment {
    fn default() -> Self {
        Self::min()
    }
}
