//! プールで扱えない割当の委譲先.
//!
//! [`Fallback`]は二つの用途で使われる:
//!
//! - 各プールのブロック用のバッファの確保・返却
//! - プールが応じられない割当要求(巨大な要求、プールの枯渇)の処理
//!
//! フォールバックアロケータも失敗した場合には、[`AffinityAllocator`]内部の生のシステム割当が使われる.
//!
//! [`Fallback`]: ./trait.Fallback.html
//! [`AffinityAllocator`]: ../allocator/struct.AffinityAllocator.html
use std::fmt;
use std::ptr::NonNull;

pub use self::system::SystemFallback;

pub(crate) use self::raw::RawAllocations;

use crate::block::Alignment;

mod raw;
mod system;

/// フォールバックアロケータが実装すべきトレイト.
///
/// 全てのメソッドは、`AffinityAllocator`のロックを保持した状態で呼び出される.
pub trait Fallback: fmt::Debug + Send {
    /// `alignment`の境界に揃った`size`バイトの領域を確保する.
    ///
    /// 確保できない場合には`None`を返す.
    fn allocate(&mut self, size: usize, alignment: Alignment) -> Option<NonNull<u8>>;

    /// `ptr`が指す領域を解放する.
    ///
    /// `ptr`がこのアロケータによって確保されたものではない場合には、何もせずに`false`を返すこと.
    ///
    /// # Safety
    ///
    /// `ptr`が指す領域が、以後参照されないこと.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) -> bool;
}
impl<F: Fallback + ?Sized> Fallback for Box<F> {
    fn allocate(&mut self, size: usize, alignment: Alignment) -> Option<NonNull<u8>> {
        (**self).allocate(size, alignment)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) -> bool {
        (**self).deallocate(ptr, size)
    }
}
