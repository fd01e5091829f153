use byteorder::{ByteOrder, NativeEndian};
use std::ptr::{self, NonNull};

use crate::block::Alignment;

/// ヘッダ等の読み書きに用いる一ワードのサイズ.
pub(crate) const WORD_SIZE: usize = 8;

/// 指定の境界に先頭位置が揃えられた、固定長の生のバイト列.
///
/// 領域自体の確保・解放は、このインスタンスの外側(i.e., フォールバックアロケータ)で行われる.
/// そのため、インスタンスを破棄しても領域は解放されない.
///
/// 保持する領域の一部は利用者に貸し出されるため、内容全体をスライスとして参照することはせず、
/// 管理用のワードの読み書きのみを、オフセット指定で行う.
#[derive(Debug)]
pub struct BlockMemory {
    ptr: NonNull<u8>,
    len: usize,
    alignment: Alignment,
}
unsafe impl Send for BlockMemory {}
impl BlockMemory {
    /// 既に確保済みの領域から`BlockMemory`インスタンスを生成する.
    ///
    /// # Safety
    ///
    /// - `ptr`から`len`バイトの領域が読み書き可能であること
    /// - `ptr`が`alignment`の境界に揃っていること
    /// - このインスタンスが存在する間、他者が管理用の領域に触れないこと
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize, alignment: Alignment) -> Self {
        debug_assert!(alignment.is_aligned(ptr.as_ptr() as usize));
        BlockMemory {
            ptr,
            len,
            alignment,
        }
    }

    /// 領域の先頭アドレスを返す.
    pub fn base(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// 領域の先頭ポインタを返す.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// 領域の長さ(バイト単位)を返す.
    pub fn len(&self) -> usize {
        self.len
    }

    /// 領域の長さが`0`かどうかを判定する.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 領域のアライメントを返す.
    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// `address`がこの領域内に含まれるかどうかを判定する.
    pub fn contains(&self, address: usize) -> bool {
        self.base() <= address && address < self.base() + self.len
    }

    /// `address`の、領域先頭からのオフセットを返す.
    ///
    /// 領域外のアドレスの場合には`None`が返される.
    pub fn offset_of(&self, address: usize) -> Option<usize> {
        if self.contains(address) {
            Some(address - self.base())
        } else {
            None
        }
    }

    /// 領域全体をゼロで埋める.
    ///
    /// 管理用のワードの読み込みが、未初期化の領域に及ばないようにするために使う.
    pub fn fill_zero(&mut self) {
        unsafe { ptr::write_bytes(self.ptr.as_ptr(), 0, self.len) }
    }

    /// 指定オフセット位置のポインタを返す.
    ///
    /// # Panics
    ///
    /// `offset`が領域の長さ以上の場合には、現在のスレッドがパニックする.
    pub fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset < self.len, "offset={}, len={}", offset, self.len);
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) }
    }

    /// 指定オフセット位置から一ワード分を読み込む.
    ///
    /// # Panics
    ///
    /// ワードが領域外にはみ出す場合には、現在のスレッドがパニックする.
    pub fn read_word(&self, offset: usize) -> u64 {
        assert!(offset + WORD_SIZE <= self.len, "offset={}", offset);
        let mut buf = [0; WORD_SIZE];
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), buf.as_mut_ptr(), WORD_SIZE);
        }
        NativeEndian::read_u64(&buf)
    }

    /// 指定オフセット位置に一ワード分を書き込む.
    ///
    /// # Panics
    ///
    /// ワードが領域外にはみ出す場合には、現在のスレッドがパニックする.
    pub fn write_word(&mut self, offset: usize, value: u64) {
        assert!(offset + WORD_SIZE <= self.len, "offset={}", offset);
        let mut buf = [0; WORD_SIZE];
        NativeEndian::write_u64(&mut buf, value);
        unsafe {
            ptr::copy_nonoverlapping(buf.as_ptr(), self.ptr.as_ptr().add(offset), WORD_SIZE);
        }
    }
}
