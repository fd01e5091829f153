use std::fmt;
use std::ptr::NonNull;

use crate::block::{Alignment, BlockMemory};
use crate::slot::{BlockUsage, SlotOptions, SlotStrategy};
use crate::Result;

/// 固定長のメモリブロック.
///
/// 一つの[`BlockMemory`]と、その空き領域を管理する一つのスロット戦略を保持する.
///
/// ブロック内の全てのバイトは、常に「割当済み」か「空き」のいずれか一方に分類されている.
///
/// ブロックが縮小されたり、個別に返却されることはない.
///
/// [`BlockMemory`]: ./struct.BlockMemory.html
pub struct MemoryBlock {
    memory: BlockMemory,
    slots: Box<dyn SlotStrategy>,
}
impl MemoryBlock {
    /// 新しい`MemoryBlock`インスタンスを生成する.
    ///
    /// `memory`の内容はゼロ埋めされた上で、`options`に従った戦略の管理下に置かれる.
    pub fn new(mut memory: BlockMemory, options: &SlotOptions) -> Result<Self> {
        memory.fill_zero();
        let slots = track!(options.build(&mut memory))?;
        Ok(MemoryBlock { memory, slots })
    }

    /// ブロックの先頭アドレスを返す.
    pub fn base(&self) -> usize {
        self.memory.base()
    }

    /// ブロックのサイズ(バイト単位)を返す.
    pub fn size(&self) -> usize {
        self.memory.len()
    }

    /// ブロックのアライメントを返す.
    pub fn alignment(&self) -> Alignment {
        self.memory.alignment()
    }

    /// `address`がこのブロックの範囲内かどうかを判定する.
    pub fn contains(&self, address: usize) -> bool {
        self.memory.contains(address)
    }

    /// `size`バイト分の領域を割り当てる.
    ///
    /// 返されるポインタはアライメント境界に揃っており、領域全体がブロック内に収まっている.
    ///
    /// ブロック内に十分な空きがない場合には`None`が返される.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let offset = self.slots.reserve(&mut self.memory, size)?;
        Some(self.memory.ptr_at(offset))
    }

    /// `ptr`が指す割当済みの領域を解放する.
    ///
    /// `ptr`がブロックの範囲外、ないし割当済みの領域として認識できない場合には、
    /// 何も変更せずに`false`を返す.
    pub fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) -> bool {
        let offset = match self.memory.offset_of(ptr.as_ptr() as usize) {
            None => return false,
            Some(offset) => offset,
        };
        if !self.alignment().is_aligned(offset) {
            return false;
        }
        self.slots.release(&mut self.memory, offset, size)
    }

    /// 管理情報の整合性を検査する.
    pub fn validate(&self) -> Result<()> {
        track!(self.slots.validate(&self.memory))
    }

    /// ブロックの使用状況を返す.
    pub fn usage(&self) -> BlockUsage {
        self.slots.usage(&self.memory)
    }

    /// ブロックを破棄して、保持していた領域を返す.
    pub fn into_memory(self) -> BlockMemory {
        self.memory
    }
}
impl fmt::Debug for MemoryBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemoryBlock")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("size", &self.size())
            .field("slots", &self.slots)
            .finish()
    }
}
