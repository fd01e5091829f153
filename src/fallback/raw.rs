use std::alloc::{self, Layout};
use std::cmp;
use std::collections::BTreeMap;
use std::ptr::NonNull;

use crate::block::Alignment;

/// 生のシステム割当の記録.
///
/// フォールバックアロケータも失敗した場合の、最後の割当経路として使われる.
/// 破棄時には、未解放の領域が全て解放される.
#[derive(Debug, Default)]
pub(crate) struct RawAllocations {
    layouts: BTreeMap<usize, Layout>,
}
impl RawAllocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, size: usize, alignment: Alignment) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(cmp::max(size, 1), alignment.as_usize()).ok()?;
        let ptr = NonNull::new(unsafe { alloc::alloc(layout) })?;
        self.layouts.insert(ptr.as_ptr() as usize, layout);
        Some(ptr)
    }

    /// 記録にないポインタの場合には`false`を返す.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) -> bool {
        if let Some(layout) = self.layouts.remove(&(ptr.as_ptr() as usize)) {
            alloc::dealloc(ptr.as_ptr(), layout);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }
}
impl Drop for RawAllocations {
    fn drop(&mut self) {
        for (address, layout) in std::mem::take(&mut self.layouts) {
            unsafe { alloc::dealloc(address as *mut u8, layout) };
        }
    }
}
