use std::alloc::{self, Layout};
use std::cmp;
use std::collections::BTreeMap;
use std::ptr::NonNull;

use crate::block::Alignment;
use crate::fallback::Fallback;

/// 標準のグローバルアロケータを用いた`Fallback`実装.
///
/// 自身が確保した領域を全て記録しており、見覚えのないポインタの解放要求は拒否する.
///
/// インスタンスの破棄時には、未解放の領域が全て解放される.
#[derive(Debug, Default)]
pub struct SystemFallback {
    outstanding: BTreeMap<usize, Layout>,
    limit: Option<usize>,
    used: usize,
}
impl SystemFallback {
    /// 新しい`SystemFallback`インスタンスを生成する.
    pub fn new() -> Self {
        Self::default()
    }

    /// 同時に確保可能なバイト数に上限を設けた`SystemFallback`インスタンスを生成する.
    ///
    /// 上限を超える割当要求には`None`が返される.
    ///
    /// # Examples
    ///
    /// ```
    /// use affinity_alloc::block::Alignment;
    /// use affinity_alloc::fallback::{Fallback, SystemFallback};
    ///
    /// let mut fallback = SystemFallback::with_limit(1024);
    /// let ptr = fallback.allocate(1000, Alignment::min()).unwrap();
    /// assert!(fallback.allocate(100, Alignment::min()).is_none());
    ///
    /// assert!(unsafe { fallback.deallocate(ptr, 1000) });
    /// assert!(fallback.allocate(100, Alignment::min()).is_some());
    /// ```
    pub fn with_limit(limit: usize) -> Self {
        SystemFallback {
            outstanding: BTreeMap::new(),
            limit: Some(limit),
            used: 0,
        }
    }

    /// 現在確保中のバイト数を返す.
    pub fn used_bytes(&self) -> usize {
        self.used
    }

    /// 現在確保中の領域の数を返す.
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }
}
impl Fallback for SystemFallback {
    fn allocate(&mut self, size: usize, alignment: Alignment) -> Option<NonNull<u8>> {
        let size = cmp::max(size, 1);
        if let Some(limit) = self.limit {
            if self.used.checked_add(size).map_or(true, |used| used > limit) {
                return None;
            }
        }
        let layout = Layout::from_size_align(size, alignment.as_usize()).ok()?;
        let ptr = NonNull::new(unsafe { alloc::alloc(layout) })?;
        self.outstanding.insert(ptr.as_ptr() as usize, layout);
        self.used += size;
        Some(ptr)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) -> bool {
        let address = ptr.as_ptr() as usize;
        match self.outstanding.get(&address) {
            Some(layout) if size <= layout.size() => {}
            _ => return false,
        }
        if let Some(layout) = self.outstanding.remove(&address) {
            self.used -= layout.size();
            alloc::dealloc(ptr.as_ptr(), layout);
        }
        true
    }
}
impl Drop for SystemFallback {
    fn drop(&mut self) {
        for (address, layout) in std::mem::take(&mut self.outstanding) {
            unsafe { alloc::dealloc(address as *mut u8, layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;

    #[test]
    fn it_works() -> TestResult {
        let mut fallback = SystemFallback::new();
        let alignment = track!(Alignment::new(64))?;
        let a = fallback.allocate(100, alignment).unwrap();
        let b = fallback.allocate(0, alignment).unwrap();
        assert!(alignment.is_aligned(a.as_ptr() as usize));
        assert_eq!(fallback.outstanding_count(), 2);
        assert_eq!(fallback.used_bytes(), 101);

        unsafe {
            assert!(!fallback.deallocate(a, 101)); // サイズ超過
            assert!(fallback.deallocate(a, 100));
            assert!(!fallback.deallocate(a, 100)); // 二重解放
        }
        assert_eq!(fallback.outstanding_count(), 1);

        // `b`は破棄時に解放される
        let _ = b;
        Ok(())
    }

    #[test]
    fn unknown_pointer_is_declined() {
        let mut fallback = SystemFallback::new();
        let mut local = 0u64;
        let ptr = NonNull::new(&mut local as *mut u64 as *mut u8).unwrap();
        assert!(!unsafe { fallback.deallocate(ptr, 8) });
    }

    #[test]
    fn limit_works() {
        let mut fallback = SystemFallback::with_limit(100);
        assert!(fallback.allocate(101, Alignment::min()).is_none());
        let a = fallback.allocate(60, Alignment::min()).unwrap();
        assert!(fallback.allocate(60, Alignment::min()).is_none());
        assert!(fallback.allocate(40, Alignment::min()).is_some());
        assert!(unsafe { fallback.deallocate(a, 60) });
        assert_eq!(fallback.used_bytes(), 40);
    }
}
