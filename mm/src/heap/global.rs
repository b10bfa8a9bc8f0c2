//! Глобальный аллокатор / Global allocator adapter
//!
//! `SlabHeap` под spin-локом. Выравнивание достигается запасом в
//! `align - 1` байт; `dealloc` находит блок по любому адресу внутри payload.
//! A `SlabHeap` behind a spin lock. Alignment is met by over-requesting
//! `align - 1` bytes; `dealloc` finds the block from any address inside it.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use spin::{Mutex, MutexGuard};

use super::{HeapConfig, HeapStats, SlabHeap};
use crate::error::HeapResult;
use crate::pmm::{FrameAllocator, PAGE_SIZE};
use crate::VirtAddr;

pub struct LockedHeap<P: FrameAllocator> {
    inner: Mutex<Option<SlabHeap<P>>>,
}

impl<P: FrameAllocator> LockedHeap<P> {
    /// Пустой; до `install` все выделения возвращают null.
    /// Empty; every allocation returns null until a heap is installed.
    pub const fn empty() -> Self {
        Self { inner: Mutex::new(None) }
    }

    pub fn init(&self, pages: P, config: HeapConfig) -> HeapResult<()> {
        self.install(SlabHeap::init(pages, config)?);
        Ok(())
    }

    pub fn install(&self, heap: SlabHeap<P>) {
        *self.inner.lock() = Some(heap);
    }

    pub fn lock(&self) -> MutexGuard<'_, Option<SlabHeap<P>>> {
        self.inner.lock()
    }

    pub fn stats(&self) -> Option<HeapStats> {
        self.inner.lock().as_ref().map(SlabHeap::stats)
    }
}

unsafe impl<P: FrameAllocator> GlobalAlloc for LockedHeap<P> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > PAGE_SIZE {
            return ptr::null_mut();
        }
        let Some(request) = layout.size().checked_add(layout.align() - 1) else {
            return ptr::null_mut();
        };

        let mut guard = self.inner.lock();
        let Some(heap) = guard.as_mut() else {
            return ptr::null_mut();
        };
        match heap.alloc(request) {
            Ok(payload) => {
                let align = layout.align() as u64;
                let addr = (payload.as_u64() + align - 1) & !(align - 1);
                addr as *mut u8
            }
            Err(e) => {
                log::warn!("heap: {} ({} bytes, align {})", e, layout.size(), layout.align());
                ptr::null_mut()
            }
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let mut guard = self.inner.lock();
        let Some(heap) = guard.as_mut() else {
            return;
        };
        let addr = VirtAddr::new(ptr as u64);
        match heap.owner_of(addr) {
            Some(payload) => {
                // Ошибка уже залогирована / Already logged by `free`.
                let _ = heap.free(payload);
            }
            None => log::error!("heap: dealloc of foreign pointer {:p}", ptr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HEADER_SIZE;
    use crate::testing::FramePool;

    fn locked(pool: &FramePool) -> LockedHeap<FramePool> {
        let heap = LockedHeap::empty();
        heap.init(pool.handle(), HeapConfig::DEFAULT).unwrap();
        heap
    }

    #[test]
    fn empty_heap_returns_null() {
        let heap: LockedHeap<FramePool> = LockedHeap::empty();
        let layout = Layout::from_size_align(16, 8).unwrap();
        assert!(unsafe { heap.alloc(layout) }.is_null());
        assert_eq!(heap.stats(), None);
    }

    #[test]
    fn honours_alignment_and_gives_memory_back() {
        let pool = FramePool::new(8);
        let heap = locked(&pool);

        for align in [1, 8, 64, 256, 4096] {
            let layout = Layout::from_size_align(100, align).unwrap();
            let p = unsafe { heap.alloc(layout) };
            assert!(!p.is_null());
            assert_eq!(p as usize % align, 0, "align {}", align);
            unsafe {
                ptr::write_bytes(p, 0x5a, 100);
                heap.dealloc(p, layout);
            }
        }
        let stats = heap.stats().unwrap();
        assert_eq!(stats.used_blocks, 0);
        assert_eq!(stats.blocks, 1);
        assert_eq!(stats.free, stats.total - HEADER_SIZE);
    }

    #[test]
    fn refuses_alignment_above_a_page() {
        let pool = FramePool::new(4);
        let heap = locked(&pool);
        let layout = Layout::from_size_align(16, 2 * PAGE_SIZE).unwrap();
        assert!(unsafe { heap.alloc(layout) }.is_null());
    }

    #[test]
    fn exhaustion_returns_null() {
        let pool = FramePool::new(2);
        let heap = locked(&pool);
        let layout = Layout::from_size_align(3 * PAGE_SIZE, 8).unwrap();
        assert!(unsafe { heap.alloc(layout) }.is_null());
        // The heap itself is still usable.
        let small = Layout::from_size_align(32, 8).unwrap();
        assert!(!unsafe { heap.alloc(small) }.is_null());
    }

    #[test]
    fn foreign_pointer_is_ignored() {
        let pool = FramePool::new(4);
        let heap = locked(&pool);
        let before = heap.stats();
        let mut local = 0u64;
        let layout = Layout::new::<u64>();
        unsafe { heap.dealloc(&mut local as *mut u64 as *mut u8, layout) };
        assert_eq!(heap.stats(), before);
    }
}
