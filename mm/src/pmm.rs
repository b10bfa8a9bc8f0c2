//! Physical Memory Manager — интерфейс / interface
//!
//! Сам аллокатор физических страниц живёт в ядре; здесь только контракт,
//! через который VMM и куча получают непрерывные серии страниц.
//! The frame allocator itself lives in the kernel; this is only the contract
//! through which the VMM and the heap obtain contiguous page runs.
//!
//! Серия страниц принадлежит получателю до конца его жизни.
//! A page run belongs to whoever received it for the rest of its lifetime.

use super::PhysAddr;

pub const PAGE_SIZE: usize = 4096;

/// Число страниц, покрывающих `bytes` байт.
/// Number of pages needed to cover `bytes` bytes.
pub const fn pages_for(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

/// Источник физических страниц / Source of physical page runs.
pub trait FrameAllocator {
    /// Выделить `count` подряд идущих страниц, выровненных по `PAGE_SIZE`.
    /// Allocate `count` contiguous, page-aligned pages.
    ///
    /// Contents of the returned run are unspecified.
    fn allocate_pages(&mut self, count: usize) -> Option<PhysAddr>;

    /// Вернуть серию страниц / Return a page run.
    fn free_pages(&mut self, base: PhysAddr, count: usize);

    /// Сколько страниц ещё свободно / Pages still available.
    fn free_page_count(&self) -> usize;
}

impl<T: FrameAllocator + ?Sized> FrameAllocator for &mut T {
    fn allocate_pages(&mut self, count: usize) -> Option<PhysAddr> {
        (**self).allocate_pages(count)
    }

    fn free_pages(&mut self, base: PhysAddr, count: usize) {
        (**self).free_pages(base, count)
    }

    fn free_page_count(&self) -> usize {
        (**self).free_page_count()
    }
}
