//! Physical Memory Manager — битовая карта / bitmap
//!
//! Управляет одним непрерывным регионом из карты памяти Limine (самым
//! большим USABLE). Один бит на страницу, поиск серии — first-fit.
//! Manages one contiguous region from the Limine memory map (the largest
//! USABLE one). One bit per page; runs are found first-fit.

use spin::Mutex;
use tessera_mm::{FrameAllocator, PhysAddr, PAGE_SIZE};

/// Потолок управляемой памяти / Ceiling on managed memory (64 MiB).
///
/// Весь регион отображается в HHDM при старте VMM, так что потолок держит
/// число таблиц страниц небольшим.
/// The whole region is mapped into the direct map when the VMM starts, so the
/// ceiling keeps the number of page tables small.
pub const MAX_MANAGED_BYTES: usize = 64 * 1024 * 1024;

const MAX_PAGES: usize = MAX_MANAGED_BYTES / PAGE_SIZE;
const WORDS: usize = MAX_PAGES / 64;

pub struct BitmapAllocator {
    base:  PhysAddr,
    pages: usize,
    used:  [u64; WORDS],
    free:  usize,
}

impl BitmapAllocator {
    pub const fn empty() -> Self {
        Self { base: PhysAddr::new(0), pages: 0, used: [0; WORDS], free: 0 }
    }

    /// Взять регион `[base, base + len)`; края обрезаются до целых страниц.
    /// Take over `[base, base + len)`; partial pages at the edges are dropped.
    pub fn init(&mut self, base: u64, len: u64) {
        let page = PAGE_SIZE as u64;
        let start = base.next_multiple_of(page);
        let usable = len.saturating_sub(start - base) / page;

        self.base = PhysAddr::new(start);
        self.pages = (usable as usize).min(MAX_PAGES);
        self.used = [0; WORDS];
        self.free = self.pages;

        // Физический 0 не выдаём: нулевой корень = «нет таблиц».
        // Physical 0 is never handed out: a zero root means "no tables".
        if start == 0 && self.pages > 0 {
            self.mark(0, 1, true);
            self.free -= 1;
        }
    }

    /// (база, страниц) / (base, pages) of the managed region.
    pub fn managed(&self) -> (PhysAddr, usize) {
        (self.base, self.pages)
    }

    fn is_used(&self, page: usize) -> bool {
        self.used[page / 64] & (1 << (page % 64)) != 0
    }

    fn mark(&mut self, first: usize, count: usize, used: bool) {
        for page in first..first + count {
            let bit = 1 << (page % 64);
            if used {
                self.used[page / 64] |= bit;
            } else {
                self.used[page / 64] &= !bit;
            }
        }
    }
}

impl FrameAllocator for BitmapAllocator {
    fn allocate_pages(&mut self, count: usize) -> Option<PhysAddr> {
        if count == 0 || count > self.free {
            return None;
        }
        let mut start = 0;
        while start + count <= self.pages {
            match (start..start + count).rev().find(|&p| self.is_used(p)) {
                Some(busy) => start = busy + 1,
                None => {
                    self.mark(start, count, true);
                    self.free -= count;
                    return Some(PhysAddr::new(self.base.as_u64() + (start * PAGE_SIZE) as u64));
                }
            }
        }
        None
    }

    fn free_pages(&mut self, base: PhysAddr, count: usize) {
        let offset = base.as_u64().wrapping_sub(self.base.as_u64());
        let first = (offset / PAGE_SIZE as u64) as usize;
        let valid = base.is_page_aligned()
            && base >= self.base
            && first.checked_add(count).is_some_and(|end| end <= self.pages)
            && (first..first + count).all(|p| self.is_used(p));
        if !valid {
            log::error!("pmm: bad free of {} pages at {:#x}", count, base);
            return;
        }
        self.mark(first, count, false);
        self.free += count;
    }

    fn free_page_count(&self) -> usize {
        self.free
    }
}

// ── Глобальный PMM / Global PMM ───────────────────────────────────────────────

pub static FRAMES: Mutex<BitmapAllocator> = Mutex::new(BitmapAllocator::empty());

/// Ручка к глобальному PMM, которую можно раздать VMM и куче.
/// Handle to the global PMM that the VMM and the heap can both hold.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelFrames;

impl FrameAllocator for KernelFrames {
    fn allocate_pages(&mut self, count: usize) -> Option<PhysAddr> {
        FRAMES.lock().allocate_pages(count)
    }

    fn free_pages(&mut self, base: PhysAddr, count: usize) {
        FRAMES.lock().free_pages(base, count)
    }

    fn free_page_count(&self) -> usize {
        FRAMES.lock().free_page_count()
    }
}

pub fn init(base: u64, len: u64) {
    let mut frames = FRAMES.lock();
    frames.init(base, len);
    let (start, pages) = frames.managed();
    log::info!("pmm: {} pages at {:#x} ({} KiB)", pages, start, pages * PAGE_SIZE / 1024);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(pages: u64) -> BitmapAllocator {
        let mut pmm = BitmapAllocator::empty();
        pmm.init(0x10_0000, pages * PAGE_SIZE as u64);
        pmm
    }

    #[test]
    fn init_trims_partial_pages() {
        let mut pmm = BitmapAllocator::empty();
        pmm.init(0x10_0010, 3 * PAGE_SIZE as u64);
        assert_eq!(pmm.managed(), (PhysAddr::new(0x10_1000), 2));
        assert_eq!(pmm.free_page_count(), 2);
    }

    #[test]
    fn init_clamps_to_ceiling() {
        let mut pmm = BitmapAllocator::empty();
        pmm.init(0x10_0000, 4 * MAX_MANAGED_BYTES as u64);
        assert_eq!(pmm.managed().1, MAX_PAGES);
    }

    #[test]
    fn page_zero_is_withheld() {
        let mut pmm = BitmapAllocator::empty();
        pmm.init(0, 4 * PAGE_SIZE as u64);
        assert_eq!(pmm.free_page_count(), 3);
        assert_eq!(pmm.allocate_pages(1), Some(PhysAddr::new(0x1000)));
    }

    #[test]
    fn runs_are_first_fit_and_contiguous() {
        let mut pmm = region(8);
        let a = pmm.allocate_pages(1).unwrap();
        let b = pmm.allocate_pages(3).unwrap();
        assert_eq!(a, PhysAddr::new(0x10_0000));
        assert_eq!(b, PhysAddr::new(0x10_1000));
        assert_eq!(pmm.free_page_count(), 4);

        pmm.free_pages(a, 1);
        // One page hole, a two-page run must skip it.
        assert_eq!(pmm.allocate_pages(2), Some(PhysAddr::new(0x10_4000)));
        assert_eq!(pmm.allocate_pages(1), Some(PhysAddr::new(0x10_0000)));
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut pmm = region(4);
        assert!(pmm.allocate_pages(5).is_none());
        assert!(pmm.allocate_pages(0).is_none());
        assert!(pmm.allocate_pages(4).is_some());
        assert!(pmm.allocate_pages(1).is_none());
    }

    #[test]
    fn bad_frees_are_ignored() {
        let mut pmm = region(4);
        let a = pmm.allocate_pages(2).unwrap();

        pmm.free_pages(PhysAddr::new(a.as_u64() + 1), 1);
        pmm.free_pages(PhysAddr::new(0x1000), 1);
        pmm.free_pages(a, 3);
        assert_eq!(pmm.free_page_count(), 2);

        pmm.free_pages(a, 2);
        pmm.free_pages(a, 2);
        assert_eq!(pmm.free_page_count(), 4);
    }

    #[test]
    fn bitmap_crosses_word_boundaries() {
        let mut pmm = region(200);
        assert!(pmm.allocate_pages(60).is_some());
        let run = pmm.allocate_pages(10).unwrap();
        assert_eq!(run, PhysAddr::new(0x10_0000 + 60 * PAGE_SIZE as u64));
        pmm.free_pages(run, 10);
        assert_eq!(pmm.free_page_count(), 140);
    }
}
