//! Порядок инициализации / Bring-up order
//!
//! PMM → VMM → куча. Каждый шаг возвращает новый тип, так что кучу нельзя
//! поднять до paging, а paging до источника страниц.
//! PMM, then VMM, then heap. Each step yields a new type, so the heap cannot
//! come up before paging and paging cannot come up without a page source.
//!
//! ```ignore
//! let memory = MemoryInit::new(frames)
//!     .init_paging(&vmm_config, hw, &mut idt)?
//!     .init_heap(heap_config)?;
//! ```

use crate::error::{HeapResult, VmmResult};
use crate::fault::InterruptController;
use crate::heap::{HeapConfig, SlabHeap};
use crate::hw::PagingHardware;
use crate::paging::{PageDirectory, PageFlags};
use crate::pmm::FrameAllocator;
use crate::vmm::{Vmm, VmmConfig};
use crate::{PhysAddr, VirtAddr};

/// Есть только источник страниц / Only a page source so far.
pub struct MemoryInit<P> {
    frames: P,
}

impl<P: FrameAllocator + Clone> MemoryInit<P> {
    pub fn new(frames: P) -> Self {
        Self { frames }
    }

    pub fn init_paging<H, I>(
        mut self,
        config: &VmmConfig<'_>,
        hw:     H,
        idt:    &mut I,
    ) -> VmmResult<PagingReady<P, H>>
    where
        H: PagingHardware,
        I: InterruptController + ?Sized,
    {
        let vmm = Vmm::init(config, hw, &mut self.frames, idt)?;
        Ok(PagingReady { frames: self.frames, vmm })
    }
}

/// Paging включён, кучи ещё нет / Paging is on, no heap yet.
pub struct PagingReady<P, H: PagingHardware> {
    frames: P,
    vmm:    Vmm<H>,
}

impl<P: FrameAllocator + Clone, H: PagingHardware> PagingReady<P, H> {
    pub fn vmm(&self) -> &Vmm<H> { &self.vmm }
    pub fn vmm_mut(&mut self) -> &mut Vmm<H> { &mut self.vmm }

    /// Куча берёт страницы у того же PMM / The heap draws on the same PMM.
    pub fn init_heap(self, config: HeapConfig) -> HeapResult<KernelMemory<P, H>> {
        let heap = SlabHeap::init(self.frames.clone(), config)?;
        Ok(KernelMemory { frames: self.frames, vmm: self.vmm, heap })
    }
}

/// Всё поднято / Everything is up.
pub struct KernelMemory<P: FrameAllocator, H: PagingHardware> {
    frames: P,
    vmm:    Vmm<H>,
    heap:   SlabHeap<P>,
}

impl<P: FrameAllocator, H: PagingHardware> KernelMemory<P, H> {
    /// `None` вместо null / `None` stands in for a null pointer.
    pub fn malloc(&mut self, bytes: usize) -> Option<VirtAddr> {
        self.heap.alloc(bytes).ok()
    }

    pub fn free(&mut self, addr: VirtAddr) -> HeapResult<()> {
        self.heap.free(addr)
    }

    pub fn map(&mut self, dir: PageDirectory, virt: VirtAddr, phys: PhysAddr, flags: PageFlags) -> VmmResult<()> {
        self.vmm.map(dir, virt, phys, flags, &mut self.frames)
    }

    pub fn unmap(&mut self, dir: PageDirectory, virt: VirtAddr) -> VmmResult<PhysAddr> {
        self.vmm.unmap(dir, virt)
    }

    pub fn translate(&self, dir: PageDirectory, virt: VirtAddr) -> VmmResult<PhysAddr> {
        self.vmm.translate(dir, virt)
    }

    pub fn new_directory(&mut self) -> VmmResult<PageDirectory> {
        self.vmm.new_directory(&mut self.frames)
    }

    pub fn vmm(&self) -> &Vmm<H> { &self.vmm }
    pub fn vmm_mut(&mut self) -> &mut Vmm<H> { &mut self.vmm }
    pub fn heap(&self) -> &SlabHeap<P> { &self.heap }
    pub fn frames_mut(&mut self) -> &mut P { &mut self.frames }

    /// Разобрать на части для глобальных синглтонов ядра.
    /// Split up for the kernel's global singletons.
    pub fn into_parts(self) -> (P, Vmm<H>, SlabHeap<P>) {
        (self.frames, self.vmm, self.heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HeapError, VmmError};
    use crate::pmm::PAGE_SIZE;
    use crate::testing::{noop_trap, FakePaging, FramePool, RecordingIdt};
    use crate::vmm::KernelRegion;

    static REGIONS: [KernelRegion; 1] = [KernelRegion {
        virt: VirtAddr::new(0xffff_ffff_8000_0000),
        phys: PhysAddr::new(0x20_0000),
        size: 2 * PAGE_SIZE,
    }];

    fn config() -> VmmConfig<'static> {
        VmmConfig { phys_offset: 0, kernel_regions: &REGIONS, fault_entry: noop_trap }
    }

    #[test]
    fn full_bring_up_shares_one_page_source() {
        let pool = FramePool::new(32);
        let mut idt = RecordingIdt::default();

        let mut memory = MemoryInit::new(pool.handle())
            .init_paging(&config(), FakePaging::default(), &mut idt)
            .unwrap()
            .init_heap(HeapConfig::DEFAULT)
            .unwrap();

        // 4 table frames, 1 page of block slots, 1 heap page.
        assert_eq!(pool.free_page_count(), 32 - 6);
        assert!(memory.vmm().hardware().enabled);
        assert_eq!(idt.handlers.len(), 1);

        let p = memory.malloc(9000).unwrap();
        assert_eq!(memory.heap().total(), 4 * PAGE_SIZE);
        memory.free(p).unwrap();
        assert_eq!(memory.free(p), Err(HeapError::InvalidFree(p)));

        let dir = memory.vmm().kernel_directory();
        let virt = VirtAddr::new(0xa000_0000);
        memory.map(dir, virt, PhysAddr::new(0x30_0000), PageFlags::KERNEL_DATA).unwrap();
        assert_eq!(memory.translate(dir, virt), Ok(PhysAddr::new(0x30_0000)));
        assert_eq!(memory.unmap(dir, virt), Ok(PhysAddr::new(0x30_0000)));
        assert_eq!(memory.translate(dir, virt), Err(VmmError::NotMapped(virt)));

        let (_, vmm, heap) = memory.into_parts();
        assert_eq!(vmm.current_directory(), dir);
        assert_eq!(heap.block_count(), 1);
    }

    #[test]
    fn paging_failure_stops_bring_up() {
        let pool = FramePool::new(8);
        pool.set_budget(1);
        let mut idt = RecordingIdt::default();
        let err = MemoryInit::new(pool.handle())
            .init_paging(&config(), FakePaging::default(), &mut idt)
            .err();
        assert_eq!(err, Some(VmmError::InitExhausted));
        assert!(idt.handlers.is_empty());
    }

    #[test]
    fn heap_failure_after_paging_is_reported() {
        let pool = FramePool::new(8);
        pool.set_budget(4);
        let mut idt = RecordingIdt::default();
        let ready = MemoryInit::new(pool.handle())
            .init_paging(&config(), FakePaging::default(), &mut idt)
            .unwrap();
        assert!(ready.vmm().hardware().enabled);

        let err = ready.init_heap(HeapConfig::DEFAULT).err();
        assert_eq!(err, Some(HeapError::InitExhausted));
    }
}
