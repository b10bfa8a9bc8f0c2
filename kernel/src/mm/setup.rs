//! Подъём памяти ядра / Kernel memory bring-up
//!
//! PMM → VMM → куча. Всё, что Limine положил в свою память, читается до
//! смены CR3: после неё эта память не отображена.
//! PMM, then VMM, then heap. Everything Limine left in its own memory is read
//! before the CR3 switch, since that memory is not mapped afterwards.

use spin::Mutex;
use tessera_mm::fault::{FaultAction, InterruptFrame};
use tessera_mm::heap::{HeapConfig, LockedHeap};
use tessera_mm::vmm::{KernelRegion, Vmm, VmmConfig};
use tessera_mm::{MemoryInit, PhysAddr, VirtAddr, PAGE_SIZE};

use super::pmm::{self, KernelFrames};
use crate::arch::x86_64::boot;
use crate::arch::x86_64::idt::Idt;
use crate::arch::x86_64::mm::X86Paging;

#[global_allocator]
pub static HEAP: LockedHeap<KernelFrames> = LockedHeap::empty();

pub static VMM: Mutex<Option<Vmm<X86Paging>>> = Mutex::new(None);

pub fn init() {
    let Some(hhdm) = boot::hhdm_offset() else {
        panic!("mm: Limine gave no HHDM offset");
    };
    let Some((base, len)) = boot::largest_usable_region() else {
        panic!("mm: Limine memory map has no usable region");
    };
    let Some(image) = boot::kernel_image() else {
        panic!("mm: Limine gave no kernel address");
    };

    // 1. PMM
    pmm::init(base, len);
    let (managed, pages) = pmm::FRAMES.lock().managed();

    // 2. VMM: образ ядра + прямое отображение управляемой памяти
    //    (там живут таблицы страниц и куча).
    //    VMM: the kernel image plus the direct map of managed memory,
    //    which holds the page tables and the heap.
    let regions = [
        KernelRegion {
            virt: VirtAddr::new(image.virt),
            phys: PhysAddr::new(image.phys),
            size: image.size as usize,
        },
        KernelRegion {
            virt: VirtAddr::new(managed.as_u64() + hhdm),
            phys: managed,
            size: pages * PAGE_SIZE,
        },
    ];
    let config = VmmConfig {
        phys_offset:    hhdm,
        kernel_regions: &regions,
        fault_entry:    page_fault_entry,
    };

    log::info!("mm: kernel image {:#x} -> {:#x} ({} KiB)", image.virt, image.phys, image.size / 1024);
    let ready = match MemoryInit::new(KernelFrames).init_paging(&config, X86Paging, &mut Idt) {
        Ok(ready) => ready,
        Err(e) => panic!("mm: {}", e),
    };
    log::info!(
        "mm: paging on, root {:#x}, {} table pages",
        ready.vmm().kernel_directory().root(),
        ready.vmm().table_frames()
    );

    // 3. Куча / Heap
    let config = HeapConfig::DEFAULT.with_phys_offset(hhdm);
    let memory = match ready.init_heap(config) {
        Ok(memory) => memory,
        Err(e) => panic!("mm: {}", e),
    };

    // Заголовки блоков лежат на страницах PMM, так что `SlabHeap` мал и
    // переносится по значению.
    // Block headers live on PMM pages, so `SlabHeap` is small enough to move.
    let (_, vmm, heap) = memory.into_parts();
    *VMM.lock() = Some(vmm);
    HEAP.install(heap);
}

/// Вход #PF: отчёт + решение политики. Восстановления нет.
/// #PF entry: report plus the policy's decision. There is no recovery path.
fn page_fault_entry(frame: &InterruptFrame, error: u64) {
    let Some(guard) = VMM.try_lock() else {
        panic!("page fault at RIP={:#x} while the VMM was locked", frame.rip);
    };
    let Some(vmm) = guard.as_ref() else {
        panic!("page fault at RIP={:#x} before the VMM was up (error={:#x})", frame.rip, error);
    };
    let (info, action) = vmm.handle_page_fault(frame, error);
    drop(guard);

    match action {
        FaultAction::Halt => panic!("unrecoverable page fault at {:#x}", info.fault_address),
        // Задач пока нет, убивать некого / No tasks yet, nothing to kill.
        FaultAction::KillFaultingTask => {
            panic!("user page fault at {:#x} with no scheduler to end the task", info.fault_address)
        }
    }
}
