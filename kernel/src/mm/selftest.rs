//! Самопроверка памяти при загрузке / Boot-time memory self-test
//!
//! Те же шаги, что и в тестах `tessera-mm`, но на настоящих PMM и CR3.
//! The same steps as the `tessera-mm` tests, on the real PMM and CR3.

use alloc::boxed::Box;
use alloc::vec::Vec;

use tessera_mm::heap::{HEADER_SIZE, SLOTS_PER_PAGE};
use tessera_mm::{FrameAllocator, PageFlags, VirtAddr, VmmError};

use super::pmm::KernelFrames;
use super::{HEAP, VMM};

/// Свободный адрес для временного отображения / Unused address for the scratch mapping.
const SCRATCH: VirtAddr = VirtAddr::new(0xA000_0000);

pub fn run() {
    heap_scenario();
    global_allocator();
    paging_round_trip();
    log::info!("selftest: memory OK");
}

fn heap_scenario() {
    let mut guard = HEAP.lock();
    let Some(heap) = guard.as_mut() else {
        panic!("selftest: heap not installed");
    };
    let start = heap.stats();

    let mut live = [VirtAddr::new(0); 4];
    for (slot, bytes) in live.iter_mut().zip([1, 9000, 4095, 12]) {
        *slot = match heap.alloc(bytes) {
            Ok(addr) => addr,
            Err(e) => panic!("selftest: alloc({}) failed: {}", bytes, e),
        };
        log::debug!("selftest: alloc({}) = {:#x}, total {}", bytes, *slot, heap.total());
    }
    for addr in live {
        if let Err(e) = heap.free(addr) {
            panic!("selftest: {}", e);
        }
    }

    let end = heap.stats();
    if end.used_blocks != start.used_blocks || end.free != end.total - end.blocks * HEADER_SIZE {
        panic!("selftest: heap counters off: {:?}", end);
    }
    log::info!("selftest: heap total {} bytes, free {}, {} block(s)", end.total, end.free, end.blocks);
}

fn global_allocator() {
    let mut v: Vec<u32> = Vec::new();
    v.extend([1, 2, 3]);
    let b = Box::new(42u64);

    // Больше живых блоков, чем помещается на одной странице слотов.
    // More live blocks than one page of slots holds.
    let many: Vec<Box<u64>> = (0..4 * SLOTS_PER_PAGE as u64).map(Box::new).collect();
    if many.iter().enumerate().any(|(i, x)| **x != i as u64) {
        panic!("selftest: boxed values corrupted");
    }
    let blocks = HEAP.stats().map_or(0, |s| s.blocks);
    drop(many);
    log::info!("selftest: vec={:?}, box={}, {} blocks at peak", v, b, blocks);
}

fn paging_round_trip() {
    let mut guard = VMM.lock();
    let Some(vmm) = guard.as_mut() else {
        panic!("selftest: VMM not installed");
    };
    let Some(frame) = KernelFrames.allocate_pages(1) else {
        panic!("selftest: no frame for the scratch mapping");
    };
    let dir = vmm.kernel_directory();

    if let Err(e) = vmm.map(dir, SCRATCH, frame, PageFlags::KERNEL_DATA, &mut KernelFrames) {
        panic!("selftest: {}", e);
    }
    match vmm.translate(dir, SCRATCH) {
        Ok(phys) if phys == frame => {}
        other => panic!("selftest: translate({:#x}) = {:?}", SCRATCH, other),
    }

    let scratch = SCRATCH.as_mut_ptr::<u64>();
    // SAFETY: SCRATCH was just mapped writable onto a page nobody else owns.
    let seen = unsafe {
        scratch.write_volatile(0x7E55_E8A0);
        scratch.read_volatile()
    };
    if seen != 0x7E55_E8A0 {
        panic!("selftest: scratch page read back {:#x}", seen);
    }

    match vmm.unmap(dir, SCRATCH) {
        Ok(phys) if phys == frame => {}
        other => panic!("selftest: unmap({:#x}) = {:?}", SCRATCH, other),
    }
    if vmm.translate(dir, SCRATCH) != Err(VmmError::NotMapped(SCRATCH)) {
        panic!("selftest: {:#x} still mapped after unmap", SCRATCH);
    }
    KernelFrames.free_pages(frame, 1);
    log::info!("selftest: map/translate/unmap at {:#x} OK", SCRATCH);
}
